use std::hint::black_box;

use artsearch::search::color::rank;
use artsearch::similarity::{distance_to_similarity, dot, euclidean, l2_normalize};
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use rand::prelude::*;

const DIM: usize = 512;

fn random_units(rng: &mut StdRng, n: usize) -> Vec<Vec<f32>> {
    (0..n)
        .map(|_| {
            let mut v = (0..DIM).map(|_| rng.random_range(-1.0f32..1.0)).collect::<Vec<_>>();
            l2_normalize(&mut v);
            v
        })
        .collect()
}

fn bench_vectors(c: &mut Criterion) {
    let mut group = c.benchmark_group("Vector");
    let mut rng = StdRng::seed_from_u64(42);
    let query = random_units(&mut rng, 1).remove(0);
    let corpus = random_units(&mut rng, 10_000);

    group.throughput(Throughput::Elements(corpus.len() as u64));
    group.bench_function("dot", |b| {
        b.iter(|| corpus.iter().map(|v| dot(black_box(&query), v)).sum::<f32>())
    });
    // 索引返回欧氏距离，再换算成相似度
    group.bench_function("euclidean_to_similarity", |b| {
        b.iter(|| {
            corpus
                .iter()
                .map(|v| distance_to_similarity(euclidean(black_box(&query), v)))
                .sum::<f32>()
        })
    });
    group.finish();
}

fn bench_color(c: &mut Criterion) {
    let mut group = c.benchmark_group("Color");
    let mut rng = StdRng::seed_from_u64(7);
    let candidates = (0..100_000i64).map(|id| (id, rng.random::<[u8; 3]>())).collect::<Vec<_>>();

    group.throughput(Throughput::Elements(candidates.len() as u64));
    group.bench_function("rank_100k", |b| {
        b.iter(|| rank(black_box([200, 30, 30]), candidates.iter().copied()))
    });
    group.finish();
}

criterion_group!(benches, bench_vectors, bench_color);
criterion_main!(benches);
