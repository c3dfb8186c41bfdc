#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use artsearch::Result;
use artsearch::db::{ArtworkRecord, Database, NewEmbedding, crud, init_db};
use artsearch::encoder::{EMBEDDING_DIM, Encoder};
use artsearch::error::Error;
use artsearch::index::{Neighbor, VectorIndex};
use artsearch::similarity::{euclidean, l2_normalize};
use async_trait::async_trait;
use tempfile::TempDir;

pub struct TestDb {
    pub dir: TempDir,
    pub db: Database,
}

pub async fn test_db() -> TestDb {
    let dir = TempDir::new().unwrap();
    let db = init_db(dir.path().join("artsearch.db")).await.unwrap();
    TestDb { dir, db }
}

pub fn record(id: i64, source_id: i64, title: &str) -> ArtworkRecord {
    ArtworkRecord {
        id,
        source_id,
        title: title.to_string(),
        artists: vec![],
        year_start: None,
        year_end: None,
        color: None,
        technique: None,
        image_url: Some(format!("https://images.example.org/{id}.jpg")),
    }
}

pub async fn insert(db: &Database, records: &[ArtworkRecord]) {
    let mut tx = db.begin().await.unwrap();
    for record in records {
        crud::ensure_source(&mut *tx, record.source_id).await.unwrap();
        crud::upsert_artwork(&mut *tx, record).await.unwrap();
    }
    tx.commit().await.unwrap();
}

/// 保存向量并同步加入索引
pub async fn embed(db: &Database, index: &mut dyn VectorIndex, items: Vec<(i64, Vec<f32>)>) {
    let batch = items
        .into_iter()
        .map(|(artwork_id, mut vector)| {
            l2_normalize(&mut vector);
            NewEmbedding { artwork_id, vector, focal_point: (0.5, 0.5) }
        })
        .collect::<Vec<_>>();
    for (row_id, embedding) in crud::save_embedding_batch(db, &batch).await.unwrap() {
        index.add(row_id as u64, &embedding.vector).unwrap();
    }
}

/// 暴力搜索的向量索引，记录查询次数
#[derive(Default)]
pub struct FlatIndex {
    items: Vec<(u64, Vec<f32>)>,
    pub calls: Arc<AtomicUsize>,
}

impl FlatIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl VectorIndex for FlatIndex {
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut neighbors = self
            .items
            .iter()
            .map(|(key, v)| Neighbor { key: *key, distance: euclidean(query, v) })
            .collect::<Vec<_>>();
        neighbors.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.key.cmp(&b.key)));
        neighbors.truncate(k);
        Ok(neighbors)
    }

    fn add(&mut self, key: u64, vector: &[f32]) -> Result<()> {
        self.items.push((key, vector.to_vec()));
        Ok(())
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn save(&self, _path: &Path) -> Result<()> {
        Ok(())
    }
}

const VOCABULARY: &[&str] =
    &["animal", "horse", "dog", "fruit", "bowl", "flower", "sea", "ship", "red", "portrait"];

/// 词袋编码器：每个词占一个维度，复数去掉结尾的 s
///
/// 不认识查询中的任何词时返回不可用
#[derive(Default)]
pub struct KeywordEncoder {
    pub text_calls: AtomicUsize,
}

impl KeywordEncoder {
    pub fn vector(words: &[&str]) -> Vec<f32> {
        let mut v = vec![0.0; EMBEDDING_DIM];
        for word in words {
            let token = word.trim_end_matches('s');
            if let Some(i) = VOCABULARY.iter().position(|w| *w == token) {
                v[i] += 1.0;
            }
        }
        v
    }
}

#[async_trait]
impl Encoder for KeywordEncoder {
    async fn encode_text(&self, text: &str) -> Result<Vec<f32>> {
        self.text_calls.fetch_add(1, Ordering::SeqCst);
        let lower = text.to_lowercase();
        let words = lower.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()).collect::<Vec<_>>();
        let mut v = Self::vector(&words);
        if v.iter().all(|x| *x == 0.0) {
            return Err(Error::EncoderUnavailable(format!("未知的查询: {text}")));
        }
        l2_normalize(&mut v);
        Ok(v)
    }

    async fn encode_image(&self, image: &[u8]) -> Result<Vec<f32>> {
        let mut v = vec![0.0; EMBEDDING_DIM];
        for (i, b) in image.iter().enumerate() {
            v[i % EMBEDDING_DIM] += *b as f32;
        }
        if v.iter().all(|x| *x == 0.0) {
            v[0] = 1.0;
        }
        l2_normalize(&mut v);
        Ok(v)
    }

    fn dimension(&self) -> usize {
        EMBEDDING_DIM
    }
}
