mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use artsearch::Result;
use artsearch::cache::CacheService;
use artsearch::config::SearchOptions;
use artsearch::db::{Database, SourceFilter, crud};
use artsearch::encoder::{EMBEDDING_DIM, Encoder};
use artsearch::error::Error;
use artsearch::index::shared;
use artsearch::search::color::color_search;
use artsearch::search::semantic::{adaptive_knn, knn_hits};
use artsearch::search::{QueryRouter, SearchMode, SearchQuery};
use artsearch::similarity::dot;
use async_trait::async_trait;
use rstest::rstest;

use common::*;

fn router(db: &Database, index: FlatIndex, encoder: Arc<KeywordEncoder>) -> QueryRouter {
    QueryRouter::new(
        db.clone(),
        shared(index),
        encoder,
        Arc::new(CacheService::default()),
        SearchOptions::default(),
    )
}

/// 三件已计算向量的藏品
async fn gallery() -> (TestDb, FlatIndex) {
    let t = test_db().await;
    let mut lilies = record(3, 1, "Water Lilies");
    lilies.artists = vec!["Claude Monet".to_string()];
    insert(
        &t.db,
        &[record(1, 1, "Horses in a Field"), record(2, 1, "Still Life with Fruit"), lilies],
    )
    .await;

    let mut index = FlatIndex::new();
    embed(
        &t.db,
        &mut index,
        vec![
            (1, KeywordEncoder::vector(&["horse", "animal"])),
            (2, KeywordEncoder::vector(&["fruit", "bowl"])),
            (3, KeywordEncoder::vector(&["flower", "sea"])),
        ],
    )
    .await;
    (t, index)
}

fn ids(hits: &[artsearch::search::SearchHit]) -> Vec<i64> {
    hits.iter().map(|h| h.artwork.id).collect()
}

#[tokio::test]
async fn horse_ranks_above_still_life() {
    let (t, index) = gallery().await;
    let encoder = Arc::new(KeywordEncoder::default());

    let query = encoder.encode_text("animals, horses, dogs").await.unwrap();
    assert_eq!(query.len(), EMBEDDING_DIM);
    assert!((dot(&query, &query) - 1.0).abs() < 1e-5);

    let router = router(&t.db, index, encoder);
    let routed = router.search(&SearchQuery::new("animals, horses, dogs")).await.unwrap();
    assert_eq!(routed.mode, SearchMode::Semantic);

    let ids = ids(&routed.hits);
    let horse = ids.iter().position(|id| *id == 1).unwrap();
    let still_life = ids.iter().position(|id| *id == 2).unwrap();
    assert!(horse < still_life);
    assert!(routed.hits.windows(2).all(|w| w[0].score >= w[1].score));
    assert!(routed.hits.iter().all(|h| (-1.0..=1.0).contains(&h.score)));
}

#[tokio::test]
async fn color_search_orders_by_manhattan_distance() {
    let t = test_db().await;
    let mut records = vec![record(1, 1, "A"), record(2, 1, "B"), record(3, 1, "C")];
    records[0].color = Some([200, 40, 30]);
    records[1].color = Some([10, 10, 200]);
    records[2].color = Some([150, 50, 45]);
    insert(&t.db, &records).await;

    let hits = color_search(&t.db, [160, 48, 40], 10, 0, SourceFilter::AllEnabled).await.unwrap();
    assert_eq!(ids(&hits), vec![3, 1, 2]);
}

#[rstest]
#[case("red")]
#[case("RED")]
#[case("  Red ")]
#[tokio::test]
async fn color_term_always_wins(#[case] query: &str) {
    let t = test_db().await;
    let mut crimson = record(1, 1, "Crimson Study");
    crimson.color = Some([190, 20, 25]);
    insert(&t.db, &[crimson, record(2, 1, "Red Boats")]).await;

    // 语义搜索也能命中，但颜色词优先
    let mut index = FlatIndex::new();
    embed(&t.db, &mut index, vec![(2, KeywordEncoder::vector(&["red", "ship"]))]).await;
    let encoder = Arc::new(KeywordEncoder::default());
    let router = router(&t.db, index, encoder.clone());

    let routed = router.search(&SearchQuery::new(query)).await.unwrap();
    assert_eq!(routed.mode, SearchMode::Color);
    assert_eq!(ids(&routed.hits), vec![1]);
    assert_eq!(encoder.text_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn empty_query_without_source_is_empty() {
    let (t, index) = gallery().await;
    let router = router(&t.db, index, Arc::new(KeywordEncoder::default()));

    let routed = router.search(&SearchQuery::new("  \t ")).await.unwrap();
    assert_eq!(routed.mode, SearchMode::Empty);
    assert!(routed.hits.is_empty());
}

#[tokio::test]
async fn empty_query_with_source_browses() {
    let t = test_db().await;
    let records = (1..=20).map(|id| record(id, 1 + id % 2, "Untitled")).collect::<Vec<_>>();
    insert(&t.db, &records).await;
    let router = router(&t.db, FlatIndex::new(), Arc::new(KeywordEncoder::default()));

    let query = SearchQuery::new("").with_source(Some(1)).with_page(5, 0);
    let first = router.search(&query).await.unwrap();
    assert_eq!(first.mode, SearchMode::Browse);
    assert_eq!(first.hits.len(), 5);
    assert!(first.hits.iter().all(|h| h.artwork.source_id == 1));

    let again = router.search(&query).await.unwrap();
    assert_eq!(ids(&first.hits), ids(&again.hits));

    let next = router.search(&query.clone().with_page(5, 5)).await.unwrap();
    assert!(ids(&next.hits).iter().all(|id| !ids(&first.hits).contains(id)));
}

#[rstest]
#[case("water lil", 3)]
#[case("monet", 3)]
#[case("Still-Life", 2)]
#[tokio::test]
async fn unknown_words_fall_back_to_fulltext(#[case] query: &str, #[case] expected: i64) {
    let (t, index) = gallery().await;
    let router = router(&t.db, index, Arc::new(KeywordEncoder::default()));

    let routed = router.search(&SearchQuery::new(query)).await.unwrap();
    assert_eq!(routed.mode, SearchMode::FullText);
    assert_eq!(ids(&routed.hits), vec![expected]);
}

#[tokio::test]
async fn empty_semantic_result_falls_back_to_fulltext() {
    let (t, _) = gallery().await;
    let router = router(&t.db, FlatIndex::new(), Arc::new(KeywordEncoder::default()));

    let routed = router.search(&SearchQuery::new("horses")).await.unwrap();
    assert_eq!(routed.mode, SearchMode::FullText);
    assert_eq!(ids(&routed.hits), vec![1]);
}

#[tokio::test]
async fn punctuation_only_query_returns_nothing() {
    let (t, index) = gallery().await;
    let router = router(&t.db, index, Arc::new(KeywordEncoder::default()));

    let routed = router.search(&SearchQuery::new("\"*()")).await.unwrap();
    assert!(routed.hits.is_empty());
}

#[tokio::test]
async fn disabled_sources_and_broken_images_are_excluded() {
    let t = test_db().await;
    insert(
        &t.db,
        &[record(1, 1, "Sunflowers"), record(2, 2, "Sunflowers"), record(3, 1, "Sunflowers")],
    )
    .await;
    crud::upsert_source(&t.db, 2, "hidden", false).await.unwrap();
    crud::mark_broken(&t.db, 3, "404").await.unwrap();
    let router = router(&t.db, FlatIndex::new(), Arc::new(KeywordEncoder::default()));

    let all = router.search(&SearchQuery::new("sunflower")).await.unwrap();
    assert_eq!(ids(&all.hits), vec![1]);

    // 指定来源时不论是否启用
    let only = router.search(&SearchQuery::new("sunflower").with_source(Some(2))).await.unwrap();
    assert_eq!(ids(&only.hits), vec![2]);
}

#[tokio::test]
async fn similar_excludes_query_artwork() {
    let (t, index) = gallery().await;
    let router = router(&t.db, index, Arc::new(KeywordEncoder::default()));

    let hits = router.similar(1, 10, 0, SourceFilter::AllEnabled).await.unwrap();
    let ids = ids(&hits);
    assert!(!ids.contains(&1));
    assert_eq!(ids.len(), 2);

    let missing = router.similar(999, 10, 0, SourceFilter::AllEnabled).await;
    assert!(matches!(missing, Err(Error::NotFound(_))));
}

/// 启用来源的藏品都离查询很远，被大量停用来源的近邻挤在后面
async fn crowded(disabled: i64, enabled: i64) -> (TestDb, FlatIndex) {
    let t = test_db().await;
    let mut records = (1..=disabled).map(|id| record(id, 2, "Crowd")).collect::<Vec<_>>();
    records.extend((1..=enabled).map(|i| record(10_000 + i, 1, "Far")));
    insert(&t.db, &records).await;
    crud::upsert_source(&t.db, 2, "hidden", false).await.unwrap();

    let mut items = (1..=disabled).map(|id| (id, vec![1.0, id as f32 * 1e-4, 0.0, 0.0])).collect::<Vec<_>>();
    // 对 [1, 0, 0, 0] 而言 ID 越大越近，对 [-1, 0, 0, 0] 而言 ID 越小越近
    items.extend((1..=enabled).map(|i| (10_000 + i, vec![-1.0, 0.0, 0.0, i as f32])));
    let mut index = FlatIndex::new();
    embed(&t.db, &mut index, items).await;
    (t, index)
}

#[tokio::test]
async fn knn_expansion_stops_after_four_attempts() {
    let (t, index) = crowded(2000, 5).await;
    let query = [1.0, 0.0, 0.0, 0.0];

    let outcome = adaptive_knn(&t.db, &index, &query, 10, SourceFilter::AllEnabled, None).await.unwrap();
    assert_eq!(outcome.attempts, 4);
    assert_eq!(outcome.k, 960);
    assert_eq!(index.calls(), 4);
    assert!(outcome.ranked.is_empty());
}

#[tokio::test]
async fn knn_expansion_returns_all_available_matches() {
    let (t, index) = crowded(300, 5).await;
    let query = [1.0, 0.0, 0.0, 0.0];

    let hits = knn_hits(&t.db, &index, &query, 10, 0, SourceFilter::AllEnabled, None).await.unwrap();
    assert!(index.calls() <= 4);
    // 按近邻顺序而不是 ID 顺序
    assert_eq!(ids(&hits), vec![10_005, 10_004, 10_003, 10_002, 10_001]);
}

#[tokio::test]
async fn knn_offset_slices_filtered_list() {
    let (t, index) = crowded(50, 5).await;
    let query = [-1.0, 0.0, 0.0, 0.0];

    let hits = knn_hits(&t.db, &index, &query, 2, 1, SourceFilter::AllEnabled, None).await.unwrap();
    assert_eq!(index.calls(), 1);
    assert_eq!(ids(&hits), vec![10_002, 10_003]);
}

/// 文本编码永远不返回的编码器
struct HungEncoder;

#[async_trait]
impl Encoder for HungEncoder {
    async fn encode_text(&self, _text: &str) -> Result<Vec<f32>> {
        std::future::pending().await
    }

    async fn encode_image(&self, _image: &[u8]) -> Result<Vec<f32>> {
        std::future::pending().await
    }

    fn dimension(&self) -> usize {
        EMBEDDING_DIM
    }
}

#[tokio::test]
async fn hung_encoder_falls_back_after_timeout() {
    let (t, index) = gallery().await;
    let opts = SearchOptions { semantic_timeout: 50, ..Default::default() };
    let router = QueryRouter::new(
        t.db.clone(),
        shared(index),
        Arc::new(HungEncoder),
        Arc::new(CacheService::default()),
        opts,
    );

    let start = Instant::now();
    let routed = router.search(&SearchQuery::new("horses")).await.unwrap();
    assert!(start.elapsed() < Duration::from_secs(10));
    assert_eq!(routed.mode, SearchMode::FullText);
    assert_eq!(ids(&routed.hits), vec![1]);
}

#[tokio::test]
async fn broken_fulltext_index_degrades_to_substring() {
    let t = test_db().await;
    insert(
        &t.db,
        &[
            record(1, 1, "Sunflowers"),
            record(2, 2, "Sunflowers"),
            record(3, 1, "Sunflowers"),
            record(4, 1, "Irises"),
        ],
    )
    .await;
    crud::upsert_source(&t.db, 2, "hidden", false).await.unwrap();
    crud::mark_broken(&t.db, 3, "404").await.unwrap();
    sqlx::query("DROP TABLE artwork_fts").execute(&t.db).await.unwrap();
    let router = router(&t.db, FlatIndex::new(), Arc::new(KeywordEncoder::default()));

    let all = router.search(&SearchQuery::new("sunflower")).await.unwrap();
    assert_eq!(all.mode, SearchMode::Substring);
    assert_eq!(ids(&all.hits), vec![1]);
    assert!(all.hits.iter().all(|h| h.score == 0.0));

    let only = router.search(&SearchQuery::new("sunflower").with_source(Some(2))).await.unwrap();
    assert_eq!(only.mode, SearchMode::Substring);
    assert_eq!(ids(&only.hits), vec![2]);
}

#[rstest]
#[case("horses")]
#[case("water lil")]
#[case("red")]
#[tokio::test]
async fn huge_offset_returns_empty_page(#[case] query: &str) {
    let (t, index) = gallery().await;
    let router = router(&t.db, index, Arc::new(KeywordEncoder::default()));

    let routed = router.search(&SearchQuery::new(query).with_page(24, usize::MAX)).await.unwrap();
    assert!(routed.hits.is_empty());

    let browse = SearchQuery::new("").with_source(Some(1)).with_page(24, usize::MAX);
    assert!(router.search(&browse).await.unwrap().hits.is_empty());

    let similar = router.similar(1, 24, usize::MAX, SourceFilter::AllEnabled).await.unwrap();
    assert!(similar.is_empty());
}
