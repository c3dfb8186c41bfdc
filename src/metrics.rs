use std::sync::LazyLock;

use prometheus::*;

static METRIC_SEARCH_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!("artsearch_search_total", "count of routed search queries", &["mode"])
        .unwrap()
});

static METRIC_SEARCH_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "artsearch_search_duration",
        "duration of the per-query search in seconds",
        &["mode"]
    )
    .unwrap()
});

static METRIC_KNN_ATTEMPTS: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!(
        "artsearch_knn_attempts",
        "vector index queries needed per semantic search",
        vec![1.0, 2.0, 3.0, 4.0]
    )
    .unwrap()
});

static METRIC_PIPELINE_ITEMS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "artsearch_pipeline_items_total",
        "artworks processed by the embedding pipeline",
        &["outcome"]
    )
    .unwrap()
});

static METRIC_CACHE: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!("artsearch_cache_total", "cache lookups", &["cache", "outcome"])
        .unwrap()
});

/// 记录一次搜索及其耗时
pub fn observe_search(mode: &str, duration: f32) {
    METRIC_SEARCH_COUNT.with_label_values(&[mode]).inc();
    METRIC_SEARCH_DURATION.with_label_values(&[mode]).observe(duration as f64);
}

/// 记录一次语义搜索查询向量索引的次数
pub fn observe_knn_attempts(attempts: usize) {
    METRIC_KNN_ATTEMPTS.observe(attempts as f64);
}

pub fn inc_pipeline(outcome: &str, n: u64) {
    METRIC_PIPELINE_ITEMS.with_label_values(&[outcome]).inc_by(n);
}

pub fn inc_cache(cache: &str, outcome: &str) {
    METRIC_CACHE.with_label_values(&[cache, outcome]).inc();
}

/// 以文本格式导出所有指标
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    encoder.encode_to_string(&prometheus::gather()).unwrap_or_default()
}
