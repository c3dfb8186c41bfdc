//! 自适应 KNN 语义搜索
//!
//! 向量索引不支持关系过滤，所以来源过滤只能在取回近邻之后在进程内完成。
//! 当过滤后的结果不够一页、并且索引可能还有更多近邻时，将 K 翻倍后重新查询。

use std::collections::{HashMap, HashSet};

use log::debug;

use super::{SearchHit, hydrate};
use crate::db::{Database, NeighborRow, SourceFilter, crud};
use crate::encoder::Encoder;
use crate::error::Result;
use crate::index::{SharedIndex, VectorIndex};
use crate::metrics;
use crate::similarity::{distance_to_similarity, l2_normalize};

/// 第一次查询的最小 K
pub const INITIAL_K: usize = 120;
/// K 的上限
// NOTE: 当来源过滤只命中不到约 3% 的藏品时，4 次查询、最多 5000 个近邻不一定能填满一页
pub const MAX_K: usize = 5000;
/// 最多查询向量索引的次数
pub const MAX_ATTEMPTS: usize = 4;

/// 第一次查询的 K，至少为所需数量的三倍
pub fn initial_k(needed: usize) -> usize {
    INITIAL_K.max(needed.saturating_mul(3)).min(MAX_K)
}

/// 下一次查询的 K，翻倍但不超过 [`MAX_K`]
pub fn next_k(k: usize) -> usize {
    k.saturating_mul(2).min(MAX_K)
}

/// 过滤后、按距离排序的近邻
#[derive(Debug, Clone)]
pub struct KnnOutcome {
    /// `(藏品 ID, 相似度)`
    pub ranked: Vec<(i64, f32)>,
    /// 实际查询向量索引的次数
    pub attempts: usize,
    /// 最后一次查询使用的 K
    pub k: usize,
}

/// 过滤条件在进程内的表示
struct Admission {
    filter: SourceFilter,
    enabled: HashSet<i64>,
    exclude: Option<i64>,
}

impl Admission {
    fn admits(&self, row: &NeighborRow) -> bool {
        if Some(row.artwork_id) == self.exclude {
            return false;
        }
        match self.filter {
            SourceFilter::AllEnabled => self.enabled.contains(&row.source_id),
            SourceFilter::Only(source_id) => row.source_id == source_id,
        }
    }
}

/// 查询至少 `needed` 个满足过滤条件的近邻
///
/// 查询次数不超过 [`MAX_ATTEMPTS`]，用尽后返回已找到的全部结果，不会报错。
/// 每次查询都依赖上一次的缺口，因此只能顺序执行。
pub async fn adaptive_knn(
    db: &Database,
    index: &dyn VectorIndex,
    query: &[f32],
    needed: usize,
    filter: SourceFilter,
    exclude: Option<i64>,
) -> Result<KnnOutcome> {
    let admission = Admission { filter, enabled: crud::enabled_sources(db).await?, exclude };

    let mut k = initial_k(needed);
    let mut attempts = 0;
    loop {
        attempts += 1;
        let neighbors = index.search(query, k)?;
        let raw = neighbors.len();

        let keys = neighbors.iter().map(|n| n.key as i64).collect::<Vec<_>>();
        let rows = crud::neighbors_for_rows(db, &keys)
            .await?
            .into_iter()
            .map(|row| (row.row_id, row))
            .collect::<HashMap<_, _>>();

        let ranked = neighbors
            .iter()
            .filter_map(|n| {
                let row = rows.get(&(n.key as i64))?;
                admission
                    .admits(row)
                    .then(|| (row.artwork_id, distance_to_similarity(n.distance)))
            })
            .collect::<Vec<_>>();

        debug!("KNN 第 {attempts} 次查询: k = {k}, 返回 {raw}, 过滤后 {}", ranked.len());

        // 索引返回的数量少于 k 说明已经没有更多近邻
        let exhausted = raw < k || k >= MAX_K || attempts >= MAX_ATTEMPTS;
        if ranked.len() >= needed || exhausted {
            metrics::observe_knn_attempts(attempts);
            return Ok(KnnOutcome { ranked, attempts, k });
        }
        k = next_k(k);
    }
}

/// 用查询向量做语义搜索，返回 `[offset, offset + limit)` 范围内的结果
///
/// 结果按近邻顺序排列，而不是藏品 ID 顺序
pub async fn knn_hits(
    db: &Database,
    index: &dyn VectorIndex,
    query: &[f32],
    limit: usize,
    offset: usize,
    filter: SourceFilter,
    exclude: Option<i64>,
) -> Result<Vec<SearchHit>> {
    if limit == 0 {
        return Ok(vec![]);
    }
    let outcome = adaptive_knn(db, index, query, offset.saturating_add(limit), filter, exclude).await?;
    let page = outcome.ranked.into_iter().skip(offset).take(limit).collect::<Vec<_>>();
    hydrate(db, &page).await
}

/// 将文本编码后做语义搜索
///
/// 编码器不可用时返回错误，由路由层回退到全文搜索。
/// 编码完成后才获取索引的读锁，重新加载索引不会等待编码器。
pub async fn semantic_search(
    db: &Database,
    index: &SharedIndex,
    encoder: &dyn Encoder,
    text: &str,
    limit: usize,
    offset: usize,
    filter: SourceFilter,
) -> Result<Vec<SearchHit>> {
    let mut query = encoder.encode_text(text).await?;
    l2_normalize(&mut query);
    let index = index.read().await;
    knn_hits(db, index.as_ref(), &query, limit, offset, filter, None).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_k() {
        assert_eq!(initial_k(0), 120);
        assert_eq!(initial_k(20), 120);
        assert_eq!(initial_k(100), 300);
        assert_eq!(initial_k(10_000), MAX_K);
    }

    #[test]
    fn test_next_k() {
        assert_eq!(next_k(120), 240);
        assert_eq!(next_k(480), 960);
        assert_eq!(next_k(3000), MAX_K);
        assert_eq!(next_k(MAX_K), MAX_K);
        assert_eq!(next_k(usize::MAX), MAX_K);
    }
}
