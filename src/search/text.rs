//! 全文搜索与子串匹配

use log::warn;

use super::{SearchHit, SearchMode, hydrate};
use crate::db::{Database, SourceFilter, crud};
use crate::error::Result;

/// 将查询拆分为字母数字词元，每个词元做前缀匹配，词元之间为 AND
///
/// 没有有效词元时返回 `None`
pub fn match_expression(query: &str) -> Option<String> {
    let tokens = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"*", t.to_lowercase()))
        .collect::<Vec<_>>();
    (!tokens.is_empty()).then(|| tokens.join(" AND "))
}

/// bm25 越小越相关，取反后映射到 [0, 1)
fn score(bm25: f64) -> f32 {
    let s = (-bm25).max(0.0);
    (s / (1.0 + s)) as f32
}

pub async fn fulltext_search(
    db: &Database,
    query: &str,
    limit: usize,
    offset: usize,
    filter: SourceFilter,
) -> Result<Vec<SearchHit>> {
    let Some(expr) = match_expression(query) else {
        return Ok(vec![]);
    };
    let rows = crud::fts_search(db, &expr, filter, limit, offset).await?;
    let ranked = rows.into_iter().map(|row| (row.id, score(row.relevance))).collect::<Vec<_>>();
    hydrate(db, &ranked).await
}

pub async fn substring_search(
    db: &Database,
    query: &str,
    limit: usize,
    offset: usize,
    filter: SourceFilter,
) -> Result<Vec<SearchHit>> {
    let artworks = crud::substring_search(db, query, filter, limit, offset).await?;
    Ok(artworks.into_iter().map(|artwork| SearchHit { artwork, score: 0.0 }).collect())
}

/// 先做全文搜索，全文索引出错时降级为子串匹配
pub async fn text_search(
    db: &Database,
    query: &str,
    limit: usize,
    offset: usize,
    filter: SourceFilter,
) -> Result<(SearchMode, Vec<SearchHit>)> {
    match fulltext_search(db, query, limit, offset, filter).await {
        Ok(hits) => Ok((SearchMode::FullText, hits)),
        Err(e) => {
            warn!("全文搜索失败，降级为子串匹配: {e}");
            let hits = substring_search(db, query, limit, offset, filter).await?;
            Ok((SearchMode::Substring, hits))
        }
    }
}
