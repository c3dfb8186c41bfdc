//! 按主色调搜索
//!
//! 藏品数量在十万级以内，全表扫描后排序即可，不需要额外的索引结构。

use super::{SearchHit, hydrate};
use crate::db::{Database, SourceFilter, crud};
use crate::error::Result;
use crate::similarity::manhattan_rgb;

/// RGB 空间中可能的最大曼哈顿距离
const MAX_DISTANCE: f32 = 765.0;

const LEXICON: &[(&str, [u8; 3])] = &[
    ("red", [200, 30, 30]),
    ("orange", [230, 130, 30]),
    ("yellow", [230, 210, 50]),
    ("green", [50, 140, 60]),
    ("blue", [40, 70, 180]),
    ("purple", [120, 50, 140]),
    ("pink", [230, 150, 170]),
    ("brown", [120, 80, 40]),
    ("black", [20, 20, 20]),
    ("white", [240, 240, 235]),
    ("gray", [128, 128, 128]),
    ("grey", [128, 128, 128]),
    ("gold", [200, 160, 50]),
];

/// 整个查询是否为颜色词，大小写不敏感
pub fn lookup(query: &str) -> Option<[u8; 3]> {
    let query = query.trim().to_lowercase();
    LEXICON.iter().find(|(name, _)| *name == query).map(|(_, rgb)| *rgb)
}

/// 距离映射到 [-1, 1]，距离为 0 时为 1
fn score(distance: u32) -> f32 {
    1.0 - 2.0 * distance as f32 / MAX_DISTANCE
}

/// 按与目标颜色的曼哈顿距离升序排列，距离相同时按 ID 升序
pub fn rank(target: [u8; 3], candidates: impl IntoIterator<Item = (i64, [u8; 3])>) -> Vec<(i64, u32)> {
    let mut ranked = candidates
        .into_iter()
        .map(|(id, rgb)| (id, manhattan_rgb(target, rgb)))
        .collect::<Vec<_>>();
    ranked.sort_unstable_by_key(|&(id, distance)| (distance, id));
    ranked
}

pub async fn color_search(
    db: &Database,
    target: [u8; 3],
    limit: usize,
    offset: usize,
    filter: SourceFilter,
) -> Result<Vec<SearchHit>> {
    let candidates = crud::color_candidates(db, filter).await?;
    let ranked = rank(
        target,
        candidates.into_iter().map(|row| {
            let rgb = [row.color_r, row.color_g, row.color_b].map(|c| c.clamp(0, 255) as u8);
            (row.id, rgb)
        }),
    );
    let page = ranked
        .into_iter()
        .skip(offset)
        .take(limit)
        .map(|(id, distance)| (id, score(distance)))
        .collect::<Vec<_>>();
    hydrate(db, &page).await
}
