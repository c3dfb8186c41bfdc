pub mod color;
pub mod live;
pub mod router;
pub mod semantic;
pub mod text;

use std::collections::HashMap;

use serde::Serialize;
use utoipa::ToSchema;

pub use self::live::{LiveOutcome, LiveSearch};
pub use self::router::{QueryRouter, SearchQuery};
use crate::db::{Artwork, Database, crud};
use crate::error::Result;

/// 实际使用的检索方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// 空查询且没有来源过滤
    Empty,
    /// 空查询但指定了来源，返回随机浏览结果
    Browse,
    Color,
    Semantic,
    FullText,
    Substring,
}

impl SearchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Browse => "browse",
            Self::Color => "color",
            Self::Semantic => "semantic",
            Self::FullText => "full_text",
            Self::Substring => "substring",
        }
    }
}

/// 一条搜索结果，`score` 归一化到 [-1, 1]，越大越相关
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct SearchHit {
    pub artwork: Artwork,
    pub score: f32,
}

/// 路由后的搜索结果
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Routed {
    pub mode: SearchMode,
    pub hits: Vec<SearchHit>,
}

impl Routed {
    pub fn new(mode: SearchMode, hits: Vec<SearchHit>) -> Self {
        Self { mode, hits }
    }
}

/// 将排好序的 `(藏品 ID, 分数)` 补全为搜索结果，保持传入的顺序
pub(crate) async fn hydrate(db: &Database, ranked: &[(i64, f32)]) -> Result<Vec<SearchHit>> {
    let ids = ranked.iter().map(|(id, _)| *id).collect::<Vec<_>>();
    let artworks = crud::get_artworks_ordered(db, &ids).await?;
    let scores = ranked.iter().copied().collect::<HashMap<_, _>>();
    Ok(artworks
        .into_iter()
        .map(|artwork| {
            let score = scores.get(&artwork.id).copied().unwrap_or(0.0);
            SearchHit { artwork, score }
        })
        .collect())
}
