use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// 藏品记录，导入时使用
///
/// ID 在所有来源之间唯一，由上游导入流程保证。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtworkRecord {
    pub id: i64,
    pub source_id: i64,
    pub title: String,
    #[serde(default)]
    pub artists: Vec<String>,
    pub year_start: Option<i64>,
    pub year_end: Option<i64>,
    /// 主色调 RGB
    pub color: Option<[u8; 3]>,
    pub technique: Option<String>,
    pub image_url: Option<String>,
}

/// 返回给调用方的藏品信息
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Artwork {
    pub id: i64,
    pub source_id: i64,
    pub title: String,
    pub artists: Vec<String>,
    pub year_start: Option<i64>,
    pub year_end: Option<i64>,
    #[schema(value_type = Option<Vec<u8>>)]
    pub color: Option<[u8; 3]>,
    pub technique: Option<String>,
    pub image_url: Option<String>,
    /// 裁剪焦点，坐标范围为 [0, 1]，尚未计算时为空
    #[schema(value_type = Option<Vec<f32>>)]
    pub focal_point: Option<(f32, f32)>,
}

/// `artwork` 表联合 `embedding` 焦点的查询投影
#[derive(Debug, sqlx::FromRow)]
pub struct ArtworkRow {
    pub id: i64,
    pub source_id: i64,
    pub title: String,
    pub artists: String,
    pub year_start: Option<i64>,
    pub year_end: Option<i64>,
    pub color_r: Option<i64>,
    pub color_g: Option<i64>,
    pub color_b: Option<i64>,
    pub technique: Option<String>,
    pub image_url: Option<String>,
    pub focal_x: Option<f64>,
    pub focal_y: Option<f64>,
}

impl From<ArtworkRow> for Artwork {
    fn from(row: ArtworkRow) -> Self {
        let color = match (row.color_r, row.color_g, row.color_b) {
            (Some(r), Some(g), Some(b)) => Some([r as u8, g as u8, b as u8]),
            _ => None,
        };
        let focal_point = match (row.focal_x, row.focal_y) {
            (Some(x), Some(y)) => Some((x as f32, y as f32)),
            _ => None,
        };
        Self {
            id: row.id,
            source_id: row.source_id,
            title: row.title,
            artists: serde_json::from_str(&row.artists).unwrap_or_default(),
            year_start: row.year_start,
            year_end: row.year_end,
            color,
            technique: row.technique,
            image_url: row.image_url,
            focal_point,
        }
    }
}

/// 颜色搜索的全表扫描投影
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ColorRow {
    pub id: i64,
    pub color_r: i64,
    pub color_g: i64,
    pub color_b: i64,
}

/// 全文搜索命中，`relevance` 为 bm25 值，越小越相关
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FtsRow {
    pub id: i64,
    pub relevance: f64,
}

/// 向量索引内部 ID 对应的藏品
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct NeighborRow {
    pub row_id: i64,
    pub artwork_id: i64,
    pub source_id: i64,
}

/// 等待计算向量的藏品
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PendingRow {
    pub id: i64,
    pub image_url: String,
}

/// 已存储的向量
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EmbeddingRow {
    pub artwork_id: i64,
    pub vector: Vec<u8>,
}

impl EmbeddingRow {
    pub fn to_vec(&self) -> Vec<f32> {
        bytemuck::pod_collect_to_vec(&self.vector)
    }
}

/// 与向量索引的 key 关联的向量
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct IndexedEmbeddingRow {
    pub row_id: i64,
    pub vector: Vec<u8>,
}

/// 计算完成、等待提交的向量
#[derive(Debug, Clone)]
pub struct NewEmbedding {
    pub artwork_id: i64,
    pub vector: Vec<f32>,
    pub focal_point: (f32, f32),
}

/// 数据库统计
#[derive(Debug, Clone, Copy, Default, Serialize, sqlx::FromRow)]
pub struct Counts {
    pub artworks: i64,
    pub embeddings: i64,
    pub broken: i64,
}

/// 随机推荐的属性过滤条件
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Deserialize)]
pub struct RandomFilter {
    pub source: Option<i64>,
    pub technique: Option<String>,
    pub year_from: Option<i64>,
    pub year_to: Option<i64>,
}

/// 来源过滤条件
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceFilter {
    /// 所有启用的来源
    #[default]
    AllEnabled,
    /// 仅限单个来源，不论是否启用
    Only(i64),
}

impl SourceFilter {
    pub fn from_option(source: Option<i64>) -> Self {
        source.map_or(Self::AllEnabled, Self::Only)
    }
}
