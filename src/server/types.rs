use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::db::RandomFilter;
use crate::search::Routed;

/// 单页最多返回的数量
pub const MAX_PAGE_SIZE: usize = 100;

fn default_limit() -> usize {
    24
}

fn default_count() -> usize {
    12
}

/// 相似藏品查询参数
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SimilarQuery {
    #[serde(default = "default_limit")]
    #[param(default = 24)]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
    /// 仅返回该来源的藏品
    pub source: Option<i64>,
}

/// 列表查询参数，`cursor` 和 `offset` 只能二选一
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListQuery {
    pub source: Option<i64>,
    /// 游标模式：返回 ID 大于该值的藏品
    pub cursor: Option<i64>,
    /// 偏移模式：跳过的数量
    pub offset: Option<usize>,
    #[serde(default = "default_limit")]
    #[param(default = 24)]
    pub limit: usize,
}

/// 随机推荐查询参数
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct RandomQuery {
    pub source: Option<i64>,
    /// 技法，大小写不敏感
    pub technique: Option<String>,
    /// 创作年代下限，与藏品年代区间有重叠即可
    pub year_from: Option<i64>,
    pub year_to: Option<i64>,
    #[serde(default = "default_count")]
    #[param(default = 12)]
    pub count: usize,
}

impl RandomQuery {
    pub fn filter(&self) -> RandomFilter {
        RandomFilter {
            source: self.source,
            technique: self.technique.clone(),
            year_from: self.year_from,
            year_to: self.year_to,
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct FeaturedQuery {
    #[serde(default = "default_count")]
    #[param(default = 12)]
    pub count: usize,
}

/// 交互式搜索的响应
#[derive(Debug, Serialize, ToSchema)]
pub struct LiveResponse {
    /// 查询已被同一会话中更新的查询取代，此时没有结果
    pub superseded: bool,
    pub result: Option<Routed>,
}

/// 重新加载索引的响应
#[derive(Debug, Serialize, ToSchema)]
pub struct ReloadResponse {
    /// 索引中的向量数量
    pub size: usize,
    /// 加载耗时，单位为毫秒
    pub time: u32,
}
