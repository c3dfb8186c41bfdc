use std::path::PathBuf;
use std::sync::Arc;

use crate::cache::CacheService;
use crate::listing::Listings;
use crate::search::{LiveSearch, QueryRouter};

/// 应用状态
pub struct AppState {
    /// 查询路由
    pub router: Arc<QueryRouter>,
    /// 交互式搜索会话
    pub live: LiveSearch,
    /// 列表、随机推荐与精选
    pub listings: Listings,
    /// 向量索引文件路径，重新加载时使用
    pub index_path: PathBuf,
    /// 向量维度
    pub dimension: usize,
    /// 鉴权 token
    pub token: String,
}

impl AppState {
    /// 创建新的应用状态
    pub fn new(
        router: QueryRouter,
        cache: Arc<CacheService>,
        index_path: PathBuf,
        dimension: usize,
        token: String,
    ) -> Arc<Self> {
        let router = Arc::new(router);
        let listings = Listings::new(router.db().clone(), cache);
        Arc::new(AppState {
            live: LiveSearch::new(router.clone()),
            router,
            listings,
            index_path,
            dimension,
            token,
        })
    }
}
