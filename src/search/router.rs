use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, warn};
use serde::Deserialize;
use tokio::time::timeout;
use utoipa::IntoParams;

use super::color::{color_search, lookup};
use super::semantic::{knn_hits, semantic_search};
use super::text::text_search;
use super::{Routed, SearchHit, SearchMode, hydrate};
use crate::cache::{CacheService, EmbeddingSet};
use crate::config::SearchOptions;
use crate::db::{Database, SourceFilter, crud};
use crate::encoder::Encoder;
use crate::error::{Error, Result};
use crate::index::SharedIndex;
use crate::listing::seeded_sample;
use crate::metrics;

fn default_limit() -> usize {
    24
}

/// 一次搜索请求
#[derive(Debug, Clone, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SearchQuery {
    /// 查询文本
    #[serde(default, rename = "q")]
    pub text: String,
    #[serde(default = "default_limit")]
    #[param(default = 24)]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
    /// 仅搜索该来源，为空时搜索所有启用的来源
    pub source: Option<i64>,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), limit: default_limit(), offset: 0, source: None }
    }

    pub fn with_page(mut self, limit: usize, offset: usize) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }

    pub fn with_source(mut self, source: Option<i64>) -> Self {
        self.source = source;
        self
    }
}

/// 去掉控制字符和首尾空白，并限制最大字符数
pub fn sanitize(text: &str, max_len: usize) -> String {
    let cleaned = text.chars().filter(|c| !c.is_control()).collect::<String>();
    cleaned.trim().chars().take(max_len).collect::<String>().trim_end().to_string()
}

/// 查询路由，按 颜色 → 语义 → 全文 → 子串 的顺序逐级降级
pub struct QueryRouter {
    db: Database,
    index: SharedIndex,
    encoder: Arc<dyn Encoder>,
    cache: Arc<CacheService>,
    opts: SearchOptions,
}

impl QueryRouter {
    pub fn new(
        db: Database,
        index: SharedIndex,
        encoder: Arc<dyn Encoder>,
        cache: Arc<CacheService>,
        opts: SearchOptions,
    ) -> Self {
        Self { db, index, encoder, cache, opts }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn index(&self) -> &SharedIndex {
        &self.index
    }

    /// 搜索并记录耗时
    pub async fn search(&self, query: &SearchQuery) -> Result<Routed> {
        let start = Instant::now();
        let routed = self.route(query).await?;
        let elapsed = start.elapsed().as_secs_f32();
        metrics::observe_search(routed.mode.as_str(), elapsed);
        info!(
            "搜索 {:?}: 模式 = {}, 结果 = {}, 耗时 = {:.3}s",
            query.text,
            routed.mode.as_str(),
            routed.hits.len(),
            elapsed
        );
        Ok(routed)
    }

    /// 只有存储层本身不可用时才返回错误，其余失败都会降级处理
    pub async fn route(&self, query: &SearchQuery) -> Result<Routed> {
        let text = sanitize(&query.text, self.opts.max_query_len);
        let filter = SourceFilter::from_option(query.source);
        let (limit, offset) = (query.limit, query.offset);

        if text.is_empty() {
            return match query.source {
                None => Ok(Routed::new(SearchMode::Empty, vec![])),
                Some(source_id) => {
                    let hits = self.browse(source_id, limit, offset).await?;
                    Ok(Routed::new(SearchMode::Browse, hits))
                }
            };
        }

        if let Some(rgb) = lookup(&text) {
            debug!("颜色查询: {text} -> {rgb:?}");
            let hits = color_search(&self.db, rgb, limit, offset, filter).await?;
            return Ok(Routed::new(SearchMode::Color, hits));
        }

        let semantic = semantic_search(
            &self.db,
            &self.index,
            self.encoder.as_ref(),
            &text,
            limit,
            offset,
            filter,
        );
        match timeout(self.opts.semantic_timeout(), semantic).await {
            Ok(Ok(hits)) if !hits.is_empty() => return Ok(Routed::new(SearchMode::Semantic, hits)),
            Ok(Ok(_)) => debug!("语义搜索没有结果，回退到全文搜索"),
            Ok(Err(e)) => warn!("语义搜索失败，回退到全文搜索: {e}"),
            Err(_) => warn!("语义搜索超时，回退到全文搜索"),
        }

        let (mode, hits) = text_search(&self.db, &text, limit, offset, filter).await?;
        Ok(Routed::new(mode, hits))
    }

    /// 以某件藏品已保存的向量做近邻搜索，结果不包含该藏品本身
    pub async fn similar(
        &self,
        artwork_id: i64,
        limit: usize,
        offset: usize,
        filter: SourceFilter,
    ) -> Result<Vec<SearchHit>> {
        let embeddings = self.embeddings().await?;
        let query = embeddings
            .get(&artwork_id)
            .ok_or_else(|| Error::NotFound(format!("藏品 {artwork_id} 没有向量")))?;
        let index = self.index.read().await;
        knn_hits(&self.db, index.as_ref(), query, limit, offset, filter, Some(artwork_id)).await
    }

    /// 空查询但指定了来源时，按固定种子打乱该来源的藏品
    pub async fn browse(&self, source_id: i64, limit: usize, offset: usize) -> Result<Vec<SearchHit>> {
        let ids = crud::source_ids(&self.db, source_id).await?;
        let picked = seeded_sample(ids, source_id as u64, offset, limit);
        let ranked = picked.into_iter().map(|id| (id, 0.0)).collect::<Vec<_>>();
        hydrate(&self.db, &ranked).await
    }

    /// 向量工作集，填充时扫描整个向量表
    async fn embeddings(&self) -> Result<Arc<EmbeddingSet>> {
        self.cache
            .embeddings
            .get_or_try_init((), || async {
                let rows = crud::all_embeddings(&self.db).await?;
                info!("已加载 {} 条向量到工作集", rows.len());
                let set = rows.into_iter().map(|row| (row.artwork_id, row.to_vec())).collect::<EmbeddingSet>();
                Ok(Arc::new(set))
            })
            .await
    }
}
