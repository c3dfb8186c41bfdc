use std::sync::Arc;
use std::time::{Instant, SystemTime};

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum_auth::AuthBearer;
use log::info;

use super::error::{Result, Unauthorized};
use super::state::AppState;
use super::types::*;
use crate::db::{Artwork, SourceFilter};
use crate::index::{UsearchIndex, VectorIndex};
use crate::listing::{Page, PageRequest};
use crate::metrics;
use crate::search::{LiveOutcome, Routed, SearchHit, SearchQuery};

fn clamp_limit(limit: usize) -> usize {
    limit.clamp(1, MAX_PAGE_SIZE)
}

/// 搜索藏品
///
/// 颜色词走颜色搜索，其余查询先尝试语义搜索，失败或没有结果时回退到全文搜索
#[utoipa::path(
    get,
    path = "/search",
    params(SearchQuery),
    responses(
        (status = 200, body = Routed),
    )
)]
pub async fn search_handler(
    State(state): State<Arc<AppState>>,
    Query(mut query): Query<SearchQuery>,
) -> Result<Json<Routed>> {
    query.limit = clamp_limit(query.limit);
    let routed = state.router.search(&query).await?;
    Ok(Json(routed))
}

/// 与某件藏品相似的藏品
#[utoipa::path(
    get,
    path = "/similar/{id}",
    params(
        ("id" = i64, Path, description = "藏品 ID"),
        SimilarQuery,
    ),
    responses(
        (status = 200, body = Vec<SearchHit>),
        (status = 404, description = "藏品不存在或尚未计算向量"),
    )
)]
pub async fn similar_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(query): Query<SimilarQuery>,
) -> Result<Json<Vec<SearchHit>>> {
    let filter = SourceFilter::from_option(query.source);
    let hits = state.router.similar(id, clamp_limit(query.limit), query.offset, filter).await?;
    Ok(Json(hits))
}

/// 分页列出藏品
#[utoipa::path(
    get,
    path = "/artworks",
    params(ListQuery),
    responses(
        (status = 200, body = Page<Artwork>),
        (status = 400, description = "同时指定了 cursor 和 offset"),
    )
)]
pub async fn list_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Page<Artwork>>> {
    let page = PageRequest::from_query(query.cursor, query.offset)?;
    let filter = SourceFilter::from_option(query.source);
    let result = state.listings.list(filter, page, clamp_limit(query.limit)).await?;
    Ok(Json(result.as_ref().clone()))
}

/// 按条件随机推荐藏品，同一分钟内相同条件的结果相同
#[utoipa::path(
    get,
    path = "/random",
    params(RandomQuery),
    responses(
        (status = 200, body = Vec<Artwork>),
    )
)]
pub async fn random_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RandomQuery>,
) -> Result<Json<Vec<Artwork>>> {
    let picked =
        state.listings.random_pick(&query.filter(), clamp_limit(query.count), SystemTime::now()).await?;
    Ok(Json(picked))
}

/// 某个来源的精选推荐
#[utoipa::path(
    get,
    path = "/featured/{source}",
    params(
        ("source" = i64, Path, description = "来源 ID"),
        FeaturedQuery,
    ),
    responses(
        (status = 200, body = Vec<Artwork>),
    )
)]
pub async fn featured_handler(
    State(state): State<Arc<AppState>>,
    Path(source): Path<i64>,
    Query(query): Query<FeaturedQuery>,
) -> Result<Json<Vec<Artwork>>> {
    let featured = state.listings.featured(source, clamp_limit(query.count)).await?;
    Ok(Json(featured.as_ref().clone()))
}

/// 交互式搜索
///
/// 同一会话的新查询会取消上一次尚未完成的查询，被取消的请求返回 `superseded = true`
#[utoipa::path(
    get,
    path = "/live/{session}",
    params(
        ("session" = String, Path, description = "会话 ID"),
        SearchQuery,
    ),
    responses(
        (status = 200, body = LiveResponse),
    )
)]
pub async fn live_handler(
    State(state): State<Arc<AppState>>,
    Path(session): Path<String>,
    Query(mut query): Query<SearchQuery>,
) -> Result<Json<LiveResponse>> {
    query.limit = clamp_limit(query.limit);
    let response = match state.live.search(&session, query).await? {
        LiveOutcome::Completed(routed) => LiveResponse { superseded: false, result: Some(routed) },
        LiveOutcome::Superseded => LiveResponse { superseded: true, result: None },
    };
    Ok(Json(response))
}

/// 从磁盘重新加载向量索引，需要鉴权
#[utoipa::path(
    post,
    path = "/reload",
    responses(
        (status = 200, body = ReloadResponse),
        (status = 401, description = "token 错误"),
    ),
    security(("bearer" = []))
)]
pub async fn reload_handler(
    State(state): State<Arc<AppState>>,
    AuthBearer(token): AuthBearer,
) -> Result<Json<ReloadResponse>> {
    if token != state.token {
        return Err(Unauthorized.into());
    }

    let start = Instant::now();
    info!("正在重新加载向量索引");
    let index =
        UsearchIndex::load_or_rebuild(&state.index_path, state.router.db(), state.dimension).await?;
    let size = index.len();
    let index: Box<dyn VectorIndex> = Box::new(index);
    *state.router.index().write().await = index;
    let time = start.elapsed().as_millis() as u32;
    info!("向量索引已重新加载，共 {size} 条，耗时 {time}ms");

    Ok(Json(ReloadResponse { size, time }))
}

/// prometheus 指标
#[utoipa::path(
    get,
    path = "/metrics",
    responses(
        (status = 200, body = String, content_type = "text/plain"),
    )
)]
pub async fn metrics_handler() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], metrics::gather_text())
}
