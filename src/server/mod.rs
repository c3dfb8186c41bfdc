mod api;
mod error;
mod state;
mod types;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use utoipa::openapi::security::{Http, HttpAuthScheme, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

pub use self::error::{AppError, Unauthorized};
pub use self::state::*;
pub use self::types::*;
use crate::db::Artwork;
use crate::listing::{Page, PageRequest};
use crate::search::{Routed, SearchHit, SearchMode};

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        api::search_handler,
        api::similar_handler,
        api::list_handler,
        api::random_handler,
        api::featured_handler,
        api::live_handler,
        api::reload_handler,
        api::metrics_handler,
    ),
    components(schemas(
        Artwork,
        SearchHit,
        SearchMode,
        Routed,
        PageRequest,
        Page<Artwork>,
        LiveResponse,
        ReloadResponse,
    )),
    modifiers(&BearerAuth)
)]
pub struct ApiDoc;

/// 构建API服务器
pub fn create_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/search", get(api::search_handler))
        .route("/similar/{id}", get(api::similar_handler))
        .route("/artworks", get(api::list_handler))
        .route("/random", get(api::random_handler))
        .route("/featured/{source}", get(api::featured_handler))
        .route("/live/{session}", get(api::live_handler))
        .route("/reload", post(api::reload_handler))
        .route("/metrics", get(api::metrics_handler))
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // 所有接口都不接受上传
        .layer(RequestBodyLimitLayer::new(64 * 1024))
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .with_state(state)
}
