//! # Server Configuration
//!
//! Router and listener for the read-only API.

use std::sync::Arc;

use axum::{Router, routing::get};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::AppConfig;
use crate::handlers;
use crate::store::Store;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<Store>,
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/api/repos", get(handlers::list_repos))
        .route(
            "/api/repos/{owner}/{name}/default-branch",
            get(handlers::get_default_branch),
        )
        .route("/api/feed", get(handlers::get_feed))
        .route("/api/rate-limit", get(handlers::get_rate_limit))
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
}

/// Serve the API until `shutdown` fires.
pub async fn run_server(state: AppState, shutdown: CancellationToken) -> std::io::Result<()> {
    let addr = state.config.bind_addr().map_err(|err| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("Invalid server address: {}", err),
        )
    })?;
    let profile = state.config.profile.clone();
    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, %profile, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::repos::list_repos,
        crate::handlers::repos::get_default_branch,
        crate::handlers::feed::get_feed,
        crate::handlers::feed::get_rate_limit,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::models::RepoInfo,
            crate::models::RepoSnapshot,
            crate::models::FeedItem,
            crate::models::FeedKind,
            crate::models::CommitStat,
            crate::models::RateBudget,
            crate::handlers::repos::DefaultBranchResponse,
            crate::error::ApiError,
        )
    ),
    tags(
        (name = "root", description = "Service information"),
        (name = "repos", description = "Cached repository metadata"),
        (name = "feed", description = "Aggregated activity feed"),
    ),
    info(
        title = "repofeed API",
        description = "Read-only views over the polled GitHub activity cache",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
