//! # Repository Handlers
//!
//! Cached repository metadata and the default-branch lookup used by the
//! code audit job.

use axum::{
    extract::{Path, State},
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::ApiError;
use crate::models::RepoSnapshot;
use crate::server::AppState;

/// Default branch lookup response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DefaultBranchResponse {
    /// Repository identifier
    #[schema(example = "tokio-rs/tokio")]
    pub repo: String,
    /// Last known default branch, `main` before the first successful fetch
    #[schema(example = "master")]
    pub default_branch: String,
}

/// List cached repository metadata in configured order
#[utoipa::path(
    get,
    path = "/api/repos",
    responses(
        (status = 200, description = "Cached repositories with freshness timestamps", body = [RepoSnapshot])
    ),
    tag = "repos"
)]
pub async fn list_repos(State(state): State<AppState>) -> Json<Vec<RepoSnapshot>> {
    Json(state.store.repo_snapshots(&state.config.repos))
}

/// Last known default branch of a configured repository
#[utoipa::path(
    get,
    path = "/api/repos/{owner}/{name}/default-branch",
    params(
        ("owner" = String, Path, description = "Repository owner"),
        ("name" = String, Path, description = "Repository name")
    ),
    responses(
        (status = 200, description = "Default branch", body = DefaultBranchResponse),
        (status = 404, description = "Repository is not monitored", body = ApiError)
    ),
    tag = "repos"
)]
pub async fn get_default_branch(
    State(state): State<AppState>,
    Path((owner, name)): Path<(String, String)>,
) -> Result<Json<DefaultBranchResponse>, ApiError> {
    let repo_id = format!("{}/{}", owner, name);
    if !state.config.repos.iter().any(|repo| repo.id == repo_id) {
        return Err(ApiError::not_found(format!(
            "Repository {} is not monitored",
            repo_id
        )));
    }

    Ok(Json(DefaultBranchResponse {
        default_branch: state.store.default_branch(&repo_id),
        repo: repo_id,
    }))
}
