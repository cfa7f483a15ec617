use crate::application::services::repo_metadata::RepoMetadataQuery;
use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

// Structure to hold application state (AppState)
#[derive(Clone)]
pub struct AppState {
    pub query: Arc<dyn RepoMetadataQuery + Send + Sync>,
}

/// Encodes `data` as a JSON response, or as an `{"error": ..}` envelope with
/// status 500 when encoding fails.
fn json_response<T: Serialize>(data: &T) -> Response {
    match serde_json::to_vec(data) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Failed to serialize response: {:?}", e);
            json_error(&e)
        }
    }
}

fn json_error(err: &dyn std::error::Error) -> Response {
    let body = serde_json::json!({ "error": err.to_string() });
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

#[tracing::instrument(name = "all_repos", skip(state))]
async fn all_repos(State(state): State<Arc<AppState>>) -> Response {
    json_response(&state.query.all_repos())
}

#[tracing::instrument(name = "travis_repos", skip(state))]
async fn travis_repos(State(state): State<Arc<AppState>>) -> Response {
    json_response(&state.query.travis_repos())
}

#[tracing::instrument(name = "health_check")]
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

pub fn create_router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/all", get(all_repos))
        .route("/v1/travis", get(travis_repos))
        .route("/v1/healthcheck", get(health_check))
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
}
