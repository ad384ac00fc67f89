//! Queue status routes

use axum::{
    extract::{Path, State},
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;

use crate::db::{QueueRepository, QueueStatus};
use crate::error::{AppError, Result};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: QueueStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Create the queue router
pub fn router() -> Router<AppState> {
    Router::new().route("/:id", get(get_status))
}

/// Report a job's status, or redirect to the cleaned file once it is done
async fn get_status(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Response> {
    let item = QueueRepository::new(state.db())
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Queue item not found: {}", id)))?;

    if item.status == QueueStatus::Done {
        let location = format!("/api/v1/cleaned/{}", urlencoding::encode(&item.name));
        return Ok(Redirect::to(&location).into_response());
    }

    Ok(Json(StatusResponse {
        status: item.status,
        error: item.error,
    })
    .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::build_router;
    use crate::test_support::test_state;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn status_request(id: i64) -> Request<Body> {
        Request::builder()
            .uri(format!("/api/v1/queue/{}", id))
            .body(Body::empty())
            .unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_pending_status() {
        let temp = TempDir::new().unwrap();
        let state = test_state(&temp, 1024).await;
        let repo = QueueRepository::new(state.db());
        let id = repo.add("abc_book.epub").await.unwrap();

        let response = build_router(state.clone()).oneshot(status_request(id)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, serde_json::json!({ "status": "Queued" }));

        repo.claim_next().await.unwrap();
        let response = build_router(state.clone()).oneshot(status_request(id)).await.unwrap();
        assert_eq!(json_body(response).await, serde_json::json!({ "status": "In Progress" }));
    }

    #[tokio::test]
    async fn test_done_redirects_to_cleaned_file() {
        let temp = TempDir::new().unwrap();
        let state = test_state(&temp, 1024).await;
        let repo = QueueRepository::new(state.db());
        let id = repo.add("abc_My Book.epub").await.unwrap();
        repo.mark_done(id).await.unwrap();

        let response = build_router(state.clone()).oneshot(status_request(id)).await.unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            response.headers()[header::LOCATION],
            "/api/v1/cleaned/abc_My%20Book.epub"
        );
    }

    #[tokio::test]
    async fn test_failed_status_carries_error() {
        let temp = TempDir::new().unwrap();
        let state = test_state(&temp, 1024).await;
        let repo = QueueRepository::new(state.db());
        let id = repo.add("abc_bad.epub").await.unwrap();
        repo.mark_failed(id, "extract stage failed").await.unwrap();

        let response = build_router(state.clone()).oneshot(status_request(id)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            serde_json::json!({ "status": "Failed", "error": "extract stage failed" })
        );
    }

    #[tokio::test]
    async fn test_unknown_id() {
        let temp = TempDir::new().unwrap();
        let state = test_state(&temp, 1024).await;

        let response = build_router(state).oneshot(status_request(42)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
