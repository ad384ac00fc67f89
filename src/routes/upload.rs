//! Upload routes
//!
//! Accepts an EPUB as multipart field `upload`, stores it and queues a
//! cleaning job. The client polls the returned queue location.

use std::path::Path;

use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::db::{QueueRepository, QueueStatus};
use crate::error::{AppError, Result};
use crate::state::AppState;

/// Multipart field carrying the archive
pub const UPLOAD_FIELD: &str = "upload";

/// Room for multipart boundaries and headers on top of the file itself
const MULTIPART_OVERHEAD: usize = 64 * 1024;

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><title>Clean EPUB</title></head>
<body>
    <h1>Clean EPUB</h1>
    <p>Strip span and font tags from the pages of an EPUB.</p>
    <form action="/api/v1/clean" method="post" enctype="multipart/form-data">
        <input type="file" name="upload" accept=".epub"/>
        <input type="submit" value="Clean"/>
    </form>
</body>
</html>
"#;

#[derive(Debug, Serialize)]
pub struct QueuedResponse {
    pub id: i64,
    pub status: QueueStatus,
}

/// Create the upload router
pub fn router(max_upload_bytes: u64) -> Router<AppState> {
    let body_limit = usize::try_from(max_upload_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        .route("/", get(index))
        .route("/api/v1/clean", post(upload_epub))
        .layer(DefaultBodyLimit::max(body_limit))
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// Store an uploaded EPUB and queue it for cleaning
async fn upload_epub(State(state): State<AppState>, mut multipart: Multipart) -> Result<Response> {
    let storage = &state.config().storage;

    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(UPLOAD_FIELD) {
            tracing::debug!("Skipping multipart field {:?}", field.name());
            continue;
        }

        let file_name = field
            .file_name()
            .and_then(base_name)
            .ok_or_else(|| AppError::BadRequest("Upload has no file name".to_string()))?;

        if !has_epub_extension(&file_name) {
            tracing::warn!("Rejected upload {}: not an .epub file", file_name);
            return Err(AppError::BadRequest("File not allowed".to_string()));
        }

        let stored_name = format!("{}_{}", Uuid::new_v4().simple(), file_name);
        let path = storage.upload_dir.join(&stored_name);

        let mut file = tokio::fs::File::create(&path).await?;
        let mut size: u64 = 0;
        let written: Result<()> = async {
            while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
                size += chunk.len() as u64;
                if size > storage.max_upload_bytes {
                    return Err(AppError::PayloadTooLarge(format!(
                        "Request entity too large (max: {} bytes)",
                        storage.max_upload_bytes
                    )));
                }
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            Ok(())
        }
        .await;

        if let Err(e) = written {
            drop(file);
            discard(&path).await;
            return Err(e);
        }

        let id = match QueueRepository::new(state.db()).add(&stored_name).await {
            Ok(id) => id,
            Err(e) => {
                discard(&path).await;
                return Err(e);
            }
        };

        tracing::info!(queue_id = id, size, "Queued {} as {}", file_name, stored_name);

        return Ok((
            StatusCode::ACCEPTED,
            [(header::LOCATION, format!("/api/v1/queue/{}", id))],
            Json(QueuedResponse {
                id,
                status: QueueStatus::Queued,
            }),
        )
            .into_response());
    }

    Err(AppError::BadRequest(format!(
        "No file provided. Use field name '{}'",
        UPLOAD_FIELD
    )))
}

fn multipart_error(e: MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge(e.body_text())
    } else {
        AppError::BadRequest(format!("Failed to read upload: {}", e.body_text()))
    }
}

/// Last path component of a client-supplied file name
fn base_name(name: &str) -> Option<String> {
    let name = name.rsplit(['/', '\\']).next()?.trim();
    if name.is_empty() || name == "." || name == ".." {
        None
    } else {
        Some(name.to_string())
    }
}

fn has_epub_extension(name: &str) -> bool {
    Path::new(name)
        .extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("epub"))
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::warn!("Failed to remove partial upload {}: {}", path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::build_router;
    use crate::test_support::{multipart_body, test_state, MULTIPART_BOUNDARY};
    use axum::body::Body;
    use axum::http::Request;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn upload_request(field: &str, file_name: &str, data: &[u8]) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/v1/clean")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", MULTIPART_BOUNDARY),
            )
            .body(Body::from(multipart_body(field, file_name, data)))
            .unwrap()
    }

    fn stored_uploads(state: &AppState) -> Vec<String> {
        std::fs::read_dir(&state.config().storage.upload_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    #[tokio::test]
    async fn test_upload_queues_job() {
        let temp = TempDir::new().unwrap();
        let state = test_state(&temp, 1024).await;
        let app = build_router(state.clone());

        let response = app
            .oneshot(upload_request("upload", "My Book.epub", b"PK fake archive"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let location = response.headers()[header::LOCATION].to_str().unwrap().to_string();
        let id: i64 = location
            .strip_prefix("/api/v1/queue/")
            .unwrap()
            .parse()
            .unwrap();

        let item = QueueRepository::new(state.db()).get(id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Queued);
        assert!(item.name.ends_with("_My Book.epub"));
        assert_eq!(stored_uploads(&state), vec![item.name.clone()]);
        assert_eq!(
            std::fs::read(state.config().storage.upload_dir.join(&item.name)).unwrap(),
            b"PK fake archive"
        );
    }

    #[tokio::test]
    async fn test_upload_rejects_wrong_extension() {
        let temp = TempDir::new().unwrap();
        let state = test_state(&temp, 1024).await;
        let app = build_router(state.clone());

        let response = app
            .oneshot(upload_request("upload", "notes.pdf", b"%PDF"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(stored_uploads(&state).is_empty());
        assert!(QueueRepository::new(state.db()).get(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upload_too_large() {
        let temp = TempDir::new().unwrap();
        let state = test_state(&temp, 1024).await;
        let app = build_router(state.clone());

        let response = app
            .oneshot(upload_request("upload", "big.epub", &vec![b'x'; 4096]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(stored_uploads(&state).is_empty());
        assert!(QueueRepository::new(state.db()).get(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upload_requires_field() {
        let temp = TempDir::new().unwrap();
        let state = test_state(&temp, 1024).await;
        let app = build_router(state);

        let response = app
            .oneshot(upload_request("file", "book.epub", b"data"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_index_form() {
        let temp = TempDir::new().unwrap();
        let app = build_router(test_state(&temp, 1024).await);

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let html = String::from_utf8(body.to_vec()).unwrap();
        assert!(html.contains(r#"name="upload""#));
        assert!(html.contains(r#"action="/api/v1/clean""#));
    }

    #[test]
    fn test_base_name() {
        assert_eq!(base_name("book.epub").as_deref(), Some("book.epub"));
        assert_eq!(base_name("../../etc/book.epub").as_deref(), Some("book.epub"));
        assert_eq!(base_name("C:\\Users\\me\\book.epub").as_deref(), Some("book.epub"));
        assert_eq!(base_name("dir/"), None);
        assert_eq!(base_name(".."), None);
    }

    #[test]
    fn test_epub_extension() {
        assert!(has_epub_extension("a.epub"));
        assert!(has_epub_extension("a.EPUB"));
        assert!(!has_epub_extension("a.epub.zip"));
        assert!(!has_epub_extension("epub"));
    }
}
