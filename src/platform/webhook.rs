//! HTTP surface: health check and media archive in every mode, plus the
//! webhook endpoint the platform pushes updates to in webhook mode.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, DefaultBodyLimit, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use teloxide::types::Update;
use tracing::{debug, error, info, warn};

use super::telegram::{decode_update, BotIdentity};
use crate::dispatcher::Dispatcher;
use crate::media::{ArchiveOutcome, MediaStore};

pub const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

pub const DEFAULT_WEBHOOK_PATH: &str = "/webhook";

/// Largest update body accepted; Telegram updates are a few KB.
const MAX_UPDATE_BYTES: usize = 1024 * 1024;

const MEDIA_PAGE: &str = r#"<!DOCTYPE html>
<html>
    <head><title>Media archive</title></head>
    <body>
        <h1>Download all uploaded media</h1>
        <p><a href="/media/download">Download archive</a></p>
    </body>
</html>
"#;

#[derive(Clone)]
pub struct WebhookState {
    pub dispatcher: Arc<Dispatcher>,
    pub secret: Option<String>,
    pub identity: Arc<BotIdentity>,
}

/// Build the router. `webhook` is `Some((path, state))` in webhook mode only.
pub fn router(webhook: Option<(&str, WebhookState)>, media: MediaStore) -> Router {
    let app = Router::new()
        .route("/", get(healthcheck))
        .merge(
            Router::new()
                .route("/media", get(media_page))
                .route("/media/download", get(download_media))
                .with_state(media),
        );

    match webhook {
        Some((path, state)) => {
            let path = normalize_path(path);
            info!("Accepting webhook updates on POST {}", path);
            app.route(
                &path,
                post(receive_update)
                    .layer(DefaultBodyLimit::max(MAX_UPDATE_BYTES))
                    .with_state(state),
            )
        }
        None => app,
    }
}

/// Route paths must start with `/`; an empty path falls back to the default.
pub fn normalize_path(path: &str) -> String {
    let path = path.trim();
    if path.is_empty() || path == "/" {
        DEFAULT_WEBHOOK_PATH.to_string()
    } else if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

/// Serve `app` until `shutdown` resolves.
pub async fn serve<F>(addr: &str, app: Router, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;
    info!("HTTP server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error")
}

async fn healthcheck() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn media_page() -> Html<&'static str> {
    Html(MEDIA_PAGE)
}

/// Zip the whole media tree, then delete what went into the archive.
async fn download_media(State(media): State<MediaStore>) -> Response {
    let built = tokio::task::spawn_blocking(move || {
        let outcome = media.archive()?;
        if let ArchiveOutcome::Ready(archive) = &outcome {
            media.remove_archived(archive);
        }
        anyhow::Ok(outcome)
    })
    .await;

    let archive = match built {
        Ok(Ok(ArchiveOutcome::Ready(archive))) => archive,
        Ok(Ok(ArchiveOutcome::Missing)) => {
            return Json(json!({ "error": "No media available" })).into_response()
        }
        Ok(Ok(ArchiveOutcome::Empty)) => {
            return Json(json!({ "error": "No media files found" })).into_response()
        }
        Ok(Err(e)) => {
            error!("Failed to build media archive: {:#}", e);
            return archive_failed();
        }
        Err(e) => {
            error!("Media archive task failed: {}", e);
            return archive_failed();
        }
    };

    let filename = format!("media_{}.zip", chrono::Utc::now().format("%Y%m%d%H%M%S"));
    info!("Serving {} ({} files)", filename, archive.files.len());
    (
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename={}", filename),
            ),
        ],
        archive.bytes,
    )
        .into_response()
}

fn archive_failed() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "Failed to build media archive" })),
    )
        .into_response()
}

/// Always answers 200; the body says whether the update was accepted.
async fn receive_update(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Json<Value> {
    let ok = match body {
        Ok(body) => handle_update(&state, &headers, &body).await,
        Err(rejection) => {
            warn!("Unreadable webhook body: {}", rejection);
            false
        }
    };
    Json(json!({ "ok": ok }))
}

async fn handle_update(state: &WebhookState, headers: &HeaderMap, body: &[u8]) -> bool {
    if let Some(expected) = &state.secret {
        let provided = headers
            .get(SECRET_HEADER)
            .map(|v| v.as_bytes())
            .unwrap_or_default();
        if !secrets_match(provided, expected.as_bytes()) {
            warn!("Rejected webhook request with a bad secret token");
            return false;
        }
    }

    let update: Update = match serde_json::from_slice(body) {
        Ok(u) => u,
        Err(e) => {
            warn!("Malformed webhook body: {}", e);
            return false;
        }
    };

    let update_id = update.id.0;
    match decode_update(update, state.identity.username()) {
        Some(event) => {
            state.dispatcher.dispatch(event).await;
        }
        None => debug!("Update {} carries nothing we handle", update_id),
    }
    true
}

/// Compares every byte so the response time does not reveal the length of
/// the matching prefix.
fn secrets_match(provided: &[u8], expected: &[u8]) -> bool {
    if provided.len() != expected.len() {
        return false;
    }
    provided
        .iter()
        .zip(expected)
        .fold(0u8, |diff, (a, b)| diff | (a ^ b))
        == 0
}
