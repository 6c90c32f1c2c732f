//! Health & readiness handlers.
//!
//! - GET /         -> plain banner
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks the metadata store and blob I/O

use crate::{services::blob_store::Acl, state::AppState};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::{collections::HashMap, io::Cursor};
use tokio::io::AsyncReadExt;
use uuid::Uuid;

const PROBE_BYTES: &[u8] = b"readyz";

/// `GET /`
pub async fn index() -> &'static str {
    "Image repository API. Browse /api/images and /api/users."
}

/// `GET /healthz`
///
/// Liveness probe. Always returns 200 OK with a plain JSON body.
/// This endpoint should be cheap and never perform I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Readiness probe that:
/// 1. Pings the metadata store.
/// 2. Writes, reads back and deletes a private probe blob.
///
/// Returns JSON describing each check. HTTP 200 when all checks pass,
/// HTTP 503 when any check fails.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    // 1) Metadata store check
    let metadata_check = match state.assets.metadata().ping().await {
        Ok(()) => (true, None::<String>),
        Err(e) => (false, Some(format!("error: {}", e))),
    };

    // 2) Blob write/read/delete check
    let blob_check = probe_blob_store(&state).await;

    let overall_ok = metadata_check.0 && blob_check.0;

    let mut checks = HashMap::new();
    checks.insert(
        "metadata",
        CheckStatus {
            ok: metadata_check.0,
            error: metadata_check.1,
        },
    );
    checks.insert(
        "blobs",
        CheckStatus {
            ok: blob_check.0,
            error: blob_check.1,
        },
    );

    let body = ReadyResponse {
        status: if overall_ok {
            "ok".into()
        } else {
            "error".into()
        },
        checks,
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

async fn probe_blob_store(state: &AppState) -> (bool, Option<String>) {
    let blobs = state.assets.blobs();
    let key = format!(".readyz/{}", Uuid::new_v4());

    if let Err(e) = blobs
        .put(&key, Box::new(Cursor::new(PROBE_BYTES)), Acl::Private)
        .await
    {
        return (false, Some(format!("could not write probe blob: {}", e)));
    }

    let read_back = match blobs.get(&key).await {
        Ok(mut reader) => {
            let mut buf = Vec::new();
            reader.read_to_end(&mut buf).await.map(|_| buf)
        }
        Err(e) => {
            let _ = blobs.delete(&key).await; // best-effort cleanup
            return (false, Some(format!("could not read probe blob: {}", e)));
        }
    };

    let cleanup = blobs.delete(&key).await;
    match (read_back, cleanup) {
        (Ok(bytes), _) if bytes != PROBE_BYTES => (false, Some("probe content mismatch".into())),
        (Ok(_), Ok(_)) => (true, None),
        (Ok(_), Err(e)) => (true, Some(format!("could not remove probe blob: {}", e))),
        (Err(e), _) => (false, Some(format!("could not read probe blob: {}", e))),
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}
