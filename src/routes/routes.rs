//! Defines routes for the image repository API.
//!
//! ## Structure
//! - **Images**
//!   - `GET    /api/images` — list public images
//!   - `POST   /api/images/upload` — anonymous upload (multipart `photos`, up to 5)
//!   - `GET    /api/images/i/{file_id}` — image details
//!   - `DELETE /api/images/i/{file_id}` — delete image
//!   - `POST   /api/images/i/{file_id}/set_public` — change visibility
//!   - `GET    /api/images/i/{file_id}/download` — download a public image
//!
//! - **Users**
//!   - `GET    /api/users` — list users
//!   - `POST   /api/users/register` — create user
//!   - `GET    /api/users/u/{user_id}` — user details and their public images
//!   - `POST   /api/users/u/{user_id}/upload` — upload owned by the user
//!
//! Collection and item routes also answer with a trailing slash.
//!
//! Failures are `{ "success": false, "message": ... }` envelopes sent with
//! `200 OK` unless `http_error_status` is set, in which case they carry the
//! status of their error kind (400/403/404/409/500).

use crate::{
    errors::failures_as_ok,
    handlers::{
        health_handlers::{healthz, index, readyz},
        image_handlers::{
            delete_image, download_image, get_image, list_images, set_public, upload_images,
        },
        user_handlers::{get_user, list_users, register, upload_for_user},
    },
    services::asset_service::MAX_FILES_PER_UPLOAD,
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
};

/// Headroom for multipart framing on top of the file payloads.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Build the router. Upload routes accept bodies of up to
/// `MAX_FILES_PER_UPLOAD * max_file_bytes` plus framing.
pub fn routes(max_file_bytes: u64, http_error_status: bool) -> Router<AppState> {
    let upload_limit = usize::try_from(max_file_bytes)
        .unwrap_or(usize::MAX)
        .saturating_mul(MAX_FILES_PER_UPLOAD)
        .saturating_add(MULTIPART_OVERHEAD);

    let router = Router::new()
        .route("/", get(index))
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // image routes
        .route("/api/images", get(list_images))
        .route("/api/images/", get(list_images))
        .route(
            "/api/images/upload",
            post(upload_images).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route(
            "/api/images/i/{file_id}",
            get(get_image).delete(delete_image),
        )
        .route(
            "/api/images/i/{file_id}/",
            get(get_image).delete(delete_image),
        )
        .route("/api/images/i/{file_id}/set_public", post(set_public))
        .route("/api/images/i/{file_id}/download", get(download_image))
        // user routes
        .route("/api/users", get(list_users))
        .route("/api/users/", get(list_users))
        .route("/api/users/register", post(register))
        .route("/api/users/u/{user_id}", get(get_user))
        .route("/api/users/u/{user_id}/", get(get_user))
        .route(
            "/api/users/u/{user_id}/upload",
            post(upload_for_user).layer(DefaultBodyLimit::max(upload_limit)),
        );

    if http_error_status {
        router
    } else {
        router.layer(middleware::map_response(failures_as_ok))
    }
}
