//! HTTP handlers for `/api/users`.

use super::extract::{FormOrJson, Uploads, stage_uploads};
use crate::{
    errors::AppError,
    models::{
        asset::UploadOutcome,
        envelope::{Details, Success, Users},
        user::{User, UserDetails},
    },
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, State},
};
use serde::Deserialize;

/// Body of `POST /api/users/register`.
#[derive(Debug, Default, Deserialize)]
pub struct RegisterReq {
    pub username: Option<String>,
}

/// `GET /api/users`
pub async fn list_users(
    State(state): State<AppState>,
) -> Result<Json<Success<Users<User>>>, AppError> {
    let users = state.users.list_users().await?;
    Ok(Json(Success::new(Users { users })))
}

/// `POST /api/users/register`
pub async fn register(
    State(state): State<AppState>,
    FormOrJson(req): FormOrJson<RegisterReq>,
) -> Result<Json<Success<Details<User>>>, AppError> {
    let details = state.users.create_user(req.username.as_deref()).await?;
    Ok(Json(Success::new(Details { details })))
}

/// `GET /api/users/u/{user_id}`: the user and their public images.
pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Success<Details<UserDetails>>>, AppError> {
    let details = state.users.get_user(&user_id).await?;
    Ok(Json(Success::new(Details { details })))
}

/// `POST /api/users/u/{user_id}/upload`: upload attributed to an existing user.
pub async fn upload_for_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Uploads(multipart): Uploads,
) -> Result<Json<Success<UploadOutcome>>, AppError> {
    let user = state.users.require_user(&user_id).await?;
    let files = stage_uploads(&state.stager, multipart).await?;
    let outcome = state.assets.upload(files, Some(&user.id)).await?;
    Ok(Json(Success::new(outcome)))
}
