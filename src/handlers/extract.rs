//! Request body extraction shared by the image and user handlers.

use crate::{
    errors::AppError,
    services::{
        asset_service::{MAX_FILES_PER_UPLOAD, no_images, too_many_files, validate_file_name},
        staging::{StagedFile, Stager},
    },
};
use axum::{
    Form,
    body::Bytes,
    extract::{FromRequest, Multipart, Request, multipart::MultipartError},
    http::{StatusCode, header},
};
use futures::TryStreamExt;
use serde::de::DeserializeOwned;
use tracing::debug;

/// Multipart field carrying upload files.
pub const UPLOAD_FIELD: &str = "photos";

/// A body accepted either as JSON or as `application/x-www-form-urlencoded`.
/// An empty body yields `T::default()`.
pub struct FormOrJson<T>(pub T);

impl<S, T> FromRequest<S> for FormOrJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Default,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_form = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));

        if is_form {
            let Form(value) = Form::<T>::from_request(req, state)
                .await
                .map_err(|err| AppError::bad_request(err.body_text()))?;
            return Ok(Self(value));
        }

        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|err| AppError::bad_request(err.body_text()))?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self(T::default()));
        }
        serde_json::from_slice(&bytes)
            .map(Self)
            .map_err(|err| AppError::bad_request(format!("Invalid JSON body: {err}")))
    }
}

/// A multipart upload body. A request that is not `multipart/form-data`
/// carries no files and is rejected with the no-images failure envelope.
pub struct Uploads(pub Multipart);

impl<S> FromRequest<S> for Uploads
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        Multipart::from_request(req, state)
            .await
            .map(Self)
            .map_err(|rejection| {
                debug!("not a multipart upload: {}", rejection.body_text());
                AppError::from(no_images())
            })
    }
}

/// Describe a multipart failure, naming the size limit when the body was cut off.
fn multipart_failure(err: &MultipartError, stager: &Stager) -> String {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        format!(
            "Upload is too large; each file may be at most {} bytes.",
            stager.max_file_bytes()
        )
    } else {
        format!("Multipart error: {err}")
    }
}

/// Stream every file of a multipart upload into staging.
///
/// Names are validated before a file is staged, so a rejected batch never
/// reaches either store. Text fields are ignored.
pub async fn stage_uploads(
    stager: &Stager,
    mut multipart: Multipart,
) -> Result<Vec<StagedFile>, AppError> {
    let mut staged = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(multipart_failure(&err, stager)))?
    {
        let Some(file_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        if field.name() != Some(UPLOAD_FIELD) {
            return Err(AppError::bad_request(format!(
                "Unexpected field \"{}\".",
                field.name().unwrap_or_default()
            )));
        }
        if staged.len() == MAX_FILES_PER_UPLOAD {
            return Err(too_many_files().into());
        }
        validate_file_name(&file_name)?;
        let chunks = field.map_err(|err| multipart_failure(&err, stager));
        staged.push(stager.stage(file_name, chunks).await?);
    }
    Ok(staged)
}
