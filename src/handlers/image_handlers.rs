//! HTTP handlers for `/api/images`.
//! Download bodies are streamed from the blob store, never buffered.

use super::extract::{FormOrJson, Uploads, stage_uploads};
use crate::{
    errors::AppError,
    models::{
        asset::{AssetView, UploadOutcome},
        envelope::{Details, Empty, Images, Success},
    },
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::{HeaderValue, StatusCode, header},
    response::Response,
};
use serde::Deserialize;
use serde_json::Value;
use tokio_util::io::ReaderStream;

/// Body of `POST /api/images/i/{file_id}/set_public`.
#[derive(Debug, Default, Deserialize)]
pub struct SetPublicReq {
    pub public: Option<Value>,
}

/// `GET /api/images`: every public image.
pub async fn list_images(
    State(state): State<AppState>,
) -> Result<Json<Success<Images<AssetView>>>, AppError> {
    let images = state.assets.list_assets().await?;
    Ok(Json(Success::new(Images { images })))
}

/// `POST /api/images/upload`: anonymous upload of up to five `photos`.
pub async fn upload_images(
    State(state): State<AppState>,
    Uploads(multipart): Uploads,
) -> Result<Json<Success<UploadOutcome>>, AppError> {
    let files = stage_uploads(&state.stager, multipart).await?;
    let outcome = state.assets.upload(files, None).await?;
    Ok(Json(Success::new(outcome)))
}

/// `GET /api/images/i/{file_id}`
pub async fn get_image(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> Result<Json<Success<Details<AssetView>>>, AppError> {
    let details = state.assets.get_asset(&file_id).await?;
    Ok(Json(Success::new(Details { details })))
}

/// `POST /api/images/i/{file_id}/set_public`: omitted `public` means public.
pub async fn set_public(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
    FormOrJson(req): FormOrJson<SetPublicReq>,
) -> Result<Json<Success<Empty>>, AppError> {
    state
        .assets
        .set_visibility(&file_id, req.public.as_ref())
        .await?;
    Ok(Json(Success::empty()))
}

/// `DELETE /api/images/i/{file_id}`
pub async fn delete_image(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> Result<Json<Success<Empty>>, AppError> {
    state.assets.delete_asset(&file_id).await?;
    Ok(Json(Success::empty()))
}

/// `GET /api/images/i/{file_id}/download`: stream a public image as an attachment.
pub async fn download_image(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> Result<Response, AppError> {
    let download = state.assets.download(&file_id).await?;
    let content_type = mime_guess::from_path(&download.name).first_or_octet_stream();

    let mut response = Response::new(Body::from_stream(ReaderStream::new(download.body)));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type.as_ref())
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_DISPOSITION, attachment(&download.name));
    Ok(response)
}

/// `attachment` disposition with an ASCII fallback name and an RFC 5987
/// `filename*` when the name is not plain ASCII.
fn attachment(name: &str) -> HeaderValue {
    let fallback: String = name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii() && !c.is_ascii_control() => c,
            _ => '?',
        })
        .collect();

    let value = if name.is_ascii() && fallback == name {
        format!("attachment; filename=\"{fallback}\"")
    } else {
        format!(
            "attachment; filename=\"{fallback}\"; filename*=UTF-8''{}",
            percent_encode(name)
        )
    };
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

fn percent_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len() * 3);
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_names_use_a_quoted_filename() {
        assert_eq!(attachment("cat.png"), "attachment; filename=\"cat.png\"");
    }

    #[test]
    fn unicode_names_get_an_encoded_variant() {
        assert_eq!(
            attachment("chat é.png"),
            "attachment; filename=\"chat ?.png\"; filename*=UTF-8''chat%20%C3%A9.png"
        );
    }
}
