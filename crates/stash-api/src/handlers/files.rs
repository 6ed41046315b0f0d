//! File handlers: streaming upload, download, delete and signed links
//!
//! Uploads are never buffered whole. The multipart `file` field is pumped
//! chunk by chunk into a bounded channel that backs the `AsyncRead` handed to
//! the saga coordinator, so the body flows straight into the blob store.

use axum::{
    body::Body,
    extract::{multipart::MultipartError, Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use bytes::Bytes;
use futures::StreamExt;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Deserialize;
use stash_core::models::{File, ShareFileRequest};
use stash_core::AppError;
use stash_services::UploadRequest;
use stash_storage::{ObjectDownload, ObjectReader};
use std::io;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::io::StreamReader;
use uuid::Uuid;

use super::MessageResponse;
use crate::auth::Principal;
use crate::error::{ErrorResponse, HttpAppError, ValidatedJson};
use crate::state::AppState;

const UPLOAD_FIELD: &str = "file";
const UPLOAD_CHANNEL_DEPTH: usize = 8;

/// RFC 5987 `attr-char`, everything else is percent-encoded.
const ATTR_CHAR: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'!')
    .remove(b'#')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b'-')
    .remove(b'.')
    .remove(b'^')
    .remove(b'_')
    .remove(b'`')
    .remove(b'|')
    .remove(b'~');

#[derive(Debug, Deserialize)]
pub struct SignedDownloadQuery {
    pub token: String,
}

fn multipart_rejection(err: MultipartError) -> Response {
    let status = err.status();
    let code = if status == StatusCode::PAYLOAD_TOO_LARGE {
        "PAYLOAD_TOO_LARGE"
    } else {
        "INVALID_MULTIPART"
    };
    tracing::debug!(error = %err.body_text(), "Multipart body rejected");
    (status, Json(ErrorResponse::new(err.body_text(), code))).into_response()
}

/// Upload a file into a project's bucket
///
/// Expects one multipart field named `file` carrying a file name. The content
/// type is sniffed from the payload and the stored size is the byte count
/// actually streamed.
#[tracing::instrument(skip(state, principal, multipart), fields(user_id = %principal.user_id))]
pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(project_id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<Response, HttpAppError> {
    let mut field = loop {
        match multipart.next_field().await {
            Ok(Some(field)) if field.name() == Some(UPLOAD_FIELD) => break field,
            Ok(Some(_)) => continue,
            Ok(None) => {
                return Err(AppError::InvalidInput(format!(
                    "Missing multipart field '{}'",
                    UPLOAD_FIELD
                ))
                .into())
            }
            Err(e) => return Ok(multipart_rejection(e)),
        }
    };
    let filename = field
        .file_name()
        .map(str::to_string)
        .ok_or_else(|| AppError::InvalidInput("Uploaded file has no file name".to_string()))?;

    let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(UPLOAD_CHANNEL_DEPTH);

    let pump = async move {
        loop {
            match field.chunk().await {
                Ok(Some(chunk)) => {
                    if tx.send(Ok(chunk)).await.is_err() {
                        // Upload gave up; stop reading the body.
                        return None;
                    }
                }
                Ok(None) => return None,
                Err(e) => {
                    let _ = tx.send(Err(io::Error::other(e.body_text()))).await;
                    return Some(e);
                }
            }
        }
    };

    let chunks = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    });
    let reader: ObjectReader = Box::pin(StreamReader::new(Box::pin(chunks)));

    let upload = state.saga.upload_file(UploadRequest {
        project_id,
        uploaded_by: principal.user_id,
        filename,
        content_type: None,
        content_length: None,
        reader,
    });

    let (body_error, result) = tokio::join!(pump, upload);

    match (result, body_error) {
        (Ok(file), _) => Ok((StatusCode::CREATED, Json(file)).into_response()),
        // The upload failed because the body did; report the body problem.
        (Err(_), Some(body_error)) => Ok(multipart_rejection(body_error)),
        (Err(e), None) => Err(e.into()),
    }
}

#[tracing::instrument(skip(state, principal))]
pub async fn list_project_files(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(project_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpAppError> {
    let files = state
        .catalog
        .list_project_files(project_id, principal.user_id)
        .await?;
    Ok(Json(files))
}

#[tracing::instrument(skip(state, principal))]
pub async fn list_files(
    State(state): State<Arc<AppState>>,
    principal: Principal,
) -> Result<impl IntoResponse, HttpAppError> {
    let files = state.catalog.list_user_files(principal.user_id).await?;
    Ok(Json(files))
}

#[tracing::instrument(skip(state, principal))]
pub async fn get_file(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpAppError> {
    let file = state.catalog.get_file(id, principal.user_id).await?;
    Ok(Json(file))
}

#[tracing::instrument(skip(state, principal))]
pub async fn download_file(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<Response, HttpAppError> {
    let (file, download) = state.catalog.download(id, principal.user_id).await?;
    stream_response(&file, download)
}

#[tracing::instrument(skip(state, principal))]
pub async fn delete_file(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpAppError> {
    let file = state.saga.delete_file(id, principal.user_id).await?;
    Ok(Json(MessageResponse {
        message: format!("File {} deleted", file.filename),
        id: file.id,
    }))
}

/// Mint a signed download link for a file
#[tracing::instrument(skip(state, principal, request))]
pub async fn share_file(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<Uuid>,
    ValidatedJson(request): ValidatedJson<ShareFileRequest>,
) -> Result<impl IntoResponse, HttpAppError> {
    let file = state
        .metadata
        .get_file(id)
        .await?
        .ok_or_else(|| AppError::NotFound("File not found".to_string()))?;
    let shared = state
        .signed_urls
        .issue(&file, principal.user_id, request.expires_at)?;
    Ok(Json(shared))
}

/// Serve a file by signed token. No authentication; the token is the capability.
#[tracing::instrument(skip(state, query))]
pub async fn download_signed(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SignedDownloadQuery>,
) -> Result<Response, HttpAppError> {
    let token = query.token.trim();
    if token.is_empty() {
        return Err(AppError::InvalidInput("Missing token parameter".to_string()).into());
    }
    let claims = state.signed_urls.verify(token)?;
    let (file, download) = state.catalog.download_signed(&claims).await?;
    stream_response(&file, download)
}

fn content_disposition(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| {
            if c == ' ' || (c.is_ascii_graphic() && c != '"' && c != '\\') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        utf8_percent_encode(filename, ATTR_CHAR)
    )
}

fn stream_response(file: &File, download: ObjectDownload) -> Result<Response, HttpAppError> {
    let body_stream = download
        .stream
        .map(|chunk| chunk.map_err(|e| io::Error::other(e.to_string())));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, file.content_type.as_str())
        .header(header::CONTENT_LENGTH, download.size)
        .header(header::CONTENT_DISPOSITION, content_disposition(&file.filename))
        .body(Body::from_stream(body_stream))
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to build download response");
            HttpAppError::from(AppError::Internal(e.to_string()))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_disposition_ascii() {
        assert_eq!(
            content_disposition("report.pdf"),
            "attachment; filename=\"report.pdf\"; filename*=UTF-8''report.pdf"
        );
    }

    #[test]
    fn test_content_disposition_escapes_quotes_and_unicode() {
        let value = content_disposition("résumé \"final\".txt");
        assert!(value.starts_with("attachment; filename=\"r_sum_ _final_.txt\""));
        assert!(value.ends_with("filename*=UTF-8''r%C3%A9sum%C3%A9%20%22final%22.txt"));
    }
}
