//! The two gateway routes: encrypting upload and verifying download.

use std::io;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::TryStreamExt;
use serde_json::json;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::info;

use shroud_core::Error;
use shroud_store::crypto::{self, META_SIZE};
use shroud_store::BlobClient;

use crate::error::ApiError;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Shared state for the route handlers.
pub struct AppState {
    /// Client for the blob backend.
    pub client: BlobClient,
    /// Bucket all objects live in.
    pub bucket: String,
    /// Multipart chunk size in bytes; 0 disables chunking.
    pub chunk_size: u64,
    /// AES-256 encryption key.
    pub enc_key: Vec<u8>,
    /// HMAC-SHA-256 key.
    pub hmac_key: Vec<u8>,
}

/// `PUT /files/{name}`: encrypt the request body on the fly and store
/// the resulting ciphertext frame on the backend.
pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, ApiError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_string();

    // The chunk math needs the real size up front, so requests without
    // a declared length are refused rather than guessed at.
    let content_length = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .ok_or(ApiError(Error::MissingContentLength))?;
    let encrypted_length = content_length + META_SIZE as u64;

    let cleartext = StreamReader::new(body.into_data_stream().map_err(io::Error::other));
    let ciphertext =
        crypto::encrypt_stream(state.enc_key.clone(), state.hmac_key.clone(), cleartext);

    let started = Instant::now();
    let etag = state
        .client
        .upload(
            &state.bucket,
            &name,
            &content_type,
            encrypted_length,
            state.chunk_size,
            ciphertext,
        )
        .await
        .map_err(ApiError)?;
    info!(key = %name, elapsed_ms = started.elapsed().as_millis() as u64, "upload finished");

    Ok((StatusCode::ACCEPTED, Json(json!({ "id": name, "etag": etag.as_str() }))))
}

/// `GET /files/{name}`: fetch the ciphertext frame, verify its tag,
/// then stream the cleartext to the client.
pub async fn read_file(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let object = state.client.get_file(&state.bucket, &name).await.map_err(ApiError)?;

    if object.content_length == 0 {
        return Err(ApiError(Error::backend(200, "backend reported no content length")));
    }

    let encrypted_length = object.content_length;
    let content_type = object.content_type.clone();
    let etag = object.etag.clone();

    // Verification finishes before any header or cleartext byte goes
    // out; a tampered object surfaces as a clean error response.
    let cleartext = crypto::decrypt_verified(
        &state.enc_key,
        &state.hmac_key,
        object.into_reader(),
        encrypted_length,
    )
    .await
    .map_err(|e| ApiError(e.into()))?;

    let clear_length = encrypted_length - META_SIZE as u64;

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, clear_length);
    if !etag.is_empty() {
        response = response.header(header::ETAG, etag.as_str());
    }

    response
        .body(Body::from_stream(ReaderStream::new(cleartext)))
        .map_err(|e| ApiError(Error::transport(e)))
}
