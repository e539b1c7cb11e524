//! Blob client: presigned single-shot PUT and GET against the backend,
//! plus the single-shot/multipart decision.

use std::io;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use reqwest::header;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;
use url::Url;

use shroud_core::config::{Config, MIN_MULTIPART_SIZE};
use shroud_core::{ETag, Error, Result};

use crate::multipart::MultipartUpload;
use crate::presign::Presigner;

/// Presigned URL lifetime for downloads.
const GET_URL_EXPIRY: Duration = Duration::from_secs(10 * 60);

/// Presigned URL lifetime for uploads; every part is signed separately.
pub(crate) const PUT_URL_EXPIRY: Duration = Duration::from_secs(60);

/// Chunks below this can never satisfy the S3 minimum part size.
const MIN_CHUNK_BYTES: u64 = 1024 * 1024;

/// Client for the S3-compatible backend. Cheap to clone; the underlying
/// HTTP client shares its connection pool.
#[derive(Clone)]
pub struct BlobClient {
    pub(crate) signer: Presigner,
    pub(crate) http: reqwest::Client,
}

/// An object fetched from the backend.
///
/// `content_length` is the stored (encrypted) size as the backend
/// reports it. The body is released by draining or dropping the
/// descriptor.
#[derive(Debug)]
pub struct RemoteObject {
    /// Content type stored with the object.
    pub content_type: String,
    /// Stored size in bytes, frame overhead included.
    pub content_length: u64,
    /// Backend-assigned entity tag.
    pub etag: ETag,
    response: reqwest::Response,
}

impl RemoteObject {
    /// Consumes the descriptor, returning the body as an async reader.
    pub fn into_reader(self) -> impl AsyncRead + Send + Unpin {
        StreamReader::new(self.response.bytes_stream().map_err(io::Error::other))
    }
}

impl BlobClient {
    /// Creates a client from a validated gateway configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the endpoint does not parse as a URL.
    pub fn new(config: &Config) -> Result<Self> {
        let endpoint = Url::parse(&config.endpoint)
            .map_err(|e| Error::Config(format!("endpoint is not a valid url: {e}")))?;

        Ok(Self {
            signer: Presigner::new(endpoint, &config.access_key, &config.secret_key),
            http: reqwest::Client::new(),
        })
    }

    /// Fetches an object through a presigned GET.
    ///
    /// # Errors
    ///
    /// `NotFound` / `Forbidden` for 404 and 403; any other non-2xx
    /// response becomes `Backend` with the response body text.
    pub async fn get_file(&self, bucket: &str, key: &str) -> Result<RemoteObject> {
        let url = self.signer.presign("GET", bucket, key, GET_URL_EXPIRY, &[]);
        let response = self.http.get(url).send().await.map_err(Error::transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(match status.as_u16() {
                404 => Error::NotFound,
                403 => Error::Forbidden,
                code => Error::backend(code, response.text().await.unwrap_or_default()),
            });
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let content_length = response.content_length().unwrap_or_default();
        let etag = response
            .headers()
            .get(header::ETAG)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .into();

        Ok(RemoteObject { content_type, content_length, etag, response })
    }

    /// Uploads `input`, choosing single-shot or multipart from the
    /// declared content length and the configured chunk size.
    ///
    /// # Errors
    ///
    /// Propagates backend and transport failures; a failed part aborts
    /// the whole upload.
    pub async fn upload<S>(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        content_length: u64,
        chunk_size: u64,
        input: S,
    ) -> Result<ETag>
    where
        S: Stream<Item = io::Result<Bytes>> + Send + Unpin + 'static,
    {
        let chunks = chunk_count(content_length, chunk_size);
        if chunks <= 1 {
            // data still arrives in encrypt-pipeline-sized blocks
            return self
                .put_object(
                    None,
                    bucket,
                    key,
                    content_type,
                    content_length,
                    reqwest::Body::wrap_stream(input),
                )
                .await;
        }

        MultipartUpload::new(
            self.clone(),
            bucket,
            key,
            content_type,
            content_length,
            chunk_size,
            chunks,
        )
        .upload(StreamReader::new(input))
        .await
    }

    /// One PUT against a presigned URL. Shared by the single-shot path
    /// and the multipart workers, which add `partNumber` and `uploadId`.
    pub(crate) async fn put_object(
        &self,
        part: Option<(&str, u32)>,
        bucket: &str,
        key: &str,
        content_type: &str,
        content_length: u64,
        body: reqwest::Body,
    ) -> Result<ETag> {
        let part_number;
        let query: Vec<(&str, &str)> = match part {
            Some((upload_id, number)) => {
                part_number = number.to_string();
                vec![("partNumber", part_number.as_str()), ("uploadId", upload_id)]
            }
            None => Vec::new(),
        };

        let url = self.signer.presign("PUT", bucket, key, PUT_URL_EXPIRY, &query);
        let response = self
            .http
            .put(url)
            .header(header::CONTENT_TYPE, content_type)
            .header(header::CONTENT_LENGTH, content_length)
            .body(body)
            .send()
            .await
            .map_err(Error::transport)?;

        let status = response.status();
        let etag: ETag = response
            .headers()
            .get(header::ETAG)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .into();

        if status.is_success() {
            return Ok(etag);
        }

        let body = response.text().await.unwrap_or_default();
        Err(Error::backend(status.as_u16(), body))
    }
}

/// Number of multipart chunks for an object; 1 means single-shot.
pub(crate) fn chunk_count(content_length: u64, chunk_size: u64) -> u64 {
    if content_length < MIN_MULTIPART_SIZE || chunk_size < MIN_CHUNK_BYTES {
        return 1;
    }
    content_length.div_ceil(chunk_size).max(1)
}
