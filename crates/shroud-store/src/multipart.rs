// Copyright 2026 The Shroud Authors
// SPDX-License-Identifier: Apache-2.0

//! Multipart upload coordination.
//!
//! A producer task splits the incoming ciphertext stream into ordered
//! chunks and feeds a bounded job channel; a small pool of workers
//! uploads parts concurrently through presigned URLs; a completion
//! barrier collects every dispatched part and issues the ordered
//! commit. Failures abort the backend upload so parts do not leak.

use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

use shroud_core::{ETag, Error, Result};

use crate::client::{BlobClient, PUT_URL_EXPIRY};

/// Upper bound on concurrent part uploads.
const MAX_WORKERS: u64 = 4;

const S3_XMLNS: &str = "http://s3.amazonaws.com/doc/2006-03-01/";

/// One chunk of data in flight. The buffer is owned by exactly one
/// worker for the duration of its PUT; buffers are never reused.
struct Chunk {
    part: u32,
    data: Bytes,
}

/// A chunk becomes a completed part once its PUT returns. An empty
/// etag marks a failed part for the completion barrier.
struct CompletedPart {
    part_number: u32,
    etag: String,
}

#[derive(Debug, Deserialize)]
struct InitiateMultipartUploadResult {
    #[serde(rename = "UploadId")]
    upload_id: String,
}

#[derive(Serialize)]
#[serde(rename = "CompleteMultipartUpload")]
struct CompleteMultipartUpload {
    #[serde(rename = "@xmlns")]
    xmlns: &'static str,
    #[serde(rename = "Part")]
    parts: Vec<PartEntry>,
}

#[derive(Serialize)]
struct PartEntry {
    #[serde(rename = "PartNumber")]
    part_number: u32,
    #[serde(rename = "ETag")]
    etag: String,
}

/// A single multipart upload session: initiate, fan out, commit.
pub(crate) struct MultipartUpload {
    client: BlobClient,
    bucket: String,
    key: String,
    content_type: String,
    content_length: u64,
    chunk_size: u64,
    chunks: u64,
    upload_id: Option<String>,
}

impl MultipartUpload {
    pub(crate) fn new(
        client: BlobClient,
        bucket: &str,
        key: &str,
        content_type: &str,
        content_length: u64,
        chunk_size: u64,
        chunks: u64,
    ) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            key: key.to_string(),
            content_type: content_type.to_string(),
            content_length,
            chunk_size,
            chunks,
            upload_id: None,
        }
    }

    /// Runs the whole session against `input`.
    ///
    /// # Errors
    ///
    /// `AlreadyStarted` if the session already holds an upload id;
    /// `PartUploadFailed` when any part comes back without an etag;
    /// backend and I/O failures otherwise. Every failure path issues a
    /// best-effort abort on the backend.
    pub(crate) async fn upload<R>(&mut self, input: R) -> Result<ETag>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        if self.upload_id.is_some() {
            return Err(Error::AlreadyStarted);
        }

        // fewer chunks than the cap means one worker per chunk
        let workers = MAX_WORKERS.min(self.chunks) as usize;

        info!(
            key = %self.key,
            size_mb = self.content_length / 1024 / 1024,
            chunks = self.chunks,
            chunk_mb = self.chunk_size / 1024 / 1024,
            workers,
            "starting multipart upload"
        );

        let upload_id = self.initiate().await?;
        self.upload_id = Some(upload_id.clone());

        let (jobs_tx, jobs_rx) = mpsc::channel::<Chunk>(workers);
        let jobs_rx = Arc::new(Mutex::new(jobs_rx));
        let (parts_tx, mut parts_rx) = mpsc::channel::<CompletedPart>(self.chunks as usize);
        let (done_tx, done_rx) = oneshot::channel::<(u64, Option<std::io::Error>)>();

        for worker in 0..workers {
            let client = self.client.clone();
            let jobs = Arc::clone(&jobs_rx);
            let parts = parts_tx.clone();
            let bucket = self.bucket.clone();
            let key = self.key.clone();
            let content_type = self.content_type.clone();
            let upload_id = upload_id.clone();

            tokio::spawn(async move {
                loop {
                    let job = { jobs.lock().await.recv().await };
                    let Some(chunk) = job else { break };

                    let part = chunk.part;
                    let len = chunk.data.len() as u64;
                    let result = client
                        .put_object(
                            Some((upload_id.as_str(), part)),
                            &bucket,
                            &key,
                            &content_type,
                            len,
                            chunk.data.into(),
                        )
                        .await;

                    let etag = match result {
                        Ok(etag) => {
                            debug!(worker, part, "part uploaded");
                            etag.as_str().to_string()
                        }
                        Err(err) => {
                            warn!(worker, part, %err, "part upload failed");
                            String::new()
                        }
                    };

                    // channel capacity covers every chunk, the send never blocks
                    if parts.send(CompletedPart { part_number: part, etag }).await.is_err() {
                        break;
                    }
                }
            });
        }
        drop(parts_tx);

        let chunk_size = self.chunk_size as usize;
        let chunks = self.chunks;
        tokio::spawn(async move {
            let mut input = input;
            let mut dispatched = 0u64;
            let mut failure = None;

            'produce: for part in 1..=chunks {
                let mut buf = vec![0u8; chunk_size];
                let mut filled = 0;
                let eof = loop {
                    match input.read(&mut buf[filled..]).await {
                        Ok(0) => break true,
                        Ok(n) => {
                            filled += n;
                            if filled == buf.len() {
                                break false;
                            }
                        }
                        Err(err) => {
                            failure = Some(err);
                            break 'produce;
                        }
                    }
                };

                if filled > 0 {
                    buf.truncate(filled);
                    if jobs_tx
                        .send(Chunk { part: part as u32, data: Bytes::from(buf) })
                        .await
                        .is_err()
                    {
                        break;
                    }
                    dispatched += 1;
                }
                if eof {
                    break;
                }
            }

            drop(jobs_tx);
            // the collector waits for exactly this many completions
            let _ = done_tx.send((dispatched, failure));
        });

        let (dispatched, read_failure) = done_rx
            .await
            .map_err(|_| Error::transport("chunk producer terminated unexpectedly"))?;

        let mut parts = Vec::with_capacity(dispatched as usize);
        let mut failed_part = None;
        for _ in 0..dispatched {
            let Some(part) = parts_rx.recv().await else { break };
            if part.etag.is_empty() && failed_part.is_none() {
                failed_part = Some(part.part_number);
            }
            parts.push(part);
        }

        if let Some(err) = read_failure {
            self.abort().await;
            return Err(Error::Io(err));
        }
        if let Some(part) = failed_part {
            self.abort().await;
            return Err(Error::PartUploadFailed(part));
        }
        if parts.len() as u64 != dispatched {
            self.abort().await;
            return Err(Error::transport("upload workers terminated unexpectedly"));
        }

        // completion order is nondeterministic, the commit must ascend
        parts.sort_by_key(|p| p.part_number);

        match self.complete(parts).await {
            Ok(etag) => Ok(etag),
            Err(err) => {
                self.abort().await;
                Err(err)
            }
        }
    }

    async fn initiate(&self) -> Result<String> {
        let url = self.client.signer.presign(
            "POST",
            &self.bucket,
            &self.key,
            PUT_URL_EXPIRY,
            &[("uploads", "")],
        );

        let response = self
            .client
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, &self.content_type)
            .send()
            .await
            .map_err(Error::transport)?;

        let status = response.status();
        let body = response.text().await.map_err(Error::transport)?;
        if !status.is_success() {
            return Err(Error::backend(status.as_u16(), body));
        }

        let parsed: InitiateMultipartUploadResult = quick_xml::de::from_str(&body)
            .map_err(|e| Error::transport(format!("invalid initiate response: {e}")))?;
        Ok(parsed.upload_id)
    }

    async fn complete(&self, parts: Vec<CompletedPart>) -> Result<ETag> {
        let upload_id = self.upload_id.as_deref().unwrap_or_default();
        let url = self.client.signer.presign(
            "POST",
            &self.bucket,
            &self.key,
            PUT_URL_EXPIRY,
            &[("uploadId", upload_id)],
        );

        let envelope = CompleteMultipartUpload {
            xmlns: S3_XMLNS,
            parts: parts
                .into_iter()
                .map(|p| PartEntry { part_number: p.part_number, etag: p.etag })
                .collect(),
        };
        let xml = quick_xml::se::to_string(&envelope)
            .map_err(|e| Error::transport(format!("failed to serialize commit: {e}")))?;

        let response = self
            .client
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, &self.content_type)
            .body(xml)
            .send()
            .await
            .map_err(Error::transport)?;

        let status = response.status();
        let etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::backend(status.as_u16(), body));
        }

        Ok(ETag::new(etag))
    }

    /// Best-effort cleanup so failed uploads do not leak parts on the
    /// backend. Abort failures are logged, never surfaced over the
    /// original error.
    async fn abort(&self) {
        let Some(upload_id) = self.upload_id.as_deref() else { return };

        let url = self.client.signer.presign(
            "DELETE",
            &self.bucket,
            &self.key,
            PUT_URL_EXPIRY,
            &[("uploadId", upload_id)],
        );

        match self.client.http.delete(url).send().await {
            Ok(response) if !response.status().is_success() => {
                warn!(key = %self.key, status = %response.status(), "failed to abort multipart upload");
            }
            Err(err) => {
                warn!(key = %self.key, %err, "failed to abort multipart upload");
            }
            Ok(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use shroud_core::Config;

    use super::*;

    fn test_client() -> BlobClient {
        BlobClient::new(&Config {
            server_addr: "127.0.0.1:0".to_string(),
            endpoint: "http://127.0.0.1:9000".to_string(),
            access_key: "ak".to_string(),
            secret_key: "sk".to_string(),
            bucket: "files".to_string(),
            upload_chunk_size_mb: 5,
            enc_key: vec![1u8; 32],
            hmac_key: vec![2u8; 32],
        })
        .unwrap()
    }

    #[test]
    fn test_commit_envelope_is_ascending_xml() {
        let envelope = CompleteMultipartUpload {
            xmlns: S3_XMLNS,
            parts: vec![
                PartEntry { part_number: 1, etag: "\"a\"".to_string() },
                PartEntry { part_number: 2, etag: "\"b\"".to_string() },
            ],
        };

        let xml = quick_xml::se::to_string(&envelope).unwrap();
        assert!(xml.starts_with(
            "<CompleteMultipartUpload xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\">"
        ));
        let first = xml.find("<PartNumber>1</PartNumber>").unwrap();
        let second = xml.find("<PartNumber>2</PartNumber>").unwrap();
        assert!(first < second);
    }

    #[test]
    fn test_initiate_response_parses() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<InitiateMultipartUploadResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Bucket>files</Bucket>
  <Key>big.dat</Key>
  <UploadId>2c8a2c8f41</UploadId>
</InitiateMultipartUploadResult>"#;

        let parsed: InitiateMultipartUploadResult = quick_xml::de::from_str(xml).unwrap();
        assert_eq!(parsed.upload_id, "2c8a2c8f41");
    }

    #[tokio::test]
    async fn test_upload_refuses_started_session() {
        let mut session =
            MultipartUpload::new(test_client(), "files", "big.dat", "text/plain", 100, 10, 10);
        session.upload_id = Some("already".to_string());

        let err = session.upload(std::io::Cursor::new(Vec::new())).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyStarted));
    }
}
