//! Gateway configuration and validation.

use url::Url;

use crate::error::{Error, Result};

/// Smallest chunk size S3 accepts for a non-final multipart part.
pub const MIN_CHUNK_SIZE_MB: u64 = 5;

/// Largest chunk size the gateway will fan out.
pub const MAX_CHUNK_SIZE_MB: u64 = 100;

/// Objects below this encrypted size are always uploaded single-shot.
pub const MIN_MULTIPART_SIZE: u64 = 3 * MIN_CHUNK_SIZE_MB * 1024 * 1024;

/// Gateway configuration. Immutable after construction; `validate`
/// must pass before the config is handed to the server.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the gateway listens on (`host:port`).
    pub server_addr: String,
    /// Backend endpoint URL (MinIO or any S3-compatible store).
    pub endpoint: String,
    /// Backend access key id.
    pub access_key: String,
    /// Backend secret access key.
    pub secret_key: String,
    /// Bucket all objects are stored in.
    pub bucket: String,
    /// Multipart chunk size in MiB; 0 disables chunking.
    pub upload_chunk_size_mb: u64,
    /// AES-256 encryption key, exactly 32 bytes.
    pub enc_key: Vec<u8>,
    /// HMAC-SHA-256 key, exactly 32 bytes; must differ from `enc_key`.
    pub hmac_key: Vec<u8>,
}

impl Config {
    /// Returns the configured chunk size in bytes.
    #[must_use]
    pub fn chunk_size_bytes(&self) -> u64 {
        self.upload_chunk_size_mb * 1024 * 1024
    }

    /// Validates every invariant, aggregating all violations into a
    /// single error so operators see the full list at once.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` naming each violated invariant.
    pub fn validate(&self) -> Result<()> {
        let mut errs = Vec::new();

        if self.server_addr.len() < 5 || !self.server_addr.contains(':') {
            errs.push("invalid server address, host:port required".to_string());
        }
        if self.endpoint.is_empty() {
            errs.push("missing backend endpoint".to_string());
        } else if Url::parse(&self.endpoint).is_err() {
            errs.push("endpoint is not a valid url".to_string());
        }
        if self.access_key.is_empty() {
            errs.push("missing backend access key".to_string());
        }
        if self.secret_key.is_empty() {
            errs.push("missing backend secret key".to_string());
        }
        if self.bucket.is_empty() {
            errs.push("missing bucket name".to_string());
        }
        if self.enc_key.len() != 32 {
            errs.push("encryption key must be 32 bytes".to_string());
        }
        if self.hmac_key.len() != 32 {
            errs.push("hmac key must be 32 bytes".to_string());
        }
        if !self.enc_key.is_empty() && self.enc_key == self.hmac_key {
            errs.push("encryption and hmac keys must differ".to_string());
        }
        if self.upload_chunk_size_mb > 0 && self.upload_chunk_size_mb < MIN_CHUNK_SIZE_MB {
            errs.push(format!("chunk size must be at least {MIN_CHUNK_SIZE_MB} MiB"));
        }
        if self.upload_chunk_size_mb > MAX_CHUNK_SIZE_MB {
            errs.push(format!("chunk size can be at most {MAX_CHUNK_SIZE_MB} MiB"));
        }

        if errs.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(errs.join("; ")))
        }
    }
}
