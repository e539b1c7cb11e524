//! Error types shared across the gateway.

use thiserror::Error;

/// A specialized `Result` type for gateway operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while proxying objects to the backend.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration failed validation. The message aggregates every
    /// violated invariant so operators see all of them at once.
    #[error("configuration error: {0}")]
    Config(String),

    /// The requested object does not exist on the backend.
    #[error("object not found")]
    NotFound,

    /// The backend rejected the presigned request.
    #[error("access forbidden")]
    Forbidden,

    /// Any other non-2xx backend response, body text included.
    #[error("backend request failed ({status}): {message}")]
    Backend {
        /// HTTP status returned by the backend.
        status: u16,
        /// Response body text.
        message: String,
    },

    /// Cipher construction failed (bad key length).
    #[error("cipher initialization failed: {0}")]
    CipherInit(String),

    /// Stored object failed HMAC verification.
    #[error("object failed integrity verification")]
    Tampered,

    /// A multipart part upload failed; the whole object upload is aborted.
    #[error("failed to upload part {0}")]
    PartUploadFailed(u32),

    /// `upload` was called on a multipart session that already has an upload id.
    #[error("multipart upload already started")]
    AlreadyStarted,

    /// The client request carried no usable Content-Length.
    #[error("content length is required")]
    MissingContentLength,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP transport failure talking to the backend.
    #[error("transport error: {0}")]
    Transport(String),
}

impl Error {
    /// Creates a backend error from a status code and response body.
    #[must_use]
    pub fn backend(status: u16, message: impl Into<String>) -> Self {
        Self::Backend { status, message: message.into() }
    }

    /// Creates a transport error from any displayable source.
    #[must_use]
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }

    /// Returns the HTTP status code this error maps to on the client surface.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::NotFound => 404,
            Self::Forbidden => 403,
            Self::MissingContentLength => 411,
            Self::Config(_)
            | Self::Backend { .. }
            | Self::CipherInit(_)
            | Self::Tampered
            | Self::PartUploadFailed(_)
            | Self::AlreadyStarted
            | Self::Io(_)
            | Self::Transport(_) => 500,
        }
    }
}
