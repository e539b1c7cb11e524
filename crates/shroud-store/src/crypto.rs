//! Streaming object encryption.
//!
//! Objects are stored in a fixed frame, encrypt-then-MAC:
//!
//! ```text
//! [random iv: 16b][AES-256-CTR ciphertext: same size as cleartext][HMAC-SHA-256 tag: 32b]
//! ```
//!
//! The tag covers the exact bytes written to storage (IV included), so
//! integrity verification never depends on decryption succeeding first.
//! Stored size is always cleartext size + [`META_SIZE`].

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use aes::cipher::{KeyIvInit, StreamCipher};
use aes::Aes256;
use bytes::Bytes;
use futures::Stream;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

type Aes256Ctr = ctr::Ctr128BE<Aes256>;
type HmacSha256 = Hmac<Sha256>;

/// Block size for reading and encrypting.
pub const ENC_BUFFER_SIZE: usize = 4096;

/// Length of the per-object random IV.
pub const IV_SIZE: usize = 16;

/// Length of the HMAC-SHA-256 tag.
pub const TAG_SIZE: usize = 32;

/// Frame overhead: stored size = cleartext size + `META_SIZE`.
pub const META_SIZE: usize = IV_SIZE + TAG_SIZE;

/// Errors from the crypto pipeline.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Cipher construction failed (bad key length).
    #[error("cipher initialization failed: {0}")]
    CipherInit(String),

    /// Recomputed HMAC does not match the stored tag.
    #[error("object failed integrity verification")]
    Tampered,

    /// The object is smaller than the frame overhead.
    #[error("object is smaller than the ciphertext frame")]
    Truncated,

    /// I/O error while streaming.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<CryptoError> for shroud_core::Error {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::CipherInit(msg) => Self::CipherInit(msg),
            CryptoError::Tampered | CryptoError::Truncated => Self::Tampered,
            CryptoError::Io(e) => Self::Io(e),
        }
    }
}

/// Ciphertext frame produced by [`encrypt_stream`].
///
/// Backed by a bounded channel fed from a dedicated task: if the
/// consumer stalls, the task blocks on the channel, which stops reading
/// the input and backpressures the original producer.
pub struct CipherStream {
    rx: mpsc::Receiver<io::Result<Bytes>>,
}

impl Stream for CipherStream {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

/// Encrypts `input` into the ciphertext frame, lazily.
///
/// The returned stream yields the IV, then ciphertext blocks of at most
/// [`ENC_BUFFER_SIZE`] bytes, then the 32-byte tag. An invalid
/// encryption key length or a failed input read surfaces as an `Err`
/// item; consumers must treat that as a failed transfer, never as EOF.
pub fn encrypt_stream<R>(enc_key: Vec<u8>, hmac_key: Vec<u8>, mut input: R) -> CipherStream
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(1);

    tokio::spawn(async move {
        let iv = {
            let mut iv = [0u8; IV_SIZE];
            rand::thread_rng().fill_bytes(&mut iv);
            iv
        };

        let mut ctr = match Aes256Ctr::new_from_slices(&enc_key, &iv) {
            Ok(ctr) => ctr,
            Err(e) => {
                let _ = tx
                    .send(Err(io::Error::other(format!("failed to create aes cipher: {e}"))))
                    .await;
                return;
            }
        };
        let mut mac = match HmacSha256::new_from_slice(&hmac_key) {
            Ok(mac) => mac,
            Err(e) => {
                let _ =
                    tx.send(Err(io::Error::other(format!("failed to create hmac: {e}")))).await;
                return;
            }
        };

        mac.update(&iv);
        if tx.send(Ok(Bytes::copy_from_slice(&iv))).await.is_err() {
            return;
        }

        let mut buf = [0u8; ENC_BUFFER_SIZE];
        loop {
            let n = match input.read(&mut buf).await {
                Ok(n) => n,
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            };
            if n == 0 {
                break;
            }

            ctr.apply_keystream(&mut buf[..n]);
            mac.update(&buf[..n]);
            if tx.send(Ok(Bytes::copy_from_slice(&buf[..n]))).await.is_err() {
                return;
            }
        }

        let tag = mac.finalize().into_bytes();
        let _ = tx.send(Ok(Bytes::copy_from_slice(&tag))).await;
    });

    CipherStream { rx }
}

/// Decrypts and verifies a ciphertext frame, returning a reader over
/// the verified cleartext.
///
/// Cleartext is staged in an anonymous temp file until the stored tag
/// has been checked in constant time; nothing is observable by the
/// caller before verification passes. The staging file is reclaimed on
/// every exit path.
///
/// # Errors
///
/// `Tampered` on tag mismatch, `Truncated` when `total_size` cannot
/// hold the frame, `CipherInit` for a bad key length, `Io` for read
/// failures or a body shorter than `total_size` promises.
pub async fn decrypt_verified<R>(
    enc_key: &[u8],
    hmac_key: &[u8],
    mut input: R,
    total_size: u64,
) -> Result<File, CryptoError>
where
    R: AsyncRead + Unpin,
{
    if total_size < META_SIZE as u64 {
        return Err(CryptoError::Truncated);
    }

    let mut iv = [0u8; IV_SIZE];
    input.read_exact(&mut iv).await?;

    let mut ctr = Aes256Ctr::new_from_slices(enc_key, &iv)
        .map_err(|e| CryptoError::CipherInit(e.to_string()))?;
    let mut mac = HmacSha256::new_from_slice(hmac_key)
        .map_err(|e| CryptoError::CipherInit(e.to_string()))?;
    mac.update(&iv);

    let mut staging = File::from_std(tempfile::tempfile()?);

    let body_len = total_size - META_SIZE as u64;
    let mut body = (&mut input).take(body_len);
    let mut buf = [0u8; ENC_BUFFER_SIZE];
    let mut read = 0u64;
    loop {
        let n = body.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        read += n as u64;

        mac.update(&buf[..n]);
        ctr.apply_keystream(&mut buf[..n]);
        staging.write_all(&buf[..n]).await?;
    }
    if read != body_len {
        return Err(CryptoError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "ciphertext body shorter than the reported object size",
        )));
    }

    let mut tag = [0u8; TAG_SIZE];
    input.read_exact(&mut tag).await?;

    // constant-time comparison, via the Mac trait
    mac.verify_slice(&tag).map_err(|_| CryptoError::Tampered)?;

    staging.flush().await?;
    staging.seek(io::SeekFrom::Start(0)).await?;
    Ok(staging)
}

/// Decrypts a ciphertext frame into `sink`.
///
/// The sink receives bytes only after the tag has verified; on
/// `Tampered` it receives nothing at all.
///
/// # Errors
///
/// Same failure modes as [`decrypt_verified`].
pub async fn decrypt_stream<R, W>(
    enc_key: &[u8],
    hmac_key: &[u8],
    input: R,
    total_size: u64,
    sink: &mut W,
) -> Result<(), CryptoError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut cleartext = decrypt_verified(enc_key, hmac_key, input, total_size).await?;
    tokio::io::copy(&mut cleartext, sink).await?;
    sink.flush().await?;
    Ok(())
}
