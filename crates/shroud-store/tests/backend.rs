//! Blob client integration tests against an in-process mock backend
//! speaking the S3 subset the gateway uses: presigned GET/PUT plus the
//! multipart initiate / upload-part / complete / abort endpoints.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use futures::stream;
use rand::RngCore;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tokio::sync::Mutex;

use shroud_core::{Config, Error};
use shroud_store::BlobClient;

const MIB: usize = 1024 * 1024;

struct StoredFile {
    content_type: String,
    data: Bytes,
}

#[derive(Default)]
struct MockBackend {
    files: HashMap<String, StoredFile>,
    // upload id -> part etag -> (part number, data)
    uploads: HashMap<String, HashMap<String, (u32, Bytes)>>,
    // (upload id, part count) per successful commit
    completed_uploads: Vec<(String, usize)>,
    aborted_uploads: Vec<String>,
    next_upload_id: u32,
}

type Backend = Arc<Mutex<MockBackend>>;

#[derive(Debug, Deserialize)]
struct CompleteMultipartUpload {
    #[serde(rename = "Part", default)]
    parts: Vec<CompletePart>,
}

#[derive(Debug, Deserialize)]
struct CompletePart {
    #[serde(rename = "PartNumber")]
    part_number: u32,
    #[serde(rename = "ETag")]
    etag: String,
}

fn object_key(bucket: &str, key: &str) -> String {
    format!("{bucket}/{key}")
}

fn mock_etag(data: &[u8]) -> String {
    format!("\"{}\"", hex::encode(&Sha256::digest(data)[..16]))
}

async fn handle(
    State(state): State<Backend>,
    Path((bucket, key)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    // every request must arrive presigned
    if !query.contains_key("X-Amz-Signature") {
        return (StatusCode::FORBIDDEN, "request is not presigned").into_response();
    }
    if bucket == "forbidden" {
        return (StatusCode::FORBIDDEN, "access denied").into_response();
    }

    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();

    if method == Method::PUT {
        if let (Some(upload_id), Some(part_number)) =
            (query.get("uploadId"), query.get("partNumber"))
        {
            let part_number: u32 = part_number.parse().expect("part number");
            if key == "poison" && part_number == 2 {
                return (StatusCode::INTERNAL_SERVER_ERROR, "disk on fire").into_response();
            }

            let etag = format!("{upload_id}-p{part_number}");
            let mut state = state.lock().await;
            let Some(parts) = state.uploads.get_mut(upload_id) else {
                return (StatusCode::NOT_FOUND, "no such upload").into_response();
            };
            parts.insert(etag.clone(), (part_number, body));
            return (StatusCode::OK, [("ETag", etag)]).into_response();
        }

        if key == "reject" {
            return (StatusCode::IM_A_TEAPOT, "cannot store this").into_response();
        }

        let etag = mock_etag(&body);
        state
            .lock()
            .await
            .files
            .insert(object_key(&bucket, &key), StoredFile { content_type, data: body });
        return (StatusCode::OK, [("ETag", etag)]).into_response();
    }

    if method == Method::POST {
        if query.contains_key("uploads") {
            let mut state = state.lock().await;
            state.next_upload_id += 1;
            let upload_id = format!("upload-{}", state.next_upload_id);
            state.uploads.insert(upload_id.clone(), HashMap::new());

            let xml = format!(
                "<InitiateMultipartUploadResult><Bucket>{bucket}</Bucket>\
                 <Key>{key}</Key><UploadId>{upload_id}</UploadId>\
                 </InitiateMultipartUploadResult>"
            );
            return (StatusCode::OK, xml).into_response();
        }

        let Some(upload_id) = query.get("uploadId") else {
            return (StatusCode::NOT_IMPLEMENTED, "unsupported POST").into_response();
        };

        let request: CompleteMultipartUpload =
            quick_xml::de::from_reader(body.as_ref()).expect("commit xml");

        let mut state = state.lock().await;
        let Some(parts) = state.uploads.remove(upload_id) else {
            return (StatusCode::NOT_FOUND, "no such upload").into_response();
        };

        let mut assembled = Vec::new();
        let mut previous = 0u32;
        for part in &request.parts {
            // the backend rejects commits that are not strictly ascending
            if part.part_number <= previous {
                return (StatusCode::BAD_REQUEST, "parts out of order").into_response();
            }
            previous = part.part_number;

            let Some((_, data)) = parts.get(&part.etag) else {
                return (StatusCode::BAD_REQUEST, "unknown part etag").into_response();
            };
            assembled.extend_from_slice(data);
        }

        let data = Bytes::from(assembled);
        let etag = mock_etag(&data);
        state.completed_uploads.push((upload_id.clone(), request.parts.len()));
        state.files.insert(object_key(&bucket, &key), StoredFile { content_type, data });
        return (StatusCode::OK, [("ETag", etag)]).into_response();
    }

    if method == Method::DELETE {
        let Some(upload_id) = query.get("uploadId") else {
            return (StatusCode::NOT_IMPLEMENTED, "unsupported DELETE").into_response();
        };
        let mut state = state.lock().await;
        state.uploads.remove(upload_id);
        state.aborted_uploads.push(upload_id.clone());
        return StatusCode::NO_CONTENT.into_response();
    }

    if method == Method::GET {
        let state = state.lock().await;
        return match state.files.get(&object_key(&bucket, &key)) {
            Some(file) => (
                StatusCode::OK,
                [
                    ("Content-Type", file.content_type.clone()),
                    ("ETag", mock_etag(&file.data)),
                ],
                file.data.clone(),
            )
                .into_response(),
            None => (StatusCode::NOT_FOUND, "no such key").into_response(),
        };
    }

    (StatusCode::METHOD_NOT_ALLOWED, "unsupported method").into_response()
}

async fn start_backend() -> (String, Backend) {
    let state: Backend = Arc::new(Mutex::new(MockBackend::default()));

    let app = Router::new()
        .route("/{bucket}/{*key}", any(handle))
        .layer(DefaultBodyLimit::disable())
        .with_state(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (endpoint, state)
}

fn test_config(endpoint: &str, chunk_mb: u64) -> Config {
    Config {
        server_addr: "127.0.0.1:0".to_string(),
        endpoint: endpoint.to_string(),
        access_key: "access-key-id".to_string(),
        secret_key: "access-key-secret".to_string(),
        bucket: "testbucket".to_string(),
        upload_chunk_size_mb: chunk_mb,
        enc_key: vec![1u8; 32],
        hmac_key: vec![2u8; 32],
    }
}

fn rand_bytes(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut buf);
    buf
}

async fn upload(
    client: &BlobClient,
    key: &str,
    content_type: &str,
    data: Vec<u8>,
    chunk_size: u64,
) -> shroud_core::Result<shroud_core::ETag> {
    let content_length = data.len() as u64;
    let input = stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from(data))]);
    client.upload("testbucket", key, content_type, content_length, chunk_size, input).await
}

async fn verify_files_match(
    client: &BlobClient,
    key: &str,
    content_type: &str,
    data: Vec<u8>,
    chunk_size: u64,
) {
    let etag = upload(client, key, content_type, data.clone(), chunk_size).await.unwrap();
    assert!(!etag.is_empty(), "upload returned no etag");

    let file = client.get_file("testbucket", key).await.unwrap();
    assert_eq!(file.content_length, data.len() as u64);
    assert_eq!(file.content_type, content_type);

    let mut downloaded = Vec::new();
    file.into_reader().read_to_end(&mut downloaded).await.unwrap();
    assert_eq!(downloaded, data, "downloaded bytes differ from uploaded bytes");
}

#[tokio::test]
async fn test_simple_upload_download() {
    let (endpoint, state) = start_backend().await;
    let client = BlobClient::new(&test_config(&endpoint, 0)).unwrap();

    verify_files_match(&client, "hello.txt", "text/plain", b"hello world".to_vec(), 0).await;

    let state = state.lock().await;
    assert!(state.completed_uploads.is_empty(), "small upload must not use multipart");
}

#[tokio::test]
async fn test_chunked_upload_uses_multipart() {
    let (endpoint, state) = start_backend().await;
    let client = BlobClient::new(&test_config(&endpoint, 3)).unwrap();

    let data = rand_bytes(15 * MIB + 44);
    verify_files_match(&client, "rand.dat", "application/octet-stream", data, 3 * MIB as u64)
        .await;

    let state = state.lock().await;
    assert_eq!(state.completed_uploads.len(), 1, "expected exactly one multipart commit");
    let (_, parts) = &state.completed_uploads[0];
    assert!(*parts >= 5, "expected at least 5 parts, got {parts}");
    assert!(state.uploads.is_empty(), "backend still holds uncommitted parts");
}

#[tokio::test]
async fn test_missing_object_is_not_found() {
    let (endpoint, _) = start_backend().await;
    let client = BlobClient::new(&test_config(&endpoint, 0)).unwrap();

    let err = client.get_file("testbucket", "nope.txt").await.unwrap_err();
    assert!(matches!(err, Error::NotFound), "{err}");
}

#[tokio::test]
async fn test_forbidden_is_mapped() {
    let (endpoint, _) = start_backend().await;
    let client = BlobClient::new(&test_config(&endpoint, 0)).unwrap();

    let err = client.get_file("forbidden", "secret.txt").await.unwrap_err();
    assert!(matches!(err, Error::Forbidden), "{err}");
}

#[tokio::test]
async fn test_backend_error_carries_response_body() {
    let (endpoint, _) = start_backend().await;
    let client = BlobClient::new(&test_config(&endpoint, 0)).unwrap();

    let err = upload(&client, "reject", "text/plain", b"data".to_vec(), 0).await.unwrap_err();
    match err {
        Error::Backend { status, message } => {
            assert_eq!(status, 418);
            assert!(message.contains("cannot store this"), "{message}");
        }
        other => panic!("expected backend error, got {other}"),
    }
}

#[tokio::test]
async fn test_failed_part_aborts_the_upload() {
    let (endpoint, state) = start_backend().await;
    let client = BlobClient::new(&test_config(&endpoint, 3)).unwrap();

    let data = rand_bytes(15 * MIB + 44);
    let err = upload(&client, "poison", "application/octet-stream", data, 3 * MIB as u64)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PartUploadFailed(2)), "{err}");

    let state = state.lock().await;
    assert!(state.completed_uploads.is_empty(), "failed upload must not commit");
    assert_eq!(state.aborted_uploads.len(), 1, "failed upload must be aborted");
    assert!(state.uploads.is_empty(), "aborted upload left parts behind");
}
