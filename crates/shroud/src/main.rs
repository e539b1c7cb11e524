// Copyright 2026 The Shroud Authors
// SPDX-License-Identifier: Apache-2.0

//! Shroud: an encrypting gateway in front of an S3-compatible object store.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use shroud_api::{create_router, AppState};
use shroud_core::Config;
use shroud_store::BlobClient;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod cli;
mod keygen;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve => run_server().await,
        Commands::GenKeys => keygen::generate(),
        Commands::Version => {
            println!("shroud {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn run_server() -> Result<()> {
    let config = config_from_env();
    config.validate().context("invalid configuration")?;

    let client = BlobClient::new(&config).context("failed to create blob client")?;
    let state = Arc::new(AppState {
        client,
        bucket: config.bucket.clone(),
        chunk_size: config.chunk_size_bytes(),
        enc_key: config.enc_key.clone(),
        hmac_key: config.hmac_key.clone(),
    });

    let app = create_router(state);

    let listener = TcpListener::bind(&config.server_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server_addr))?;

    info!("file server started at {}", config.server_addr);
    info!("- PUT /files/{{name}}");
    info!("- GET /files/{{name}}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("server shutdown complete");
    Ok(())
}

fn config_from_env() -> Config {
    Config {
        server_addr: env_or_empty("SERVER_ADDR"),
        endpoint: env_or_empty("MINIO_ENDPOINT"),
        access_key: env_or_empty("MINIO_ACCESS_KEY"),
        secret_key: env_or_empty("MINIO_SECRET_KEY"),
        bucket: env_or_empty("MINIO_BUCKET_NAME"),
        // unparsable chunk sizes disable chunking
        upload_chunk_size_mb: std::env::var("UPLOAD_CHUNK_SIZE_MB")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        enc_key: hex_env("ENC_KEY"),
        hmac_key: hex_env("HMAC_KEY"),
    }
}

fn env_or_empty(name: &str) -> String {
    std::env::var(name).unwrap_or_default()
}

/// Hex-decodes a key from the environment. Decode errors yield empty
/// bytes, which config validation then rejects with a clear message.
fn hex_env(name: &str) -> Vec<u8> {
    std::env::var(name).ok().and_then(|v| hex::decode(v).ok()).unwrap_or_default()
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry().with(filter).with(tracing_subscriber::fmt::layer()).init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received Ctrl+C, shutting down");
        }
        _ = terminate => {
            info!("received SIGTERM, shutting down");
        }
    }
}
