// Copyright 2026 The Shroud Authors
// SPDX-License-Identifier: Apache-2.0

//! Core types for Shroud, an encrypting gateway in front of an
//! S3-compatible object store.

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use types::ETag;
