// Copyright 2026 The Shroud Authors
// SPDX-License-Identifier: Apache-2.0

//! Backend plumbing for the shroud gateway: SigV4 presigned URLs, the
//! streaming encryption pipeline, and the blob client with its
//! multipart upload coordinator.

pub mod client;
pub mod crypto;
pub mod multipart;
pub mod presign;

pub use client::{BlobClient, RemoteObject};
pub use presign::Presigner;
