// Copyright 2026 The Shroud Authors
// SPDX-License-Identifier: Apache-2.0

//! HTTP surface for the shroud gateway: two routes that compose the
//! crypto pipeline with the blob client.

pub mod error;
pub mod handlers;
pub mod router;

pub use handlers::AppState;
pub use router::create_router;
