// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Shared HTTP utilities for the Loom flag sync SDK.
//!
//! This crate provides:
//! - A pre-configured HTTP client whose User-Agent identifies the SDK
//! - Capped exponential backoff with jitter for reconnect loops

mod backoff;
mod client;

pub use backoff::{Backoff, BackoffConfig};
pub use client::{builder, new_client_with_timeout, user_agent, SDK_NAME, SDK_VERSION};
