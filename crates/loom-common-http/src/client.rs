// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Shared HTTP client with a consistent User-Agent header.
//!
//! The User-Agent doubles as the client identifier the flag service reads
//! during the streaming handshake and on every pull request.

use reqwest::{Client, ClientBuilder};
use std::time::Duration;

/// SDK name reported in the User-Agent.
pub const SDK_NAME: &str = "loom-flagsync-rust";
/// SDK version reported in the User-Agent.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Creates a new HTTP client builder with the SDK User-Agent header.
///
/// Use this when you need to customize the client (e.g., set a connect timeout).
///
/// # Example
/// ```ignore
/// let client = loom_common_http::builder()
///     .connect_timeout(Duration::from_secs(10))
///     .build()?;
/// ```
pub fn builder() -> ClientBuilder {
	Client::builder().user_agent(user_agent())
}

/// Creates a new HTTP client with a total request timeout and the SDK User-Agent.
pub fn new_client_with_timeout(timeout: Duration) -> reqwest::Result<Client> {
	builder().timeout(timeout).build()
}

/// Returns the SDK User-Agent string.
///
/// Format: `{sdk_name}/{version}`
pub fn user_agent() -> String {
	format!("{SDK_NAME}/{SDK_VERSION}")
}
