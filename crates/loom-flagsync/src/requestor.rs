// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Pull requests for single items and for the full dataset.
//!
//! Used by the polling processor and to resolve indirect stream events.
//! Requests are never retried here; the caller decides what a failure means.

use std::time::Duration;

use loom_flagsync_core::{DataKind, FullDataSet, Item};
use reqwest::Client;
use tracing::debug;

use crate::error::{Result, SyncError};

/// Path prefix shared by every pull endpoint.
const SDK_PATH: &str = "sdk";

/// Fetches raw flag data from the pull endpoints.
#[derive(Debug, Clone)]
pub struct Requestor {
	base_url: String,
	sdk_key: String,
	http_client: Client,
}

impl Requestor {
	/// Creates a requestor whose requests time out after `request_timeout`.
	pub fn new(
		base_url: impl Into<String>,
		sdk_key: impl Into<String>,
		request_timeout: Duration,
	) -> Result<Self> {
		let base_url = base_url.into().trim_end_matches('/').to_string();
		let http_client = loom_common_http::new_client_with_timeout(request_timeout).map_err(|e| {
			SyncError::Network {
				target: base_url.clone(),
				source: e,
			}
		})?;

		Ok(Self {
			base_url,
			sdk_key: sdk_key.into(),
			http_client,
		})
	}

	/// URL of a single item of `kind`.
	pub fn object_url(&self, kind: DataKind, key: &str) -> String {
		format!(
			"{}/{}/{}/{}",
			self.base_url,
			SDK_PATH,
			kind.request_path(),
			key
		)
	}

	/// URL of the full dataset.
	pub fn all_data_url(&self) -> String {
		format!("{}/{}/latest-all", self.base_url, SDK_PATH)
	}

	/// Fetches the serialized item `key` of `kind`.
	pub async fn request_object(&self, kind: DataKind, key: &str) -> Result<String> {
		self.get(self.object_url(kind, key)).await
	}

	/// Fetches the serialized full dataset.
	pub async fn request_all_data(&self) -> Result<String> {
		self.get(self.all_data_url()).await
	}

	/// Fetches and parses the item `key` of `kind`.
	pub async fn get_object(&self, kind: DataKind, key: &str) -> Result<Item> {
		let body = self.request_object(kind, key).await?;
		let mut item: Item = serde_json::from_str(&body).map_err(SyncError::malformed)?;
		if item.key.is_empty() {
			item.key = key.to_string();
		}
		Ok(item)
	}

	/// Fetches and parses the full dataset.
	pub async fn get_all_data(&self) -> Result<FullDataSet> {
		let body = self.request_all_data().await?;
		serde_json::from_str(&body).map_err(SyncError::malformed)
	}

	async fn get(&self, url: String) -> Result<String> {
		debug!(url = %url, "Requesting flag data");

		let response = self
			.http_client
			.get(&url)
			.header("Authorization", &self.sdk_key)
			.header("Accept", "application/json")
			.send()
			.await
			.map_err(|e| network_error(&url, e))?;

		let status = response.status();
		if !status.is_success() {
			return Err(SyncError::Http {
				status: status.as_u16(),
				target: url,
			});
		}

		response.text().await.map_err(|e| network_error(&url, e))
	}
}

fn network_error(url: &str, e: reqwest::Error) -> SyncError {
	if e.is_timeout() {
		SyncError::Timeout {
			target: url.to_string(),
		}
	} else {
		SyncError::Network {
			target: url.to_string(),
			source: e,
		}
	}
}
