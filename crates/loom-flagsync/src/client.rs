// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Flag sync client that keeps a local replica of flags and segments.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use loom_flagsync_core::{DataKind, Item};
use reqwest::Url;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::data_source::{ConnectionState, DataSource};
use crate::error::{Result, SyncError};
use crate::polling::{PollingProcessor, MIN_POLL_INTERVAL};
use crate::ready::ready_channel;
use crate::requestor::Requestor;
use crate::sse::{StreamConfig, StreamProcessor};
use crate::store::{DataStore, InMemoryDataStore, SharedDataStore};

/// Default base URL for pull requests.
pub const DEFAULT_BASE_URL: &str = "https://sdk.loom.dev";

/// Default base URL for the event stream.
pub const DEFAULT_STREAM_BASE_URL: &str = "https://stream.loom.dev";

/// Configuration for the sync client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
	/// How long `build` waits for the first dataset.
	pub start_wait: Duration,
	/// Timeout for individual pull requests.
	pub request_timeout: Duration,
	/// Whether to stream updates. Polls when false.
	pub stream: bool,
	/// Interval between polls when not streaming.
	pub poll_interval: Duration,
	/// Read a store populated by another process and never connect.
	pub daemon_mode: bool,
	/// Stream connection configuration.
	pub stream_config: StreamConfig,
}

impl Default for ClientConfig {
	fn default() -> Self {
		Self {
			start_wait: Duration::from_secs(5),
			request_timeout: Duration::from_secs(10),
			stream: true,
			poll_interval: MIN_POLL_INTERVAL,
			daemon_mode: false,
			stream_config: StreamConfig::default(),
		}
	}
}

/// Builder for constructing a SyncClient.
pub struct SyncClientBuilder {
	sdk_key: Option<String>,
	base_url: String,
	stream_base_url: String,
	data_store: Option<SharedDataStore>,
	config: ClientConfig,
}

impl SyncClientBuilder {
	/// Creates a new builder with default settings.
	pub fn new() -> Self {
		Self {
			sdk_key: None,
			base_url: DEFAULT_BASE_URL.to_string(),
			stream_base_url: DEFAULT_STREAM_BASE_URL.to_string(),
			data_store: None,
			config: ClientConfig::default(),
		}
	}

	/// Sets the SDK key sent in the `Authorization` header.
	pub fn sdk_key(mut self, key: impl Into<String>) -> Self {
		self.sdk_key = Some(key.into());
		self
	}

	/// Sets the base URL for pull requests.
	pub fn base_url(mut self, url: impl Into<String>) -> Self {
		self.base_url = url.into();
		self
	}

	/// Sets the base URL of the event stream.
	pub fn stream_base_url(mut self, url: impl Into<String>) -> Self {
		self.stream_base_url = url.into();
		self
	}

	/// Enables streaming, or polling when `false`.
	pub fn stream(mut self, enable: bool) -> Self {
		self.config.stream = enable;
		self
	}

	/// Sets the store the client writes to and reads from.
	///
	/// Defaults to a fresh [`InMemoryDataStore`].
	pub fn data_store(mut self, store: SharedDataStore) -> Self {
		self.data_store = Some(store);
		self
	}

	/// Never connects; reads whatever another process keeps in the store.
	pub fn daemon_mode(mut self, enable: bool) -> Self {
		self.config.daemon_mode = enable;
		self
	}

	/// Sets how long `build` waits for the first dataset.
	pub fn start_wait(mut self, wait: Duration) -> Self {
		self.config.start_wait = wait;
		self
	}

	/// Sets the stream configuration.
	pub fn stream_config(mut self, config: StreamConfig) -> Self {
		self.config.stream_config = config;
		self
	}

	/// Sets the polling interval. Values below 30 seconds are raised to 30.
	pub fn poll_interval(mut self, interval: Duration) -> Self {
		self.config.poll_interval = interval.max(MIN_POLL_INTERVAL);
		self
	}

	/// Sets the timeout for pull requests.
	pub fn request_timeout(mut self, timeout: Duration) -> Self {
		self.config.request_timeout = timeout;
		self
	}

	/// Builds the client and starts synchronizing.
	///
	/// Waits up to `start_wait` for the first dataset. Running out of time is
	/// not an error: the client is returned uninitialized and keeps trying in
	/// the background. Only an unrecoverable failure, such as a rejected SDK
	/// key, is returned.
	pub async fn build(self) -> Result<SyncClient> {
		let sdk_key = self
			.sdk_key
			.filter(|key| !key.trim().is_empty())
			.ok_or(SyncError::InvalidSdkKey)?;
		let base_url = normalize_url(&self.base_url)?;
		let stream_base_url = normalize_url(&self.stream_base_url)?;

		let store: SharedDataStore = self
			.data_store
			.unwrap_or_else(|| Arc::new(InMemoryDataStore::new()));

		if self.config.daemon_mode {
			info!("Sync client started in daemon mode");
			return Ok(SyncClient {
				store,
				data_source: None,
				config: self.config,
				closed: AtomicBool::new(false),
			});
		}

		let requestor = Requestor::new(&base_url, &sdk_key, self.config.request_timeout)?;
		let data_source: Arc<dyn DataSource> = if self.config.stream {
			Arc::new(StreamProcessor::new(
				&stream_base_url,
				&sdk_key,
				Arc::clone(&store),
				requestor,
				self.config.stream_config.clone(),
			)?)
		} else {
			Arc::new(PollingProcessor::new(
				requestor,
				Arc::clone(&store),
				self.config.poll_interval,
			))
		};

		let (on_ready, waiter) = ready_channel();
		data_source.start(on_ready);

		match tokio::time::timeout(self.config.start_wait, waiter.wait()).await {
			Ok(Ok(())) => info!(stream = self.config.stream, "Sync client initialized"),
			Ok(Err(e)) if !e.is_recoverable() => {
				data_source.close().await;
				return Err(e);
			}
			Ok(Err(e)) => {
				warn!(error = %e, "Sync client failed to initialize, retrying in background");
			}
			Err(_) => {
				warn!(
					wait_ms = self.config.start_wait.as_millis() as u64,
					"Sync client not initialized in time, continuing in background"
				);
			}
		}

		Ok(SyncClient {
			store,
			data_source: Some(data_source),
			config: self.config,
			closed: AtomicBool::new(false),
		})
	}
}

impl Default for SyncClientBuilder {
	fn default() -> Self {
		Self::new()
	}
}

fn normalize_url(raw: &str) -> Result<String> {
	let trimmed = raw.trim().trim_end_matches('/');
	let url = Url::parse(trimmed).map_err(|_| SyncError::InvalidBaseUrl)?;
	if !matches!(url.scheme(), "http" | "https") || !url.has_host() {
		return Err(SyncError::InvalidBaseUrl);
	}
	Ok(trimmed.to_string())
}

/// Read-only view of the replicated flags and segments.
///
/// A background data source keeps the store current; every read is served
/// locally.
pub struct SyncClient {
	store: SharedDataStore,
	data_source: Option<Arc<dyn DataSource>>,
	config: ClientConfig,
	closed: AtomicBool,
}

impl SyncClient {
	/// Creates a new builder for constructing a SyncClient.
	pub fn builder() -> SyncClientBuilder {
		SyncClientBuilder::new()
	}

	/// Returns the live item `key` of `kind`, if any.
	pub async fn get(&self, kind: DataKind, key: &str) -> Result<Option<Item>> {
		self.check_closed()?;
		self.store.get(kind, key).await
	}

	/// Returns every live item of `kind`.
	pub async fn all(&self, kind: DataKind) -> Result<HashMap<String, Item>> {
		self.check_closed()?;
		self.store.all(kind).await
	}

	/// Returns true once the store holds a full dataset.
	pub async fn initialized(&self) -> Result<bool> {
		self.check_closed()?;
		self.store.initialized().await
	}

	/// Current state of the data source. Daemon mode reports `Idle`.
	pub fn connection_state(&self) -> ConnectionState {
		match &self.data_source {
			Some(source) => source.state(),
			None if self.closed.load(Ordering::SeqCst) => ConnectionState::Closed,
			None => ConnectionState::Idle,
		}
	}

	/// Observes data source state changes. `None` in daemon mode.
	pub fn subscribe_state(&self) -> Option<watch::Receiver<ConnectionState>> {
		self.data_source.as_ref().map(|source| source.subscribe_state())
	}

	pub fn config(&self) -> &ClientConfig {
		&self.config
	}

	fn check_closed(&self) -> Result<()> {
		if self.closed.load(Ordering::SeqCst) {
			return Err(SyncError::ClientClosed);
		}
		Ok(())
	}

	/// Closes the data source, then the store. Later calls do nothing.
	pub async fn close(&self) {
		if self.closed.swap(true, Ordering::SeqCst) {
			return;
		}
		if let Some(source) = &self.data_source {
			source.close().await;
		}
		if let Err(e) = self.store.close().await {
			warn!(error = %e, "Failed to close data store");
		}
		info!("Sync client closed");
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use loom_flagsync_core::FullDataSet;
	use wiremock::matchers::method;
	use wiremock::{Mock, MockServer, ResponseTemplate};

	#[test]
	fn test_config_defaults() {
		let config = ClientConfig::default();
		assert_eq!(config.start_wait, Duration::from_secs(5));
		assert_eq!(config.request_timeout, Duration::from_secs(10));
		assert_eq!(config.poll_interval, Duration::from_secs(30));
		assert!(config.stream);
		assert!(!config.daemon_mode);
	}

	#[test]
	fn test_builder_requires_sdk_key() {
		let result = tokio_test::block_on(async { SyncClientBuilder::new().build().await });
		assert!(matches!(result, Err(SyncError::InvalidSdkKey)));

		let result =
			tokio_test::block_on(async { SyncClientBuilder::new().sdk_key("  ").build().await });
		assert!(matches!(result, Err(SyncError::InvalidSdkKey)));
	}

	#[test]
	fn test_builder_rejects_invalid_base_url() {
		for url in ["", "not a url", "ftp://example.com", "https://"] {
			let result = tokio_test::block_on(async {
				SyncClientBuilder::new()
					.sdk_key("sdk-key")
					.base_url(url)
					.daemon_mode(true)
					.build()
					.await
			});
			assert!(
				matches!(result, Err(SyncError::InvalidBaseUrl)),
				"{url:?} should be rejected"
			);
		}
	}

	#[test]
	fn test_normalize_url_trims_trailing_slashes() {
		assert_eq!(
			normalize_url("https://sdk.example.com//").unwrap(),
			"https://sdk.example.com"
		);
		assert_eq!(
			normalize_url("http://localhost:8080/relay/").unwrap(),
			"http://localhost:8080/relay"
		);
	}

	#[test]
	fn test_poll_interval_has_a_floor() {
		let builder = SyncClientBuilder::new().poll_interval(Duration::from_secs(1));
		assert_eq!(builder.config.poll_interval, MIN_POLL_INTERVAL);

		let builder = SyncClientBuilder::new().poll_interval(Duration::from_secs(90));
		assert_eq!(builder.config.poll_interval, Duration::from_secs(90));
	}

	#[tokio::test]
	async fn test_daemon_mode_reads_existing_store() {
		let store = Arc::new(InMemoryDataStore::new());
		store
			.init(FullDataSet::new().with_item(DataKind::Features, Item::new("flagkey", 4)))
			.await
			.unwrap();

		let client = SyncClient::builder()
			.sdk_key("sdk-key")
			.data_store(store)
			.daemon_mode(true)
			.build()
			.await
			.unwrap();

		assert!(client.initialized().await.unwrap());
		assert_eq!(client.connection_state(), ConnectionState::Idle);
		assert!(client.subscribe_state().is_none());
		let item = client.get(DataKind::Features, "flagkey").await.unwrap().unwrap();
		assert_eq!(item.version, 4);
	}

	#[tokio::test]
	async fn test_close_is_idempotent_and_blocks_reads() {
		let client = SyncClient::builder()
			.sdk_key("sdk-key")
			.daemon_mode(true)
			.build()
			.await
			.unwrap();

		client.close().await;
		client.close().await;

		assert!(matches!(
			client.get(DataKind::Segments, "x").await,
			Err(SyncError::ClientClosed)
		));
		assert!(matches!(
			client.all(DataKind::Features).await,
			Err(SyncError::ClientClosed)
		));
		assert!(matches!(client.initialized().await, Err(SyncError::ClientClosed)));
		assert_eq!(client.connection_state(), ConnectionState::Closed);
	}

	#[tokio::test]
	async fn test_start_wait_expiry_returns_uninitialized_client() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.respond_with(ResponseTemplate::new(503))
			.mount(&server)
			.await;

		let client = SyncClient::builder()
			.sdk_key("sdk-key")
			.base_url(server.uri())
			.stream_base_url(server.uri())
			.start_wait(Duration::from_millis(200))
			.build()
			.await
			.unwrap();

		assert!(!client.initialized().await.unwrap());
		assert!(!client.connection_state().is_terminal());

		client.close().await;
		assert_eq!(client.connection_state(), ConnectionState::Closed);
	}

	#[tokio::test]
	async fn test_rejected_key_fails_build() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.respond_with(ResponseTemplate::new(401))
			.mount(&server)
			.await;

		let result = SyncClient::builder()
			.sdk_key("sdk-key")
			.base_url(server.uri())
			.stream_base_url(server.uri())
			.build()
			.await;

		match result {
			Err(SyncError::Http { status, .. }) => assert_eq!(status, 401),
			Err(other) => panic!("expected 401, got {other:?}"),
			Ok(_) => panic!("expected 401, got a client"),
		}
	}
}
