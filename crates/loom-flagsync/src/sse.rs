// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! SSE (Server-Sent Events) connection for real-time flag updates.
//!
//! This module keeps one long-lived connection to the streaming endpoint,
//! applies every event to the data store in arrival order, and reconnects with
//! jittered exponential backoff until the owner closes it or the server
//! rejects the SDK key.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use eventsource_stream::{Event, EventStreamError, Eventsource};
use futures::{Stream, StreamExt};
use loom_common_http::{Backoff, BackoffConfig};
use loom_flagsync_core::{
	parse_stream_path, DataKind, DeleteData, FullDataSet, PatchData, PutData, StreamEventKind,
};
use reqwest::Client;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::data_source::{report_processing_error, ConnectionState, DataSource, StateTracker};
use crate::error::{Result, SyncError};
use crate::ready::ReadyNotifier;
use crate::requestor::Requestor;
use crate::store::SharedDataStore;

/// Path of the streaming endpoint under the stream base URL.
const STREAM_PATH: &str = "/all";

/// Configuration for stream connection behavior.
#[derive(Debug, Clone)]
pub struct StreamConfig {
	/// Delay before the first reconnect attempt.
	pub initial_reconnect_delay: Duration,
	/// Upper bound for the reconnect delay.
	pub max_reconnect_delay: Duration,
	/// Time allowed for the handshake.
	pub connect_timeout: Duration,
	/// Longest silence tolerated on an open stream before reconnecting.
	pub read_timeout: Duration,
}

impl Default for StreamConfig {
	fn default() -> Self {
		Self {
			initial_reconnect_delay: Duration::from_secs(1),
			max_reconnect_delay: Duration::from_secs(30),
			connect_timeout: Duration::from_secs(10),
			read_timeout: Duration::from_secs(300),
		}
	}
}

impl StreamConfig {
	fn backoff(&self) -> BackoffConfig {
		BackoffConfig {
			initial_delay: self.initial_reconnect_delay,
			max_delay: self.max_reconnect_delay,
			jitter: true,
		}
	}
}

/// Streams flag updates into a data store.
pub struct StreamProcessor {
	stream_url: String,
	sdk_key: String,
	http_client: Client,
	store: SharedDataStore,
	requestor: Requestor,
	config: StreamConfig,
	state: StateTracker,
	started: AtomicBool,
	cancel: CancellationToken,
	/// Handle to the background task.
	task_handle: Mutex<Option<JoinHandle<()>>>,
	/// Number of events received.
	events_received: Arc<AtomicU64>,
	/// Number of reconnection attempts.
	reconnect_attempts: Arc<AtomicU64>,
}

impl std::fmt::Debug for StreamProcessor {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("StreamProcessor")
			.field("stream_url", &self.stream_url)
			.field("config", &self.config)
			.field("state", &self.state.get())
			.finish_non_exhaustive()
	}
}

impl StreamProcessor {
	/// Creates a processor for the stream under `stream_base_url`.
	pub fn new(
		stream_base_url: &str,
		sdk_key: impl Into<String>,
		store: SharedDataStore,
		requestor: Requestor,
		config: StreamConfig,
	) -> Result<Self> {
		let stream_url = format!("{}{}", stream_base_url.trim_end_matches('/'), STREAM_PATH);
		let http_client = loom_common_http::builder()
			.connect_timeout(config.connect_timeout)
			.build()
			.map_err(|e| SyncError::Network {
				target: stream_url.clone(),
				source: e,
			})?;

		Ok(Self {
			stream_url,
			sdk_key: sdk_key.into(),
			http_client,
			store,
			requestor,
			config,
			state: StateTracker::new(),
			started: AtomicBool::new(false),
			cancel: CancellationToken::new(),
			task_handle: Mutex::new(None),
			events_received: Arc::new(AtomicU64::new(0)),
			reconnect_attempts: Arc::new(AtomicU64::new(0)),
		})
	}

	/// Full URL of the streaming endpoint.
	pub fn stream_url(&self) -> &str {
		&self.stream_url
	}

	/// Returns the number of events received since the processor was started.
	pub fn events_received(&self) -> u64 {
		self.events_received.load(Ordering::SeqCst)
	}

	/// Returns the number of reconnection attempts since the processor was started.
	pub fn reconnect_attempts(&self) -> u64 {
		self.reconnect_attempts.load(Ordering::SeqCst)
	}

	fn take_handle(&self) -> Option<JoinHandle<()>> {
		match self.task_handle.lock() {
			Ok(mut slot) => slot.take(),
			Err(poisoned) => poisoned.into_inner().take(),
		}
	}
}

#[async_trait]
impl DataSource for StreamProcessor {
	fn start(&self, on_ready: ReadyNotifier) {
		if self.cancel.is_cancelled() {
			on_ready.notify(Err(SyncError::ClientClosed));
			return;
		}
		if self.started.swap(true, Ordering::SeqCst) {
			debug!(url = %self.stream_url, "Stream processor already started");
			return;
		}

		self.state.set(ConnectionState::Connecting);

		let ctx = StreamContext {
			store: Arc::clone(&self.store),
			requestor: self.requestor.clone(),
			on_ready,
			state: self.state.clone(),
			cancel: self.cancel.clone(),
		};
		let connection = Connection {
			url: self.stream_url.clone(),
			sdk_key: self.sdk_key.clone(),
			http_client: self.http_client.clone(),
			config: self.config.clone(),
			events_received: Arc::clone(&self.events_received),
			reconnect_attempts: Arc::clone(&self.reconnect_attempts),
		};

		let handle = tokio::spawn(run_stream_loop(connection, ctx));

		match self.task_handle.lock() {
			Ok(mut slot) => *slot = Some(handle),
			Err(poisoned) => *poisoned.into_inner() = Some(handle),
		}
	}

	async fn close(&self) {
		self.cancel.cancel();
		if let Some(handle) = self.take_handle() {
			handle.abort();
			let _ = handle.await;
		}
		if self.state.get() != ConnectionState::Closed {
			info!(url = %self.stream_url, "Stream processor closed");
		}
		self.state.set(ConnectionState::Closed);
	}

	fn state(&self) -> ConnectionState {
		self.state.get()
	}

	fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
		self.state.subscribe()
	}
}

impl Drop for StreamProcessor {
	fn drop(&mut self) {
		self.cancel.cancel();
		if let Some(handle) = self.take_handle() {
			handle.abort();
		}
	}
}

/// Everything an event handler needs. Cloned into indirect fetch tasks.
#[derive(Clone)]
struct StreamContext {
	store: SharedDataStore,
	requestor: Requestor,
	on_ready: ReadyNotifier,
	state: StateTracker,
	cancel: CancellationToken,
}

impl StreamContext {
	async fn apply_put(&self, data: FullDataSet) -> Result<()> {
		let flags = data.item_count(DataKind::Features);
		let segments = data.item_count(DataKind::Segments);
		self.store.init(data).await?;
		info!(flags, segments, "Store initialized from stream");
		self.on_ready.notify(Ok(()));
		Ok(())
	}

	async fn fail(&self, err: SyncError) {
		report_processing_error(self.store.as_ref(), &self.on_ready, err).await;
	}

	/// Runs an indirect fetch unless the stream is shut down first.
	fn spawn_fetch<F>(&self, fetch: F)
	where
		F: std::future::Future<Output = Result<()>> + Send + 'static,
	{
		let ctx = self.clone();
		tokio::spawn(async move {
			tokio::select! {
				_ = ctx.cancel.cancelled() => {}
				result = fetch => {
					if let Err(e) = result {
						ctx.fail(e).await;
					}
				}
			}
		});
	}
}

/// Per-connection settings owned by the background task.
struct Connection {
	url: String,
	sdk_key: String,
	http_client: Client,
	config: StreamConfig,
	events_received: Arc<AtomicU64>,
	reconnect_attempts: Arc<AtomicU64>,
}

/// Runs the stream connection loop with reconnection logic.
async fn run_stream_loop(connection: Connection, ctx: StreamContext) {
	let mut backoff = Backoff::new(connection.config.backoff());

	loop {
		info!(url = %connection.url, "Connecting to event stream");

		let result = tokio::select! {
			_ = ctx.cancel.cancelled() => {
				info!("Stream processor received shutdown signal");
				break;
			}
			result = connect_and_process(&connection, &ctx, &mut backoff) => result,
		};

		let err = match result {
			Ok(()) => SyncError::Stream("stream closed by server".to_string()),
			Err(e) => e,
		};

		if !err.is_recoverable() {
			error!(
				url = %connection.url,
				status = ?err.status(),
				error = %err,
				"Stream connection rejected, not retrying"
			);
			ctx.on_ready.notify(Err(err));
			ctx.state.set(ConnectionState::Failed);
			break;
		}

		warn!(url = %connection.url, error = %err, "Stream connection error");
		ctx.state.set(ConnectionState::Reconnecting);

		let delay = backoff.next_delay();
		connection.reconnect_attempts.fetch_add(1, Ordering::SeqCst);
		warn!(
			delay_ms = delay.as_millis() as u64,
			attempts = backoff.failures(),
			"Reconnecting to event stream"
		);

		tokio::select! {
			_ = tokio::time::sleep(delay) => {}
			_ = ctx.cancel.cancelled() => {
				info!("Stream processor received shutdown signal during reconnect wait");
				break;
			}
		}
	}
}

/// Connects to the stream and processes events until disconnection.
async fn connect_and_process(
	connection: &Connection,
	ctx: &StreamContext,
	backoff: &mut Backoff,
) -> Result<()> {
	let request = connection
		.http_client
		.get(&connection.url)
		.header("Authorization", &connection.sdk_key)
		.header("Accept", "text/event-stream")
		.header("Cache-Control", "no-cache");

	let response = tokio::time::timeout(connection.config.connect_timeout, request.send())
		.await
		.map_err(|_| SyncError::Timeout {
			target: connection.url.clone(),
		})?
		.map_err(|e| SyncError::Network {
			target: connection.url.clone(),
			source: e,
		})?;

	let status = response.status();
	if !status.is_success() {
		return Err(SyncError::Http {
			status: status.as_u16(),
			target: connection.url.clone(),
		});
	}

	backoff.reset();
	ctx.state.set(ConnectionState::Connected);
	info!(url = %connection.url, "Stream connection established");

	let bytes = with_read_timeout(
		Box::pin(response.bytes_stream()),
		connection.config.read_timeout,
		connection.url.clone(),
	);
	let mut event_stream = Box::pin(bytes.eventsource());

	while let Some(event_result) = event_stream.next().await {
		match event_result {
			Ok(event) => {
				connection.events_received.fetch_add(1, Ordering::SeqCst);
				match process_event(event, ctx).await {
					Ok(()) => backoff.reset(),
					Err(e) => ctx.fail(e).await,
				}
			}
			Err(EventStreamError::Transport(e)) => return Err(e),
			Err(e) => return Err(SyncError::Stream(e.to_string())),
		}
	}

	Ok(())
}

/// Fails the byte stream once it stays silent for `read_timeout`.
///
/// Applied below the SSE parser so comment heartbeats count as activity.
fn with_read_timeout<S>(
	stream: S,
	read_timeout: Duration,
	url: String,
) -> impl Stream<Item = Result<Bytes>>
where
	S: Stream<Item = reqwest::Result<Bytes>> + Unpin,
{
	futures::stream::unfold(Some(stream), move |state| {
		let url = url.clone();
		async move {
			let mut stream = match state {
				Some(stream) => stream,
				None => return None,
			};
			match tokio::time::timeout(read_timeout, stream.next()).await {
				Ok(Some(Ok(chunk))) => Some((Ok(chunk), Some(stream))),
				Ok(Some(Err(e))) => Some((Err(SyncError::Stream(e.to_string())), None)),
				Ok(None) => None,
				Err(_) => {
					debug!(url = %url, timeout_secs = read_timeout.as_secs(), "Stream went silent");
					Some((Err(SyncError::Timeout { target: url }), None))
				}
			}
		}
	})
}

/// Processes a single SSE event and updates the store.
async fn process_event(event: Event, ctx: &StreamContext) -> Result<()> {
	let Some(kind) = StreamEventKind::from_name(&event.event) else {
		debug!(event_type = %event.event, "Ignoring unknown stream event");
		return Ok(());
	};

	debug!(event_type = kind.name(), "Processing stream event");

	match kind {
		StreamEventKind::Put => {
			let put: PutData = parse(&event.data)?;
			// A put always carries the full dataset, whatever its path says.
			if put.path != "/" {
				warn!(path = %put.path, "Applying put with unexpected path as a full replace");
			}
			ctx.apply_put(put.data).await?;
		}
		StreamEventKind::Patch => {
			let patch: PatchData = parse(&event.data)?;
			let path = patch.path.clone();
			let Some((kind, item)) = patch.into_target() else {
				debug!(path = %path, "Ignoring patch for unknown path");
				return Ok(());
			};
			let key = item.key.clone();
			let version = item.version;
			let applied = ctx.store.upsert(kind, item).await?;
			debug!(kind = %kind, key = %key, version, applied, "Patch processed");
		}
		StreamEventKind::Delete => {
			let delete: DeleteData = parse(&event.data)?;
			let Some((kind, key)) = delete.target() else {
				debug!(path = %delete.path, "Ignoring delete for unknown path");
				return Ok(());
			};
			let applied = ctx.store.delete(kind, key, delete.version).await?;
			debug!(kind = %kind, key = %key, version = delete.version, applied, "Delete processed");
		}
		StreamEventKind::IndirectPut => {
			let fetch_ctx = ctx.clone();
			ctx.spawn_fetch(async move {
				let data = fetch_ctx.requestor.get_all_data().await?;
				fetch_ctx.apply_put(data).await
			});
		}
		StreamEventKind::IndirectPatch => {
			let path = event.data.trim();
			let Some((kind, key)) = parse_stream_path(path) else {
				debug!(path = %path, "Ignoring indirect patch for unknown path");
				return Ok(());
			};
			let key = key.to_string();
			let fetch_ctx = ctx.clone();
			ctx.spawn_fetch(async move {
				let item = fetch_ctx.requestor.get_object(kind, &key).await?;
				let version = item.version;
				let applied = fetch_ctx.store.upsert(kind, item).await?;
				debug!(kind = %kind, key = %key, version, applied, "Indirect patch processed");
				Ok(())
			});
		}
	}

	Ok(())
}

fn parse<T: serde::de::DeserializeOwned>(data: &str) -> Result<T> {
	serde_json::from_str(data).map_err(|e| {
		debug!(data = %data, "Unparseable stream payload");
		SyncError::malformed(e)
	})
}
