// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Periodic full-dataset polling, used when streaming is turned off.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::data_source::{report_processing_error, ConnectionState, DataSource, StateTracker};
use crate::error::SyncError;
use crate::ready::ReadyNotifier;
use crate::requestor::Requestor;
use crate::store::SharedDataStore;

/// Shortest interval the client accepts between polls.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Replaces the store contents with a fresh dataset on every tick.
pub struct PollingProcessor {
	requestor: Requestor,
	store: SharedDataStore,
	poll_interval: Duration,
	state: StateTracker,
	started: AtomicBool,
	cancel: CancellationToken,
	task_handle: Mutex<Option<JoinHandle<()>>>,
	polls: Arc<AtomicU64>,
}

impl std::fmt::Debug for PollingProcessor {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("PollingProcessor")
			.field("poll_interval", &self.poll_interval)
			.field("state", &self.state.get())
			.finish_non_exhaustive()
	}
}

impl PollingProcessor {
	/// Creates a processor polling every `poll_interval`.
	///
	/// The interval is used as given; [`SyncClientBuilder`](crate::SyncClientBuilder)
	/// enforces [`MIN_POLL_INTERVAL`].
	pub fn new(requestor: Requestor, store: SharedDataStore, poll_interval: Duration) -> Self {
		Self {
			requestor,
			store,
			poll_interval,
			state: StateTracker::new(),
			started: AtomicBool::new(false),
			cancel: CancellationToken::new(),
			task_handle: Mutex::new(None),
			polls: Arc::new(AtomicU64::new(0)),
		}
	}

	pub fn poll_interval(&self) -> Duration {
		self.poll_interval
	}

	/// Number of successful polls so far.
	pub fn polls(&self) -> u64 {
		self.polls.load(Ordering::SeqCst)
	}

	fn take_handle(&self) -> Option<JoinHandle<()>> {
		match self.task_handle.lock() {
			Ok(mut slot) => slot.take(),
			Err(poisoned) => poisoned.into_inner().take(),
		}
	}
}

#[async_trait]
impl DataSource for PollingProcessor {
	fn start(&self, on_ready: ReadyNotifier) {
		if self.cancel.is_cancelled() {
			on_ready.notify(Err(SyncError::ClientClosed));
			return;
		}
		if self.started.swap(true, Ordering::SeqCst) {
			debug!("Polling processor already started");
			return;
		}

		self.state.set(ConnectionState::Connecting);

		let poller = Poller {
			requestor: self.requestor.clone(),
			store: Arc::clone(&self.store),
			poll_interval: self.poll_interval,
			state: self.state.clone(),
			cancel: self.cancel.clone(),
			polls: Arc::clone(&self.polls),
			on_ready,
		};
		let handle = tokio::spawn(poller.run());

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
			info!("Polling processor closed");
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

impl Drop for PollingProcessor {
	fn drop(&mut self) {
		self.cancel.cancel();
		if let Some(handle) = self.take_handle() {
			handle.abort();
		}
	}
}

struct Poller {
	requestor: Requestor,
	store: SharedDataStore,
	poll_interval: Duration,
	state: StateTracker,
	cancel: CancellationToken,
	polls: Arc<AtomicU64>,
	on_ready: ReadyNotifier,
}

impl Poller {
	async fn run(self) {
		let mut interval = tokio::time::interval(self.poll_interval);
		interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

		loop {
			tokio::select! {
				_ = self.cancel.cancelled() => {
					info!("Polling processor received shutdown signal");
					break;
				}
				_ = interval.tick() => {}
			}

			if !self.poll_once().await {
				break;
			}
		}
	}

	/// Returns false once polling must stop.
	async fn poll_once(&self) -> bool {
		let url = self.requestor.all_data_url();
		debug!(url = %url, "Polling for flag data");

		let data = match self.requestor.get_all_data().await {
			Ok(data) => data,
			Err(e @ SyncError::MalformedData(_)) => {
				report_processing_error(self.store.as_ref(), &self.on_ready, e).await;
				return true;
			}
			Err(e) if !e.is_recoverable() => {
				error!(url = %url, status = ?e.status(), error = %e, "Polling rejected, not retrying");
				self.on_ready.notify(Err(e));
				self.state.set(ConnectionState::Failed);
				return false;
			}
			Err(e) => {
				warn!(url = %url, error = %e, "Polling request failed");
				if self.state.get() == ConnectionState::Connected {
					self.state.set(ConnectionState::Reconnecting);
				}
				return true;
			}
		};

		let flags = data.item_count(loom_flagsync_core::DataKind::Features);
		let segments = data.item_count(loom_flagsync_core::DataKind::Segments);
		if let Err(e) = self.store.init(data).await {
			report_processing_error(self.store.as_ref(), &self.on_ready, e).await;
			return true;
		}

		self.polls.fetch_add(1, Ordering::SeqCst);
		self.state.set(ConnectionState::Connected);
		info!(flags, segments, "Store initialized from poll");
		self.on_ready.notify(Ok(()));
		true
	}
}
