// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The seam between the client and whatever keeps its store up to date.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, error};

use crate::error::SyncError;
use crate::ready::ReadyNotifier;
use crate::store::DataStore;

/// Lifecycle of a data source connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
	/// Created but not started.
	Idle,
	/// First connection attempt in progress.
	Connecting,
	/// Receiving updates.
	Connected,
	/// Waiting to retry after a recoverable failure.
	Reconnecting,
	/// Shut down by the owner.
	Closed,
	/// Stopped after an unrecoverable failure.
	Failed,
}

impl ConnectionState {
	pub fn as_str(&self) -> &'static str {
		match self {
			ConnectionState::Idle => "idle",
			ConnectionState::Connecting => "connecting",
			ConnectionState::Connected => "connected",
			ConnectionState::Reconnecting => "reconnecting",
			ConnectionState::Closed => "closed",
			ConnectionState::Failed => "failed",
		}
	}

	/// Returns true if the source will never update the store again.
	pub fn is_terminal(&self) -> bool {
		matches!(self, ConnectionState::Closed | ConnectionState::Failed)
	}
}

impl fmt::Display for ConnectionState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Keeps a [`DataStore`] in sync with the service.
#[async_trait]
pub trait DataSource: Send + Sync {
	/// Starts the background task. `on_ready` resolves after the first full
	/// dataset lands or an unrecoverable error occurs. A second call is a no-op.
	fn start(&self, on_ready: ReadyNotifier);

	/// Stops the background task and releases the connection. Idempotent.
	async fn close(&self);

	/// Current connection state.
	fn state(&self) -> ConnectionState;

	/// Receiver that observes every state transition.
	fn subscribe_state(&self) -> watch::Receiver<ConnectionState>;
}

/// Connection state shared between a data source and its background task.
#[derive(Debug, Clone)]
pub(crate) struct StateTracker {
	tx: Arc<watch::Sender<ConnectionState>>,
}

impl StateTracker {
	pub(crate) fn new() -> Self {
		let (tx, _) = watch::channel(ConnectionState::Idle);
		Self { tx: Arc::new(tx) }
	}

	pub(crate) fn get(&self) -> ConnectionState {
		*self.tx.borrow()
	}

	pub(crate) fn set(&self, state: ConnectionState) {
		let previous = self.tx.send_replace(state);
		if previous != state {
			debug!(from = %previous, to = %state, "Connection state changed");
		}
	}

	pub(crate) fn subscribe(&self) -> watch::Receiver<ConnectionState> {
		self.tx.subscribe()
	}
}

/// Logs a failure to apply received data.
///
/// The ready signal only carries it while the store has never been
/// initialized, so a bad update after startup cannot fail the client.
pub(crate) async fn report_processing_error(
	store: &dyn DataStore,
	on_ready: &ReadyNotifier,
	err: SyncError,
) {
	error!(error = %err, "Failed to apply flag data");
	let initialized = store.initialized().await.unwrap_or(false);
	if !initialized {
		on_ready.notify(Err(err));
	}
}
