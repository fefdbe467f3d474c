// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Single-shot readiness signal shared by a data source and its spawned tasks.

use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

use crate::error::{Result, SyncError};

/// Creates a connected notifier/waiter pair.
pub fn ready_channel() -> (ReadyNotifier, ReadyWaiter) {
	let (tx, rx) = oneshot::channel();
	(
		ReadyNotifier {
			tx: Arc::new(Mutex::new(Some(tx))),
		},
		ReadyWaiter { rx },
	)
}

/// Resolves the paired [`ReadyWaiter`] at most once.
///
/// Clones share the same slot, so whichever clone notifies first wins and
/// every later attempt is ignored.
#[derive(Debug, Clone)]
pub struct ReadyNotifier {
	tx: Arc<Mutex<Option<oneshot::Sender<Result<()>>>>>,
}

impl ReadyNotifier {
	/// Delivers `result` if nothing has been delivered yet.
	///
	/// Returns true if this call resolved the waiter.
	pub fn notify(&self, result: Result<()>) -> bool {
		let sender = match self.tx.lock() {
			Ok(mut slot) => slot.take(),
			Err(poisoned) => poisoned.into_inner().take(),
		};
		match sender {
			// The waiter may have been dropped; the signal still counts as spent.
			Some(tx) => {
				let _ = tx.send(result);
				true
			}
			None => false,
		}
	}

	/// Returns true once the signal has been spent.
	pub fn is_notified(&self) -> bool {
		match self.tx.lock() {
			Ok(slot) => slot.is_none(),
			Err(poisoned) => poisoned.into_inner().is_none(),
		}
	}
}

/// Receives the outcome of a data source's first initialization attempt.
#[derive(Debug)]
pub struct ReadyWaiter {
	rx: oneshot::Receiver<Result<()>>,
}

impl ReadyWaiter {
	/// Waits for the signal. A notifier dropped without notifying counts as closed.
	pub async fn wait(self) -> Result<()> {
		self.rx.await.unwrap_or(Err(SyncError::ClientClosed))
	}
}
