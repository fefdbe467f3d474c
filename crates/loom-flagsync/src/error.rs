// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the flag sync SDK.

use thiserror::Error;

/// Result type alias for the flag sync SDK.
pub type Result<T> = std::result::Result<T, SyncError>;

/// HTTP statuses that mean the SDK key will never be accepted.
const UNRECOVERABLE_STATUSES: [u16; 2] = [401, 403];

/// Errors that can occur in the flag sync SDK.
#[derive(Error, Debug)]
pub enum SyncError {
	/// A stream event or pull response could not be parsed.
	#[error("malformed data in event stream: {0}")]
	MalformedData(String),

	/// Network I/O failed while connecting or during a request.
	#[error("network error requesting {target}: {source}")]
	Network {
		/// URL or stream the request was aimed at.
		target: String,
		#[source]
		source: reqwest::Error,
	},

	/// A connection attempt or request exceeded its time budget.
	#[error("timed out connecting to {target}")]
	Timeout {
		/// URL or stream the request was aimed at.
		target: String,
	},

	/// The open event stream failed mid-read.
	#[error("event stream error: {0}")]
	Stream(String),

	/// The server answered with a non-success status.
	#[error("unexpected HTTP status {status} from {target}")]
	Http {
		/// HTTP status code.
		status: u16,
		/// URL the request was aimed at.
		target: String,
	},

	/// A backing store rejected a mutation or read.
	#[error("data store error: {0}")]
	Store(String),

	/// SDK key is missing or empty.
	#[error("Invalid or missing SDK key")]
	InvalidSdkKey,

	/// Base URL is missing or invalid.
	#[error("Invalid or missing base URL")]
	InvalidBaseUrl,

	/// Client already closed.
	#[error("Client has been closed")]
	ClientClosed,
}

impl SyncError {
	/// Returns true if retrying the connection may succeed.
	///
	/// Only 401 and 403 are final: every other status, every I/O failure and
	/// every timeout leads to a reconnect.
	pub fn is_recoverable(&self) -> bool {
		match self {
			SyncError::Http { status, .. } => !UNRECOVERABLE_STATUSES.contains(status),
			SyncError::InvalidSdkKey | SyncError::InvalidBaseUrl | SyncError::ClientClosed => false,
			_ => true,
		}
	}

	/// Status code carried by the error, if any.
	pub fn status(&self) -> Option<u16> {
		match self {
			SyncError::Http { status, .. } => Some(*status),
			SyncError::Network { source, .. } => source.status().map(|s| s.as_u16()),
			_ => None,
		}
	}

	pub(crate) fn malformed(err: impl std::fmt::Display) -> Self {
		SyncError::MalformedData(err.to_string())
	}
}
