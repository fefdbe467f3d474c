// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Flag sync Rust SDK for Loom.
//!
//! This crate keeps a local replica of feature flag and segment definitions
//! in sync with the Loom service, so that evaluations never wait on the
//! network.
//!
//! # Features
//!
//! - **Streaming**: one SSE connection delivering full snapshots, patches and
//!   deletes, with jittered exponential backoff on failure
//! - **Polling**: periodic full snapshots when streaming is turned off
//! - **Versioned Store**: writes land only when they carry a newer version,
//!   and deletes leave tombstones so stale updates cannot resurrect an item
//! - **Pluggable Storage**: [`CachingDataStore`] puts a TTL cache in front of
//!   any [`PersistentDataStore`]
//! - **Daemon Mode**: read a store that another process keeps current
//!
//! # Example
//!
//! ```ignore
//! use loom_flagsync::{DataKind, SyncClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = SyncClient::builder()
//!         .sdk_key("loom_sdk_server_prod_xxx")
//!         .build()
//!         .await?;
//!
//!     if let Some(flag) = client.get(DataKind::Features, "checkout.new_flow").await? {
//!         println!("{} is at version {}", flag.key, flag.version);
//!     }
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```

mod client;
mod data_source;
mod error;
mod polling;
mod ready;
mod requestor;
mod sse;
pub mod store;

pub use client::{
	ClientConfig, SyncClient, SyncClientBuilder, DEFAULT_BASE_URL, DEFAULT_STREAM_BASE_URL,
};
pub use data_source::{ConnectionState, DataSource};
pub use error::{Result, SyncError};
pub use polling::{PollingProcessor, MIN_POLL_INTERVAL};
pub use ready::{ready_channel, ReadyNotifier, ReadyWaiter};
pub use requestor::Requestor;
pub use sse::{StreamConfig, StreamProcessor};
pub use store::{
	CachingDataStore, DataStore, InMemoryDataStore, PersistentDataStore, SharedDataStore,
	DEFAULT_CACHE_TTL,
};

// Re-export core types for convenience
pub use loom_flagsync_core::{
	parse_stream_path, DataKind, DeleteData, FullDataSet, Item, PatchData, PutData,
	StreamEventKind,
};
