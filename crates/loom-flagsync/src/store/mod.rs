// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Versioned stores holding the local replica.
//!
//! [`DataStore`] is the contract the data sources write through and the
//! evaluation engine reads from. Every write is gated on the item version:
//! a write lands only when its version is strictly greater than the stored
//! one, deletes are stored as tombstones, and only [`DataStore::init`] removes
//! keys outright.
//!
//! Implementations:
//! - [`InMemoryDataStore`] - the default, a map of maps behind one lock
//! - [`CachingDataStore`] - a TTL read cache in front of a
//!   [`PersistentDataStore`] such as a database adapter

mod caching;
mod memory;
mod persistent;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use loom_flagsync_core::{DataKind, FullDataSet, Item};

use crate::error::Result;

pub use caching::{CachingDataStore, DEFAULT_CACHE_TTL};
pub use memory::InMemoryDataStore;
pub use persistent::PersistentDataStore;

/// A versioned key-value store of flags and segments.
///
/// Each call is atomic with respect to concurrent readers.
#[async_trait]
pub trait DataStore: Send + Sync {
	/// Returns the live item for `key`. Missing keys and tombstones are `None`.
	async fn get(&self, kind: DataKind, key: &str) -> Result<Option<Item>>;

	/// Returns every live item of `kind`, keyed by item key.
	async fn all(&self, kind: DataKind) -> Result<HashMap<String, Item>>;

	/// Replaces the contents of every namespace and marks the store initialized.
	async fn init(&self, data: FullDataSet) -> Result<()>;

	/// Stores `item` unless the stored version is greater than or equal to it.
	///
	/// Returns true if the write was applied. A rejected write is not an error.
	async fn upsert(&self, kind: DataKind, item: Item) -> Result<bool>;

	/// Records a deletion of `key` at `version` as a tombstone.
	async fn delete(&self, kind: DataKind, key: &str, version: u64) -> Result<bool> {
		self.upsert(kind, Item::tombstone(key, version)).await
	}

	/// Returns true once a full dataset has been stored.
	async fn initialized(&self) -> Result<bool>;

	/// Releases held resources. Safe to call more than once.
	async fn close(&self) -> Result<()>;
}

/// A store shared between a data source and its readers.
pub type SharedDataStore = Arc<dyn DataStore>;

/// Drops tombstones from a namespace listing.
pub(crate) fn live_items(items: HashMap<String, Item>) -> HashMap<String, Item> {
	items.into_iter().filter(|(_, item)| !item.deleted).collect()
}
