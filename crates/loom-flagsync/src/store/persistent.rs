// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Contract for durable backing stores.
//!
//! A database adapter implements [`PersistentDataStore`] and is wrapped in a
//! [`CachingDataStore`](super::CachingDataStore), which supplies the
//! [`DataStore`](super::DataStore) contract, tombstone filtering and the read
//! cache. Adapters only move items in and out of storage and apply the
//! version check atomically on write.

use std::collections::HashMap;

use async_trait::async_trait;
use loom_flagsync_core::{DataKind, Item};

use crate::error::Result;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PersistentDataStore: Send + Sync {
	/// Replaces every namespace. `data` is ordered by [`DataKind::priority`]
	/// and includes every kind, empty ones too.
	async fn init_internal(&self, data: Vec<(DataKind, HashMap<String, Item>)>) -> Result<()>;

	/// Returns the stored item, tombstones included.
	async fn get_internal(&self, kind: DataKind, key: &str) -> Result<Option<Item>>;

	/// Returns every stored item of `kind`, tombstones included.
	async fn get_all_internal(&self, kind: DataKind) -> Result<HashMap<String, Item>>;

	/// Stores `item` if its version is strictly greater than the stored one.
	///
	/// Returns the item stored afterwards: `item` itself when the write won,
	/// otherwise the existing newer item.
	async fn upsert_internal(&self, kind: DataKind, item: Item) -> Result<Item>;

	/// Returns true if any writer has ever stored a full dataset.
	async fn initialized_internal(&self) -> Result<bool>;

	/// Releases connections. Safe to call more than once.
	async fn close(&self) -> Result<()>;
}
