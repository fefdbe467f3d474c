// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Default in-memory store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use loom_flagsync_core::{DataKind, FullDataSet, Item};
use tokio::sync::RwLock;
use tracing::debug;

use super::{live_items, DataStore};
use crate::error::Result;

/// In-memory store of flags and segments.
///
/// The whole snapshot sits behind a single `RwLock`, so readers never see a
/// write half applied. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDataStore {
	inner: Arc<RwLock<StoreInner>>,
}

#[derive(Debug, Default)]
struct StoreInner {
	/// Items, tombstones included, keyed by kind then item key.
	items: HashMap<DataKind, HashMap<String, Item>>,
	/// When the store was last written.
	last_updated: Option<DateTime<Utc>>,
	/// Whether a full dataset has been stored.
	initialized: bool,
}

impl InMemoryDataStore {
	/// Creates a new empty store.
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns the timestamp of the last applied write.
	pub async fn last_updated(&self) -> Option<DateTime<Utc>> {
		self.inner.read().await.last_updated
	}

	/// Returns the number of items of `kind`, tombstones included.
	pub async fn item_count(&self, kind: DataKind) -> usize {
		self
			.inner
			.read()
			.await
			.items
			.get(&kind)
			.map(HashMap::len)
			.unwrap_or(0)
	}

	/// Returns the stored version of `key`, tombstones included.
	pub async fn version_of(&self, kind: DataKind, key: &str) -> Option<u64> {
		self
			.inner
			.read()
			.await
			.items
			.get(&kind)
			.and_then(|items| items.get(key))
			.map(|item| item.version)
	}
}

#[async_trait]
impl DataStore for InMemoryDataStore {
	async fn get(&self, kind: DataKind, key: &str) -> Result<Option<Item>> {
		let inner = self.inner.read().await;
		Ok(inner
			.items
			.get(&kind)
			.and_then(|items| items.get(key))
			.filter(|item| !item.deleted)
			.cloned())
	}

	async fn all(&self, kind: DataKind) -> Result<HashMap<String, Item>> {
		let inner = self.inner.read().await;
		Ok(live_items(inner.items.get(&kind).cloned().unwrap_or_default()))
	}

	async fn init(&self, data: FullDataSet) -> Result<()> {
		let items: HashMap<DataKind, HashMap<String, Item>> = data.into_ordered().into_iter().collect();

		let mut inner = self.inner.write().await;
		inner.items = items;
		inner.last_updated = Some(Utc::now());
		inner.initialized = true;
		Ok(())
	}

	async fn upsert(&self, kind: DataKind, item: Item) -> Result<bool> {
		let mut inner = self.inner.write().await;
		let items = inner.items.entry(kind).or_default();

		if !item.supersedes(items.get(&item.key)) {
			debug!(
				kind = %kind,
				key = %item.key,
				version = item.version,
				"Ignoring write that does not supersede stored version"
			);
			return Ok(false);
		}

		items.insert(item.key.clone(), item);
		inner.last_updated = Some(Utc::now());
		Ok(true)
	}

	async fn initialized(&self) -> Result<bool> {
		Ok(self.inner.read().await.initialized)
	}

	async fn close(&self) -> Result<()> {
		Ok(())
	}
}


#[cfg(test)]
mod proptests {
	use super::*;
	use proptest::prelude::*;

	#[derive(Debug, Clone)]
	enum Op {
		Upsert(u64),
		Delete(u64),
	}

	fn arb_op() -> impl Strategy<Value = Op> {
		prop_oneof![
			(0u64..50).prop_map(Op::Upsert),
			(0u64..50).prop_map(Op::Delete),
		]
	}

	proptest! {
		#[test]
		fn stored_version_is_the_running_maximum(ops in prop::collection::vec(arb_op(), 1..40)) {
			let rt = tokio::runtime::Runtime::new().unwrap();
			rt.block_on(async {
				let store = InMemoryDataStore::new();
				let mut expected: Option<(u64, bool)> = None;

				for op in &ops {
					let (version, deleted) = match op {
						Op::Upsert(v) => (*v, false),
						Op::Delete(v) => (*v, true),
					};
					let applied = match op {
						Op::Upsert(v) => store.upsert(DataKind::Features, Item::new("k", *v)).await.unwrap(),
						Op::Delete(v) => store.delete(DataKind::Features, "k", *v).await.unwrap(),
					};

					let should_apply = expected.map(|(current, _)| version > current).unwrap_or(true);
					prop_assert_eq!(applied, should_apply);
					if should_apply {
						expected = Some((version, deleted));
					}

					let (current, tombstoned) = expected.unwrap();
					prop_assert_eq!(store.version_of(DataKind::Features, "k").await, Some(current));
					prop_assert_eq!(store.get(DataKind::Features, "k").await.unwrap().is_none(), tombstoned);
				}

				Ok(())
			})?;
		}

		#[test]
		fn all_after_init_matches_live_items_exactly(
			versions in prop::collection::hash_map("[a-z]{1,8}", (0u64..10, proptest::bool::ANY), 0..20),
			stale in prop::collection::vec("[a-z]{1,8}", 0..10),
		) {
			let rt = tokio::runtime::Runtime::new().unwrap();
			rt.block_on(async {
				let store = InMemoryDataStore::new();
				for key in &stale {
					store.upsert(DataKind::Segments, Item::new(key.clone(), 100)).await.unwrap();
				}

				let mut data = FullDataSet::new();
				for (key, (version, deleted)) in &versions {
					let item = if *deleted {
						Item::tombstone(key.clone(), *version)
					} else {
						Item::new(key.clone(), *version)
					};
					data.insert(DataKind::Segments, item);
				}
				store.init(data).await.unwrap();

				let all = store.all(DataKind::Segments).await.unwrap();
				let expected: Vec<&String> = {
					let mut keys: Vec<&String> = versions.iter().filter(|(_, (_, d))| !d).map(|(k, _)| k).collect();
					keys.sort();
					keys
				};
				let mut actual: Vec<&String> = all.keys().collect();
				actual.sort();
				prop_assert_eq!(actual, expected);

				Ok(())
			})?;
		}
	}
}
