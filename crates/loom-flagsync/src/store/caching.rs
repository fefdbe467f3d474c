// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! TTL read cache in front of a persistent backing store.
//!
//! Reads are served from the cache while entries are fresh and fall through
//! to the backing store on a miss. Writes go to the backing store first and
//! then refresh the affected item entry with whatever the backing store kept,
//! dropping the cached namespace listing. A read that overlapped a write to
//! the same namespace is returned to its caller but never cached. Once the
//! backing store reports that it has been initialized the answer is
//! remembered for good.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use loom_flagsync_core::{DataKind, FullDataSet, Item};
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{live_items, DataStore, PersistentDataStore};
use crate::error::Result;

/// Default lifetime of cached entries.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(15);

/// Inserts between sweeps of expired entries.
const SWEEP_INTERVAL: u64 = 256;

/// A [`DataStore`] that caches reads from a [`PersistentDataStore`].
///
/// A TTL of zero turns caching off: every call goes straight to the backing
/// store.
pub struct CachingDataStore<P> {
	core: P,
	cache: Option<TtlCache>,
	/// Sticky once the backing store has reported initialization.
	initialized: AtomicBool,
	/// When the backing store was last asked about initialization.
	init_checked_at: Mutex<Option<Instant>>,
}

impl<P: PersistentDataStore> CachingDataStore<P> {
	/// Wraps `core`, caching reads for `ttl`.
	pub fn new(core: P, ttl: Duration) -> Self {
		let cache = if ttl.is_zero() {
			None
		} else {
			Some(TtlCache::new(ttl))
		};
		Self {
			core,
			cache,
			initialized: AtomicBool::new(false),
			init_checked_at: Mutex::new(None),
		}
	}

	/// Wraps `core` with [`DEFAULT_CACHE_TTL`].
	pub fn with_default_ttl(core: P) -> Self {
		Self::new(core, DEFAULT_CACHE_TTL)
	}

	/// Returns true if reads are cached.
	pub fn is_caching(&self) -> bool {
		self.cache.is_some()
	}

	/// Drops every cached entry. The initialized flag is kept.
	pub async fn flush(&self) {
		if let Some(cache) = &self.cache {
			cache.clear().await;
		}
	}

	/// Returns the wrapped backing store.
	pub fn core(&self) -> &P {
		&self.core
	}
}

#[async_trait]
impl<P: PersistentDataStore> DataStore for CachingDataStore<P> {
	async fn get(&self, kind: DataKind, key: &str) -> Result<Option<Item>> {
		let Some(cache) = &self.cache else {
			let item = self.core.get_internal(kind, key).await?;
			return Ok(item.filter(|item| !item.deleted));
		};

		if let Some(cached) = cache.get_item(kind, key).await {
			return Ok(cached.filter(|item| !item.deleted));
		}

		let generation = cache.generation(kind).await;
		let item = self.core.get_internal(kind, key).await?;
		cache.fill_item(kind, key, item.clone(), generation).await;
		Ok(item.filter(|item| !item.deleted))
	}

	async fn all(&self, kind: DataKind) -> Result<HashMap<String, Item>> {
		let Some(cache) = &self.cache else {
			return Ok(live_items(self.core.get_all_internal(kind).await?));
		};

		if let Some(cached) = cache.get_all(kind).await {
			return Ok(cached);
		}

		let generation = cache.generation(kind).await;
		let items = live_items(self.core.get_all_internal(kind).await?);
		cache.fill_all(kind, items.clone(), generation).await;
		Ok(items)
	}

	async fn init(&self, data: FullDataSet) -> Result<()> {
		let ordered = data.into_ordered();

		if let Err(e) = self.core.init_internal(ordered.clone()).await {
			self.flush().await;
			return Err(e);
		}

		if let Some(cache) = &self.cache {
			cache.replace(ordered).await;
		}

		self.initialized.store(true, Ordering::SeqCst);
		Ok(())
	}

	async fn upsert(&self, kind: DataKind, item: Item) -> Result<bool> {
		let key = item.key.clone();

		match self.core.upsert_internal(kind, item.clone()).await {
			Ok(stored) => {
				// Identical rewrites count as applied; the stored state is the same.
				let applied = stored == item;
				if !applied {
					debug!(
						kind = %kind,
						key = %key,
						version = item.version,
						stored_version = stored.version,
						"Backing store kept a newer version"
					);
				}
				if let Some(cache) = &self.cache {
					cache.record_write(kind, &key, Some(stored)).await;
				}
				Ok(applied)
			}
			Err(e) => {
				warn!(kind = %kind, key = %key, error = %e, "Backing store rejected write");
				if let Some(cache) = &self.cache {
					cache.evict_item(kind, &key).await;
				}
				Err(e)
			}
		}
	}

	async fn initialized(&self) -> Result<bool> {
		if self.initialized.load(Ordering::SeqCst) {
			return Ok(true);
		}

		let mut checked_at = self.init_checked_at.lock().await;
		if let (Some(cache), Some(at)) = (&self.cache, *checked_at) {
			if at.elapsed() < cache.ttl {
				return Ok(false);
			}
		}

		let initialized = self.core.initialized_internal().await?;
		*checked_at = Some(Instant::now());
		if initialized {
			self.initialized.store(true, Ordering::SeqCst);
		}
		Ok(initialized)
	}

	async fn close(&self) -> Result<()> {
		self.flush().await;
		self.core.close().await
	}
}

struct Expiring<T> {
	value: T,
	expires_at: Instant,
}

impl<T> Expiring<T> {
	fn is_fresh(&self) -> bool {
		Instant::now() < self.expires_at
	}
}

#[derive(Default)]
struct CacheEntries {
	items: HashMap<(DataKind, String), Expiring<Option<Item>>>,
	all: HashMap<DataKind, Expiring<HashMap<String, Item>>>,
	/// Bumped by every write to a namespace. A read that started under an
	/// older generation must not fill the cache.
	generations: HashMap<DataKind, u64>,
}

impl CacheEntries {
	fn generation(&self, kind: DataKind) -> u64 {
		self.generations.get(&kind).copied().unwrap_or(0)
	}

	fn bump(&mut self, kind: DataKind) {
		*self.generations.entry(kind).or_default() += 1;
	}
}

struct TtlCache {
	ttl: Duration,
	entries: RwLock<CacheEntries>,
	inserts: AtomicU64,
}

impl TtlCache {
	fn new(ttl: Duration) -> Self {
		Self {
			ttl,
			entries: RwLock::new(CacheEntries::default()),
			inserts: AtomicU64::new(0),
		}
	}

	fn expiring<T>(&self, value: T) -> Expiring<T> {
		Expiring {
			value,
			expires_at: Instant::now() + self.ttl,
		}
	}

	/// `Some(None)` is a cached miss; `None` means the cache has no answer.
	async fn get_item(&self, kind: DataKind, key: &str) -> Option<Option<Item>> {
		let entries = self.entries.read().await;
		entries
			.items
			.get(&(kind, key.to_string()))
			.filter(|e| e.is_fresh())
			.map(|e| e.value.clone())
	}

	async fn get_all(&self, kind: DataKind) -> Option<HashMap<String, Item>> {
		let entries = self.entries.read().await;
		entries
			.all
			.get(&kind)
			.filter(|e| e.is_fresh())
			.map(|e| e.value.clone())
	}

	async fn generation(&self, kind: DataKind) -> u64 {
		self.entries.read().await.generation(kind)
	}

	/// Caches a read result unless `kind` was written since `generation`.
	async fn fill_item(&self, kind: DataKind, key: &str, item: Option<Item>, generation: u64) {
		let entry = self.expiring(item);
		let mut entries = self.entries.write().await;
		if entries.generation(kind) != generation {
			debug!(kind = %kind, key = %key, "Skipping cache fill raced by a write");
			return;
		}
		entries.items.insert((kind, key.to_string()), entry);
		self.maybe_sweep(&mut entries);
	}

	/// Caches a listing unless `kind` was written since `generation`.
	async fn fill_all(&self, kind: DataKind, items: HashMap<String, Item>, generation: u64) {
		let entry = self.expiring(items);
		let mut entries = self.entries.write().await;
		if entries.generation(kind) != generation {
			debug!(kind = %kind, "Skipping listing fill raced by a write");
			return;
		}
		entries.all.insert(kind, entry);
	}

	/// Stores the item a write left behind and drops the stale listing.
	async fn record_write(&self, kind: DataKind, key: &str, item: Option<Item>) {
		let entry = self.expiring(item);
		let mut entries = self.entries.write().await;
		entries.bump(kind);
		entries.items.insert((kind, key.to_string()), entry);
		entries.all.remove(&kind);
		self.maybe_sweep(&mut entries);
	}

	async fn evict_item(&self, kind: DataKind, key: &str) {
		let mut entries = self.entries.write().await;
		entries.bump(kind);
		entries.items.remove(&(kind, key.to_string()));
		entries.all.remove(&kind);
	}

	/// Swaps in a full dataset: item entries plus the live listing per kind.
	async fn replace(&self, data: Vec<(DataKind, HashMap<String, Item>)>) {
		let mut entries = self.entries.write().await;
		entries.items.clear();
		entries.all.clear();
		for (kind, items) in data {
			entries.bump(kind);
			for (key, item) in &items {
				let entry = self.expiring(Some(item.clone()));
				entries.items.insert((kind, key.clone()), entry);
			}
			let listing = self.expiring(live_items(items));
			entries.all.insert(kind, listing);
		}
	}

	async fn clear(&self) {
		let mut entries = self.entries.write().await;
		for kind in DataKind::ALL {
			entries.bump(kind);
		}
		entries.items.clear();
		entries.all.clear();
	}

	fn maybe_sweep(&self, entries: &mut CacheEntries) {
		if self.inserts.fetch_add(1, Ordering::Relaxed) % SWEEP_INTERVAL == SWEEP_INTERVAL - 1 {
			entries.items.retain(|_, e| e.is_fresh());
			entries.all.retain(|_, e| e.is_fresh());
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::error::SyncError;
	use crate::store::persistent::MockPersistentDataStore;
	use mockall::predicate::eq;
	use std::sync::Arc;
	use tokio::sync::Notify;

	const TTL: Duration = Duration::from_secs(30);

	#[tokio::test(start_paused = true)]
	async fn get_hit_does_not_touch_backing_store() {
		let mut core = MockPersistentDataStore::new();
		core.expect_get_internal()
			.withf(|kind, key| *kind == DataKind::Features && key.to_string() == "flagkey")
			.times(1)
			.returning(|_, _| Ok(Some(Item::new("flagkey", 1))));
		let store = CachingDataStore::new(core, TTL);

		for _ in 0..3 {
			let item = store.get(DataKind::Features, "flagkey").await.unwrap();
			assert_eq!(item.unwrap().version, 1);
		}
	}

	#[tokio::test(start_paused = true)]
	async fn misses_are_cached_too() {
		let mut core = MockPersistentDataStore::new();
		core.expect_get_internal().times(1).returning(|_, _| Ok(None));
		let store = CachingDataStore::new(core, TTL);

		assert!(store.get(DataKind::Segments, "nope").await.unwrap().is_none());
		assert!(store.get(DataKind::Segments, "nope").await.unwrap().is_none());
	}

	#[tokio::test(start_paused = true)]
	async fn expired_entry_is_read_again() {
		let mut core = MockPersistentDataStore::new();
		let mut version = 0;
		core.expect_get_internal().times(2).returning(move |_, _| {
			version += 1;
			Ok(Some(Item::new("flagkey", version)))
		});
		let store = CachingDataStore::new(core, TTL);

		assert_eq!(store.get(DataKind::Features, "flagkey").await.unwrap().unwrap().version, 1);
		tokio::time::advance(TTL + Duration::from_secs(1)).await;
		assert_eq!(store.get(DataKind::Features, "flagkey").await.unwrap().unwrap().version, 2);
	}

	#[tokio::test(start_paused = true)]
	async fn tombstones_read_as_missing() {
		let mut core = MockPersistentDataStore::new();
		core.expect_get_internal()
			.times(1)
			.returning(|_, _| Ok(Some(Item::tombstone("gone", 4))));
		core.expect_get_all_internal().times(1).returning(|_| {
			let mut items = HashMap::new();
			items.insert("gone".to_string(), Item::tombstone("gone", 4));
			items.insert("here".to_string(), Item::new("here", 1));
			Ok(items)
		});
		let store = CachingDataStore::new(core, TTL);

		assert!(store.get(DataKind::Features, "gone").await.unwrap().is_none());
		let all = store.all(DataKind::Features).await.unwrap();
		assert_eq!(all.len(), 1);
		assert!(all.contains_key("here"));
		assert_eq!(store.all(DataKind::Features).await.unwrap().len(), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn upsert_writes_through_and_refreshes_cache() {
		let mut core = MockPersistentDataStore::new();
		core.expect_get_all_internal().times(2).returning(|_| Ok(HashMap::new()));
		core.expect_upsert_internal()
			.with(eq(DataKind::Features), eq(Item::new("flagkey", 2)))
			.times(1)
			.returning(|_, item| Ok(item));
		core.expect_get_internal().times(0);
		let store = CachingDataStore::new(core, TTL);

		assert!(store.all(DataKind::Features).await.unwrap().is_empty());
		assert!(store.upsert(DataKind::Features, Item::new("flagkey", 2)).await.unwrap());

		// The item entry is fresh from the write; the listing was invalidated.
		assert_eq!(store.get(DataKind::Features, "flagkey").await.unwrap().unwrap().version, 2);
		store.all(DataKind::Features).await.unwrap();
	}

	#[tokio::test(start_paused = true)]
	async fn losing_upsert_caches_the_winner() {
		let mut core = MockPersistentDataStore::new();
		core.expect_upsert_internal()
			.times(1)
			.returning(|_, _| Ok(Item::new("flagkey", 5)));
		core.expect_get_internal().times(0);
		let store = CachingDataStore::new(core, TTL);

		assert!(!store.upsert(DataKind::Features, Item::new("flagkey", 3)).await.unwrap());
		assert_eq!(store.get(DataKind::Features, "flagkey").await.unwrap().unwrap().version, 5);
	}

	#[tokio::test(start_paused = true)]
	async fn delete_caches_tombstone() {
		let mut core = MockPersistentDataStore::new();
		core.expect_upsert_internal()
			.withf(|_, item| item.deleted && item.version == 2)
			.times(1)
			.returning(|_, item| Ok(item));
		core.expect_get_internal().times(0);
		let store = CachingDataStore::new(core, TTL);

		assert!(store.delete(DataKind::Features, "flagkey", 2).await.unwrap());
		assert!(store.get(DataKind::Features, "flagkey").await.unwrap().is_none());
	}

	#[tokio::test(start_paused = true)]
	async fn failed_upsert_evicts_and_surfaces_error() {
		let mut core = MockPersistentDataStore::new();
		core.expect_get_internal()
			.times(2)
			.returning(|_, _| Ok(Some(Item::new("flagkey", 1))));
		core.expect_upsert_internal()
			.times(1)
			.returning(|_, _| Err(SyncError::Store("disk full".to_string())));
		let store = CachingDataStore::new(core, TTL);

		store.get(DataKind::Features, "flagkey").await.unwrap();
		let err = store
			.upsert(DataKind::Features, Item::new("flagkey", 2))
			.await
			.unwrap_err();
		assert!(matches!(err, SyncError::Store(_)));

		// Evicted, so the next read goes back to the backing store.
		assert_eq!(store.get(DataKind::Features, "flagkey").await.unwrap().unwrap().version, 1);
	}

	#[tokio::test(start_paused = true)]
	async fn init_orders_kinds_and_seeds_cache() {
		let mut core = MockPersistentDataStore::new();
		core.expect_init_internal()
			.withf(|data| {
				data.iter().map(|(k, _)| *k).collect::<Vec<_>>()
					== vec![DataKind::Segments, DataKind::Features]
			})
			.times(1)
			.returning(|_| Ok(()));
		core.expect_get_internal().times(0);
		core.expect_get_all_internal().times(0);
		core.expect_initialized_internal().times(0);
		let store = CachingDataStore::new(core, TTL);

		let data = FullDataSet::new()
			.with_item(DataKind::Features, Item::new("flagkey", 1))
			.with_item(DataKind::Features, Item::tombstone("gone", 3))
			.with_item(DataKind::Segments, Item::new("segkey", 2));
		store.init(data).await.unwrap();

		assert!(store.initialized().await.unwrap());
		assert_eq!(store.get(DataKind::Segments, "segkey").await.unwrap().unwrap().version, 2);
		assert!(store.get(DataKind::Features, "gone").await.unwrap().is_none());

		let features = store.all(DataKind::Features).await.unwrap();
		assert_eq!(features.len(), 1);
		assert!(features.contains_key("flagkey"));
		assert_eq!(store.all(DataKind::Segments).await.unwrap().len(), 1);
	}

	/// Backing store whose next read parks until released, so a write can
	/// land while the read is in flight.
	#[derive(Default)]
	struct SlowCore {
		items: std::sync::Mutex<HashMap<(DataKind, String), Item>>,
		pause_next_read: AtomicBool,
		reached: Notify,
		release: Notify,
	}

	impl SlowCore {
		fn seeded(kind: DataKind, item: Item) -> Self {
			let core = Self::default();
			core.items.lock().unwrap().insert((kind, item.key.clone()), item);
			core
		}

		async fn maybe_pause(&self) {
			if self.pause_next_read.swap(false, Ordering::SeqCst) {
				self.reached.notify_one();
				self.release.notified().await;
			}
		}
	}

	#[async_trait]
	impl PersistentDataStore for SlowCore {
		async fn init_internal(&self, _data: Vec<(DataKind, HashMap<String, Item>)>) -> Result<()> {
			Ok(())
		}

		async fn get_internal(&self, kind: DataKind, key: &str) -> Result<Option<Item>> {
			let item = self.items.lock().unwrap().get(&(kind, key.to_string())).cloned();
			self.maybe_pause().await;
			Ok(item)
		}

		async fn get_all_internal(&self, kind: DataKind) -> Result<HashMap<String, Item>> {
			let items = self
				.items
				.lock()
				.unwrap()
				.iter()
				.filter(|((k, _), _)| *k == kind)
				.map(|((_, key), item)| (key.clone(), item.clone()))
				.collect();
			self.maybe_pause().await;
			Ok(items)
		}

		async fn upsert_internal(&self, kind: DataKind, item: Item) -> Result<Item> {
			let mut items = self.items.lock().unwrap();
			let stored = items.entry((kind, item.key.clone())).or_insert_with(|| item.clone());
			if item.version > stored.version {
				*stored = item;
			}
			Ok(stored.clone())
		}

		async fn initialized_internal(&self) -> Result<bool> {
			Ok(true)
		}

		async fn close(&self) -> Result<()> {
			Ok(())
		}
	}

	#[tokio::test]
	async fn write_during_get_is_not_overwritten_by_stale_fill() {
		let core = SlowCore::seeded(DataKind::Features, Item::new("flagkey", 1));
		core.pause_next_read.store(true, Ordering::SeqCst);
		let store = Arc::new(CachingDataStore::new(core, TTL));

		let reader = tokio::spawn({
			let store = store.clone();
			async move { store.get(DataKind::Features, "flagkey").await }
		});
		store.core().reached.notified().await;

		assert!(store.upsert(DataKind::Features, Item::new("flagkey", 2)).await.unwrap());
		store.core().release.notify_one();

		let stale = reader.await.unwrap().unwrap().unwrap();
		assert_eq!(stale.version, 1);
		assert_eq!(store.get(DataKind::Features, "flagkey").await.unwrap().unwrap().version, 2);
	}

	#[tokio::test]
	async fn write_during_all_is_not_overwritten_by_stale_fill() {
		let core = SlowCore::seeded(DataKind::Features, Item::new("flagkey", 1));
		core.pause_next_read.store(true, Ordering::SeqCst);
		let store = Arc::new(CachingDataStore::new(core, TTL));

		let reader = tokio::spawn({
			let store = store.clone();
			async move { store.all(DataKind::Features).await }
		});
		store.core().reached.notified().await;

		assert!(store.upsert(DataKind::Features, Item::new("flagkey", 2)).await.unwrap());
		store.core().release.notify_one();

		let stale = reader.await.unwrap().unwrap();
		assert_eq!(stale["flagkey"].version, 1);
		let all = store.all(DataKind::Features).await.unwrap();
		assert_eq!(all["flagkey"].version, 2);
	}

	#[tokio::test]
	async fn read_without_concurrent_write_still_fills() {
		let core = SlowCore::seeded(DataKind::Segments, Item::new("segkey", 4));
		let store = CachingDataStore::new(core, TTL);

		assert_eq!(store.get(DataKind::Segments, "segkey").await.unwrap().unwrap().version, 4);
		store.core().items.lock().unwrap().clear();
		assert_eq!(store.get(DataKind::Segments, "segkey").await.unwrap().unwrap().version, 4);
	}

	#[tokio::test(start_paused = true)]
	async fn initialized_is_sticky_once_true() {
		let mut core = MockPersistentDataStore::new();
		core.expect_initialized_internal().times(1).returning(|| Ok(true));
		let store = CachingDataStore::new(core, TTL);

		assert!(store.initialized().await.unwrap());
		tokio::time::advance(TTL * 10).await;
		assert!(store.initialized().await.unwrap());
	}

	#[tokio::test(start_paused = true)]
	async fn uninitialized_is_rechecked_after_ttl() {
		let mut core = MockPersistentDataStore::new();
		let mut calls = 0;
		core.expect_initialized_internal().times(2).returning(move || {
			calls += 1;
			Ok(calls > 1)
		});
		let store = CachingDataStore::new(core, TTL);

		assert!(!store.initialized().await.unwrap());
		assert!(!store.initialized().await.unwrap());
		tokio::time::advance(TTL + Duration::from_secs(1)).await;
		assert!(store.initialized().await.unwrap());
		assert!(store.initialized().await.unwrap());
	}

	#[tokio::test]
	async fn zero_ttl_is_pass_through() {
		let mut core = MockPersistentDataStore::new();
		core.expect_get_internal()
			.times(3)
			.returning(|_, _| Ok(Some(Item::new("flagkey", 1))));
		core.expect_get_all_internal().times(2).returning(|_| Ok(HashMap::new()));
		core.expect_initialized_internal().times(2).returning(|| Ok(false));
		let store = CachingDataStore::new(core, Duration::ZERO);
		assert!(!store.is_caching());

		for _ in 0..3 {
			store.get(DataKind::Features, "flagkey").await.unwrap();
		}
		store.all(DataKind::Features).await.unwrap();
		store.all(DataKind::Features).await.unwrap();
		assert!(!store.initialized().await.unwrap());
		assert!(!store.initialized().await.unwrap());
	}

	#[tokio::test]
	async fn close_closes_backing_store() {
		let mut core = MockPersistentDataStore::new();
		core.expect_close().times(2).returning(|| Ok(()));
		let store = CachingDataStore::with_default_ttl(core);

		store.close().await.unwrap();
		store.close().await.unwrap();
	}
}
