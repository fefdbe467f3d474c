// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Versioned items and full dataset snapshots.

use std::collections::HashMap;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::kind::DataKind;

/// A versioned flag or segment definition.
///
/// Only `key`, `version` and `deleted` are interpreted by the SDK. Every other
/// field of the JSON object is kept verbatim in `attributes` for the
/// evaluation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
	/// Item key, unique within its [`DataKind`].
	#[serde(default)]
	pub key: String,
	/// Version assigned by the flag service. Higher is newer.
	pub version: u64,
	/// Whether this is a tombstone.
	#[serde(default, skip_serializing_if = "std::ops::Not::not")]
	pub deleted: bool,
	/// Remaining fields of the definition.
	#[serde(flatten)]
	pub attributes: Map<String, Value>,
}

impl Item {
	/// Creates a live item with no attributes.
	pub fn new(key: impl Into<String>, version: u64) -> Self {
		Self {
			key: key.into(),
			version,
			deleted: false,
			attributes: Map::new(),
		}
	}

	/// Creates a tombstone recording that `key` was deleted at `version`.
	pub fn tombstone(key: impl Into<String>, version: u64) -> Self {
		Self {
			key: key.into(),
			version,
			deleted: true,
			attributes: Map::new(),
		}
	}

	/// Adds an attribute.
	pub fn with_attribute(mut self, name: impl Into<String>, value: Value) -> Self {
		self.attributes.insert(name.into(), value);
		self
	}

	/// Returns true if this item should replace `current`.
	///
	/// Writes only win with a strictly higher version, so duplicates and
	/// reordered deliveries never change stored state.
	pub fn supersedes(&self, current: Option<&Item>) -> bool {
		match current {
			Some(existing) => existing.version < self.version,
			None => true,
		}
	}
}

/// A complete snapshot of every namespace, as delivered by a full replace.
///
/// Wire shape: `{ "flags": { key: item, ... }, "segments": { key: item, ... } }`.
/// Missing namespaces are empty, unknown ones are ignored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FullDataSet {
	collections: HashMap<DataKind, HashMap<String, Item>>,
}

impl FullDataSet {
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds `item` to `kind`, returning the dataset for chaining.
	pub fn with_item(mut self, kind: DataKind, item: Item) -> Self {
		self.insert(kind, item);
		self
	}

	/// Inserts `item` into `kind`, replacing any item with the same key.
	pub fn insert(&mut self, kind: DataKind, item: Item) {
		self
			.collections
			.entry(kind)
			.or_default()
			.insert(item.key.clone(), item);
	}

	/// Items of `kind`, if any were supplied.
	pub fn items(&self, kind: DataKind) -> Option<&HashMap<String, Item>> {
		self.collections.get(&kind)
	}

	/// Number of items of `kind`, tombstones included.
	pub fn item_count(&self, kind: DataKind) -> usize {
		self.collections.get(&kind).map(HashMap::len).unwrap_or(0)
	}

	/// Iterates every kind with its items, in no particular order.
	pub fn iter(&self) -> impl Iterator<Item = (DataKind, &HashMap<String, Item>)> {
		self.collections.iter().map(|(k, v)| (*k, v))
	}

	/// Consumes the dataset, yielding each kind in [`DataKind::priority`] order.
	///
	/// Every known kind is yielded, with an empty map when absent, so a full
	/// replace clears namespaces the payload omitted.
	pub fn into_ordered(mut self) -> Vec<(DataKind, HashMap<String, Item>)> {
		DataKind::by_priority()
			.into_iter()
			.map(|kind| (kind, self.collections.remove(&kind).unwrap_or_default()))
			.collect()
	}
}

impl Serialize for FullDataSet {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		let raw: HashMap<&str, &HashMap<String, Item>> = self
			.collections
			.iter()
			.map(|(kind, items)| (kind.data_key(), items))
			.collect();
		raw.serialize(serializer)
	}
}

impl<'de> Deserialize<'de> for FullDataSet {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let raw: HashMap<String, Value> = HashMap::deserialize(deserializer)?;
		let mut collections = HashMap::new();

		for (data_key, value) in raw {
			let Some(kind) = DataKind::from_data_key(&data_key) else {
				continue;
			};
			let mut items: HashMap<String, Item> =
				serde_json::from_value(value).map_err(D::Error::custom)?;
			for (key, item) in items.iter_mut() {
				if item.key.is_empty() {
					item.key = key.clone();
				}
			}
			collections.insert(kind, items);
		}

		Ok(Self { collections })
	}
}
