// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! SSE (Server-Sent Events) payloads of the dataset change stream.
//!
//! # Events
//!
//! - `put` - Full dataset replacing everything the client holds
//! - `patch` - A single item created or updated
//! - `delete` - A single item deleted at a version
//! - `indirect/put` - The dataset changed; fetch it with a pull request
//! - `indirect/patch` - An item changed; the data is its path only
//!
//! # Example
//!
//! ```
//! use loom_flagsync_core::sse::{PatchData, StreamEventKind};
//! use loom_flagsync_core::{DataKind, Item};
//!
//! let kind = StreamEventKind::from_name("patch").unwrap();
//! assert_eq!(kind, StreamEventKind::Patch);
//!
//! let patch: PatchData = serde_json::from_str(
//!     r#"{"path": "/flags/new-flow", "data": {"key": "new-flow", "version": 2}}"#,
//! ).unwrap();
//! let (data_kind, item) = patch.into_target().unwrap();
//! assert_eq!(data_kind, DataKind::Features);
//! assert_eq!(item.version, 2);
//! ```

use serde::{Deserialize, Serialize};

use crate::item::{FullDataSet, Item};
use crate::kind::{parse_stream_path, DataKind};

/// Event types carried by the `event:` field of the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamEventKind {
	Put,
	Patch,
	Delete,
	IndirectPut,
	IndirectPatch,
}

impl StreamEventKind {
	/// Every event type the client understands.
	pub const ALL: [StreamEventKind; 5] = [
		StreamEventKind::Put,
		StreamEventKind::Patch,
		StreamEventKind::Delete,
		StreamEventKind::IndirectPut,
		StreamEventKind::IndirectPatch,
	];

	/// Returns the event name as sent on the wire.
	pub fn name(&self) -> &'static str {
		match self {
			StreamEventKind::Put => "put",
			StreamEventKind::Patch => "patch",
			StreamEventKind::Delete => "delete",
			StreamEventKind::IndirectPut => "indirect/put",
			StreamEventKind::IndirectPatch => "indirect/patch",
		}
	}

	/// Parses a wire event name. Unknown names yield `None`.
	pub fn from_name(name: &str) -> Option<Self> {
		Self::ALL.into_iter().find(|k| k.name() == name)
	}

	/// Whether the event carries no data and needs a follow-up pull request.
	pub fn is_indirect(&self) -> bool {
		matches!(
			self,
			StreamEventKind::IndirectPut | StreamEventKind::IndirectPatch
		)
	}
}

fn root_path() -> String {
	"/".to_string()
}

/// Data of a `put` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PutData {
	/// Always `/` for a full replace.
	#[serde(default = "root_path")]
	pub path: String,
	/// The complete dataset.
	pub data: FullDataSet,
}

impl PutData {
	pub fn new(data: FullDataSet) -> Self {
		Self {
			path: root_path(),
			data,
		}
	}
}

/// Data of a `patch` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchData {
	/// Path naming the kind and key, e.g. `/segments/beta-users`.
	pub path: String,
	/// The new item.
	pub data: Item,
}

impl PatchData {
	pub fn new(kind: DataKind, item: Item) -> Self {
		Self {
			path: format!("{}{}", kind.stream_path_prefix(), item.key),
			data: item,
		}
	}

	/// Resolves the kind from the path. The path key is used when the item
	/// omits its own.
	pub fn into_target(self) -> Option<(DataKind, Item)> {
		let (kind, key) = parse_stream_path(&self.path)?;
		let mut item = self.data;
		if item.key.is_empty() {
			item.key = key.to_string();
		}
		Some((kind, item))
	}
}

/// Data of a `delete` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteData {
	/// Path naming the kind and key.
	pub path: String,
	/// Version of the deletion.
	pub version: u64,
}

impl DeleteData {
	pub fn new(kind: DataKind, key: &str, version: u64) -> Self {
		Self {
			path: format!("{}{}", kind.stream_path_prefix(), key),
			version,
		}
	}

	/// Resolves kind and key from the path.
	pub fn target(&self) -> Option<(DataKind, &str)> {
		parse_stream_path(&self.path)
	}
}
