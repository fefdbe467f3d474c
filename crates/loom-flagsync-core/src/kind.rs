// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Registry of the namespaces the SDK keeps in sync.
//!
//! Each [`DataKind`] knows how it is addressed on every surface:
//!
//! | Kind | Store namespace | Stream path prefix | Pull path | Payload key |
//! |------|-----------------|--------------------|-----------|-------------|
//! | `Features` | `features` | `/flags/` | `latest-flags` | `flags` |
//! | `Segments` | `segments` | `/segments/` | `latest-segments` | `segments` |
//!
//! Stream and store code only ever iterate [`DataKind::ALL`] or call these
//! accessors, so a new namespace is a new variant here and nothing else.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// A namespace of versioned items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataKind {
	/// Feature flag definitions.
	Features,
	/// User segment definitions.
	Segments,
}

impl DataKind {
	/// Every known kind.
	pub const ALL: [DataKind; 2] = [DataKind::Features, DataKind::Segments];

	/// Name of the store namespace.
	pub fn namespace(&self) -> &'static str {
		match self {
			DataKind::Features => "features",
			DataKind::Segments => "segments",
		}
	}

	/// Prefix of stream event paths addressing this kind, including both slashes.
	pub fn stream_path_prefix(&self) -> &'static str {
		match self {
			DataKind::Features => "/flags/",
			DataKind::Segments => "/segments/",
		}
	}

	/// Path segment used by pull requests for a single item of this kind.
	pub fn request_path(&self) -> &'static str {
		match self {
			DataKind::Features => "latest-flags",
			DataKind::Segments => "latest-segments",
		}
	}

	/// Key under which this kind appears in full dataset payloads.
	pub fn data_key(&self) -> &'static str {
		match self {
			DataKind::Features => "flags",
			DataKind::Segments => "segments",
		}
	}

	/// Write order during a full replace on persistent stores. Lower goes first.
	///
	/// Segments are written before features so a flag never becomes visible
	/// ahead of the segments it references.
	pub fn priority(&self) -> u8 {
		match self {
			DataKind::Segments => 0,
			DataKind::Features => 1,
		}
	}

	/// All kinds sorted by [`DataKind::priority`].
	pub fn by_priority() -> Vec<DataKind> {
		let mut kinds = Self::ALL.to_vec();
		kinds.sort_by_key(|k| k.priority());
		kinds
	}

	/// Looks a kind up by its store namespace.
	pub fn from_namespace(namespace: &str) -> Option<DataKind> {
		Self::ALL.into_iter().find(|k| k.namespace() == namespace)
	}

	/// Looks a kind up by its payload key.
	pub fn from_data_key(data_key: &str) -> Option<DataKind> {
		Self::ALL.into_iter().find(|k| k.data_key() == data_key)
	}
}

impl fmt::Display for DataKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.namespace())
	}
}

impl FromStr for DataKind {
	type Err = CoreError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		DataKind::from_namespace(s).ok_or_else(|| CoreError::UnknownNamespace(s.to_string()))
	}
}

/// Splits a stream event path such as `/flags/my-flag` into its kind and key.
///
/// Returns `None` when no kind claims the prefix or the key is empty.
pub fn parse_stream_path(path: &str) -> Option<(DataKind, &str)> {
	DataKind::ALL.into_iter().find_map(|kind| {
		path.strip_prefix(kind.stream_path_prefix())
			.filter(|key| !key.is_empty())
			.map(|key| (kind, key))
	})
}

/// Like [`parse_stream_path`] but reports unknown paths as an error.
pub fn require_stream_path(path: &str) -> Result<(DataKind, &str), CoreError> {
	parse_stream_path(path).ok_or_else(|| CoreError::UnknownPath(path.to_string()))
}
