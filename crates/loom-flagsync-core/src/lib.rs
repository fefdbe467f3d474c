// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types for the Loom flag sync SDK.
//!
//! This crate describes the data the SDK replicates and the payloads of the
//! change stream that keeps the replica current. It performs no I/O; the
//! `loom-flagsync` crate drives the network and the store.
//!
//! # Overview
//!
//! - [`DataKind`] - the namespaces (`features`, `segments`) and how each is
//!   addressed on the stream, in pull requests and in dataset payloads
//! - [`Item`] - a versioned definition, possibly a tombstone
//! - [`FullDataSet`] - a snapshot of every namespace
//! - [`sse`] - stream event names and payloads
//!
//! # Example
//!
//! ```
//! use loom_flagsync_core::{DataKind, FullDataSet, Item};
//!
//! let data: FullDataSet = serde_json::from_str(
//!     r#"{"flags": {"flagkey": {"key": "flagkey", "version": 1}}, "segments": {}}"#,
//! ).unwrap();
//!
//! assert_eq!(data.item_count(DataKind::Features), 1);
//! assert!(Item::new("flagkey", 2).supersedes(data.items(DataKind::Features).unwrap().get("flagkey")));
//! ```

pub mod error;
pub mod item;
pub mod kind;
pub mod sse;

pub use error::{CoreError, Result};
pub use item::{FullDataSet, Item};
pub use kind::{parse_stream_path, require_stream_path, DataKind};
pub use sse::{DeleteData, PatchData, PutData, StreamEventKind};
