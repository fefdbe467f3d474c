// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;

/// Errors raised while interpreting flag sync data.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
	#[error("unknown namespace: {0}")]
	UnknownNamespace(String),

	#[error("stream path does not name a known namespace: {0}")]
	UnknownPath(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
