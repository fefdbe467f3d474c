// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Capped exponential backoff with jitter for reconnect loops.

use std::time::Duration;
use tracing::trace;

#[derive(Debug, Clone)]
pub struct BackoffConfig {
	pub initial_delay: Duration,
	pub max_delay: Duration,
	pub jitter: bool,
}

impl Default for BackoffConfig {
	fn default() -> Self {
		Self {
			initial_delay: Duration::from_secs(1),
			max_delay: Duration::from_secs(30),
			jitter: true,
		}
	}
}

/// Tracks consecutive failures and hands out the delay before the next attempt.
///
/// The base delay doubles with every consecutive failure until it reaches
/// `max_delay`. With jitter enabled the returned delay is drawn uniformly from
/// `[base / 2, base]`, so it never exceeds the cap.
#[derive(Debug, Clone)]
pub struct Backoff {
	config: BackoffConfig,
	failures: u32,
}

impl Backoff {
	pub fn new(config: BackoffConfig) -> Self {
		Self {
			config,
			failures: 0,
		}
	}

	/// Returns the delay to wait before the next attempt and records a failure.
	pub fn next_delay(&mut self) -> Duration {
		let delay = calculate_delay(&self.config, self.failures);
		self.failures = self.failures.saturating_add(1);
		trace!(
			failures = self.failures,
			delay_ms = delay.as_millis(),
			"backoff advanced"
		);
		delay
	}

	/// Forgets previous failures so the next delay starts from `initial_delay`.
	pub fn reset(&mut self) {
		self.failures = 0;
	}

	/// Number of consecutive failures since the last reset.
	pub fn failures(&self) -> u32 {
		self.failures
	}

	pub fn config(&self) -> &BackoffConfig {
		&self.config
	}
}

impl Default for Backoff {
	fn default() -> Self {
		Self::new(BackoffConfig::default())
	}
}

fn calculate_delay(cfg: &BackoffConfig, failures: u32) -> Duration {
	// 2^31 of anything already saturates the cap.
	let factor = 2f64.powi(failures.min(31) as i32);
	let exponential = cfg.initial_delay.as_secs_f64() * factor;
	let capped = exponential.min(cfg.max_delay.as_secs_f64());

	let final_delay = if cfg.jitter {
		capped / 2.0 + fastrand::f64() * (capped / 2.0)
	} else {
		capped
	};

	Duration::from_secs_f64(final_delay)
}
