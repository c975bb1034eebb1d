// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Layered resolver configuration.
//!
//! Precedence (highest to lowest):
//! 1. Environment variables (`FLAGD_*`)
//! 2. TOML config file
//! 3. Built-in defaults

mod sources;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub use sources::{ConfigSource, DefaultsSource, EnvSource, Precedence, TomlSource};

use crate::error::ConfigError;

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 8015;
const DEFAULT_DEADLINE_MS: u64 = 500;
const DEFAULT_STREAM_DEADLINE_MS: u64 = 600_000;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 1_000;
const DEFAULT_RETRY_BACKOFF_MAX_MS: u64 = 120_000;
const DEFAULT_RETRY_JITTER_MS: u64 = 256;
const DEFAULT_OFFLINE_POLL_INTERVAL_MS: u64 = 5_000;
const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 2_000;

/// One layer of configuration. Unset fields defer to lower layers.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResolverConfigLayer {
	pub host: Option<String>,
	pub port: Option<u16>,
	pub tls: Option<bool>,
	pub cert_path: Option<PathBuf>,
	pub selector: Option<String>,
	pub provider_id: Option<String>,
	pub deadline_ms: Option<u64>,
	pub stream_deadline_ms: Option<u64>,
	pub retry_backoff_ms: Option<u64>,
	pub retry_backoff_max_ms: Option<u64>,
	pub retry_jitter_ms: Option<u64>,
	pub keep_alive_ms: Option<u64>,
	pub offline_flag_source_path: Option<PathBuf>,
	pub offline_poll_interval_ms: Option<u64>,
	pub sync_metadata_disabled: Option<bool>,
	pub throw_if_invalid: Option<bool>,
	pub shutdown_grace_ms: Option<u64>,
}

macro_rules! merge_fields {
	($self:ident, $other:ident, $($field:ident),+ $(,)?) => {
		$(
			if $other.$field.is_some() {
				$self.$field = $other.$field;
			}
		)+
	};
}

impl ResolverConfigLayer {
	pub fn merge(&mut self, other: Self) {
		merge_fields!(
			self,
			other,
			host,
			port,
			tls,
			cert_path,
			selector,
			provider_id,
			deadline_ms,
			stream_deadline_ms,
			retry_backoff_ms,
			retry_backoff_max_ms,
			retry_jitter_ms,
			keep_alive_ms,
			offline_flag_source_path,
			offline_poll_interval_ms,
			sync_metadata_disabled,
			throw_if_invalid,
			shutdown_grace_ms,
		);
	}

	pub fn finalize(self) -> ResolverConfig {
		ResolverConfig {
			host: self.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
			port: self.port.unwrap_or(DEFAULT_PORT),
			tls: self.tls.unwrap_or(false),
			cert_path: self.cert_path,
			selector: self.selector.filter(|s| !s.is_empty()),
			provider_id: self.provider_id.filter(|s| !s.is_empty()),
			deadline: Duration::from_millis(self.deadline_ms.unwrap_or(DEFAULT_DEADLINE_MS)),
			// Zero disables the per-stream deadline.
			stream_deadline: non_zero_ms(
				self.stream_deadline_ms.unwrap_or(DEFAULT_STREAM_DEADLINE_MS),
			),
			retry_backoff: Duration::from_millis(
				self.retry_backoff_ms.unwrap_or(DEFAULT_RETRY_BACKOFF_MS),
			),
			retry_backoff_max: Duration::from_millis(
				self.retry_backoff_max_ms.unwrap_or(DEFAULT_RETRY_BACKOFF_MAX_MS),
			),
			retry_jitter: Duration::from_millis(
				self.retry_jitter_ms.unwrap_or(DEFAULT_RETRY_JITTER_MS),
			),
			keep_alive: non_zero_ms(self.keep_alive_ms.unwrap_or(0)),
			offline_flag_source_path: self.offline_flag_source_path,
			offline_poll_interval: Duration::from_millis(
				self.offline_poll_interval_ms
					.unwrap_or(DEFAULT_OFFLINE_POLL_INTERVAL_MS),
			),
			sync_metadata_disabled: self.sync_metadata_disabled.unwrap_or(false),
			throw_if_invalid: self.throw_if_invalid.unwrap_or(false),
			shutdown_grace: Duration::from_millis(
				self.shutdown_grace_ms.unwrap_or(DEFAULT_SHUTDOWN_GRACE_MS),
			),
		}
	}
}

fn non_zero_ms(ms: u64) -> Option<Duration> {
	(ms > 0).then(|| Duration::from_millis(ms))
}

/// Fully resolved resolver configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolverConfig {
	pub host: String,
	pub port: u16,
	pub tls: bool,
	pub cert_path: Option<PathBuf>,
	pub selector: Option<String>,
	pub provider_id: Option<String>,
	/// Deadline for unary calls, connection setup and initial readiness.
	pub deadline: Duration,
	pub stream_deadline: Option<Duration>,
	pub retry_backoff: Duration,
	pub retry_backoff_max: Duration,
	pub retry_jitter: Duration,
	pub keep_alive: Option<Duration>,
	/// When set, flags are read from this file instead of the sync service.
	pub offline_flag_source_path: Option<PathBuf>,
	pub offline_poll_interval: Duration,
	pub sync_metadata_disabled: bool,
	pub throw_if_invalid: bool,
	pub shutdown_grace: Duration,
}

impl Default for ResolverConfig {
	fn default() -> Self {
		ResolverConfigLayer::default().finalize()
	}
}

impl ResolverConfig {
	/// The URI of the sync service.
	pub fn endpoint_uri(&self) -> String {
		let scheme = if self.tls { "https" } else { "http" };
		format!("{scheme}://{}:{}", self.host, self.port)
	}

	pub fn is_offline(&self) -> bool {
		self.offline_flag_source_path.is_some()
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.deadline.is_zero() {
			return Err(ConfigError::Validation(
				"deadline_ms must be greater than zero".to_string(),
			));
		}
		if self.retry_backoff_max < self.retry_backoff {
			return Err(ConfigError::Validation(format!(
				"retry_backoff_max_ms ({}) is lower than retry_backoff_ms ({})",
				self.retry_backoff_max.as_millis(),
				self.retry_backoff.as_millis()
			)));
		}
		if !self.is_offline() {
			if self.host.is_empty() {
				return Err(ConfigError::Validation("host must not be empty".to_string()));
			}
			if self.port == 0 {
				return Err(ConfigError::Validation("port must not be zero".to_string()));
			}
		}
		if self.offline_poll_interval.is_zero() {
			return Err(ConfigError::Validation(
				"offline_poll_interval_ms must be greater than zero".to_string(),
			));
		}
		Ok(())
	}
}

/// Loads configuration from defaults, an optional TOML file and `FLAGD_*`
/// environment variables.
pub fn load_config(config_file: Option<&Path>) -> Result<ResolverConfig, ConfigError> {
	let mut sources: Vec<Box<dyn ConfigSource>> = vec![Box::new(DefaultsSource), Box::new(EnvSource::system())];
	if let Some(path) = config_file {
		sources.push(Box::new(TomlSource::new(path)));
	}
	load_config_from_sources(sources)
}

/// Merges `sources` in precedence order and validates the result.
pub fn load_config_from_sources(
	mut sources: Vec<Box<dyn ConfigSource>>,
) -> Result<ResolverConfig, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = ResolverConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		merged.merge(source.load()?);
	}

	let config = merged.finalize();
	config.validate()?;

	info!(
		endpoint = %config.endpoint_uri(),
		offline = config.is_offline(),
		selector = ?config.selector,
		"resolver configuration loaded"
	);
	Ok(config)
}
