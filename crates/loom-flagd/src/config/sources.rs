// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: defaults, TOML files and environment variables.

use std::path::PathBuf;

use tracing::{debug, trace};

use super::ResolverConfigLayer;
use crate::error::ConfigError;

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	ConfigFile = 20,
	Environment = 50,
}

/// Trait for configuration sources.
pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<ResolverConfigLayer, ConfigError>;
}

/// Built-in defaults source.
pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<ResolverConfigLayer, ConfigError> {
		Ok(ResolverConfigLayer::default())
	}
}

/// TOML file configuration source. A missing file contributes nothing.
pub struct TomlSource {
	path: PathBuf,
}

impl TomlSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		Precedence::ConfigFile
	}

	fn load(&self) -> Result<ResolverConfigLayer, ConfigError> {
		if !self.path.exists() {
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(ResolverConfigLayer::default());
		}

		debug!(path = %self.path.display(), "loading config file");
		let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::FileRead {
			path: self.path.clone(),
			source: e,
		})?;

		let layer: ResolverConfigLayer =
			toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
				path: self.path.clone(),
				source: e,
			})?;

		trace!("parsed config layer from TOML");
		Ok(layer)
	}
}

type Lookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Environment variable source.
///
/// Convention: `FLAGD_<FIELD>`, e.g. `FLAGD_HOST`, `FLAGD_DEADLINE_MS`.
pub struct EnvSource {
	lookup: Lookup,
}

impl EnvSource {
	/// Reads the process environment.
	pub fn system() -> Self {
		Self::with_lookup(|name| std::env::var(name).ok())
	}

	/// Reads variables through `lookup`, so tests need not touch the process
	/// environment.
	pub fn with_lookup(lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Self {
		Self {
			lookup: Box::new(lookup),
		}
	}

	fn var(&self, name: &str) -> Option<String> {
		(self.lookup)(name).filter(|s| !s.is_empty())
	}

	fn bool(&self, name: &str) -> Option<bool> {
		self.var(name)
			.map(|v| v.eq_ignore_ascii_case("true") || v == "1")
	}

	fn parsed<T: std::str::FromStr>(&self, name: &str, kind: &str) -> Result<Option<T>, ConfigError> {
		match self.var(name) {
			Some(v) => v.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
				key: name.to_string(),
				message: format!("invalid {kind} value '{v}'"),
			}),
			None => Ok(None),
		}
	}

	fn u64(&self, name: &str) -> Result<Option<u64>, ConfigError> {
		self.parsed(name, "u64")
	}
}

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<ResolverConfigLayer, ConfigError> {
		debug!("loading environment variables");
		Ok(ResolverConfigLayer {
			host: self.var("FLAGD_HOST"),
			port: self.parsed("FLAGD_PORT", "u16")?,
			tls: self.bool("FLAGD_TLS"),
			cert_path: self.var("FLAGD_SERVER_CERT_PATH").map(PathBuf::from),
			selector: self.var("FLAGD_SOURCE_SELECTOR"),
			provider_id: self.var("FLAGD_PROVIDER_ID"),
			deadline_ms: self.u64("FLAGD_DEADLINE_MS")?,
			stream_deadline_ms: self.u64("FLAGD_STREAM_DEADLINE_MS")?,
			retry_backoff_ms: self.u64("FLAGD_RETRY_BACKOFF_MS")?,
			retry_backoff_max_ms: self.u64("FLAGD_RETRY_BACKOFF_MAX_MS")?,
			retry_jitter_ms: self.u64("FLAGD_RETRY_JITTER_MS")?,
			keep_alive_ms: self.u64("FLAGD_KEEP_ALIVE_TIME_MS")?,
			offline_flag_source_path: self.var("FLAGD_OFFLINE_FLAG_SOURCE_PATH").map(PathBuf::from),
			offline_poll_interval_ms: self.u64("FLAGD_OFFLINE_POLL_MS")?,
			sync_metadata_disabled: self.bool("FLAGD_SYNC_METADATA_DISABLED"),
			throw_if_invalid: self.bool("FLAGD_THROW_IF_INVALID"),
			shutdown_grace_ms: self.u64("FLAGD_SHUTDOWN_GRACE_MS")?,
		})
	}
}
