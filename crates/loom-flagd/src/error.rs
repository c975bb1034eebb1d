// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors raised by the sync runtime and resolver lifecycle.
///
/// Flag evaluation itself never returns these; it reports problems through
/// [`loom_flagd_core::ErrorCode`] on the evaluation result.
#[derive(Debug, Error)]
pub enum FlagdError {
	#[error("transport error: {0}")]
	Transport(#[from] tonic::transport::Error),

	#[error("rpc failed: {0}")]
	Grpc(#[from] tonic::Status),

	#[error("invalid endpoint {endpoint}: {message}")]
	InvalidEndpoint { endpoint: String, message: String },

	#[error("invalid flag configuration: {0}")]
	Parse(#[from] loom_flagd_core::FlagsError),

	#[error("configuration error: {0}")]
	Config(#[from] ConfigError),

	#[error("no flag configuration received within {0:?}")]
	InitializationTimeout(Duration),

	#[error("connector already started")]
	AlreadyStarted,

	#[error("resolver has been shut down")]
	Closed,

	#[error("io error: {0}")]
	Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FlagdError>;

/// Errors raised while loading resolver configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("failed to read config file {path}: {source}")]
	FileRead {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("failed to parse config file {path}: {source}")]
	TomlParse {
		path: PathBuf,
		#[source]
		source: toml::de::Error,
	},

	#[error("invalid value for {key}: {message}")]
	InvalidValue { key: String, message: String },

	#[error("invalid configuration: {0}")]
	Validation(String),
}
