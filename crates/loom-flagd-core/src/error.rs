// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;

use crate::schema::SchemaViolation;

/// Errors raised while turning a configuration document into a [`crate::FlagSet`].
#[derive(Debug, Error)]
pub enum FlagsError {
	#[error("invalid json: {0}")]
	InvalidJson(String),

	#[error("configuration document has no `flags` object")]
	MissingFlags,

	#[error("invalid flag {key}: {message}")]
	InvalidFlag { key: String, message: String },

	#[error("invalid fragment {name}: {message}")]
	InvalidFragment { name: String, message: String },

	#[error("configuration failed validation with {} violation(s)", .0.len())]
	SchemaViolations(Vec<SchemaViolation>),
}

impl From<serde_json::Error> for FlagsError {
	fn from(err: serde_json::Error) -> Self {
		FlagsError::InvalidJson(err.to_string())
	}
}

pub type Result<T> = std::result::Result<T, FlagsError>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_schema_violation_count_in_message() {
		let err = FlagsError::SchemaViolations(vec![
			SchemaViolation::new("/flags/a/state", "expected ENABLED or DISABLED"),
			SchemaViolation::new("/flags/b", "expected an object"),
		]);
		assert_eq!(
			err.to_string(),
			"configuration failed validation with 2 violation(s)"
		);
	}

	#[test]
	fn test_from_serde_error() {
		let err: FlagsError = serde_json::from_str::<serde_json::Value>("{")
			.unwrap_err()
			.into();
		assert!(matches!(err, FlagsError::InvalidJson(_)));
	}
}
