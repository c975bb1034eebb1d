// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The `sem_ver` operator: `{"sem_ver": [{"var": "version"}, ">=", "1.4.0"]}`.

use semver::{BuildMetadata, Version};
use serde_json::Value;
use tracing::debug;

use super::logic::Operation;

#[derive(Debug, Clone, Copy, Default)]
pub struct SemVer;

impl Operation for SemVer {
	fn evaluate(&self, args: &[Value], _data: &Value) -> Value {
		let [Value::String(left), Value::String(op), Value::String(right)] = args else {
			debug!("sem_ver: expected three string arguments");
			return Value::Null;
		};

		let (Some(left), Some(right)) = (parse_version(left), parse_version(right)) else {
			debug!(left = %left, right = %right, "sem_ver: invalid version");
			return Value::Null;
		};

		let result = match op.as_str() {
			"=" => left == right,
			"!=" => left != right,
			"<" => left < right,
			"<=" => left <= right,
			">" => left > right,
			">=" => left >= right,
			"^" => left.major == right.major,
			"~" => left.major == right.major && left.minor == right.minor,
			other => {
				debug!(operator = %other, "sem_ver: unknown operator");
				return Value::Null;
			}
		};

		Value::Bool(result)
	}
}

/// Parses a version, tolerating a `v` prefix and a missing minor or patch.
/// Build metadata never takes part in comparisons.
fn parse_version(raw: &str) -> Option<Version> {
	let trimmed = raw
		.trim()
		.strip_prefix(['v', 'V'])
		.unwrap_or(raw.trim());

	let mut version = Version::parse(trimmed)
		.or_else(|_| Version::parse(&pad_core(trimmed)))
		.ok()?;
	version.build = BuildMetadata::EMPTY;
	Some(version)
}

/// `1` becomes `1.0.0` and `1.2-beta` becomes `1.2.0-beta`.
fn pad_core(raw: &str) -> String {
	let split = raw.find(['-', '+']).unwrap_or(raw.len());
	let (core, suffix) = raw.split_at(split);
	let parts = core.split('.').count();
	match parts {
		1 => format!("{core}.0.0{suffix}"),
		2 => format!("{core}.0{suffix}"),
		_ => raw.to_string(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn sem_ver(left: &str, op: &str, right: &str) -> Value {
		SemVer.evaluate(&[json!(left), json!(op), json!(right)], &Value::Null)
	}

	#[test]
	fn test_comparisons() {
		assert_eq!(sem_ver("1.2.3", "=", "1.2.3"), json!(true));
		assert_eq!(sem_ver("1.2.3", "!=", "1.2.4"), json!(true));
		assert_eq!(sem_ver("1.2.3", "<", "1.10.0"), json!(true));
		assert_eq!(sem_ver("2.0.0", "<=", "2.0.0"), json!(true));
		assert_eq!(sem_ver("2.0.0", ">", "2.0.0-rc.1"), json!(true));
		assert_eq!(sem_ver("1.0.0", ">=", "1.0.1"), json!(false));
	}

	#[test]
	fn test_caret_and_tilde() {
		assert_eq!(sem_ver("1.2.3", "^", "1.0.0"), json!(true));
		assert_eq!(sem_ver("2.2.3", "^", "1.0.0"), json!(false));
		assert_eq!(sem_ver("1.2.9", "~", "1.2.0"), json!(true));
		assert_eq!(sem_ver("1.3.0", "~", "1.2.0"), json!(false));
	}

	#[test]
	fn test_prefix_and_partial_versions() {
		assert_eq!(sem_ver("v1.2.3", "=", "1.2.3"), json!(true));
		assert_eq!(sem_ver("V2", "=", "2.0.0"), json!(true));
		assert_eq!(sem_ver("1.4", "<", "1.4.1"), json!(true));
	}

	#[test]
	fn test_build_metadata_is_ignored() {
		assert_eq!(sem_ver("1.0.0+build.5", "=", "1.0.0"), json!(true));
	}

	#[test]
	fn test_invalid_input_is_null() {
		assert_eq!(sem_ver("1.2.3", "*", "1.0.0"), Value::Null);
		assert_eq!(sem_ver("not-a-version", "=", "1.0.0"), Value::Null);
		assert_eq!(
			SemVer.evaluate(&[json!("1.0.0"), json!("=")], &Value::Null),
			Value::Null
		);
		assert_eq!(
			SemVer.evaluate(&[json!(1), json!("="), json!("1.0.0")], &Value::Null),
			Value::Null
		);
	}
}
