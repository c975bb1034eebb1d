// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Pluggable validation of raw configuration documents.
//!
//! Validation is a pre-check that runs before fragment substitution. A
//! validator never fails: it reports violations and the parser decides whether
//! they are fatal.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Maximum number of documents whose validation outcome is remembered.
const CACHE_CAPACITY: usize = 32;

/// A single problem found in a configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaViolation {
	/// JSON pointer to the offending node.
	pub path: String,
	pub message: String,
}

impl SchemaViolation {
	pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
		Self {
			path: path.into(),
			message: message.into(),
		}
	}
}

impl fmt::Display for SchemaViolation {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}: {}", self.path, self.message)
	}
}

/// Validates a raw configuration document.
pub trait SchemaValidator: Send + Sync {
	fn validate(&self, document: &Value) -> Vec<SchemaViolation>;
}

pub type SharedSchemaValidator = Arc<dyn SchemaValidator>;

/// Built-in validator that checks the document shape flag by flag.
///
/// Outcomes are cached by document digest, since the sync stream frequently
/// re-delivers an unchanged configuration.
#[derive(Debug, Default)]
pub struct StructuralValidator {
	cache: Mutex<HashMap<String, Arc<Vec<SchemaViolation>>>>,
}

impl StructuralValidator {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn cached_documents(&self) -> usize {
		self.cache.lock().len()
	}

	fn digest(document: &Value) -> String {
		let mut hasher = Sha256::new();
		hasher.update(document.to_string().as_bytes());
		hex::encode(hasher.finalize())
	}

	fn check(document: &Value) -> Vec<SchemaViolation> {
		let mut violations = Vec::new();

		let Some(root) = document.as_object() else {
			violations.push(SchemaViolation::new("", "document must be an object"));
			return violations;
		};

		match root.get("flags") {
			Some(Value::Object(flags)) => {
				for (key, flag) in flags {
					check_flag(&format!("/flags/{key}"), flag, &mut violations);
				}
			}
			Some(_) => violations.push(SchemaViolation::new("/flags", "must be an object")),
			None => violations.push(SchemaViolation::new("/flags", "is required")),
		}

		match root.get("$evaluators") {
			None => {}
			Some(Value::Object(fragments)) => {
				for (name, fragment) in fragments {
					if !fragment.is_object() {
						violations.push(SchemaViolation::new(
							format!("/$evaluators/{name}"),
							"fragment must be an object",
						));
					}
				}
			}
			Some(_) => violations.push(SchemaViolation::new("/$evaluators", "must be an object")),
		}

		if let Some(metadata) = root.get("metadata") {
			check_metadata("/metadata", metadata, &mut violations);
		}

		violations
	}
}

impl SchemaValidator for StructuralValidator {
	fn validate(&self, document: &Value) -> Vec<SchemaViolation> {
		let digest = Self::digest(document);
		if let Some(hit) = self.cache.lock().get(&digest) {
			return hit.as_ref().clone();
		}

		let violations = Arc::new(Self::check(document));

		let mut cache = self.cache.lock();
		if cache.len() >= CACHE_CAPACITY {
			cache.clear();
		}
		cache.insert(digest, Arc::clone(&violations));

		violations.as_ref().clone()
	}
}

fn check_flag(path: &str, flag: &Value, violations: &mut Vec<SchemaViolation>) {
	let Some(flag) = flag.as_object() else {
		violations.push(SchemaViolation::new(path, "flag must be an object"));
		return;
	};

	match flag.get("state").and_then(Value::as_str) {
		Some("ENABLED") | Some("DISABLED") => {}
		_ => violations.push(SchemaViolation::new(
			format!("{path}/state"),
			"must be ENABLED or DISABLED",
		)),
	}

	let variants = match flag.get("variants") {
		Some(Value::Object(variants)) if !variants.is_empty() => Some(variants),
		Some(Value::Object(_)) => {
			violations.push(SchemaViolation::new(
				format!("{path}/variants"),
				"must declare at least one variant",
			));
			None
		}
		_ => {
			violations.push(SchemaViolation::new(
				format!("{path}/variants"),
				"must be an object",
			));
			None
		}
	};

	match flag.get("defaultVariant") {
		None | Some(Value::Null) => {}
		Some(Value::String(name)) => {
			if let Some(variants) = variants {
				if !variants.contains_key(name) {
					violations.push(SchemaViolation::new(
						format!("{path}/defaultVariant"),
						format!("variant `{name}` is not declared"),
					));
				}
			}
		}
		Some(_) => violations.push(SchemaViolation::new(
			format!("{path}/defaultVariant"),
			"must be a string or null",
		)),
	}

	if let Some(targeting) = flag.get("targeting") {
		if !targeting.is_object() && !targeting.is_null() {
			violations.push(SchemaViolation::new(
				format!("{path}/targeting"),
				"must be an object",
			));
		}
	}

	if let Some(metadata) = flag.get("metadata") {
		check_metadata(&format!("{path}/metadata"), metadata, violations);
	}
}

fn check_metadata(path: &str, metadata: &Value, violations: &mut Vec<SchemaViolation>) {
	let Some(entries) = metadata.as_object() else {
		violations.push(SchemaViolation::new(path, "must be an object"));
		return;
	};

	for (key, value) in entries {
		if !(value.is_boolean() || value.is_number() || value.is_string()) {
			violations.push(SchemaViolation::new(
				format!("{path}/{key}"),
				"metadata values must be scalars",
			));
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn test_valid_document_has_no_violations() {
		let validator = StructuralValidator::new();
		let doc = json!({
			"flags": {
				"f": {
					"state": "ENABLED",
					"variants": {"on": true, "off": false},
					"defaultVariant": "on",
					"targeting": {"if": [true, "on", "off"]},
					"metadata": {"team": "core"}
				}
			},
			"$evaluators": {"frag": {"in": ["a", "abc"]}},
			"metadata": {"flagSetId": "set-1"}
		});

		assert!(validator.validate(&doc).is_empty());
	}

	#[test]
	fn test_reports_each_problem() {
		let validator = StructuralValidator::new();
		let doc = json!({
			"flags": {
				"bad_state": {"state": "ON", "variants": {"a": 1}, "defaultVariant": "a"},
				"bad_default": {"state": "ENABLED", "variants": {"a": 1}, "defaultVariant": "b"},
				"bad_meta": {
					"state": "ENABLED",
					"variants": {"a": 1},
					"defaultVariant": "a",
					"metadata": {"nested": {"x": 1}}
				}
			}
		});

		let violations = validator.validate(&doc);
		let paths: Vec<&str> = violations.iter().map(|v| v.path.as_str()).collect();
		assert_eq!(violations.len(), 3);
		assert!(paths.contains(&"/flags/bad_state/state"));
		assert!(paths.contains(&"/flags/bad_default/defaultVariant"));
		assert!(paths.contains(&"/flags/bad_meta/metadata/nested"));
	}

	#[test]
	fn test_missing_flags() {
		let validator = StructuralValidator::new();
		let violations = validator.validate(&json!({"metadata": {}}));
		assert_eq!(violations, vec![SchemaViolation::new("/flags", "is required")]);
	}

	#[test]
	fn test_outcomes_are_cached() {
		let validator = StructuralValidator::new();
		let doc = json!({"flags": {}});

		validator.validate(&doc);
		validator.validate(&doc);
		assert_eq!(validator.cached_documents(), 1);

		validator.validate(&json!({"flags": {"x": 1}}));
		assert_eq!(validator.cached_documents(), 2);
	}
}
