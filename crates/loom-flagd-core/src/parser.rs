// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Parsing of flag configuration documents.
//!
//! A document looks like:
//!
//! ```json
//! {
//!   "flags": {
//!     "checkout.new_flow": {
//!       "state": "ENABLED",
//!       "variants": {"on": true, "off": false},
//!       "defaultVariant": "off",
//!       "targeting": {"if": [{"$ref": "internal_users"}, "on", null]}
//!     }
//!   },
//!   "$evaluators": {
//!     "internal_users": {"ends_with": [{"var": "email"}, "@example.com"]}
//!   },
//!   "metadata": {"flagSetId": "checkout"}
//! }
//! ```
//!
//! Entries of `$evaluators` are shared rule fragments. Every `{"$ref": "name"}`
//! is replaced textually with the fragment body before the flags are decoded.
//! Fragments are not resolved recursively.

use std::collections::HashMap;

use regex::{NoExpand, Regex};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{FlagsError, Result};
use crate::flag::{FeatureFlag, Metadata, MetadataValue};
use crate::flag_set::FlagSet;
use crate::schema::SharedSchemaValidator;

const FLAGS_KEY: &str = "flags";
const EVALUATORS_KEY: &str = "$evaluators";
const METADATA_KEY: &str = "metadata";
const REF_MARKER: &str = "\"$ref\"";

/// Parser behaviour switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseOptions {
	/// Treat schema violations as fatal instead of logging and carrying on.
	pub throw_if_invalid: bool,
}

/// Turns raw configuration documents into [`FlagSet`]s.
#[derive(Clone, Default)]
pub struct FlagParser {
	validator: Option<SharedSchemaValidator>,
	options: ParseOptions,
}

impl std::fmt::Debug for FlagParser {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("FlagParser")
			.field("validator", &self.validator.is_some())
			.field("options", &self.options)
			.finish()
	}
}

impl FlagParser {
	pub fn new(options: ParseOptions) -> Self {
		Self {
			validator: None,
			options,
		}
	}

	pub fn with_validator(mut self, validator: SharedSchemaValidator) -> Self {
		self.validator = Some(validator);
		self
	}

	pub fn options(&self) -> ParseOptions {
		self.options
	}

	/// Parses one configuration document.
	pub fn parse(&self, raw: &str) -> Result<FlagSet> {
		let document: Value = serde_json::from_str(raw)?;
		self.validate(&document)?;

		let Some(root) = document.as_object() else {
			return Err(FlagsError::MissingFlags);
		};

		let resolved = match root.get(EVALUATORS_KEY) {
			Some(Value::Object(fragments)) if !fragments.is_empty() => {
				let substituted = substitute_fragments(raw, fragments)?;
				serde_json::from_str(&substituted)?
			}
			_ => document.clone(),
		};

		let flag_set = decode_flag_set(&resolved)?;
		debug!(
			flags = flag_set.len(),
			metadata = flag_set.metadata.len(),
			"parsed flag configuration"
		);
		Ok(flag_set)
	}

	fn validate(&self, document: &Value) -> Result<()> {
		let Some(validator) = &self.validator else {
			return Ok(());
		};

		let violations = validator.validate(document);
		if violations.is_empty() {
			return Ok(());
		}

		for violation in &violations {
			warn!(path = %violation.path, message = %violation.message, "invalid flag configuration");
		}

		if self.options.throw_if_invalid {
			return Err(FlagsError::SchemaViolations(violations));
		}
		Ok(())
	}
}

/// Parses a document with default options and no validation.
pub fn parse_flag_set(raw: &str) -> Result<FlagSet> {
	FlagParser::default().parse(raw)
}

/// Replaces every `"$ref": "<name>"` with the body of fragment `name`.
///
/// The fragment is serialized and its outer braces dropped, so the braces that
/// surrounded the reference now enclose the inlined rule.
fn substitute_fragments(raw: &str, fragments: &serde_json::Map<String, Value>) -> Result<String> {
	let mut substituted = raw.to_string();

	for (name, fragment) in fragments {
		let Value::Object(_) = fragment else {
			return Err(FlagsError::InvalidFragment {
				name: name.clone(),
				message: "fragment must be an object".to_string(),
			});
		};

		let body = fragment.to_string();
		let inner = &body[1..body.len() - 1];

		let pattern = format!(r#""\$ref"\s*:\s*"{}""#, regex::escape(name));
		let reference = Regex::new(&pattern).map_err(|e| FlagsError::InvalidFragment {
			name: name.clone(),
			message: e.to_string(),
		})?;

		substituted = reference
			.replace_all(&substituted, NoExpand(inner))
			.into_owned();
	}

	let remaining = substituted.matches(REF_MARKER).count();
	if remaining > 0 {
		warn!(
			references = remaining,
			"configuration contains unresolved fragment references"
		);
	}

	Ok(substituted)
}

fn decode_flag_set(document: &Value) -> Result<FlagSet> {
	let flags = match document.get(FLAGS_KEY) {
		Some(Value::Object(flags)) => flags,
		_ => return Err(FlagsError::MissingFlags),
	};

	let mut decoded = HashMap::with_capacity(flags.len());
	for (key, raw_flag) in flags {
		let flag: FeatureFlag =
			serde_json::from_value(raw_flag.clone()).map_err(|e| FlagsError::InvalidFlag {
				key: key.clone(),
				message: e.to_string(),
			})?;
		decoded.insert(key.clone(), flag);
	}

	let metadata = match document.get(METADATA_KEY) {
		Some(Value::Object(entries)) => decode_metadata(entries),
		_ => Metadata::new(),
	};

	Ok(FlagSet::new(decoded, metadata))
}

fn decode_metadata(entries: &serde_json::Map<String, Value>) -> Metadata {
	entries
		.iter()
		.filter_map(|(key, value)| match MetadataValue::from_json(value) {
			Some(value) => Some((key.clone(), value)),
			None => {
				warn!(key = %key, "skipping non-scalar flag set metadata");
				None
			}
		})
		.collect()
}
