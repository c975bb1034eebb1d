// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Flag-level and flag-set-level metadata. Values are scalars only.
pub type Metadata = HashMap<String, MetadataValue>;

/// Whether a flag participates in evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FlagState {
	Enabled,
	Disabled,
}

/// A scalar metadata value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
	Boolean(bool),
	Integer(i64),
	Double(f64),
	String(String),
}

impl MetadataValue {
	/// Converts a JSON scalar. Objects, arrays and null have no metadata form.
	pub fn from_json(value: &Value) -> Option<Self> {
		match value {
			Value::Bool(b) => Some(MetadataValue::Boolean(*b)),
			Value::Number(n) => n
				.as_i64()
				.map(MetadataValue::Integer)
				.or_else(|| n.as_f64().map(MetadataValue::Double)),
			Value::String(s) => Some(MetadataValue::String(s.clone())),
			_ => None,
		}
	}

	pub fn to_json(&self) -> Value {
		match self {
			MetadataValue::Boolean(b) => Value::Bool(*b),
			MetadataValue::Integer(i) => Value::from(*i),
			MetadataValue::Double(d) => Value::from(*d),
			MetadataValue::String(s) => Value::String(s.clone()),
		}
	}
}

impl fmt::Display for MetadataValue {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			MetadataValue::Boolean(b) => write!(f, "{b}"),
			MetadataValue::Integer(i) => write!(f, "{i}"),
			MetadataValue::Double(d) => write!(f, "{d}"),
			MetadataValue::String(s) => f.write_str(s),
		}
	}
}

impl From<&str> for MetadataValue {
	fn from(value: &str) -> Self {
		MetadataValue::String(value.to_string())
	}
}

impl From<String> for MetadataValue {
	fn from(value: String) -> Self {
		MetadataValue::String(value)
	}
}

impl From<bool> for MetadataValue {
	fn from(value: bool) -> Self {
		MetadataValue::Boolean(value)
	}
}

impl From<i64> for MetadataValue {
	fn from(value: i64) -> Self {
		MetadataValue::Integer(value)
	}
}

impl From<f64> for MetadataValue {
	fn from(value: f64) -> Self {
		MetadataValue::Double(value)
	}
}

/// The targeting rule of a flag.
///
/// An absent rule, `null` and `{}` all collapse into [`Targeting::None`] so the
/// resolver can tell "static flag" apart from "rule that matched nothing".
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Targeting {
	#[default]
	None,
	Rule(Value),
}

impl Targeting {
	pub fn from_value(value: Option<Value>) -> Self {
		match value {
			None | Some(Value::Null) => Targeting::None,
			Some(Value::Object(map)) if map.is_empty() => Targeting::None,
			Some(rule) => Targeting::Rule(rule),
		}
	}

	pub fn rule(&self) -> Option<&Value> {
		match self {
			Targeting::None => None,
			Targeting::Rule(rule) => Some(rule),
		}
	}

	pub fn is_none(&self) -> bool {
		matches!(self, Targeting::None)
	}
}

/// A single feature flag as delivered by the sync service.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFlag {
	pub state: FlagState,
	/// Empty when the document leaves it out or sets it to null.
	#[serde(default, deserialize_with = "null_as_empty")]
	pub default_variant: String,
	#[serde(default)]
	pub variants: HashMap<String, Value>,
	#[serde(default, deserialize_with = "deserialize_targeting")]
	pub targeting: Targeting,
	#[serde(default)]
	pub metadata: Metadata,
}

impl FeatureFlag {
	pub fn new(state: FlagState, default_variant: impl Into<String>) -> Self {
		Self {
			state,
			default_variant: default_variant.into(),
			variants: HashMap::new(),
			targeting: Targeting::None,
			metadata: Metadata::new(),
		}
	}

	pub fn with_variant(mut self, name: impl Into<String>, value: Value) -> Self {
		self.variants.insert(name.into(), value);
		self
	}

	pub fn with_targeting(mut self, rule: Value) -> Self {
		self.targeting = Targeting::from_value(Some(rule));
		self
	}

	pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
		self.metadata.insert(key.into(), value.into());
		self
	}

	pub fn is_enabled(&self) -> bool {
		self.state == FlagState::Enabled
	}

	pub fn variant_value(&self, variant: &str) -> Option<&Value> {
		self.variants.get(variant)
	}
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
	D: Deserializer<'de>,
{
	Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn deserialize_targeting<'de, D>(deserializer: D) -> Result<Targeting, D::Error>
where
	D: Deserializer<'de>,
{
	let value = Option::<Value>::deserialize(deserializer)?;
	Ok(Targeting::from_value(value))
}
