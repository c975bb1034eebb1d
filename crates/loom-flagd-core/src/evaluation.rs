// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Evaluation inputs and outputs.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::flag::Metadata;

/// Attribute name under which the targeting key is exposed to rules.
pub const TARGETING_KEY: &str = "targetingKey";

/// Caller-supplied attributes used by targeting rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationContext {
	pub targeting_key: Option<String>,
	#[serde(default)]
	pub attributes: HashMap<String, Value>,
}

impl EvaluationContext {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_targeting_key(mut self, key: impl Into<String>) -> Self {
		self.targeting_key = Some(key.into());
		self
	}

	pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
		self.attributes.insert(key.into(), value.into());
		self
	}

	pub fn is_empty(&self) -> bool {
		self.targeting_key.is_none() && self.attributes.is_empty()
	}

	/// Overlays `other` on top of `self`. Keys present in `other` win.
	pub fn merge(mut self, other: EvaluationContext) -> Self {
		if other.targeting_key.is_some() {
			self.targeting_key = other.targeting_key;
		}
		self.attributes.extend(other.attributes);
		self
	}

	/// The JSON object handed to targeting rules.
	pub fn to_json(&self) -> Map<String, Value> {
		let mut map: Map<String, Value> = self
			.attributes
			.iter()
			.map(|(k, v)| (k.clone(), v.clone()))
			.collect();
		if let Some(key) = &self.targeting_key {
			map.insert(TARGETING_KEY.to_string(), Value::String(key.clone()));
		}
		map
	}
}

/// Why a resolution produced its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvaluationReason {
	Static,
	Default,
	TargetingMatch,
	Disabled,
	Error,
}

impl fmt::Display for EvaluationReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			EvaluationReason::Static => "STATIC",
			EvaluationReason::Default => "DEFAULT",
			EvaluationReason::TargetingMatch => "TARGETING_MATCH",
			EvaluationReason::Disabled => "DISABLED",
			EvaluationReason::Error => "ERROR",
		};
		f.write_str(s)
	}
}

/// Machine-readable failure classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
	FlagNotFound,
	TypeMismatch,
	ParseError,
	ProviderNotReady,
	General,
}

impl fmt::Display for ErrorCode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			ErrorCode::FlagNotFound => "FLAG_NOT_FOUND",
			ErrorCode::TypeMismatch => "TYPE_MISMATCH",
			ErrorCode::ParseError => "PARSE_ERROR",
			ErrorCode::ProviderNotReady => "PROVIDER_NOT_READY",
			ErrorCode::General => "GENERAL",
		};
		f.write_str(s)
	}
}

/// The value type a caller asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagType {
	Boolean,
	String,
	Integer,
	Double,
	Object,
}

impl fmt::Display for FlagType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			FlagType::Boolean => "boolean",
			FlagType::String => "string",
			FlagType::Integer => "integer",
			FlagType::Double => "double",
			FlagType::Object => "object",
		};
		f.write_str(s)
	}
}

/// A resolved variant value in caller terms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum FlagValue {
	Boolean(bool),
	String(String),
	Integer(i64),
	Double(f64),
	Object(Value),
}

impl FlagValue {
	/// Converts a raw variant value into `expected`.
	///
	/// Integers and doubles convert into each other (doubles truncate toward
	/// zero). Objects and arrays both satisfy [`FlagType::Object`]. Anything
	/// else is a type mismatch and yields `None`.
	pub fn coerce(raw: &Value, expected: FlagType) -> Option<FlagValue> {
		match (expected, raw) {
			(FlagType::Boolean, Value::Bool(b)) => Some(FlagValue::Boolean(*b)),
			(FlagType::String, Value::String(s)) => Some(FlagValue::String(s.clone())),
			(FlagType::Integer, Value::Number(n)) => n
				.as_i64()
				.or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
				.map(FlagValue::Integer),
			(FlagType::Double, Value::Number(n)) => n.as_f64().map(FlagValue::Double),
			(FlagType::Object, Value::Object(_) | Value::Array(_)) => {
				Some(FlagValue::Object(raw.clone()))
			}
			_ => None,
		}
	}

	pub fn flag_type(&self) -> FlagType {
		match self {
			FlagValue::Boolean(_) => FlagType::Boolean,
			FlagValue::String(_) => FlagType::String,
			FlagValue::Integer(_) => FlagType::Integer,
			FlagValue::Double(_) => FlagType::Double,
			FlagValue::Object(_) => FlagType::Object,
		}
	}
}

/// Rust types that a flag can resolve into.
pub trait FlagValueType: Sized {
	const TYPE: FlagType;

	fn from_flag_value(value: FlagValue) -> Option<Self>;
}

impl FlagValueType for bool {
	const TYPE: FlagType = FlagType::Boolean;

	fn from_flag_value(value: FlagValue) -> Option<Self> {
		match value {
			FlagValue::Boolean(b) => Some(b),
			_ => None,
		}
	}
}

impl FlagValueType for String {
	const TYPE: FlagType = FlagType::String;

	fn from_flag_value(value: FlagValue) -> Option<Self> {
		match value {
			FlagValue::String(s) => Some(s),
			_ => None,
		}
	}
}

impl FlagValueType for i64 {
	const TYPE: FlagType = FlagType::Integer;

	fn from_flag_value(value: FlagValue) -> Option<Self> {
		match value {
			FlagValue::Integer(i) => Some(i),
			_ => None,
		}
	}
}

impl FlagValueType for f64 {
	const TYPE: FlagType = FlagType::Double;

	fn from_flag_value(value: FlagValue) -> Option<Self> {
		match value {
			FlagValue::Double(d) => Some(d),
			_ => None,
		}
	}
}

impl FlagValueType for Value {
	const TYPE: FlagType = FlagType::Object;

	fn from_flag_value(value: FlagValue) -> Option<Self> {
		match value {
			FlagValue::Object(v) => Some(v),
			_ => None,
		}
	}
}

/// Outcome of a single flag resolution.
///
/// Resolutions never fail outright: on error `value` carries the caller's
/// default and `error_code` says what went wrong.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationResult<T> {
	pub flag_key: String,
	pub value: T,
	pub variant: Option<String>,
	pub reason: EvaluationReason,
	pub error_code: Option<ErrorCode>,
	pub error_message: Option<String>,
	pub metadata: Metadata,
}

impl<T> EvaluationResult<T> {
	pub fn success(
		flag_key: impl Into<String>,
		value: T,
		variant: impl Into<String>,
		reason: EvaluationReason,
		metadata: Metadata,
	) -> Self {
		Self {
			flag_key: flag_key.into(),
			value,
			variant: Some(variant.into()),
			reason,
			error_code: None,
			error_message: None,
			metadata,
		}
	}

	pub fn error(
		flag_key: impl Into<String>,
		default: T,
		code: ErrorCode,
		message: impl Into<String>,
		metadata: Metadata,
	) -> Self {
		Self {
			flag_key: flag_key.into(),
			value: default,
			variant: None,
			reason: EvaluationReason::Error,
			error_code: Some(code),
			error_message: Some(message.into()),
			metadata,
		}
	}

	pub fn is_error(&self) -> bool {
		self.error_code.is_some()
	}

	pub fn map<U>(self, f: impl FnOnce(T) -> U) -> EvaluationResult<U> {
		EvaluationResult {
			flag_key: self.flag_key,
			value: f(self.value),
			variant: self.variant,
			reason: self.reason,
			error_code: self.error_code,
			error_message: self.error_message,
			metadata: self.metadata,
		}
	}
}
