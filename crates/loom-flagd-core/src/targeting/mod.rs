// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Targeting rule evaluation.
//!
//! Rules are JsonLogic, evaluated by `datalogic-rs`, extended with
//! `fractional`, `sem_ver`, `starts_with` and `ends_with`. Before each
//! evaluation the context gains a reserved `$flagd` object holding the flag
//! key and the current unix timestamp.

mod fractional;
mod logic;
mod sem_ver;
mod string_comp;

use std::sync::Arc;

use chrono::Utc;
use datalogic_rs::DataLogic;
use serde_json::{json, Map, Value};
use thiserror::Error;

pub use fractional::Fractional;
use logic::OperationAdapter;
pub use logic::{lookup, to_js_string, Operation};
pub use sem_ver::SemVer;
pub use string_comp::StringComparison;

/// Reserved context key under which evaluation properties are injected.
pub const FLAGD_PROPERTIES_KEY: &str = "$flagd";

/// A rule could not be evaluated. Distinct from a rule that matched nothing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TargetingError {
	#[error("unknown operator `{0}`")]
	UnknownOperator(String),

	#[error("rule evaluation failed: {0}")]
	Evaluation(String),
}

impl From<datalogic_rs::Error> for TargetingError {
	fn from(err: datalogic_rs::Error) -> Self {
		match err {
			datalogic_rs::Error::InvalidOperator(name) => TargetingError::UnknownOperator(name),
			other => TargetingError::Evaluation(other.to_string()),
		}
	}
}

/// What a targeting result means for variant selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetingOutcome {
	/// The rule named a variant.
	Variant(String),
	/// The rule produced nothing; fall back to the default variant.
	Default,
	/// The rule produced a value that cannot name a variant.
	Unusable(String),
}

impl TargetingOutcome {
	pub fn from_result(result: Option<Value>) -> Self {
		match result {
			None | Some(Value::Null) => TargetingOutcome::Default,
			Some(Value::String(s)) if s.is_empty() => TargetingOutcome::Default,
			Some(Value::String(s)) => TargetingOutcome::Variant(s),
			Some(scalar @ (Value::Bool(_) | Value::Number(_))) => {
				TargetingOutcome::Variant(to_js_string(&scalar))
			}
			Some(structure) => TargetingOutcome::Unusable(format!(
				"targeting rule returned a structure instead of a variant name: {structure}"
			)),
		}
	}
}

/// Evaluates targeting rules with the custom operators installed.
pub struct TargetingEvaluator {
	engine: DataLogic,
	operations: Vec<String>,
}

impl std::fmt::Debug for TargetingEvaluator {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("TargetingEvaluator")
			.field("operations", &self.operations)
			.finish_non_exhaustive()
	}
}

impl Default for TargetingEvaluator {
	fn default() -> Self {
		Self::new()
	}
}

impl TargetingEvaluator {
	pub fn new() -> Self {
		Self {
			engine: DataLogic::new(),
			operations: Vec::new(),
		}
		.with_operation("fractional", Arc::new(Fractional))
		.with_operation("sem_ver", Arc::new(SemVer))
		.with_operation("starts_with", Arc::new(StringComparison::StartsWith))
		.with_operation("ends_with", Arc::new(StringComparison::EndsWith))
	}

	/// Registers a custom operator on the engine.
	pub fn with_operation(mut self, name: impl Into<String>, op: Arc<dyn Operation>) -> Self {
		let name = name.into();
		self.engine
			.add_operator(name.clone(), Box::new(OperationAdapter::new(op)));
		self.operations.push(name);
		self
	}

	/// Evaluates `rule` for `flag_key`. `Ok(None)` means the rule produced null.
	pub fn evaluate(
		&self,
		flag_key: &str,
		rule: &Value,
		context: &Map<String, Value>,
	) -> Result<Option<Value>, TargetingError> {
		let mut data = context.clone();
		data.insert(
			FLAGD_PROPERTIES_KEY.to_string(),
			json!({
				"flagKey": flag_key,
				"timestamp": Utc::now().timestamp(),
			}),
		);

		let compiled = self.engine.compile(rule)?;
		match self.engine.evaluate_owned(&compiled, Value::Object(data))? {
			Value::Null => Ok(None),
			value => Ok(Some(value)),
		}
	}
}
