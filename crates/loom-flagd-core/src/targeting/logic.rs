// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Glue between flag operators and the `datalogic-rs` engine.
//!
//! The engine owns the JsonLogic builtins. Flag specific operators implement
//! [`Operation`], which sees evaluated arguments plus the evaluation data, and
//! are registered on the engine through [`OperationAdapter`].

use std::sync::Arc;

use datalogic_rs::{ContextStack, Evaluator, Operator};
use serde_json::{json, Value};

/// A custom operator. Arguments arrive already evaluated.
pub trait Operation: Send + Sync {
	fn evaluate(&self, args: &[Value], data: &Value) -> Value;
}

/// Runs an [`Operation`] as a `datalogic-rs` operator.
pub(crate) struct OperationAdapter {
	op: Arc<dyn Operation>,
}

impl OperationAdapter {
	pub(crate) fn new(op: Arc<dyn Operation>) -> Self {
		Self { op }
	}
}

impl Operator for OperationAdapter {
	fn evaluate(
		&self,
		args: &[Value],
		context: &mut ContextStack,
		evaluator: &dyn Evaluator,
	) -> datalogic_rs::Result<Value> {
		let evaluated = args
			.iter()
			.map(|arg| evaluator.evaluate(arg, context))
			.collect::<datalogic_rs::Result<Vec<_>>>()?;
		// `{"var": ""}` is the whole data object in scope.
		let data = evaluator.evaluate(&json!({"var": ""}), context)?;
		Ok(self.op.evaluate(&evaluated, &data))
	}
}

/// Resolves a dotted path such as `user.address.city` inside `data`.
pub fn lookup<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
	if path.is_empty() {
		return Some(data);
	}

	path.split('.').try_fold(data, |node, segment| match node {
		Value::Object(map) => map.get(segment),
		Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
		_ => None,
	})
}

/// JavaScript `String(value)`, used to turn scalar rule results into
/// variant names.
pub fn to_js_string(value: &Value) -> String {
	match value {
		Value::Null => "null".to_string(),
		Value::Bool(b) => b.to_string(),
		Value::Number(n) => match n.as_i64() {
			Some(i) => i.to_string(),
			None => {
				let f = n.as_f64().unwrap_or(f64::NAN);
				if f.fract() == 0.0 && f.abs() < 1e21 {
					format!("{f:.0}")
				} else {
					f.to_string()
				}
			}
		},
		Value::String(s) => s.clone(),
		Value::Array(items) => items
			.iter()
			.map(|item| match item {
				Value::Null => String::new(),
				other => to_js_string(other),
			})
			.collect::<Vec<_>>()
			.join(","),
		Value::Object(_) => "[object Object]".to_string(),
	}
}
