// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde_json::Value;

use super::logic::Operation;

/// Which end of the string `StringComparison` checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringComparison {
	StartsWith,
	EndsWith,
}

impl Operation for StringComparison {
	fn evaluate(&self, args: &[Value], _data: &Value) -> Value {
		let [Value::String(subject), Value::String(affix)] = args else {
			return Value::Null;
		};

		let matched = match self {
			StringComparison::StartsWith => subject.starts_with(affix.as_str()),
			StringComparison::EndsWith => subject.ends_with(affix.as_str()),
		};
		Value::Bool(matched)
	}
}
