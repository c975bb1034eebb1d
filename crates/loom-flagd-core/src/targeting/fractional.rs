// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The `fractional` operator: deterministic percentage splits.
//!
//! ```json
//! {"fractional": [{"var": "email"}, ["red", 50], ["blue", 50]]}
//! {"fractional": [["red", 25], ["blue", 75]]}
//! ```
//!
//! When the first argument is a string it is the bucketing key, otherwise the
//! context's targeting key is used. Weights default to 1 and are normalized
//! against their total.

use std::io::Cursor;

use murmur3::murmur3_32;
use serde_json::Value;
use tracing::debug;

use super::logic::{lookup, Operation};
use super::FLAGD_PROPERTIES_KEY;
use crate::evaluation::TARGETING_KEY;

#[derive(Debug, Clone, Copy, Default)]
pub struct Fractional;

struct Distribution<'a> {
	variant: &'a str,
	weight: u64,
}

impl Operation for Fractional {
	fn evaluate(&self, args: &[Value], data: &Value) -> Value {
		let (bucket_key, entries) = match args {
			[Value::String(key), rest @ ..] => (key.clone(), rest),
			_ => match data.get(TARGETING_KEY).and_then(Value::as_str) {
				Some(key) => (key.to_string(), args),
				None => {
					debug!("fractional: no bucketing key and no targeting key");
					return Value::Null;
				}
			},
		};

		let Some(distributions) = parse_distributions(entries) else {
			debug!("fractional: malformed distribution list");
			return Value::Null;
		};

		let flag_key = lookup(data, &format!("{FLAGD_PROPERTIES_KEY}.flagKey"))
			.and_then(Value::as_str)
			.unwrap_or_default();

		match select(&format!("{flag_key}{bucket_key}"), &distributions) {
			Some(variant) => Value::String(variant.to_string()),
			None => Value::Null,
		}
	}
}

fn parse_distributions(entries: &[Value]) -> Option<Vec<Distribution<'_>>> {
	if entries.is_empty() {
		return None;
	}

	entries
		.iter()
		.map(|entry| {
			let Value::Array(pair) = entry else {
				return None;
			};
			let variant = pair.first()?.as_str()?;
			let weight = match pair.get(1) {
				None => 1,
				Some(weight) => weight.as_u64()?,
			};
			Some(Distribution { variant, weight })
		})
		.collect()
}

/// Maps `input` into `[0, 100)` and walks the cumulative percentages.
fn select<'a>(input: &str, distributions: &[Distribution<'a>]) -> Option<&'a str> {
	let total: u64 = distributions.iter().map(|d| d.weight).sum();
	if total == 0 {
		return None;
	}

	let bucket = bucket_of(input);
	let mut upper = 0.0;
	for distribution in distributions {
		upper += distribution.weight as f64 * 100.0 / total as f64;
		if bucket < upper {
			return Some(distribution.variant);
		}
	}

	distributions.last().map(|d| d.variant)
}

pub(crate) fn bucket_of(input: &str) -> f64 {
	let hash = murmur3_32(&mut Cursor::new(input.as_bytes()), 0).unwrap_or(0) as i32;
	bucket_from_hash(hash)
}

/// Maps a signed hash onto `[0, 100]`. `i32::MIN` has no `i32` absolute value
/// and lands on the top bucket.
fn bucket_from_hash(hash: i32) -> f64 {
	let magnitude = i64::from(hash).abs() as f64;
	(magnitude / i32::MAX as f64 * 100.0).min(100.0)
}
