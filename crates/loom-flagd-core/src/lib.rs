// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types for in-process flag evaluation.
//!
//! This crate holds everything that does not need an async runtime: the flag
//! data model, the configuration parser, the pluggable schema check and the
//! targeting rule evaluator. The runtime pieces (store, sync connectors,
//! resolver) live in `loom-flagd`.
//!
//! # Example
//!
//! ```
//! use loom_flagd_core::{parse_flag_set, EvaluationContext, TargetingEvaluator};
//!
//! let flag_set = parse_flag_set(r#"{
//!     "flags": {
//!         "new-checkout": {
//!             "state": "ENABLED",
//!             "variants": {"on": true, "off": false},
//!             "defaultVariant": "off",
//!             "targeting": {"if": [{"ends_with": [{"var": "email"}, "@example.com"]}, "on"]}
//!         }
//!     }
//! }"#).unwrap();
//!
//! let flag = flag_set.get("new-checkout").unwrap();
//! let ctx = EvaluationContext::new().with_attribute("email", "dev@example.com");
//!
//! let variant = TargetingEvaluator::new()
//!     .evaluate("new-checkout", flag.targeting.rule().unwrap(), &ctx.to_json())
//!     .unwrap();
//! assert_eq!(variant, Some(serde_json::json!("on")));
//! ```

pub mod error;
pub mod evaluation;
pub mod flag;
pub mod flag_set;
pub mod parser;
pub mod schema;
pub mod targeting;

pub use error::{FlagsError, Result};
pub use evaluation::{
	ErrorCode, EvaluationContext, EvaluationReason, EvaluationResult, FlagType, FlagValue,
	FlagValueType, TARGETING_KEY,
};
pub use flag::{FeatureFlag, FlagState, Metadata, MetadataValue, Targeting};
pub use flag_set::FlagSet;
pub use parser::{parse_flag_set, FlagParser, ParseOptions};
pub use schema::{SchemaValidator, SchemaViolation, SharedSchemaValidator, StructuralValidator};
pub use targeting::{
	Operation, TargetingError, TargetingEvaluator, TargetingOutcome, FLAGD_PROPERTIES_KEY,
};
