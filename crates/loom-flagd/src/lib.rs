// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-process feature flag evaluation with streaming configuration sync.
//!
//! A background connector keeps a local replica of the flag configuration up
//! to date, either over the `flagd.sync.v1` streaming RPC or from a local file,
//! and the resolver evaluates flags against that replica without a network
//! round-trip per lookup.
//!
//! # Features
//!
//! - **Streaming sync**: long-lived `SyncFlags` stream with silent-then-loud
//!   reconnect backoff
//! - **Offline mode**: poll a local configuration file instead
//! - **Targeting**: JsonLogic rules plus `fractional`, `sem_ver`,
//!   `starts_with` and `ends_with`
//! - **Typed resolution**: boolean, string, integer, double and object flags
//!
//! # Example
//!
//! ```ignore
//! use loom_flagd::{load_config, EvaluationContext, InProcessResolver};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let resolver = InProcessResolver::builder()
//!         .config(load_config(None)?)
//!         .build()?;
//!     resolver.init().await?;
//!
//!     let ctx = EvaluationContext::new()
//!         .with_targeting_key("user-123")
//!         .with_attribute("email", "dev@example.com");
//!     let enabled = resolver.resolve_boolean("new-checkout", false, &ctx);
//!     println!("{} ({})", enabled.value, enabled.reason);
//!
//!     resolver.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod backoff;
pub mod config;
pub mod error;
pub mod resolver;
pub mod store;
pub mod sync;

pub use config::{load_config, load_config_from_sources, ResolverConfig, ResolverConfigLayer};
pub use error::{ConfigError, FlagdError, Result};
pub use resolver::{
	ContextEnricher, InProcessResolver, InProcessResolverBuilder, NoOpStatusListener,
	ProviderEvent, SharedContextEnricher, SharedStatusListener, StatusListener,
};
pub use store::{FlagStore, StorageState, StorageStateChange};
pub use sync::{
	Connector, FileConnector, GrpcStreamConnector, GrpcSyncTransport, PayloadReceiver,
	QueuePayload, StreamSettings, SyncEvent, SyncRequest, SyncTransport,
};

// Re-export core types for convenience
pub use loom_flagd_core::{
	ErrorCode, EvaluationContext, EvaluationReason, EvaluationResult, FeatureFlag, FlagSet,
	FlagState, FlagType, FlagValue, Metadata, MetadataValue, SchemaValidator,
	SharedSchemaValidator, StructuralValidator,
};
