// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-process flag resolution.
//!
//! [`InProcessResolver`] wires a [`Connector`] to a [`FlagStore`] and answers
//! typed flag lookups from the local table. Lookups never touch the network
//! and never fail outright: problems are reported through the `error_code` of
//! the returned [`EvaluationResult`].
//!
//! # Example
//!
//! ```ignore
//! use loom_flagd::{EvaluationContext, InProcessResolver, ResolverConfig};
//!
//! let resolver = InProcessResolver::builder()
//!     .config(ResolverConfig::default())
//!     .build()?;
//! resolver.init().await?;
//!
//! let ctx = EvaluationContext::new().with_targeting_key("user-1");
//! let result = resolver.resolve_boolean("new-checkout", false, &ctx);
//! ```

use std::sync::Arc;

use loom_flagd_core::{
	ErrorCode, EvaluationContext, EvaluationReason, EvaluationResult, FlagParser, FlagType,
	FlagValue, FlagValueType, Metadata, Operation, ParseOptions, SharedSchemaValidator,
	TargetingEvaluator, TargetingOutcome,
};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ResolverConfig;
use crate::error::{FlagdError, Result};
use crate::store::{FlagStore, StorageState, StorageStateChange};
use crate::sync::{Connector, FileConnector, GrpcStreamConnector};

/// Lifecycle notifications derived from storage status changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
	/// A configuration was installed after startup or after a degraded period.
	Ready,
	/// A later configuration changed these flags (sorted).
	ConfigurationChanged { flags_changed: Vec<String> },
	/// The flag source is unhealthy; answers may be out of date.
	Stale { message: String },
	/// The latest configuration could not be applied.
	Error { message: String },
}

/// Receives [`ProviderEvent`]s.
///
/// Called from the resolver's status task, one event at a time. Keep it fast;
/// a slow listener delays later events, and status updates that do not fit in
/// the status channel are dropped.
pub trait StatusListener: Send + Sync + 'static {
	fn on_event(&self, event: ProviderEvent);
}

pub type SharedStatusListener = Arc<dyn StatusListener>;

/// Discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpStatusListener;

impl StatusListener for NoOpStatusListener {
	fn on_event(&self, _event: ProviderEvent) {}
}

/// Supplies base context attributes from the flag set's global metadata.
///
/// The caller's context is overlaid on the result, so caller attributes win.
pub trait ContextEnricher: Send + Sync + 'static {
	fn enrich(&self, metadata: &Metadata) -> EvaluationContext;
}

pub type SharedContextEnricher = Arc<dyn ContextEnricher>;

/// Builder for [`InProcessResolver`].
#[derive(Default)]
pub struct InProcessResolverBuilder {
	config: Option<ResolverConfig>,
	connector: Option<Arc<dyn Connector>>,
	listener: Option<SharedStatusListener>,
	enricher: Option<SharedContextEnricher>,
	validator: Option<SharedSchemaValidator>,
	operations: Vec<(String, Arc<dyn Operation>)>,
}

impl InProcessResolverBuilder {
	pub fn config(mut self, config: ResolverConfig) -> Self {
		self.config = Some(config);
		self
	}

	/// Overrides the connector that would be derived from the config.
	pub fn connector(self, connector: impl Connector + 'static) -> Self {
		self.shared_connector(Arc::new(connector))
	}

	pub fn shared_connector(mut self, connector: Arc<dyn Connector>) -> Self {
		self.connector = Some(connector);
		self
	}

	pub fn status_listener(mut self, listener: impl StatusListener) -> Self {
		self.listener = Some(Arc::new(listener));
		self
	}

	pub fn context_enricher(mut self, enricher: impl ContextEnricher) -> Self {
		self.enricher = Some(Arc::new(enricher));
		self
	}

	pub fn schema_validator(mut self, validator: SharedSchemaValidator) -> Self {
		self.validator = Some(validator);
		self
	}

	/// Registers an extra targeting operator.
	pub fn operation(mut self, name: impl Into<String>, op: Arc<dyn Operation>) -> Self {
		self.operations.push((name.into(), op));
		self
	}

	/// Validates the config and picks a connector: the file connector when an
	/// offline source is configured, the sync stream otherwise.
	pub fn build(self) -> Result<InProcessResolver> {
		let config = self.config.unwrap_or_default();
		config.validate()?;

		let connector: Arc<dyn Connector> = match self.connector {
			Some(connector) => connector,
			None => match FileConnector::from_config(&config) {
				Some(file) => Arc::new(file),
				None => Arc::new(GrpcStreamConnector::from_config(&config)?),
			},
		};

		let mut parser = FlagParser::new(ParseOptions {
			throw_if_invalid: config.throw_if_invalid,
		});
		if let Some(validator) = self.validator {
			parser = parser.with_validator(validator);
		}

		let evaluator = self
			.operations
			.into_iter()
			.fold(TargetingEvaluator::new(), |evaluator, (name, op)| {
				evaluator.with_operation(name, op)
			});

		Ok(InProcessResolver {
			store: FlagStore::new(parser),
			connector,
			evaluator,
			listener: self
				.listener
				.unwrap_or_else(|| Arc::new(NoOpStatusListener)),
			enricher: self.enricher,
			cancel: CancellationToken::new(),
			tasks: Mutex::new(Vec::new()),
			config,
		})
	}
}

/// Resolves flags against a locally synchronized flag table.
pub struct InProcessResolver {
	config: ResolverConfig,
	store: FlagStore,
	connector: Arc<dyn Connector>,
	evaluator: TargetingEvaluator,
	listener: SharedStatusListener,
	enricher: Option<SharedContextEnricher>,
	cancel: CancellationToken,
	tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for InProcessResolver {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("InProcessResolver")
			.field("config", &self.config)
			.field("store", &self.store)
			.finish_non_exhaustive()
	}
}

/// A successful lookup before conversion to the caller's type.
struct Resolved {
	value: FlagValue,
	variant: String,
	reason: EvaluationReason,
	metadata: Metadata,
}

/// A failed lookup.
struct Unresolved {
	code: ErrorCode,
	message: String,
	metadata: Metadata,
}

impl Unresolved {
	fn new(code: ErrorCode, message: impl Into<String>, metadata: Metadata) -> Self {
		Self {
			code,
			message: message.into(),
			metadata,
		}
	}
}

impl InProcessResolver {
	pub fn builder() -> InProcessResolverBuilder {
		InProcessResolverBuilder::default()
	}

	pub fn config(&self) -> &ResolverConfig {
		&self.config
	}

	pub fn store(&self) -> &FlagStore {
		&self.store
	}

	/// Starts syncing and waits up to the configured deadline for the first
	/// configuration.
	///
	/// On timeout the background sync keeps running; resolutions succeed as
	/// soon as a configuration arrives.
	pub async fn init(&self) -> Result<()> {
		if self.cancel.is_cancelled() {
			return Err(FlagdError::Closed);
		}

		let payloads = self.connector.start().await?;
		{
			let mut tasks = self.tasks.lock();
			tasks.push(self.store.spawn_consumer(payloads, self.cancel.child_token()));
			if let Some(status) = self.store.take_status_receiver() {
				tasks.push(tokio::spawn(forward_status(
					status,
					Arc::clone(&self.listener),
					self.cancel.child_token(),
				)));
			}
		}

		let deadline = self.config.deadline;
		match tokio::time::timeout(deadline, self.store.wait_initialized()).await {
			Ok(()) => {
				info!(flags = self.store.flag_count(), "in-process resolver ready");
				Ok(())
			}
			Err(_) => {
				warn!(deadline_ms = deadline.as_millis() as u64, "no flag configuration before deadline");
				Err(FlagdError::InitializationTimeout(deadline))
			}
		}
	}

	/// Stops the connector and background tasks. Safe to call repeatedly.
	pub async fn shutdown(&self) {
		self.cancel.cancel();
		self.connector.shutdown().await;

		let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
		for mut task in tasks {
			if tokio::time::timeout(self.config.shutdown_grace, &mut task)
				.await
				.is_err()
			{
				task.abort();
			}
		}
		debug!("in-process resolver shut down");
	}

	pub fn resolve_boolean(
		&self,
		flag_key: &str,
		default: bool,
		ctx: &EvaluationContext,
	) -> EvaluationResult<bool> {
		self.resolve_typed(flag_key, default, ctx)
	}

	pub fn resolve_string(
		&self,
		flag_key: &str,
		default: impl Into<String>,
		ctx: &EvaluationContext,
	) -> EvaluationResult<String> {
		self.resolve_typed(flag_key, default.into(), ctx)
	}

	pub fn resolve_integer(
		&self,
		flag_key: &str,
		default: i64,
		ctx: &EvaluationContext,
	) -> EvaluationResult<i64> {
		self.resolve_typed(flag_key, default, ctx)
	}

	pub fn resolve_double(
		&self,
		flag_key: &str,
		default: f64,
		ctx: &EvaluationContext,
	) -> EvaluationResult<f64> {
		self.resolve_typed(flag_key, default, ctx)
	}

	pub fn resolve_object(
		&self,
		flag_key: &str,
		default: Value,
		ctx: &EvaluationContext,
	) -> EvaluationResult<Value> {
		self.resolve_typed(flag_key, default, ctx)
	}

	/// Resolves `flag_key` as `T`, falling back to `default` on any error.
	pub fn resolve_typed<T: FlagValueType>(
		&self,
		flag_key: &str,
		default: T,
		ctx: &EvaluationContext,
	) -> EvaluationResult<T> {
		let result = match self.resolve(flag_key, T::TYPE, ctx) {
			Ok(resolved) => match T::from_flag_value(resolved.value) {
				Some(value) => EvaluationResult::success(
					flag_key,
					value,
					resolved.variant,
					resolved.reason,
					resolved.metadata,
				),
				None => EvaluationResult::error(
					flag_key,
					default,
					ErrorCode::TypeMismatch,
					format!("flag `{flag_key}` is not a {}", T::TYPE),
					resolved.metadata,
				),
			},
			Err(failure) => EvaluationResult::error(
				flag_key,
				default,
				failure.code,
				failure.message,
				failure.metadata,
			),
		};

		debug!(
			flag_key = %flag_key,
			reason = %result.reason,
			error_code = ?result.error_code,
			"flag resolved"
		);
		result
	}

	fn resolve(
		&self,
		flag_key: &str,
		expected: FlagType,
		ctx: &EvaluationContext,
	) -> std::result::Result<Resolved, Unresolved> {
		if !self.store.is_initialized() {
			return Err(Unresolved::new(
				ErrorCode::ProviderNotReady,
				"no flag configuration received yet",
				Metadata::new(),
			));
		}

		let flag_set = self.store.snapshot();
		let flag = match flag_set.get(flag_key) {
			Some(flag) if flag.is_enabled() => flag,
			Some(_) => {
				return Err(Unresolved::new(
					ErrorCode::FlagNotFound,
					format!("flag `{flag_key}` is disabled"),
					flag_set.metadata.clone(),
				))
			}
			None => {
				return Err(Unresolved::new(
					ErrorCode::FlagNotFound,
					format!("flag `{flag_key}` not found"),
					flag_set.metadata.clone(),
				))
			}
		};

		let mut metadata = flag_set.metadata.clone();
		metadata.extend(flag.metadata.iter().map(|(k, v)| (k.clone(), v.clone())));

		// The enricher sees every resolution, including static ones.
		let context = match &self.enricher {
			Some(enricher) => enricher.enrich(&flag_set.metadata).merge(ctx.clone()),
			None => ctx.clone(),
		};

		let (variant, reason) = match flag.targeting.rule() {
			None => (flag.default_variant.clone(), EvaluationReason::Static),
			Some(rule) => {
				let result = match self.evaluator.evaluate(flag_key, rule, &context.to_json()) {
					Ok(result) => result,
					Err(e) => {
						warn!(flag_key = %flag_key, error = %e, "targeting rule failed");
						return Err(Unresolved::new(ErrorCode::ParseError, e.to_string(), metadata));
					}
				};

				match TargetingOutcome::from_result(result) {
					TargetingOutcome::Variant(variant) => (variant, EvaluationReason::TargetingMatch),
					TargetingOutcome::Default => {
						(flag.default_variant.clone(), EvaluationReason::Default)
					}
					TargetingOutcome::Unusable(message) => {
						return Err(Unresolved::new(ErrorCode::General, message, metadata));
					}
				}
			}
		};

		let Some(raw) = flag.variant_value(&variant) else {
			if variant.is_empty() && flag.default_variant.is_empty() {
				return Err(Unresolved::new(
					ErrorCode::FlagNotFound,
					format!("flag `{flag_key}` has no default variant configured"),
					metadata,
				));
			}
			return Err(Unresolved::new(
				ErrorCode::General,
				format!("flag `{flag_key}` has no variant `{variant}`"),
				metadata,
			));
		};

		match FlagValue::coerce(raw, expected) {
			Some(value) => Ok(Resolved {
				value,
				variant,
				reason,
				metadata,
			}),
			None => Err(Unresolved::new(
				ErrorCode::TypeMismatch,
				format!("variant `{variant}` of flag `{flag_key}` is not a {expected}"),
				metadata,
			)),
		}
	}
}

/// Turns storage status changes into provider events until cancelled.
async fn forward_status(
	mut status: mpsc::Receiver<StorageStateChange>,
	listener: SharedStatusListener,
	cancel: CancellationToken,
) {
	let mut healthy = false;
	loop {
		let change = tokio::select! {
			change = status.recv() => match change {
				Some(change) => change,
				None => break,
			},
			_ = cancel.cancelled() => break,
		};

		for event in provider_events(change, &mut healthy) {
			listener.on_event(event);
		}
	}
	debug!("status forwarder stopped");
}

fn provider_events(change: StorageStateChange, healthy: &mut bool) -> Vec<ProviderEvent> {
	let message = change.message.unwrap_or_default();
	match change.state {
		StorageState::Ok => {
			let mut events = Vec::new();
			if !std::mem::replace(healthy, true) {
				events.push(ProviderEvent::Ready);
			}
			if !change.changed_keys.is_empty() {
				let mut flags_changed: Vec<String> = change.changed_keys.into_iter().collect();
				flags_changed.sort();
				events.push(ProviderEvent::ConfigurationChanged { flags_changed });
			}
			events
		}
		StorageState::Stale => {
			*healthy = false;
			vec![ProviderEvent::Stale { message }]
		}
		StorageState::Error => {
			*healthy = false;
			vec![ProviderEvent::Error { message }]
		}
	}
}
