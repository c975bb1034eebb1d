// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The in-memory flag table.
//!
//! Readers take a cheap snapshot (`Arc<FlagSet>`); writers swap in a whole new
//! set. A failed parse never touches the table.

use std::collections::HashSet;
use std::sync::Arc;

use loom_flagd_core::{FeatureFlag, FlagParser, FlagSet, Metadata};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::sync::{PayloadReceiver, QueuePayload};

/// Capacity of the storage status channel.
pub const STATUS_CHANNEL_CAPACITY: usize = 16;

/// Health of the flag table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageState {
	/// The table reflects the latest configuration.
	Ok,
	/// The source is unhealthy; the table may be out of date.
	Stale,
	/// The latest configuration could not be applied.
	Error,
}

/// A change in storage health, with the keys affected by a replace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageStateChange {
	pub state: StorageState,
	pub changed_keys: HashSet<String>,
	pub message: Option<String>,
}

impl StorageStateChange {
	fn ok(changed_keys: HashSet<String>) -> Self {
		Self {
			state: StorageState::Ok,
			changed_keys,
			message: None,
		}
	}

	fn degraded(state: StorageState, message: impl Into<String>) -> Self {
		Self {
			state,
			changed_keys: HashSet::new(),
			message: Some(message.into()),
		}
	}
}

struct Inner {
	table: RwLock<Arc<FlagSet>>,
	parser: FlagParser,
	status_tx: mpsc::Sender<StorageStateChange>,
	status_rx: Mutex<Option<mpsc::Receiver<StorageStateChange>>>,
	ready: watch::Sender<bool>,
}

/// Shared handle to the flag table.
#[derive(Clone)]
pub struct FlagStore {
	inner: Arc<Inner>,
}

impl std::fmt::Debug for FlagStore {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("FlagStore")
			.field("flags", &self.flag_count())
			.field("initialized", &self.is_initialized())
			.finish()
	}
}

impl Default for FlagStore {
	fn default() -> Self {
		Self::new(FlagParser::default())
	}
}

impl FlagStore {
	pub fn new(parser: FlagParser) -> Self {
		let (status_tx, status_rx) = mpsc::channel(STATUS_CHANNEL_CAPACITY);
		let (ready, _) = watch::channel(false);
		Self {
			inner: Arc::new(Inner {
				table: RwLock::new(Arc::new(FlagSet::default())),
				parser,
				status_tx,
				status_rx: Mutex::new(Some(status_rx)),
				ready,
			}),
		}
	}

	/// Installs `next` and returns the keys that differ from the previous set.
	pub fn replace(&self, next: FlagSet) -> HashSet<String> {
		let changed = {
			let mut table = self.inner.table.write();
			let changed = table.changed_keys(&next);
			*table = Arc::new(next);
			changed
		};

		self.inner.ready.send_replace(true);
		info!(changed = changed.len(), flags = self.flag_count(), "flag table replaced");
		self.emit(StorageStateChange::ok(changed.clone()));
		changed
	}

	/// Parses `raw` and installs it. Sync metadata sits under the document's.
	pub fn apply_configuration(
		&self,
		raw: &str,
		sync_metadata: Metadata,
	) -> loom_flagd_core::Result<HashSet<String>> {
		let flag_set = self
			.inner
			.parser
			.parse(raw)?
			.with_sync_metadata(sync_metadata);
		Ok(self.replace(flag_set))
	}

	/// Applies one connector payload.
	pub fn apply(&self, payload: QueuePayload) {
		match payload {
			QueuePayload::Data { flags, metadata } => {
				if let Err(e) = self.apply_configuration(&flags, metadata) {
					warn!(error = %e, "rejected flag configuration, keeping previous table");
					self.mark_error(e.to_string());
				}
			}
			QueuePayload::Error { message } => {
				warn!(message = %message, "flag source unhealthy");
				self.mark_stale(message);
			}
		}
	}

	pub fn get(&self, key: &str) -> Option<FeatureFlag> {
		self.inner.table.read().get(key).cloned()
	}

	/// The current flag set. Later replaces do not affect the snapshot.
	pub fn snapshot(&self) -> Arc<FlagSet> {
		Arc::clone(&self.inner.table.read())
	}

	pub fn mark_stale(&self, message: impl Into<String>) {
		self.emit(StorageStateChange::degraded(StorageState::Stale, message));
	}

	pub fn mark_error(&self, message: impl Into<String>) {
		self.emit(StorageStateChange::degraded(StorageState::Error, message));
	}

	/// The status channel. Only the first caller receives it.
	pub fn take_status_receiver(&self) -> Option<mpsc::Receiver<StorageStateChange>> {
		self.inner.status_rx.lock().take()
	}

	/// True once a configuration has been installed.
	pub fn is_initialized(&self) -> bool {
		*self.inner.ready.borrow()
	}

	/// Resolves once a configuration has been installed.
	pub async fn wait_initialized(&self) {
		let mut ready = self.inner.ready.subscribe();
		let _ = ready.wait_for(|ready| *ready).await;
	}

	/// Sorted keys of the current flag set.
	pub fn flag_keys(&self) -> Vec<String> {
		let mut keys: Vec<String> = self.inner.table.read().flags.keys().cloned().collect();
		keys.sort();
		keys
	}

	pub fn flag_count(&self) -> usize {
		self.inner.table.read().len()
	}

	/// Global metadata of the current flag set.
	pub fn metadata(&self) -> Metadata {
		self.inner.table.read().metadata.clone()
	}

	/// Drains `payloads` in order until the connector closes or `cancel` fires.
	pub fn spawn_consumer(
		&self,
		mut payloads: PayloadReceiver,
		cancel: CancellationToken,
	) -> JoinHandle<()> {
		let store = self.clone();
		tokio::spawn(async move {
			loop {
				tokio::select! {
					payload = payloads.recv() => match payload {
						Some(payload) => store.apply(payload),
						None => {
							debug!("payload queue closed");
							break;
						}
					},
					_ = cancel.cancelled() => break,
				}
			}
			debug!("store consumer stopped");
		})
	}

	fn emit(&self, change: StorageStateChange) {
		match self.inner.status_tx.try_send(change) {
			Ok(()) => {}
			Err(mpsc::error::TrySendError::Full(change)) => {
				warn!(state = ?change.state, "status channel full, dropping status update");
			}
			Err(mpsc::error::TrySendError::Closed(_)) => {
				debug!("status channel closed");
			}
		}
	}
}
