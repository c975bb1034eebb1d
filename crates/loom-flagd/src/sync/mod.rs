// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Flag configuration sources.
//!
//! A [`Connector`] runs in the background and hands raw configuration
//! documents to the store as [`QueuePayload`]s. Two connectors exist: the
//! streaming gRPC connector and an offline file connector.

mod file;
mod grpc;
pub mod proto;

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use loom_flagd_core::Metadata;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub use file::FileConnector;
pub use grpc::{GrpcStreamConnector, GrpcSyncTransport, StreamSettings};

use crate::error::Result;

/// Capacity of the connector output queue. The broadcast channel rounds its
/// capacity up to a power of two, so this must already be one.
pub const PAYLOAD_QUEUE_CAPACITY: usize = 8;

/// A unit of work for the store.
#[derive(Debug, Clone, PartialEq)]
pub enum QueuePayload {
	/// A full configuration document plus metadata delivered alongside it.
	Data { flags: String, metadata: Metadata },
	/// The source is unhealthy. The current table is kept.
	Error { message: String },
}

/// The consuming end of a connector's output queue.
///
/// The queue is bounded and never blocks the producer. A consumer that falls
/// behind loses the oldest payloads.
#[derive(Debug)]
pub struct PayloadReceiver {
	inner: broadcast::Receiver<QueuePayload>,
}

impl PayloadReceiver {
	/// Next payload, or `None` once the connector has gone away.
	pub async fn recv(&mut self) -> Option<QueuePayload> {
		loop {
			match self.inner.recv().await {
				Ok(payload) => return Some(payload),
				Err(broadcast::error::RecvError::Lagged(skipped)) => {
					warn!(skipped, "payload consumer lagged, dropped oldest payloads");
				}
				Err(broadcast::error::RecvError::Closed) => return None,
			}
		}
	}
}

/// Creates the output queue for a connector.
pub fn payload_channel() -> (PayloadSender, PayloadReceiver) {
	let (tx, rx) = broadcast::channel(PAYLOAD_QUEUE_CAPACITY);
	(PayloadSender { inner: tx }, PayloadReceiver { inner: rx })
}

/// The producing end of a connector's output queue.
#[derive(Debug, Clone)]
pub struct PayloadSender {
	inner: broadcast::Sender<QueuePayload>,
}

impl PayloadSender {
	pub fn send(&self, payload: QueuePayload) {
		if self.inner.send(payload).is_err() {
			debug!("no payload consumer, dropping payload");
		}
	}

	pub fn data(&self, flags: String, metadata: Metadata) {
		self.send(QueuePayload::Data { flags, metadata });
	}

	pub fn error(&self, message: impl Into<String>) {
		self.send(QueuePayload::Error {
			message: message.into(),
		});
	}
}

/// A background source of flag configuration.
#[async_trait]
pub trait Connector: Send + Sync {
	/// Starts the background worker. May be called once.
	async fn start(&self) -> Result<PayloadReceiver>;

	/// Stops the background worker. Safe to call repeatedly.
	async fn shutdown(&self);
}

/// Parameters of one `SyncFlags` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncRequest {
	pub provider_id: Option<String>,
	pub selector: Option<String>,
	pub deadline: Option<Duration>,
}

/// A decoded message from the sync stream.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
	Configuration {
		flags: String,
		/// When present, supersedes the `GetMetadata` result.
		sync_context: Option<Metadata>,
	},
	/// An empty message used to keep the stream alive.
	KeepAlive,
}

pub type SyncEventStream = BoxStream<'static, std::result::Result<SyncEvent, tonic::Status>>;

/// The RPC surface of the flag sync service.
#[async_trait]
pub trait SyncTransport: Send + Sync + 'static {
	/// Opens the server-streaming `SyncFlags` call.
	async fn sync_flags(&self, request: SyncRequest) -> Result<SyncEventStream>;

	/// Calls `GetMetadata` once.
	async fn fetch_metadata(&self) -> Result<Metadata>;
}

/// A spawned connector worker and the token that stops it.
#[derive(Debug)]
pub(crate) struct WorkerHandle {
	cancel: CancellationToken,
	handle: JoinHandle<()>,
}

impl WorkerHandle {
	pub(crate) fn new(cancel: CancellationToken, handle: JoinHandle<()>) -> Self {
		Self { cancel, handle }
	}

	/// Cancels the worker and waits up to `grace` before aborting it.
	pub(crate) async fn stop(self, grace: Duration) {
		self.cancel.cancel();

		let mut handle = self.handle;
		if tokio::time::timeout(grace, &mut handle).await.is_err() {
			warn!(grace_ms = grace.as_millis() as u64, "worker did not stop in time, aborting");
			handle.abort();
			let _ = handle.await;
		}
	}
}

/// Aborts a helper task when dropped.
#[derive(Debug)]
pub(crate) struct AbortOnDrop(pub(crate) JoinHandle<()>);

impl Drop for AbortOnDrop {
	fn drop(&mut self) {
		self.0.abort();
	}
}
