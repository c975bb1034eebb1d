// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Streaming sync against the flag sync service.
//!
//! Each attempt opens `SyncFlags` (and `GetMetadata`, unless disabled), then
//! forwards configuration messages until the stream completes or fails. The
//! first failure after a healthy stream is retried silently; later consecutive
//! failures are reported so the store can mark itself stale.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use loom_flagd_core::Metadata;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Certificate, ClientTlsConfig, Endpoint};
use tracing::{debug, info, warn};

use super::proto::{self, FlagSyncServiceClient};
use super::{
	payload_channel, AbortOnDrop, Connector, PayloadReceiver, PayloadSender, SyncEvent,
	SyncEventStream, SyncRequest, SyncTransport, WorkerHandle,
};
use crate::backoff::{reconnect_strategy, BackoffService, CombinedBackoff};
use crate::config::ResolverConfig;
use crate::error::{FlagdError, Result};

/// Capacity of the queue between the stream reader and the worker.
const STREAM_BUFFER_CAPACITY: usize = 5;

/// [`SyncTransport`] over a tonic channel.
#[derive(Debug, Clone)]
pub struct GrpcSyncTransport {
	client: FlagSyncServiceClient,
	deadline: Duration,
}

impl GrpcSyncTransport {
	/// Builds a lazily connecting channel to the configured endpoint.
	pub fn new(config: &ResolverConfig) -> Result<Self> {
		let uri = config.endpoint_uri();
		let mut endpoint = Endpoint::from_shared(uri.clone())
			.map_err(|e| FlagdError::InvalidEndpoint {
				endpoint: uri.clone(),
				message: e.to_string(),
			})?
			.connect_timeout(config.deadline)
			.tcp_nodelay(true);

		if let Some(interval) = config.keep_alive {
			endpoint = endpoint
				.http2_keep_alive_interval(interval)
				.keep_alive_while_idle(true);
		}

		if config.tls {
			let mut tls = ClientTlsConfig::new().domain_name(config.host.clone());
			if let Some(path) = &config.cert_path {
				let pem = std::fs::read(path)?;
				tls = tls.ca_certificate(Certificate::from_pem(pem));
			}
			endpoint = endpoint.tls_config(tls)?;
		}

		info!(endpoint = %uri, tls = config.tls, "creating lazy sync channel");
		Ok(Self {
			client: FlagSyncServiceClient::new(endpoint.connect_lazy()),
			deadline: config.deadline,
		})
	}
}

#[async_trait]
impl SyncTransport for GrpcSyncTransport {
	async fn sync_flags(&self, request: SyncRequest) -> Result<SyncEventStream> {
		let mut client = self.client.clone();
		let mut rpc = tonic::Request::new(proto::SyncFlagsRequest {
			provider_id: request.provider_id.unwrap_or_default(),
			selector: request.selector.unwrap_or_default(),
		});
		if let Some(deadline) = request.deadline {
			rpc.set_timeout(deadline);
		}

		let stream = client.sync_flags(rpc).await?.into_inner();
		Ok(stream
			.map(|message| {
				message.map(|response| {
					if response.flag_configuration.is_empty() {
						SyncEvent::KeepAlive
					} else {
						SyncEvent::Configuration {
							flags: response.flag_configuration,
							sync_context: response.sync_context.map(proto::struct_to_metadata),
						}
					}
				})
			})
			.boxed())
	}

	async fn fetch_metadata(&self) -> Result<Metadata> {
		let mut client = self.client.clone();
		let mut rpc = tonic::Request::new(proto::GetMetadataRequest {});
		rpc.set_timeout(self.deadline);

		let response = client.get_metadata(rpc).await?.into_inner();
		Ok(response
			.metadata
			.map(proto::struct_to_metadata)
			.unwrap_or_default())
	}
}

/// Settings for the streaming worker.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSettings {
	pub provider_id: Option<String>,
	pub selector: Option<String>,
	pub stream_deadline: Option<Duration>,
	pub sync_metadata_disabled: bool,
	pub retry_backoff: Duration,
	pub retry_backoff_max: Duration,
	pub retry_jitter: Duration,
	pub shutdown_grace: Duration,
}

impl From<&ResolverConfig> for StreamSettings {
	fn from(config: &ResolverConfig) -> Self {
		Self {
			provider_id: config.provider_id.clone(),
			selector: config.selector.clone(),
			stream_deadline: config.stream_deadline,
			sync_metadata_disabled: config.sync_metadata_disabled,
			retry_backoff: config.retry_backoff,
			retry_backoff_max: config.retry_backoff_max,
			retry_jitter: config.retry_jitter,
			shutdown_grace: config.shutdown_grace,
		}
	}
}

/// Keeps a sync stream open and reconnects with backoff.
pub struct GrpcStreamConnector<T = GrpcSyncTransport> {
	transport: Arc<T>,
	settings: StreamSettings,
	worker: Mutex<Option<WorkerHandle>>,
	started: std::sync::atomic::AtomicBool,
}

impl<T> std::fmt::Debug for GrpcStreamConnector<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("GrpcStreamConnector")
			.field("settings", &self.settings)
			.finish_non_exhaustive()
	}
}

impl GrpcStreamConnector<GrpcSyncTransport> {
	/// Connector against the sync service described by `config`.
	pub fn from_config(config: &ResolverConfig) -> Result<Self> {
		Ok(Self::new(GrpcSyncTransport::new(config)?, config.into()))
	}
}

impl<T: SyncTransport> GrpcStreamConnector<T> {
	pub fn new(transport: T, settings: StreamSettings) -> Self {
		Self {
			transport: Arc::new(transport),
			settings,
			worker: Mutex::new(None),
			started: std::sync::atomic::AtomicBool::new(false),
		}
	}
}

#[async_trait]
impl<T: SyncTransport> Connector for GrpcStreamConnector<T> {
	async fn start(&self) -> Result<PayloadReceiver> {
		if self.started.swap(true, std::sync::atomic::Ordering::SeqCst) {
			return Err(FlagdError::AlreadyStarted);
		}

		let (sender, receiver) = payload_channel();
		let cancel = CancellationToken::new();
		let handle = tokio::spawn(run_stream_loop(
			Arc::clone(&self.transport),
			self.settings.clone(),
			sender,
			cancel.clone(),
		));

		*self.worker.lock() = Some(WorkerHandle::new(cancel, handle));
		info!(selector = ?self.settings.selector, "sync stream connector started");
		Ok(receiver)
	}

	async fn shutdown(&self) {
		let worker = self.worker.lock().take();
		if let Some(worker) = worker {
			worker.stop(self.settings.shutdown_grace).await;
			info!("sync stream connector stopped");
		}
	}
}

/// How a single stream attempt ended.
#[derive(Debug)]
enum AttemptOutcome {
	Completed,
	Failed(String),
}

/// What the stream reader forwards to the worker.
#[derive(Debug)]
enum StreamEvent {
	Configuration {
		flags: String,
		sync_context: Option<Metadata>,
	},
	KeepAlive,
	Completed,
	Failed(String),
}

async fn run_stream_loop<T: SyncTransport>(
	transport: Arc<T>,
	settings: StreamSettings,
	sender: PayloadSender,
	cancel: CancellationToken,
) {
	let mut backoff = BackoffService::new(
		reconnect_strategy(settings.retry_backoff, settings.retry_backoff_max),
		settings.retry_jitter,
	);

	loop {
		let outcome = tokio::select! {
			outcome = run_attempt(transport.as_ref(), &settings, &sender, &mut backoff) => outcome,
			_ = cancel.cancelled() => break,
		};

		let message = match outcome {
			AttemptOutcome::Completed => "sync stream completed".to_string(),
			AttemptOutcome::Failed(reason) => format!("sync stream failed: {reason}"),
		};

		if backoff.strategy().current_strategy_index() == 0 {
			debug!(message = %message, "retrying sync stream silently");
		} else {
			warn!(message = %message, "sync stream unavailable");
			sender.error(message);
		}

		if !backoff.wait(&cancel).await {
			break;
		}
	}

	debug!("sync stream worker stopped");
}

async fn run_attempt<T: SyncTransport>(
	transport: &T,
	settings: &StreamSettings,
	sender: &PayloadSender,
	backoff: &mut BackoffService<CombinedBackoff>,
) -> AttemptOutcome {
	let request = SyncRequest {
		provider_id: settings.provider_id.clone(),
		selector: settings.selector.clone(),
		deadline: settings.stream_deadline,
	};

	let metadata_call = async {
		if settings.sync_metadata_disabled {
			Ok(Metadata::new())
		} else {
			transport.fetch_metadata().await
		}
	};

	let (stream, metadata) = tokio::join!(transport.sync_flags(request), metadata_call);

	let stream = match stream {
		Ok(stream) => stream,
		Err(e) => return AttemptOutcome::Failed(e.to_string()),
	};
	let metadata = metadata.unwrap_or_else(|e| {
		warn!(error = %e, "metadata request failed, continuing without sync metadata");
		Metadata::new()
	});

	let (tx, mut rx) = mpsc::channel(STREAM_BUFFER_CAPACITY);
	let _reader = AbortOnDrop(tokio::spawn(read_stream(stream, tx)));

	loop {
		match rx.recv().await {
			Some(StreamEvent::Configuration {
				flags,
				sync_context,
			}) => {
				debug!(bytes = flags.len(), "received flag configuration");
				let metadata = sync_context.unwrap_or_else(|| metadata.clone());
				sender.data(flags, metadata);
				backoff.reset();
			}
			Some(StreamEvent::KeepAlive) => {}
			Some(StreamEvent::Completed) | None => return AttemptOutcome::Completed,
			Some(StreamEvent::Failed(reason)) => return AttemptOutcome::Failed(reason),
		}
	}
}

async fn read_stream(mut stream: SyncEventStream, tx: mpsc::Sender<StreamEvent>) {
	while let Some(message) = stream.next().await {
		let event = match message {
			Ok(SyncEvent::Configuration {
				flags,
				sync_context,
			}) => StreamEvent::Configuration {
				flags,
				sync_context,
			},
			Ok(SyncEvent::KeepAlive) => StreamEvent::KeepAlive,
			Err(status) => {
				let _ = tx
					.send(StreamEvent::Failed(format!(
						"{:?}: {}",
						status.code(),
						status.message()
					)))
					.await;
				return;
			}
		};
		if tx.send(event).await.is_err() {
			return;
		}
	}
	let _ = tx.send(StreamEvent::Completed).await;
}
