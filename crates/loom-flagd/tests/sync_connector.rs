// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Streaming connector behaviour against a scripted transport.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use loom_flagd::sync::SyncEventStream;
use loom_flagd::{
	Connector, FlagdError, GrpcStreamConnector, Metadata, MetadataValue, PayloadReceiver,
	QueuePayload, StreamSettings, SyncEvent, SyncRequest, SyncTransport,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

type StreamItem = Result<SyncEvent, tonic::Status>;

/// One scripted `SyncFlags` call.
enum Attempt {
	/// The call itself fails.
	Fail(&'static str),
	/// Yields these events, then completes.
	Complete(Vec<StreamItem>),
	/// Yields whatever the test pushes, and never completes on its own.
	Live(mpsc::Receiver<StreamItem>),
}

#[derive(Default)]
struct Script {
	attempts: Mutex<VecDeque<Attempt>>,
	metadata: Mutex<Option<Metadata>>,
	sync_calls: AtomicUsize,
	metadata_calls: AtomicUsize,
	requests: Mutex<Vec<SyncRequest>>,
}

#[derive(Clone)]
struct ScriptedTransport(Arc<Script>);

impl ScriptedTransport {
	fn new(attempts: Vec<Attempt>) -> Self {
		let script = Script::default();
		*script.attempts.lock() = attempts.into();
		Self(Arc::new(script))
	}

	/// `None` makes `GetMetadata` fail.
	fn with_metadata(self, metadata: Option<Metadata>) -> Self {
		*self.0.metadata.lock() = metadata;
		self
	}
}

#[async_trait]
impl SyncTransport for ScriptedTransport {
	async fn sync_flags(&self, request: SyncRequest) -> loom_flagd::Result<SyncEventStream> {
		self.0.sync_calls.fetch_add(1, Ordering::SeqCst);
		self.0.requests.lock().push(request);

		let next = self.0.attempts.lock().pop_front();
		match next {
			Some(Attempt::Fail(message)) => Err(FlagdError::Grpc(tonic::Status::unavailable(message))),
			Some(Attempt::Complete(events)) => Ok(futures::stream::iter(events).boxed()),
			Some(Attempt::Live(rx)) => Ok(ReceiverStream::new(rx).boxed()),
			None => Ok(futures::stream::pending().boxed()),
		}
	}

	async fn fetch_metadata(&self) -> loom_flagd::Result<Metadata> {
		self.0.metadata_calls.fetch_add(1, Ordering::SeqCst);
		self.0
			.metadata
			.lock()
			.clone()
			.ok_or_else(|| FlagdError::Grpc(tonic::Status::unavailable("no metadata")))
	}
}

fn init_tracing() {
	let _ = tracing_subscriber::fmt()
		.with_test_writer()
		.with_env_filter("loom_flagd=debug")
		.try_init();
}

fn settings() -> StreamSettings {
	StreamSettings {
		provider_id: None,
		selector: Some("app".to_string()),
		stream_deadline: None,
		sync_metadata_disabled: false,
		retry_backoff: Duration::from_millis(10),
		retry_backoff_max: Duration::from_millis(40),
		retry_jitter: Duration::ZERO,
		shutdown_grace: Duration::from_secs(1),
	}
}

fn configuration(flags: &str) -> StreamItem {
	Ok(SyncEvent::Configuration {
		flags: flags.to_string(),
		sync_context: None,
	})
}

fn metadata(pairs: &[(&str, &str)]) -> Metadata {
	pairs
		.iter()
		.map(|(k, v)| (k.to_string(), MetadataValue::from(*v)))
		.collect()
}

async fn next(rx: &mut PayloadReceiver) -> QueuePayload {
	tokio::time::timeout(Duration::from_secs(5), rx.recv())
		.await
		.expect("payload within timeout")
		.expect("queue open")
}

async fn assert_quiet(rx: &mut PayloadReceiver) {
	let extra = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
	assert!(extra.is_err(), "unexpected payload: {extra:?}");
}

#[tokio::test]
async fn test_second_consecutive_failure_reports_error() {
	init_tracing();
	let transport = ScriptedTransport::new(vec![Attempt::Fail("refused"), Attempt::Fail("refused")])
		.with_metadata(Some(Metadata::new()));
	let connector = GrpcStreamConnector::new(transport.clone(), settings());
	let mut rx = connector.start().await.unwrap();

	match next(&mut rx).await {
		QueuePayload::Error { message } => assert!(message.contains("refused"), "{message}"),
		other => panic!("expected error payload, got {other:?}"),
	}
	assert_quiet(&mut rx).await;
	assert_eq!(transport.0.sync_calls.load(Ordering::SeqCst), 3);

	connector.shutdown().await;
}

#[tokio::test]
async fn test_success_resets_silent_allowance() {
	init_tracing();
	let transport = ScriptedTransport::new(vec![
		Attempt::Fail("refused"),
		Attempt::Fail("refused"),
		Attempt::Complete(vec![configuration(r#"{"flags": {}}"#)]),
	])
	.with_metadata(Some(Metadata::new()));
	let connector = GrpcStreamConnector::new(transport, settings());
	let mut rx = connector.start().await.unwrap();

	assert!(matches!(next(&mut rx).await, QueuePayload::Error { .. }));
	assert!(matches!(next(&mut rx).await, QueuePayload::Data { .. }));
	// The stream completing right after a configuration is the one silent retry.
	assert_quiet(&mut rx).await;

	connector.shutdown().await;
}

#[tokio::test]
async fn test_stream_error_counts_as_failure() {
	init_tracing();
	let transport = ScriptedTransport::new(vec![
		Attempt::Complete(vec![Err(tonic::Status::internal("reset"))]),
		Attempt::Complete(vec![Err(tonic::Status::internal("reset"))]),
	])
	.with_metadata(Some(Metadata::new()));
	let connector = GrpcStreamConnector::new(transport, settings());
	let mut rx = connector.start().await.unwrap();

	match next(&mut rx).await {
		QueuePayload::Error { message } => assert!(message.contains("reset"), "{message}"),
		other => panic!("expected error payload, got {other:?}"),
	}
	assert_quiet(&mut rx).await;

	connector.shutdown().await;
}

#[tokio::test]
async fn test_sync_context_supersedes_metadata() {
	init_tracing();
	let (tx, stream) = mpsc::channel(4);
	let transport = ScriptedTransport::new(vec![Attempt::Live(stream)])
		.with_metadata(Some(metadata(&[("source", "rpc")])));
	let connector = GrpcStreamConnector::new(transport, settings());
	let mut rx = connector.start().await.unwrap();

	tx.send(Ok(SyncEvent::Configuration {
		flags: "one".to_string(),
		sync_context: Some(metadata(&[("source", "stream")])),
	}))
	.await
	.unwrap();
	tx.send(Ok(SyncEvent::KeepAlive)).await.unwrap();
	tx.send(configuration("two")).await.unwrap();

	assert_eq!(
		next(&mut rx).await,
		QueuePayload::Data {
			flags: "one".to_string(),
			metadata: metadata(&[("source", "stream")]),
		}
	);
	assert_eq!(
		next(&mut rx).await,
		QueuePayload::Data {
			flags: "two".to_string(),
			metadata: metadata(&[("source", "rpc")]),
		}
	);
	assert_quiet(&mut rx).await;

	connector.shutdown().await;
}

#[tokio::test]
async fn test_metadata_failure_is_not_fatal() {
	init_tracing();
	let transport = ScriptedTransport::new(vec![Attempt::Complete(vec![configuration("doc")])])
		.with_metadata(None);
	let connector = GrpcStreamConnector::new(transport, settings());
	let mut rx = connector.start().await.unwrap();

	assert_eq!(
		next(&mut rx).await,
		QueuePayload::Data {
			flags: "doc".to_string(),
			metadata: Metadata::new(),
		}
	);

	connector.shutdown().await;
}

#[tokio::test]
async fn test_metadata_call_skipped_when_disabled() {
	init_tracing();
	let transport = ScriptedTransport::new(vec![Attempt::Complete(vec![configuration("doc")])])
		.with_metadata(Some(metadata(&[("source", "rpc")])));
	let connector = GrpcStreamConnector::new(
		transport.clone(),
		StreamSettings {
			sync_metadata_disabled: true,
			..settings()
		},
	);
	let mut rx = connector.start().await.unwrap();

	assert!(matches!(next(&mut rx).await, QueuePayload::Data { metadata, .. } if metadata.is_empty()));
	assert_eq!(transport.0.metadata_calls.load(Ordering::SeqCst), 0);

	let requests = transport.0.requests.lock().clone();
	assert_eq!(requests[0].selector.as_deref(), Some("app"));

	connector.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_is_idempotent_and_closes_queue() {
	init_tracing();
	let transport = ScriptedTransport::new(vec![]).with_metadata(Some(Metadata::new()));
	let connector = GrpcStreamConnector::new(transport, settings());
	let mut rx = connector.start().await.unwrap();

	assert!(matches!(connector.start().await, Err(FlagdError::AlreadyStarted)));

	connector.shutdown().await;
	connector.shutdown().await;

	let closed = tokio::time::timeout(Duration::from_secs(5), rx.recv())
		.await
		.unwrap();
	assert_eq!(closed, None);
}
