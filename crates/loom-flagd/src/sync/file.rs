// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Offline flag source backed by a local file.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use loom_flagd_core::Metadata;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{payload_channel, Connector, PayloadReceiver, PayloadSender, WorkerHandle};
use crate::config::ResolverConfig;
use crate::error::{FlagdError, Result};

/// Reads a flag configuration file and re-reads it whenever it changes on
/// disk.
#[derive(Debug)]
pub struct FileConnector {
	path: PathBuf,
	poll_interval: Duration,
	shutdown_grace: Duration,
	worker: Mutex<Option<WorkerHandle>>,
	started: AtomicBool,
}

impl FileConnector {
	pub fn new(path: impl Into<PathBuf>, poll_interval: Duration, shutdown_grace: Duration) -> Self {
		Self {
			path: path.into(),
			poll_interval,
			shutdown_grace,
			worker: Mutex::new(None),
			started: AtomicBool::new(false),
		}
	}

	/// Connector for `offline_flag_source_path`, if one is configured.
	pub fn from_config(config: &ResolverConfig) -> Option<Self> {
		config.offline_flag_source_path.as_ref().map(|path| {
			Self::new(path.clone(), config.offline_poll_interval, config.shutdown_grace)
		})
	}

	pub fn path(&self) -> &Path {
		&self.path
	}
}

#[async_trait]
impl Connector for FileConnector {
	async fn start(&self) -> Result<PayloadReceiver> {
		if self.started.swap(true, Ordering::SeqCst) {
			return Err(FlagdError::AlreadyStarted);
		}

		let (sender, receiver) = payload_channel();
		let cancel = CancellationToken::new();
		let handle = tokio::spawn(watch_file(
			self.path.clone(),
			self.poll_interval,
			sender,
			cancel.clone(),
		));

		*self.worker.lock() = Some(WorkerHandle::new(cancel, handle));
		info!(path = %self.path.display(), "file connector started");
		Ok(receiver)
	}

	async fn shutdown(&self) {
		let worker = self.worker.lock().take();
		if let Some(worker) = worker {
			worker.stop(self.shutdown_grace).await;
			info!(path = %self.path.display(), "file connector stopped");
		}
	}
}

/// What the watcher compares between polls. Length is tracked as well since
/// some filesystems record modification times at one-second granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fingerprint {
	modified: SystemTime,
	len: u64,
}

async fn watch_file(
	path: PathBuf,
	poll_interval: Duration,
	sender: PayloadSender,
	cancel: CancellationToken,
) {
	let mut last_seen = read_and_send(&path, &sender).await;

	loop {
		tokio::select! {
			_ = tokio::time::sleep(poll_interval) => {}
			_ = cancel.cancelled() => break,
		}

		let current = match fingerprint(&path).await {
			Ok(current) => current,
			Err(e) => {
				warn!(path = %path.display(), error = %e, "cannot stat flag file");
				sender.error(format!("cannot stat {}: {e}", path.display()));
				last_seen = None;
				continue;
			}
		};

		if last_seen != Some(current) {
			debug!(path = %path.display(), len = current.len, "flag file changed");
			last_seen = read_and_send(&path, &sender).await;
		}
	}

	debug!(path = %path.display(), "file watcher stopped");
}

/// Emits the file content and returns its fingerprint. Errors are reported on
/// the queue and yield `None` so the next poll retries.
async fn read_and_send(path: &Path, sender: &PayloadSender) -> Option<Fingerprint> {
	let seen = fingerprint(path).await.ok();
	match tokio::fs::read_to_string(path).await {
		Ok(contents) => {
			sender.data(contents, Metadata::new());
			seen
		}
		Err(e) => {
			warn!(path = %path.display(), error = %e, "cannot read flag file");
			sender.error(format!("cannot read {}: {e}", path.display()));
			None
		}
	}
}

async fn fingerprint(path: &Path) -> std::io::Result<Fingerprint> {
	let metadata = tokio::fs::metadata(path).await?;
	Ok(Fingerprint {
		modified: metadata.modified()?,
		len: metadata.len(),
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::sync::QueuePayload;
	use std::io::Write;

	const POLL: Duration = Duration::from_millis(20);
	const GRACE: Duration = Duration::from_secs(1);

	async fn next(rx: &mut PayloadReceiver) -> QueuePayload {
		tokio::time::timeout(Duration::from_secs(5), rx.recv())
			.await
			.expect("payload within timeout")
			.expect("queue open")
	}

	#[tokio::test]
	async fn test_emits_file_contents_on_start() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		write!(file, r#"{{"flags": {{}}}}"#).unwrap();

		let connector = FileConnector::new(file.path(), POLL, GRACE);
		let mut rx = connector.start().await.unwrap();

		assert_eq!(
			next(&mut rx).await,
			QueuePayload::Data {
				flags: r#"{"flags": {}}"#.to_string(),
				metadata: Metadata::new(),
			}
		);
		connector.shutdown().await;
	}

	#[tokio::test]
	async fn test_missing_file_reports_error() {
		let dir = tempfile::tempdir().unwrap();
		let connector = FileConnector::new(dir.path().join("absent.json"), POLL, GRACE);
		let mut rx = connector.start().await.unwrap();

		assert!(matches!(next(&mut rx).await, QueuePayload::Error { .. }));
		connector.shutdown().await;
	}

	#[tokio::test]
	async fn test_reemits_after_change() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("flags.json");
		std::fs::write(&path, "first").unwrap();

		let connector = FileConnector::new(&path, POLL, GRACE);
		let mut rx = connector.start().await.unwrap();
		assert!(matches!(next(&mut rx).await, QueuePayload::Data { flags, .. } if flags == "first"));

		tokio::time::sleep(Duration::from_millis(1100)).await;
		let staged = dir.path().join("flags.staged");
		std::fs::write(&staged, "second").unwrap();
		std::fs::rename(&staged, &path).unwrap();

		assert!(matches!(next(&mut rx).await, QueuePayload::Data { flags, .. } if flags == "second"));
		connector.shutdown().await;
	}

	#[tokio::test]
	async fn test_start_twice_fails() {
		let file = tempfile::NamedTempFile::new().unwrap();
		let connector = FileConnector::new(file.path(), POLL, GRACE);
		let _rx = connector.start().await.unwrap();
		assert!(matches!(connector.start().await, Err(FlagdError::AlreadyStarted)));
		connector.shutdown().await;
		connector.shutdown().await;
	}

	#[test]
	fn test_from_config_requires_path() {
		assert!(FileConnector::from_config(&ResolverConfig::default()).is_none());

		let config = ResolverConfig {
			offline_flag_source_path: Some(PathBuf::from("/tmp/flags.json")),
			..ResolverConfig::default()
		};
		let connector = FileConnector::from_config(&config).unwrap();
		assert_eq!(connector.path(), Path::new("/tmp/flags.json"));
	}
}
