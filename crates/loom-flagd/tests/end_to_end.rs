// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Resolver driven by the offline file connector.

use std::path::Path;
use std::time::Duration;

use loom_flagd::{
	ErrorCode, EvaluationContext, EvaluationReason, InProcessResolver, ProviderEvent,
	ResolverConfig, StatusListener,
};
use tokio::sync::mpsc;

const SIMPLE: &str = r#"{"flags":{"f":{"state":"ENABLED","variants":{"on":true,"off":false},"defaultVariant":"on"}}}"#;

const ROLLOUT: &str = r#"{
	"$evaluators": {
		"is-staff": {"ends_with": [{"var": "email"}, "@example.com"]}
	},
	"flags": {
		"f": {
			"state": "ENABLED",
			"variants": {"on": true, "off": false},
			"defaultVariant": "off",
			"targeting": {"if": [{"$ref": "is-staff"}, "on", null]}
		},
		"split": {
			"state": "ENABLED",
			"variants": {"a": "A", "b": "B"},
			"defaultVariant": "a",
			"targeting": {"fractional": [["a", 50], ["b", 50]]}
		},
		"min-version": {
			"state": "ENABLED",
			"variants": {"new": "new-ui", "old": "old-ui"},
			"defaultVariant": "old",
			"targeting": {"if": [{"sem_ver": [{"var": "version"}, ">=", "2.0.0"]}, "new", "old"]}
		},
		"off": {
			"state": "DISABLED",
			"variants": {"on": true},
			"defaultVariant": "on"
		}
	},
	"metadata": {"flagSetId": "e2e"}
}"#;

struct ChannelListener(mpsc::UnboundedSender<ProviderEvent>);

impl StatusListener for ChannelListener {
	fn on_event(&self, event: ProviderEvent) {
		let _ = self.0.send(event);
	}
}

fn init_tracing() {
	let _ = tracing_subscriber::fmt()
		.with_test_writer()
		.with_env_filter("loom_flagd=debug")
		.try_init();
}

fn config(path: &Path) -> ResolverConfig {
	ResolverConfig {
		offline_flag_source_path: Some(path.to_path_buf()),
		offline_poll_interval: Duration::from_millis(20),
		deadline: Duration::from_secs(5),
		..ResolverConfig::default()
	}
}

/// Swaps the file in one step so the poller never sees a partial write.
fn replace_file(path: &Path, contents: &str) {
	let staged = path.with_extension("staged");
	std::fs::write(&staged, contents).unwrap();
	std::fs::rename(&staged, path).unwrap();
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<ProviderEvent>) -> ProviderEvent {
	tokio::time::timeout(Duration::from_secs(5), events.recv())
		.await
		.expect("event within timeout")
		.expect("listener alive")
}

#[tokio::test]
async fn test_static_flag_from_file() {
	init_tracing();
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("flags.json");
	std::fs::write(&path, SIMPLE).unwrap();

	let resolver = InProcessResolver::builder()
		.config(config(&path))
		.build()
		.unwrap();

	let early = resolver.resolve_boolean("f", false, &EvaluationContext::new());
	assert_eq!(early.error_code, Some(ErrorCode::ProviderNotReady));
	assert!(!early.value);

	resolver.init().await.unwrap();

	let result = resolver.resolve_boolean("f", false, &EvaluationContext::new());
	assert!(result.value);
	assert_eq!(result.variant.as_deref(), Some("on"));
	assert_eq!(result.reason, EvaluationReason::Static);
	assert!(result.error_code.is_none());

	resolver.shutdown().await;
}

#[tokio::test]
async fn test_targeting_from_file() {
	init_tracing();
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("flags.json");
	std::fs::write(&path, ROLLOUT).unwrap();

	let resolver = InProcessResolver::builder()
		.config(config(&path))
		.build()
		.unwrap();
	resolver.init().await.unwrap();

	let staff = EvaluationContext::new().with_attribute("email", "dev@example.com");
	let result = resolver.resolve_boolean("f", false, &staff);
	assert!(result.value);
	assert_eq!(result.reason, EvaluationReason::TargetingMatch);

	let guest = EvaluationContext::new().with_attribute("email", "guest@elsewhere.org");
	let result = resolver.resolve_boolean("f", true, &guest);
	assert!(!result.value);
	assert_eq!(result.reason, EvaluationReason::Default);

	// Bucketing is stable for a given targeting key.
	let user = EvaluationContext::new().with_targeting_key("user-42");
	let first = resolver.resolve_string("split", "", &user);
	assert_eq!(first.reason, EvaluationReason::TargetingMatch);
	for _ in 0..10 {
		assert_eq!(resolver.resolve_string("split", "", &user).value, first.value);
	}

	let modern = EvaluationContext::new().with_attribute("version", "v2.1.0");
	assert_eq!(resolver.resolve_string("min-version", "", &modern).value, "new-ui");
	let legacy = EvaluationContext::new().with_attribute("version", "1.9.9");
	assert_eq!(resolver.resolve_string("min-version", "", &legacy).value, "old-ui");

	let disabled = resolver.resolve_boolean("off", false, &EvaluationContext::new());
	assert_eq!(disabled.error_code, Some(ErrorCode::FlagNotFound));

	let mismatch = resolver.resolve_integer("f", 7, &staff);
	assert_eq!(mismatch.value, 7);
	assert_eq!(mismatch.error_code, Some(ErrorCode::TypeMismatch));

	resolver.shutdown().await;
}

#[tokio::test]
async fn test_file_update_emits_configuration_changed() {
	init_tracing();
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("flags.json");
	std::fs::write(&path, SIMPLE).unwrap();

	let (tx, mut events) = mpsc::unbounded_channel();
	let resolver = InProcessResolver::builder()
		.config(config(&path))
		.status_listener(ChannelListener(tx))
		.build()
		.unwrap();
	resolver.init().await.unwrap();

	assert_eq!(next_event(&mut events).await, ProviderEvent::Ready);
	assert_eq!(
		next_event(&mut events).await,
		ProviderEvent::ConfigurationChanged {
			flags_changed: vec!["f".to_string()]
		}
	);

	// Some filesystems only record mtime at coarse granularity.
	tokio::time::sleep(Duration::from_millis(1100)).await;
	replace_file(&path, ROLLOUT);

	assert_eq!(
		next_event(&mut events).await,
		ProviderEvent::ConfigurationChanged {
			flags_changed: vec![
				"f".to_string(),
				"min-version".to_string(),
				"off".to_string(),
				"split".to_string(),
			]
		}
	);

	let staff = EvaluationContext::new().with_attribute("email", "dev@example.com");
	assert_eq!(
		resolver.resolve_boolean("f", false, &staff).reason,
		EvaluationReason::TargetingMatch
	);

	resolver.shutdown().await;
}

#[tokio::test]
async fn test_invalid_update_keeps_previous_flags() {
	init_tracing();
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("flags.json");
	std::fs::write(&path, SIMPLE).unwrap();

	let (tx, mut events) = mpsc::unbounded_channel();
	let resolver = InProcessResolver::builder()
		.config(config(&path))
		.status_listener(ChannelListener(tx))
		.build()
		.unwrap();
	resolver.init().await.unwrap();
	assert_eq!(next_event(&mut events).await, ProviderEvent::Ready);
	next_event(&mut events).await;

	tokio::time::sleep(Duration::from_millis(1100)).await;
	replace_file(&path, "{\"flags\": ");

	assert!(matches!(next_event(&mut events).await, ProviderEvent::Error { .. }));
	assert!(resolver.resolve_boolean("f", false, &EvaluationContext::new()).value);

	resolver.shutdown().await;
}
