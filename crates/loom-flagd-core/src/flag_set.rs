// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::{HashMap, HashSet};

use crate::flag::{FeatureFlag, Metadata};

/// The complete table of flags produced from one configuration document.
///
/// A flag set is never mutated after parsing; stores swap whole sets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlagSet {
	pub flags: HashMap<String, FeatureFlag>,
	pub metadata: Metadata,
}

impl FlagSet {
	pub fn new(flags: HashMap<String, FeatureFlag>, metadata: Metadata) -> Self {
		Self { flags, metadata }
	}

	pub fn get(&self, key: &str) -> Option<&FeatureFlag> {
		self.flags.get(key)
	}

	pub fn len(&self) -> usize {
		self.flags.len()
	}

	pub fn is_empty(&self) -> bool {
		self.flags.is_empty()
	}

	/// Keys whose presence or definition differs between `self` and `next`.
	pub fn changed_keys(&self, next: &FlagSet) -> HashSet<String> {
		let mut changed: HashSet<String> = self
			.flags
			.iter()
			.filter(|(key, flag)| next.flags.get(*key) != Some(*flag))
			.map(|(key, _)| key.clone())
			.collect();

		changed.extend(
			next
				.flags
				.keys()
				.filter(|key| !self.flags.contains_key(*key))
				.cloned(),
		);

		changed
	}

	/// Layers metadata delivered alongside the document underneath the
	/// document's own metadata. Document keys win.
	pub fn with_sync_metadata(mut self, sync_metadata: Metadata) -> Self {
		for (key, value) in sync_metadata {
			self.metadata.entry(key).or_insert(value);
		}
		self
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::flag::{FlagState, MetadataValue};
	use serde_json::json;

	fn flag(default_variant: &str) -> FeatureFlag {
		FeatureFlag::new(FlagState::Enabled, default_variant)
			.with_variant("on", json!(true))
			.with_variant("off", json!(false))
	}

	fn set(entries: &[(&str, FeatureFlag)]) -> FlagSet {
		FlagSet::new(
			entries
				.iter()
				.map(|(k, f)| (k.to_string(), f.clone()))
				.collect(),
			Metadata::new(),
		)
	}

	#[test]
	fn test_identical_sets_have_no_changes() {
		let a = set(&[("a", flag("on")), ("b", flag("off"))]);
		assert!(a.changed_keys(&a.clone()).is_empty());
	}

	#[test]
	fn test_added_and_removed_keys_are_changed() {
		let before = set(&[("y", flag("on")), ("z", flag("on"))]);
		let after = set(&[("x", flag("on")), ("z", flag("on"))]);

		let changed = before.changed_keys(&after);
		assert_eq!(
			changed,
			HashSet::from(["x".to_string(), "y".to_string()])
		);
	}

	#[test]
	fn test_modified_definition_is_changed() {
		let before = set(&[("a", flag("on"))]);
		let after = set(&[("a", flag("off"))]);
		assert_eq!(before.changed_keys(&after), HashSet::from(["a".to_string()]));
	}

	#[test]
	fn test_sync_metadata_does_not_override_document() {
		let mut doc_metadata = Metadata::new();
		doc_metadata.insert("scope".to_string(), MetadataValue::from("doc"));
		let flag_set = FlagSet::new(HashMap::new(), doc_metadata);

		let mut sync = Metadata::new();
		sync.insert("scope".to_string(), MetadataValue::from("sync"));
		sync.insert("region".to_string(), MetadataValue::from("eu"));

		let merged = flag_set.with_sync_metadata(sync);
		assert_eq!(merged.metadata["scope"], MetadataValue::from("doc"));
		assert_eq!(merged.metadata["region"], MetadataValue::from("eu"));
	}
}
