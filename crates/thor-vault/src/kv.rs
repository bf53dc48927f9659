// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! KV shape handling.
//!
//! KV v2 secrets nest the payload under a `data` object and are listed under
//! a `metadata/` prefix; v1 secrets are flat. The adapter detects the shape
//! on read and preserves it on write, so rotation works against either
//! engine version without configuration.

use serde_json::{Map, Value};

/// The key carrying rotation metadata inside every rotated secret.
pub const ROTATED_KEY: &str = "rotated";

/// A secret payload with its engine shape.
#[derive(Debug, Clone, PartialEq)]
pub struct SecretData {
	pub data: Map<String, Value>,
	pub v2: bool,
}

impl SecretData {
	/// Split a raw read into payload + shape. KV v2 is detected by the
	/// nested `data` object.
	pub fn from_read(raw: Map<String, Value>) -> Self {
		if let Some(inner) = raw.get("data").and_then(|v| v.as_object()) {
			SecretData {
				data: inner.clone(),
				v2: true,
			}
		} else {
			SecretData {
				data: raw,
				v2: false,
			}
		}
	}

	/// Re-assemble the write body in the shape the engine expects.
	pub fn into_write_body(self) -> Map<String, Value> {
		if self.v2 {
			let mut outer = Map::new();
			outer.insert("data".to_string(), Value::Object(self.data));
			outer
		} else {
			self.data
		}
	}

	/// The key names listed in the `rotated` metadata, empty entries
	/// dropped.
	pub fn rotated_keys(&self) -> Vec<String> {
		self.data
			.get(ROTATED_KEY)
			.and_then(|v| v.as_str())
			.map(|s| {
				s.split(',')
					.filter(|k| !k.is_empty())
					.map(str::to_string)
					.collect()
			})
			.unwrap_or_default()
	}

	/// Replace the `rotated` metadata with `keys`.
	pub fn set_rotated(&mut self, keys: &[String]) {
		self.data
			.insert(ROTATED_KEY.to_string(), Value::String(keys.join(",")));
	}
}

/// Whether a secret entry matches the rotation search. Compromised rounds
/// match by value, standard rounds by key name; both case-insensitive. The
/// `rotated` metadata itself never matches.
pub fn matches_search(key: &str, value: &Value, search: &str, compromised: bool) -> bool {
	if key == ROTATED_KEY {
		return false;
	}
	let search = search.to_lowercase();
	if compromised {
		value
			.as_str()
			.map(|v| v.to_lowercase() == search)
			.unwrap_or(false)
	} else {
		key.to_lowercase() == search
	}
}

/// Rewrite a KV v2 listing path into its read path: the `metadata` segment
/// directly under the mount becomes `data`.
pub fn metadata_to_data(path: &str) -> String {
	let mut segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
	if segments.len() > 1 && segments[1] == "metadata" {
		segments[1] = "data";
	}
	segments.join("/")
}

/// Join a folder path and a listing key, collapsing duplicate slashes.
pub fn join_path(folder: &str, key: &str) -> String {
	format!("{}/{}", folder.trim_end_matches('/'), key)
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn map(value: Value) -> Map<String, Value> {
		value.as_object().unwrap().clone()
	}

	#[test]
	fn v1_shape_roundtrip() {
		let secret = SecretData::from_read(map(json!({"svc": "hunter2"})));
		assert!(!secret.v2);
		assert_eq!(secret.clone().into_write_body(), map(json!({"svc": "hunter2"})));
	}

	#[test]
	fn v2_shape_roundtrip() {
		let secret = SecretData::from_read(map(json!({
			"data": {"svc": "hunter2"},
			"metadata": {"version": 3}
		})));
		assert!(secret.v2);
		assert_eq!(
			secret.into_write_body(),
			map(json!({"data": {"svc": "hunter2"}}))
		);
	}

	#[test]
	fn rotated_keys_parsing() {
		let secret = SecretData::from_read(map(json!({"rotated": "alpha,,beta"})));
		assert_eq!(secret.rotated_keys(), vec!["alpha", "beta"]);

		let empty = SecretData::from_read(map(json!({"rotated": ""})));
		assert!(empty.rotated_keys().is_empty());

		let absent = SecretData::from_read(map(json!({})));
		assert!(absent.rotated_keys().is_empty());
	}

	#[test]
	fn set_rotated_joins() {
		let mut secret = SecretData::from_read(map(json!({})));
		secret.set_rotated(&["alpha".to_string(), "beta".to_string()]);
		assert_eq!(secret.data.get(ROTATED_KEY).unwrap(), "alpha,beta");
	}

	#[test]
	fn search_matching() {
		assert!(matches_search("svc", &json!("hunter2"), "SVC", false));
		assert!(!matches_search("svc", &json!("hunter2"), "svc", true));
		assert!(matches_search("svc", &json!("Hunter2"), "hunter2", true));
		assert!(!matches_search("rotated", &json!("hunter2"), "rotated", false));
		assert!(!matches_search("svc", &json!(42), "42", true));
	}

	#[test]
	fn metadata_rewrite() {
		assert_eq!(
			metadata_to_data("kv/metadata/servers/h1"),
			"kv/data/servers/h1"
		);
		assert_eq!(metadata_to_data("/kv/metadata/h1"), "kv/data/h1");
		assert_eq!(metadata_to_data("kv/servers/h1"), "kv/servers/h1");
		// Only the segment under the mount is rewritten.
		assert_eq!(
			metadata_to_data("kv/data/metadata/h1"),
			"kv/data/metadata/h1"
		);
	}

	#[test]
	fn join_collapses_slashes() {
		assert_eq!(join_path("kv/servers/", "h1"), "kv/servers/h1");
		assert_eq!(join_path("kv", "h1/"), "kv/h1/");
	}
}
