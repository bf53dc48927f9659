// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Key-material policy applied to backend-generated passwords.

use serde::{Deserialize, Serialize};

use crate::{CryptoError, CryptoResult};

/// Constraints on generated key material: characters to strip and the final
/// length after stripping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyPolicy {
	#[serde(rename = "excludeCharacters", default)]
	pub exclude_characters: String,
	pub length: usize,
}

impl KeyPolicy {
	/// Policy for coordinator-minted encryption keys: strip characters that
	/// break shell quoting, 32 characters.
	pub fn token_policy() -> Self {
		KeyPolicy {
			exclude_characters: "\"\\`'".to_string(),
			length: 32,
		}
	}

	/// Strip excluded characters from `generated` and truncate to the policy
	/// length. The generator must have produced enough surviving characters;
	/// a short result is an error, never a short key.
	pub fn apply(&self, generated: &str) -> CryptoResult<String> {
		let stripped: String = generated
			.chars()
			.filter(|c| !self.exclude_characters.contains(*c))
			.collect();

		let available = stripped.chars().count();
		if available < self.length {
			return Err(CryptoError::PolicyUnsatisfiable {
				needed: self.length,
				available,
			});
		}
		Ok(stripped.chars().take(self.length).collect())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn strips_and_truncates() {
		let policy = KeyPolicy {
			exclude_characters: "\"'".to_string(),
			length: 4,
		};
		assert_eq!(policy.apply("a\"b'cdef").unwrap(), "abcd");
	}

	#[test]
	fn exact_length_after_stripping() {
		let policy = KeyPolicy {
			exclude_characters: "x".to_string(),
			length: 3,
		};
		assert_eq!(policy.apply("xaxbxc").unwrap(), "abc");
	}

	#[test]
	fn too_short_is_unsatisfiable() {
		let policy = KeyPolicy {
			exclude_characters: "ab".to_string(),
			length: 8,
		};
		let err = policy.apply("abababcd").unwrap_err();
		match err {
			CryptoError::PolicyUnsatisfiable { needed, available } => {
				assert_eq!(needed, 8);
				assert_eq!(available, 2);
			}
			other => panic!("unexpected error: {other}"),
		}
	}

	#[test]
	fn token_policy_defaults() {
		let policy = KeyPolicy::token_policy();
		assert_eq!(policy.length, 32);
		assert!(policy.exclude_characters.contains('`'));
	}
}
