// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Envelope encryption of secret strings under a string key.
//!
//! The wire format is `base64(nonce || ciphertext)` with AES-256-GCM. The
//! cipher key is the SHA-256 digest of the caller-supplied key string, so
//! any printable key material (the device API key, the stored encryption
//! key) can be used directly.

use aes_gcm::{
	aead::{Aead, KeyInit},
	Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::{CryptoError, CryptoResult};

/// Size of the AES-GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;

fn derive_key(key: &str) -> Zeroizing<[u8; 32]> {
	let mut out = Zeroizing::new([0u8; 32]);
	out.copy_from_slice(&Sha256::digest(key.as_bytes()));
	out
}

/// Encrypt `plaintext` under `key` and return the base64 envelope.
pub fn encrypt(plaintext: &[u8], key: &str) -> CryptoResult<String> {
	let derived = derive_key(key);
	let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(derived.as_ref()));

	let mut nonce_bytes = [0u8; NONCE_SIZE];
	rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
	let nonce = Nonce::from_slice(&nonce_bytes);

	let ciphertext = cipher
		.encrypt(nonce, plaintext)
		.map_err(|_| CryptoError::Mismatch)?;

	let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
	out.extend_from_slice(&nonce_bytes);
	out.extend_from_slice(&ciphertext);
	Ok(BASE64.encode(out))
}

/// Decrypt a base64 envelope produced by [`encrypt`].
///
/// Any failure (wrong key, truncated input, tampering) collapses into
/// [`CryptoError::Mismatch`]; callers must not be able to distinguish the
/// cause.
pub fn decrypt(encoded: &str, key: &str) -> CryptoResult<Vec<u8>> {
	let raw = BASE64.decode(encoded).map_err(|_| CryptoError::Mismatch)?;
	if raw.len() < NONCE_SIZE {
		return Err(CryptoError::Mismatch);
	}
	let (nonce_bytes, ciphertext) = raw.split_at(NONCE_SIZE);

	let derived = derive_key(key);
	let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(derived.as_ref()));
	cipher
		.decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
		.map_err(|_| CryptoError::Mismatch)
}

/// Decrypt an envelope that is known to contain UTF-8 (tokens, passwords).
pub fn decrypt_string(encoded: &str, key: &str) -> CryptoResult<String> {
	let plaintext = decrypt(encoded, key)?;
	String::from_utf8(plaintext).map_err(|_| CryptoError::Mismatch)
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	#[test]
	fn roundtrip() {
		let encrypted = encrypt(b"hvs.CAESIFakeDelegationToken", "device-api-key").unwrap();
		let decrypted = decrypt_string(&encrypted, "device-api-key").unwrap();
		assert_eq!(decrypted, "hvs.CAESIFakeDelegationToken");
	}

	#[test]
	fn wrong_key_is_mismatch() {
		let encrypted = encrypt(b"secret", "key-one").unwrap();
		let err = decrypt(&encrypted, "key-two").unwrap_err();
		assert!(matches!(err, CryptoError::Mismatch));
	}

	#[test]
	fn garbage_is_mismatch() {
		assert!(matches!(
			decrypt("not base64 at all!!", "key"),
			Err(CryptoError::Mismatch)
		));
		assert!(matches!(
			decrypt("AAAA", "key"),
			Err(CryptoError::Mismatch)
		));
	}

	#[test]
	fn tampered_ciphertext_is_mismatch() {
		let encrypted = encrypt(b"secret", "key").unwrap();
		let mut raw = BASE64.decode(&encrypted).unwrap();
		let last = raw.len() - 1;
		raw[last] ^= 0xFF;
		let tampered = BASE64.encode(raw);
		assert!(matches!(
			decrypt(&tampered, "key"),
			Err(CryptoError::Mismatch)
		));
	}

	proptest! {
		#[test]
		fn prop_roundtrip(plaintext in proptest::collection::vec(any::<u8>(), 0..4096), key in ".{1,64}") {
			let encrypted = encrypt(&plaintext, &key).unwrap();
			let decrypted = decrypt(&encrypted, &key).unwrap();
			prop_assert_eq!(plaintext, decrypted);
		}

		#[test]
		fn prop_distinct_nonces(plaintext in proptest::collection::vec(any::<u8>(), 1..256)) {
			let one = encrypt(&plaintext, "key").unwrap();
			let two = encrypt(&plaintext, "key").unwrap();
			prop_assert_ne!(one, two);
		}

		#[test]
		fn prop_wrong_key_never_roundtrips(plaintext in proptest::collection::vec(any::<u8>(), 1..256)) {
			let encrypted = encrypt(&plaintext, "alpha").unwrap();
			let decrypted = decrypt(&encrypted, "bravo");
			prop_assert!(decrypted.is_err() || decrypted.unwrap() != plaintext);
		}
	}
}
