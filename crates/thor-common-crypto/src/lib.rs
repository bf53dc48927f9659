// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Cryptographic primitives shared by the coordinator and the agent.
//!
//! - Envelope encryption of secrets under a caller-supplied string key
//! - Key-material policy (character exclusion + length)
//! - Self-signed registration certificates
//! - TOTP issuance for the admin surface

pub mod cert;
pub mod envelope;
pub mod policy;
pub mod totp;

use thiserror::Error;

/// Result type alias for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors surfaced by the crypto primitives.
#[derive(Error, Debug)]
pub enum CryptoError {
	/// Decryption with the wrong key, a tampered ciphertext, or malformed
	/// input. The agent treats this as a man-in-the-middle signal.
	#[error("decryption failed: ciphertext does not match key")]
	Mismatch,

	#[error("key policy unsatisfiable: need {needed} characters, {available} remain after exclusions")]
	PolicyUnsatisfiable { needed: usize, available: usize },

	#[error("certificate error: {0}")]
	Certificate(String),

	#[error("totp error: {0}")]
	Totp(String),

	#[error("io error: {0}")]
	Io(#[from] std::io::Error),
}

impl From<rcgen::Error> for CryptoError {
	fn from(err: rcgen::Error) -> Self {
		CryptoError::Certificate(err.to_string())
	}
}

impl From<rsa::Error> for CryptoError {
	fn from(err: rsa::Error) -> Self {
		CryptoError::Certificate(err.to_string())
	}
}
