// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use thiserror::Error;
use thor_common_crypto::CryptoError;

/// Result type alias for secret-store operations.
pub type VaultResult<T> = Result<T, VaultError>;

/// Errors surfaced by the secret-store adapter.
#[derive(Error, Debug)]
pub enum VaultError {
	/// Zero or more than one login role configured.
	#[error("exactly one of `appRole`, `awsRole`, `azureRole` must be configured")]
	AuthConfig,

	/// The backend refused the login.
	#[error("backend rejected login: {0}")]
	AuthRejected(String),

	/// The backend (or the platform metadata service) did not answer.
	#[error("backend unavailable: {0}")]
	BackendUnavailable(String),

	/// A non-success API response that is not a login refusal.
	#[error("backend API error ({status}): {message}")]
	Api { status: u16, message: String },

	/// A secret or entry the flow requires is absent.
	#[error("no such entry: {0}")]
	MissingEntry(String),

	/// Envelope encryption or policy failure.
	#[error(transparent)]
	Crypto(#[from] CryptoError),
}

impl VaultError {
	/// A second unwrap of a one-shot wrapping token surfaces as a 400 from
	/// the backend; the agent treats it as a man-in-the-middle signal.
	pub fn is_unwrap_replay(&self) -> bool {
		matches!(self, VaultError::Api { status, .. } if *status == 400)
			|| matches!(self, VaultError::Crypto(CryptoError::Mismatch))
	}
}

impl From<reqwest::Error> for VaultError {
	fn from(err: reqwest::Error) -> Self {
		if err.is_timeout() || err.is_connect() {
			VaultError::BackendUnavailable(err.to_string())
		} else {
			VaultError::Api {
				status: err.status().map(|s| s.as_u16()).unwrap_or(0),
				message: err.to_string(),
			}
		}
	}
}
