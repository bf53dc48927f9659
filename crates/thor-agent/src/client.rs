// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! HTTP client for the coordinator's admission endpoints.

use std::time::Duration;
use tracing::debug;

use thor_server::api::{ApiResult, RegistrationRequest, TokenRequest};

use crate::{AgentError, AgentResult};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The agent's view of the coordinator.
pub struct ThorClient {
	http: reqwest::Client,
	base: String,
}

impl ThorClient {
	pub fn new(base: &str) -> Self {
		ThorClient {
			http: reqwest::Client::builder()
				.timeout(REQUEST_TIMEOUT)
				.build()
				.unwrap_or_default(),
			base: base.trim_end_matches('/').to_string(),
		}
	}

	async fn post(&self, endpoint: &str, body: &impl serde::Serialize) -> AgentResult<()> {
		let url = format!("{}/api/v1/{endpoint}", self.base);
		debug!(url, "posting to coordinator");
		let response = self.http.post(&url).json(body).send().await?;
		let result: ApiResult = response.json().await?;
		match result.status.as_str() {
			"accepted" => Ok(()),
			"rejected" => Err(AgentError::Rejected(result.message)),
			other => Err(AgentError::Rejected(format!(
				"invalid status from coordinator: {other}"
			))),
		}
	}

	/// Present the registration certificate, namespace and binary digest.
	/// Acceptance means the wrapped API key will arrive over DTLS.
	pub async fn register(
		&self,
		certificate_pem: &str,
		namespace: &str,
		shasum: &str,
	) -> AgentResult<()> {
		self.post(
			"register",
			&RegistrationRequest {
				registration_request: certificate_pem.to_string(),
				namespace: namespace.to_string(),
				shasum: shasum.to_string(),
			},
		)
		.await
	}

	/// Ask for a delegated token. Acceptance means either a `tok|` line over
	/// DTLS or silence (standby).
	pub async fn request_token(
		&self,
		api_key: &str,
		namespace: &str,
		paths: &[String],
	) -> AgentResult<()> {
		self.post(
			"token",
			&TokenRequest {
				token_request: api_key.to_string(),
				namespace: namespace.to_string(),
				paths: paths.to_vec(),
			},
		)
		.await
	}
}

/// SHA-256 of the running executable, presented at registration.
pub fn binary_digest() -> AgentResult<String> {
	use sha2::{Digest, Sha256};

	let exe = std::env::current_exe()?;
	let resolved = std::fs::canonicalize(&exe)?;
	let bytes = std::fs::read(&resolved)?;
	Ok(hex::encode(Sha256::digest(&bytes)))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn binary_digest_is_hex_sha256() {
		let digest = binary_digest().unwrap();
		assert_eq!(digest.len(), 64);
		assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
	}

	#[test]
	fn client_normalises_base_url() {
		let client = ThorClient::new("https://thor.example.com:8443/");
		assert_eq!(client.base, "https://thor.example.com:8443");
	}
}
