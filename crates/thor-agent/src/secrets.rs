// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Agent-side secret-store access.
//!
//! The agent only ever unwraps one-shot tokens, decrypts what the
//! coordinator sent, and reads its rotation paths with the short-lived
//! delegated token. It never logs in to the backend itself.

use std::collections::HashMap;

use thor_common_config::VaultConfig;
use thor_vault::{VaultResult, VaultService};

/// The delegated-token holder.
pub struct AgentVault {
	service: VaultService,
	namespace: String,
	token: Option<String>,
}

impl AgentVault {
	pub fn new(address: &str, namespace: &str) -> Self {
		AgentVault {
			service: VaultService::new(VaultConfig::for_agent(address, namespace)),
			namespace: namespace.to_string(),
			token: None,
		}
	}

	/// Unwrap a one-shot wrapping token. A replayed wrap fails at the
	/// backend, which is exactly the man-in-the-middle signal the state
	/// machine keys off.
	pub async fn unwrap(&self, wrapping_token: &str) -> VaultResult<String> {
		self.service.unwrap(wrapping_token, &self.namespace).await
	}

	/// Unwrap and decrypt the delegated token the coordinator pushed.
	pub async fn set_token(&mut self, wrapping_token: &str, api_key: &str) -> VaultResult<()> {
		let encrypted = self.unwrap(wrapping_token).await?;
		let token = self.service.decrypt(&encrypted, api_key)?;
		self.token = Some(token);
		Ok(())
	}

	/// Whether a delegated token is currently held.
	pub fn has_token(&self) -> bool {
		self.token.is_some()
	}

	/// Drop the delegated token after a rotation round.
	pub fn clear_token(&mut self) {
		self.token = None;
	}

	/// Read every configured path with the delegated token and merge the
	/// rotated credentials. The first value for an account wins; later
	/// paths never overwrite it.
	pub async fn rotation_credentials(
		&self,
		paths: &[String],
	) -> VaultResult<HashMap<String, String>> {
		let mut credentials: HashMap<String, String> = HashMap::new();
		let Some(token) = &self.token else {
			return Ok(credentials);
		};

		for path in paths {
			match self.service.read(path, token, &self.namespace).await {
				Ok(found) => {
					for (account, password) in found {
						credentials.entry(account).or_insert(password);
					}
				}
				Err(_) => continue,
			}
		}
		Ok(credentials)
	}
}
