// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Coordinator configuration (`config.yaml`).

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::vault::VaultConfig;
use crate::{ConfigError, ConfigResult};

/// TLS listener settings, shared between server and agent files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
	#[serde(default)]
	pub hostname: String,
	#[serde(default)]
	pub port: u16,
	#[serde(default)]
	pub cacert: String,
	#[serde(default)]
	pub cakey: String,
	#[serde(default)]
	pub letsencrypt: bool,
}

/// Administrator account for the UI collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
	#[serde(default)]
	pub email: String,
	#[serde(default)]
	pub password: String,
	#[serde(rename = "totp", default)]
	pub totp_key: String,
}

/// Log-aggregator collaborator; referenced by the admin search surface only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LokiConfig {
	pub address: String,
}

/// Directory-login collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LdapConfig {
	pub address: String,
	#[serde(default)]
	pub bind: String,
}

/// Single-sign-on collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamlConfig {
	#[serde(rename = "metadata", default)]
	pub idp_metadata: String,
}

/// Top-level coordinator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
	pub tls: TlsConfig,
	pub vault: VaultConfig,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub loki: Option<LokiConfig>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub ldap: Option<LdapConfig>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub saml: Option<SamlConfig>,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub admin: Option<AdminConfig>,

	#[serde(default)]
	pub configured: bool,

	/// IPs permitted to call the administrative bulk endpoints.
	#[serde(rename = "trustedInbound", default)]
	pub trusted_inbound: Vec<String>,
}

impl ServerConfig {
	/// Load and validate the coordinator configuration.
	pub async fn load(path: &Path) -> ConfigResult<Self> {
		let config: ServerConfig = crate::read_yaml(path).await?;
		config.validate()?;
		info!(
			host = %config.tls.hostname,
			port = config.tls.port,
			vault = %config.vault.address,
			trusted_inbound = config.trusted_inbound.len(),
			"coordinator configuration loaded"
		);
		Ok(config)
	}

	/// Persist the configuration; only the admin settings paths mutate it.
	pub async fn save(&self, path: &Path) -> ConfigResult<()> {
		crate::write_yaml(path, self).await
	}

	fn validate(&self) -> ConfigResult<()> {
		if self.tls.hostname.is_empty() {
			return Err(ConfigError::Validation(
				"tls.hostname must be set".to_string(),
			));
		}
		if self.vault.address.is_empty() {
			return Err(ConfigError::Validation(
				"vault.address must be set".to_string(),
			));
		}
		Ok(())
	}

	/// Socket address string for the HTTP listener.
	pub fn socket_addr(&self) -> String {
		format!("{}:{}", self.tls.hostname, self.tls.port)
	}

	/// Whether `ip` may call the administrative bulk endpoints.
	pub fn is_trusted_inbound(&self, ip: &str) -> bool {
		self.trusted_inbound.iter().any(|a| a == ip)
	}
}
