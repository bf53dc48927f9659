// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Agent configuration (`agent.yaml`).

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::server::TlsConfig;
use crate::{ConfigError, ConfigResult};

/// The `agent:` section. The API key obtained at registration lives only in
/// memory and never appears in this file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
	#[serde(rename = "vaultServer")]
	pub vault_server: String,
	#[serde(rename = "thorServer")]
	pub thor_server: String,
	#[serde(default)]
	pub paths: Vec<String>,
	pub namespace: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub tls: Option<TlsConfig>,
	#[serde(default)]
	pub edge: bool,
}

/// Top-level agent file wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentFile {
	pub agent: AgentConfig,
}

impl AgentFile {
	/// Load and validate the agent configuration.
	pub async fn load(path: &Path) -> ConfigResult<Self> {
		let file: AgentFile = crate::read_yaml(path).await?;
		file.validate()?;
		info!(
			coordinator = %file.agent.thor_server,
			vault = %file.agent.vault_server,
			namespace = %file.agent.namespace,
			paths = file.agent.paths.len(),
			"agent configuration loaded"
		);
		Ok(file)
	}

	fn validate(&self) -> ConfigResult<()> {
		if self.agent.thor_server.is_empty() {
			return Err(ConfigError::Validation(
				"agent.thorServer must be set".to_string(),
			));
		}
		if self.agent.vault_server.is_empty() {
			return Err(ConfigError::Validation(
				"agent.vaultServer must be set".to_string(),
			));
		}
		if self.agent.namespace.is_empty() {
			return Err(ConfigError::Validation(
				"agent.namespace must be set".to_string(),
			));
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_agent_file() {
		let raw = r#"
agent:
  vaultServer: https://vault.example.com:8200
  thorServer: https://thor.example.com:8443
  namespace: production
  paths:
    - kv/servers/h1
    - kv/servers/h2
  edge: false
"#;
		let file: AgentFile = serde_yaml::from_str(raw).unwrap();
		assert_eq!(file.agent.namespace, "production");
		assert_eq!(file.agent.paths.len(), 2);
		assert!(file.agent.tls.is_none());
		assert!(!file.agent.edge);
	}

	#[tokio::test]
	async fn load_rejects_empty_namespace() {
		let dir = tempfile::TempDir::new().unwrap();
		let path = dir.path().join("agent.yaml");
		tokio::fs::write(
			&path,
			"agent:\n  vaultServer: http://v\n  thorServer: http://t\n  namespace: ''\n",
		)
		.await
		.unwrap();
		let err = AgentFile::load(&path).await.unwrap_err();
		assert!(matches!(err, ConfigError::Validation(_)));
	}
}
