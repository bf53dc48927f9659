// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Secret-store backend configuration.

use serde::{Deserialize, Serialize};
use thor_common_crypto::policy::KeyPolicy;

/// AppRole credentials, optionally response-wrapped, optionally bootstrapped
/// from an initialisation token (inline or a path to a file holding one).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppRoleConfig {
	#[serde(rename = "roleId", default)]
	pub role_id: String,
	#[serde(rename = "secretId", default)]
	pub secret_id: String,
	#[serde(rename = "wrapped", default)]
	pub response_wrapped: bool,
	#[serde(rename = "initialisationToken", default)]
	pub initialisation_token: String,
}

/// Cloud-identity role (AWS or Azure): the backend role name to log in as.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudRoleConfig {
	pub role: String,
}

/// Backend connection and rotation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
	pub address: String,

	#[serde(rename = "appRole", default, skip_serializing_if = "Option::is_none")]
	pub app_role: Option<AppRoleConfig>,
	#[serde(rename = "awsRole", default, skip_serializing_if = "Option::is_none")]
	pub aws_role: Option<CloudRoleConfig>,
	#[serde(rename = "azureRole", default, skip_serializing_if = "Option::is_none")]
	pub azure_role: Option<CloudRoleConfig>,

	#[serde(default)]
	pub namespace: String,

	/// KV v1 path holding per-namespace encrypted delegation tokens. Token
	/// history must never be tracked here.
	#[serde(rename = "securePath", default)]
	pub secure_token_path: String,

	/// KV path of the `apikey` entry holding the envelope encryption key.
	#[serde(rename = "encryptionkey", default)]
	pub encryption_key_path: String,

	#[serde(rename = "passwordPolicy", default, skip_serializing_if = "Option::is_none")]
	pub password_policy: Option<KeyPolicy>,

	/// Key names whose values automation may replace during an ex-employee
	/// rotation round.
	#[serde(rename = "replaceableKeys", default)]
	pub replaceable: Vec<String>,
}

impl VaultConfig {
	/// Minimal backend configuration the agent uses: address and namespace
	/// only, everything else left for the coordinator.
	pub fn for_agent(address: &str, namespace: &str) -> Self {
		VaultConfig {
			address: address.to_string(),
			app_role: None,
			aws_role: None,
			azure_role: None,
			namespace: namespace.to_string(),
			secure_token_path: String::new(),
			encryption_key_path: String::new(),
			password_policy: None,
			replaceable: Vec::new(),
		}
	}

	/// Policy applied to coordinator-minted encryption keys.
	pub fn token_policy(&self) -> KeyPolicy {
		KeyPolicy::token_policy()
	}
}
