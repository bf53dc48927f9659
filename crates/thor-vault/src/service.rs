// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! High-level secret-store operations used by the coordinator and the agent.

use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use thor_common_config::VaultConfig;
use thor_common_crypto::envelope;
use thor_common_crypto::policy::KeyPolicy;

use crate::auth;
use crate::client::{TokenCreateRequest, VaultClient, MAX_TTL, TTL};
use crate::error::{VaultError, VaultResult};
use crate::kv::{self, SecretData};

/// Key of the encryption-key entry at the configured KV path.
const ENCRYPTION_KEY_ENTRY: &str = "apikey";

/// Outcome of a delegated-token request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DelegatedToken {
	/// No still-valid delegation token for the namespace; the agent should
	/// not rotate this round.
	Standby,
	/// `tok|<wrapping-token>`, ready for the DTLS channel.
	Wrapped(String),
}

/// The secret-store adapter.
pub struct VaultService {
	http: reqwest::Client,
	config: VaultConfig,
	encryption_key: RwLock<Option<String>>,
}

impl VaultService {
	pub fn new(config: VaultConfig) -> Self {
		VaultService {
			http: VaultClient::build_http(),
			config,
			encryption_key: RwLock::new(None),
		}
	}

	/// Startup: bootstrap approle credentials if an initialisation token is
	/// configured, then make sure the envelope encryption key exists.
	pub async fn init(&mut self) -> VaultResult<()> {
		auth::bootstrap_app_role(&self.http, &mut self.config).await?;

		match self.encryption_key().await {
			Ok(_) => {}
			Err(VaultError::MissingEntry(_)) => {
				let key = self.create_encryption_key(&self.config.token_policy()).await?;
				self.store_encryption_key(&key).await?;
				*self.encryption_key.write().await = Some(key);
				info!("envelope encryption key created");
			}
			Err(e) => return Err(e),
		}
		Ok(())
	}

	/// Authenticate with the configured role.
	async fn role_client(&self) -> VaultResult<VaultClient> {
		auth::role_client(&self.http, &self.config).await
	}

	/// A client acting as `token` inside `namespace`.
	fn token_client(&self, token: &str, namespace: &str) -> VaultClient {
		VaultClient::new(self.http.clone(), &self.config.address, namespace).with_token(token)
	}

	/// An unauthenticated client for `namespace`; unwraps authenticate with
	/// the wrapping token itself.
	fn bare_client(&self, namespace: &str) -> VaultClient {
		VaultClient::new(self.http.clone(), &self.config.address, namespace)
	}

	/// Generate a fresh key with the backend generator, constrained by
	/// `policy`.
	pub async fn create_encryption_key(&self, policy: &KeyPolicy) -> VaultResult<String> {
		let client = self.role_client().await?;
		let generated = client.generate_password().await?;
		Ok(policy.apply(&generated)?)
	}

	/// Persist the encryption key at its configured KV path.
	pub async fn store_encryption_key(&self, key: &str) -> VaultResult<()> {
		self.write_internal(ENCRYPTION_KEY_ENTRY, key, &self.config.encryption_key_path)
			.await
	}

	/// The envelope encryption key, fetched once and cached in memory.
	pub async fn encryption_key(&self) -> VaultResult<String> {
		if let Some(key) = self.encryption_key.read().await.clone() {
			return Ok(key);
		}

		let client = self.role_client().await?;
		let data = client
			.read(&self.config.encryption_key_path)
			.await?
			.ok_or_else(|| VaultError::MissingEntry(self.config.encryption_key_path.clone()))?;
		let key = data
			.get(ENCRYPTION_KEY_ENTRY)
			.and_then(|v| v.as_str())
			.ok_or_else(|| VaultError::MissingEntry(ENCRYPTION_KEY_ENTRY.to_string()))?
			.to_string();

		*self.encryption_key.write().await = Some(key.clone());
		Ok(key)
	}

	/// Response-wrap `value` with the standard TTL.
	pub async fn wrap(&self, value: &str) -> VaultResult<String> {
		let client = self.role_client().await?;
		client.wrap(value).await
	}

	/// Unwrap a one-shot wrapping token. A second unwrap of the same token
	/// fails at the backend; callers treat that as a replay signal.
	pub async fn unwrap(&self, wrapping_token: &str, namespace: &str) -> VaultResult<String> {
		self.bare_client(namespace).unwrap(wrapping_token).await
	}

	/// Envelope-encrypt a string under `key`.
	pub fn encrypt(&self, plaintext: &str, key: &str) -> VaultResult<String> {
		Ok(envelope::encrypt(plaintext.as_bytes(), key)?)
	}

	/// Envelope-decrypt a string under `key`.
	pub fn decrypt(&self, ciphertext: &str, key: &str) -> VaultResult<String> {
		Ok(envelope::decrypt_string(ciphertext, key)?)
	}

	/// Store an orphaned child-creation token derived from the admin-supplied
	/// rotation token.
	///
	/// The child carries a freshly installed policy granting `list,read` on
	/// each rotation path plus the ability to create further child tokens,
	/// lives five minutes, and is written envelope-encrypted under the
	/// secure-token path keyed by namespace.
	pub async fn create_and_store_child_creation_token(
		&self,
		token: &str,
		namespace: &str,
		policy_paths: &[String],
	) -> VaultResult<()> {
		let client = self.token_client(token, namespace);

		let policy = build_rotation_policy(policy_paths);
		let policy_name = format!("rotation-policy-{}", Utc::now().format("%Y-%m-%d-%H-%M"));
		client.put_policy(&policy_name, &policy).await?;

		let child = client
			.token_create(&TokenCreateRequest {
				display_name: format!("Auto-Rotation-Parent-{policy_name}"),
				policies: vec![policy_name.clone()],
				no_parent: true,
				ttl: TTL.to_string(),
				explicit_max_ttl: MAX_TTL.to_string(),
				renewable: false,
				num_uses: 0,
			})
			.await
			.map_err(|e| {
				error!(namespace, error = %e, "failed to create limited child token");
				e
			})?;

		let key = self.encryption_key().await?;
		let encrypted = self.encrypt(&child, &key)?;
		self.write_internal(namespace, &encrypted, &self.config.secure_token_path)
			.await
	}

	/// Produce a wrapped, device-encrypted delegated token for `namespace`,
	/// or [`DelegatedToken::Standby`] when no rotation is pending.
	pub async fn get_token(
		&self,
		namespace: &str,
		device_key: &str,
	) -> VaultResult<DelegatedToken> {
		let client = self.role_client().await?;

		let stored = client
			.read(&self.config.secure_token_path)
			.await?
			.and_then(|data| {
				data.get(namespace)
					.and_then(|v| v.as_str())
					.map(str::to_string)
			})
			.ok_or_else(|| {
				VaultError::MissingEntry(format!(
					"no keys have been stored for accessing namespace {namespace}"
				))
			})?;

		let key = self.encryption_key().await?;
		let delegation = self.decrypt(&stored, &key)?;

		// An expired delegation token means no rotation round is open; the
		// agent is told to stand down rather than handed an error.
		if client.token_lookup(&delegation).await.is_err() {
			debug!(namespace, "delegation token expired, standby");
			return Ok(DelegatedToken::Standby);
		}

		let delegation_client = self.token_client(&delegation, namespace);
		let child = delegation_client
			.token_create(&TokenCreateRequest {
				display_name: "Auto-Rotation".to_string(),
				policies: Vec::new(),
				no_parent: false,
				ttl: TTL.to_string(),
				explicit_max_ttl: MAX_TTL.to_string(),
				renewable: false,
				num_uses: 0,
			})
			.await
			.map_err(|e| {
				error!(namespace, error = %e, "failed to create limited child token");
				e
			})?;

		let encrypted = self.encrypt(&child, device_key)?;
		let wrapped = delegation_client.wrap(&encrypted).await?;
		Ok(DelegatedToken::Wrapped(format!("tok|{wrapped}")))
	}

	/// Read-modify-write a KV v1 path under the role login. A missing prior
	/// secret starts from an empty mapping.
	async fn write_internal(&self, key: &str, value: &str, path: &str) -> VaultResult<()> {
		let client = self.role_client().await?;
		let mut data = client.read(path).await?.unwrap_or_default();
		data.insert(key.to_string(), Value::String(value.to_string()));
		client.write(path, &data).await?;
		Ok(())
	}

	/// Reset the `rotated` metadata at `path` before a rotation round.
	pub async fn clear_rotation(&self, token: &str, namespace: &str, path: &str) {
		let client = self.token_client(token, namespace);
		let raw = match client.read(path).await {
			Ok(Some(raw)) => raw,
			Ok(None) => return,
			Err(e) => {
				error!(path, error = %e, "failed to read secret for rotation clear");
				return;
			}
		};

		let mut secret = SecretData::from_read(raw);
		secret.set_rotated(&[]);
		if let Err(e) = client.write(path, &secret.into_write_body()).await {
			error!(path, error = %e, "failed to clear rotation metadata");
		}
	}

	/// Rotate every matching entry at `path`.
	///
	/// `search` matches values when `compromised` (the password being
	/// replaced), key names otherwise (an account being rotated). Each
	/// matched key gets a freshly generated password; the `rotated`
	/// metadata accumulates the key names so agents know which accounts to
	/// touch. Failures are collected per key and never abort the round.
	pub async fn rotate(
		&self,
		path: &str,
		token: &str,
		search: &str,
		namespace: &str,
		compromised: bool,
	) -> Vec<VaultError> {
		let mut errors = Vec::new();
		let client = self.token_client(token, namespace);

		let raw = match client.read(path).await {
			Ok(Some(raw)) => raw,
			Ok(None) => return errors,
			Err(e) => {
				errors.push(e);
				return errors;
			}
		};

		let mut secret = SecretData::from_read(raw);
		let mut rotated = secret.rotated_keys();
		let mut changed = false;

		let keys: Vec<String> = secret.data.keys().cloned().collect();
		for key in keys {
			let value = secret.data[&key].clone();
			if !kv::matches_search(&key, &value, search, compromised) {
				continue;
			}

			info!(namespace, path, key, "generating new password");
			let generated = match client.generate_password().await {
				Ok(generated) => generated,
				Err(e) => {
					errors.push(e);
					continue;
				}
			};

			let fresh = match &self.config.password_policy {
				Some(policy) => match policy.apply(&generated) {
					Ok(fresh) => fresh,
					Err(e) => {
						errors.push(VaultError::Crypto(e));
						continue;
					}
				},
				None => generated,
			};

			secret
				.data
				.insert(key.clone(), Value::String(fresh));
			rotated.push(key);
			changed = true;
		}

		secret.set_rotated(&rotated);

		if changed {
			info!(namespace, path, "storing updated credentials");
			if let Err(e) = client.write(path, &secret.into_write_body()).await {
				errors.push(e);
			}
		}
		errors
	}

	/// The credentials an agent must apply: only the keys named by the
	/// `rotated` metadata at `path`.
	pub async fn read(
		&self,
		path: &str,
		token: &str,
		namespace: &str,
	) -> VaultResult<HashMap<String, String>> {
		let client = self.token_client(token, namespace);
		let raw = client
			.read(path)
			.await?
			.ok_or_else(|| VaultError::MissingEntry(path.to_string()))?;

		let secret = SecretData::from_read(raw);
		let mut credentials = HashMap::new();
		for key in secret.rotated_keys() {
			if let Some(value) = secret.data.get(&key).and_then(|v| v.as_str()) {
				credentials.insert(key, value.to_string());
			}
		}
		Ok(credentials)
	}

	/// Find every KV path in the namespace whose secret holds `password` as
	/// a value. Folder walks and leaf reads fan out concurrently.
	pub async fn search(
		&self,
		password: &str,
		token: &str,
		namespace: &str,
	) -> VaultResult<Vec<String>> {
		let client = self.token_client(token, namespace);

		debug!("getting mount points");
		let mounts = client.mounts().await?;
		let mut folders = Vec::new();
		for (mount, details) in &mounts {
			let Some(details) = details.as_object() else {
				continue;
			};
			if details.get("type").and_then(|t| t.as_str()) != Some("kv") {
				continue;
			}
			let v2 = details
				.get("options")
				.and_then(|o| o.get("version"))
				.and_then(|v| v.as_str())
				== Some("2");
			let root = if v2 {
				format!("{}/metadata/", mount.trim_end_matches('/'))
			} else {
				mount.clone()
			};
			folders.push(root);
		}
		debug!(mounts = folders.len(), "found KV mounts");

		// Walk folders level by level, each level fanned out.
		let mut leaves = Vec::new();
		while !folders.is_empty() {
			let mut tasks = JoinSet::new();
			for folder in folders.drain(..) {
				let client = client.clone();
				tasks.spawn(async move {
					let keys = client.list(&folder).await.unwrap_or_default();
					(folder, keys.unwrap_or_default())
				});
			}
			while let Some(joined) = tasks.join_next().await {
				let Ok((folder, keys)) = joined else { continue };
				for key in keys {
					let path = kv::join_path(&folder, &key);
					if key.ends_with('/') {
						folders.push(path);
					} else {
						leaves.push(kv::metadata_to_data(&path));
					}
				}
			}
		}

		let mut tasks = JoinSet::new();
		for leaf in leaves {
			let client = client.clone();
			let password = password.to_string();
			tasks.spawn(async move {
				let raw = client.read(&leaf).await.ok().flatten()?;
				let secret = SecretData::from_read(raw);
				let hit = secret
					.data
					.values()
					.any(|v| v.as_str() == Some(password.as_str()));
				hit.then_some(leaf)
			});
		}

		let mut results = Vec::new();
		while let Some(joined) = tasks.join_next().await {
			if let Ok(Some(path)) = joined {
				results.push(path);
			}
		}
		results.sort();
		Ok(results)
	}

	/// Key names automation may replace in an ex-employee round.
	pub fn replaceable_keys(&self) -> &[String] {
		&self.config.replaceable
	}

	/// The coordinator's token policy for minted device keys.
	pub fn token_policy(&self) -> KeyPolicy {
		self.config.token_policy()
	}
}

/// HCL policy granting child-token creation plus read access to exactly the
/// requested rotation paths.
fn build_rotation_policy(policy_paths: &[String]) -> String {
	let mut policy =
		String::from("path \"auth/token/create\" {\n  capabilities = [\"create\", \"update\"]\n}\n\n");
	for path in policy_paths {
		policy.push_str(&format!(
			"path \"{path}\" {{\n  capabilities = [\"list\", \"read\"]\n}}\n\n"
		));
	}
	policy
}

/// The adapter surface the coordinator depends on. A trait seam so the API
/// handlers can be exercised against a stub store.
#[async_trait::async_trait]
pub trait SecretStore: Send + Sync {
	async fn create_encryption_key(&self, policy: &KeyPolicy) -> VaultResult<String>;
	async fn wrap(&self, value: &str) -> VaultResult<String>;
	async fn get_token(&self, namespace: &str, device_key: &str) -> VaultResult<DelegatedToken>;
	async fn create_and_store_child_creation_token(
		&self,
		token: &str,
		namespace: &str,
		policy_paths: &[String],
	) -> VaultResult<()>;
	async fn clear_rotation(&self, token: &str, namespace: &str, path: &str);
	async fn rotate(
		&self,
		path: &str,
		token: &str,
		search: &str,
		namespace: &str,
		compromised: bool,
	) -> Vec<VaultError>;
	fn decrypt(&self, ciphertext: &str, key: &str) -> VaultResult<String>;
	fn replaceable_keys(&self) -> Vec<String>;
	fn token_policy(&self) -> KeyPolicy;
}

#[async_trait::async_trait]
impl SecretStore for VaultService {
	async fn create_encryption_key(&self, policy: &KeyPolicy) -> VaultResult<String> {
		VaultService::create_encryption_key(self, policy).await
	}

	async fn wrap(&self, value: &str) -> VaultResult<String> {
		VaultService::wrap(self, value).await
	}

	async fn get_token(&self, namespace: &str, device_key: &str) -> VaultResult<DelegatedToken> {
		VaultService::get_token(self, namespace, device_key).await
	}

	async fn create_and_store_child_creation_token(
		&self,
		token: &str,
		namespace: &str,
		policy_paths: &[String],
	) -> VaultResult<()> {
		VaultService::create_and_store_child_creation_token(self, token, namespace, policy_paths)
			.await
	}

	async fn clear_rotation(&self, token: &str, namespace: &str, path: &str) {
		VaultService::clear_rotation(self, token, namespace, path).await
	}

	async fn rotate(
		&self,
		path: &str,
		token: &str,
		search: &str,
		namespace: &str,
		compromised: bool,
	) -> Vec<VaultError> {
		VaultService::rotate(self, path, token, search, namespace, compromised).await
	}

	fn decrypt(&self, ciphertext: &str, key: &str) -> VaultResult<String> {
		VaultService::decrypt(self, ciphertext, key)
	}

	fn replaceable_keys(&self) -> Vec<String> {
		self.config.replaceable.clone()
	}

	fn token_policy(&self) -> KeyPolicy {
		self.config.token_policy()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use thor_common_config::VaultConfig;

	fn service() -> VaultService {
		VaultService::new(VaultConfig::for_agent("http://127.0.0.1:8200", "ns"))
	}

	#[test]
	fn rotation_policy_lists_exact_paths() {
		let policy = build_rotation_policy(&[
			"kv/servers/h1".to_string(),
			"kv/servers/h2".to_string(),
		]);
		assert!(policy.starts_with(
			"path \"auth/token/create\" {\n  capabilities = [\"create\", \"update\"]\n}\n\n"
		));
		assert!(policy.contains("path \"kv/servers/h1\" {\n  capabilities = [\"list\", \"read\"]\n}"));
		assert!(policy.contains("path \"kv/servers/h2\" {"));
		assert_eq!(policy.matches("path \"").count(), 3);
	}

	#[test]
	fn encrypt_decrypt_passthrough() {
		let service = service();
		let encrypted = service.encrypt("hvs.token", "device-key").unwrap();
		assert_eq!(service.decrypt(&encrypted, "device-key").unwrap(), "hvs.token");
		assert!(service.decrypt(&encrypted, "other-key").is_err());
	}

	#[tokio::test]
	async fn role_client_requires_exactly_one_role() {
		let service = service();
		let err = service.role_client().await.unwrap_err();
		assert!(matches!(err, VaultError::AuthConfig));

		let mut config = VaultConfig::for_agent("http://127.0.0.1:8200", "ns");
		config.app_role = Some(thor_common_config::AppRoleConfig {
			role_id: "r".to_string(),
			secret_id: "s".to_string(),
			response_wrapped: false,
			initialisation_token: String::new(),
		});
		config.aws_role = Some(thor_common_config::CloudRoleConfig {
			role: "aws".to_string(),
		});
		let service = VaultService::new(config);
		let err = service.role_client().await.unwrap_err();
		assert!(matches!(err, VaultError::AuthConfig));
	}
}
