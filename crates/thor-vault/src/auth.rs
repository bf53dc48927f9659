// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Backend login: exactly one of approle / aws / azure.

use serde_json::{Map, Value};
use std::path::Path;
use std::time::Duration;
use tracing::{error, info, warn};

use thor_common_config::VaultConfig;

use crate::client::VaultClient;
use crate::error::{VaultError, VaultResult};

const IMDS_TIMEOUT: Duration = Duration::from_secs(5);
const AWS_IDENTITY_URL: &str = "http://169.254.169.254/latest/dynamic/instance-identity/pkcs7";
const AZURE_TOKEN_URL: &str = "http://169.254.169.254/metadata/identity/oauth2/token\
	?api-version=2018-02-01&resource=https%3A%2F%2Fmanagement.azure.com%2F";

/// Authenticate with the configured role and return a token-bearing client.
pub(crate) async fn role_client(
	http: &reqwest::Client,
	config: &VaultConfig,
) -> VaultResult<VaultClient> {
	let configured = [
		config.app_role.is_some(),
		config.aws_role.is_some(),
		config.azure_role.is_some(),
	]
	.iter()
	.filter(|c| **c)
	.count();
	if configured != 1 {
		return Err(VaultError::AuthConfig);
	}

	let client = VaultClient::new(http.clone(), &config.address, &config.namespace);
	if config.app_role.is_some() {
		app_role_login(&client, config).await
	} else if config.aws_role.is_some() {
		aws_login(&client, config).await
	} else {
		azure_login(&client, config).await
	}
}

fn login_error(err: VaultError) -> VaultError {
	match err {
		VaultError::Api { message, .. } => VaultError::AuthRejected(message),
		other => other,
	}
}

async fn app_role_login(client: &VaultClient, config: &VaultConfig) -> VaultResult<VaultClient> {
	let role = config.app_role.as_ref().expect("checked by caller");

	let secret_id = if role.response_wrapped {
		let unwrapped = client
			.unwrap_map(&role.secret_id)
			.await
			.map_err(login_error)?;
		unwrapped
			.get("secret_id")
			.and_then(|s| s.as_str())
			.map(str::to_string)
			.ok_or_else(|| VaultError::MissingEntry("wrapped secret_id".to_string()))?
	} else {
		role.secret_id.clone()
	};

	if role.role_id.is_empty() {
		return Err(VaultError::AuthRejected("no role ID was provided".to_string()));
	}

	let mut body = Map::new();
	body.insert("role_id".to_string(), Value::String(role.role_id.clone()));
	body.insert("secret_id".to_string(), Value::String(secret_id));

	login(client, "auth/approle/login", body).await
}

async fn aws_login(client: &VaultClient, config: &VaultConfig) -> VaultResult<VaultClient> {
	let role = config.aws_role.as_ref().expect("checked by caller");
	let pkcs7 = imds_get(AWS_IDENTITY_URL, false).await?;

	let mut body = Map::new();
	body.insert("role".to_string(), Value::String(role.role.clone()));
	body.insert(
		"pkcs7".to_string(),
		Value::String(pkcs7.replace('\n', "")),
	);

	login(client, "auth/aws/login", body).await
}

async fn azure_login(client: &VaultClient, config: &VaultConfig) -> VaultResult<VaultClient> {
	let role = config.azure_role.as_ref().expect("checked by caller");
	let raw = imds_get(AZURE_TOKEN_URL, true).await?;
	let token: Value = serde_json::from_str(&raw)
		.map_err(|e| VaultError::BackendUnavailable(format!("azure metadata: {e}")))?;
	let jwt = token
		.get("access_token")
		.and_then(|t| t.as_str())
		.ok_or_else(|| VaultError::MissingEntry("azure access_token".to_string()))?;

	let mut body = Map::new();
	body.insert("role".to_string(), Value::String(role.role.clone()));
	body.insert("jwt".to_string(), Value::String(jwt.to_string()));

	login(client, "auth/azure/login", body).await
}

async fn login(
	client: &VaultClient,
	path: &str,
	body: Map<String, Value>,
) -> VaultResult<VaultClient> {
	let token = client
		.login_request(path, &body)
		.await
		.map_err(login_error)?;
	Ok(client.with_token(&token))
}

/// Fetch from the platform instance-metadata service.
async fn imds_get(url: &str, azure: bool) -> VaultResult<String> {
	let http = reqwest::Client::builder()
		.timeout(IMDS_TIMEOUT)
		.build()
		.unwrap_or_default();
	let mut req = http.get(url);
	if azure {
		req = req.header("Metadata", "true");
	}
	let resp = req
		.send()
		.await
		.map_err(|e| VaultError::BackendUnavailable(format!("metadata service: {e}")))?;
	if !resp.status().is_success() {
		return Err(VaultError::BackendUnavailable(format!(
			"metadata service returned {}",
			resp.status()
		)));
	}
	resp.text()
		.await
		.map_err(|e| VaultError::BackendUnavailable(format!("metadata service: {e}")))
}

/// Bootstrap the approle credentials from an initialisation token.
///
/// The token may be inline or a path to a file; the file is deleted after a
/// successful read. Reads the encryption-key secret to learn the role name
/// and mount, reads back the role-id, and mints a secret-id with an empty
/// CIDR list.
pub(crate) async fn bootstrap_app_role(
	http: &reqwest::Client,
	config: &mut VaultConfig,
) -> VaultResult<()> {
	let Some(role) = config.app_role.as_ref() else {
		return Ok(());
	};
	if role.initialisation_token.is_empty()
		|| !role.role_id.is_empty()
		|| !role.secret_id.is_empty()
	{
		return Ok(());
	}

	let mut token = role.initialisation_token.clone();
	if Path::new(&token).exists() {
		let path = token.clone();
		token = tokio::fs::read_to_string(&path)
			.await
			.map_err(|e| {
				error!(path, error = %e, "failed to read initialisation token");
				VaultError::AuthRejected("unreadable initialisation token".to_string())
			})?
			.trim()
			.to_string();
		if let Err(e) = tokio::fs::remove_file(&path).await {
			// non-fatal
			warn!(path, error = %e, "failed to delete initialisation token file");
		}
	}

	let client = VaultClient::new(http.clone(), &config.address, &config.namespace)
		.with_token(&token);

	let secret = client
		.read(&config.encryption_key_path)
		.await?
		.ok_or_else(|| VaultError::MissingEntry(config.encryption_key_path.clone()))?;
	let name = secret
		.get("role-name")
		.and_then(|v| v.as_str())
		.ok_or_else(|| VaultError::MissingEntry("role-name".to_string()))?
		.to_string();
	let mount = secret
		.get("mount-name")
		.and_then(|v| v.as_str())
		.unwrap_or("approle")
		.to_string();

	let role_id = client
		.read(&format!("auth/{mount}/role/{name}/role-id"))
		.await?
		.and_then(|d| d.get("role_id").and_then(|v| v.as_str()).map(str::to_string))
		.ok_or_else(|| VaultError::MissingEntry("role_id".to_string()))?;

	let mut body = Map::new();
	body.insert("cidr_list".to_string(), Value::Array(Vec::new()));
	let secret_id = client
		.write(&format!("auth/{mount}/role/{name}/secret-id"), &body)
		.await?
		.and_then(|d| {
			d.get("secret_id")
				.and_then(|v| v.as_str())
				.map(str::to_string)
		})
		.ok_or_else(|| VaultError::MissingEntry("secret_id".to_string()))?;

	let role = config.app_role.as_mut().expect("checked above");
	role.role_id = role_id;
	role.secret_id = secret_id;
	info!(mount, "approle credentials bootstrapped");
	Ok(())
}
