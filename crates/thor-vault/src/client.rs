// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Low-level HTTP client for the secret-store backend.
//!
//! One [`VaultClient`] wraps one (token, namespace) pair; operations that
//! act under a different token build a fresh client around the same
//! connection pool, the way every adapter call in the coordinator does.

use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;

use crate::error::{VaultError, VaultResult};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Response-wrap TTL, also the delegation-token TTL.
pub const TTL: &str = "5m";
/// Explicit maximum TTL for minted child tokens.
pub const MAX_TTL: &str = "5m";

#[derive(Debug, Deserialize)]
struct ApiResponse {
	#[serde(default)]
	data: Option<Value>,
	#[serde(default)]
	auth: Option<AuthBlock>,
	#[serde(default)]
	wrap_info: Option<WrapInfo>,
	#[serde(default)]
	errors: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct AuthBlock {
	pub client_token: String,
}

#[derive(Debug, Deserialize)]
struct WrapInfo {
	token: String,
}

/// Request body for minting a child token.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TokenCreateRequest {
	pub display_name: String,
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub policies: Vec<String>,
	pub no_parent: bool,
	pub ttl: String,
	pub explicit_max_ttl: String,
	pub renewable: bool,
	pub num_uses: u64,
}

/// A backend client bound to an address, an optional namespace and an
/// optional token.
#[derive(Debug, Clone)]
pub struct VaultClient {
	http: reqwest::Client,
	address: String,
	namespace: Option<String>,
	token: Option<String>,
}

impl VaultClient {
	pub fn new(http: reqwest::Client, address: &str, namespace: &str) -> Self {
		// The root namespace is the absence of a namespace header.
		let namespace = match namespace {
			"" | "root" => None,
			other => Some(other.to_string()),
		};
		VaultClient {
			http,
			address: address.trim_end_matches('/').to_string(),
			namespace,
			token: None,
		}
	}

	/// Build the shared connection pool used by every client of one adapter.
	pub fn build_http() -> reqwest::Client {
		reqwest::Client::builder()
			.timeout(REQUEST_TIMEOUT)
			.build()
			.unwrap_or_default()
	}

	/// The same client authenticated as `token`.
	pub fn with_token(&self, token: &str) -> Self {
		let mut client = self.clone();
		client.token = Some(token.to_string());
		client
	}

	fn url(&self, path: &str) -> String {
		format!("{}/v1/{}", self.address, path.trim_start_matches('/'))
	}

	async fn request(
		&self,
		method: Method,
		path: &str,
		body: Option<&Value>,
		wrap_ttl: Option<&str>,
	) -> VaultResult<ApiResponse> {
		let mut req = self.http.request(method.clone(), self.url(path));
		if let Some(token) = &self.token {
			req = req.header("X-Vault-Token", token);
		}
		if let Some(namespace) = &self.namespace {
			req = req.header("X-Vault-Namespace", namespace);
		}
		if let Some(ttl) = wrap_ttl {
			req = req.header("X-Vault-Wrap-TTL", ttl);
		}
		if let Some(body) = body {
			req = req.json(body);
		}

		debug!(%method, path, "backend request");
		let resp = req.send().await?;
		let status = resp.status();

		if status == StatusCode::NOT_FOUND {
			// Reads of absent paths are "no data", not failures.
			return Ok(ApiResponse {
				data: None,
				auth: None,
				wrap_info: None,
				errors: None,
			});
		}

		let parsed: ApiResponse = if status == StatusCode::NO_CONTENT {
			ApiResponse {
				data: None,
				auth: None,
				wrap_info: None,
				errors: None,
			}
		} else {
			resp.json().await.map_err(VaultError::from)?
		};

		if !status.is_success() {
			let message = parsed
				.errors
				.unwrap_or_default()
				.join("; ");
			return Err(VaultError::Api {
				status: status.as_u16(),
				message,
			});
		}
		Ok(parsed)
	}

	/// Read a logical path. `Ok(None)` means the path holds nothing.
	pub async fn read(&self, path: &str) -> VaultResult<Option<Map<String, Value>>> {
		let resp = self.request(Method::GET, path, None, None).await?;
		Ok(resp.data.and_then(|v| v.as_object().cloned()))
	}

	/// Write a logical path.
	pub async fn write(
		&self,
		path: &str,
		body: &Map<String, Value>,
	) -> VaultResult<Option<Map<String, Value>>> {
		let resp = self
			.request(Method::POST, path, Some(&Value::Object(body.clone())), None)
			.await?;
		Ok(resp.data.and_then(|v| v.as_object().cloned()))
	}

	/// List the keys under a folder path. `Ok(None)` when the folder is
	/// empty or absent.
	pub async fn list(&self, path: &str) -> VaultResult<Option<Vec<String>>> {
		let method = Method::from_bytes(b"LIST").expect("LIST is a valid method");
		let resp = self.request(method, path, None, None).await?;
		let keys = resp.data.and_then(|v| {
			v.get("keys").and_then(|k| k.as_array()).map(|arr| {
				arr.iter()
					.filter_map(|k| k.as_str().map(str::to_string))
					.collect()
			})
		});
		Ok(keys)
	}

	/// Response-wrap `value`; the wrapping token is single-use.
	pub async fn wrap(&self, value: &str) -> VaultResult<String> {
		let mut body = Map::new();
		body.insert("value".to_string(), Value::String(value.to_string()));
		let resp = self
			.request(
				Method::POST,
				"sys/wrapping/wrap",
				Some(&Value::Object(body)),
				Some(TTL),
			)
			.await?;
		resp.wrap_info
			.map(|w| w.token)
			.ok_or_else(|| VaultError::MissingEntry("wrap_info.token".to_string()))
	}

	/// Unwrap a one-shot wrapping token into its data map. The token itself
	/// authenticates the call, so a replayed unwrap fails at the backend.
	pub async fn unwrap_map(&self, wrapping_token: &str) -> VaultResult<Map<String, Value>> {
		let client = self.with_token(wrapping_token);
		let resp = client
			.request(Method::POST, "sys/wrapping/unwrap", None, None)
			.await?;
		resp.data
			.and_then(|v| v.as_object().cloned())
			.ok_or_else(|| VaultError::MissingEntry("unwrapped data".to_string()))
	}

	/// Unwrap a wrapping token produced by [`VaultClient::wrap`].
	pub async fn unwrap(&self, wrapping_token: &str) -> VaultResult<String> {
		let data = self.unwrap_map(wrapping_token).await?;
		data.get("value")
			.and_then(|s| s.as_str())
			.map(str::to_string)
			.ok_or_else(|| VaultError::MissingEntry("unwrapped value".to_string()))
	}

	/// Post a login body and return the client token the backend issued.
	pub async fn login_request(
		&self,
		path: &str,
		body: &Map<String, Value>,
	) -> VaultResult<String> {
		let resp = self
			.request(Method::POST, path, Some(&Value::Object(body.clone())), None)
			.await?;
		resp.auth
			.map(|a| a.client_token)
			.ok_or_else(|| VaultError::MissingEntry("login response client token".to_string()))
	}

	/// Mint a token per `request`, under this client's own token.
	pub async fn token_create(&self, request: &TokenCreateRequest) -> VaultResult<String> {
		let body = serde_json::to_value(request)
			.map_err(|e| VaultError::Api { status: 0, message: e.to_string() })?;
		let resp = self
			.request(Method::POST, "auth/token/create", Some(&body), None)
			.await?;
		resp.auth
			.map(|a| a.client_token)
			.ok_or_else(|| VaultError::MissingEntry("auth.client_token".to_string()))
	}

	/// Look a token up; an error means it is expired or revoked.
	pub async fn token_lookup(&self, token: &str) -> VaultResult<Map<String, Value>> {
		let mut body = Map::new();
		body.insert("token".to_string(), Value::String(token.to_string()));
		let resp = self
			.request(
				Method::POST,
				"auth/token/lookup",
				Some(&Value::Object(body)),
				None,
			)
			.await?;
		resp.data
			.and_then(|v| v.as_object().cloned())
			.ok_or_else(|| VaultError::MissingEntry("token lookup data".to_string()))
	}

	/// Install (or replace) an ACL policy.
	pub async fn put_policy(&self, name: &str, policy: &str) -> VaultResult<()> {
		let mut body = Map::new();
		body.insert("policy".to_string(), Value::String(policy.to_string()));
		self.request(
			Method::PUT,
			&format!("sys/policies/acl/{name}"),
			Some(&Value::Object(body)),
			None,
		)
		.await?;
		Ok(())
	}

	/// The mount table, for KV discovery.
	pub async fn mounts(&self) -> VaultResult<Map<String, Value>> {
		let resp = self.request(Method::GET, "sys/mounts", None, None).await?;
		resp.data
			.and_then(|v| v.as_object().cloned())
			.ok_or_else(|| VaultError::MissingEntry("sys/mounts data".to_string()))
	}

	/// Generate a password with the backend generator engine.
	pub async fn generate_password(&self) -> VaultResult<String> {
		let resp = self
			.request(
				Method::POST,
				"gen/password",
				Some(&Value::Object(Map::new())),
				None,
			)
			.await?;
		resp.data
			.and_then(|v| v.get("value").and_then(|s| s.as_str()).map(str::to_string))
			.ok_or_else(|| VaultError::MissingEntry("generated password value".to_string()))
	}
}
