// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Admission API tests against a stub secret store and a recording control
//! channel.

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::connect_info::ConnectInfo;
use axum::http::{Request, StatusCode};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tower::ServiceExt;

use thor_common_crypto::policy::KeyPolicy;
use thor_dtls::{ControlMessage, DtlsResult};
use thor_registry::Registry;
use thor_server::api::ApiResult;
use thor_server::{ControlChannel, ServerState};
use thor_vault::{DelegatedToken, SecretStore, VaultError, VaultResult};

const PEM: &str = "-----BEGIN CERTIFICATE-----\nAGENTCERT\n-----END CERTIFICATE-----\n";
const DIGEST: &str = "d1d1d1d1";

struct StubStore {
	token_response: Mutex<Option<VaultResult<DelegatedToken>>>,
}

impl StubStore {
	fn new() -> Self {
		StubStore {
			token_response: Mutex::new(None),
		}
	}

	async fn set_token_response(&self, response: VaultResult<DelegatedToken>) {
		*self.token_response.lock().await = Some(response);
	}
}

#[async_trait]
impl SecretStore for StubStore {
	async fn create_encryption_key(&self, _policy: &KeyPolicy) -> VaultResult<String> {
		Ok("minted-device-key".to_string())
	}

	async fn wrap(&self, value: &str) -> VaultResult<String> {
		Ok(format!("wrap({value})"))
	}

	async fn get_token(&self, _namespace: &str, _device_key: &str) -> VaultResult<DelegatedToken> {
		self.token_response
			.lock()
			.await
			.take()
			.unwrap_or(Ok(DelegatedToken::Standby))
	}

	async fn create_and_store_child_creation_token(
		&self,
		_token: &str,
		_namespace: &str,
		_policy_paths: &[String],
	) -> VaultResult<()> {
		Ok(())
	}

	async fn clear_rotation(&self, _token: &str, _namespace: &str, _path: &str) {}

	async fn rotate(
		&self,
		_path: &str,
		_token: &str,
		_search: &str,
		_namespace: &str,
		_compromised: bool,
	) -> Vec<VaultError> {
		Vec::new()
	}

	fn decrypt(&self, ciphertext: &str, _key: &str) -> VaultResult<String> {
		Ok(ciphertext.to_string())
	}

	fn replaceable_keys(&self) -> Vec<String> {
		vec!["password".to_string()]
	}

	fn token_policy(&self) -> KeyPolicy {
		KeyPolicy::token_policy()
	}
}

#[derive(Default)]
struct RecordingChannel {
	sent: Mutex<Vec<(String, String)>>,
}

impl RecordingChannel {
	async fn lines(&self) -> Vec<(String, String)> {
		self.sent.lock().await.clone()
	}

	async fn wait_for(&self, count: usize) -> Vec<(String, String)> {
		for _ in 0..100 {
			let lines = self.lines().await;
			if lines.len() >= count {
				return lines;
			}
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
		self.lines().await
	}
}

#[async_trait]
impl ControlChannel for RecordingChannel {
	async fn send(
		&self,
		address: &str,
		message: ControlMessage,
		_pinned_pem: &str,
	) -> DtlsResult<()> {
		self.sent
			.lock()
			.await
			.push((address.to_string(), message.to_string()));
		Ok(())
	}
}

struct Harness {
	router: axum::Router,
	state: Arc<ServerState>,
	store: Arc<StubStore>,
	channel: Arc<RecordingChannel>,
	wakeup_rx: tokio::sync::mpsc::Receiver<String>,
	_dir: tempfile::TempDir,
}

fn harness() -> Harness {
	let dir = tempfile::TempDir::new().unwrap();
	let registry = Registry::open(&dir.path().join("thor.db")).unwrap();
	registry.add_devices(&["10.0.0.7".to_string()]).unwrap();
	registry
		.add_shasums(&[(DIGEST.to_string(), "agent".to_string())])
		.unwrap();

	let config: thor_common_config::ServerConfig = serde_yaml::from_str(
		r#"
tls:
  hostname: thor.example.com
  port: 8443
vault:
  address: http://127.0.0.1:8200
trustedInbound:
  - 10.0.0.5
"#,
	)
	.unwrap();

	let store = Arc::new(StubStore::new());
	let channel = Arc::new(RecordingChannel::default());
	let (wakeup_tx, wakeup_rx) = tokio::sync::mpsc::channel(16);

	let state = Arc::new(ServerState::new(
		config,
		registry,
		store.clone(),
		channel.clone(),
		wakeup_tx,
	));
	Harness {
		router: thor_server::create_router(Arc::clone(&state)),
		state,
		store,
		channel,
		wakeup_rx,
		_dir: dir,
	}
}

fn post_json(uri: &str, from: [u8; 4], body: serde_json::Value) -> Request<Body> {
	Request::builder()
		.method("POST")
		.uri(uri)
		.header("content-type", "application/json")
		.extension(ConnectInfo(SocketAddr::from((from, 51234))))
		.body(Body::from(body.to_string()))
		.unwrap()
}

async fn api_result(response: axum::response::Response) -> (StatusCode, ApiResult) {
	let status = response.status();
	let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
		.await
		.unwrap();
	(status, serde_json::from_slice(&bytes).unwrap())
}

fn register_body() -> serde_json::Value {
	serde_json::json!({
		"registration_request": PEM,
		"namespace": "ns",
		"shasum": DIGEST,
	})
}

#[tokio::test]
async fn fresh_registration_is_accepted_and_key_delivered() {
	let h = harness();

	let response = h
		.router
		.clone()
		.oneshot(post_json("/api/v1/register", [10, 0, 0, 7], register_body()))
		.await
		.unwrap();
	let (status, result) = api_result(response).await;
	assert_eq!(status, StatusCode::ACCEPTED);
	assert_eq!(result.status, "accepted");

	assert_eq!(
		h.state.registry.device_api_key("10.0.0.7").unwrap().unwrap(),
		"minted-device-key"
	);
	assert_eq!(
		h.state
			.registry
			.pinned_certificate("10.0.0.7")
			.unwrap()
			.unwrap(),
		PEM
	);
	assert_eq!(h.state.registry.namespace_members("ns").unwrap(), vec!["10.0.0.7"]);

	let sent = h.channel.wait_for(1).await;
	assert_eq!(sent.len(), 1);
	assert_eq!(sent[0].0, "10.0.0.7");
	assert_eq!(sent[0].1, "key|wrap(minted-device-key)");
}

#[tokio::test]
async fn unknown_digest_is_rejected_without_state_change() {
	let h = harness();

	let mut body = register_body();
	body["shasum"] = serde_json::json!("deadbeef");
	let response = h
		.router
		.clone()
		.oneshot(post_json("/api/v1/register", [10, 0, 0, 7], body))
		.await
		.unwrap();
	let (status, result) = api_result(response).await;
	assert_eq!(status, StatusCode::FORBIDDEN);
	assert_eq!(result.status, "rejected");

	assert_eq!(h.state.registry.device_api_key("10.0.0.7").unwrap().unwrap(), "");
	assert!(h.state.registry.pinned_certificate("10.0.0.7").unwrap().is_none());
	assert!(h.channel.lines().await.is_empty());
}

#[tokio::test]
async fn certificate_mismatch_is_rejected() {
	let h = harness();
	h.router
		.clone()
		.oneshot(post_json("/api/v1/register", [10, 0, 0, 7], register_body()))
		.await
		.unwrap();

	let mut body = register_body();
	body["registration_request"] = serde_json::json!("a different pem");
	let response = h
		.router
		.clone()
		.oneshot(post_json("/api/v1/register", [10, 0, 0, 7], body))
		.await
		.unwrap();
	let (status, result) = api_result(response).await;
	assert_eq!(status, StatusCode::FORBIDDEN);
	assert_eq!(result.status, "rejected");
	assert_eq!(
		h.state
			.registry
			.pinned_certificate("10.0.0.7")
			.unwrap()
			.unwrap(),
		PEM
	);
}

#[tokio::test]
async fn unknown_device_cannot_register() {
	let h = harness();
	let response = h
		.router
		.clone()
		.oneshot(post_json("/api/v1/register", [10, 0, 0, 9], register_body()))
		.await
		.unwrap();
	let (status, _) = api_result(response).await;
	assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn wrong_api_key_forces_reregistration() {
	let h = harness();
	h.router
		.clone()
		.oneshot(post_json("/api/v1/register", [10, 0, 0, 7], register_body()))
		.await
		.unwrap();
	h.channel.wait_for(1).await;

	let body = serde_json::json!({
		"token_request": "not-the-key",
		"namespace": "ns",
		"paths": ["kv/servers/h1"],
	});
	let response = h
		.router
		.clone()
		.oneshot(post_json("/api/v1/token", [10, 0, 0, 7], body))
		.await
		.unwrap();
	let (status, result) = api_result(response).await;
	assert_eq!(status, StatusCode::FORBIDDEN);
	assert_eq!(result.status, "rejected");

	let sent = h.channel.wait_for(2).await;
	assert_eq!(sent.last().unwrap().1, "reregister");
	assert!(h.state.registry.device_api_key("10.0.0.7").unwrap().is_none());
}

#[tokio::test]
async fn standby_is_accepted_without_control_write() {
	let h = harness();
	h.router
		.clone()
		.oneshot(post_json("/api/v1/register", [10, 0, 0, 7], register_body()))
		.await
		.unwrap();
	h.channel.wait_for(1).await;
	h.store.set_token_response(Ok(DelegatedToken::Standby)).await;

	let body = serde_json::json!({
		"token_request": "minted-device-key",
		"namespace": "ns",
		"paths": ["kv/servers/h1"],
	});
	let response = h
		.router
		.clone()
		.oneshot(post_json("/api/v1/token", [10, 0, 0, 7], body))
		.await
		.unwrap();
	let (status, result) = api_result(response).await;
	assert_eq!(status, StatusCode::ACCEPTED);
	assert_eq!(result.status, "accepted");

	tokio::time::sleep(Duration::from_millis(50)).await;
	// Only the registration key delivery; no tok| line.
	assert_eq!(h.channel.lines().await.len(), 1);
}

#[tokio::test]
async fn token_is_delivered_then_use_cap_forces_reregistration() {
	let h = harness();
	h.router
		.clone()
		.oneshot(post_json("/api/v1/register", [10, 0, 0, 7], register_body()))
		.await
		.unwrap();
	h.channel.wait_for(1).await;
	h.store
		.set_token_response(Ok(DelegatedToken::Wrapped("tok|s.WRAPPED".to_string())))
		.await;

	let body = serde_json::json!({
		"token_request": "minted-device-key",
		"namespace": "ns",
		"paths": ["kv/servers/h1"],
	});
	let response = h
		.router
		.clone()
		.oneshot(post_json("/api/v1/token", [10, 0, 0, 7], body))
		.await
		.unwrap();
	let (status, _) = api_result(response).await;
	assert_eq!(status, StatusCode::ACCEPTED);

	// MAX_USES is 1: the token is delivered, then the device must
	// re-register.
	let sent = h.channel.wait_for(3).await;
	assert_eq!(sent[1].1, "tok|s.WRAPPED");
	assert_eq!(sent[2].1, "reregister");
	assert!(h.state.registry.device_api_key("10.0.0.7").unwrap().is_none());
}

#[tokio::test]
async fn rotation_round_queues_namespace_wakeup() {
	let mut h = harness();

	let body = serde_json::json!({
		"type": "password",
		"token": "hvs.admin",
		"password": "P",
		"namespace": "ns",
		"paths": ["kv/servers/h1"],
	});

	// Untrusted callers cannot trigger rotation.
	let response = h
		.router
		.clone()
		.oneshot(post_json("/api/v1/rotate", [10, 0, 0, 9], body.clone()))
		.await
		.unwrap();
	let (status, _) = api_result(response).await;
	assert_eq!(status, StatusCode::FORBIDDEN);

	let response = h
		.router
		.clone()
		.oneshot(post_json("/api/v1/rotate", [10, 0, 0, 5], body))
		.await
		.unwrap();
	let (status, result) = api_result(response).await;
	assert_eq!(status, StatusCode::ACCEPTED);
	assert_eq!(result.status, "accepted");

	assert_eq!(h.wakeup_rx.recv().await.unwrap(), "ns");
}

#[tokio::test]
async fn bulk_calls_require_trusted_inbound() {
	let h = harness();

	let body = serde_json::json!({"devices": ["10.0.0.8"]});
	let response = h
		.router
		.clone()
		.oneshot(post_json("/api/v1/adddevices", [10, 0, 0, 9], body.clone()))
		.await
		.unwrap();
	let (status, _) = api_result(response).await;
	assert_eq!(status, StatusCode::FORBIDDEN);

	let response = h
		.router
		.clone()
		.oneshot(post_json("/api/v1/adddevices", [10, 0, 0, 5], body))
		.await
		.unwrap();
	let (status, _) = api_result(response).await;
	assert_eq!(status, StatusCode::ACCEPTED);
	assert!(h.state.registry.device_known("10.0.0.8").unwrap());

	let body = serde_json::json!({"shas": [{"sha": "abcd", "name": "agent-v2"}]});
	let response = h
		.router
		.clone()
		.oneshot(post_json("/api/v1/shasum", [10, 0, 0, 5], body))
		.await
		.unwrap();
	let (status, _) = api_result(response).await;
	assert_eq!(status, StatusCode::ACCEPTED);
	assert_eq!(h.state.registry.shasum_name("abcd").unwrap().unwrap(), "agent-v2");
}
