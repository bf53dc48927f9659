// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Device admission endpoints.
//!
//! `register` and `token` implement the agent protocol; `whatsmyip`,
//! `adddevices` and `shasum` are administrative bulk calls restricted to
//! trusted inbound addresses. Responses never leak more than an
//! accept/reject plus a short message.

use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};

use thor_dtls::ControlMessage;
use thor_registry::CounterOutcome;
use thor_vault::DelegatedToken;

use crate::state::ServerState;

/// The only response body the API produces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResult {
	pub status: String,
	pub message: String,
}

pub(crate) fn accept(message: impl Into<String>) -> (StatusCode, Json<ApiResult>) {
	(
		StatusCode::ACCEPTED,
		Json(ApiResult {
			status: "accepted".to_string(),
			message: message.into(),
		}),
	)
}

pub(crate) fn reject(message: impl Into<String>) -> (StatusCode, Json<ApiResult>) {
	(
		StatusCode::FORBIDDEN,
		Json(ApiResult {
			status: "rejected".to_string(),
			message: message.into(),
		}),
	)
}

const INTERNAL: &str = "Internal server error. Please contact the system administrator";

/// Registration body: the agent's certificate PEM, its namespace and its
/// binary digest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationRequest {
	pub registration_request: String,
	pub namespace: String,
	pub shasum: String,
}

/// Token body: the device API key and the paths the agent will read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRequest {
	pub token_request: String,
	pub namespace: String,
	#[serde(default)]
	pub paths: Vec<String>,
}

/// POST /api/v1/register
pub async fn register(
	State(state): State<Arc<ServerState>>,
	ConnectInfo(addr): ConnectInfo<SocketAddr>,
	Json(request): Json<RegistrationRequest>,
) -> (StatusCode, Json<ApiResult>) {
	let client_ip = addr.ip().to_string();

	if request.registration_request.is_empty() {
		return reject("Invalid registration request");
	}
	if request.namespace.is_empty() {
		return reject("Invalid namespace requested");
	}
	if request.shasum.is_empty() {
		return reject("Invalid shasum detected");
	}
	info!(client_ip, shasum = %request.shasum, "received digest for client");

	match state.registry.device_known(&client_ip) {
		Ok(true) => {}
		Ok(false) => {
			return reject(format!("No such device is known to the system: {client_ip}"));
		}
		Err(e) => {
			error!(error = %e, "failed to read devices table");
			return reject(INTERNAL);
		}
	}

	match state.registry.pinned_certificate(&client_ip) {
		Ok(Some(pinned)) if pinned != request.registration_request => {
			warn!(client_ip, "certificate mismatch on re-registration");
			return reject("Invalid certificate provided for client IP");
		}
		Ok(_) => {}
		Err(e) => {
			error!(error = %e, "failed to read certificates table");
			return reject(INTERNAL);
		}
	}

	match state.registry.shasum_name(&request.shasum) {
		Ok(Some(_)) => {}
		Ok(None) => {
			return reject(format!("Invalid shasum for agent {client_ip}"));
		}
		Err(e) => {
			error!(error = %e, "failed to read shasum table");
			return reject(INTERNAL);
		}
	}

	// A fresh key on every successful register; re-registration with the
	// same certificate rotates the old one away.
	let key = match state
		.vault
		.create_encryption_key(&state.vault.token_policy())
		.await
	{
		Ok(key) => key,
		Err(e) => {
			error!(error = %e, "failed to create encryption key");
			return reject("Unable to create encryption key");
		}
	};

	if let Err(e) = state.registry.complete_registration(
		&client_ip,
		&key,
		&request.registration_request,
		&request.namespace,
	) {
		error!(error = %e, client_ip, "failed to record registration");
		return reject("Failed to save API Key. Please try again.");
	}

	// Delivery happens off the request path: wrap the key and push it over
	// the control channel.
	let pem = request.registration_request.clone();
	tokio::spawn(async move {
		match state.vault.wrap(&key).await {
			Ok(wrap) => {
				let _ = state
					.control
					.send(&client_ip, ControlMessage::Key(wrap), &pem)
					.await;
			}
			Err(e) => error!(error = %e, "failed to wrap device key"),
		}
	});

	accept("Pending delivery")
}

/// POST /api/v1/token
pub async fn token(
	State(state): State<Arc<ServerState>>,
	ConnectInfo(addr): ConnectInfo<SocketAddr>,
	Json(request): Json<TokenRequest>,
) -> (StatusCode, Json<ApiResult>) {
	let client_ip = addr.ip().to_string();

	if request.token_request.is_empty() {
		return reject("Invalid token request");
	}

	let stored = match state.registry.device_api_key(&client_ip) {
		Ok(Some(stored)) => stored,
		Ok(None) => {
			return reject("No such device is known to the system");
		}
		Err(e) => {
			error!(error = %e, "failed to read devices table");
			return reject(INTERNAL);
		}
	};

	// The pinned certificate must be captured before any counter update: a
	// cap-hit deletes the whole record, and the re-register nudge still has
	// to verify the peer.
	let pinned = state
		.registry
		.pinned_certificate(&client_ip)
		.ok()
		.flatten()
		.unwrap_or_default();

	if stored != request.token_request {
		warn!(client_ip, "invalid client auth");
		if let Ok(CounterOutcome::Reregister) = state.registry.record_auth_failure(&client_ip) {
			let state = Arc::clone(&state);
			let ip = client_ip.clone();
			tokio::spawn(async move {
				let _ = state
					.control
					.send(&ip, ControlMessage::Reregister, &pinned)
					.await;
			});
		}
		return reject("Invalid client auth");
	}

	match state.vault.get_token(&request.namespace, &stored).await {
		Err(e) => {
			error!(error = %e, namespace = %request.namespace, "token derivation failed");
			reject("Error creating token, please retry")
		}
		Ok(DelegatedToken::Standby) => {
			// No rotation round open; accept without a control write and the
			// agent falls back to registered.
			accept("Pending delivery")
		}
		Ok(DelegatedToken::Wrapped(line)) => {
			let outcome = state
				.registry
				.record_token_success(&client_ip)
				.unwrap_or(CounterOutcome::Counted);

			let state2 = Arc::clone(&state);
			tokio::spawn(async move {
				let message = ControlMessage::parse(&line);
				let _ = state2
					.control
					.send(&client_ip, message, &pinned)
					.await;
				if outcome == CounterOutcome::Reregister {
					let _ = state2
						.control
						.send(&client_ip, ControlMessage::Reregister, &pinned)
						.await;
				}
			});
			accept("Pending delivery")
		}
	}
}

/// POST /api/v1/whatsmyip
pub async fn whatsmyip(
	State(state): State<Arc<ServerState>>,
	ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> (StatusCode, Json<ApiResult>) {
	let client_ip = addr.ip().to_string();
	if !state.config.is_trusted_inbound(&client_ip) {
		return reject("go away");
	}
	match state.registry.device_known(&client_ip) {
		Ok(true) => accept(client_ip),
		Ok(false) => reject("go away"),
		Err(e) => {
			error!(error = %e, "failed to read devices table");
			reject(INTERNAL)
		}
	}
}

/// Body of the bulk device-admission call.
#[derive(Debug, Serialize, Deserialize)]
pub struct AddDevicesRequest {
	pub devices: Vec<String>,
}

/// POST /api/v1/adddevices
pub async fn add_devices(
	State(state): State<Arc<ServerState>>,
	ConnectInfo(addr): ConnectInfo<SocketAddr>,
	Json(request): Json<AddDevicesRequest>,
) -> (StatusCode, Json<ApiResult>) {
	let client_ip = addr.ip().to_string();
	if !state.config.is_trusted_inbound(&client_ip) {
		return reject("go away");
	}
	if let Err(e) = state.registry.add_devices(&request.devices) {
		error!(error = %e, "failed to write to devices table");
		return reject("Failed to add device. Please try again.");
	}
	accept("done")
}

/// One accepted digest entry.
#[derive(Debug, Serialize, Deserialize)]
pub struct ShaSum {
	pub sha: String,
	pub name: String,
}

/// Body of the bulk digest-acceptance call.
#[derive(Debug, Serialize, Deserialize)]
pub struct ShaSumsRequest {
	pub shas: Vec<ShaSum>,
}

/// POST /api/v1/shasum
pub async fn add_shasums(
	State(state): State<Arc<ServerState>>,
	ConnectInfo(addr): ConnectInfo<SocketAddr>,
	Json(request): Json<ShaSumsRequest>,
) -> (StatusCode, Json<ApiResult>) {
	let client_ip = addr.ip().to_string();
	if !state.config.is_trusted_inbound(&client_ip) {
		return reject("go away");
	}
	let sums: Vec<(String, String)> = request
		.shas
		.into_iter()
		.map(|s| (s.sha, s.name))
		.collect();
	if let Err(e) = state.registry.add_shasums(&sums) {
		error!(error = %e, "failed to write to shasum table");
		return reject("Failed to add shasum. Please try again.");
	}
	accept("done")
}

/// Body of the debug-only decrypt helper.
#[derive(Debug, Serialize, Deserialize)]
pub struct DecryptRequest {
	pub token: String,
	pub key: String,
}

/// POST /api/v1/decrypt (mounted in debug mode only)
pub async fn decrypt(
	State(state): State<Arc<ServerState>>,
	Json(request): Json<DecryptRequest>,
) -> (StatusCode, Json<ApiResult>) {
	match state.vault.decrypt(&request.token, &request.key) {
		Ok(plaintext) => accept(plaintext),
		Err(e) => reject(e.to_string()),
	}
}
