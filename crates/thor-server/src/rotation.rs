// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Admin-facing rotation entry point.
//!
//! Consumed by the administrative UI collaborator. One call runs a full
//! round for a namespace: store a delegation token derived from the
//! supplied admin token, clear prior rotation metadata, rewrite every
//! matching secret, then wake the namespace's agents.

use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

use crate::api::{accept, reject, ApiResult};
use crate::state::ServerState;

/// A rotation order from the admin surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationRequest {
	/// `ex-employee` rotates the configured replaceable keys; anything else
	/// is a compromised-password round matched by value.
	#[serde(rename = "type", default)]
	pub kind: String,
	/// The admin-supplied parent token for this round.
	pub token: String,
	#[serde(default)]
	pub password: String,
	pub namespace: String,
	pub paths: Vec<String>,
}

/// POST /api/v1/rotate
pub async fn rotate(
	State(state): State<Arc<ServerState>>,
	ConnectInfo(addr): ConnectInfo<SocketAddr>,
	Json(request): Json<RotationRequest>,
) -> (StatusCode, Json<ApiResult>) {
	let client_ip = addr.ip().to_string();
	if !state.config.is_trusted_inbound(&client_ip) {
		return reject("go away");
	}
	if request.token.is_empty() || request.namespace.is_empty() || request.paths.is_empty() {
		return reject("Invalid rotation request");
	}

	info!(namespace = %request.namespace, paths = request.paths.len(), "creating child token");
	if let Err(e) = state
		.vault
		.create_and_store_child_creation_token(&request.token, &request.namespace, &request.paths)
		.await
	{
		error!(error = %e, "failed to store delegation token");
		return reject("Unable to create delegation token");
	}

	let mut failures = 0usize;
	for path in &request.paths {
		info!(namespace = %request.namespace, path, "clearing prior rotation details");
		state
			.vault
			.clear_rotation(&request.token, &request.namespace, path)
			.await;

		if request.kind == "ex-employee" {
			for credential in state.vault.replaceable_keys() {
				let errors = state
					.vault
					.rotate(path, &request.token, &credential, &request.namespace, false)
					.await;
				for e in &errors {
					error!(path, credential, error = %e, "rotation failure");
				}
				failures += errors.len();
			}
		} else {
			let errors = state
				.vault
				.rotate(path, &request.token, &request.password, &request.namespace, true)
				.await;
			for e in &errors {
				error!(path, error = %e, "rotation failure");
			}
			failures += errors.len();
		}
	}

	if state.wakeup_tx.send(request.namespace.clone()).await.is_err() {
		error!("wakeup loop is gone");
		return reject(INTERNAL_WAKEUP);
	}

	if failures > 0 {
		accept(format!("rotation dispatched with {failures} path errors"))
	} else {
		accept("rotation dispatched")
	}
}

const INTERNAL_WAKEUP: &str = "Internal server error. Please contact the system administrator";
