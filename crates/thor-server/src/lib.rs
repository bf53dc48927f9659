// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Coordinator HTTP API and control-channel fan-out.
//!
//! The coordinator terminates TLS, serves the JSON admission endpoints,
//! keeps the device registry, and pushes control messages to agents over
//! DTLS. Every response is the `{"status","message"}` envelope: 202 for
//! accepted, 403 for rejected.

pub mod api;
pub mod channel;
pub mod rotation;
pub mod state;
pub mod wakeup;

pub use channel::{ControlChannel, DtlsChannel};
pub use state::ServerState;

use axum::routing::post;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::info;

use thor_common_config::ServerConfig;
use thor_registry::Registry;
use thor_vault::VaultService;

/// Errors that prevent the coordinator from starting.
#[derive(Error, Debug)]
pub enum ServerError {
	#[error("registry error: {0}")]
	Registry(#[from] thor_registry::RegistryError),

	#[error("secret store error: {0}")]
	Vault(#[from] thor_vault::VaultError),

	#[error("io error: {0}")]
	Io(#[from] std::io::Error),
}

/// Build the API router. The debug-only decrypt endpoint is mounted only in
/// `THOR_MODE=debug|trace`.
pub fn create_router(state: Arc<ServerState>) -> Router {
	let mut router = Router::new()
		.route("/api/v1/register", post(api::register))
		.route("/api/v1/token", post(api::token))
		.route("/api/v1/whatsmyip", post(api::whatsmyip))
		.route("/api/v1/adddevices", post(api::add_devices))
		.route("/api/v1/shasum", post(api::add_shasums))
		.route("/api/v1/rotate", post(rotation::rotate));

	if thor_common_config::debug_mode() {
		router = router.route("/api/v1/decrypt", post(api::decrypt));
	}

	router.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Run the coordinator until ctrl-c.
pub async fn run(config: ServerConfig) -> Result<(), ServerError> {
	let data_dir = thor_common_config::data_dir();
	std::fs::create_dir_all(&data_dir)?;
	let registry = Registry::open(&data_dir.join("thor.db"))?;

	let mut vault = VaultService::new(config.vault.clone());
	vault.init().await?;

	let (wakeup_tx, wakeup_rx) = tokio::sync::mpsc::channel(16);
	let state = Arc::new(ServerState::new(
		config.clone(),
		registry,
		Arc::new(vault),
		Arc::new(DtlsChannel),
		wakeup_tx,
	));

	tokio::spawn(wakeup::wakeup_loop(Arc::clone(&state), wakeup_rx));

	let app = create_router(Arc::clone(&state));
	let addr: SocketAddr = config
		.socket_addr()
		.parse()
		.or_else(|_| format!("0.0.0.0:{}", config.tls.port).parse())
		.expect("listen address");

	info!(%addr, "coordinator listening");
	if !config.tls.cacert.is_empty() && !config.tls.cakey.is_empty() {
		let tls = axum_server::tls_rustls::RustlsConfig::from_pem_file(
			&config.tls.cacert,
			&config.tls.cakey,
		)
		.await?;
		tokio::select! {
			result = axum_server::bind_rustls(addr, tls)
				.serve(app.into_make_service_with_connect_info::<SocketAddr>()) => {
				result?;
			}
			_ = tokio::signal::ctrl_c() => {
				info!("received shutdown signal");
			}
		}
	} else {
		// Development only; production terminates TLS here.
		let listener = tokio::net::TcpListener::bind(addr).await?;
		tokio::select! {
			result = axum::serve(
				listener,
				app.into_make_service_with_connect_info::<SocketAddr>(),
			) => {
				result?;
			}
			_ = tokio::signal::ctrl_c() => {
				info!("received shutdown signal");
			}
		}
	}

	info!("coordinator shutdown complete");
	Ok(())
}
