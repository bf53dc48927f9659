// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Agent-side DTLS listener.

use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use webrtc_dtls::config::{Config, ExtendedMasterSecretType};
use webrtc_util::conn::{Conn, Listener};

use thor_common_crypto::cert::CertificateMaterial;

use crate::hub::Hub;
use crate::message::ControlMessage;
use crate::DtlsResult;

const BUFFER_SIZE: usize = 1024;

/// Listener parameters: where to bind, what to present, who to accept.
pub struct ListenerConfig {
	/// External IPv4 the listener binds on.
	pub bind_address: String,
	pub port: u16,
	pub identity: CertificateMaterial,
	/// Resolved coordinator addresses; anything else is closed unread.
	pub allowed_peers: Vec<IpAddr>,
}

/// Accept control connections until `shutdown` flips, feeding parsed lines
/// into `events`. Peers outside the allow-list are closed without a read.
pub async fn listen_loop(
	config: ListenerConfig,
	events: mpsc::Sender<ControlMessage>,
	mut shutdown: watch::Receiver<bool>,
) -> DtlsResult<()> {
	let dtls_config = Config {
		certificates: vec![crate::dtls_identity(&config.identity)?],
		extended_master_secret: ExtendedMasterSecretType::Require,
		..Default::default()
	};

	let addr = format!("{}:{}", config.bind_address, config.port);
	let listener = webrtc_dtls::listener::listen(addr.clone(), dtls_config).await?;
	info!(addr, "control listener started");

	let hub = Arc::new(Hub::new());
	loop {
		tokio::select! {
			_ = shutdown.changed() => {
				info!("control listener shutting down");
				hub.stop().await;
				return Ok(());
			}
			accepted = listener.accept() => {
				let (conn, remote) = match accepted {
					Ok(accepted) => accepted,
					Err(e) => {
						// A failed handshake only loses that one peer.
						error!(error = %e, "control accept failed");
						continue;
					}
				};

				if !config.allowed_peers.contains(&remote.ip()) {
					warn!(peer = %remote, "rejecting connection attempt");
					let _ = conn.close().await;
					continue;
				}

				let remote = remote.to_string();
				hub.register(remote.clone(), Arc::clone(&conn)).await;
				tokio::spawn(read_loop(
					conn,
					remote,
					Arc::clone(&hub),
					events.clone(),
				));
			}
		}
	}
}

async fn read_loop(
	conn: Arc<dyn Conn + Send + Sync>,
	remote: String,
	hub: Arc<Hub>,
	events: mpsc::Sender<ControlMessage>,
) {
	let mut buffer = [0u8; BUFFER_SIZE];
	loop {
		let n = match conn.recv(&mut buffer).await {
			Ok(n) => n,
			Err(e) => {
				warn!(remote, error = %e, "control read ended");
				hub.unregister(&remote).await;
				return;
			}
		};
		if n == 0 {
			continue;
		}

		let line = String::from_utf8_lossy(&buffer[..n]);
		let line = line.trim();
		if line.is_empty() {
			continue;
		}
		if events.send(ControlMessage::parse(line)).await.is_err() {
			// Receiver gone; the agent is shutting down.
			hub.unregister(&remote).await;
			return;
		}
	}
}
