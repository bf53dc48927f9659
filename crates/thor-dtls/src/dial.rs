// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Coordinator-side one-shot control writes.

use rustls_pki_types::CertificateDer;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{debug, info};
use webrtc_dtls::config::{Config, ExtendedMasterSecretType};
use webrtc_dtls::conn::DTLSConn;

use crate::message::ControlMessage;
use crate::{DtlsError, DtlsResult};

/// Overall budget for one dial: handshake plus the single write.
const DIAL_TIMEOUT: Duration = Duration::from_secs(30);

/// Dial `address:port`, verify the peer against its pinned registration
/// certificate, write one control line and hang up.
pub async fn send_to_agent(
	address: &str,
	port: u16,
	message: &ControlMessage,
	pinned_der: Vec<Vec<u8>>,
) -> DtlsResult<()> {
	let target = format!("{address}:{port}");
	info!(target, "returning information over DTLS");

	let result = tokio::time::timeout(DIAL_TIMEOUT, dial_and_write(&target, message, pinned_der))
		.await
		.map_err(|_| DtlsError::Timeout(target.clone()))?;
	result
}

async fn dial_and_write(
	target: &str,
	message: &ControlMessage,
	pinned_der: Vec<Vec<u8>>,
) -> DtlsResult<()> {
	let socket = UdpSocket::bind("0.0.0.0:0").await?;
	socket.connect(target).await?;
	let conn = Arc::new(socket);

	// The agent's certificate is self-signed, so chain verification cannot
	// succeed; the pinned registration certificate is the trust anchor.
	let verify = {
		let pinned = pinned_der;
		Arc::new(
			move |raw_certs: &[Vec<u8>], _chains: &[CertificateDer<'static>]| {
				if raw_certs.iter().any(|cert| pinned.contains(cert)) {
					Ok(())
				} else {
					Err(webrtc_dtls::Error::Other(
						"peer certificate does not match pinned registration".to_string(),
					))
				}
			},
		)
	};

	let config = Config {
		insecure_skip_verify: true,
		verify_peer_certificate: Some(verify),
		extended_master_secret: ExtendedMasterSecretType::Require,
		server_name: target.split(':').next().unwrap_or_default().to_string(),
		..Default::default()
	};

	let dtls = DTLSConn::new(conn, config, true, None).await?;
	debug!(target, "dtls handshake complete");

	let line = format!("{message}\n");
	webrtc_util::conn::Conn::send(&dtls, line.as_bytes()).await?;
	let _ = dtls.close().await;
	Ok(())
}
