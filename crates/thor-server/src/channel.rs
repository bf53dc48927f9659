// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Outbound control-channel seam.

use async_trait::async_trait;
use tracing::error;

use thor_common_config::AGENT_PORT;
use thor_common_crypto::cert::pem_to_der;
use thor_dtls::{ControlMessage, DtlsError, DtlsResult};

/// How the coordinator pushes control messages to one agent. A trait seam so
/// handler tests can observe sends without a network.
#[async_trait]
pub trait ControlChannel: Send + Sync {
	/// Write one control line to `address`, verifying the peer against its
	/// pinned registration certificate.
	async fn send(
		&self,
		address: &str,
		message: ControlMessage,
		pinned_pem: &str,
	) -> DtlsResult<()>;
}

/// The production channel: one-shot DTLS dials to the fixed agent port.
pub struct DtlsChannel;

#[async_trait]
impl ControlChannel for DtlsChannel {
	async fn send(
		&self,
		address: &str,
		message: ControlMessage,
		pinned_pem: &str,
	) -> DtlsResult<()> {
		let pinned = pem_to_der(pinned_pem).map_err(DtlsError::from)?;
		if pinned.is_empty() {
			return Err(DtlsError::Certificate(
				"no pinned certificate for peer".to_string(),
			));
		}
		if let Err(e) = thor_dtls::send_to_agent(address, AGENT_PORT, &message, pinned).await {
			error!(address, error = %e, "control write failed");
			return Err(e);
		}
		Ok(())
	}
}
