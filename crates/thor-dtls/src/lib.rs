// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! DTLS control channel between the coordinator and its agents.
//!
//! The coordinator is always the DTLS client: it dials an agent's fixed UDP
//! port for one datagram and hangs up. The agent runs the listener, rejects
//! any peer that is not a resolved coordinator address, and feeds accepted
//! lines into its state machine. Handshakes require ExtendedMasterSecret;
//! outbound dials verify the peer against its pinned registration
//! certificate.

pub mod dial;
pub mod hub;
pub mod listen;
pub mod message;

pub use dial::send_to_agent;
pub use hub::Hub;
pub use listen::{listen_loop, ListenerConfig};
pub use message::ControlMessage;

use thiserror::Error;
use thor_common_crypto::CryptoError;

/// Result type alias for control-channel operations.
pub type DtlsResult<T> = Result<T, DtlsError>;

/// Errors raised on the control channel.
#[derive(Error, Debug)]
pub enum DtlsError {
	#[error("dtls transport error: {0}")]
	Transport(String),

	#[error("dtls dial to {0} timed out")]
	Timeout(String),

	#[error("certificate material error: {0}")]
	Certificate(String),

	#[error("peer {0} is not an allowed coordinator address")]
	PeerRejected(String),

	#[error("io error: {0}")]
	Io(#[from] std::io::Error),
}

impl From<CryptoError> for DtlsError {
	fn from(err: CryptoError) -> Self {
		DtlsError::Certificate(err.to_string())
	}
}

impl From<webrtc_dtls::Error> for DtlsError {
	fn from(err: webrtc_dtls::Error) -> Self {
		DtlsError::Transport(err.to_string())
	}
}

impl From<webrtc_util::Error> for DtlsError {
	fn from(err: webrtc_util::Error) -> Self {
		DtlsError::Transport(err.to_string())
	}
}

pub(crate) fn dtls_identity(
	material: &thor_common_crypto::cert::CertificateMaterial,
) -> DtlsResult<webrtc_dtls::crypto::Certificate> {
	use rustls_pki_types::CertificateDer;

	let key_pair = material.key_pair()?;
	let private_key = webrtc_dtls::crypto::CryptoPrivateKey::from_key_pair(&key_pair)
		.map_err(|e| DtlsError::Certificate(e.to_string()))?;
	let certificate = thor_common_crypto::cert::pem_to_der(&material.cert_pem)?
		.into_iter()
		.map(CertificateDer::from)
		.collect();
	Ok(webrtc_dtls::crypto::Certificate {
		certificate,
		private_key,
	})
}
