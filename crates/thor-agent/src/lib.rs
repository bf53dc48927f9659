// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! The endpoint agent.
//!
//! A single cooperative loop drives registration, token retrieval and
//! password application. The DTLS listener and the signal handler run as
//! side tasks; everything they learn funnels through channels into the
//! state machine, which is the only writer of agent state.

pub mod app;
pub mod client;
pub mod netutil;
pub mod platform;
pub mod secrets;
pub mod service;

pub use app::{Agent, AgentState};
pub use service::run_foreground;

use thiserror::Error;
use tokio::sync::mpsc;

/// Result type alias for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;

/// Errors raised inside the agent.
#[derive(Error, Debug)]
pub enum AgentError {
	#[error(transparent)]
	Config(#[from] thor_common_config::ConfigError),

	#[error(transparent)]
	Crypto(#[from] thor_common_crypto::CryptoError),

	#[error(transparent)]
	Vault(#[from] thor_vault::VaultError),

	#[error(transparent)]
	Dtls(#[from] thor_dtls::DtlsError),

	#[error("coordinator request failed: {0}")]
	Http(#[from] reqwest::Error),

	#[error("coordinator rejected the request: {0}")]
	Rejected(String),

	#[error("io error: {0}")]
	Io(#[from] std::io::Error),
}

/// Severity of one agent log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
	Info,
	Warn,
	Error,
}

/// One line on the asynchronous agent log channel.
#[derive(Debug, Clone)]
pub struct LogItem {
	pub level: LogLevel,
	pub message: String,
}

impl LogItem {
	pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
		LogItem {
			level,
			message: message.into(),
		}
	}
}

/// Producer handle for the agent log channel.
pub type LogSender = mpsc::Sender<LogItem>;

pub(crate) async fn log(sender: &LogSender, level: LogLevel, message: impl Into<String>) {
	let _ = sender.send(LogItem::new(level, message)).await;
}
