// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! The agent state machine.
//!
//! Driven by the fast tick: each call to [`Agent::notify`] drains pending
//! control messages and advances one step. All mutation happens here, on
//! one task; the listener and the coordinator only ever talk to the machine
//! through its events channel.

use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use thor_common_config::{AgentConfig, AGENT_PORT};
use thor_common_crypto::cert::{self, CertificateMaterial};
use thor_dtls::{listen_loop, ControlMessage, ListenerConfig};

use crate::client::{binary_digest, ThorClient};
use crate::secrets::AgentVault;
use crate::{log, AgentResult, LogLevel, LogSender};

/// How long a `standby` nudge pauses the agent.
const STANDBY_PAUSE: Duration = Duration::from_secs(10);

const EVENT_BUFFER: usize = 32;

/// Where the state machine currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
	/// First tick: the control listener is not up yet.
	Init,
	/// No API key; a registration must be sent.
	Unregistered,
	/// Registration posted, waiting for `key|` over the control channel.
	Registering,
	/// Holding an API key, waiting for a wakeup.
	Registered,
	/// Woken by the coordinator; requesting and waiting for `tok|`.
	Woken,
}

/// The agent.
pub struct Agent {
	config: AgentConfig,
	data_dir: PathBuf,
	shasum: String,

	state: AgentState,
	api_key: Option<String>,
	certificate_pem: Option<String>,

	thor: ThorClient,
	vault: AgentVault,

	events_tx: mpsc::Sender<ControlMessage>,
	events_rx: mpsc::Receiver<ControlMessage>,
	logs: LogSender,
	shutdown: watch::Receiver<bool>,
}

impl Agent {
	pub fn new(
		config: AgentConfig,
		data_dir: PathBuf,
		logs: LogSender,
		shutdown: watch::Receiver<bool>,
	) -> AgentResult<Self> {
		let shasum = binary_digest()?;
		let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
		Ok(Agent {
			thor: ThorClient::new(&config.thor_server),
			vault: AgentVault::new(&config.vault_server, &config.namespace),
			config,
			data_dir,
			shasum,
			state: AgentState::Init,
			api_key: None,
			certificate_pem: None,
			events_tx,
			events_rx,
			logs,
			shutdown,
		})
	}

	pub fn state(&self) -> AgentState {
		self.state
	}

	pub fn api_key(&self) -> Option<&str> {
		self.api_key.as_deref()
	}

	/// Producer half of the control-events channel; the listener writes
	/// parsed lines here.
	pub fn events_sender(&self) -> mpsc::Sender<ControlMessage> {
		self.events_tx.clone()
	}

	/// One fast tick.
	pub async fn notify(&mut self) {
		if self.state == AgentState::Init {
			if let Err(e) = self.start_listener().await {
				log(&self.logs, LogLevel::Error, e.to_string()).await;
			}
			return;
		}

		while let Ok(message) = self.events_rx.try_recv() {
			self.handle_message(message).await;
		}

		match self.state {
			AgentState::Unregistered => self.register().await,
			AgentState::Woken => self.request_token().await,
			_ => {}
		}
	}

	async fn start_listener(&mut self) -> AgentResult<()> {
		log(&self.logs, LogLevel::Info, "Starting DTLS secured UDP listener").await;

		log(&self.logs, LogLevel::Info, "Detecting external interface").await;
		let host = crate::netutil::external_ipv4()?;
		log(&self.logs, LogLevel::Info, format!("Found {host}")).await;

		let allowed = crate::netutil::resolve_coordinator_ips(&self.config.thor_server).await?;

		log(&self.logs, LogLevel::Info, "Loading certificates").await;
		let identity = self.load_identity(&host.to_string()).await?;
		self.certificate_pem = Some(identity.cert_pem.clone());

		let listener = ListenerConfig {
			bind_address: host.to_string(),
			port: AGENT_PORT,
			identity,
			allowed_peers: allowed,
		};
		let events = self.events_tx.clone();
		let shutdown = self.shutdown.clone();
		let logs = self.logs.clone();
		tokio::spawn(async move {
			if let Err(e) = listen_loop(listener, events, shutdown).await {
				log(&logs, LogLevel::Error, e.to_string()).await;
			}
		});

		self.state = AgentState::Unregistered;
		Ok(())
	}

	/// Persisted material, or the operator-provided pair when the TLS
	/// section names one.
	async fn load_identity(&self, host: &str) -> AgentResult<CertificateMaterial> {
		if let Some(tls) = &self.config.tls {
			if !tls.cacert.is_empty() && !tls.cakey.is_empty() {
				return Ok(CertificateMaterial::load(
					std::path::Path::new(&tls.cacert),
					std::path::Path::new(&tls.cakey),
				)
				.await?);
			}
		}
		Ok(cert::load_or_create(&self.data_dir, host).await?)
	}

	async fn register(&mut self) {
		if self.api_key.is_some() {
			self.state = AgentState::Registered;
			return;
		}
		let certificate = self.certificate_pem.clone().unwrap_or_default();

		self.state = AgentState::Registering;
		match self
			.thor
			.register(&certificate, &self.config.namespace, &self.shasum)
			.await
		{
			Ok(()) => {
				log(&self.logs, LogLevel::Info, "Registration accepted, awaiting key").await;
			}
			Err(e) => {
				log(&self.logs, LogLevel::Error, e.to_string()).await;
				self.state = AgentState::Unregistered;
			}
		}
	}

	async fn request_token(&mut self) {
		let Some(api_key) = self.api_key.clone() else {
			self.state = AgentState::Unregistered;
			return;
		};
		match self
			.thor
			.request_token(&api_key, &self.config.namespace, &self.config.paths)
			.await
		{
			Ok(()) => {
				// Back to registered: the tok| line arrives over the control
				// channel, or never does when the coordinator is standing by.
				self.state = AgentState::Registered;
			}
			Err(e) => {
				// Stay woken; the request is retried on the next tick.
				log(&self.logs, LogLevel::Error, e.to_string()).await;
			}
		}
	}

	/// Apply one control message to the machine.
	pub async fn handle_message(&mut self, message: ControlMessage) {
		match message {
			ControlMessage::Wakeup => {
				log(&self.logs, LogLevel::Info, "Received wakeup").await;
				if self.api_key.is_some() {
					self.state = AgentState::Woken;
				}
			}
			ControlMessage::Reregister => {
				log(&self.logs, LogLevel::Info, "Received re-register").await;
				// Also clears a stuck in-flight registration: the next tick
				// sends a fresh request.
				self.api_key = None;
				self.state = AgentState::Unregistered;
			}
			ControlMessage::Standby => {
				log(&self.logs, LogLevel::Info, "Received standby").await;
				tokio::time::sleep(STANDBY_PAUSE).await;
			}
			ControlMessage::Key(wrap) => self.handle_key(&wrap).await,
			ControlMessage::Token(wrap) => self.handle_token(&wrap).await,
			ControlMessage::Other(line) => {
				log(&self.logs, LogLevel::Info, line.clone()).await;
				self.edge_forward(&line);
			}
		}
	}

	async fn handle_key(&mut self, wrap: &str) {
		// The unwrapped value is only trustworthy while our own registration
		// is in flight. An unwrap failure means the one-shot token was
		// already consumed; either way the key is dropped and registration
		// starts over.
		let requesting = self.state == AgentState::Registering;
		match self.vault.unwrap(wrap).await {
			Ok(key) if requesting => {
				log(&self.logs, LogLevel::Info, "Received encryption key").await;
				self.api_key = Some(key);
				self.state = AgentState::Registered;
			}
			Ok(_) => {
				log(
					&self.logs,
					LogLevel::Warn,
					"Unsolicited key delivery, re-registering",
				)
				.await;
				self.api_key = None;
				self.state = AgentState::Unregistered;
			}
			Err(e) => {
				if e.is_unwrap_replay() {
					log(
						&self.logs,
						LogLevel::Error,
						"Wrapping token already consumed, man-in-the-middle suspected",
					)
					.await;
				} else {
					log(&self.logs, LogLevel::Error, e.to_string()).await;
				}
				self.api_key = None;
				self.state = AgentState::Unregistered;
			}
		}
	}

	async fn handle_token(&mut self, wrap: &str) {
		log(&self.logs, LogLevel::Info, "Received encrypted token").await;
		let Some(api_key) = self.api_key.clone() else {
			log(&self.logs, LogLevel::Warn, "Token delivery without an API key").await;
			return;
		};

		match self.vault.set_token(wrap, &api_key).await {
			Ok(()) => {
				self.rotate().await;
				self.state = AgentState::Registered;
			}
			Err(e) => {
				log(&self.logs, LogLevel::Error, e.to_string()).await;
				// A consumed wrap or a key mismatch both mean the channel
				// cannot be trusted; drop the key and register again.
				self.api_key = None;
				self.state = AgentState::Unregistered;
			}
		}
	}

	/// Read the rotated credentials and apply them to local accounts.
	pub async fn rotate(&mut self) {
		match self.vault.rotation_credentials(&self.config.paths).await {
			Ok(credentials) => {
				for (account, password) in credentials {
					crate::platform::set_password(&account, &password, &self.logs).await;
				}
				log(&self.logs, LogLevel::Info, "Completed rotation").await;
			}
			Err(e) => {
				log(&self.logs, LogLevel::Error, e.to_string()).await;
			}
		}
		self.vault.clear_token();
	}

	/// Reserved: free-form lines are forwarded to edge devices when the
	/// `edge` flag is set.
	fn edge_forward(&self, _line: &str) {}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn agent() -> (Agent, mpsc::Receiver<crate::LogItem>) {
		let config = AgentConfig {
			vault_server: "http://127.0.0.1:8200".to_string(),
			thor_server: "http://127.0.0.1:8443".to_string(),
			paths: vec!["kv/servers/h1".to_string()],
			namespace: "ns".to_string(),
			tls: None,
			edge: false,
		};
		let (log_tx, log_rx) = mpsc::channel(64);
		let (_shutdown_tx, shutdown_rx) = watch::channel(false);
		let agent = Agent::new(config, std::env::temp_dir().join("thor-test"), log_tx, shutdown_rx)
			.unwrap();
		(agent, log_rx)
	}

	#[tokio::test]
	async fn starts_in_init() {
		let (agent, _logs) = agent();
		assert_eq!(agent.state(), AgentState::Init);
		assert!(agent.api_key().is_none());
	}

	#[tokio::test]
	async fn wakeup_is_ignored_without_api_key() {
		let (mut agent, _logs) = agent();
		agent.state = AgentState::Registered;
		agent.handle_message(ControlMessage::Wakeup).await;
		assert_eq!(agent.state(), AgentState::Registered);
	}

	#[tokio::test]
	async fn wakeup_moves_registered_agent_to_woken() {
		let (mut agent, _logs) = agent();
		agent.state = AgentState::Registered;
		agent.api_key = Some("key".to_string());
		agent.handle_message(ControlMessage::Wakeup).await;
		assert_eq!(agent.state(), AgentState::Woken);
	}

	#[tokio::test]
	async fn reregister_clears_key_and_state() {
		let (mut agent, _logs) = agent();
		agent.state = AgentState::Woken;
		agent.api_key = Some("key".to_string());

		agent.handle_message(ControlMessage::Reregister).await;
		assert_eq!(agent.state(), AgentState::Unregistered);
		assert!(agent.api_key().is_none());
	}

	#[tokio::test]
	async fn free_form_lines_are_logged() {
		let (mut agent, mut logs) = agent();
		agent
			.handle_message(ControlMessage::Other("hello".to_string()))
			.await;
		let item = logs.recv().await.unwrap();
		assert_eq!(item.message, "hello");
	}

	#[tokio::test]
	async fn token_without_key_is_dropped() {
		let (mut agent, mut logs) = agent();
		agent.state = AgentState::Woken;
		agent
			.handle_message(ControlMessage::Token("s.WRAP".to_string()))
			.await;
		// Still woken; no crash, one info + one warning logged.
		assert_eq!(agent.state(), AgentState::Woken);
		assert_eq!(logs.recv().await.unwrap().level, crate::LogLevel::Info);
		assert_eq!(logs.recv().await.unwrap().level, crate::LogLevel::Warn);
	}
}
