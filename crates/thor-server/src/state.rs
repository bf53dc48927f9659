// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Shared coordinator state.

use std::sync::Arc;
use tokio::sync::mpsc;

use thor_common_config::ServerConfig;
use thor_registry::Registry;
use thor_vault::service::SecretStore;

use crate::channel::ControlChannel;

/// Application state shared across handlers.
pub struct ServerState {
	pub config: ServerConfig,
	pub registry: Registry,
	pub vault: Arc<dyn SecretStore>,
	pub control: Arc<dyn ControlChannel>,
	/// Namespace names queued for wakeup fan-out.
	pub wakeup_tx: mpsc::Sender<String>,
}

impl ServerState {
	pub fn new(
		config: ServerConfig,
		registry: Registry,
		vault: Arc<dyn SecretStore>,
		control: Arc<dyn ControlChannel>,
		wakeup_tx: mpsc::Sender<String>,
	) -> Self {
		ServerState {
			config,
			registry,
			vault,
			control,
			wakeup_tx,
		}
	}
}
