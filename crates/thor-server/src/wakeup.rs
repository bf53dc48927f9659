// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Wakeup fan-out.
//!
//! One queued namespace becomes one `wakeup` dial per member device,
//! unordered and best-effort: an unreachable agent simply misses the round
//! and stays in standby.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

use thor_dtls::ControlMessage;

use crate::state::ServerState;

/// Drain queued namespaces and wake their members until the channel closes.
pub async fn wakeup_loop(state: Arc<ServerState>, mut rx: mpsc::Receiver<String>) {
	while let Some(namespace) = rx.recv().await {
		let members = match state.registry.namespace_members(&namespace) {
			Ok(members) => members,
			Err(e) => {
				error!(namespace, error = %e, "failed to read namespace members");
				continue;
			}
		};
		info!(namespace, agents = members.len(), "waking namespace");

		for ip in members {
			let pinned = state
				.registry
				.pinned_certificate(&ip)
				.ok()
				.flatten()
				.unwrap_or_default();
			let state = Arc::clone(&state);
			tokio::spawn(async move {
				let _ = state
					.control
					.send(&ip, ControlMessage::Wakeup, &pinned)
					.await;
			});
		}
	}
}
