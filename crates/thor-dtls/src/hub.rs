// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Accepted-connection bookkeeping for the agent listener.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use webrtc_util::conn::Conn;

/// Live control-channel connections, keyed by remote address.
#[derive(Default)]
pub struct Hub {
	conns: RwLock<HashMap<String, Arc<dyn Conn + Send + Sync>>>,
}

impl Hub {
	pub fn new() -> Self {
		Hub {
			conns: RwLock::new(HashMap::new()),
		}
	}

	/// Track a freshly accepted connection.
	pub async fn register(&self, remote: String, conn: Arc<dyn Conn + Send + Sync>) {
		debug!(remote, "control connection registered");
		self.conns.write().await.insert(remote, conn);
	}

	/// Drop and close one connection.
	pub async fn unregister(&self, remote: &str) {
		if let Some(conn) = self.conns.write().await.remove(remote) {
			let _ = conn.close().await;
			debug!(remote, "control connection closed");
		}
	}

	/// Close every connection; used on shutdown.
	pub async fn stop(&self) {
		let mut conns = self.conns.write().await;
		for (_, conn) in conns.drain() {
			let _ = conn.close().await;
		}
	}
}
