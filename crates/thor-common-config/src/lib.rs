// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Configuration for the coordinator and the agent.
//!
//! Both halves read a YAML file (`config.yaml` for the server, `agent.yaml`
//! for the agent) and a pair of environment variables: `THOR_LOG` selects
//! log verbosity and `THOR_MODE` keeps debug-only surfaces enabled.

pub mod agent;
pub mod error;
pub mod server;
pub mod vault;

pub use agent::{AgentConfig, AgentFile};
pub use error::ConfigError;
pub use server::{AdminConfig, ServerConfig, TlsConfig};
pub use vault::{AppRoleConfig, CloudRoleConfig, VaultConfig};

use std::path::{Path, PathBuf};

/// Result type alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// UDP port every agent listens on for coordinator control messages.
pub const AGENT_PORT: u16 = 7468;

/// Resolve the data directory used for persisted state (`thor.db`,
/// certificates). `THOR_DATA_DIR` overrides the platform default.
pub fn data_dir() -> PathBuf {
	if let Ok(dir) = std::env::var("THOR_DATA_DIR") {
		return PathBuf::from(dir);
	}
	#[cfg(unix)]
	{
		PathBuf::from("/var/lib/thor")
	}
	#[cfg(not(unix))]
	{
		dirs::data_local_dir()
			.unwrap_or_else(|| PathBuf::from("."))
			.join("thor")
	}
}

/// Map `THOR_LOG` onto a tracing filter directive. `fatal` has no tracing
/// equivalent and collapses into `error`.
pub fn log_filter() -> String {
	match std::env::var("THOR_LOG").ok().as_deref() {
		Some("trace") => "trace",
		Some("debug") => "debug",
		Some("warn") => "warn",
		Some("error") | Some("fatal") => "error",
		_ => "info",
	}
	.to_string()
}

/// Whether `THOR_MODE` requests a development mode (`debug` or `trace`).
pub fn debug_mode() -> bool {
	matches!(
		std::env::var("THOR_MODE").ok().as_deref(),
		Some("debug") | Some("trace")
	)
}

pub(crate) async fn read_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> ConfigResult<T> {
	let raw = tokio::fs::read_to_string(path)
		.await
		.map_err(|e| ConfigError::Read {
			path: path.to_path_buf(),
			source: e,
		})?;
	serde_yaml::from_str(&raw).map_err(|e| ConfigError::Parse {
		path: path.to_path_buf(),
		source: e,
	})
}

/// Write YAML atomically: temp file in the same directory, then rename.
pub(crate) async fn write_yaml<T: serde::Serialize>(path: &Path, value: &T) -> ConfigResult<()> {
	let yaml = serde_yaml::to_string(value).map_err(|e| ConfigError::Parse {
		path: path.to_path_buf(),
		source: e,
	})?;
	let tmp = path.with_extension("yaml.tmp");
	tokio::fs::write(&tmp, yaml.as_bytes())
		.await
		.map_err(|e| ConfigError::Read {
			path: tmp.clone(),
			source: e,
		})?;
	tokio::fs::rename(&tmp, path)
		.await
		.map_err(|e| ConfigError::Read {
			path: path.to_path_buf(),
			source: e,
		})
}
