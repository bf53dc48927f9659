// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::{log, LogLevel, LogSender};

/// Kills every process owned by the account. `__USER__` is substituted
/// before execution.
const LOGOUT_SCRIPT: &str = r#"x=($(ps -Ao pid,tt,user | awk '/__USER__/{print $1}')); { [ ${#x[@]} -gt 0 ] && kill -SIGKILL ${x[@]}; } || echo"#;

/// Pipe `account:password` into the system password-update utility, then
/// log the account out.
pub async fn set_password(account: &str, password: &str, logs: &LogSender) {
	let mut child = match Command::new("chpasswd")
		.stdin(Stdio::piped())
		.stdout(Stdio::piped())
		.stderr(Stdio::piped())
		.spawn()
	{
		Ok(child) => child,
		Err(e) => {
			log(logs, LogLevel::Error, e.to_string()).await;
			return;
		}
	};

	if let Some(mut stdin) = child.stdin.take() {
		let line = format!("{account}:{password}\n");
		if let Err(e) = stdin.write_all(line.as_bytes()).await {
			log(logs, LogLevel::Error, e.to_string()).await;
			return;
		}
	}

	match child.wait_with_output().await {
		Ok(output) if output.status.success() => {
			log(
				logs,
				LogLevel::Info,
				format!(
					"Password changed for {account}. {}",
					String::from_utf8_lossy(&output.stdout).trim()
				),
			)
			.await;
			logout(account, logs).await;
		}
		Ok(output) => {
			log(logs, LogLevel::Error, format!("chpasswd exited {}", output.status)).await;
			let combined = [output.stdout, output.stderr].concat();
			if !combined.is_empty() {
				log(logs, LogLevel::Error, String::from_utf8_lossy(&combined).to_string()).await;
			}
		}
		Err(e) => {
			log(logs, LogLevel::Error, e.to_string()).await;
		}
	}
}

/// Terminate every process owned by `account`.
pub async fn logout(account: &str, logs: &LogSender) {
	let script = LOGOUT_SCRIPT.replace("__USER__", account);
	match Command::new("bash").arg("-c").arg(&script).output().await {
		Ok(output) if output.status.success() => {
			log(
				logs,
				LogLevel::Info,
				format!("{account} logged out if it was logged in."),
			)
			.await;
		}
		Ok(output) => {
			log(logs, LogLevel::Error, format!("logout exited {}", output.status)).await;
			let combined = [output.stdout, output.stderr].concat();
			if !combined.is_empty() {
				log(logs, LogLevel::Error, String::from_utf8_lossy(&combined).to_string()).await;
			}
		}
		Err(e) => {
			log(logs, LogLevel::Error, e.to_string()).await;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn logout_script_substitutes_account() {
		let script = LOGOUT_SCRIPT.replace("__USER__", "svc-deploy");
		assert!(script.contains("/svc-deploy/"));
		assert!(!script.contains("__USER__"));
	}
}
