// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use tokio::process::Command;

use crate::{log, LogLevel, LogSender};

/// Logs off every interactive session of the account. `__USER__` is
/// substituted before execution.
const LOGOUT_SCRIPT: &str = r#"
((quser /server:"localhost" | ? { $_ -match "__USER__" }) -split ' +')[2] | foreach {
  logoff $_ /server:"localhost"
}
"#;

const SCRIPT_PATH: &str = "C:\\Windows\\Temp\\thor-logout.ps1";

/// Change the account password with the local account API, then log off
/// its sessions.
pub async fn set_password(account: &str, password: &str, logs: &LogSender) {
	match Command::new("net")
		.args(["user", account, password])
		.output()
		.await
	{
		Ok(output) if output.status.success() => {
			log(logs, LogLevel::Info, format!("Password changed for {account}")).await;
			logout(account, logs).await;
		}
		Ok(output) => {
			log(
				logs,
				LogLevel::Error,
				format!("Failed to change password for {account}"),
			)
			.await;
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

/// Log off every interactive session belonging to `account`.
pub async fn logout(account: &str, logs: &LogSender) {
	let script = LOGOUT_SCRIPT.replace("__USER__", account);
	let _ = tokio::fs::remove_file(SCRIPT_PATH).await;
	if let Err(e) = tokio::fs::write(SCRIPT_PATH, script).await {
		log(logs, LogLevel::Error, e.to_string()).await;
		return;
	}

	match Command::new("powershell.exe")
		.args(["-NoProfile", "-NonInteractive", SCRIPT_PATH])
		.output()
		.await
	{
		Ok(output) if output.status.success() => {
			log(
				logs,
				LogLevel::Info,
				format!("{account} logged out if it was logged in."),
			)
			.await;
		}
		Ok(output) => {
			log(logs, LogLevel::Error, format!("logoff exited {}", output.status)).await;
			let combined = [output.stdout, output.stderr].concat();
			if !combined.is_empty() {
				log(logs, LogLevel::Error, String::from_utf8_lossy(&combined).to_string()).await;
			}
		}
		Err(e) => {
			log(logs, LogLevel::Error, e.to_string()).await;
		}
	}
	let _ = tokio::fs::remove_file(SCRIPT_PATH).await;
}
