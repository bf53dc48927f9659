// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Agent process lifecycle: the foreground loop and service management.
//!
//! The loop runs two tick rates: fast while active, slow while the service
//! manager has paused us. A signal task maps HUP/INT/TERM/QUIT onto
//! shutdown and TSTP/CONT onto pause/resume. The error-log forwarder turns
//! the agent's log channel into tracing output.

use std::path::Path;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use thor_common_config::AgentFile;

use crate::app::Agent;
use crate::{AgentResult, LogItem, LogLevel};

const FAST_TICK: Duration = Duration::from_millis(500);
const SLOW_TICK: Duration = Duration::from_millis(2000);

const LOG_BUFFER: usize = 256;

/// Run the agent loop until a shutdown signal arrives.
pub async fn run_foreground(config_path: &Path) -> AgentResult<()> {
	let file = AgentFile::load(config_path).await?;
	let data_dir = thor_common_config::data_dir();

	let (log_tx, mut log_rx) = mpsc::channel::<LogItem>(LOG_BUFFER);
	let (shutdown_tx, shutdown_rx) = watch::channel(false);
	let (pause_tx, mut pause_rx) = watch::channel(false);

	// Error-log forwarder.
	let forwarder = tokio::spawn(async move {
		while let Some(item) = log_rx.recv().await {
			match item.level {
				LogLevel::Info => info!("{}", item.message),
				LogLevel::Warn => warn!("{}", item.message),
				LogLevel::Error => error!("{}", item.message),
			}
		}
		info!("shutting down error log channel");
	});

	spawn_signal_task(shutdown_tx.clone(), pause_tx);

	let mut agent = Agent::new(file.agent, data_dir, log_tx, shutdown_rx.clone())?;
	info!("agent configured, moving into run");

	let mut fast = tokio::time::interval(FAST_TICK);
	let mut slow = tokio::time::interval(SLOW_TICK);
	let mut shutdown = shutdown_rx;
	let mut paused = false;

	loop {
		tokio::select! {
			_ = shutdown.changed() => {
				info!("shutting down listener");
				break;
			}
			changed = pause_rx.changed() => {
				if changed.is_ok() {
					paused = *pause_rx.borrow();
					info!(paused, "tick rate changed");
				}
			}
			_ = fast.tick(), if !paused => {
				agent.notify().await;
			}
			_ = slow.tick(), if paused => {
				// Paused: keep the loop responsive without driving the
				// state machine.
			}
		}
	}

	drop(agent);
	forwarder.abort();
	Ok(())
}

#[cfg(unix)]
fn spawn_signal_task(shutdown: watch::Sender<bool>, pause: watch::Sender<bool>) {
	use tokio::signal::unix::{signal, SignalKind};

	tokio::spawn(async move {
		let mut hup = signal(SignalKind::hangup()).expect("signal handler");
		let mut int = signal(SignalKind::interrupt()).expect("signal handler");
		let mut term = signal(SignalKind::terminate()).expect("signal handler");
		let mut quit = signal(SignalKind::quit()).expect("signal handler");
		// SIGSTOP cannot be trapped; TSTP is the catchable pause signal.
		let mut tstp = signal(SignalKind::from_raw(libc::SIGTSTP)).expect("signal handler");
		let mut cont = signal(SignalKind::from_raw(libc::SIGCONT)).expect("signal handler");

		loop {
			tokio::select! {
				_ = hup.recv() => { let _ = shutdown.send(true); }
				_ = int.recv() => { let _ = shutdown.send(true); }
				_ = term.recv() => { let _ = shutdown.send(true); }
				_ = quit.recv() => { let _ = shutdown.send(true); }
				_ = tstp.recv() => { let _ = pause.send(true); }
				_ = cont.recv() => { let _ = pause.send(false); }
			}
		}
	});
}

#[cfg(not(unix))]
fn spawn_signal_task(shutdown: watch::Sender<bool>, _pause: watch::Sender<bool>) {
	tokio::spawn(async move {
		if tokio::signal::ctrl_c().await.is_ok() {
			let _ = shutdown.send(true);
		}
	});
}

/// systemd unit name for the installed agent.
#[cfg(unix)]
const SERVICE_NAME: &str = "thor-agent";

#[cfg(unix)]
const UNIT_PATH: &str = "/etc/systemd/system/thor-agent.service";

/// Install, remove, start or stop the managed service.
pub fn manage_service(command: &str) -> AgentResult<()> {
	#[cfg(unix)]
	{
		manage_systemd(command)
	}
	#[cfg(not(unix))]
	{
		manage_windows_service(command)
	}
}

#[cfg(unix)]
fn manage_systemd(command: &str) -> AgentResult<()> {
	match command {
		"install" => {
			let exe = std::env::current_exe()?;
			let unit = format!(
				"[Unit]\n\
				Description=Secure credential management\n\
				After=network-online.target\n\
				\n\
				[Service]\n\
				Type=simple\n\
				ExecStart={} agent exec\n\
				Restart=on-failure\n\
				\n\
				[Install]\n\
				WantedBy=multi-user.target\n",
				exe.display()
			);
			std::fs::write(UNIT_PATH, unit)?;
			systemctl(&["daemon-reload"])?;
			systemctl(&["enable", SERVICE_NAME])
		}
		"remove" => {
			let _ = systemctl(&["stop", SERVICE_NAME]);
			let _ = systemctl(&["disable", SERVICE_NAME]);
			std::fs::remove_file(UNIT_PATH)?;
			systemctl(&["daemon-reload"])
		}
		"start" => systemctl(&["start", SERVICE_NAME]),
		"stop" => systemctl(&["stop", SERVICE_NAME]),
		other => Err(crate::AgentError::Rejected(format!(
			"invalid command {other}"
		))),
	}
}

#[cfg(unix)]
fn systemctl(args: &[&str]) -> AgentResult<()> {
	let output = std::process::Command::new("systemctl").args(args).output()?;
	if output.status.success() {
		return Ok(());
	}
	Err(crate::AgentError::Rejected(format!(
		"systemctl {} failed: {}{}",
		args.join(" "),
		String::from_utf8_lossy(&output.stdout),
		String::from_utf8_lossy(&output.stderr),
	)))
}

#[cfg(not(unix))]
fn manage_windows_service(command: &str) -> AgentResult<()> {
	let exe = std::env::current_exe()?;
	let run = |args: &[&str]| -> AgentResult<()> {
		let output = std::process::Command::new("sc.exe").args(args).output()?;
		if output.status.success() {
			return Ok(());
		}
		Err(crate::AgentError::Rejected(format!(
			"sc.exe {} failed: {}",
			args.join(" "),
			String::from_utf8_lossy(&output.stdout),
		)))
	};

	match command {
		"install" => run(&[
			"create",
			"thor-agent",
			&format!("binPath= \"{} agent exec\"", exe.display()),
			"start=",
			"auto",
		]),
		"remove" => {
			let _ = run(&["stop", "thor-agent"]);
			run(&["delete", "thor-agent"])
		}
		"start" => run(&["start", "thor-agent"]),
		"stop" => run(&["stop", "thor-agent"]),
		other => Err(crate::AgentError::Rejected(format!(
			"invalid command {other}"
		))),
	}
}
