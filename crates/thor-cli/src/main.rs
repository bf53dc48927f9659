// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! The `thor` binary: coordinator and agent in one executable.
//!
//! `THOR_LOG` selects verbosity (`trace|debug|info|warn|error|fatal`);
//! `THOR_MODE=debug|trace` keeps debug-only surfaces mounted. Exit codes:
//! 0 success, 1 operational failure, 2 usage error.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "thor", about = "Secure credential rotation", version)]
struct Args {
	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Run the coordinator.
	Server {
		/// Path to the coordinator configuration file.
		#[arg(long, default_value = "config.yaml")]
		config: PathBuf,
	},
	/// Manage or run the endpoint agent.
	Agent {
		#[command(subcommand)]
		action: AgentAction,
	},
}

#[derive(Subcommand, Debug)]
enum AgentAction {
	/// Install the agent as a managed service.
	Install,
	/// Remove the managed service.
	Remove,
	/// Start the managed service.
	Start,
	/// Stop the managed service.
	Stop,
	/// Run the agent loop in the foreground.
	Exec {
		/// Path to the agent configuration file.
		#[arg(long, default_value = "agent.yaml")]
		config: PathBuf,
	},
}

#[tokio::main]
async fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| EnvFilter::new(thor_common_config::log_filter())),
		)
		.init();

	// A usage error exits 2 via clap before we get here.
	let args = Args::parse();
	std::process::exit(run(args).await);
}

async fn run(args: Args) -> i32 {
	match args.command {
		Command::Server { config } => {
			let config = match thor_common_config::ServerConfig::load(&config).await {
				Ok(config) => config,
				Err(e) => {
					error!("failed to load config: {e}");
					return 1;
				}
			};
			if let Err(e) = thor_server::run(config).await {
				error!("cannot run server: {e}");
				return 1;
			}
			0
		}
		Command::Agent { action } => match action {
			AgentAction::Exec { config } => {
				if let Err(e) = thor_agent::run_foreground(&config).await {
					error!("failed setting up main app: {e}");
					return 1;
				}
				0
			}
			AgentAction::Install => manage("install"),
			AgentAction::Remove => manage("remove"),
			AgentAction::Start => manage("start"),
			AgentAction::Stop => manage("stop"),
		},
	}
}

fn manage(command: &str) -> i32 {
	if let Err(e) = thor_agent::service::manage_service(command) {
		error!("failed to {command} thor-agent: {e}");
		return 1;
	}
	0
}
