// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use warden_client::HttpApiClient;
use warden_daemon::sync::REGISTER_FILE;
use warden_daemon::{Daemon, RegisterFile};

/// warden-daemon - keeps a host's subscribed keys cached on the filesystem
#[derive(Parser, Debug)]
#[command(name = "warden-daemon")]
struct Cli {
	/// Base directory for the key cache
	#[arg(long, default_value = "/var/lib/knox")]
	dir: PathBuf,

	/// Key service base URL
	#[arg(long, env = "WARDEN_SERVER", default_value = "https://localhost:9000")]
	server: String,

	/// Refresh period in seconds
	#[arg(long, default_value_t = 600)]
	refresh_secs: u64,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Run the sync process until killed
	Daemon,
	/// Subscribe key IDs on this host
	Register { key_ids: Vec<String> },
	/// Unsubscribe key IDs from this host
	Unregister { key_ids: Vec<String> },
}

/// The machine identity presented to the server, from KNOX_MACHINE_AUTH with
/// a hostname fallback.
fn machine_identity() -> Result<String, String> {
	if let Ok(identity) = std::env::var("KNOX_MACHINE_AUTH") {
		if !identity.is_empty() {
			return Ok(identity);
		}
	}
	hostname::get()
		.map(|h| h.to_string_lossy().into_owned())
		.map_err(|e| format!("You're on a host with no name: {e}"))
}

#[tokio::main]
async fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
		)
		.init();

	let cli = Cli::parse();

	match cli.command {
		Command::Daemon => {
			let identity = match machine_identity() {
				Ok(identity) => identity,
				Err(e) => {
					error!("{e}");
					std::process::exit(1);
				}
			};
			let client = match HttpApiClient::new(&cli.server, &identity) {
				Ok(client) => client,
				Err(e) => {
					error!("Failed to build API client: {e}");
					std::process::exit(1);
				}
			};
			let daemon = Daemon::new(&cli.dir, Arc::new(client))
				.with_refresh(Duration::from_secs(cli.refresh_secs));
			if let Err(e) = daemon.initialize() {
				error!("{e}");
				std::process::exit(1);
			}
			info!(dir = %cli.dir.display(), server = %cli.server, "starting sync daemon");
			if let Err(e) = daemon.run().await {
				error!("Daemon exited: {e}");
				std::process::exit(1);
			}
		}
		Command::Register { key_ids } => {
			if let Err(e) = edit_register(&cli.dir, |guard| guard.add(&key_ids)).await {
				error!("{e}");
				std::process::exit(1);
			}
		}
		Command::Unregister { key_ids } => {
			if let Err(e) = edit_register(&cli.dir, |guard| guard.remove(&key_ids)).await {
				error!("{e}");
				std::process::exit(1);
			}
		}
	}
}

async fn edit_register<F>(dir: &std::path::Path, apply: F) -> Result<(), String>
where
	F: FnOnce(&warden_daemon::RegisterGuard) -> std::io::Result<()>,
{
	let register = RegisterFile::new(dir.join(REGISTER_FILE));
	let guard = register
		.lock()
		.await
		.map_err(|e| format!("Failed to lock register file: {e}"))?;
	apply(&guard).map_err(|e| format!("Failed to update register file: {e}"))
}
