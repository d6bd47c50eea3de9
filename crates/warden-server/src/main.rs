// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use warden_server::{router, AppState, KeyManager, SchemeAuthenticator, TempDb};

/// warden-server - centralized secret-key management service
#[derive(Parser, Debug)]
#[command(name = "warden-server")]
struct Args {
	/// Bind address
	#[arg(long, env = "WARDEN_LISTEN", default_value = "127.0.0.1:9000")]
	listen: String,
}

#[tokio::main]
async fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
		)
		.init();

	let args = Args::parse();

	// The in-memory store backs single-node development servers; production
	// deployments plug a durable KeyDb in here.
	let manager = Arc::new(KeyManager::new(Arc::new(TempDb::new())));
	let state = AppState {
		manager,
		authenticator: Arc::new(SchemeAuthenticator),
	};

	let listener = match TcpListener::bind(&args.listen).await {
		Ok(listener) => listener,
		Err(e) => {
			error!("Failed to bind {}: {e}", args.listen);
			std::process::exit(1);
		}
	};
	info!("Listening on {}", args.listen);

	if let Err(e) = axum::serve(listener, router(state)).await {
		error!("Server error: {e}");
		std::process::exit(1);
	}
}
