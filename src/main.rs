// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2026 Bartek Kus
// Feature: MCP_ROUTER

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use env_logger::Target;
use prismascan::router::{JsonRpcRequest, Router};
use prismascan::transport::{self, Framing};
use prismascan::{ScanError, ScanInvoker, ScannerConfig};
use std::io::{self, Stdout};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

#[derive(Parser)]
#[command(name = "prismascan", version)]
#[command(about = "Twistlock/Prisma image scans over MCP stdio", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the scan_docker_with_prisma tool over stdio (default)
    Serve,
    /// Scan a single image and print the JSON report
    Scan {
        /// Image name, tag or ID
        image: String,

        /// Print the report on one line
        #[arg(long)]
        compact: bool,
    },
}

// POLICY: stdout is RESERVED for protocol messages (or the report in `scan`).
// All logs, panics, and diagnostics MUST write to stderr.
fn main() -> Result<ExitCode> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(Target::Stderr)
        .format_timestamp(None)
        .init();

    std::panic::set_hook(Box::new(|info| {
        log::error!("Panic: {}", info);
    }));

    let cli = Cli::parse();

    let config = match ScannerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            let err = ScanError::from(e);
            log::error!("{}", err);
            return Err(err).context("refusing to start without scanner configuration");
        }
    };
    log::debug!("Loaded {:?}", config);
    let invoker = Arc::new(ScanInvoker::new(config));

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            serve(Arc::new(Router::new(invoker)))?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Scan { image, compact } => match invoker.scan(&image) {
            Ok(report) => {
                let text = if compact {
                    serde_json::to_string(&report)?
                } else {
                    serde_json::to_string_pretty(&report)?
                };
                println!("{}", text);
                Ok(ExitCode::SUCCESS)
            }
            Err(e) => {
                eprintln!("{}", serde_json::to_string_pretty(&e.to_failure())?);
                Ok(ExitCode::FAILURE)
            }
        },
    }
}

fn serve(router: Arc<Router>) -> Result<()> {
    log::info!("prismascan starting (stdio MCP)");

    let stdin = io::stdin();
    let mut input = stdin.lock();
    let stdout = Arc::new(Mutex::new(io::stdout()));
    let mut workers: Vec<JoinHandle<()>> = Vec::new();

    while let Some(msg) = transport::read_message(&mut input)? {
        let req = match serde_json::from_str::<JsonRpcRequest>(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                // Some clients will send other traffic; log but don't crash.
                log::error!("Failed to parse JSON-RPC payload: {}", e);
                continue;
            }
        };

        // Scans block for minutes; run them off the read loop so pings and
        // cancellations keep flowing.
        if req.method == "tools/call" {
            router.track_call(&req);
            let router = router.clone();
            let stdout = stdout.clone();
            workers.retain(|h| !h.is_finished());
            workers.push(thread::spawn(move || {
                respond(&router, &req, msg.framing, &stdout);
            }));
        } else {
            respond(&router, &req, msg.framing, &stdout);
        }
    }

    log::info!("stdin closed, waiting for {} in-flight call(s)", workers.len());
    for worker in workers {
        if worker.join().is_err() {
            log::error!("A tool call worker panicked");
        }
    }
    Ok(())
}

fn respond(router: &Router, req: &JsonRpcRequest, framing: Framing, stdout: &Mutex<Stdout>) {
    let response = router.handle_request(req);
    if req.is_notification() {
        return;
    }

    let body = match serde_json::to_string(&response) {
        Ok(body) => body,
        Err(e) => {
            log::error!("Failed to encode response for {}: {}", req.method, e);
            return;
        }
    };

    let Ok(mut out) = stdout.lock() else {
        log::error!("stdout lock poisoned; dropping response for {}", req.method);
        return;
    };
    if let Err(e) = transport::write_message(&mut *out, body.as_bytes(), framing) {
        log::error!("Failed to write response: {}", e);
    }
}
