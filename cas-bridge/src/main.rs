//! cas-bridge - Serve Host PVs Through a Channel Access Engine
//!
//! Loads the configured PVs into a directory, installs it as the engine's
//! server and drives the engine until interrupted.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use cas_bridge::host::lock;
use cas_bridge::{bridge, init, shutdown, BridgeConfig, BridgeError, CasEngine, PvDirectory, Server};
use tracing::{info, warn};

fn print_help() {
    println!("cas-bridge - Channel Access PV bridge v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("USAGE:");
    println!("  cas-bridge [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("  -c, --config <FILE>  Load PV definitions and settings from a JSON file");
    println!("  -h, --help           Print this help message");
    println!("  -v, --version        Print version information");
    println!();
    println!("DESCRIPTION:");
    println!("  Serves the configured PVs through an in-process Channel Access engine");
    println!("  until interrupted with Ctrl-C. RUST_LOG overrides the configured log level.");
}

fn usage_error(message: &str) -> ! {
    eprintln!("error: {}", message);
    eprintln!("Run 'cas-bridge --help' for usage information.");
    std::process::exit(1);
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut config_path: Option<PathBuf> = None;
    let mut args = std::env::args().skip(1);

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                print_help();
                return Ok(());
            }
            "-v" | "--version" => {
                println!("cas-bridge {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "-c" | "--config" => match args.next() {
                Some(path) => config_path = Some(PathBuf::from(path)),
                None => usage_error("'--config' requires a file argument"),
            },
            _ => usage_error(&format!("unrecognized argument '{}'", arg)),
        }
    }

    let config = match &config_path {
        Some(path) => BridgeConfig::from_file(path)?,
        None => BridgeConfig::default(),
    };
    init(&config.log_level)?;

    let engine = CasEngine::new();
    let directory = Arc::new(PvDirectory::new());
    let pvs = config.populate(&directory)?;
    let _server = Server::new(&engine, directory.clone());
    info!(server = %config.bind_name, pvs = pvs.len(), "Serving PVs");
    for name in directory.names() {
        info!(pv = %name, "Available");
    }

    let running = Arc::new(AtomicBool::new(true));
    let worker = {
        let engine = engine.clone();
        let running = running.clone();
        let timeout = config.process_timeout_secs;
        tokio::task::spawn_blocking(move || {
            while running.load(Ordering::Acquire) {
                let mut guard = lock::ensure();
                match bridge::process(&mut guard, &engine, timeout) {
                    Ok(_) => {}
                    Err(BridgeError::EngineGone) => break,
                    Err(err) => {
                        warn!(error = %err, "Processing failed");
                        break;
                    }
                }
            }
        })
    };

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Interrupted, shutting down");

    running.store(false, Ordering::Release);
    worker.await.context("Process loop panicked")?;
    engine.shutdown();
    drop(pvs);
    shutdown();
    Ok(())
}
