// SPDX-License-Identifier: MIT
//
// CipherLink: Encrypted Point-to-Point Serial Link
// Copyright (c) 2025 CipherLink Contributors

//! CipherLink node
//!
//! Runs one end of an encrypted character link. Both ends generate an RSA-style key pair,
//! swap public keys over a retrying handshake, and from then on every keystroke travels
//! as one encrypted 32-bit integer.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐  keys   ┌──────────────┐   raw bytes   ┌──────────────┐  keys   ┌──────────┐
//! │ Console  │ <─────> │    Server    │ <───────────> │    Client    │ <─────> │ Console  │
//! │ (stdio)  │         │  (listens)   │  (TCP stream) │   (dials)    │         │ (stdio)  │
//! └──────────┘         └──────────────┘               └──────────────┘         └──────────┘
//! ```
//!
//! The TCP stream plays the part of a serial line: a bare byte pipe with no framing.
//!
//! # Features
//!
//! - Per-peer key generation from OS entropy, or fixed preset keys
//! - Timeout-driven handshake that survives line noise and late starts
//! - Dial retries with exponential backoff
//! - Graceful shutdown on SIGINT/SIGTERM with a metrics summary

mod console;
mod link;
mod transport;

use anyhow::{Context, Result};
use cipherlink_core::config::LinkConfig;
use cipherlink_core::io::{SystemClock, ThreadRngEntropy};
use cipherlink_core::keygen::{KeyDerivation, KeyPairGenerator};
use cipherlink_core::metrics::LinkMetrics;
use cipherlink_core::prime::PrimeSource;
use cipherlink_core::{Error, Role};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "cipherlink")]
#[command(about = "CipherLink - Encrypted point-to-point character link", long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Link role (server or client); overrides CIPHERLINK_ROLE
    #[arg(short, long)]
    role: Option<Role>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Establish the link and exchange messages (default)
    Run,
    /// Generate key pairs and print them
    Keygen {
        /// Number of key pairs
        #[arg(short, long, default_value_t = 1)]
        count: u32,

        /// Print one JSON object per key pair
        #[arg(long)]
        json: bool,

        /// Delay between entropy bit samples in milliseconds
        #[arg(long, default_value_t = cipherlink_core::DEFAULT_ENTROPY_SETTLE_MS)]
        settle_ms: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();

    // Initialize tracing; stdout belongs to the console
    let log_level = args
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .json()
        .init();

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run(args.role).await,
        Command::Keygen {
            count,
            json,
            settle_ms,
        } => tokio::task::spawn_blocking(move || keygen(count, json, settle_ms))
            .await
            .context("Key generation task failed")?,
    }
}

async fn run(role: Option<Role>) -> Result<()> {
    info!("CipherLink v{}", cipherlink_core::VERSION);

    // Load configuration from environment variables
    info!("Loading configuration from environment variables");
    let config = LinkConfig::from_env().context("Failed to load configuration from environment")?;
    let role = config.resolve_role(role)?;
    info!(
        %role,
        key_source = ?config.key_source,
        handshake_timeout_ms = config.handshake_timeout_ms,
        max_attempts = config.handshake_max_attempts,
        "Configuration loaded"
    );

    let stream = tokio::select! {
        result = transport::establish(&config, role) => {
            result.context("Failed to establish link")?
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received before peer connected");
            return Ok(());
        }
    };

    let stop = Arc::new(AtomicBool::new(false));
    let metrics = LinkMetrics::new();

    let mut worker = {
        let stop = Arc::clone(&stop);
        let metrics = metrics.clone();
        let config = config.clone();
        tokio::task::spawn_blocking(move || link::run(&config, role, stream, &stop, &metrics))
    };

    let outcome = tokio::select! {
        joined = &mut worker => joined,
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, closing link");
            stop.store(true, Ordering::Relaxed);
            worker.await
        }
    };

    info!(
        metrics = %serde_json::to_string(&metrics.snapshot())?,
        "Link metrics"
    );

    match outcome.context("Link worker panicked")? {
        Ok(()) | Err(Error::Cancelled) => {
            info!("Link shut down gracefully");
            Ok(())
        }
        Err(e) if e.is_disconnect() => {
            warn!(error = %e, "Peer disconnected");
            Ok(())
        }
        Err(e) => Err(e).context("Link failed"),
    }
}

fn keygen(count: u32, json: bool, settle_ms: u32) -> Result<()> {
    let primes = PrimeSource::new(ThreadRngEntropy, SystemClock::new()).with_settle_ms(settle_ms);
    let mut generator = KeyPairGenerator::new(primes);
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    for _ in 0..count {
        let d = generator.derive().context("Key generation failed")?;
        if json {
            writeln!(out, "{}", serde_json::to_string(&d)?)?;
        } else {
            writeln!(out, "{}", describe(&d))?;
        }
    }
    Ok(())
}

/// One-line plain-text form of a derivation, raw inverse included
fn describe(d: &KeyDerivation) -> String {
    format!(
        "p={} q={} totient={} e={} inverse={} d={} n={}",
        d.p,
        d.q,
        d.totient,
        d.key_pair.public_exponent(),
        d.inverse,
        d.key_pair.private_exponent(),
        d.key_pair.modulus()
    )
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use futures::stream::StreamExt;
        use signal_hook::consts::signal::*;
        use signal_hook_tokio::Signals;

        let mut signals = match Signals::new([SIGINT, SIGTERM]) {
            Ok(signals) => signals,
            Err(e) => {
                warn!(error = %e, "Failed to register signal handlers");
                return std::future::pending().await;
            }
        };

        if let Some(signal) = signals.next().await {
            info!("Received signal: {:?}", signal);
        }
    }

    #[cfg(windows)]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            return std::future::pending().await;
        }
        info!("Received Ctrl+C signal");
    }
}
