// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! pio - per-unit command line
//!
//! Runs background jobs in the foreground of their own process, manages
//! calibrations, tails cluster logs, and drives experiment profiles.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod context;
mod exit_error;
mod options;
mod table;

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{calibrations, jobs, kill, logs, profile, run, serve};

#[derive(Parser)]
#[command(
    name = "pio",
    version,
    about = "Pioreactor unit control - jobs, calibrations, and profiles"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a background job in this process
    Run(run::RunArgs),
    /// Stop running jobs by query
    Kill(kill::KillArgs),
    /// List running jobs
    Jobs(jobs::JobsArgs),
    /// Tail the cluster log topics
    Logs(logs::LogsArgs),
    /// Manage calibrations
    Calibrations(calibrations::CalibrationsArgs),
    /// Verify and execute experiment profiles
    Profile(profile::ProfileArgs),
    /// Serve the HTTP APIs (unit, plus leader on the leader)
    Serve(serve::ServeArgs),
}

#[tokio::main]
async fn main() {
    setup_logging();
    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Run(args) => run::run(args).await,
        Commands::Kill(args) => kill::run(args).await,
        Commands::Jobs(args) => jobs::run(args).await,
        Commands::Logs(args) => logs::run(args).await,
        Commands::Calibrations(args) => calibrations::run(args).await,
        Commands::Profile(args) => profile::run(args).await,
        Commands::Serve(args) => serve::run(args).await,
    };
    if let Err(e) = result {
        let code = e
            .downcast_ref::<exit_error::ExitError>()
            .map_or(1, |c| c.code);
        let msg = format_error(&e);
        if !msg.is_empty() {
            eprintln!("\x1b[31mError: {msg}\x1b[0m");
        }
        std::process::exit(code);
    }
}

fn setup_logging() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Format an anyhow error, deduplicating the chain.
///
/// If the top-level Display already contains the source error text, the
/// "Caused by" chain is skipped to avoid noisy duplicate output.
fn format_error(err: &anyhow::Error) -> String {
    let top = err.to_string();
    let chain_redundant = err
        .chain()
        .skip(1)
        .all(|cause| top.contains(&cause.to_string()));
    if chain_redundant {
        return top;
    }
    let mut buf = top;
    for (i, cause) in err.chain().skip(1).enumerate() {
        buf.push_str(&format!("\n\nCaused by:\n    {}: {}", i, cause));
    }
    buf
}
