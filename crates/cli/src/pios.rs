// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! pios - leader-side cluster commands
//!
//! Fans unit-API calls out to every active worker: run a job everywhere,
//! kill by query cluster-wide, roll updates.

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use pio_core::config::AppContext;
use pio_storage::ScopedKv;
use pio_web::{leader::INVENTORY_SCOPE, UnitClient};
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "pios",
    version,
    about = "Pioreactor cluster control - run jobs and updates across workers"
)]
struct Cli {
    /// Only these workers (default: every active worker)
    #[arg(long = "units", global = true)]
    units: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a job on every worker
    RunAcrossCluster {
        job: String,
        /// Job options as `--key value` pairs
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        options: Vec<String>,
    },
    /// Stop jobs on every worker
    Kill {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        experiment: Option<String>,
        #[arg(long)]
        source: Option<String>,
    },
    /// Roll an update across the cluster
    Update {
        /// What to update: app or ui
        #[arg(long, default_value = "app")]
        target: String,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("\x1b[31mError: {e}\x1b[0m");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let app = AppContext::from_env().context("loading configuration")?;
    let client = UnitClient::new(app.config.cluster().unit_api_port);

    let workers = if cli.units.is_empty() {
        active_workers(&app)?
    } else {
        cli.units.clone()
    };
    if workers.is_empty() {
        println!("No active workers in the inventory.");
        return Ok(());
    }

    match cli.command {
        Commands::RunAcrossCluster { job, options } => {
            let (options, args) = parse_options(&options)?;
            for unit in &workers {
                let url = client.unit_url(unit, &format!("/unit_api/jobs/run/job_name/{job}"));
                let body = json!({
                    "options": options,
                    "args": args,
                    "env": { "EXPERIMENT": app.experiment },
                });
                report(unit, client.post(&url, body).await);
            }
        }
        Commands::Kill {
            name,
            experiment,
            source,
        } => {
            for unit in &workers {
                let url = client.unit_url(unit, "/unit_api/jobs/stop");
                let body = json!({
                    "job_name": name,
                    "experiment": experiment,
                    "job_source_prefix": source,
                });
                report(unit, client.post(&url, body).await);
            }
        }
        Commands::Update { target } => {
            for unit in &workers {
                let url = client.unit_url(unit, &format!("/unit_api/system/update/{target}"));
                report(unit, client.post(&url, Value::Null).await);
            }
        }
    }
    Ok(())
}

/// Active workers from the leader's inventory KV.
fn active_workers(app: &AppContext) -> Result<Vec<String>> {
    let kv = Arc::new(ScopedKv::open(&app.kv_path()).context("opening kv store")?);
    let mut workers = Vec::new();
    for (unit, raw) in kv.iter(INVENTORY_SCOPE)? {
        let entry: Value = serde_json::from_slice(&raw).unwrap_or(Value::Null);
        if entry
            .get("is_active")
            .and_then(Value::as_bool)
            .unwrap_or(true)
        {
            workers.push(unit);
        }
    }
    Ok(workers)
}

fn parse_options(tokens: &[String]) -> Result<(serde_json::Map<String, Value>, Vec<String>)> {
    // same trailing `--key value` grammar as `pio run`
    let mut options = serde_json::Map::new();
    let mut args = Vec::new();
    let mut iter = tokens.iter().peekable();
    while let Some(token) = iter.next() {
        if let Some(key) = token.strip_prefix("--") {
            let takes_value = matches!(iter.peek(), Some(next) if !next.starts_with("--"));
            let value = if takes_value {
                Value::String(iter.next().cloned().unwrap_or_default())
            } else {
                Value::Bool(true)
            };
            options.insert(key.replace('-', "_"), value);
        } else {
            args.push(token.clone());
        }
    }
    Ok((options, args))
}

fn report(unit: &str, result: std::result::Result<Value, pio_profile::DispatchError>) {
    match result {
        Ok(body) => println!("{unit}: ok {body}"),
        Err(e) => println!("{unit}: failed ({e})"),
    }
}
