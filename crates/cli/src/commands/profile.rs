// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `pio profile verify <file>` and `pio profile run <file> [--dry-run]`.

use crate::context::CliContext;
use anyhow::{Context as _, Result};
use clap::{Args, Subcommand};
use pio_profile::{
    execute_profile, verify_profile, ActionDispatcher, DryRunDispatcher, ExecuteOptions, Profile,
};
use pio_web::{HttpDispatcher, UnitClient};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Args)]
pub struct ProfileArgs {
    #[command(subcommand)]
    pub command: ProfileCommand,
}

#[derive(Subcommand)]
pub enum ProfileCommand {
    /// Parse and verify a profile document
    Verify { file: PathBuf },
    /// Execute a profile against the cluster
    Run {
        file: PathBuf,
        /// Experiment to run under
        #[arg(long)]
        experiment: Option<String>,
        /// Log what would happen without dispatching anything
        #[arg(long)]
        dry_run: bool,
    },
}

pub async fn run(args: ProfileArgs) -> Result<()> {
    match args.command {
        ProfileCommand::Verify { file } => {
            let profile = Profile::load(&file).context("loading profile")?;
            let no_plugins: BTreeMap<String, String> = BTreeMap::new();
            verify_profile(&profile, &no_plugins)?;
            println!("{} ✓", profile.experiment_profile_name);
            Ok(())
        }
        ProfileCommand::Run {
            file,
            experiment,
            dry_run,
        } => {
            let ctx = CliContext::build(None)?;
            let profile = Profile::load(&file).context("loading profile")?;
            let no_plugins: BTreeMap<String, String> = BTreeMap::new();
            verify_profile(&profile, &no_plugins)?;

            let experiment = experiment.unwrap_or_else(|| ctx.app.experiment.clone());
            let run_id = std::process::id();
            let job_source = format!("experiment_profile/{run_id}");

            // roster: declared units, or just this unit when none are named
            let mut workers: Vec<String> = profile.pioreactors.keys().cloned().collect();
            if workers.is_empty() {
                workers.push(ctx.app.unit.clone());
            }

            let options = ExecuteOptions {
                job_source: job_source.clone(),
                ..ExecuteOptions::default()
            };
            let stop = Arc::new(Notify::new());

            // ctrl-c cancels the run and sweeps profile-started jobs
            let cancel = Arc::clone(&stop);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.notify_one();
                }
            });

            let dry = DryRunDispatcher;
            let http;
            let dispatcher: &dyn ActionDispatcher = if dry_run {
                &dry
            } else {
                http = HttpDispatcher::new(
                    UnitClient::new(ctx.app.config.cluster().unit_api_port),
                    &ctx.app.leader_hostname,
                    &experiment,
                    &job_source,
                    Some(Arc::clone(&ctx.bus)),
                    workers.clone(),
                );
                &http
            };

            let summary = execute_profile(
                &profile,
                &experiment,
                Some(ctx.bus.as_ref()),
                dispatcher,
                &workers,
                options,
                stop,
            )
            .await?;

            println!(
                "{}: fired {}, skipped {}{}",
                profile.experiment_profile_name,
                summary.actions_fired,
                summary.actions_skipped,
                if summary.cancelled {
                    format!(", cancelled with {} never started", summary.never_started)
                } else {
                    String::new()
                }
            );
            Ok(())
        }
    }
}
