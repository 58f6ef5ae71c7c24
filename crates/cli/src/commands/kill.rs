// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `pio kill --name stirring` / `--experiment exp1` / `--source …` / `--all`

use crate::context::CliContext;
use crate::exit_error::ExitError;
use anyhow::Result;
use clap::Args;
use pio_storage::{JobQuery, ShellKiller};

#[derive(Args)]
pub struct KillArgs {
    /// Stop jobs with this name
    #[arg(long)]
    pub name: Option<String>,
    /// Stop jobs in this experiment
    #[arg(long)]
    pub experiment: Option<String>,
    /// Stop jobs whose source starts with this (e.g. experiment_profile)
    #[arg(long)]
    pub source: Option<String>,
    /// Stop every running job on this unit
    #[arg(long)]
    pub all: bool,
}

pub async fn run(args: KillArgs) -> Result<()> {
    if !args.all && args.name.is_none() && args.experiment.is_none() && args.source.is_none() {
        return Err(anyhow::Error::new(ExitError::usage(
            "pass --name, --experiment, --source, or --all",
        )));
    }
    let ctx = CliContext::build(None)?;
    let query = JobQuery {
        unit: Some(ctx.app.unit.clone()),
        job_name: args.name,
        experiment: args.experiment,
        job_source_prefix: args.source,
        ..JobQuery::default()
    };
    let stopped = ctx.job_manager.kill_jobs(&query, &ShellKiller)?;
    println!("Stopped {stopped} job(s).");
    Ok(())
}
