// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `pio jobs [--history]` — the local job registry as a table.

use crate::context::CliContext;
use crate::table;
use anyhow::Result;
use clap::Args;
use pio_storage::JobQuery;

#[derive(Args)]
pub struct JobsArgs {
    /// Include finished jobs
    #[arg(long)]
    pub history: bool,
}

pub async fn run(args: JobsArgs) -> Result<()> {
    let ctx = CliContext::build(None)?;
    let rows = if args.history {
        ctx.job_manager.list_history()?
    } else {
        ctx.job_manager.list_jobs(&JobQuery::running())?
    };

    let table_rows: Vec<Vec<String>> = rows
        .iter()
        .map(|job| {
            vec![
                job.job_name.clone(),
                job.experiment.clone(),
                job.job_source.clone(),
                job.pid.to_string(),
                if job.is_running { "running" } else { "ended" }.to_string(),
                job.started_at.clone(),
            ]
        })
        .collect();
    print!(
        "{}",
        table::render(
            &["NAME", "EXPERIMENT", "SOURCE", "PID", "STATE", "STARTED"],
            &table_rows
        )
    );
    Ok(())
}
