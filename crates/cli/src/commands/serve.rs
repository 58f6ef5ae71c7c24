// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `pio serve` — the unit HTTP API, plus the leader API and bus→DB
//! streamer when this unit is the leader.

use crate::context::CliContext;
use anyhow::{Context as _, Result};
use clap::Args;
use pio_core::clock::SystemClock;
use pio_jobs::executor::LocalExecutor;
use pio_jobs::hardware::{detect, PwmRegistry};
use pio_storage::TimeseriesDb;
use pio_web::{
    leader_router, run_streamer, unit_router, CliLauncher, LeaderState, ShellSystem,
    TaskRegistry, UnitClient, UnitState,
};
use std::sync::Arc;

#[derive(Args)]
pub struct ServeArgs {
    /// Port to bind (default: the configured unit_api_port)
    #[arg(long)]
    pub port: Option<u16>,
    /// Serve the leader API and streamer even if hostnames disagree
    #[arg(long)]
    pub leader: bool,
}

pub async fn run(args: ServeArgs) -> Result<()> {
    let ctx = CliContext::build(None)?;
    let port = args.port.unwrap_or(ctx.app.config.cluster().unit_api_port);

    let executor = Arc::new(LocalExecutor::new(
        ctx.app.clone(),
        detect(ctx.app.testing),
        PwmRegistry::new(),
        Arc::clone(&ctx.kv),
        None,
    ));
    let unit_state = UnitState {
        app: ctx.app.clone(),
        bus: Arc::clone(&ctx.bus),
        kv: Arc::clone(&ctx.kv),
        job_manager: Arc::clone(&ctx.job_manager),
        tasks: TaskRegistry::new(),
        launcher: Arc::new(CliLauncher),
        system: Arc::new(ShellSystem),
        executor,
        clock: Arc::new(SystemClock),
        session_write: Arc::new(tokio::sync::Mutex::new(())),
    };
    let mut router = unit_router(unit_state);

    if args.leader || ctx.app.is_leader() {
        let db = Arc::new(
            TimeseriesDb::open(&ctx.app.timeseries_db_path())
                .context("opening time-series db")?,
        );
        let leader_state = LeaderState {
            app: ctx.app.clone(),
            bus: Arc::clone(&ctx.bus),
            db: Arc::clone(&db),
            kv: Arc::clone(&ctx.kv),
            client: UnitClient::new(port),
        };
        router = router.merge(leader_router(leader_state));
        tokio::spawn(run_streamer(Arc::clone(&ctx.bus), db));
        tracing::info!("leader API and streamer enabled");
    }

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding port {port}"))?;
    tracing::info!(port, "unit API listening");
    axum::serve(listener, router).await.context("server stopped")?;
    Ok(())
}
