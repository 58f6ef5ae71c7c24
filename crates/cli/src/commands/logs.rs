// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `pio logs [--level warning] [--lines N]` — tail the cluster log topics.

use crate::context::CliContext;
use anyhow::Result;
use clap::Args;
use pio_bus::{Bus, QosLevel};
use pio_core::telemetry::LogMessage;

#[derive(Args)]
pub struct LogsArgs {
    /// Only this level and up (debug, info, notice, warning, error)
    #[arg(long)]
    pub level: Option<String>,
    /// Stop after printing this many lines (0 = forever)
    #[arg(long, short = 'n', default_value = "0")]
    pub lines: usize,
}

pub async fn run(args: LogsArgs) -> Result<()> {
    let ctx = CliContext::build(None)?;
    let filter = match &args.level {
        Some(level) => format!("pioreactor/+/+/logs/{level}"),
        None => "pioreactor/+/+/logs/+".to_string(),
    };
    let mut rx = ctx
        .bus
        .subscribe(&[filter], QosLevel::AtLeastOnce)
        .await
        .map_err(|e| anyhow::anyhow!("cannot subscribe: {e}"))?;

    let mut printed = 0usize;
    while let Some(message) = rx.recv().await {
        match serde_json::from_slice::<LogMessage>(&message.payload) {
            Ok(line) => println!(
                "{} [{}] {:>7} {}: {}",
                line.timestamp.to_rfc3339(),
                topic_unit(&message.topic),
                line.level,
                line.task,
                line.message
            ),
            Err(_) => println!("{} {}", message.topic, message.payload_str()),
        }
        printed += 1;
        if args.lines > 0 && printed >= args.lines {
            break;
        }
    }
    Ok(())
}

fn topic_unit(topic: &str) -> &str {
    pio_core::topics::split(topic).map(|(unit, _, _)| unit).unwrap_or("?")
}
