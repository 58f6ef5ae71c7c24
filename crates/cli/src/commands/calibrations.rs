// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `pio calibrations {list|display|run|set-current|delete}`
//!
//! `run` drives a calibration session in the terminal: each step renders,
//! form fields prompt on stdin (re-prompting on invalid input), and the
//! finished calibrations are saved to disk at the end.

use crate::context::CliContext;
use crate::exit_error::ExitError;
use crate::table;
use anyhow::{anyhow, Result};
use clap::{Args, Subcommand};
use pio_calibration::chart;
use pio_calibration::protocols::find_protocol;
use pio_calibration::{
    CalibrationStore, Executor, SessionEngine, SessionError, SessionMode, SessionStatus,
    StepView,
};
use pio_core::clock::SystemClock;
use pio_jobs::executor::LocalExecutor;
use pio_jobs::hardware::{detect, PwmRegistry};
use serde_json::{Map, Value};
use std::io::Write as _;
use std::sync::Arc;

#[derive(Args)]
pub struct CalibrationsArgs {
    #[command(subcommand)]
    pub command: CalibrationsCommand,
}

#[derive(Subcommand)]
pub enum CalibrationsCommand {
    /// List calibrations (all devices, or one with --device)
    List {
        #[arg(long)]
        device: Option<String>,
    },
    /// Show one calibration, with its curve as an ASCII chart
    Display {
        #[arg(long)]
        device: String,
        #[arg(long)]
        name: String,
    },
    /// Run an interactive calibration session
    Run {
        #[arg(long)]
        device: String,
        #[arg(long)]
        protocol: Option<String>,
    },
    /// Mark a calibration as the one in effect for its device
    SetCurrent {
        #[arg(long)]
        device: String,
        #[arg(long)]
        name: String,
    },
    /// Delete a stored calibration
    Delete {
        #[arg(long)]
        device: String,
        #[arg(long)]
        name: String,
    },
}

pub async fn run(args: CalibrationsArgs) -> Result<()> {
    let ctx = CliContext::build(None)?;
    let store = CalibrationStore::new(&ctx.app.calibrations_dir(), Arc::clone(&ctx.kv));

    match args.command {
        CalibrationsCommand::List { device } => {
            let devices = match device {
                Some(device) => vec![device],
                None => store.list_devices()?,
            };
            let mut rows = Vec::new();
            for device in devices {
                let active = store.active_name(&device)?;
                for name in store.list_names(&device)? {
                    let marker = if active.as_deref() == Some(name.as_str()) {
                        "✔"
                    } else {
                        ""
                    };
                    rows.push(vec![device.clone(), name, marker.to_string()]);
                }
            }
            print!("{}", table::render(&["DEVICE", "NAME", "ACTIVE"], &rows));
            Ok(())
        }
        CalibrationsCommand::Display { device, name } => {
            let calibration = store.load(&device, &name)?;
            let base = calibration.base();
            println!(
                "{}  ({device}, recorded on {} at {})",
                base.calibration_name,
                base.calibrated_on_pioreactor_unit,
                base.created_at.to_rfc3339(),
            );
            print!(
                "{}",
                chart::render(
                    &base.recorded_data.x,
                    &base.recorded_data.y,
                    &base.calibration_name,
                    "x",
                    "y",
                    Some(&base.curve_data_),
                    false,
                )
            );
            println!("{}", serde_yaml::to_string(&calibration)?);
            Ok(())
        }
        CalibrationsCommand::Run { device, protocol } => {
            run_session(&ctx, &store, &device, protocol.as_deref()).await
        }
        CalibrationsCommand::SetCurrent { device, name } => {
            store.set_active(&device, &name)?;
            println!("{name} is now the active {device} calibration.");
            Ok(())
        }
        CalibrationsCommand::Delete { device, name } => {
            store.delete(&device, &name)?;
            println!("Deleted {device}/{name}.");
            Ok(())
        }
    }
}

async fn run_session(
    ctx: &CliContext,
    store: &CalibrationStore,
    device: &str,
    protocol_name: Option<&str>,
) -> Result<()> {
    let protocols = pio_calibration::protocols::protocol_registry();
    let protocol = match protocol_name {
        Some(name) => find_protocol(name, device),
        None => protocols
            .into_iter()
            .find(|p| p.supported_devices().contains(&device)),
    }
    .ok_or_else(|| {
        anyhow::Error::new(ExitError::usage(format!(
            "no calibration protocol for device {device:?}"
        )))
    })?;

    let executor = LocalExecutor::new(
        ctx.app.clone(),
        detect(ctx.app.testing),
        PwmRegistry::new(),
        Arc::clone(&ctx.kv),
        None,
    );
    let clock = SystemClock;
    let mut session = protocol.start_session(device, &clock)?;
    session.data.insert(
        "unit".to_string(),
        Value::String(ctx.app.unit.clone()),
    );
    println!("{} — session {}", protocol.title(), session.session_id);

    let mut engine = SessionEngine::new(
        protocol.registry(),
        &mut session,
        SessionMode::Cli,
        &executor as &dyn Executor,
        &clock,
    );

    let mut step = engine.get_step()?;
    loop {
        render_step(&step);
        if engine.session().status != SessionStatus::InProgress {
            break;
        }
        let inputs = prompt_inputs(&step)?;
        match engine.advance(inputs) {
            Ok(next) => step = next,
            Err(SessionError::Input(message)) => {
                // invalid input reprompts the same step
                println!("  ✗ {message}");
            }
            Err(e) => return Err(anyhow!(e.to_string())),
        }
    }

    // CLI mode collects results; save them now.
    for calibration in &engine.collected {
        let path = store.save(calibration, true)?;
        println!("Saved {}.", path.display());
    }
    if engine.session().status == SessionStatus::Complete && !engine.collected.is_empty() {
        let first = &engine.collected[0];
        store.set_active(first.device(), first.name())?;
        println!("{} is now the active {} calibration.", first.name(), first.device());
    }
    Ok(())
}

fn render_step(step: &StepView) {
    println!();
    println!("── {}", step.title);
    if !step.body.is_empty() {
        println!("{}", step.body);
    }
    if let Some(metadata) = &step.metadata {
        if let Some(chart_spec) = metadata.get("chart") {
            render_chart(chart_spec);
        }
        if let Some(result) = metadata.get("result") {
            println!("{}", serde_json::to_string_pretty(result).unwrap_or_default());
        }
    }
}

fn render_chart(spec: &Value) {
    let points = spec
        .pointer("/series/0/points")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let x: Vec<f64> = points
        .iter()
        .filter_map(|p| p.get("x").and_then(Value::as_f64))
        .collect();
    let y: Vec<f64> = points
        .iter()
        .filter_map(|p| p.get("y").and_then(Value::as_f64))
        .collect();
    if x.is_empty() {
        return;
    }
    print!(
        "{}",
        chart::render(
            &x,
            &y,
            spec.get("title").and_then(Value::as_str).unwrap_or(""),
            spec.get("x_label").and_then(Value::as_str).unwrap_or(""),
            spec.get("y_label").and_then(Value::as_str).unwrap_or(""),
            None,
            true,
        )
    );
}

fn prompt_inputs(step: &StepView) -> Result<Map<String, Value>> {
    let mut inputs = Map::new();
    if step.fields.is_empty() {
        prompt_line("Press enter to continue…")?;
        return Ok(inputs);
    }
    for field in &step.fields {
        let suffix = match &field.default {
            Some(default) => format!(" [{default}]"),
            None => String::new(),
        };
        let raw = prompt_line(&format!("{}{suffix}: ", field.label))?;
        if raw.is_empty() {
            continue; // engine applies the default or reprompts
        }
        inputs.insert(field.name.clone(), Value::String(raw));
    }
    Ok(inputs)
}

fn prompt_line(prompt: &str) -> Result<String> {
    print!("{prompt}");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}
