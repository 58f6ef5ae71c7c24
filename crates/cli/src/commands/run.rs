// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `pio run <job> [--option value]… [args…]`
//!
//! The process *becomes* the job: it registers, publishes its settings,
//! and loops until signalled or told to disconnect over the bus.

use crate::context::CliContext;
use crate::exit_error::ExitError;
use crate::options::parse_trailing;
use anyhow::Result;
use clap::Args;
use pio_core::unit::job_source_from_env;
use pio_jobs::dosing::{DosingAutomation, DosingControl};
use pio_jobs::growth_rate::GrowthRateCalculator;
use pio_jobs::led::LedIntensity;
use pio_jobs::od_reading::{IrIntensity, OdReader};
use pio_jobs::stirring::Stirrer;
use pio_jobs::temperature::TemperatureAutomation;
use pio_jobs::{run_job, JobOptions};
use serde_json::{Map, Value};

#[derive(Args)]
pub struct RunArgs {
    /// Job name (stirring, od_reading, growth_rate_calculating,
    /// dosing_control, temperature_automation, led_intensity)
    pub job: String,
    /// Job options as `--key value` pairs
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub options: Vec<String>,
}

pub async fn run(args: RunArgs) -> Result<()> {
    let (options, _positional) = parse_trailing(&args.options)?;
    let ctx = CliContext::build(Some(&args.job))?;
    let job_source = job_source_from_env().unwrap_or_else(|| "user".to_string());
    let job_ctx = ctx.job_context(job_source);

    let defaults = JobOptions::default();
    match args.job.as_str() {
        "stirring" => {
            let target_rpm = f64_option(&options, "target_rpm")
                .or_else(|| job_ctx.app.config.get_f64("stirring", "target_rpm"))
                .unwrap_or(500.0);
            run_job(Stirrer::new(target_rpm, None), job_ctx, defaults).await?;
        }
        "od_reading" => {
            let channels = OdReader::channels_from_config(&job_ctx.app.config);
            // one-shot (no interval) is how calibrations grab a single sample
            let one_shot = options
                .get("one_shot")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let interval = if one_shot {
                None
            } else {
                f64_option(&options, "interval")
                    .or_else(|| {
                        job_ctx
                            .app
                            .config
                            .get_f64("od_reading", "samples_per_second")
                            .map(|sps| 1.0 / sps)
                    })
                    .or(Some(5.0))
            };
            let intensity = match options.get("ir_led_intensity") {
                Some(Value::String(s)) if s == "auto" => IrIntensity::Auto,
                Some(value) => IrIntensity::Percent(value.as_f64().unwrap_or(70.0)),
                None => IrIntensity::Percent(70.0),
            };
            run_job(OdReader::new(channels, intensity, interval), job_ctx, defaults).await?;
        }
        "growth_rate_calculating" => {
            run_job(
                GrowthRateCalculator::from_config(&job_ctx.app.config),
                job_ctx,
                defaults,
            )
            .await?;
        }
        "dosing_control" => {
            let automation = DosingAutomation::from_options(&Value::Object(options))
                .map_err(|e| anyhow::Error::new(ExitError::usage(e)))?;
            let child_ctx = job_ctx.clone();
            run_job(DosingControl::new(automation, child_ctx), job_ctx, defaults).await?;
        }
        "temperature_automation" => {
            let target = f64_option(&options, "target_temperature").unwrap_or(32.0);
            run_job(TemperatureAutomation::thermostat(target), job_ctx, defaults).await?;
        }
        "led_intensity" => {
            let led = LedIntensity::from_options(&Value::Object(options))
                .map_err(|e| anyhow::Error::new(ExitError::usage(e)))?;
            run_job(led, job_ctx, defaults).await?;
        }
        other => {
            return Err(anyhow::Error::new(ExitError::usage(format!("unknown job {other:?}"))));
        }
    }
    Ok(())
}

fn f64_option(options: &Map<String, Value>, key: &str) -> Option<f64> {
    options.get(key).and_then(Value::as_f64)
}
