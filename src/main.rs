// SPDX-License-Identifier: MIT OR Apache-2.0

//! Records a solar eclipse from an RTSP camera and cuts it into a highlight
//! video.

mod camera;
mod config;
mod error;
mod ffmpeg;
mod pipeline;
mod schedule;
mod tool;
mod wait;

use std::process::ExitCode;

use anyhow::Error;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use config::{Opts, RunConfig};
use error::PipelineError;
use schedule::Plan;
use tool::ProcessRunner;
use wait::SystemClock;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    if let Err(e) = run().await {
        match e.downcast_ref::<PipelineError>().and_then(PipelineError::stage) {
            Some(stage) => error!(%stage, "{e:#}"),
            None => error!("{e:#}"),
        }
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

async fn run() -> Result<(), Error> {
    let opts = Opts::parse();
    let schedule = opts.schedule()?;

    // The run date is fixed here; a wait that crosses midnight must not
    // move go-time.
    let today = chrono::Local::now().date_naive();

    if opts.print_plan {
        let plan = Plan::new(schedule, today, opts.rate_policy());
        println!("{}", serde_json::to_string_pretty(&plan.report())?);
        return Ok(());
    }

    let run_dir = config::create_run_dir(&opts.workdir)?;
    let cfg = RunConfig::new(opts, schedule, today, &chrono::Local, run_dir)?;
    let runner = ProcessRunner::new(cfg.timeout);
    let stop_signal = Box::pin(tokio::signal::ctrl_c());
    let artifacts = pipeline::run(&cfg, &runner, &SystemClock, stop_signal).await?;
    info!("Eclipse video written to {}", artifacts.output.display());
    if let Some(montage) = &artifacts.montage {
        info!("Snapshot montage written to {}", montage.display());
    }
    Ok(())
}
