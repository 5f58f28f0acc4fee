// SPDX-License-Identifier: MIT OR Apache-2.0

//! The capture and post-processing sequence.
//!
//! Stages run strictly in order, each consuming the file the previous one
//! wrote. The first failure ends the run; whatever was produced so far is
//! left in the run directory.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};

use crate::camera;
use crate::config::RunConfig;
use crate::error::PipelineError;
use crate::ffmpeg;
use crate::schedule::{format_duration, Segment};
use crate::tool::ToolRunner;
use crate::wait::{self, Clock};

/// Files produced by a completed run.
#[derive(Debug, Serialize)]
pub struct Artifacts {
    pub capture: PathBuf,
    /// Same as `capture` unless cropping or timestamping was requested.
    pub modified: PathBuf,
    pub clips: Clips,
    pub timelapses: [PathBuf; 2],
    pub output: PathBuf,
    pub snapshots: Vec<PathBuf>,
    pub montage: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
pub struct Clips {
    pub pre: PathBuf,
    pub totality: PathBuf,
    pub post: PathBuf,
}

fn clip_name(segment: Segment) -> &'static str {
    match segment {
        Segment::PreTotality => "p1.mp4",
        Segment::Totality => "totality.mp4",
        Segment::PostTotality => "p2.mp4",
    }
}

/// Resolves when the run should be abandoned, typically on Ctrl+C.
pub type StopSignal = Pin<Box<dyn Future<Output = Result<(), std::io::Error>>>>;

/// Runs every stage, or stops early when `stop_signal` fires. Stopping drops
/// the in-flight stage, which kills its tool.
pub async fn run<R: ToolRunner, C: Clock>(
    cfg: &RunConfig,
    runner: &R,
    clock: &C,
    stop_signal: StopSignal,
) -> Result<Artifacts, PipelineError> {
    tokio::select! {
        result = run_stages(cfg, runner, clock) => result,
        r = stop_signal => {
            r.map_err(PipelineError::io("unable to listen for Ctrl+C"))?;
            warn!("Stopping due to signal");
            Err(PipelineError::Interrupted)
        },
    }
}

async fn run_stages<R: ToolRunner, C: Clock>(
    cfg: &RunConfig,
    runner: &R,
    clock: &C,
) -> Result<Artifacts, PipelineError> {
    info!(
        "Solar eclipse video generation; artifacts in {}",
        cfg.run_dir.display()
    );
    if !cfg.features.skip_capture {
        camera::check_reachable(&cfg.camera.host, &cfg.tools, runner).await?;
    }
    if !cfg.features.skip_wait {
        wait::wait_until(clock, cfg.plan.go_time).await;
    }

    let capture = capture(cfg, runner).await?;
    let started = Instant::now();
    let modified = modify(cfg, runner, &capture).await?;
    let clips = extract_clips(cfg, runner, &modified).await?;
    let timelapses = timelapses(cfg, runner, &clips).await?;

    info!("Generating eclipse video");
    let [tl1, tl2] = &timelapses;
    runner
        .run(&cfg.tools.concatenate(
            &[tl1.as_path(), clips.totality.as_path(), tl2.as_path()],
            &cfg.output,
        ))
        .await?;

    let (snapshots, montage) = if cfg.features.snapshot {
        let (snapshots, montage) = take_snapshots(cfg, runner, &modified).await?;
        (snapshots, Some(montage))
    } else {
        (Vec::new(), None)
    };
    info!("Processing time: {:.1?}", started.elapsed());

    let artifacts = Artifacts {
        capture,
        modified,
        clips,
        timelapses,
        output: cfg.output.clone(),
        snapshots,
        montage,
    };
    write_manifest(cfg, &artifacts).await?;
    Ok(artifacts)
}

async fn capture<R: ToolRunner>(cfg: &RunConfig, runner: &R) -> Result<PathBuf, PipelineError> {
    let out = cfg.artifact("full.mp4");
    if cfg.features.skip_capture {
        info!(
            "Skipping capture; copying {} to {}",
            cfg.source.display(),
            out.display()
        );
        tokio::fs::copy(&cfg.source, &out)
            .await
            .map_err(PipelineError::io(format!(
                "capture: unable to copy {}",
                cfg.source.display()
            )))?;
        return Ok(out);
    }
    info!(
        "Capturing video from {} for {}",
        cfg.camera.url,
        format_duration(cfg.plan.timing.capture_length())
    );
    let inv = cfg.tools.capture(
        &cfg.camera.url,
        cfg.transport,
        cfg.plan.timing.capture_length(),
        &out,
    );
    if let Err(e) = runner.run(&inv).await {
        warn!("Unable to capture. Is the camera online?");
        return Err(e);
    }
    Ok(out)
}

async fn modify<R: ToolRunner>(
    cfg: &RunConfig,
    runner: &R,
    input: &Path,
) -> Result<PathBuf, PipelineError> {
    let basetime = if cfg.features.timestamp {
        cfg.overlay_basetime
    } else {
        None
    };
    let Some(filter) = ffmpeg::modify_filter(cfg.features.crop, basetime) else {
        return Ok(input.to_owned());
    };
    info!("Cropping/timestamping video");
    let out = cfg.artifact("cropped.mp4");
    runner.run(&cfg.tools.filter(&filter, input, &out)).await?;
    Ok(out)
}

async fn extract_clips<R: ToolRunner>(
    cfg: &RunConfig,
    runner: &R,
    input: &Path,
) -> Result<Clips, PipelineError> {
    let [pre, totality, post] = cfg
        .plan
        .timing
        .clips()
        .map(|cut| (cut, cfg.artifact(clip_name(cut.segment))));
    for (cut, out) in [&pre, &totality, &post] {
        info!("Generating {} clip {}", cut.segment, out.display());
        runner.run(&cfg.tools.trim(cut, input, out)).await?;
    }
    Ok(Clips {
        pre: pre.1,
        totality: totality.1,
        post: post.1,
    })
}

async fn timelapses<R: ToolRunner>(
    cfg: &RunConfig,
    runner: &R,
    clips: &Clips,
) -> Result<[PathBuf; 2], PipelineError> {
    let tl1 = cfg.artifact("tl1.mp4");
    let tl2 = cfg.artifact("tl2.mp4");
    for (segment, input, out) in [
        (Segment::PreTotality, &clips.pre, &tl1),
        (Segment::PostTotality, &clips.post, &tl2),
    ] {
        let rate = cfg.plan.timelapse_rate(segment);
        info!("Generating timelapse of {segment} phase at rate {rate}");
        runner.run(&cfg.tools.retime(segment, rate, input, out)).await?;
    }
    Ok([tl1, tl2])
}

async fn take_snapshots<R: ToolRunner>(
    cfg: &RunConfig,
    runner: &R,
    input: &Path,
) -> Result<(Vec<PathBuf>, PathBuf), PipelineError> {
    info!("Generating partial phase snapshots");
    let dir = cfg.snapshot_dir();
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(PipelineError::io(format!("unable to create {}", dir.display())))?;
    let mut images = Vec::new();
    for (i, (moment, offset)) in cfg.plan.schedule.snapshot_offsets().into_iter().enumerate() {
        let number = i + 1;
        let out = dir.join(format!("snapshot-{number:02}.jpg"));
        info!("Snapshot {number:02}: {}", moment.label);
        runner
            .run(&cfg.tools.extract_frame(number, offset, input, &out))
            .await?;
        images.push(out);
    }
    let montage = cfg.montage_path();
    runner.run(&cfg.tools.tile(&images, &montage)).await?;
    Ok((images, montage))
}

async fn write_manifest(cfg: &RunConfig, artifacts: &Artifacts) -> Result<(), PipelineError> {
    let path = cfg.manifest_path();
    let manifest = serde_json::json!({
        "plan": cfg.plan.report(),
        "artifacts": artifacts,
    });
    let buf = serde_json::to_vec_pretty(&manifest)
        .map_err(|e| PipelineError::Io {
            context: "encoding run manifest".to_owned(),
            source: e.into(),
        })?;
    tokio::fs::write(&path, buf)
        .await
        .map_err(PipelineError::io(format!("unable to write {}", path.display())))?;
    info!("Run manifest written to {}", path.display());
    Ok(())
}
