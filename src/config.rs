// SPDX-License-Identifier: MIT OR Apache-2.0

//! Command-line options and the immutable per-run configuration built from
//! them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Error};
use chrono::{NaiveDate, TimeZone};
use clap::Parser;

use crate::camera::{self, CameraTarget};
use crate::ffmpeg::{self, Tools, Transport};
use crate::schedule::{Plan, RatePolicy, Schedule};

/// Records a solar eclipse from an RTSP camera and assembles a highlight
/// video: partial phases as timelapses around real-time totality.
#[derive(Parser, Debug)]
#[command(version)]
pub struct Opts {
    /// Crop video from portrait to square.
    #[arg(long)]
    pub crop: bool,

    /// Camera host name or IP address.
    #[arg(long, default_value = camera::DEFAULT_HOST)]
    pub ip: String,

    /// Skip video capture; copy `--src` into place instead.
    #[arg(long = "skip_capture", alias = "skip-capture")]
    pub skip_capture: bool,

    /// Don't wait for go-time, start recording immediately.
    #[arg(long = "skip_wait", alias = "skip-wait")]
    pub skip_wait: bool,

    /// Generate partial phase snapshots and a montage of them.
    #[arg(long)]
    pub snapshot: bool,

    /// Source file. Used with `--skip_capture`.
    #[arg(long, default_value = "sun.mp4.bak")]
    pub src: PathBuf,

    /// Use TCP for the RTSP stream.
    #[arg(long)]
    pub tcp: bool,

    /// Burn the capture's wall-clock time into the video.
    #[arg(long)]
    pub timestamp: bool,

    /// `rtsp://` URL of the camera; overrides `--ip`.
    #[arg(long)]
    pub url: Option<url::Url>,

    /// JSON eclipse timeline to use instead of the built-in 2024-04-08 one.
    #[arg(long)]
    pub schedule: Option<PathBuf>,

    /// Compute each timelapse's rate from its own clip rather than both
    /// from the pre-totality clip.
    #[arg(long = "per_clip_rate", alias = "per-clip-rate")]
    pub per_clip_rate: bool,

    /// Directory in which the per-run artifact directory is created.
    #[arg(long, default_value = ".")]
    pub workdir: PathBuf,

    /// Print the computed timeline as JSON and exit.
    #[arg(long = "print_plan", alias = "print-plan")]
    pub print_plan: bool,

    /// Seconds a tool may run beyond its expected duration before it's
    /// killed. Waits forever if unset.
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// ffmpeg executable.
    #[arg(long, default_value = "ffmpeg")]
    pub ffmpeg: PathBuf,

    /// ImageMagick `montage` executable.
    #[arg(long, default_value = "montage")]
    pub montage: PathBuf,

    /// ffmpeg `-loglevel`.
    #[arg(long, default_value = "quiet")]
    pub loglevel: String,

    /// Output filename [default: eclipse-<pid>.mp4]
    pub filename: Option<PathBuf>,
}

impl Opts {
    pub fn rate_policy(&self) -> RatePolicy {
        if self.per_clip_rate {
            RatePolicy::PerClip
        } else {
            RatePolicy::Shared
        }
    }

    pub fn schedule(&self) -> Result<Schedule, Error> {
        Ok(match &self.schedule {
            Some(path) => Schedule::load(path)?,
            None => Schedule::builtin()?,
        })
    }
}

/// Optional stages and shortcuts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Features {
    pub crop: bool,
    pub timestamp: bool,
    pub snapshot: bool,
    pub skip_capture: bool,
    pub skip_wait: bool,
}

/// Everything a run needs, fixed at startup.
#[derive(Debug)]
pub struct RunConfig {
    pub plan: Plan,
    pub features: Features,
    pub transport: Transport,
    pub camera: CameraTarget,

    /// Copied in place of a capture with `--skip_capture`.
    pub source: PathBuf,

    /// The assembled eclipse video.
    pub output: PathBuf,

    /// Where every intermediate artifact goes. Never cleaned up.
    pub run_dir: PathBuf,

    pub tools: Tools,
    pub timeout: Option<Duration>,

    /// Overlay clock origin, set when `--timestamp` is given.
    pub overlay_basetime: Option<i64>,
}

impl RunConfig {
    /// `today` and `tz` are the run date and local zone, read once by the
    /// caller.
    pub fn new<Tz: TimeZone>(
        opts: Opts,
        schedule: Schedule,
        today: NaiveDate,
        tz: &Tz,
        run_dir: PathBuf,
    ) -> Result<Self, Error> {
        let plan = Plan::new(schedule, today, opts.rate_policy());
        let camera = CameraTarget::new(&opts.ip, opts.url.clone())?;
        let overlay_basetime = if opts.timestamp {
            Some(ffmpeg::overlay_basetime(plan.go_time, tz).ok_or_else(|| {
                anyhow!("go-time {} does not exist in the local time zone", plan.go_time)
            })?)
        } else {
            None
        };
        let output = opts
            .filename
            .unwrap_or_else(|| format!("eclipse-{}.mp4", std::process::id()).into());
        Ok(RunConfig {
            plan,
            features: Features {
                crop: opts.crop,
                timestamp: opts.timestamp,
                snapshot: opts.snapshot,
                skip_capture: opts.skip_capture,
                skip_wait: opts.skip_wait,
            },
            transport: if opts.tcp {
                Transport::Tcp
            } else {
                Transport::Udp
            },
            camera,
            source: opts.src,
            output,
            run_dir,
            tools: Tools {
                ffmpeg: opts.ffmpeg,
                montage: opts.montage,
                loglevel: opts.loglevel,
                ..Tools::default()
            },
            timeout: opts.timeout.map(Duration::from_secs),
            overlay_basetime,
        })
    }

    pub fn artifact(&self, name: &str) -> PathBuf {
        self.run_dir.join(name)
    }

    pub fn snapshot_dir(&self) -> PathBuf {
        self.run_dir.join("snapshots")
    }

    /// The montage sits next to the final video and shares its stem, so
    /// runs with distinct outputs never clobber each other's montage.
    pub fn montage_path(&self) -> PathBuf {
        let path = self.output.with_extension("jpg");
        if path != self.output {
            return path;
        }
        let mut name = path.file_stem().unwrap_or_default().to_owned();
        name.push("-montage.jpg");
        self.output.with_file_name(name)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.run_dir.join("manifest.json")
    }
}

/// Creates a fresh, uniquely named artifact directory under `workdir`.
pub fn create_run_dir(workdir: &Path) -> Result<PathBuf, Error> {
    std::fs::create_dir_all(workdir)?;
    let dir = tempfile::Builder::new()
        .prefix("eclipse-run-")
        .tempdir_in(workdir)?;
    Ok(dir.keep())
}
