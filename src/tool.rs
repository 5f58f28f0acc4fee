// SPDX-License-Identifier: MIT OR Apache-2.0

//! Running external tools.
//!
//! Stages never spawn processes themselves. They describe the command they
//! want as an [Invocation] and hand it to a [ToolRunner]; [ProcessRunner]
//! is the one that actually forks.

use std::ffi::OsString;
use std::future::Future;
use std::process::Stdio;
use std::time::Duration;

use tracing::info;

use crate::error::PipelineError;
use crate::schedule::Segment;

/// The pipeline step an invocation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Reachability,
    Capture,
    Modify,
    Clip(Segment),
    Timelapse(Segment),
    Assembly,
    /// 1-based snapshot number.
    Snapshot(usize),
    Montage,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Reachability => f.write_str("reachability check"),
            Stage::Capture => f.write_str("capture"),
            Stage::Modify => f.write_str("crop/timestamp"),
            Stage::Clip(s) => write!(f, "{s} clip"),
            Stage::Timelapse(s) => write!(f, "{s} timelapse"),
            Stage::Assembly => f.write_str("assembly"),
            Stage::Snapshot(n) => write!(f, "snapshot {n:02}"),
            Stage::Montage => f.write_str("montage"),
        }
    }
}

/// A fully-specified external command. No shell is involved, so arguments
/// are passed through verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub stage: Stage,
    pub program: OsString,
    pub args: Vec<OsString>,

    /// Discard the tool's own output.
    pub quiet: bool,

    /// How long the tool is expected to run by design (a capture's length).
    pub nominal: Option<Duration>,
}

impl Invocation {
    pub fn new(stage: Stage, program: impl Into<OsString>) -> Self {
        Invocation {
            stage,
            program: program.into(),
            args: Vec::new(),
            quiet: false,
            nominal: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    pub fn nominal(mut self, d: Duration) -> Self {
        self.nominal = Some(d);
        self
    }

    pub fn program_name(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }

    /// Human-readable form for logs; not meant to be fed to a shell.
    pub fn command_line(&self) -> String {
        let mut line = self.program_name();
        for a in &self.args {
            line.push(' ');
            line.push_str(&a.to_string_lossy());
        }
        line
    }
}

/// Executes invocations, succeeding only on a zero exit status.
pub trait ToolRunner {
    fn run(&self, invocation: &Invocation) -> impl Future<Output = Result<(), PipelineError>>;
}

/// Spawns each invocation as a child process and waits for it. Dropping
/// the returned future kills the child.
#[derive(Debug, Default)]
pub struct ProcessRunner {
    /// Grace allowed beyond an invocation's nominal duration. `None` waits
    /// forever.
    timeout: Option<Duration>,
}

impl ProcessRunner {
    pub fn new(timeout: Option<Duration>) -> Self {
        ProcessRunner { timeout }
    }
}

impl ToolRunner for ProcessRunner {
    async fn run(&self, invocation: &Invocation) -> Result<(), PipelineError> {
        let stage = invocation.stage;
        info!("Running command: {}", invocation.command_line());
        let mut cmd = tokio::process::Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if invocation.quiet {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }
        let mut child = cmd.spawn().map_err(|source| PipelineError::Spawn {
            stage,
            program: invocation.program_name(),
            source,
        })?;

        let limit = self
            .timeout
            .map(|t| invocation.nominal.unwrap_or_default() + t);
        let sleep = match limit {
            Some(limit) => futures::future::Either::Left(tokio::time::sleep(limit)),
            None => futures::future::Either::Right(futures::future::pending()),
        };
        tokio::pin!(sleep);
        let status = tokio::select! {
            status = child.wait() => {
                status.map_err(PipelineError::io(format!("waiting for {stage}")))?
            },
            _ = &mut sleep => {
                return Err(PipelineError::Timeout {
                    stage,
                    after: limit.unwrap_or_default(),
                });
            },
        };
        if status.success() {
            Ok(())
        } else {
            Err(PipelineError::ToolFailed {
                stage,
                program: invocation.program_name(),
                code: status.code(),
            })
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_names() {
        assert_eq!(Stage::Clip(Segment::PreTotality).to_string(), "pre-totality clip");
        assert_eq!(
            Stage::Timelapse(Segment::PostTotality).to_string(),
            "post-totality timelapse"
        );
        assert_eq!(Stage::Snapshot(7).to_string(), "snapshot 07");
    }

    #[test]
    fn command_line_joins_args() {
        let inv = Invocation::new(Stage::Reachability, "ping")
            .args(["-c", "1"])
            .arg("seestar.local")
            .quiet();
        assert_eq!(inv.command_line(), "ping -c 1 seestar.local");
        assert!(inv.quiet);
    }

    #[tokio::test]
    async fn process_runner_reports_exit_status() {
        let runner = ProcessRunner::default();
        runner
            .run(&Invocation::new(Stage::Assembly, "true"))
            .await
            .unwrap();
        let err = runner
            .run(&Invocation::new(Stage::Assembly, "false"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ToolFailed {
                stage: Stage::Assembly,
                code: Some(1),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn process_runner_reports_missing_program() {
        let err = ProcessRunner::default()
            .run(&Invocation::new(Stage::Montage, "no-such-tool-for-eclipse-record"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Spawn {
                stage: Stage::Montage,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn nominal_duration_extends_timeout() {
        let runner = ProcessRunner::new(Some(Duration::from_millis(100)));
        runner
            .run(
                &Invocation::new(Stage::Capture, "sleep")
                    .arg("0.3")
                    .nominal(Duration::from_millis(500)),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn dropped_run_kills_child() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("finished");
        let inv = Invocation::new(Stage::Modify, "sh")
            .arg("-c")
            .arg(format!("sleep 0.5 && touch {}", marker.display()));
        let runner = ProcessRunner::default();
        let r = tokio::time::timeout(Duration::from_millis(100), runner.run(&inv)).await;
        assert!(r.is_err());
        tokio::time::sleep(Duration::from_millis(800)).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn process_runner_times_out() {
        let runner = ProcessRunner::new(Some(Duration::from_millis(100)));
        let err = runner
            .run(&Invocation::new(Stage::Modify, "sleep").arg("5"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Timeout {
                stage: Stage::Modify,
                ..
            }
        ));
    }
}
