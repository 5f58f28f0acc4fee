// SPDX-License-Identifier: MIT OR Apache-2.0

use std::time::Duration;

use crate::tool::Stage;

/// Why a run stopped. Every variant is fatal; nothing is retried.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("camera at {host} is not reachable")]
    CameraUnreachable { host: String },

    #[error("{stage} failed: `{program}` {}", exit_description(.code))]
    ToolFailed {
        stage: Stage,
        program: String,
        code: Option<i32>,
    },

    #[error("{stage}: unable to launch `{program}`")]
    Spawn {
        stage: Stage,
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{stage} did not finish within {}s", .after.as_secs())]
    Timeout { stage: Stage, after: Duration },

    #[error("interrupted")]
    Interrupted,

    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    /// The stage that failed, if the failure belongs to one.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineError::CameraUnreachable { .. } => Some(Stage::Reachability),
            PipelineError::ToolFailed { stage, .. }
            | PipelineError::Spawn { stage, .. }
            | PipelineError::Timeout { stage, .. } => Some(*stage),
            PipelineError::Interrupted | PipelineError::Io { .. } => None,
        }
    }

    pub(crate) fn io(context: impl Into<String>) -> impl FnOnce(std::io::Error) -> Self {
        let context = context.into();
        move |source| PipelineError::Io { context, source }
    }
}

fn exit_description(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exited with status {code}"),
        None => "was terminated by a signal".to_owned(),
    }
}
