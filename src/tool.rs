//! Subprocess plumbing for the external extraction and transcoding tools.

use std::{fmt, io, process::Stdio, time::Duration};

use tokio::{process::Command, time::timeout};
use tracing::debug;

use crate::error::{ApiError, ErrorKind};

#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

#[derive(Debug)]
pub enum ToolError {
    Launch { program: String, source: io::Error },
    TimedOut(Duration),
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::Launch { program, source } if source.kind() == io::ErrorKind::NotFound => {
                write!(f, "{program} is not installed or not on PATH")
            }
            ToolError::Launch { program, source } => write!(f, "could not run {program}: {source}"),
            ToolError::TimedOut(limit) => write!(f, "timed out after {}s", limit.as_secs()),
        }
    }
}

impl std::error::Error for ToolError {}

pub async fn run_tool(
    program: &str,
    args: &[String],
    limit: Duration,
) -> Result<ToolOutput, ToolError> {
    debug!("running {program} {:?}", args);

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();

    let output = timeout(limit, child)
        .await
        .map_err(|_| ToolError::TimedOut(limit))?
        .map_err(|source| ToolError::Launch {
            program: program.to_string(),
            source,
        })?;

    Ok(ToolOutput {
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Maps the extraction tool's diagnostic text onto the error taxonomy.
/// `context` prefixes the raw text for unrecognised failures.
pub fn classify_failure(stderr: &str, url: &str, context: &str) -> ApiError {
    if stderr.contains("Unsupported URL") {
        ApiError::upstream(
            ErrorKind::UpstreamUnsupported,
            format!("Unsupported media URL: {url}"),
        )
    } else if stderr.contains("Private video") {
        ApiError::upstream(
            ErrorKind::UpstreamPrivate,
            "This video is private or requires authentication",
        )
    } else if stderr.contains("Video unavailable") {
        ApiError::upstream(
            ErrorKind::UpstreamUnavailable,
            "Video is unavailable or has been removed",
        )
    } else {
        ApiError::upstream(
            ErrorKind::UpstreamFailure,
            format!("{context}: {}", stderr.trim()),
        )
    }
}

/// Converts a runner failure into the client-facing error, phrasing the
/// timeout with `what` (e.g. "Download", "Request").
pub fn launch_failure(error: ToolError, what: &str) -> ApiError {
    match error {
        ToolError::TimedOut(limit) => {
            ApiError::timeout(format!("{what} timed out after {}", describe_limit(limit)))
        }
        launch @ ToolError::Launch { .. } => ApiError::internal(launch.to_string()),
    }
}

fn describe_limit(limit: Duration) -> String {
    let seconds = limit.as_secs();
    if seconds >= 60 && seconds % 60 == 0 {
        let minutes = seconds / 60;
        format!("{minutes} minute{}", if minutes == 1 { "" } else { "s" })
    } else {
        format!("{seconds} seconds")
    }
}
