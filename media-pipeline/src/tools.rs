//! External tool runner
//!
//! Runs ffmpeg, ffprobe, MP4Box and yt-dlp. Output is captured and attached
//! to the error when the tool exits unsuccessfully. No retries happen here.
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ToolError;

/// Captured output of a successful run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
            (false, true) => self.stdout.clone(),
            _ => self.stderr.clone(),
        }
    }
}

#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Run `program` with `args`. The child is killed if `cancel` fires.
    async fn run(
        &self,
        program: &str,
        args: &[String],
        cancel: &CancellationToken,
    ) -> Result<ToolOutput, ToolError>;
}

/// Runs tools as child processes
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    timeout: Option<Duration>,
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill any tool that runs longer than `timeout`
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

#[async_trait]
impl ToolRunner for ProcessRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        cancel: &CancellationToken,
    ) -> Result<ToolOutput, ToolError> {
        debug!(program, args = ?args, "Running external tool");

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ToolError::Spawn {
                program: program.to_string(),
                source,
            })?;

        let wait = child.wait_with_output();
        let timeout = async {
            match self.timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };

        // Dropping the wait future drops the child, which kills it
        let output = tokio::select! {
            result = wait => result.map_err(|source| ToolError::Spawn {
                program: program.to_string(),
                source,
            })?,
            _ = cancel.cancelled() => {
                warn!(program, "Tool cancelled, child killed");
                return Err(ToolError::Cancelled { program: program.to_string() });
            }
            _ = timeout => {
                warn!(program, "Tool timed out, child killed");
                return Err(ToolError::Failed {
                    program: program.to_string(),
                    status: "timeout".to_string(),
                    output: String::new(),
                });
            }
        };

        let captured = ToolOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !output.status.success() {
            return Err(ToolError::Failed {
                program: program.to_string(),
                status: output.status.to_string(),
                output: captured.combined(),
            });
        }

        Ok(captured)
    }
}

/// Whether `input` carries at least one audio stream, according to ffprobe
pub async fn probe_has_audio(
    runner: &dyn ToolRunner,
    ffprobe: &str,
    input: &Path,
    cancel: &CancellationToken,
) -> Result<bool, ToolError> {
    let args = crate::args![
        "-v",
        "error",
        "-select_streams",
        "a",
        "-show_entries",
        "stream=index",
        "-of",
        "csv=p=0",
        input.display(),
    ];
    let output = runner.run(ffprobe, &args, cancel).await?;
    Ok(!output.stdout.trim().is_empty())
}

/// Convenience for building argument lists from mixed string types
#[macro_export]
macro_rules! args {
    ($($arg:expr),* $(,)?) => {
        vec![$(::std::string::ToString::to_string(&$arg)),*]
    };
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_captures_output() {
        let runner = ProcessRunner::new();
        let out = runner
            .run("sh", &args!["-c", "echo hello"], &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_non_zero_exit_embeds_output() {
        let runner = ProcessRunner::new();
        let err = runner
            .run("sh", &args!["-c", "echo bad input >&2; exit 3"], &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            ToolError::Failed { status, output, .. } => {
                assert!(status.contains('3'));
                assert!(output.contains("bad input"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_program() {
        let runner = ProcessRunner::new();
        let err = runner
            .run("definitely-not-a-real-tool", &[], &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_cancellation_kills_child() {
        let runner = ProcessRunner::new();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let err = runner.run("sleep", &args!["10"], &cancel).await.unwrap_err();
        assert!(matches!(err, ToolError::Cancelled { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_timeout() {
        let runner = ProcessRunner::with_timeout(Duration::from_millis(50));
        let err = runner
            .run("sleep", &args!["10"], &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Failed { ref status, .. } if status == "timeout"));
    }
}
