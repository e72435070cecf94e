//! External process execution
//!
//! The caller and merge tools are opaque binaries. Everything that launches
//! one goes through [`ToolRunner`], so the rest of the crate never touches
//! `tokio::process` directly and tests can swap in a fake that writes the
//! expected files.

use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use super::types::{stderr_tail, ExecutorError, ExecutorResult};

/// Lines of stderr kept in a `ToolFailed` error
const STDERR_TAIL_LINES: usize = 20;

/// One external command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Short human label for logs ("call chr1-chr5", "bcftools concat")
    pub description: String,
}

impl ToolInvocation {
    pub fn new(program: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            description: description.into(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Shell-style rendering for dry runs and logs
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(shell_quote)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for ToolInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Turn a non-zero exit into `ExecutorError::ToolFailed`
    pub fn ensure_success(self, program: &str) -> ExecutorResult<Self> {
        if self.success() {
            return Ok(self);
        }
        Err(ExecutorError::ToolFailed {
            program: program.to_string(),
            exit_code: self.exit_code,
            stderr: stderr_tail(&self.stderr, STDERR_TAIL_LINES),
        })
    }
}

/// Runs external commands
///
/// Implementations must not retry. A non-zero exit is reported through
/// [`ToolOutput::exit_code`], not as an `Err`.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    async fn run(&self, invocation: &ToolInvocation) -> ExecutorResult<ToolOutput>;
}

/// Runs commands as local child processes
///
/// Children are killed when the returned future is dropped, so a timeout or
/// an aborted task never leaves an orphaned caller behind.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ToolRunner for ProcessRunner {
    #[instrument(skip(self, invocation), fields(tool = %invocation.description))]
    async fn run(&self, invocation: &ToolInvocation) -> ExecutorResult<ToolOutput> {
        debug!(command = %invocation.command_line(), "Launching tool");
        let start = Instant::now();

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &invocation.working_dir {
            command.current_dir(dir);
        }

        let child = command.spawn().map_err(|source| ExecutorError::Spawn {
            program: invocation.program.clone(),
            source,
        })?;
        let output = child.wait_with_output().await?;

        let result = ToolOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            elapsed: start.elapsed(),
        };

        if result.success() {
            debug!(elapsed_ms = result.elapsed.as_millis() as u64, "Tool finished");
        } else {
            warn!(
                exit_code = ?result.exit_code,
                elapsed_ms = result.elapsed.as_millis() as u64,
                "Tool exited unsuccessfully"
            );
        }

        Ok(result)
    }
}

/// Run `invocation` and fail with `Timeout` if it exceeds `limit`
pub async fn run_with_timeout(
    runner: &dyn ToolRunner,
    invocation: &ToolInvocation,
    limit: Duration,
) -> ExecutorResult<ToolOutput> {
    match tokio::time::timeout(limit, runner.run(invocation)).await {
        Ok(result) => result,
        Err(_) => {
            warn!(
                tool = %invocation.description,
                timeout_secs = limit.as_secs(),
                "Tool timed out"
            );
            Err(ExecutorError::Timeout(limit.as_secs()))
        }
    }
}
