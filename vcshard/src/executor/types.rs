//! Error and result types for external tool execution

use std::path::PathBuf;
use thiserror::Error;

/// Error types for tool execution
#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("{program} exited with {}: {stderr}", describe_exit(*exit_code))]
    ToolFailed {
        program: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Timeout after {0}s")]
    Timeout(u64),

    #[error("Failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Missing input: {}", .0.display())]
    MissingInput(PathBuf),

    #[error("Missing or empty output: {}", .0.display())]
    MissingOutput(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for executor operations
pub type ExecutorResult<T> = Result<T, ExecutorError>;

fn describe_exit(code: Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "signal".to_string(),
    }
}

/// Keep the tail of a tool's stderr for error messages
pub(crate) fn stderr_tail(stderr: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = stderr.trim_end().lines().collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}
