use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while planning, executing or merging a sharded run.
///
/// Every variant is terminal where it is raised. Retry decisions belong to
/// the scheduler that invoked us, never to this crate.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Shard count or chromosome universe is unusable, or a config value is invalid
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The external caller failed for one shard
    #[error("Shard {index} failed: {message}")]
    ShardExecutionFailure { index: u32, message: String },

    /// Merge was requested while a shard output is absent
    #[error("Missing output for shard {index}: {}", path.display())]
    MissingShard { index: u32, path: PathBuf },

    /// Concatenation, indexing or post-merge validation failed
    #[error("Merge failed: {0}")]
    MergeFailure(String),

    /// Illegal shard status transition or unknown shard in the registry
    #[error("Registry error: {0}")]
    Registry(String),

    /// IO error occurred (file operations, staging, publishing)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error (plan, status, config files)
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    /// Create an invalid configuration error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration(message.into())
    }

    /// Create a shard execution failure
    pub fn shard_failure(index: u32, message: impl Into<String>) -> Self {
        Self::ShardExecutionFailure {
            index,
            message: message.into(),
        }
    }

    /// Shard index the error is attributed to, if any
    pub fn shard_index(&self) -> Option<u32> {
        match self {
            Self::ShardExecutionFailure { index, .. } | Self::MissingShard { index, .. } => {
                Some(*index)
            }
            _ => None,
        }
    }
}

impl From<toml::ser::Error> for PipelineError {
    fn from(e: toml::ser::Error) -> Self {
        PipelineError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for PipelineError {
    fn from(e: toml::de::Error) -> Self {
        PipelineError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(e: serde_json::Error) -> Self {
        PipelineError::Serialization(e.to_string())
    }
}
