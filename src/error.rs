//! Error types for the line reduction pipeline.
//!
//! Every failure the sequencer can hit maps onto one of four concerns:
//! configuration, the channel locator, external tools, and the FITS header
//! reader. They are collected under [`PipelineError`].

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for all pipeline operations.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Configuration or line-catalog errors
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Channel window computation errors
    #[error(transparent)]
    Locator(#[from] LocatorError),

    /// External tool invocation errors
    #[error(transparent)]
    Tool(#[from] ToolError),

    /// FITS header errors
    #[error(transparent)]
    Header(#[from] HeaderError),

    /// Failed to remove intermediate artifacts
    #[error("Cleanup of '{path}' failed")]
    Cleanup {
        path: PathBuf,
        source: std::io::Error,
    },

    /// I/O errors
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config file '{path}'")]
    LoadFailed {
        path: Box<PathBuf>,
        source: std::io::Error,
    },

    #[error("Invalid config format in '{path}'")]
    InvalidFormat {
        path: Box<PathBuf>,
        source: toml::de::Error,
    },

    #[error("Config validation failed: {reason}")]
    ValidationFailed { reason: String },

    #[error("Unknown spectral line '{name}' (known: {known})")]
    UnknownLine { name: String, known: String },

    #[error("Failed to save config to '{path}'")]
    SaveFailed {
        path: Box<PathBuf>,
        source: std::io::Error,
    },

    #[error("Config serialization failed")]
    SerializationFailed { source: toml::ser::Error },
}

/// Channel locator errors
#[derive(Error, Debug, PartialEq)]
pub enum LocatorError {
    #[error("Invalid channel count: {count} (must be > 0)")]
    InvalidChannelCount { count: i64 },
}

/// External tool errors
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Failed to start '{program}'")]
    SpawnFailed {
        program: String,
        source: std::io::Error,
    },

    #[error("'{program}' exited with status {code}{}", stderr_suffix(.stderr))]
    NonZeroExit {
        program: String,
        code: i32,
        stderr: String,
    },

    #[error("'{program}' was terminated before it exited")]
    Terminated { program: String },
}

fn stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {stderr}")
    }
}

/// FITS header errors
#[derive(Error, Debug)]
pub enum HeaderError {
    #[error("Failed to read header of '{path}'")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Keyword {keyword} not found in header of '{path}'")]
    MissingKeyword { path: PathBuf, keyword: String },

    #[error("Keyword {keyword} has non-numeric value '{value}'")]
    InvalidValue { keyword: String, value: String },

    #[error("Header of '{path}' ends before the END card")]
    Truncated { path: PathBuf },
}

/// Result type alias for pipeline operations
pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

impl PipelineError {
    /// Short message suitable for the terminal, without the source chain
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::Config(ConfigError::UnknownLine { name, known }) => {
                format!("'{}' is not a known line; choose one of {}", name, known)
            }
            PipelineError::Config(_) => "The configuration could not be used".to_string(),
            PipelineError::Locator(_) => "Could not compute the channel window".to_string(),
            PipelineError::Tool(ToolError::SpawnFailed { program, .. }) => {
                format!("Could not start external program '{}'", program)
            }
            PipelineError::Tool(_) => "An external reduction step failed".to_string(),
            PipelineError::Header(_) => "Could not read the interchange file header".to_string(),
            PipelineError::Cleanup { path, .. } => {
                format!("Could not remove intermediate file '{}'", path.display())
            }
            PipelineError::Io(_) => "A filesystem operation failed".to_string(),
        }
    }

    /// Suggested next action, if any
    pub fn recovery_hint(&self) -> Option<&str> {
        match self {
            PipelineError::Tool(ToolError::NonZeroExit { .. })
            | PipelineError::Tool(ToolError::Terminated { .. }) => {
                Some("Rerun the pipeline; completed steps are skipped and the failed one is retried")
            }
            PipelineError::Tool(ToolError::SpawnFailed { .. }) => {
                Some("Check the [tools] section of the config and your PATH")
            }
            PipelineError::Header(_) => {
                Some("Delete the .uvf output so the variance step runs again")
            }
            _ => None,
        }
    }
}
