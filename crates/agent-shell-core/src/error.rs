//! Error types for the agent shell.
//!
//! Startup failures (runtime, entry point, spawn) abort the launch. A grace
//! period that runs out is logged; only a forced kill that also fails is
//! returned to the caller.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the shell core.
#[derive(Debug, Error)]
pub enum ShellError {
    // Resolution errors
    #[error("No backend runtime found (tried: {})", .candidates.join(", "))]
    RuntimeNotFound { candidates: Vec<String> },

    #[error("Backend entry point not found (tried: {})", display_paths(.candidates))]
    EntryPointNotFound { candidates: Vec<PathBuf> },

    // Lifecycle errors
    #[error("Failed to spawn {program}: {message}")]
    SpawnFailed {
        program: String,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Backend already running{}", display_pid(.pid))]
    AlreadyRunning { pid: Option<u32> },

    #[error("Backend exited unexpectedly with code {}", display_code(.code))]
    UnexpectedExit { code: Option<i32> },

    #[error("Backend PID {pid} did not exit within {grace:?}")]
    TerminationTimeout { pid: u32, grace: Duration },

    #[error("Failed to terminate backend PID {pid}: {message}")]
    TerminationFailed { pid: u32, message: String },

    // Deep link errors
    #[error("Invalid deep link {uri}: {message}")]
    InvalidDeepLink { uri: String, message: String },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for shell operations.
pub type Result<T> = std::result::Result<T, ShellError>;

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn display_pid(pid: &Option<u32>) -> String {
    match pid {
        Some(pid) => format!(" with PID {}", pid),
        None => " (spawn in progress)".to_string(),
    }
}

fn display_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "none (terminated by signal)".to_string(),
    }
}

impl From<std::io::Error> for ShellError {
    fn from(err: std::io::Error) -> Self {
        ShellError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for ShellError {
    fn from(err: serde_json::Error) -> Self {
        ShellError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl ShellError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        ShellError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Process exit code the host application should use for this error.
    ///
    /// - 2: configuration or deep link problems
    /// - 3: runtime or entry point could not be resolved
    /// - 4: the backend could not be spawned
    /// - 5: the backend exited unexpectedly
    /// - 1: everything else
    pub fn exit_code(&self) -> i32 {
        match self {
            ShellError::Config { .. }
            | ShellError::Json { .. }
            | ShellError::InvalidDeepLink { .. } => 2,
            ShellError::RuntimeNotFound { .. } | ShellError::EntryPointNotFound { .. } => 3,
            ShellError::SpawnFailed { .. } => 4,
            ShellError::UnexpectedExit { .. } => 5,
            _ => 1,
        }
    }
}
