//! Platform-specific path and executable-name utilities.

use crate::error::{Result, ShellError};
use std::path::PathBuf;

/// Interpreter names to probe for the backend runtime, in priority order.
///
/// # Platform Behavior
/// - **Windows**: `python`, `py`, `python3` (the launcher and store shims
///   make `python3` the least reliable name)
/// - **Linux/macOS**: `python3`, `python`
pub fn default_runtime_candidates() -> Vec<String> {
    #[cfg(windows)]
    {
        vec!["python".into(), "py".into(), "python3".into()]
    }
    #[cfg(not(windows))]
    {
        vec!["python3".into(), "python".into()]
    }
}

/// Directory containing the running executable.
///
/// This is the installation root when the shell runs from a package.
pub fn executable_dir() -> Result<PathBuf> {
    let exe = std::env::current_exe()?;
    exe.parent()
        .map(|dir| dir.to_path_buf())
        .ok_or_else(|| ShellError::Config {
            message: format!("Executable has no parent directory: {}", exe.display()),
        })
}

/// The process's current working directory.
pub fn current_dir() -> Result<PathBuf> {
    std::env::current_dir().map_err(|e| ShellError::io_with_path(e, "."))
}
