//! Platform abstraction layer for cross-platform compatibility.
//!
//! All `#[cfg]` blocks for OS-specific behavior live in this module rather
//! than being scattered through the supervisor.
//!
//! - `paths` - Runtime candidates and install locations
//! - `process` - Process-tree spawning setup, liveness and termination

pub mod paths;
pub mod process;

pub use paths::{current_dir, default_runtime_candidates, executable_dir};
pub use process::{
    configure_process_tree, is_process_alive, is_process_tree_alive, signal_process_tree,
    Termination,
};

/// Returns the current platform name.
pub fn current_platform() -> &'static str {
    #[cfg(target_os = "linux")]
    {
        "linux"
    }
    #[cfg(target_os = "windows")]
    {
        "windows"
    }
    #[cfg(target_os = "macos")]
    {
        "macos"
    }
    #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
    {
        "unknown"
    }
}
