//! Platform-specific process-tree management.
//!
//! The backend may spawn its own children (a browser driver, for instance),
//! so termination always targets the whole tree:
//!
//! - **Unix**: the backend is spawned as the leader of a fresh process group
//!   and signals go to the group with `killpg`.
//! - **Windows**: the backend gets its own process group and the tree is
//!   terminated with `taskkill /T`.

use crate::error::Result;
use tracing::debug;

/// How hard to ask a process tree to go away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// SIGTERM / `taskkill /T`.
    Graceful,
    /// SIGKILL / `taskkill /T /F`.
    Forceful,
}

/// Prepare a command so the spawned process roots its own process tree.
pub fn configure_process_tree(cmd: &mut tokio::process::Command) {
    #[cfg(unix)]
    {
        cmd.process_group(0);
    }

    #[cfg(windows)]
    {
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
        const CREATE_NO_WINDOW: u32 = 0x0800_0000;
        cmd.creation_flags(CREATE_NEW_PROCESS_GROUP | CREATE_NO_WINDOW);
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = cmd;
    }
}

/// Check if a process with the given PID is alive.
///
/// # Platform Behavior
/// - **Linux**: `kill(pid, 0)`, with zombies (state `Z` in `/proc/<pid>/stat`)
///   reported as dead
/// - **macOS/other Unix**: `kill(pid, 0)`
/// - **Windows**: `OpenProcess` + `GetExitCodeProcess`
pub fn is_process_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        unix::is_process_alive(pid)
    }

    #[cfg(windows)]
    {
        windows::is_process_alive(pid)
    }

    #[cfg(not(any(unix, windows)))]
    {
        tracing::warn!("Process alive check not implemented for this platform");
        let _ = pid;
        true
    }
}

/// Check if any process of the tree rooted at `pid` is still alive.
///
/// # Platform Behavior
/// - **Unix**: probes the process group led by `pid`
/// - **Windows**: probes `pid` itself; `taskkill /T` covers the descendants
pub fn is_process_tree_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        unix::is_group_alive(pid)
    }

    #[cfg(not(unix))]
    {
        is_process_alive(pid)
    }
}

/// Send a termination request to the process tree rooted at `pid`.
///
/// A tree that no longer exists counts as terminated.
pub fn signal_process_tree(pid: u32, how: Termination) -> Result<()> {
    debug!("Signalling process tree {} ({:?})", pid, how);

    #[cfg(unix)]
    {
        unix::signal_group(pid, how)
    }

    #[cfg(windows)]
    {
        windows::taskkill_tree(pid, how)
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = (pid, how);
        Err(crate::error::ShellError::Other(
            "Process termination not implemented for this platform".into(),
        ))
    }
}

#[cfg(unix)]
mod unix {
    use super::Termination;
    use crate::error::{Result, ShellError};
    use nix::errno::Errno;
    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::Pid;
    use tracing::debug;

    fn to_pid(pid: u32) -> Option<Pid> {
        i32::try_from(pid).ok().filter(|p| *p > 0).map(Pid::from_raw)
    }

    pub(super) fn is_process_alive(pid: u32) -> bool {
        let Some(nix_pid) = to_pid(pid) else {
            return false;
        };

        match kill(nix_pid, None) {
            // EPERM means the process exists but belongs to someone else
            Ok(()) | Err(Errno::EPERM) => !is_zombie(pid),
            Err(_) => false,
        }
    }

    pub(super) fn is_group_alive(pgid: u32) -> bool {
        let Some(nix_pid) = to_pid(pgid) else {
            return false;
        };
        matches!(killpg(nix_pid, None), Ok(()) | Err(Errno::EPERM))
    }

    pub(super) fn signal_group(pgid: u32, how: Termination) -> Result<()> {
        let Some(nix_pid) = to_pid(pgid) else {
            return Err(ShellError::TerminationFailed {
                pid: pgid,
                message: "PID out of range".to_string(),
            });
        };

        let signal = match how {
            Termination::Graceful => Signal::SIGTERM,
            Termination::Forceful => Signal::SIGKILL,
        };

        match killpg(nix_pid, signal) {
            Ok(()) => Ok(()),
            Err(Errno::ESRCH) => {
                debug!("Process group {} already gone", pgid);
                Ok(())
            }
            Err(e) => Err(ShellError::TerminationFailed {
                pid: pgid,
                message: format!("{:?} failed: {}", signal, e),
            }),
        }
    }

    #[cfg(target_os = "linux")]
    fn is_zombie(pid: u32) -> bool {
        let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) else {
            return false;
        };
        // Format: "pid (comm) state ...", comm may itself contain parentheses
        stat.rfind(')')
            .and_then(|idx| stat[idx + 1..].trim_start().chars().next())
            .map(|state| state == 'Z')
            .unwrap_or(false)
    }

    #[cfg(not(target_os = "linux"))]
    fn is_zombie(_pid: u32) -> bool {
        false
    }
}

#[cfg(windows)]
mod windows {
    use super::Termination;
    use crate::error::{Result, ShellError};
    use std::process::Command;
    use tracing::{debug, warn};

    const STILL_ACTIVE: u32 = 259;

    #[allow(unsafe_code)]
    pub(super) fn is_process_alive(pid: u32) -> bool {
        use windows_sys::Win32::Foundation::CloseHandle;
        use windows_sys::Win32::System::Threading::{
            GetExitCodeProcess, OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION,
        };

        // SAFETY: the handle is checked for null before use and closed exactly once.
        unsafe {
            let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
            if handle.is_null() {
                return false;
            }
            let mut exit_code: u32 = 0;
            let ok = GetExitCodeProcess(handle, &mut exit_code);
            CloseHandle(handle);
            ok != 0 && exit_code == STILL_ACTIVE
        }
    }

    pub(super) fn taskkill_tree(pid: u32, how: Termination) -> Result<()> {
        let pid_arg = pid.to_string();
        let mut args = vec!["/PID", pid_arg.as_str(), "/T"];
        if how == Termination::Forceful {
            args.push("/F");
        }

        debug!("Running taskkill {}", args.join(" "));
        let output = Command::new("taskkill")
            .args(&args)
            .output()
            .map_err(|e| ShellError::TerminationFailed {
                pid,
                message: format!("Failed to run taskkill: {}", e),
            })?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        // "not found" errors are OK - process already dead
        if stderr.contains("not found") || stderr.contains("not running") {
            Ok(())
        } else if how == Termination::Graceful {
            // Console-less processes may refuse a polite close; escalation handles it
            warn!("taskkill (graceful) failed for {}: {}", pid, stderr.trim());
            Ok(())
        } else {
            Err(ShellError::TerminationFailed {
                pid,
                message: stderr.trim().to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_process_alive_self() {
        assert!(is_process_alive(std::process::id()));
    }

    #[test]
    fn test_is_process_alive_nonexistent() {
        // A very high PID should not exist
        assert!(!is_process_alive(4_000_000_000));
    }

    #[cfg(unix)]
    #[test]
    fn test_signal_nonexistent_tree_is_ok() {
        // PID above pid_max: no such group
        assert!(signal_process_tree(2_000_000_000, Termination::Graceful).is_ok());
        assert!(!is_process_tree_alive(2_000_000_000));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_forceful_kill_of_group() {
        use std::process::Stdio;

        let mut cmd = tokio::process::Command::new("sleep");
        cmd.arg("30").stdout(Stdio::null()).stderr(Stdio::null());
        configure_process_tree(&mut cmd);
        let mut child = cmd.spawn().unwrap();
        let pid = child.id().unwrap();

        assert!(is_process_tree_alive(pid));
        signal_process_tree(pid, Termination::Forceful).unwrap();

        let status = child.wait().await.unwrap();
        assert!(!status.success());
        assert!(!is_process_alive(pid));
    }
}
