//! Events published by the supervisor.

use super::state::SupervisorState;
use crate::error::ShellError;
use serde::Serialize;

/// How the backend process ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExitReport {
    pub pid: u32,
    /// Exit code; `None` when killed by a signal.
    pub code: Option<i32>,
    /// Whether the exit followed a `stop` call.
    pub stop_requested: bool,
    /// State the supervisor settled in.
    pub state: SupervisorState,
}

impl ExitReport {
    /// Expected exit: requested, or a clean code 0.
    pub fn is_clean(&self) -> bool {
        self.state == SupervisorState::Stopped
    }

    /// The error for an unexpected exit, if this was one.
    pub fn to_error(&self) -> Option<ShellError> {
        if self.is_clean() {
            None
        } else {
            Some(ShellError::UnexpectedExit { code: self.code })
        }
    }
}

/// Supervisor notifications, in the order they happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SupervisorEvent {
    /// The backend process was spawned.
    Started { pid: u32 },
    /// A decoded chunk of backend stdout.
    Output { text: String },
    /// The backend process ended.
    Exited(ExitReport),
    /// The backend crashed; the host should terminate. Emitted once per run.
    FatalExit(ExitReport),
}
