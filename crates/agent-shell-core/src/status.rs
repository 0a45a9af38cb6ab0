//! Front-end status model.
//!
//! Folds parsed backend output and supervisor events into the two
//! indicators the user sees: connection and task.

use crate::protocol::OutputEvent;
use crate::supervisor::SupervisorEvent;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Initializing,
    Connected,
    BrowserReady,
    BackendExited,
    Error,
}

impl ConnectionStatus {
    pub fn label(self) -> &'static str {
        match self {
            ConnectionStatus::Initializing => "initializing",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::BrowserReady => "browser ready",
            ConnectionStatus::BackendExited => "backend exited",
            ConnectionStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Idle,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn label(self) -> &'static str {
        match self {
            TaskStatus::Idle => "idle",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

/// Current status indicators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ShellStatus {
    pub connection: ConnectionStatus,
    pub task: TaskStatus,
}

impl Default for ShellStatus {
    fn default() -> Self {
        Self {
            connection: ConnectionStatus::Initializing,
            task: TaskStatus::Idle,
        }
    }
}

impl ShellStatus {
    /// Whether commands will reach the backend.
    pub fn is_ready(&self) -> bool {
        matches!(
            self.connection,
            ConnectionStatus::Connected | ConnectionStatus::BrowserReady
        )
    }

    /// A command was written to the backend.
    pub fn command_sent(&mut self) {
        self.task = TaskStatus::Running;
    }

    /// Returns `true` if the status changed.
    pub fn apply_output(&mut self, event: &OutputEvent) -> bool {
        let before = *self;
        match event {
            OutputEvent::Ready => {
                if self.connection == ConnectionStatus::Initializing {
                    self.connection = ConnectionStatus::Connected;
                }
            }
            OutputEvent::BrowserReady => {
                if self.is_ready() || self.connection == ConnectionStatus::Initializing {
                    self.connection = ConnectionStatus::BrowserReady;
                }
            }
            OutputEvent::TaskCompleted => {
                // A failure reported earlier in the same task sticks
                if self.task != TaskStatus::Failed {
                    self.task = TaskStatus::Completed;
                }
            }
            OutputEvent::TaskFailed => self.task = TaskStatus::Failed,
            OutputEvent::Text(_) | OutputEvent::ErrorText(_) => {}
        }
        *self != before
    }

    /// Returns `true` if the status changed.
    pub fn apply_supervisor(&mut self, event: &SupervisorEvent) -> bool {
        let before = *self;
        match event {
            SupervisorEvent::Started { .. } => *self = Self::default(),
            SupervisorEvent::Exited(report) => {
                self.connection = if report.is_clean() {
                    ConnectionStatus::BackendExited
                } else {
                    ConnectionStatus::Error
                };
                if self.task == TaskStatus::Running {
                    self.task = TaskStatus::Failed;
                }
            }
            SupervisorEvent::FatalExit(_) => self.connection = ConnectionStatus::Error,
            SupervisorEvent::Output { .. } => {}
        }
        *self != before
    }

    pub fn label(&self) -> String {
        format!("{} / {}", self.connection.label(), self.task.label())
    }
}
