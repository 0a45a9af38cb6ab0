//! Backend process supervisor.
//!
//! Owns at most one backend process at a time and exposes `start`, `send`
//! and `stop` as its only mutators. A monitor task reaps the child, records
//! how it ended and publishes the exit; an exit that nobody requested moves
//! the supervisor to `Failed` and raises [`SupervisorEvent::FatalExit`].

mod events;
mod handle;
mod relay;
mod state;

pub use events::{ExitReport, SupervisorEvent};
pub use handle::BackendProcessHandle;
pub use relay::{EventHub, Utf8Chunker};
pub use state::{SupervisorState, Transition};

use crate::config::{ShellConfig, SupervisorConfig};
use crate::error::{Result, ShellError};
use crate::launch::LaunchPlan;
use crate::platform::{self, Termination};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Termination timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorOptions {
    /// Time between the polite request and the forced kill.
    pub grace_period: Duration,
    /// Time to wait for the forced kill to take effect.
    pub kill_wait: Duration,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            grace_period: SupervisorConfig::GRACE_PERIOD,
            kill_wait: SupervisorConfig::KILL_WAIT,
        }
    }
}

impl SupervisorOptions {
    pub fn from_config(config: &ShellConfig) -> Self {
        Self {
            grace_period: config.grace_period(),
            ..Default::default()
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: SupervisorState,
    handle: Option<BackendProcessHandle>,
    stop_requested: bool,
}

impl Inner {
    fn apply(&mut self, transition: Transition) -> bool {
        match self.state.next(transition) {
            Some(next) => {
                debug!("Supervisor state {:?} -> {:?}", self.state, next);
                self.state = next;
                true
            }
            None => {
                warn!(
                    "Ignoring transition {:?} in state {:?}",
                    transition, self.state
                );
                false
            }
        }
    }
}

/// Supervises the backend process.
///
/// Cloning yields another handle to the same supervisor.
#[derive(Debug, Clone)]
pub struct Supervisor {
    options: SupervisorOptions,
    inner: Arc<Mutex<Inner>>,
    events: Arc<EventHub>,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new(SupervisorOptions::default())
    }
}

impl Supervisor {
    pub fn new(options: SupervisorOptions) -> Self {
        Self {
            options,
            inner: Arc::new(Mutex::new(Inner {
                state: SupervisorState::NotStarted,
                handle: None,
                stop_requested: false,
            })),
            events: Arc::new(EventHub::default()),
        }
    }

    pub fn options(&self) -> SupervisorOptions {
        self.options
    }

    /// Receive every event emitted from now on.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SupervisorEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> SupervisorState {
        self.lock().state
    }

    /// PID of the current backend, if one is running.
    pub fn pid(&self) -> Option<u32> {
        self.lock().handle.as_ref().map(BackendProcessHandle::pid)
    }

    /// Handle of the current backend, if one is running.
    pub fn handle(&self) -> Option<BackendProcessHandle> {
        self.lock().handle.clone()
    }

    /// Spawn the backend described by `plan`.
    ///
    /// Only valid from `NotStarted`, `Stopped` or `Failed`; anything else is
    /// rejected with [`ShellError::AlreadyRunning`] and spawns nothing. The
    /// previous backend also counts as running until its exit is published.
    pub async fn start(&self, plan: &LaunchPlan) -> Result<u32> {
        {
            let mut inner = self.lock();
            if !inner.state.can_start() || inner.handle.is_some() {
                return Err(ShellError::AlreadyRunning {
                    pid: inner.handle.as_ref().map(BackendProcessHandle::pid),
                });
            }
            if inner.state != SupervisorState::NotStarted {
                inner.apply(Transition::Reset);
            }
            inner.apply(Transition::Start);
            inner.stop_requested = false;
        }

        info!(
            "Starting backend: {} {:?} (cwd {})",
            plan.program(),
            plan.args(),
            plan.working_dir().display()
        );

        let mut cmd = plan.command();
        cmd.kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                error!("Failed to spawn backend {}: {}", plan.program(), e);
                self.lock().apply(Transition::SpawnFailed);
                return Err(ShellError::SpawnFailed {
                    program: plan.program().to_string(),
                    message: e.to_string(),
                    source: Some(e),
                });
            }
        };

        let Some(pid) = child.id() else {
            self.lock().apply(Transition::SpawnFailed);
            return Err(ShellError::SpawnFailed {
                program: plan.program().to_string(),
                message: "process exited before its PID could be read".to_string(),
                source: None,
            });
        };

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (exit_tx, exit_rx) = watch::channel(None);

        {
            let mut inner = self.lock();
            inner.handle = Some(BackendProcessHandle::new(
                pid,
                stdin,
                plan.output_mode(),
                exit_rx,
            ));
            inner.apply(Transition::Spawned);
            // Emitted before the relay exists, so it precedes all output
            self.events.emit(SupervisorEvent::Started { pid });
        }
        info!("Backend started with PID {}", pid);

        let stdout_task = stdout.map(|out| {
            let hub = Arc::clone(&self.events);
            tokio::spawn(async move { relay::relay_stdout(out, &hub).await })
        });
        if let Some(err) = stderr {
            tokio::spawn(relay::relay_stderr(err));
        }

        tokio::spawn(monitor(
            child,
            pid,
            stdout_task,
            Arc::clone(&self.inner),
            Arc::clone(&self.events),
            exit_tx,
        ));

        Ok(pid)
    }

    /// Write `text` and a newline to the backend's stdin.
    ///
    /// Returns `Ok(false)` without writing when the backend is not running
    /// or `stop` already closed its stdin. A backend that closed its own end
    /// surfaces as [`ShellError::Io`].
    pub async fn send(&self, text: &str) -> Result<bool> {
        let handle = {
            let inner = self.lock();
            if inner.state != SupervisorState::Running {
                debug!("Dropping command, backend is {:?}", inner.state);
                return Ok(false);
            }
            inner.handle.clone()
        };
        let Some(handle) = handle else {
            return Ok(false);
        };

        handle.write_line(text).await.map_err(|e| {
            warn!("Failed to write to backend PID {}: {}", handle.pid(), e);
            ShellError::from(e)
        })
    }

    /// Terminate the backend and its whole process tree.
    ///
    /// Sends a polite request, escalates to a forced kill after the grace
    /// period, and returns once the backend has been reaped. Calling it with
    /// no backend running is a no-op, so repeated calls are harmless.
    ///
    /// A backend that already exited keeps the outcome it exited with; only
    /// its leftover descendants are killed.
    pub async fn stop(&self) -> Result<()> {
        let handle = {
            let mut inner = self.lock();
            let Some(handle) = inner.handle.clone() else {
                debug!("Stop requested with no backend running");
                return Ok(());
            };
            if !inner.state.is_active() {
                drop(inner);
                return kill_leftovers(handle.pid());
            }
            inner.stop_requested = true;
            inner.apply(Transition::StopRequested);
            handle
        };

        let pid = handle.pid();
        let mut exit_rx = handle.exit_receiver();
        info!("Stopping backend PID {}", pid);

        handle.close_stdin().await;
        if let Err(e) = platform::signal_process_tree(pid, Termination::Graceful) {
            warn!("Graceful termination of PID {} failed: {}", pid, e);
        }

        if !wait_for_exit(&mut exit_rx, self.options.grace_period).await {
            let timeout = ShellError::TerminationTimeout {
                pid,
                grace: self.options.grace_period,
            };
            warn!("{}, forcing termination", timeout);

            platform::signal_process_tree(pid, Termination::Forceful)?;
            if !wait_for_exit(&mut exit_rx, self.options.kill_wait).await {
                return Err(ShellError::TerminationFailed {
                    pid,
                    message: format!("still running {:?} after forced kill", self.options.kill_wait),
                });
            }
        }

        kill_leftovers(pid)?;
        info!("Backend PID {} stopped", pid);
        Ok(())
    }

    /// Wait for the current backend to exit.
    ///
    /// Returns `None` when no backend is running.
    pub async fn wait(&self) -> Option<ExitReport> {
        let mut exit_rx = self.handle()?.exit_receiver();
        let report = exit_rx.wait_for(Option::is_some).await.ok()?.clone();
        report
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        lock_inner(&self.inner)
    }
}

fn lock_inner(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Kill descendants that outlived the backend itself.
fn kill_leftovers(pid: u32) -> Result<()> {
    if platform::is_process_tree_alive(pid) {
        debug!("Process tree {} outlived its root, killing it", pid);
        platform::signal_process_tree(pid, Termination::Forceful)?;
    }
    Ok(())
}

/// Wait up to `limit` for the monitor to publish an exit.
///
/// A dropped sender means the monitor is gone and counts as exited.
async fn wait_for_exit(rx: &mut watch::Receiver<Option<ExitReport>>, limit: Duration) -> bool {
    tokio::time::timeout(limit, rx.wait_for(Option::is_some))
        .await
        .is_ok()
}

/// Reap the child, settle the state and publish the exit.
async fn monitor(
    mut child: Child,
    pid: u32,
    stdout_task: Option<JoinHandle<()>>,
    shared: Arc<Mutex<Inner>>,
    events: Arc<EventHub>,
    exit_tx: watch::Sender<Option<ExitReport>>,
) {
    let code = match child.wait().await {
        Ok(status) => status.code(),
        Err(e) => {
            error!("Failed to wait for backend PID {}: {}", pid, e);
            None
        }
    };

    // The outcome is fixed at reap time; a stop() arriving during the
    // drain below must not turn a crash into a requested stop.
    let report = {
        let mut inner = lock_inner(&shared);
        let requested = inner.stop_requested;
        if !inner.apply(Transition::Exited { code, requested }) {
            inner.state = if requested {
                SupervisorState::Stopped
            } else {
                SupervisorState::Failed
            };
        }
        ExitReport {
            pid,
            code,
            stop_requested: requested,
            state: inner.state,
        }
    };

    // Deliver the tail of stdout before announcing the exit
    if let Some(task) = stdout_task {
        if tokio::time::timeout(SupervisorConfig::RELAY_DRAIN_TIMEOUT, task)
            .await
            .is_err()
        {
            debug!("Backend stdout still open after exit, not waiting for it");
        }
    }

    let uptime = lock_inner(&shared)
        .handle
        .take()
        .map(|handle| handle.uptime())
        .unwrap_or_default();

    if report.is_clean() {
        info!(
            "Backend PID {} exited (code {:?}) after {:.1}s",
            pid,
            code,
            uptime.as_secs_f64()
        );
    } else {
        error!(
            "Backend PID {} exited unexpectedly (code {:?}) after {:.1}s",
            pid,
            code,
            uptime.as_secs_f64()
        );
    }

    exit_tx.send_replace(Some(report.clone()));
    events.emit(SupervisorEvent::Exited(report.clone()));
    if report.state == SupervisorState::Failed {
        events.emit(SupervisorEvent::FatalExit(report));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_idle_supervisor() {
        let supervisor = Supervisor::default();
        assert_eq!(supervisor.state(), SupervisorState::NotStarted);
        assert_eq!(supervisor.pid(), None);
        assert!(!supervisor.send("ls").await.unwrap());
        assert!(supervisor.stop().await.is_ok());
        assert!(supervisor.wait().await.is_none());
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let supervisor = Supervisor::default();
        let temp = tempfile::TempDir::new().unwrap();
        let plan = LaunchPlan::new(
            "definitely-not-an-interpreter-7f3a",
            temp.path().join("agent_backend.py"),
            temp.path(),
        );

        let err = supervisor.start(&plan).await.unwrap_err();
        assert!(matches!(err, ShellError::SpawnFailed { .. }));
        assert_eq!(supervisor.state(), SupervisorState::Failed);
        // A failed start may be retried
        assert!(supervisor.state().can_start());
    }

    #[test]
    fn test_options_from_config() {
        let config = ShellConfig {
            grace_period_ms: 250,
            ..Default::default()
        };
        let options = SupervisorOptions::from_config(&config);
        assert_eq!(options.grace_period, Duration::from_millis(250));
        assert_eq!(options.kill_wait, SupervisorConfig::KILL_WAIT);
    }
}
