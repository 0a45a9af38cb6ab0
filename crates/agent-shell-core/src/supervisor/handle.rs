//! Handle to a running backend process.

use super::events::ExitReport;
use crate::launch::OutputMode;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::ChildStdin;
use tokio::sync::{watch, Mutex};

/// Shared view of one backend run.
///
/// The child itself is owned by the monitor task; this handle carries its
/// stdin and a receiver that resolves once the monitor has reaped it.
#[derive(Debug, Clone)]
pub struct BackendProcessHandle {
    pid: u32,
    stdin: Arc<Mutex<Option<ChildStdin>>>,
    output_mode: OutputMode,
    started_at: Instant,
    exit_rx: watch::Receiver<Option<ExitReport>>,
}

impl BackendProcessHandle {
    pub(crate) fn new(
        pid: u32,
        stdin: Option<ChildStdin>,
        output_mode: OutputMode,
        exit_rx: watch::Receiver<Option<ExitReport>>,
    ) -> Self {
        Self {
            pid,
            stdin: Arc::new(Mutex::new(stdin)),
            output_mode,
            started_at: Instant::now(),
            exit_rx,
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn output_mode(&self) -> OutputMode {
        self.output_mode
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Write `text` plus a newline and flush. Returns `false` if stdin is gone.
    pub(crate) async fn write_line(&self, text: &str) -> std::io::Result<bool> {
        let mut guard = self.stdin.lock().await;
        let Some(stdin) = guard.as_mut() else {
            return Ok(false);
        };

        let mut line = String::with_capacity(text.len() + 1);
        line.push_str(text);
        line.push('\n');
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;
        Ok(true)
    }

    /// Close stdin so the backend sees EOF.
    pub(crate) async fn close_stdin(&self) {
        self.stdin.lock().await.take();
    }

    pub(crate) fn exit_receiver(&self) -> watch::Receiver<Option<ExitReport>> {
        self.exit_rx.clone()
    }
}
