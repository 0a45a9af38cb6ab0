//! Console front-end.
//!
//! Reads commands from stdin, forwards them to the backend once it reports
//! readiness, and renders backend output and status changes either as text
//! or as one JSON object per line.

use agent_shell_core::{
    BackendMarkers, ExitReport, LaunchPlan, OutputEvent, OutputMode, OutputParser, ShellError,
    ShellStatus, Supervisor, SupervisorEvent,
};
use anyhow::Result;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, error, info, warn};

/// Front-end settings.
#[derive(Debug, Clone)]
pub struct ConsoleOptions {
    pub json: bool,
    pub markers: BackendMarkers,
    /// Command to send as soon as the backend is ready.
    pub seed_command: Option<String>,
    pub backend_url: String,
}

/// Why the console loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleExit {
    /// Ctrl-C; the backend was stopped.
    Interrupted,
    /// The backend went away on its own.
    BackendExited(ExitReport),
}

/// A rendered line and where it goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Stdout(String),
    Stderr(String),
}

impl Line {
    fn print(self) {
        match self {
            Line::Stdout(text) => println!("{}", text),
            Line::Stderr(text) => eprintln!("{}", text),
        }
    }
}

/// Formats console output.
#[derive(Debug, Clone, Copy)]
pub struct Renderer {
    json: bool,
}

impl Renderer {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    pub fn banner(&self, backend_url: &str) -> Line {
        if self.json {
            self.json_line("banner", json!({ "backend_url": backend_url }))
        } else {
            Line::Stderr(format!("[shell] backend endpoint: {}", backend_url))
        }
    }

    pub fn output(&self, event: &OutputEvent) -> Option<Line> {
        if self.json {
            return Some(self.json_line("output", to_value(event)));
        }
        match event {
            OutputEvent::Text(text) => Some(Line::Stdout(text.clone())),
            OutputEvent::ErrorText(text) => Some(Line::Stderr(format!("[error] {}", text))),
            // Signals show up through the status line
            _ => None,
        }
    }

    pub fn status(&self, status: &ShellStatus) -> Line {
        if self.json {
            self.json_line("status", to_value(status))
        } else {
            Line::Stderr(format!("[status] {}", status.label()))
        }
    }

    pub fn supervisor(&self, event: &SupervisorEvent) -> Option<Line> {
        if self.json {
            return match event {
                SupervisorEvent::Output { .. } => None,
                other => Some(self.json_line("supervisor", to_value(other))),
            };
        }
        match event {
            SupervisorEvent::Started { pid } => {
                Some(Line::Stderr(format!("[shell] backend started (PID {})", pid)))
            }
            SupervisorEvent::Exited(report) => Some(Line::Stderr(format!(
                "[shell] backend exited (code {})",
                report
                    .code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "none".to_string())
            ))),
            SupervisorEvent::FatalExit(_) => Some(Line::Stderr(
                "[error] backend exited unexpectedly, shutting down".to_string(),
            )),
            SupervisorEvent::Output { .. } => None,
        }
    }

    pub fn command(&self, command: &str) -> Line {
        if self.json {
            self.json_line("command", json!({ "text": command }))
        } else {
            Line::Stderr(format!("> {}", command))
        }
    }

    pub fn dropped(&self, command: &str) -> Line {
        if self.json {
            self.json_line("dropped", json!({ "text": command }))
        } else {
            Line::Stderr(format!("[shell] backend not ready, dropped: {}", command))
        }
    }

    fn json_line(&self, kind: &str, payload: Value) -> Line {
        let line = json!({
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "kind": kind,
            "event": payload,
        });
        Line::Stdout(line.to_string())
    }
}

fn to_value<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Console state between events.
struct Session<'a> {
    supervisor: &'a Supervisor,
    renderer: Renderer,
    parser: OutputParser,
    status: ShellStatus,
    seed_command: Option<String>,
}

impl<'a> Session<'a> {
    fn new(supervisor: &'a Supervisor, options: ConsoleOptions) -> Self {
        Self {
            supervisor,
            renderer: Renderer::new(options.json),
            parser: OutputParser::new(options.markers),
            status: ShellStatus::default(),
            seed_command: options.seed_command,
        }
    }

    async fn on_output(&mut self, text: &str) -> Result<()> {
        for event in self.parser.feed(text) {
            self.on_parsed(event).await?;
        }
        Ok(())
    }

    async fn on_parsed(&mut self, event: OutputEvent) -> Result<()> {
        if let Some(line) = self.renderer.output(&event) {
            line.print();
        }
        if self.status.apply_output(&event) {
            self.renderer.status(&self.status).print();
        }

        if event == OutputEvent::Ready {
            self.send_seed().await?;
        }
        Ok(())
    }

    async fn send_seed(&mut self) -> Result<()> {
        if let Some(seed) = self.seed_command.take() {
            info!("Sending deep link command");
            self.submit(&seed).await?;
        }
        Ok(())
    }

    async fn submit(&mut self, command: &str) -> Result<()> {
        if !self.status.is_ready() {
            self.renderer.dropped(command).print();
            return Ok(());
        }
        match self.supervisor.send(command).await {
            Ok(true) => {
                self.renderer.command(command).print();
                self.status.command_sent();
                self.renderer.status(&self.status).print();
            }
            Ok(false) => self.renderer.dropped(command).print(),
            Err(ShellError::Io { message, .. }) => {
                warn!("Backend is not reading commands: {}", message);
                self.renderer.dropped(command).print();
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn on_supervisor(&mut self, event: &SupervisorEvent) -> Result<()> {
        if let Some(line) = self.renderer.supervisor(event) {
            line.print();
        }
        if self.status.apply_supervisor(event) {
            self.renderer.status(&self.status).print();
        }

        // Inherited output never reaches the parser, so no ready phrase
        // will arrive; the backend takes commands as soon as it runs.
        if matches!(event, SupervisorEvent::Started { .. }) && self.output_inherited() {
            debug!("Backend output is inherited, treating it as ready");
            if self.status.apply_output(&OutputEvent::Ready) {
                self.renderer.status(&self.status).print();
            }
            self.send_seed().await?;
        }
        Ok(())
    }

    fn output_inherited(&self) -> bool {
        self.supervisor
            .handle()
            .is_some_and(|handle| handle.output_mode() == OutputMode::Inherit)
    }
}

/// Start the backend and run the console until Ctrl-C or backend exit.
///
/// Stdin EOF only stops reading commands; the backend keeps running. If the
/// console itself fails, the backend is stopped before the error is returned.
pub async fn run(
    supervisor: &Supervisor,
    plan: &LaunchPlan,
    options: ConsoleOptions,
) -> Result<ConsoleExit> {
    Renderer::new(options.json)
        .banner(&options.backend_url)
        .print();

    let mut events = supervisor.subscribe();
    supervisor.start(plan).await?;

    let mut session = Session::new(supervisor, options);
    let result = drive(&mut session, &mut events).await;
    stop_on_error(supervisor, result).await
}

/// Stop the backend if `result` is an error, then pass it through.
async fn stop_on_error<T>(supervisor: &Supervisor, result: Result<T>) -> Result<T> {
    if let Err(e) = &result {
        error!("Console failed, stopping backend: {:#}", e);
        if let Err(stop_err) = supervisor.stop().await {
            error!("Backend shutdown failed: {}", stop_err);
        }
    }
    result
}

async fn drive(
    session: &mut Session<'_>,
    events: &mut UnboundedReceiver<SupervisorEvent>,
) -> Result<ConsoleExit> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                if let Err(e) = result {
                    warn!("Failed to listen for Ctrl-C: {}", e);
                }
                info!("Shutdown signal received, stopping backend");
                if let Err(e) = session.supervisor.stop().await {
                    error!("Backend shutdown failed: {}", e);
                }
                return Ok(ConsoleExit::Interrupted);
            }

            event = events.recv() => {
                let Some(event) = event else {
                    debug!("Supervisor event channel closed");
                    return Ok(ConsoleExit::Interrupted);
                };

                match &event {
                    SupervisorEvent::Output { text } => session.on_output(text).await?,
                    SupervisorEvent::Exited(report) => {
                        for parsed in session.parser.flush() {
                            session.on_parsed(parsed).await?;
                        }
                        session.on_supervisor(&event).await?;
                        // A crash is followed by its fatal notice
                        while let Ok(pending) = events.try_recv() {
                            session.on_supervisor(&pending).await?;
                        }
                        return Ok(ConsoleExit::BackendExited(report.clone()));
                    }
                    _ => session.on_supervisor(&event).await?,
                }
            }

            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    let command = line.trim();
                    if !command.is_empty() {
                        session.submit(command).await?;
                    }
                }
                Ok(None) => {
                    debug!("Stdin closed, no more commands");
                    stdin_open = false;
                }
                Err(e) => {
                    warn!("Failed to read stdin: {}", e);
                    stdin_open = false;
                }
            },
        }
    }
}
