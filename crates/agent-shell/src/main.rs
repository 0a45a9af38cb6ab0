//! Agent Shell - console front-end for the agent backend.
//!
//! Locates the backend interpreter and entry point, launches the backend
//! under supervision, and relays commands and output until Ctrl-C or the
//! backend exits. A crashed backend ends the shell with a non-zero status.

mod console;
mod registration;

use agent_shell_core::{
    AppConfig, DeepLink, LaunchPlan, ShellConfig, ShellError, Supervisor, SupervisorOptions,
};
use anyhow::{Context, Result};
use clap::Parser;
use console::{ConsoleExit, ConsoleOptions};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "agent-shell")]
#[command(about = "Launch and supervise the agent backend")]
struct Args {
    /// Configuration file (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run from an installed package layout
    #[arg(long)]
    packaged: bool,

    /// Installation root for packaged mode
    #[arg(long)]
    install_root: Option<PathBuf>,

    /// Application directory for development mode
    #[arg(long)]
    app_dir: Option<PathBuf>,

    /// Interpreter to probe (repeatable, in priority order)
    #[arg(long = "runtime")]
    runtimes: Vec<String>,

    /// Backend entry point file name
    #[arg(long)]
    entry: Option<String>,

    /// Port the backend serves on
    #[arg(short, long)]
    port: Option<u16>,

    /// Let the backend write directly to this console
    #[arg(long)]
    inherit_console: bool,

    /// Register the URI scheme handler and exit
    #[arg(long)]
    register_scheme: bool,

    /// Print one JSON object per event
    #[arg(long)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Deep links passed by the operating system
    links: Vec<String>,
}

impl Args {
    /// Command-line flags win over the configuration file.
    fn apply_to(&self, config: &mut ShellConfig) {
        if self.packaged {
            config.packaged = true;
        }
        if let Some(root) = &self.install_root {
            config.install_root = Some(root.clone());
        }
        if let Some(dir) = &self.app_dir {
            config.app_dir = Some(dir.clone());
        }
        if !self.runtimes.is_empty() {
            config.runtime_candidates = Some(self.runtimes.clone());
        }
        if let Some(entry) = &self.entry {
            config.entry_file = entry.clone();
        }
        if let Some(port) = self.port {
            config.backend_port = port;
        }
        if self.inherit_console {
            config.inherit_console = true;
        }
    }
}

fn init_logging(debug: bool) {
    let log_level = if debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str().to_ascii_lowercase()));

    // Logs go to stderr; stdout carries backend output
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();
}

async fn run(args: Args) -> Result<ExitCode> {
    let mut config = ShellConfig::load_or_default(args.config.as_deref())
        .context("Failed to load configuration")?;
    args.apply_to(&mut config);
    config.validate()?;

    if args.register_scheme {
        let outcomes = registration::register_scheme(&config.uri_scheme).await?;
        for outcome in &outcomes {
            info!(
                "{} -> {}",
                outcome.step.display(),
                if outcome.success { "ok" } else { "failed (ignored)" }
            );
        }
        return Ok(ExitCode::SUCCESS);
    }

    let deep_link = DeepLink::find_in_args(&args.links, &config.uri_scheme)?;
    if let Some(link) = &deep_link {
        info!("Launched from deep link {}://{}", link.protocol, link.host);
    }

    let plan = LaunchPlan::resolve(&config)
        .await
        .context("Failed to prepare the backend")?;
    let supervisor = Supervisor::new(SupervisorOptions::from_config(&config));

    let options = ConsoleOptions {
        json: args.json,
        markers: config.markers.clone(),
        seed_command: deep_link.and_then(|link| link.seed_command().map(str::to_string)),
        backend_url: config.backend_url(),
    };

    match console::run(&supervisor, &plan, options).await? {
        ConsoleExit::Interrupted => Ok(ExitCode::SUCCESS),
        ConsoleExit::BackendExited(report) => match report.to_error() {
            None => Ok(ExitCode::SUCCESS),
            Some(err) => Err(err.into()),
        },
    }
}

/// Exit status for a failed run.
fn exit_status(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<ShellError>()
        .map(ShellError::exit_code)
        .and_then(|code| u8::try_from(code).ok())
        .unwrap_or(1)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.debug);

    info!(
        "Starting {} on {}",
        AppConfig::APP_NAME,
        agent_shell_core::platform::current_platform()
    );

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(exit_status(&e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_flags_override_config() {
        let args = Args::parse_from([
            "agent-shell",
            "--packaged",
            "--runtime",
            "python3.12",
            "--runtime",
            "python3",
            "--port",
            "9100",
            "--entry",
            "main.py",
            "agentshell://run?task=hi",
        ]);
        let mut config = ShellConfig {
            grace_period_ms: 1000,
            ..Default::default()
        };
        args.apply_to(&mut config);

        assert!(config.packaged);
        assert_eq!(
            config.runtime_candidates,
            Some(vec!["python3.12".to_string(), "python3".to_string()])
        );
        assert_eq!(config.backend_url(), "http://localhost:9100");
        assert_eq!(config.entry_file, "main.py");
        assert_eq!(config.grace_period_ms, 1000);
        assert_eq!(args.links, vec!["agentshell://run?task=hi".to_string()]);
    }

    #[test]
    fn test_unset_flags_keep_config() {
        let args = Args::parse_from(["agent-shell"]);
        let mut config = ShellConfig {
            runtime_candidates: Some(vec!["py".into()]),
            ..Default::default()
        };
        args.apply_to(&mut config);
        assert_eq!(config.runtime_candidates, Some(vec!["py".to_string()]));
        assert!(!config.packaged);
    }

    #[test]
    fn test_exit_codes() {
        let err: anyhow::Error = ShellError::UnexpectedExit { code: Some(1) }.into();
        assert_eq!(exit_status(&err), 5);

        let err = anyhow::Error::from(ShellError::RuntimeNotFound { candidates: vec![] })
            .context("Failed to prepare the backend");
        assert_eq!(exit_status(&err), 3);

        assert_eq!(exit_status(&anyhow::anyhow!("other")), 1);
    }
}
