//! Centralized configuration for the agent shell.
//!
//! Fixed values live in constant tables; everything a deployment may want to
//! change is carried by [`ShellConfig`], which is loaded from an optional JSON
//! file and then overridden by command-line flags in the binary.

use crate::entry::DeploymentMode;
use crate::error::{Result, ShellError};
use crate::protocol::BackendMarkers;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Application-level configuration.
pub struct AppConfig;

impl AppConfig {
    pub const APP_NAME: &'static str = "Agent Shell";
    pub const URI_SCHEME: &'static str = "agentshell";
    pub const DESKTOP_FILE_NAME: &'static str = "agent-shell.desktop";
    pub const CONFIG_DIR_NAME: &'static str = "agent-shell";
    pub const CONFIG_FILENAME: &'static str = "config.json";
}

/// Timing and invocation constants for the backend supervisor.
pub struct SupervisorConfig;

impl SupervisorConfig {
    // Termination
    pub const GRACE_PERIOD: Duration = Duration::from_secs(5);
    pub const KILL_WAIT: Duration = Duration::from_secs(2);

    // Runtime probing
    pub const RUNTIME_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
    pub const VERSION_ARG: &'static str = "--version";

    // Output relay
    pub const RELAY_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);
    pub const RELAY_READ_BUFFER: usize = 8192;

    /// Interpreter flag forcing unbuffered standard streams.
    pub const UNBUFFERED_ARG: &'static str = "-u";

    /// Environment overrides forcing UTF-8 text and unbuffered output.
    pub const ENV_OVERRIDES: [(&'static str, &'static str); 3] = [
        ("PYTHONIOENCODING", "utf-8"),
        ("PYTHONUTF8", "1"),
        ("PYTHONUNBUFFERED", "1"),
    ];
}

/// The backend's local HTTP endpoint. The shell only advertises it.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const BACKEND_HOST: &'static str = "localhost";
    pub const BACKEND_PORT: u16 = 8999;
}

/// Defaults of the backend stdio contract.
pub struct BackendProtocolConfig;

impl BackendProtocolConfig {
    pub const DEFAULT_ENTRY_FILE: &'static str = "agent_backend.py";
    pub const END_OF_TASK_MARKER: &'static str = "<END_OF_TASK>";
    /// "Agent ready. Enter a command."
    pub const READY_PHRASE: &'static str = "에이전트 준비 완료";
    /// "Browser initialization complete"
    pub const BROWSER_READY_PHRASE: &'static str = "브라우저 초기화 완료";
    pub const ERROR_PREFIX: &'static str = "ERROR:";
    /// "Agent execution error"
    pub const ERROR_PHRASE: &'static str = "에이전트 실행 오류";
}

/// Deployment-tunable shell settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ShellConfig {
    /// Interpreter names to probe, in priority order. `None` uses the platform default.
    pub runtime_candidates: Option<Vec<String>>,
    /// File name of the backend entry point.
    pub entry_file: String,
    /// Whether the shell runs from an installed package.
    pub packaged: bool,
    /// Installation root for packaged mode (defaults to the executable's directory).
    pub install_root: Option<PathBuf>,
    /// Application directory for development mode (defaults to the current directory).
    pub app_dir: Option<PathBuf>,
    /// Extra arguments appended after the entry point.
    pub extra_args: Vec<String>,
    /// Extra environment variables for the backend.
    pub extra_env: BTreeMap<String, String>,
    /// Grace period between polite and forced termination.
    pub grace_period_ms: u64,
    /// Port the backend serves on.
    pub backend_port: u16,
    /// Custom URI scheme handled by the shell.
    pub uri_scheme: String,
    /// Let the backend write straight to the shell's console.
    pub inherit_console: bool,
    /// Output markers of the backend stdio contract.
    pub markers: BackendMarkers,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            runtime_candidates: None,
            entry_file: BackendProtocolConfig::DEFAULT_ENTRY_FILE.to_string(),
            packaged: false,
            install_root: None,
            app_dir: None,
            extra_args: vec![],
            extra_env: BTreeMap::new(),
            grace_period_ms: SupervisorConfig::GRACE_PERIOD.as_millis() as u64,
            backend_port: NetworkConfig::BACKEND_PORT,
            uri_scheme: AppConfig::URI_SCHEME.to_string(),
            inherit_console: false,
            markers: BackendMarkers::default(),
        }
    }
}

impl ShellConfig {
    /// Load configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ShellError::io_with_path(e, path))?;
        let config: ShellConfig = serde_json::from_str(&content)?;
        config.validate()?;
        debug!("Loaded shell config from {}", path.display());
        Ok(config)
    }

    /// Load configuration from `path`, or the default location, falling back
    /// to defaults when no file exists.
    ///
    /// An explicitly given path must exist.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => match Self::default_path() {
                Some(path) if path.is_file() => Self::load(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    /// Default configuration file location.
    ///
    /// # Platform Behavior
    /// - **Linux**: `~/.config/agent-shell/config.json`
    /// - **Windows**: `%APPDATA%\agent-shell\config.json`
    /// - **macOS**: `~/Library/Application Support/agent-shell/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| {
            dir.join(AppConfig::CONFIG_DIR_NAME)
                .join(AppConfig::CONFIG_FILENAME)
        })
    }

    /// Reject values the supervisor cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.entry_file.trim().is_empty() {
            return Err(ShellError::Config {
                message: "entry_file must not be empty".to_string(),
            });
        }
        if matches!(&self.runtime_candidates, Some(list) if list.is_empty()) {
            return Err(ShellError::Config {
                message: "runtime_candidates must not be empty when set".to_string(),
            });
        }
        if self.uri_scheme.is_empty()
            || !self
                .uri_scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        {
            return Err(ShellError::Config {
                message: format!("invalid uri_scheme: {:?}", self.uri_scheme),
            });
        }
        if self.markers.end_of_task.is_empty() {
            return Err(ShellError::Config {
                message: "end-of-task marker must not be empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn deployment_mode(&self) -> DeploymentMode {
        if self.packaged {
            DeploymentMode::Packaged
        } else {
            DeploymentMode::Development
        }
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    /// The link advertised for the backend's HTTP endpoint.
    pub fn backend_url(&self) -> String {
        format!(
            "http://{}:{}",
            NetworkConfig::BACKEND_HOST,
            self.backend_port
        )
    }
}
