//! URI scheme registration with the operating system.
//!
//! Registration is a fixed list of external commands run one after another.
//! Each step's outcome is recorded; a failing step aborts the sequence
//! unless it is marked as allowed to fail.

use agent_shell_core::AppConfig;
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::fmt::Write as FmtWrite;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tracing::{debug, info, warn};

/// One external command of the registration sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SetupStep {
    pub program: String,
    pub args: Vec<String>,
    pub allow_failure: bool,
}

impl SetupStep {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            allow_failure: false,
        }
    }

    pub fn allow_failure(mut self) -> Self {
        self.allow_failure = true;
        self
    }

    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// What happened when a step ran.
#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    pub step: SetupStep,
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stderr: String,
}

/// Run `steps` in order, stopping at the first failure that is not allowed.
pub async fn run_steps(steps: &[SetupStep]) -> Result<Vec<StepOutcome>> {
    let mut outcomes = Vec::with_capacity(steps.len());

    for step in steps {
        debug!("Running setup step: {}", step.display());
        let result = tokio::process::Command::new(&step.program)
            .args(&step.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await;

        let outcome = match result {
            Ok(output) => StepOutcome {
                step: step.clone(),
                success: output.status.success(),
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            },
            Err(e) => StepOutcome {
                step: step.clone(),
                success: false,
                exit_code: None,
                stderr: e.to_string(),
            },
        };

        if !outcome.success {
            if step.allow_failure {
                warn!(
                    "Setup step failed (ignored): {}: {}",
                    step.display(),
                    outcome.stderr
                );
            } else {
                bail!(
                    "Setup step failed: {} (exit code {:?}): {}",
                    step.display(),
                    outcome.exit_code,
                    outcome.stderr
                );
            }
        }
        outcomes.push(outcome);
    }

    Ok(outcomes)
}

/// Registry steps mapping `scheme` to `exe` for the current user.
pub fn windows_registry_steps(scheme: &str, exe: &Path) -> Vec<SetupStep> {
    let key = format!(r"HKCU\Software\Classes\{}", scheme);
    let command_key = format!(r"{}\shell\open\command", key);
    let description = format!("URL:{} Protocol", AppConfig::APP_NAME);
    let command = format!("\"{}\" \"%1\"", exe.display());

    vec![
        SetupStep::new("reg", &["add", &key, "/ve", "/d", &description, "/f"]),
        SetupStep::new("reg", &["add", &key, "/v", "URL Protocol", "/d", "", "/f"]),
        SetupStep::new("reg", &["add", &command_key, "/ve", "/d", &command, "/f"]),
    ]
}

/// XDG steps making the installed desktop entry the handler for `scheme`.
pub fn linux_desktop_steps(scheme: &str, applications_dir: &Path) -> Vec<SetupStep> {
    let mime = format!("x-scheme-handler/{}", scheme);
    let dir = applications_dir.display().to_string();

    vec![
        SetupStep::new("xdg-mime", &["default", AppConfig::DESKTOP_FILE_NAME, &mime]),
        // Only refreshes the menu cache
        SetupStep::new("update-desktop-database", &[&dir]).allow_failure(),
    ]
}

/// Desktop entry content for a scheme handler.
pub fn desktop_entry(exe: &Path, scheme: &str) -> String {
    let mut content = String::new();
    let _ = writeln!(content, "[Desktop Entry]");
    let _ = writeln!(content, "Name={}", AppConfig::APP_NAME);
    let _ = writeln!(content, "Exec=\"{}\" %u", exe.display());
    let _ = writeln!(content, "Terminal=true");
    let _ = writeln!(content, "Type=Application");
    let _ = writeln!(content, "NoDisplay=true");
    let _ = writeln!(content, "MimeType=x-scheme-handler/{};", scheme);
    content
}

/// Write the handler desktop entry into `applications_dir`.
pub fn write_desktop_entry(applications_dir: &Path, exe: &Path, scheme: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(applications_dir)
        .with_context(|| format!("Failed to create {}", applications_dir.display()))?;

    let path = applications_dir.join(AppConfig::DESKTOP_FILE_NAME);
    std::fs::write(&path, desktop_entry(exe, scheme))
        .with_context(|| format!("Failed to write {}", path.display()))?;

    debug!("Wrote desktop entry to {}", path.display());
    Ok(path)
}

/// Register `scheme` for the running executable on this platform.
pub async fn register_scheme(scheme: &str) -> Result<Vec<StepOutcome>> {
    let exe = std::env::current_exe().context("Failed to locate the shell executable")?;
    let steps = platform_steps(scheme, &exe)?;

    if steps.is_empty() {
        warn!("URI scheme registration is not supported on this platform");
        return Ok(vec![]);
    }

    let outcomes = run_steps(&steps).await?;
    info!("Registered {}:// handler ({} steps)", scheme, outcomes.len());
    Ok(outcomes)
}

#[cfg(windows)]
fn platform_steps(scheme: &str, exe: &Path) -> Result<Vec<SetupStep>> {
    Ok(windows_registry_steps(scheme, exe))
}

#[cfg(all(unix, not(target_os = "macos")))]
fn platform_steps(scheme: &str, exe: &Path) -> Result<Vec<SetupStep>> {
    let applications_dir = dirs::data_dir()
        .context("No user data directory")?
        .join("applications");
    write_desktop_entry(&applications_dir, exe, scheme)?;
    Ok(linux_desktop_steps(scheme, &applications_dir))
}

#[cfg(not(any(windows, all(unix, not(target_os = "macos")))))]
fn platform_steps(_scheme: &str, _exe: &Path) -> Result<Vec<SetupStep>> {
    Ok(vec![])
}
