//! Backend runtime discovery.
//!
//! Probes candidate interpreter names in priority order and picks the first
//! one that answers a version query. A failed probe is an expected outcome
//! and only moves on to the next candidate.

use crate::config::SupervisorConfig;
use crate::error::{Result, ShellError};
use crate::platform;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Ordered interpreter names to probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeCandidates(Vec<String>);

impl RuntimeCandidates {
    pub fn new(names: Vec<String>) -> Self {
        Self(names)
    }

    /// The platform's default ordering.
    pub fn platform_default() -> Self {
        Self(platform::default_runtime_candidates())
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

/// Result of probing a single candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The candidate ran and reported a version.
    Available { version: String },
    /// The candidate is missing or broken.
    Unavailable { reason: String },
}

/// How a runtime candidate is checked.
#[async_trait]
pub trait RuntimeProbe: Send + Sync {
    async fn probe(&self, program: &str) -> ProbeOutcome;
}

/// Probe that runs `<program> --version` and waits for a successful exit.
#[derive(Debug, Clone)]
pub struct CommandProbe {
    version_arg: String,
    timeout: Duration,
}

impl Default for CommandProbe {
    fn default() -> Self {
        Self {
            version_arg: SupervisorConfig::VERSION_ARG.to_string(),
            timeout: SupervisorConfig::RUNTIME_PROBE_TIMEOUT,
        }
    }
}

impl CommandProbe {
    /// Set the timeout for a single probe.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl RuntimeProbe for CommandProbe {
    async fn probe(&self, program: &str) -> ProbeOutcome {
        let output = tokio::process::Command::new(program)
            .arg(&self.version_arg)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(self.timeout, output).await {
            Ok(Ok(output)) if output.status.success() => {
                // Older interpreters print the version on stderr
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);
                let version = stdout
                    .lines()
                    .chain(stderr.lines())
                    .map(str::trim)
                    .find(|line| !line.is_empty())
                    .unwrap_or_default()
                    .to_string();
                ProbeOutcome::Available { version }
            }
            Ok(Ok(output)) => ProbeOutcome::Unavailable {
                reason: format!("exited with {}", output.status),
            },
            Ok(Err(e)) => ProbeOutcome::Unavailable {
                reason: e.to_string(),
            },
            Err(_) => ProbeOutcome::Unavailable {
                reason: format!("no answer within {:?}", self.timeout),
            },
        }
    }
}

/// A runtime that answered its probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRuntime {
    /// Executable name or path as listed in the candidates.
    pub program: String,
    /// First line of the version output (may be empty).
    pub version: String,
}

/// Locates the backend runtime among prioritized candidates.
pub struct RuntimeLocator<P = CommandProbe> {
    candidates: RuntimeCandidates,
    probe: P,
}

impl RuntimeLocator<CommandProbe> {
    /// Create a locator using the command probe.
    pub fn new(candidates: RuntimeCandidates) -> Self {
        Self::with_probe(candidates, CommandProbe::default())
    }
}

impl<P: RuntimeProbe> RuntimeLocator<P> {
    /// Create a locator with a custom probe.
    pub fn with_probe(candidates: RuntimeCandidates, probe: P) -> Self {
        Self { candidates, probe }
    }

    pub fn candidates(&self) -> &RuntimeCandidates {
        &self.candidates
    }

    /// Return the first candidate that answers its probe.
    ///
    /// Candidates are probed one at a time, in order.
    pub async fn locate(&self) -> Result<ResolvedRuntime> {
        for program in self.candidates.as_slice() {
            match self.probe.probe(program).await {
                ProbeOutcome::Available { version } => {
                    info!("Using backend runtime {} ({})", program, version);
                    return Ok(ResolvedRuntime {
                        program: program.clone(),
                        version,
                    });
                }
                ProbeOutcome::Unavailable { reason } => {
                    debug!("Runtime candidate {} unavailable: {}", program, reason);
                }
            }
        }

        warn!(
            "No backend runtime found among {:?}",
            self.candidates.as_slice()
        );
        Err(ShellError::RuntimeNotFound {
            candidates: self.candidates.as_slice().to_vec(),
        })
    }
}
