//! Launch plans: the resolved backend invocation handed to the supervisor.

use crate::config::{ShellConfig, SupervisorConfig};
use crate::entry::{DeploymentMode, EntryCandidates, EntryResolver, ResolvedEntry};
use crate::error::Result;
use crate::platform;
use crate::runtime::{ResolvedRuntime, RuntimeCandidates, RuntimeLocator};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

/// Where the backend's output goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// stdout is relayed to subscribers, stderr to the log.
    #[default]
    Piped,
    /// stdout and stderr go straight to the shell's console.
    Inherit,
}

/// How to run the backend: `<program> -u <entry_point> [args...]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    program: String,
    entry_point: PathBuf,
    extra_args: Vec<String>,
    working_dir: PathBuf,
    env_vars: BTreeMap<String, String>,
    output_mode: OutputMode,
}

impl LaunchPlan {
    /// Create a plan with the encoding overrides already applied.
    pub fn new(
        program: impl Into<String>,
        entry_point: impl Into<PathBuf>,
        working_dir: impl Into<PathBuf>,
    ) -> Self {
        let env_vars = SupervisorConfig::ENV_OVERRIDES
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();

        Self {
            program: program.into(),
            entry_point: entry_point.into(),
            extra_args: vec![],
            working_dir: working_dir.into(),
            env_vars,
            output_mode: OutputMode::Piped,
        }
    }

    /// Plan for a located runtime and a resolved entry point.
    pub fn from_resolution(runtime: &ResolvedRuntime, entry: &ResolvedEntry) -> Self {
        Self::new(&runtime.program, &entry.entry_point, &entry.working_dir)
    }

    /// Locate the runtime, then resolve the entry point, as configured.
    ///
    /// Either failure aborts: no plan means no spawn.
    pub async fn resolve(config: &ShellConfig) -> Result<Self> {
        let candidates = config
            .runtime_candidates
            .clone()
            .map(RuntimeCandidates::new)
            .unwrap_or_else(RuntimeCandidates::platform_default);
        let runtime = RuntimeLocator::new(candidates).locate().await?;

        let mode = config.deployment_mode();
        let root = match (mode, &config.install_root, &config.app_dir) {
            (DeploymentMode::Packaged, Some(root), _) => root.clone(),
            (DeploymentMode::Packaged, None, _) => platform::executable_dir()?,
            (DeploymentMode::Development, _, Some(dir)) => dir.clone(),
            (DeploymentMode::Development, _, None) => platform::current_dir()?,
        };
        let entry = EntryResolver::new(
            EntryCandidates::for_mode(mode, &root, &config.entry_file),
            &root,
        )
        .resolve()?;

        let output_mode = if config.inherit_console {
            OutputMode::Inherit
        } else {
            OutputMode::Piped
        };

        Ok(Self::from_resolution(&runtime, &entry)
            .with_args(config.extra_args.clone())
            .with_envs(config.extra_env.clone())
            .with_output_mode(output_mode))
    }

    /// Append arguments after the entry point.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.extra_args.extend(args);
        self
    }

    /// Add an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.insert(key.into(), value.into());
        self
    }

    /// Add several environment variables.
    pub fn with_envs(mut self, vars: BTreeMap<String, String>) -> Self {
        self.env_vars.extend(vars);
        self
    }

    pub fn with_output_mode(mut self, mode: OutputMode) -> Self {
        self.output_mode = mode;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn entry_point(&self) -> &Path {
        &self.entry_point
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn env_vars(&self) -> &BTreeMap<String, String> {
        &self.env_vars
    }

    pub fn output_mode(&self) -> OutputMode {
        self.output_mode
    }

    /// Full argument list after the program name.
    pub fn args(&self) -> Vec<OsString> {
        let mut args = vec![
            OsString::from(SupervisorConfig::UNBUFFERED_ARG),
            self.entry_point.clone().into_os_string(),
        ];
        args.extend(self.extra_args.iter().map(OsString::from));
        args
    }

    /// Build the command. The inherited environment is kept; overrides win.
    pub(crate) fn command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(self.args())
            .current_dir(&self.working_dir)
            .envs(&self.env_vars)
            .stdin(Stdio::piped());

        match self.output_mode {
            OutputMode::Piped => {
                cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
            }
            OutputMode::Inherit => {
                cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
            }
        }

        platform::configure_process_tree(&mut cmd);
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_defaults() {
        let plan = LaunchPlan::new("python3", "/app/agent_backend.py", "/app");

        assert_eq!(
            plan.args(),
            vec![
                OsString::from("-u"),
                OsString::from("/app/agent_backend.py")
            ]
        );
        assert_eq!(plan.env_vars().get("PYTHONIOENCODING").unwrap(), "utf-8");
        assert_eq!(plan.env_vars().get("PYTHONUTF8").unwrap(), "1");
        assert_eq!(plan.env_vars().get("PYTHONUNBUFFERED").unwrap(), "1");
        assert_eq!(plan.output_mode(), OutputMode::Piped);
    }

    #[test]
    fn test_plan_builder() {
        let plan = LaunchPlan::new("python3", "/app/agent_backend.py", "/app")
            .with_args(vec!["--headless".into()])
            .with_env("PYTHONIOENCODING", "utf-8:replace")
            .with_env("OPENAI_MODEL", "gpt-4o")
            .with_output_mode(OutputMode::Inherit);

        assert_eq!(plan.args().last().unwrap(), "--headless");
        assert_eq!(
            plan.env_vars().get("PYTHONIOENCODING").unwrap(),
            "utf-8:replace"
        );
        assert_eq!(plan.env_vars().get("OPENAI_MODEL").unwrap(), "gpt-4o");
        assert_eq!(plan.output_mode(), OutputMode::Inherit);
    }

    #[test]
    fn test_from_resolution() {
        let runtime = ResolvedRuntime {
            program: "python".into(),
            version: "Python 3.11.9".into(),
        };
        let entry = ResolvedEntry {
            entry_point: PathBuf::from("/opt/shell/resources/backend/agent_backend.py"),
            working_dir: PathBuf::from("/opt/shell/resources/backend"),
            mode: DeploymentMode::Packaged,
        };

        let plan = LaunchPlan::from_resolution(&runtime, &entry);
        assert_eq!(plan.program(), "python");
        assert_eq!(plan.working_dir(), Path::new("/opt/shell/resources/backend"));
        assert_eq!(plan.entry_point(), entry.entry_point.as_path());
    }

    #[tokio::test]
    async fn test_resolve_fails_without_runtime() {
        let config = ShellConfig {
            runtime_candidates: Some(vec!["definitely-not-an-interpreter-7f3a".into()]),
            ..Default::default()
        };
        let err = LaunchPlan::resolve(&config).await.unwrap_err();
        assert!(matches!(err, crate::ShellError::RuntimeNotFound { .. }));
    }
}
