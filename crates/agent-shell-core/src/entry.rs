//! Backend entry-point resolution.
//!
//! Installed packages and development checkouts keep the backend script in
//! different places. The resolver walks an ordered candidate list and stops
//! at the first file that exists.

use crate::error::{Result, ShellError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Where the shell is running from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentMode {
    /// Installed package; the root is the installation directory.
    Packaged,
    /// Source checkout; the root is the application directory.
    Development,
}

/// Ordered entry-point locations for a deployment mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryCandidates {
    mode: DeploymentMode,
    paths: Vec<PathBuf>,
}

impl EntryCandidates {
    /// Default locations of `entry_file` under `root`.
    ///
    /// - **Packaged**: `resources/backend/`, `resources/app/`, `resources/`, then `root` itself
    /// - **Development**: `root` itself, then `backend/`
    pub fn for_mode(mode: DeploymentMode, root: &Path, entry_file: &str) -> Self {
        let paths = match mode {
            DeploymentMode::Packaged => {
                let resources = root.join("resources");
                vec![
                    resources.join("backend").join(entry_file),
                    resources.join("app").join(entry_file),
                    resources.join(entry_file),
                    root.join(entry_file),
                ]
            }
            DeploymentMode::Development => {
                vec![root.join(entry_file), root.join("backend").join(entry_file)]
            }
        };
        Self { mode, paths }
    }

    /// Explicit candidate list.
    pub fn from_paths(mode: DeploymentMode, paths: Vec<PathBuf>) -> Self {
        Self { mode, paths }
    }

    pub fn mode(&self) -> DeploymentMode {
        self.mode
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }
}

/// A located entry point and the directory the backend runs in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEntry {
    pub entry_point: PathBuf,
    pub working_dir: PathBuf,
    pub mode: DeploymentMode,
}

/// Resolves the backend entry point.
#[derive(Debug, Clone)]
pub struct EntryResolver {
    candidates: EntryCandidates,
    app_dir: PathBuf,
}

impl EntryResolver {
    /// `app_dir` is the working directory used in development mode.
    pub fn new(candidates: EntryCandidates, app_dir: impl Into<PathBuf>) -> Self {
        Self {
            candidates,
            app_dir: app_dir.into(),
        }
    }

    pub fn candidates(&self) -> &EntryCandidates {
        &self.candidates
    }

    /// Return the first candidate that exists on disk.
    pub fn resolve(&self) -> Result<ResolvedEntry> {
        self.resolve_with(|path| path.is_file())
    }

    /// Like [`resolve`](Self::resolve), with a custom existence check.
    ///
    /// The check is not called again once a candidate matches.
    pub fn resolve_with(&self, mut exists: impl FnMut(&Path) -> bool) -> Result<ResolvedEntry> {
        for path in self.candidates.paths() {
            if !exists(path) {
                debug!("Entry point candidate missing: {}", path.display());
                continue;
            }

            let working_dir = match self.candidates.mode() {
                DeploymentMode::Packaged => path
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| self.app_dir.clone()),
                DeploymentMode::Development => self.app_dir.clone(),
            };

            info!(
                "Resolved backend entry point {} (cwd {})",
                path.display(),
                working_dir.display()
            );
            return Ok(ResolvedEntry {
                entry_point: path.clone(),
                working_dir,
                mode: self.candidates.mode(),
            });
        }

        warn!(
            "Backend entry point not found, tried {:?}",
            self.candidates.paths()
        );
        Err(ShellError::EntryPointNotFound {
            candidates: self.candidates.paths().to_vec(),
        })
    }
}
