//! Agent Shell Core Library
//!
//! Supervises a long-lived agent backend running under an external
//! interpreter, for a desktop front-end.
//!
//! # Features
//!
//! - **Runtime discovery**: Probe prioritized interpreter names
//! - **Entry resolution**: Locate the backend script for packaged and development layouts
//! - **Process supervision**: Start, feed and stop the backend and its whole process tree
//! - **Output protocol**: Interpret end-of-task markers and readiness phrases
//! - **Deep links**: Parse custom URI scheme launches
//!
//! # Example
//!
//! ```rust,no_run
//! use agent_shell_core::{LaunchPlan, ShellConfig, Supervisor, SupervisorEvent, SupervisorOptions};
//!
//! #[tokio::main]
//! async fn main() -> agent_shell_core::Result<()> {
//!     let config = ShellConfig::load_or_default(None)?;
//!     let plan = LaunchPlan::resolve(&config).await?;
//!
//!     let supervisor = Supervisor::new(SupervisorOptions::from_config(&config));
//!     let mut events = supervisor.subscribe();
//!     supervisor.start(&plan).await?;
//!
//!     while let Some(event) = events.recv().await {
//!         match event {
//!             SupervisorEvent::Output { text } => print!("{}", text),
//!             SupervisorEvent::FatalExit(report) => eprintln!("backend crashed: {:?}", report.code),
//!             SupervisorEvent::Exited(_) => break,
//!             _ => {}
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod deep_link;
pub mod entry;
pub mod error;
pub mod launch;
pub mod platform;
pub mod protocol;
pub mod runtime;
pub mod status;
pub mod supervisor;

// Re-exports for convenience
pub use config::{AppConfig, NetworkConfig, ShellConfig, SupervisorConfig};
pub use deep_link::DeepLink;
pub use entry::{DeploymentMode, EntryCandidates, EntryResolver, ResolvedEntry};
pub use error::{Result, ShellError};
pub use launch::{LaunchPlan, OutputMode};
pub use protocol::{BackendMarkers, OutputEvent, OutputParser};
pub use runtime::{
    CommandProbe, ProbeOutcome, ResolvedRuntime, RuntimeCandidates, RuntimeLocator, RuntimeProbe,
};
pub use status::{ConnectionStatus, ShellStatus, TaskStatus};
pub use supervisor::{
    BackendProcessHandle, ExitReport, Supervisor, SupervisorEvent, SupervisorOptions,
    SupervisorState,
};
