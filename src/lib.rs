//! Sandbox Container Lifecycle Core
//!
//! This crate manages the lifecycle of ephemeral, resource-limited sandbox
//! containers used to execute untrusted or user-supplied code:
//!
//! - [`ContainerProvisioner`]: create a container from a namespaced image,
//!   inject a source tree, start it; rolls back on partial failure so the
//!   caller never sees a half-initialized container
//! - [`ExecutionRunner`]: run commands inside a running container with
//!   asynchronously streamed output and post-completion exit-code inspection
//! - [`ContainerCleaner`]: idempotent, escalating stop-and-remove; the
//!   universal rollback/teardown primitive
//! - [`ImageBuilder`]: streamed construction of namespaced sandbox images
//! - [`ResourceLimitPolicy`]: turns the current runtime configuration into
//!   the immutable limit descriptor attached to every container creation
//!
//! All of it is a thin orchestration layer over a [`ContainerEngine`], which
//! is created once at startup and injected by reference into each component.
//! The engine is the source of truth; this core holds no state beyond
//! identifiers.
//!
//! ```no_run
//! use code_runner::{
//!     ChannelSink, ContainerCleaner, ContainerProvisioner, ExecutionRunner, SandboxSettings,
//!     StreamEvent,
//! };
//! use code_runner::engine::docker::DockerEngine;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # async fn run() -> code_runner::SandboxResult<()> {
//! let engine = Arc::new(DockerEngine::new().map_err(|source| {
//!     code_runner::SandboxError::EngineUnavailable { source }
//! })?);
//! let settings = SandboxSettings::default().into_shared();
//!
//! let provisioner = ContainerProvisioner::new(engine.clone(), settings);
//! let runner = ExecutionRunner::new(engine.clone());
//! let cleaner = ContainerCleaner::new(engine.clone());
//!
//! let handle = provisioner.prepare_container("python", Path::new("./session")).await?;
//! let (sink, mut events) = ChannelSink::new(64);
//! let command = vec!["python3".to_string(), "/work/session/main.py".to_string()];
//! let session = runner.run_command(handle.id(), &command, sink, None).await?;
//!
//! while let Some(event) = events.recv().await {
//!     if matches!(event, StreamEvent::Completed | StreamEvent::Errored(_)) {
//!         break;
//!     }
//! }
//! let _exit_code = runner.inspect_exit_code(session.exec_id()).await?;
//! cleaner.cleanup(handle.id()).await?;
//! # Ok(())
//! # }
//! ```

pub mod cleaner;
pub mod config;
pub mod engine;
pub mod error;
pub mod exec;
pub mod image;
pub mod limits;
pub mod provisioner;

pub use cleaner::{CleanupOutcome, ContainerCleaner};
pub use config::{LimitsSettings, SandboxSettings, SharedSettings};
pub use engine::{
    verify_connectivity, BuildProgress, ContainerEngine, ImageSummary, OutputFrame,
};
pub use error::{EngineError, ProvisioningStage, SandboxError, SandboxResult};
pub use exec::{ChannelSink, ExecSession, ExecutionRunner, OutputSink, StreamEvent};
pub use image::{BuildEvent, ImageBuilder};
pub use limits::{ResourceLimitPolicy, RuntimeLimits};
pub use provisioner::{ContainerHandle, ContainerProvisioner, IMAGE_PREFIX, SESSION_PATH};
