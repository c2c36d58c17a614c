//! Container Engine Abstraction Layer
//!
//! Every lifecycle component is a thin, rollback-aware orchestration layer
//! over this command surface. The engine itself is an external collaborator:
//! it is created once at process startup, shared by reference
//! (`Arc<dyn ContainerEngine>`), and never owned by any single component.
//!
//! Two implementations ship with the crate:
//!
//! - [`docker::DockerEngine`]: the real engine, backed by the bollard Docker
//!   API client
//! - [`mock::MockEngine`]: an in-memory, scriptable engine for testing and
//!   development without a daemon

pub mod docker;
pub mod mock;

use crate::error::{EngineError, SandboxError, SandboxResult};
use crate::limits::RuntimeLimits;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::path::Path;

/// One chunk of multiplexed output delivered asynchronously during an exec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputFrame {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
}

impl OutputFrame {
    pub fn bytes(&self) -> &[u8] {
        match self {
            OutputFrame::Stdout(bytes) | OutputFrame::Stderr(bytes) => bytes,
        }
    }

    pub fn is_stdout(&self) -> bool {
        matches!(self, OutputFrame::Stdout(_))
    }
}

/// One progress message emitted by the engine during an image build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildProgress {
    pub message: String,
}

/// Minimal view of an image known to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSummary {
    pub id: String,
    pub tags: Vec<String>,
}

/// Finite, non-restartable sequence of exec output frames. Ends when the
/// engine reports stream completion; a mid-stream failure is the final item.
pub type FrameStream = BoxStream<'static, Result<OutputFrame, EngineError>>;

/// Finite sequence of build progress messages, same termination contract.
pub type BuildStream = BoxStream<'static, Result<BuildProgress, EngineError>>;

/// The container engine's command surface.
///
/// Methods are deliberately one-call-per-engine-operation so the components
/// above can express their transactional steps (create -> copy -> start,
/// stop -> remove -> forced remove) without hidden coupling.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Connectivity check against the engine daemon.
    async fn ping(&self) -> Result<(), EngineError>;

    /// List images known to the engine.
    async fn list_images(&self) -> Result<Vec<ImageSummary>, EngineError>;

    /// Create (but do not start) a container, returning its identifier.
    async fn create_container(
        &self,
        image: &str,
        limits: &RuntimeLimits,
        tty: bool,
    ) -> Result<String, EngineError>;

    /// Upload the *children* of `source_dir` into the container at
    /// `remote_path` (the directory itself does not appear remotely).
    async fn copy_into_container(
        &self,
        container_id: &str,
        source_dir: &Path,
        remote_path: &str,
    ) -> Result<(), EngineError>;

    async fn start_container(&self, container_id: &str) -> Result<(), EngineError>;

    async fn stop_container(&self, container_id: &str) -> Result<(), EngineError>;

    /// Remove a container. A container the engine no longer knows counts as
    /// removed, so repeated cleanup of the same identifier stays a no-op.
    async fn remove_container(&self, container_id: &str, force: bool) -> Result<(), EngineError>;

    /// Create an exec descriptor. Stdout and stderr are always attached;
    /// stdin only when requested.
    async fn create_exec(
        &self,
        container_id: &str,
        command: &[String],
        attach_stdin: bool,
    ) -> Result<String, EngineError>;

    /// Start a created exec, feeding `stdin` (if any) to the process and
    /// returning its output frame stream.
    async fn start_exec(
        &self,
        exec_id: &str,
        stdin: Option<Vec<u8>>,
    ) -> Result<FrameStream, EngineError>;

    /// Exit code of a finished exec; `None` while the engine has not yet
    /// recorded a terminal status.
    async fn inspect_exec(&self, exec_id: &str) -> Result<Option<i64>, EngineError>;

    /// Build an image from `context_dir`, tagging it `tag` and removing
    /// intermediate containers. Progress and failure arrive on the stream.
    async fn build_image(&self, context_dir: &Path, tag: &str) -> Result<BuildStream, EngineError>;
}

/// Fail fast when the engine daemon is unreachable. Surfaced unchanged to the
/// operator; never retried here.
pub async fn verify_connectivity(engine: &dyn ContainerEngine) -> SandboxResult<()> {
    engine
        .ping()
        .await
        .map_err(|source| SandboxError::EngineUnavailable { source })
}
