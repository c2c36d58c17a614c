//! Mock Container Engine for Testing
//!
//! In-memory engine that tracks containers and execs, mirrors the real
//! engine's state rules (a running container refuses an unforced removal, a
//! missing container refuses a stop), and lets tests script failures and
//! exec output. Always available; no daemon required.

use crate::engine::{
    BuildProgress, BuildStream, ContainerEngine, FrameStream, ImageSummary, OutputFrame,
};
use crate::error::EngineError;
use crate::limits::RuntimeLimits;
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Scripted behavior for one exec session.
#[derive(Debug, Clone)]
pub struct ScriptedExec {
    /// Frames delivered on the output stream, in order
    pub frames: Vec<OutputFrame>,
    /// Terminal status reported once the stream has completed
    pub exit_code: i64,
    /// When set, the stream ends with this error instead of completing and
    /// no exit code ever becomes available
    pub stream_error: Option<String>,
}

impl Default for ScriptedExec {
    fn default() -> Self {
        Self {
            frames: Vec::new(),
            exit_code: 0,
            stream_error: None,
        }
    }
}

/// Observable state of one mock container.
#[derive(Debug, Clone)]
pub struct MockContainer {
    pub image: String,
    pub limits: RuntimeLimits,
    pub tty: bool,
    pub running: bool,
    /// Children of the uploaded source directory, by file name
    pub uploaded: Vec<String>,
    pub upload_path: Option<String>,
}

/// Observable state of one mock exec session.
#[derive(Debug, Clone)]
pub struct MockExec {
    pub container_id: String,
    pub command: Vec<String>,
    pub attach_stdin: bool,
    pub stdin: Option<Vec<u8>>,
    pub started: bool,
    script: ScriptedExec,
}

#[derive(Debug, Default)]
struct FailureScript {
    offline: bool,
    create_failures: u32,
    copy_failures: u32,
    start_failures: u32,
    stop_failures: u32,
    remove_failures: u32,
    exec_failures: u32,
    build_failures: u32,
}

fn take_failure(counter: &mut u32, operation: &str) -> Result<(), EngineError> {
    if *counter > 0 {
        *counter -= 1;
        return Err(EngineError::Rejected(format!("scripted {} failure", operation)));
    }
    Ok(())
}

#[derive(Debug, Default)]
struct MockState {
    next_id: u64,
    containers: HashMap<String, MockContainer>,
    execs: HashMap<String, MockExec>,
    images: Vec<String>,
    removed: Vec<String>,
    exec_scripts: VecDeque<ScriptedExec>,
    build_lines: Vec<String>,
    fail: FailureScript,
}

#[derive(Debug, Default)]
pub struct MockEngine {
    state: Mutex<MockState>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    // --- scripting -------------------------------------------------------

    pub fn set_offline(&self, offline: bool) {
        self.state().fail.offline = offline;
    }

    pub fn fail_creates(&self, n: u32) {
        self.state().fail.create_failures += n;
    }

    pub fn fail_copies(&self, n: u32) {
        self.state().fail.copy_failures += n;
    }

    pub fn fail_starts(&self, n: u32) {
        self.state().fail.start_failures += n;
    }

    pub fn fail_stops(&self, n: u32) {
        self.state().fail.stop_failures += n;
    }

    pub fn fail_removes(&self, n: u32) {
        self.state().fail.remove_failures += n;
    }

    pub fn fail_execs(&self, n: u32) {
        self.state().fail.exec_failures += n;
    }

    pub fn fail_builds(&self, n: u32) {
        self.state().fail.build_failures += n;
    }

    /// Queue the behavior of the next exec session.
    pub fn script_exec(&self, script: ScriptedExec) {
        self.state().exec_scripts.push_back(script);
    }

    /// Progress lines the next successful build will emit.
    pub fn script_build(&self, lines: Vec<String>) {
        self.state().build_lines = lines;
    }

    pub fn add_image(&self, tag: &str) {
        self.state().images.push(tag.to_string());
    }

    // --- introspection ---------------------------------------------------

    pub fn container(&self, container_id: &str) -> Option<MockContainer> {
        self.state().containers.get(container_id).cloned()
    }

    pub fn container_count(&self) -> usize {
        self.state().containers.len()
    }

    pub fn exec(&self, exec_id: &str) -> Option<MockExec> {
        self.state().execs.get(exec_id).cloned()
    }

    /// Identifiers removed so far, in removal order.
    pub fn removed_ids(&self) -> Vec<String> {
        self.state().removed.clone()
    }
}

#[async_trait]
impl ContainerEngine for MockEngine {
    async fn ping(&self) -> Result<(), EngineError> {
        if self.state().fail.offline {
            return Err(EngineError::Unavailable("mock engine offline".to_string()));
        }
        Ok(())
    }

    async fn list_images(&self) -> Result<Vec<ImageSummary>, EngineError> {
        Ok(self
            .state()
            .images
            .iter()
            .map(|tag| ImageSummary {
                id: tag.clone(),
                tags: vec![tag.clone()],
            })
            .collect())
    }

    async fn create_container(
        &self,
        image: &str,
        limits: &RuntimeLimits,
        tty: bool,
    ) -> Result<String, EngineError> {
        let mut state = self.state();
        take_failure(&mut state.fail.create_failures, "create")?;
        state.next_id += 1;
        let id = format!("mock-container-{}", state.next_id);
        state.containers.insert(
            id.clone(),
            MockContainer {
                image: image.to_string(),
                limits: *limits,
                tty,
                running: false,
                uploaded: Vec::new(),
                upload_path: None,
            },
        );
        Ok(id)
    }

    async fn copy_into_container(
        &self,
        container_id: &str,
        source_dir: &Path,
        remote_path: &str,
    ) -> Result<(), EngineError> {
        let mut children = Vec::new();
        for entry in std::fs::read_dir(source_dir)? {
            children.push(entry?.file_name().to_string_lossy().to_string());
        }
        children.sort();

        let mut state = self.state();
        take_failure(&mut state.fail.copy_failures, "copy")?;
        let container = state
            .containers
            .get_mut(container_id)
            .ok_or_else(|| EngineError::NotFound(format!("container {}", container_id)))?;
        container.uploaded = children;
        container.upload_path = Some(remote_path.to_string());
        Ok(())
    }

    async fn start_container(&self, container_id: &str) -> Result<(), EngineError> {
        let mut state = self.state();
        take_failure(&mut state.fail.start_failures, "start")?;
        let container = state
            .containers
            .get_mut(container_id)
            .ok_or_else(|| EngineError::NotFound(format!("container {}", container_id)))?;
        container.running = true;
        Ok(())
    }

    async fn stop_container(&self, container_id: &str) -> Result<(), EngineError> {
        let mut state = self.state();
        take_failure(&mut state.fail.stop_failures, "stop")?;
        match state.containers.get_mut(container_id) {
            Some(container) if container.running => {
                container.running = false;
                Ok(())
            }
            Some(_) => Err(EngineError::Rejected(format!(
                "container {} is not running",
                container_id
            ))),
            None => Err(EngineError::NotFound(format!("container {}", container_id))),
        }
    }

    async fn remove_container(&self, container_id: &str, force: bool) -> Result<(), EngineError> {
        let mut state = self.state();
        take_failure(&mut state.fail.remove_failures, "remove")?;
        let known = match state.containers.get(container_id) {
            Some(container) if container.running && !force => {
                return Err(EngineError::Rejected(format!(
                    "container {} is running, removal needs force",
                    container_id
                )))
            }
            Some(_) => true,
            // already gone counts as removed
            None => false,
        };
        if known {
            state.containers.remove(container_id);
            state.removed.push(container_id.to_string());
        }
        Ok(())
    }

    async fn create_exec(
        &self,
        container_id: &str,
        command: &[String],
        attach_stdin: bool,
    ) -> Result<String, EngineError> {
        let mut state = self.state();
        take_failure(&mut state.fail.exec_failures, "exec create")?;
        match state.containers.get(container_id) {
            Some(container) if container.running => {}
            Some(_) => {
                return Err(EngineError::Rejected(format!(
                    "container {} is not running",
                    container_id
                )))
            }
            None => return Err(EngineError::NotFound(format!("container {}", container_id))),
        }
        let script = state.exec_scripts.pop_front().unwrap_or_default();
        state.next_id += 1;
        let exec_id = format!("mock-exec-{}", state.next_id);
        state.execs.insert(
            exec_id.clone(),
            MockExec {
                container_id: container_id.to_string(),
                command: command.to_vec(),
                attach_stdin,
                stdin: None,
                started: false,
                script,
            },
        );
        Ok(exec_id)
    }

    async fn start_exec(
        &self,
        exec_id: &str,
        stdin: Option<Vec<u8>>,
    ) -> Result<FrameStream, EngineError> {
        let mut state = self.state();
        take_failure(&mut state.fail.exec_failures, "exec start")?;
        let exec = state
            .execs
            .get_mut(exec_id)
            .ok_or_else(|| EngineError::NotFound(format!("exec {}", exec_id)))?;
        exec.stdin = stdin;
        exec.started = true;
        let script = exec.script.clone();

        let mut items: Vec<Result<OutputFrame, EngineError>> =
            script.frames.into_iter().map(Ok).collect();
        if let Some(message) = script.stream_error {
            items.push(Err(EngineError::Rejected(message)));
        }
        Ok(futures::stream::iter(items).boxed())
    }

    async fn inspect_exec(&self, exec_id: &str) -> Result<Option<i64>, EngineError> {
        let state = self.state();
        let exec = state
            .execs
            .get(exec_id)
            .ok_or_else(|| EngineError::NotFound(format!("exec {}", exec_id)))?;
        if exec.started && exec.script.stream_error.is_none() {
            Ok(Some(exec.script.exit_code))
        } else {
            Ok(None)
        }
    }

    async fn build_image(&self, _context_dir: &Path, tag: &str) -> Result<BuildStream, EngineError> {
        let mut state = self.state();
        if state.fail.build_failures > 0 {
            state.fail.build_failures -= 1;
            let items = vec![Err(EngineError::Rejected(
                "scripted build failure".to_string(),
            ))];
            return Ok(futures::stream::iter(items).boxed());
        }
        state.images.push(tag.to_string());
        let items: Vec<Result<BuildProgress, EngineError>> = state
            .build_lines
            .iter()
            .map(|line| Ok(BuildProgress {
                message: line.clone(),
            }))
            .collect();
        Ok(futures::stream::iter(items).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SandboxSettings;
    use crate::limits::ResourceLimitPolicy;

    fn limits() -> RuntimeLimits {
        ResourceLimitPolicy::new(SandboxSettings::default().into_shared())
            .build_limits()
            .unwrap()
    }

    #[tokio::test]
    async fn test_lifecycle_state_rules() {
        let engine = MockEngine::new();
        let id = engine
            .create_container("code-runner/python", &limits(), true)
            .await
            .unwrap();

        // stopping a never-started container is refused, like the real engine
        assert!(engine.stop_container(&id).await.is_err());
        // so is an unforced removal of a running one
        engine.start_container(&id).await.unwrap();
        assert!(engine.remove_container(&id, false).await.is_err());

        engine.remove_container(&id, true).await.unwrap();
        assert_eq!(engine.container_count(), 0);
        // removing an identifier the engine no longer knows is a no-op
        engine.remove_container(&id, false).await.unwrap();
    }

    #[tokio::test]
    async fn test_exec_requires_running_container() {
        let engine = MockEngine::new();
        let id = engine
            .create_container("code-runner/python", &limits(), true)
            .await
            .unwrap();
        let command = vec!["true".to_string()];
        assert!(engine.create_exec(&id, &command, false).await.is_err());

        engine.start_container(&id).await.unwrap();
        let exec_id = engine.create_exec(&id, &command, false).await.unwrap();
        // no terminal status before the exec has started
        assert_eq!(engine.inspect_exec(&exec_id).await.unwrap(), None);
    }
}
