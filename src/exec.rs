//! Asynchronous command execution inside a running container
//!
//! `run_command` returns as soon as the exec session is started; output
//! frames are pumped to the caller's sink on a spawned task, in the order
//! the engine produces them, ending with exactly one terminal event. The
//! exit code only becomes trustworthy after that terminal event: callers
//! must await the sink's completion signal before inspecting it.

use crate::engine::{ContainerEngine, OutputFrame};
use crate::error::{SandboxError, SandboxResult};
use async_trait::async_trait;
use futures::StreamExt;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;

/// One command invocation inside a running container. Transient; exists for
/// the duration of that command's streaming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecSession {
    exec_id: String,
}

impl ExecSession {
    pub fn exec_id(&self) -> &str {
        &self.exec_id
    }
}

/// Ordered destination for streamed output, supplied by the caller and bound
/// to one session at a time.
///
/// For each session the runner calls `on_frame` zero or more times, then
/// exactly one of `on_completed` / `on_error`.
#[async_trait]
pub trait OutputSink: Send + Sync {
    async fn on_frame(&self, frame: OutputFrame);
    async fn on_completed(&self);
    async fn on_error(&self, error: SandboxError);
}

/// Event form of the sink contract, for callers that prefer to consume a
/// channel instead of implementing [`OutputSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Frame(OutputFrame),
    Completed,
    Errored(String),
}

/// [`OutputSink`] adapter that forwards every event into a bounded channel.
pub struct ChannelSink {
    tx: mpsc::Sender<StreamEvent>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Arc<Self>, mpsc::Receiver<StreamEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Arc::new(Self { tx }), rx)
    }
}

#[async_trait]
impl OutputSink for ChannelSink {
    async fn on_frame(&self, frame: OutputFrame) {
        let _ = self.tx.send(StreamEvent::Frame(frame)).await;
    }

    async fn on_completed(&self) {
        let _ = self.tx.send(StreamEvent::Completed).await;
    }

    async fn on_error(&self, error: SandboxError) {
        let _ = self.tx.send(StreamEvent::Errored(error.to_string())).await;
    }
}

pub struct ExecutionRunner {
    engine: Arc<dyn ContainerEngine>,
}

impl ExecutionRunner {
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        Self { engine }
    }

    /// Start `command` inside the running container and stream its output to
    /// `sink`.
    ///
    /// Stdout and stderr are attached unconditionally; stdin is attached if
    /// and only if `input_file` is given, in which case the file's bytes are
    /// streamed as the process's standard input. Failure to create or start
    /// the session is returned here; anything after streaming begins arrives
    /// on the sink's error event instead.
    pub async fn run_command(
        &self,
        container_id: &str,
        command: &[String],
        sink: Arc<dyn OutputSink>,
        input_file: Option<&Path>,
    ) -> SandboxResult<ExecSession> {
        let stdin = match input_file {
            Some(path) => Some(tokio::fs::read(path).await?),
            None => None,
        };
        let exec_id = self
            .engine
            .create_exec(container_id, command, stdin.is_some())
            .await
            .map_err(SandboxError::Execution)?;
        let mut frames = self
            .engine
            .start_exec(&exec_id, stdin)
            .await
            .map_err(SandboxError::Execution)?;

        let session = ExecSession {
            exec_id: exec_id.clone(),
        };
        tokio::spawn(async move {
            while let Some(item) = frames.next().await {
                match item {
                    Ok(frame) => sink.on_frame(frame).await,
                    Err(e) => {
                        sink.on_error(SandboxError::Stream(e)).await;
                        return;
                    }
                }
            }
            sink.on_completed().await;
        });
        Ok(session)
    }

    /// Terminal status of a finished exec session.
    ///
    /// Returns `None` while the engine has not yet recorded completion. Only
    /// call this after observing the sink's completion event for the session;
    /// before that the result is not guaranteed to be available.
    pub async fn inspect_exit_code(&self, exec_id: &str) -> SandboxResult<Option<i64>> {
        self.engine
            .inspect_exec(exec_id)
            .await
            .map_err(SandboxError::Execution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SandboxSettings;
    use crate::engine::mock::{MockEngine, ScriptedExec};
    use crate::provisioner::ContainerProvisioner;

    async fn provisioned(engine: &Arc<MockEngine>) -> String {
        let provisioner = ContainerProvisioner::new(
            engine.clone() as Arc<dyn ContainerEngine>,
            SandboxSettings::default().into_shared(),
        );
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.py"), "print('hi')\n").unwrap();
        let handle = provisioner.prepare_container("python", dir.path()).await.unwrap();
        handle.id().to_string()
    }

    #[tokio::test]
    async fn test_exec_setup_failure_is_synchronous() {
        let engine = Arc::new(MockEngine::new());
        let container_id = provisioned(&engine).await;
        engine.fail_execs(1);

        let runner = ExecutionRunner::new(engine.clone());
        let (sink, mut rx) = ChannelSink::new(8);
        let command = vec!["true".to_string()];
        let err = runner
            .run_command(&container_id, &command, sink, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Execution(_)));
        // the sink never saw any event
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_mid_stream_failure_arrives_on_the_sink() {
        let engine = Arc::new(MockEngine::new());
        let container_id = provisioned(&engine).await;
        engine.script_exec(ScriptedExec {
            frames: vec![OutputFrame::Stdout(b"partial".to_vec())],
            exit_code: 0,
            stream_error: Some("connection reset".to_string()),
        });

        let runner = ExecutionRunner::new(engine.clone());
        let (sink, mut rx) = ChannelSink::new(8);
        let command = vec!["cat".to_string()];
        runner
            .run_command(&container_id, &command, sink, None)
            .await
            .unwrap();

        assert_eq!(
            rx.recv().await,
            Some(StreamEvent::Frame(OutputFrame::Stdout(b"partial".to_vec())))
        );
        match rx.recv().await {
            Some(StreamEvent::Errored(message)) => assert!(message.contains("connection reset")),
            other => panic!("expected stream error event, got {:?}", other),
        }
        assert_eq!(rx.recv().await, None);
    }
}
