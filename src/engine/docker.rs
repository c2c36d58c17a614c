//! Docker-backed Container Engine
//!
//! Maps the abstract engine surface onto the bollard Docker API client. The
//! wrapped client is cheap to clone and safe to share; a single
//! `DockerEngine` is expected to live for the whole process.

use crate::engine::{
    BuildProgress, BuildStream, ContainerEngine, FrameStream, ImageSummary, OutputFrame,
};
use crate::error::EngineError;
use crate::limits::RuntimeLimits;
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions, UploadToContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::{BuildImageOptions, ListImagesOptions};
use bollard::models::HostConfig;
use bollard::Docker;
use futures::StreamExt;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Connect using the platform's default daemon socket.
    pub fn new() -> Result<Self, EngineError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| EngineError::Unavailable(e.to_string()))?;
        Ok(Self { docker })
    }

    /// Wrap an already-connected client.
    pub fn from_client(docker: Docker) -> Self {
        Self { docker }
    }
}

/// Tar up the children of `dir` so they unpack directly into the target
/// directory, without a wrapper entry for `dir` itself.
fn pack_dir_children(dir: &Path) -> std::io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    builder.append_dir_all(".", dir)?;
    builder.into_inner()
}

async fn pack_dir_children_blocking(dir: PathBuf) -> Result<Vec<u8>, EngineError> {
    let archive = tokio::task::spawn_blocking(move || pack_dir_children(&dir))
        .await
        .map_err(|e| EngineError::Rejected(format!("archive task failed: {}", e)))??;
    Ok(archive)
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn ping(&self) -> Result<(), EngineError> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| EngineError::Unavailable(e.to_string()))
    }

    async fn list_images(&self) -> Result<Vec<ImageSummary>, EngineError> {
        let images = self
            .docker
            .list_images(Some(ListImagesOptions::<String>::default()))
            .await?;
        Ok(images
            .into_iter()
            .map(|image| ImageSummary {
                id: image.id,
                tags: image.repo_tags,
            })
            .collect())
    }

    async fn create_container(
        &self,
        image: &str,
        limits: &RuntimeLimits,
        tty: bool,
    ) -> Result<String, EngineError> {
        // Disk quota rides on the writable layer's storage option; the other
        // ceilings are first-class HostConfig resources.
        let storage_opt = HashMap::from([("size".to_string(), limits.disk_quota_bytes.to_string())]);
        let host_config = HostConfig {
            memory: Some(limits.memory_bytes),
            nano_cpus: Some(limits.nano_cpus),
            pids_limit: Some(limits.pids_limit),
            storage_opt: Some(storage_opt),
            ..Default::default()
        };
        let config = Config {
            image: Some(image.to_string()),
            tty: Some(tty),
            host_config: Some(host_config),
            ..Default::default()
        };
        let created = self
            .docker
            .create_container(None::<CreateContainerOptions<String>>, config)
            .await?;
        Ok(created.id)
    }

    async fn copy_into_container(
        &self,
        container_id: &str,
        source_dir: &Path,
        remote_path: &str,
    ) -> Result<(), EngineError> {
        let archive = pack_dir_children_blocking(source_dir.to_path_buf()).await?;
        let options = UploadToContainerOptions {
            path: remote_path.to_string(),
            ..Default::default()
        };
        self.docker
            .upload_to_container(container_id, Some(options), archive.into())
            .await?;
        Ok(())
    }

    async fn start_container(&self, container_id: &str) -> Result<(), EngineError> {
        self.docker
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn stop_container(&self, container_id: &str) -> Result<(), EngineError> {
        self.docker
            .stop_container(container_id, None::<StopContainerOptions>)
            .await?;
        Ok(())
    }

    async fn remove_container(&self, container_id: &str, force: bool) -> Result<(), EngineError> {
        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };
        match self.docker.remove_container(container_id, Some(options)).await {
            Ok(()) => Ok(()),
            // already gone counts as removed
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(()),
            Err(e) => Err(EngineError::Api(e)),
        }
    }

    async fn create_exec(
        &self,
        container_id: &str,
        command: &[String],
        attach_stdin: bool,
    ) -> Result<String, EngineError> {
        let options = CreateExecOptions::<String> {
            cmd: Some(command.to_vec()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            attach_stdin: Some(attach_stdin),
            ..Default::default()
        };
        let created = self.docker.create_exec(container_id, options).await?;
        Ok(created.id)
    }

    async fn start_exec(
        &self,
        exec_id: &str,
        stdin: Option<Vec<u8>>,
    ) -> Result<FrameStream, EngineError> {
        match self.docker.start_exec(exec_id, None).await? {
            StartExecResults::Attached { output, mut input } => {
                if let Some(bytes) = stdin {
                    // Feed stdin off the caller's path; the process only sees
                    // EOF once the write half is shut down.
                    tokio::spawn(async move {
                        if let Err(e) = input.write_all(&bytes).await {
                            log::warn!("stdin feed failed: {}", e);
                            return;
                        }
                        if let Err(e) = input.shutdown().await {
                            log::warn!("stdin close failed: {}", e);
                        }
                    });
                }
                let frames = output
                    .filter_map(|item| async move {
                        match item {
                            Ok(LogOutput::StdOut { message }) => {
                                Some(Ok(OutputFrame::Stdout(message.to_vec())))
                            }
                            Ok(LogOutput::Console { message }) => {
                                Some(Ok(OutputFrame::Stdout(message.to_vec())))
                            }
                            Ok(LogOutput::StdErr { message }) => {
                                Some(Ok(OutputFrame::Stderr(message.to_vec())))
                            }
                            Ok(LogOutput::StdIn { .. }) => None,
                            Err(e) => Some(Err(EngineError::Api(e))),
                        }
                    })
                    .boxed();
                Ok(frames)
            }
            StartExecResults::Detached => Err(EngineError::Rejected(
                "exec started detached, no output stream attached".to_string(),
            )),
        }
    }

    async fn inspect_exec(&self, exec_id: &str) -> Result<Option<i64>, EngineError> {
        let inspected = self.docker.inspect_exec(exec_id).await?;
        Ok(inspected.exit_code)
    }

    async fn build_image(&self, context_dir: &Path, tag: &str) -> Result<BuildStream, EngineError> {
        let archive = pack_dir_children_blocking(context_dir.to_path_buf()).await?;
        let options = BuildImageOptions::<String> {
            t: tag.to_string(),
            rm: true,
            ..Default::default()
        };
        // bollard's build_image stream borrows the client, but BuildStream
        // must be 'static; drive it from an owned clone in a task and expose
        // the items through a channel-backed stream.
        let docker = self.docker.clone();
        let (tx, rx) = tokio::sync::mpsc::channel(32);
        tokio::spawn(async move {
            let mut inner = docker.build_image(options, None, Some(archive.into()));
            while let Some(item) = inner.next().await {
                if tx.send(item).await.is_err() {
                    break;
                }
            }
        });
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
            .filter_map(|item| async move {
                match item {
                    Ok(info) => {
                        if let Some(message) = info.error {
                            Some(Err(EngineError::Rejected(message)))
                        } else {
                            info.stream
                                .or(info.status)
                                .map(|m| m.trim_end().to_string())
                                .filter(|m| !m.is_empty())
                                .map(|message| Ok(BuildProgress { message }))
                        }
                    }
                    Err(e) => Some(Err(EngineError::Api(e))),
                }
            })
            .boxed();
        Ok(stream)
    }
}
