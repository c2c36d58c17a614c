//! Streamed construction of namespaced sandbox images

use crate::engine::ContainerEngine;
use crate::error::SandboxError;
use crate::provisioner::IMAGE_PREFIX;
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Lifecycle events of one image build, in emission order: `Started`, zero
/// or more `Output`, then exactly one of `Completed` / `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildEvent {
    Started { tag: String },
    Output { message: String },
    Completed { tag: String },
    Failed { message: String },
}

pub struct ImageBuilder {
    engine: Arc<dyn ContainerEngine>,
}

impl ImageBuilder {
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        Self { engine }
    }

    /// Build an image from `build_context`, tagged `code-runner/<image_tag>`,
    /// removing intermediate containers.
    ///
    /// Returns the event stream immediately; the build runs on a spawned
    /// task. Every failure, including failure to even submit the build,
    /// arrives as a `Failed` event on the stream rather than as an error
    /// from this call.
    pub fn build_image(
        &self,
        build_context: impl Into<PathBuf>,
        image_tag: &str,
    ) -> mpsc::Receiver<BuildEvent> {
        let tag = format!("{}{}", IMAGE_PREFIX, image_tag);
        let context = build_context.into();
        let engine = Arc::clone(&self.engine);
        let (tx, rx) = mpsc::channel(64);

        tokio::spawn(async move {
            log::info!("start: rebuild {}", tag);
            let _ = tx.send(BuildEvent::Started { tag: tag.clone() }).await;

            let mut stream = match engine.build_image(&context, &tag).await {
                Ok(stream) => stream,
                Err(source) => {
                    let _ = tx
                        .send(BuildEvent::Failed {
                            message: SandboxError::Build(source).to_string(),
                        })
                        .await;
                    return;
                }
            };
            while let Some(item) = stream.next().await {
                match item {
                    Ok(progress) => {
                        let _ = tx
                            .send(BuildEvent::Output {
                                message: progress.message,
                            })
                            .await;
                    }
                    Err(source) => {
                        let _ = tx
                            .send(BuildEvent::Failed {
                                message: SandboxError::Build(source).to_string(),
                            })
                            .await;
                        return;
                    }
                }
            }

            log::info!("done: rebuild {}", tag);
            let _ = tx.send(BuildEvent::Completed { tag }).await;
        });
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::MockEngine;

    #[tokio::test]
    async fn test_build_emits_start_output_and_completion() {
        let engine = Arc::new(MockEngine::new());
        engine.script_build(vec!["Step 1/2 : FROM python:3".to_string(), "Successfully built".to_string()]);
        let builder = ImageBuilder::new(engine.clone());

        let mut rx = builder.build_image("/tmp/build-context", "python");
        assert_eq!(
            rx.recv().await,
            Some(BuildEvent::Started {
                tag: "code-runner/python".to_string()
            })
        );
        assert_eq!(
            rx.recv().await,
            Some(BuildEvent::Output {
                message: "Step 1/2 : FROM python:3".to_string()
            })
        );
        assert_eq!(
            rx.recv().await,
            Some(BuildEvent::Output {
                message: "Successfully built".to_string()
            })
        );
        assert_eq!(
            rx.recv().await,
            Some(BuildEvent::Completed {
                tag: "code-runner/python".to_string()
            })
        );
        assert_eq!(rx.recv().await, None);

        // the built tag is now visible to the engine
        let tags: Vec<String> = engine
            .list_images()
            .await
            .unwrap()
            .into_iter()
            .flat_map(|image| image.tags)
            .collect();
        assert!(tags.contains(&"code-runner/python".to_string()));
    }

    #[tokio::test]
    async fn test_build_failure_arrives_on_the_stream() {
        let engine = Arc::new(MockEngine::new());
        engine.fail_builds(1);
        let builder = ImageBuilder::new(engine.clone());

        let mut rx = builder.build_image("/tmp/build-context", "python");
        assert_eq!(
            rx.recv().await,
            Some(BuildEvent::Started {
                tag: "code-runner/python".to_string()
            })
        );
        match rx.recv().await {
            Some(BuildEvent::Failed { message }) => {
                assert!(message.contains("scripted build failure"))
            }
            other => panic!("expected failure event, got {:?}", other),
        }
        // terminal: no completion after a failure
        assert_eq!(rx.recv().await, None);
    }
}
