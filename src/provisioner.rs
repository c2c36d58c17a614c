//! Transactional container provisioning with rollback
//!
//! Provisioning is a strict create -> copy -> start sequence. A handle is
//! returned only when every step succeeded; any later-step failure rolls the
//! container back through [`ContainerCleaner`] before the error is returned,
//! so the caller never observes a half-initialized container.

use crate::cleaner::ContainerCleaner;
use crate::config::SharedSettings;
use crate::engine::ContainerEngine;
use crate::error::{ProvisioningStage, SandboxError, SandboxResult};
use crate::limits::ResourceLimitPolicy;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Namespace prefix prepended to every image reference this core manages.
pub const IMAGE_PREFIX: &str = "code-runner/";

/// Fixed absolute path inside every container where the source tree lands.
pub const SESSION_PATH: &str = "/work/session/";

/// Identifier of a fully provisioned container: running, source tree in
/// place. Constructed only by [`ContainerProvisioner`] on full success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    id: String,
}

impl ContainerHandle {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for ContainerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

pub struct ContainerProvisioner {
    engine: Arc<dyn ContainerEngine>,
    policy: ResourceLimitPolicy,
    cleaner: ContainerCleaner,
}

impl ContainerProvisioner {
    pub fn new(engine: Arc<dyn ContainerEngine>, settings: SharedSettings) -> Self {
        Self {
            policy: ResourceLimitPolicy::new(settings),
            cleaner: ContainerCleaner::new(Arc::clone(&engine)),
            engine,
        }
    }

    /// Create a container from `code-runner/<image_id>` with freshly built
    /// limits and a tty, upload the children of `source_dir` to the session
    /// path, and start it.
    ///
    /// If copy or start fails, the just-created container is cleaned up
    /// before the original failure is returned. A create failure propagates
    /// directly; there is no identifier to roll back yet.
    pub async fn prepare_container(
        &self,
        image_id: &str,
        source_dir: &Path,
    ) -> SandboxResult<ContainerHandle> {
        let limits = self.policy.build_limits()?;
        let image = format!("{}{}", IMAGE_PREFIX, image_id);
        let container_id = self
            .engine
            .create_container(&image, &limits, true)
            .await
            .map_err(|source| SandboxError::Provisioning {
                stage: ProvisioningStage::Create,
                source,
            })?;

        // From here on the identifier is acquired: every failure path must
        // release it through cleanup before returning.
        match self.inject_and_start(&container_id, source_dir).await {
            Ok(()) => Ok(ContainerHandle { id: container_id }),
            Err(err) => {
                log::warn!("provisioning {} failed, rolling back: {}", container_id, err);
                if let Err(cleanup_err) = self.cleaner.cleanup(&container_id).await {
                    // the original provisioning failure still wins
                    log::error!(
                        "rollback cleanup of {} failed: {}",
                        container_id,
                        cleanup_err
                    );
                }
                Err(err)
            }
        }
    }

    async fn inject_and_start(&self, container_id: &str, source_dir: &Path) -> SandboxResult<()> {
        self.engine
            .copy_into_container(container_id, source_dir, SESSION_PATH)
            .await
            .map_err(|source| SandboxError::Provisioning {
                stage: ProvisioningStage::Copy,
                source,
            })?;
        self.engine
            .start_container(container_id)
            .await
            .map_err(|source| SandboxError::Provisioning {
                stage: ProvisioningStage::Start,
                source,
            })?;
        Ok(())
    }
}
