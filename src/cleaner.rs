//! Idempotent, escalating container teardown
//!
//! The universal rollback primitive: every other component calls into this
//! on failure, and callers use it for normal teardown. Cleanup is best-effort
//! up to one forced retry, then terminal.

use crate::engine::ContainerEngine;
use crate::error::{SandboxError, SandboxResult};
use std::sync::Arc;

/// How a cleanup run ended, short of terminal failure.
///
/// The terminal case (the final unconditional forced removal also failed) is
/// the `Err` arm of [`ContainerCleaner::cleanup`], so callers reason about
/// all three outcomes explicitly rather than through swallowed errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupOutcome {
    /// Graceful stop and plain removal both succeeded
    Clean,
    /// Removal needed force, either because the stop failed or because the
    /// first removal attempt did
    CleanedWithForce,
}

pub struct ContainerCleaner {
    engine: Arc<dyn ContainerEngine>,
}

impl ContainerCleaner {
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        Self { engine }
    }

    /// Stop and remove `container_id`.
    ///
    /// Safe to invoke on an identifier that never fully started or is already
    /// gone: the stop failure and the first removal attempt's failure are
    /// both absorbed. Only the final forced removal can still fail, and that
    /// failure is surfaced as [`SandboxError::Cleanup`].
    pub async fn cleanup(&self, container_id: &str) -> SandboxResult<CleanupOutcome> {
        let force = match self.engine.stop_container(container_id).await {
            Ok(()) => false,
            Err(e) => {
                log::debug!("graceful stop of {} failed, will force removal: {}", container_id, e);
                true
            }
        };

        match self.engine.remove_container(container_id, force).await {
            Ok(()) => Ok(if force {
                CleanupOutcome::CleanedWithForce
            } else {
                CleanupOutcome::Clean
            }),
            Err(first) => {
                log::warn!(
                    "removal of {} failed, retrying with force: {}",
                    container_id,
                    first
                );
                self.engine
                    .remove_container(container_id, true)
                    .await
                    .map_err(|source| SandboxError::Cleanup {
                        container_id: container_id.to_string(),
                        source,
                    })?;
                Ok(CleanupOutcome::CleanedWithForce)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SandboxSettings;
    use crate::engine::mock::MockEngine;
    use crate::limits::ResourceLimitPolicy;

    async fn running_container(engine: &MockEngine) -> String {
        let limits = ResourceLimitPolicy::new(SandboxSettings::default().into_shared())
            .build_limits()
            .unwrap();
        let id = engine
            .create_container("code-runner/python", &limits, true)
            .await
            .unwrap();
        engine.start_container(&id).await.unwrap();
        id
    }

    #[tokio::test]
    async fn test_clean_path() {
        let engine = Arc::new(MockEngine::new());
        let id = running_container(&engine).await;
        let cleaner = ContainerCleaner::new(engine.clone());

        let outcome = cleaner.cleanup(&id).await.unwrap();
        assert_eq!(outcome, CleanupOutcome::Clean);
        assert_eq!(engine.container_count(), 0);
    }

    #[tokio::test]
    async fn test_stop_failure_escalates_to_forced_removal() {
        let engine = Arc::new(MockEngine::new());
        let id = running_container(&engine).await;
        engine.fail_stops(1);
        let cleaner = ContainerCleaner::new(engine.clone());

        let outcome = cleaner.cleanup(&id).await.unwrap();
        assert_eq!(outcome, CleanupOutcome::CleanedWithForce);
        assert_eq!(engine.container_count(), 0);
    }

    #[tokio::test]
    async fn test_first_removal_failure_is_absorbed() {
        let engine = Arc::new(MockEngine::new());
        let id = running_container(&engine).await;
        engine.fail_removes(1);
        let cleaner = ContainerCleaner::new(engine.clone());

        let outcome = cleaner.cleanup(&id).await.unwrap();
        assert_eq!(outcome, CleanupOutcome::CleanedWithForce);
        assert_eq!(engine.container_count(), 0);
    }

    #[tokio::test]
    async fn test_second_removal_failure_is_terminal() {
        let engine = Arc::new(MockEngine::new());
        let id = running_container(&engine).await;
        engine.fail_removes(2);
        let cleaner = ContainerCleaner::new(engine.clone());

        let err = cleaner.cleanup(&id).await.unwrap_err();
        match err {
            SandboxError::Cleanup { container_id, .. } => assert_eq!(container_id, id),
            other => panic!("expected terminal cleanup failure, got {:?}", other),
        }
        // the container is still there; the engine never accepted a removal
        assert_eq!(engine.container_count(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_twice_is_idempotent() {
        let engine = Arc::new(MockEngine::new());
        let id = running_container(&engine).await;
        let cleaner = ContainerCleaner::new(engine.clone());

        cleaner.cleanup(&id).await.unwrap();
        // stop now fails (unknown id) and removal is a no-op; no error
        let outcome = cleaner.cleanup(&id).await.unwrap();
        assert_eq!(outcome, CleanupOutcome::CleanedWithForce);
    }
}
