//! Error handling for the sandbox lifecycle core

use std::fmt;

pub type SandboxResult<T> = Result<T, SandboxError>;

/// Failures reported by the container engine boundary.
///
/// Every `ContainerEngine` method returns this type; the components above it
/// translate engine failures into the richer [`SandboxError`] taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The engine daemon cannot be reached at all (connectivity/ping failure)
    #[error("engine unreachable: {0}")]
    Unavailable(String),

    /// An engine API call was accepted on the wire but failed
    #[error("engine API error: {0}")]
    Api(#[from] bollard::errors::Error),

    /// The engine does not know the referenced container/exec/image
    #[error("not found: {0}")]
    NotFound(String),

    /// The engine refused the request (invalid state, scripted failure, ...)
    #[error("rejected by engine: {0}")]
    Rejected(String),

    /// Host-side I/O failed while preparing an engine request
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The provisioning step that was executing when a failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningStage {
    Create,
    Copy,
    Start,
}

impl fmt::Display for ProvisioningStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProvisioningStage::Create => write!(f, "create"),
            ProvisioningStage::Copy => write!(f, "copy"),
            ProvisioningStage::Start => write!(f, "start"),
        }
    }
}

/// Errors surfaced by the sandbox lifecycle components.
///
/// Streamed failures (mid-exec, mid-build) are not returned from calls; they
/// travel on the output sink / build event channel. The variants here cover
/// everything that is reported synchronously, plus the payloads those
/// asynchronous channels carry.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// Connectivity check against the engine failed; fatal, never retried
    #[error("container engine is unavailable: {source}")]
    EngineUnavailable { source: EngineError },

    /// A create/copy/start step failed; rollback has already run
    #[error("provisioning failed during {stage}: {source}")]
    Provisioning {
        stage: ProvisioningStage,
        source: EngineError,
    },

    /// The final, unconditional forced removal failed; terminal
    #[error("cleanup of container {container_id} failed: {source}")]
    Cleanup {
        container_id: String,
        source: EngineError,
    },

    /// Creating or starting an exec session failed
    #[error("exec setup failed: {0}")]
    Execution(EngineError),

    /// A failure after streaming began, delivered via the sink's error event
    #[error("output stream failed: {0}")]
    Stream(EngineError),

    /// A failure during image construction, delivered via the build stream
    #[error("image build failed: {0}")]
    Build(EngineError),

    /// The configuration source could not be read
    #[error("configuration error: {0}")]
    Config(String),

    /// Host-side I/O error (input file, settings file, ...)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provisioning_error_names_the_stage() {
        let err = SandboxError::Provisioning {
            stage: ProvisioningStage::Copy,
            source: EngineError::Rejected("no space left".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "provisioning failed during copy: rejected by engine: no space left"
        );
    }

    #[test]
    fn test_cleanup_error_names_the_container() {
        let err = SandboxError::Cleanup {
            container_id: "c-42".to_string(),
            source: EngineError::Unavailable("daemon gone".to_string()),
        };
        assert!(err.to_string().contains("c-42"));
        assert!(err.to_string().contains("daemon gone"));
    }
}
