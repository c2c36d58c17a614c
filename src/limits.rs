//! Resource limit descriptors attached to container creation

use crate::config::SharedSettings;
use crate::error::{SandboxError, SandboxResult};

/// Immutable resource ceiling for one container.
///
/// Built fresh from configuration at each provisioning call; once attached to
/// a container it is fixed for that container's whole life. Later
/// configuration changes affect only containers created afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeLimits {
    pub memory_bytes: i64,
    pub disk_quota_bytes: i64,
    pub nano_cpus: i64,
    pub pids_limit: i64,
}

/// Converts the current runtime configuration into an engine-level limit
/// descriptor. Deliberately uncached.
pub struct ResourceLimitPolicy {
    settings: SharedSettings,
}

impl ResourceLimitPolicy {
    pub fn new(settings: SharedSettings) -> Self {
        Self { settings }
    }

    /// Read the configuration source and produce an immutable descriptor.
    ///
    /// A configuration source that cannot be read is fatal and surfaced
    /// unchanged; there is no fallback value.
    pub fn build_limits(&self) -> SandboxResult<RuntimeLimits> {
        let guard = self
            .settings
            .read()
            .map_err(|_| SandboxError::Config("limits configuration lock poisoned".to_string()))?;
        Ok(RuntimeLimits {
            memory_bytes: guard.limits.memory_bytes,
            disk_quota_bytes: guard.limits.disk_quota_bytes,
            nano_cpus: guard.limits.nano_cpus,
            pids_limit: guard.limits.pids_limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SandboxSettings;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_build_limits_reads_configuration_fresh() {
        let settings = SandboxSettings::default().into_shared();
        let policy = ResourceLimitPolicy::new(settings.clone());

        let before = policy.build_limits().unwrap();
        assert_eq!(before.memory_bytes, 256 * 1024 * 1024);

        settings.write().unwrap().limits.memory_bytes = 512 * 1024 * 1024;

        let after = policy.build_limits().unwrap();
        assert_eq!(after.memory_bytes, 512 * 1024 * 1024);
        // the earlier descriptor is unaffected
        assert_eq!(before.memory_bytes, 256 * 1024 * 1024);
    }
}
