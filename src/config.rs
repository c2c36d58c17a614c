//! Sandbox Configuration Management
//!
//! Runtime limits are read from a shared settings store on every container
//! creation, so operators can adjust them without restarting the process.
//! Containers that already exist keep the limits they were created with.

use crate::error::{SandboxError, SandboxResult};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

/// Settings shared across components; re-read (never cached) by
/// [`crate::limits::ResourceLimitPolicy`] on each provisioning call.
pub type SharedSettings = Arc<RwLock<SandboxSettings>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxSettings {
    /// Resource ceilings attached to every created container
    #[serde(default)]
    pub limits: LimitsSettings,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            limits: LimitsSettings::default(),
        }
    }
}

/// Resource ceilings for one container, in engine units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitsSettings {
    /// Memory ceiling in bytes
    #[serde(default = "default_memory_bytes")]
    pub memory_bytes: i64,
    /// Writable-layer disk quota in bytes
    #[serde(default = "default_disk_quota_bytes")]
    pub disk_quota_bytes: i64,
    /// CPU allocation in units of 1e-9 CPUs (1_000_000_000 = one core)
    #[serde(default = "default_nano_cpus")]
    pub nano_cpus: i64,
    /// Maximum number of processes inside the container
    #[serde(default = "default_pids_limit")]
    pub pids_limit: i64,
}

fn default_memory_bytes() -> i64 {
    256 * 1024 * 1024
}

fn default_disk_quota_bytes() -> i64 {
    1024 * 1024 * 1024
}

fn default_nano_cpus() -> i64 {
    1_000_000_000
}

fn default_pids_limit() -> i64 {
    128
}

impl Default for LimitsSettings {
    fn default() -> Self {
        Self {
            memory_bytes: default_memory_bytes(),
            disk_quota_bytes: default_disk_quota_bytes(),
            nano_cpus: default_nano_cpus(),
            pids_limit: default_pids_limit(),
        }
    }
}

impl SandboxSettings {
    pub fn load_from_file(path: &str) -> SandboxResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: SandboxSettings = toml::from_str(&content)
            .map_err(|e| SandboxError::Config(format!("invalid settings file {}: {}", path, e)))?;
        Ok(settings)
    }

    pub fn save_to_file(&self, path: &str) -> SandboxResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| SandboxError::Config(format!("cannot serialize settings: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Wrap these settings for shared, mutable access across components.
    pub fn into_shared(self) -> SharedSettings {
        Arc::new(RwLock::new(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_limits() {
        let settings = SandboxSettings::default();
        assert_eq!(settings.limits.memory_bytes, 256 * 1024 * 1024);
        assert_eq!(settings.limits.disk_quota_bytes, 1024 * 1024 * 1024);
        assert_eq!(settings.limits.nano_cpus, 1_000_000_000);
        assert_eq!(settings.limits.pids_limit, 128);
    }

    #[test]
    fn test_empty_toml_yields_defaults() {
        let settings: SandboxSettings = toml::from_str("").unwrap();
        assert_eq!(settings, SandboxSettings::default());
    }

    #[test]
    fn test_partial_toml_fills_remaining_fields() {
        let settings: SandboxSettings = toml::from_str(
            r#"
            [limits]
            memory_bytes = 1024
            pids_limit = 4
            "#,
        )
        .unwrap();
        assert_eq!(settings.limits.memory_bytes, 1024);
        assert_eq!(settings.limits.pids_limit, 4);
        assert_eq!(settings.limits.nano_cpus, 1_000_000_000);
    }

    #[test]
    fn test_settings_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sandbox.toml");
        let path = path.to_str().unwrap();

        let mut settings = SandboxSettings::default();
        settings.limits.memory_bytes = 42;
        settings.save_to_file(path).unwrap();

        let loaded = SandboxSettings::load_from_file(path).unwrap();
        assert_eq!(loaded, settings);
    }
}
