//! Daemon settings for secopsd.
//!
//! Loaded from `secopsd.toml` in the secure directory, or defaults. These
//! tune the controller itself; the notifier document is a separate file
//! owned by `ConfigStore`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Skip the platform reboot signals and always treat a reboot as
    /// required (always-notify mode)
    #[serde(default = "default_always_require_reboot")]
    pub always_require_reboot: bool,

    /// Decision loop cadence in seconds
    #[serde(default = "default_loop_interval")]
    pub loop_interval_secs: u64,

    /// Sleep after a failed config reload before retrying
    #[serde(default = "default_reload_retry")]
    pub reload_retry_secs: u64,

    /// Timeout for scheduler and reboot check commands
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Timeout for the patch-status HTTP call
    #[serde(default = "default_patch_check_timeout")]
    pub patch_check_timeout_secs: u64,

    /// Wait before the post-reboot patch scan
    #[serde(default = "default_post_reboot_settle")]
    pub post_reboot_settle_secs: u64,

    /// Timeout for package-manager helpers (yum-utils install)
    #[serde(default = "default_package_tool_timeout")]
    pub package_tool_timeout_secs: u64,

    /// Warning window between "reboot now" and the actual reboot
    #[serde(default = "default_reboot_grace")]
    pub reboot_grace_secs: u64,
}

fn default_always_require_reboot() -> bool {
    true
}

fn default_loop_interval() -> u64 {
    1
}

fn default_reload_retry() -> u64 {
    5
}

fn default_command_timeout() -> u64 {
    30
}

fn default_patch_check_timeout() -> u64 {
    30
}

fn default_post_reboot_settle() -> u64 {
    10
}

fn default_package_tool_timeout() -> u64 {
    600
}

fn default_reboot_grace() -> u64 {
    120 // 2 minutes
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            always_require_reboot: default_always_require_reboot(),
            loop_interval_secs: default_loop_interval(),
            reload_retry_secs: default_reload_retry(),
            command_timeout_secs: default_command_timeout(),
            patch_check_timeout_secs: default_patch_check_timeout(),
            post_reboot_settle_secs: default_post_reboot_settle(),
            package_tool_timeout_secs: default_package_tool_timeout(),
            reboot_grace_secs: default_reboot_grace(),
        }
    }
}

impl Settings {
    /// Load settings from file, or return defaults
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            info!("[BOOT] No settings at {}, using defaults", path.display());
            return Self::default();
        }
        Self::load_from_path(path).unwrap_or_else(|e| {
            warn!("[BOOT] Invalid settings, using defaults: {:#}", e);
            Self::default()
        })
    }

    fn load_from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings {}", path.display()))?;
        let settings: Settings = toml::from_str(&content)
            .with_context(|| format!("Failed to parse settings {}", path.display()))?;
        info!("[BOOT] Loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn loop_interval(&self) -> Duration {
        Duration::from_secs(self.loop_interval_secs.max(1))
    }

    pub fn reload_retry(&self) -> Duration {
        Duration::from_secs(self.reload_retry_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn patch_check_timeout(&self) -> Duration {
        Duration::from_secs(self.patch_check_timeout_secs)
    }

    pub fn post_reboot_settle(&self) -> Duration {
        Duration::from_secs(self.post_reboot_settle_secs)
    }

    pub fn package_tool_timeout(&self) -> Duration {
        Duration::from_secs(self.package_tool_timeout_secs)
    }
}
