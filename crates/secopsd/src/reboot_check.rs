//! Reboot Requirement Check
//!
//! Decides the daemon's branch at startup. With `always_require_reboot` set
//! (the default) the platform signals are never consulted.

use std::path::PathBuf;
use std::time::Duration;

use secops_common::{HostOs, SecurePaths};
use tracing::{debug, info, warn};

use crate::command::{self, CommandResult};
use crate::scheduler::scripts::{
    LINUX_PACKAGE_MANAGER_CHECK, LINUX_REBOOT_REQUIRED_CHECK, PS_REBOOT_PENDING_CHECK,
};
use crate::settings::Settings;

const WINDOWS_REQUIRED_MARKER: &str = "A restart is required.";
const LINUX_REQUIRED_MARKER: &str = "System requires a reboot";
const MAC_REQUIRED_MARKER: &str = "restart required";

#[derive(Debug, thiserror::Error)]
#[error("{op}: {detail}")]
pub struct RebootCheckError {
    op: &'static str,
    detail: String,
}

impl RebootCheckError {
    fn from_result(op: &'static str, result: &CommandResult) -> Self {
        Self {
            op,
            detail: result.describe(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RebootCheck {
    os: HostOs,
    always_require: bool,
    pending_flag: PathBuf,
    command_timeout: Duration,
    package_tool_timeout: Duration,
}

impl RebootCheck {
    pub fn new(paths: &SecurePaths, settings: &Settings) -> Self {
        Self {
            os: paths.os(),
            always_require: settings.always_require_reboot,
            pending_flag: paths.pending_reboot_flag(),
            command_timeout: settings.command_timeout(),
            package_tool_timeout: settings.package_tool_timeout(),
        }
    }

    pub async fn reboot_required(&self) -> Result<bool, RebootCheckError> {
        if self.always_require {
            info!("[BOOT] always_require_reboot is set, skipping platform reboot signals");
            return Ok(true);
        }

        let required = match self.os {
            HostOs::Windows => self.check_windows().await?,
            HostOs::Linux => self.check_linux().await?,
            HostOs::MacOs => self.check_mac().await?,
        };
        debug!("[BOOT] {} reboot signal: {}", self.os, required);
        Ok(required)
    }

    async fn check_windows(&self) -> Result<bool, RebootCheckError> {
        let result = command::run_powershell(PS_REBOOT_PENDING_CHECK, self.command_timeout).await;
        if !result.success() {
            return Err(RebootCheckError::from_result("check windows reboot status", &result));
        }
        Ok(result.stdout.contains(WINDOWS_REQUIRED_MARKER))
    }

    async fn check_linux(&self) -> Result<bool, RebootCheckError> {
        if self.package_manager().await.as_deref() == Some("yum") {
            // needs-restarting ships in yum-utils
            let install =
                command::run_bash("yum install -y yum-utils", self.package_tool_timeout).await;
            if !install.success() {
                warn!("[BOOT] yum-utils install failed: {}", install.describe());
            }
        }

        let result = command::run_bash(LINUX_REBOOT_REQUIRED_CHECK, self.command_timeout).await;
        if !result.success() {
            return Err(RebootCheckError::from_result("check linux reboot status", &result));
        }
        Ok(result.stdout.contains(LINUX_REQUIRED_MARKER))
    }

    async fn check_mac(&self) -> Result<bool, RebootCheckError> {
        if self.pending_flag.exists() {
            info!("[BOOT] Found {}", self.pending_flag.display());
            return Ok(true);
        }

        let result = command::run_bash("softwareupdate -l 2>&1", self.package_tool_timeout).await;
        if result.error.is_some() {
            return Err(RebootCheckError::from_result("check macos updates", &result));
        }
        Ok(mentions_restart_required(&result.stdout))
    }

    async fn package_manager(&self) -> Option<String> {
        let result = command::run_bash(LINUX_PACKAGE_MANAGER_CHECK, self.command_timeout).await;
        let name = result.stdout.trim();
        if !result.success() || name.is_empty() {
            return None;
        }
        debug!("[BOOT] Package manager: {}", name);
        Some(name.to_string())
    }
}

fn mentions_restart_required(output: &str) -> bool {
    output.to_lowercase().contains(MAC_REQUIRED_MARKER)
}
