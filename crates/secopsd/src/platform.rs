//! Per-OS startup and teardown hooks
//!
//! Everything here is best effort: failures are logged and the daemon
//! carries on.

use std::path::{Path, PathBuf};
use std::time::Duration;

use secops_common::atomic::remove_if_exists;
use secops_common::paths::SERVICE_NAME;
use secops_common::{HostOs, SecurePaths};
use tracing::{debug, info, warn};

use crate::command::{self, spawn_detached};
use crate::scheduler::scripts;
use crate::settings::Settings;

/// Script locations used by agents that predate the secure directory
pub const LEGACY_SCRIPT_PATHS: [&str; 2] = [
    "/tmp/secops_notifier_task.sh",
    "/tmp/secops_mac_reboot_now.sh",
];

const REBOOT_REQUIRED_NOTICE: &str = "Reboot required. Scheduling workflow started.";

pub struct PlatformHooks {
    os: HostOs,
    root: PathBuf,
    notifier_app: PathBuf,
    command_timeout: Duration,
}

impl PlatformHooks {
    pub fn new(paths: &SecurePaths, settings: &Settings) -> Self {
        Self {
            os: paths.os(),
            root: paths.root().to_path_buf(),
            notifier_app: paths.notifier_app(),
            command_timeout: settings.command_timeout(),
        }
    }

    /// Remove scripts older agents left in /tmp (macOS only)
    pub fn cleanup_legacy_scripts(&self) {
        if self.os != HostOs::MacOs {
            return;
        }
        remove_legacy_scripts(LEGACY_SCRIPT_PATHS.iter().map(Path::new));
    }

    /// Prepare the host for the notifier once a reboot is known to be needed
    pub async fn on_reboot_required(&self) {
        match self.os {
            HostOs::Windows => {
                // The notifier runs as the logged-in user and writes the document
                let script = scripts::ps_grant_users_full_control(&self.root);
                let result = command::run_powershell(&script, self.command_timeout).await;
                if !result.success() {
                    warn!("[BOOT] Error setting permissions: {}", result.describe());
                }
            }
            HostOs::MacOs => {
                if !self.notifier_running().await {
                    self.open_notifier_app();
                }
                notify_mac(REBOOT_REQUIRED_NOTICE);
            }
            HostOs::Linux => {}
        }
    }

    /// Stop the service wrapper so it does not restart us (Windows only)
    pub async fn stop_service(&self) {
        if self.os != HostOs::Windows {
            return;
        }
        let result =
            command::run_powershell(&scripts::ps_stop_service(SERVICE_NAME), self.command_timeout)
                .await;
        if result.success() {
            info!("[SHUTDOWN] Service '{}' stopped", SERVICE_NAME);
        } else {
            warn!("[SHUTDOWN] Error stopping service: {}", result.describe());
        }
    }

    async fn notifier_running(&self) -> bool {
        let result = command::run(
            "pgrep",
            &["-f", scripts::MAC_NOTIFIER_PROCESS],
            self.command_timeout,
        )
        .await;
        result.success()
    }

    fn open_notifier_app(&self) {
        if !self.notifier_app.exists() {
            warn!(
                "[BOOT] Could not find notifier app at {}",
                self.notifier_app.display()
            );
            return;
        }
        match spawn_detached("/usr/bin/open", &[self.notifier_app.as_os_str()], None) {
            Ok(_) => info!("[BOOT] Launched notifier app"),
            Err(e) => warn!("[BOOT] Failed to open notifier app: {}", e),
        }
    }
}

fn notify_mac(message: &str) {
    let statement = scripts::display_notification(message);
    if let Err(e) = spawn_detached("/usr/bin/osascript", &["-e", statement.as_str()], None) {
        warn!("[BOOT] Failed to post notification: {}", e);
    }
}

fn remove_legacy_scripts<'a>(paths: impl Iterator<Item = &'a Path>) {
    for path in paths {
        match remove_if_exists(path) {
            Ok(true) => info!("[BOOT] Removed old script: {}", path.display()),
            Ok(false) => debug!("[BOOT] No old script at {}", path.display()),
            Err(e) => warn!("[BOOT] Error removing old script {}: {}", path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_remove_legacy_scripts() {
        let temp = TempDir::new().unwrap();
        let present = temp.path().join("secops_notifier_task.sh");
        let absent = temp.path().join("secops_mac_reboot_now.sh");
        std::fs::write(&present, "#!/bin/bash\n").unwrap();

        remove_legacy_scripts([present.as_path(), absent.as_path()].into_iter());
        assert!(!present.exists());
        assert!(!absent.exists());
    }

    #[tokio::test]
    async fn test_linux_hooks_are_noops() {
        let temp = TempDir::new().unwrap();
        let paths = SecurePaths::under(temp.path(), HostOs::Linux).unwrap();
        let hooks = PlatformHooks::new(&paths, &Settings::default());
        hooks.cleanup_legacy_scripts();
        hooks.on_reboot_required().await;
        hooks.stop_service().await;
    }
}
