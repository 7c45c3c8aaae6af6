//! Background-script scheduler for Linux and macOS.
//!
//! The task script owns the long sleep and its own locked rewrite of the
//! document, so the daemon can exit and restart while an action is pending.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secops_common::atomic::{atomic_write, remove_if_exists, set_mode, EXECUTABLE_FILE_MODE};
use secops_common::SecurePaths;
use tracing::{debug, info, warn};

use super::scripts;
use super::{ScheduleRequest, SchedulerError, SchedulingAdapter};
use crate::command::{self, spawn_detached_with_env};
use crate::settings::Settings;

/// How often cancellation re-checks for a surviving script
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Polls before cancellation gives up waiting
const CANCEL_POLL_ATTEMPTS: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptFlavor {
    Linux,
    Mac,
}

pub struct UnixScriptScheduler {
    flavor: ScriptFlavor,
    config_file: PathBuf,
    task_script: PathBuf,
    reboot_now_script: PathBuf,
    notifier_app: PathBuf,
    reboot_grace_secs: u64,
    command_timeout: Duration,
    /// Set on top of the daemon's environment for launched scripts
    script_env: Vec<(OsString, OsString)>,
}

impl UnixScriptScheduler {
    pub fn new(flavor: ScriptFlavor, paths: &SecurePaths, settings: &Settings) -> Self {
        Self {
            flavor,
            config_file: paths.notifier_config(),
            task_script: paths.task_script(),
            reboot_now_script: paths.reboot_now_script(),
            notifier_app: paths.notifier_app(),
            reboot_grace_secs: settings.reboot_grace_secs,
            command_timeout: settings.command_timeout(),
            script_env: Vec::new(),
        }
    }

    /// Add a variable to the environment of every script this scheduler launches
    pub fn with_script_env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.script_env.push((key.into(), value.into()));
        self
    }

    pub fn task_script(&self) -> &Path {
        &self.task_script
    }

    fn render_task_script(&self, request: &ScheduleRequest) -> String {
        let time = request.scheduled_time.as_deref().unwrap_or_default();
        match self.flavor {
            ScriptFlavor::Linux => {
                scripts::linux_task_script(&self.config_file, time, &request.custom_message)
            }
            ScriptFlavor::Mac => scripts::mac_task_script(
                &self.config_file,
                time,
                &request.custom_message,
                &self.notifier_app,
            ),
        }
    }

    fn render_reboot_now_script(&self, message: &str) -> String {
        match self.flavor {
            ScriptFlavor::Linux => scripts::linux_reboot_now_script(message, self.reboot_grace_secs),
            ScriptFlavor::Mac => scripts::mac_reboot_now_script(message, self.reboot_grace_secs),
        }
    }

    /// Write `body` as an executable script and start it detached
    fn launch(&self, op: &'static str, path: &Path, body: &str) -> Result<u32, SchedulerError> {
        atomic_write(path, body.as_bytes()).map_err(|source| SchedulerError::Script {
            op,
            path: path.to_path_buf(),
            source,
        })?;
        if let Err(e) = set_mode(path, EXECUTABLE_FILE_MODE) {
            warn!("[SCHED] Could not set permissions on {}: {}", path.display(), e);
        }

        spawn_detached_with_env("bash", &[path.as_os_str()], None, &self.script_env).map_err(|source| {
            SchedulerError::Launch {
                op,
                path: path.to_path_buf(),
                source,
            }
        })
    }

    /// Whether any process still runs the task script
    async fn script_running(&self) -> bool {
        let pattern = self.task_script.to_string_lossy();
        let result = command::run("pgrep", &["-f", &*pattern], self.command_timeout).await;
        // pgrep: 0 = match, 1 = none; anything else is unknown, assume gone
        result.error.is_none() && result.exit_code == 0
    }
}

#[async_trait::async_trait]
impl SchedulingAdapter for UnixScriptScheduler {
    fn name(&self) -> &'static str {
        match self.flavor {
            ScriptFlavor::Linux => "linux-script",
            ScriptFlavor::Mac => "mac-script",
        }
    }

    async fn schedule_action(&self, request: &ScheduleRequest) -> Result<(), SchedulerError> {
        debug!("[SCHED] schedule_action {:?}", request);
        self.cancel_action().await?;

        let body = self.render_task_script(request);
        let pid = self.launch("schedule action", &self.task_script, &body)?;
        info!(
            "[SCHED] Task script {} started (pid={}, at={:?})",
            self.task_script.display(),
            pid,
            request.scheduled_time
        );
        Ok(())
    }

    async fn schedule_reboot_now(&self, custom_message: &str) -> Result<(), SchedulerError> {
        let body = self.render_reboot_now_script(custom_message);
        let pid = self.launch("schedule reboot now", &self.reboot_now_script, &body)?;
        info!(
            "[SCHED] Reboot scheduled in {} (pid={})",
            scripts::grace_wording(self.reboot_grace_secs),
            pid
        );
        Ok(())
    }

    async fn cancel_action(&self) -> Result<(), SchedulerError> {
        let pattern = self.task_script.to_string_lossy().to_string();
        // Invoked directly, not via a shell whose own command line would match
        let kill = command::run("pkill", &["-f", pattern.as_str()], self.command_timeout).await;
        if let Some(e) = &kill.error {
            warn!("[SCHED] pkill unavailable: {}", e);
        }

        let mut attempts = 0;
        while self.script_running().await {
            attempts += 1;
            if attempts >= CANCEL_POLL_ATTEMPTS {
                warn!(
                    "[SCHED] Task script still running after {}ms",
                    (CANCEL_POLL_INTERVAL * attempts).as_millis()
                );
                break;
            }
            tokio::time::sleep(CANCEL_POLL_INTERVAL).await;
        }

        match remove_if_exists(&self.task_script) {
            Ok(true) => {
                info!("[SCHED] Deleted task script {}", self.task_script.display());
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(source) => Err(SchedulerError::Remove {
                op: "cancel action",
                path: self.task_script.clone(),
                source,
            }),
        }
    }

    async fn cleanup(&self) -> Result<(), SchedulerError> {
        self.cancel_action().await?;
        remove_if_exists(&self.reboot_now_script).map_err(|source| SchedulerError::Remove {
            op: "cleanup",
            path: self.reboot_now_script.clone(),
            source,
        })?;
        Ok(())
    }
}
