//! Task Scheduler adapter for Windows hosts.

use std::path::PathBuf;
use std::time::Duration;

use secops_common::paths::TASK_NAME;
use secops_common::SecurePaths;
use tracing::{debug, info};

use super::scripts;
use super::{ScheduleRequest, SchedulerError, SchedulingAdapter};
use crate::command;
use crate::settings::Settings;

pub struct WindowsTaskScheduler {
    task_name: String,
    notifier_exe: PathBuf,
    reboot_grace_secs: u64,
    command_timeout: Duration,
}

impl WindowsTaskScheduler {
    pub fn new(paths: &SecurePaths, settings: &Settings) -> Self {
        Self {
            task_name: TASK_NAME.to_string(),
            notifier_exe: paths.notifier_app(),
            reboot_grace_secs: settings.reboot_grace_secs,
            command_timeout: settings.command_timeout(),
        }
    }

    async fn powershell(&self, op: &'static str, script: &str) -> Result<(), SchedulerError> {
        let result = command::run_powershell(script, self.command_timeout).await;
        if result.success() {
            Ok(())
        } else {
            Err(SchedulerError::Command {
                op,
                detail: result.describe(),
            })
        }
    }
}

#[async_trait::async_trait]
impl SchedulingAdapter for WindowsTaskScheduler {
    fn name(&self) -> &'static str {
        "windows-task"
    }

    async fn schedule_action(&self, request: &ScheduleRequest) -> Result<(), SchedulerError> {
        debug!("[SCHED] schedule_action {:?}", request);
        self.cancel_action().await?;

        let script = scripts::ps_register_notifier_task(
            &self.task_name,
            &self.notifier_exe,
            request.scheduled_time.as_deref(),
        );
        self.powershell("schedule action", &script).await?;
        info!(
            "[SCHED] Task '{}' created (at={:?})",
            self.task_name, request.scheduled_time
        );
        Ok(())
    }

    async fn schedule_reboot_now(&self, _custom_message: &str) -> Result<(), SchedulerError> {
        // The notifier task must not linger next to the reboot task
        self.cancel_action().await?;

        let script = scripts::ps_register_reboot_now_task(&self.task_name, self.reboot_grace_secs);
        self.powershell("schedule reboot now", &script).await?;
        info!(
            "[SCHED] Task '{}' created for reboot in {}",
            self.task_name,
            scripts::grace_wording(self.reboot_grace_secs)
        );
        Ok(())
    }

    async fn cancel_action(&self) -> Result<(), SchedulerError> {
        self.powershell("cancel action", &scripts::ps_unregister_task(&self.task_name))
            .await?;
        debug!("[SCHED] Task '{}' unregistered", self.task_name);
        Ok(())
    }

    async fn cleanup(&self) -> Result<(), SchedulerError> {
        self.cancel_action().await
    }
}
