//! Reboot Decision Loop
//!
//! One iteration per wake:
//! 1. reload the document (a failure backs off and retries, never exits)
//! 2. resolve `scheduled_time`, deriving a Linux default from the policy
//! 3. `reboot_now`: cancel the pending action, and unless a patch task is
//!    running start the reboot window, then clear the flag
//! 4. otherwise, with no action registered, schedule one
//!
//! Document writes go through `ConfigStore::update`, which re-reads the file
//! first, so edits made by the notifier between iterations survive.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Local};
use secops_common::notifier_config::{
    format_schedule_time, parse_schedule_time, SCHEDULE_TIME_FORMAT,
};
use secops_common::{ConfigError, ConfigPatch, ConfigStore, HostOs, NotifierConfig, RebootPolicy};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::patch_client::PatchTaskClient;
use crate::scheduler::{ScheduleRequest, SchedulerError, SchedulingAdapter};
use crate::settings::Settings;

/// Linux default delay for the force policy
pub const FORCE_REBOOT_DELAY_MINUTES: i64 = 5;

/// Linux default delay for the graceful policy
pub const GRACEFUL_REBOOT_DELAY_MINUTES: i64 = 15;

/// Where the loop stands after an iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Reboot requested but the backend reports a running patch task
    WaitingForPatchIdle,
    /// Reboot warning window started
    ForceRebootPending,
    /// No action registered for this cycle yet
    GracefulSchedulePending,
    /// An action is registered; nothing to do
    TaskScheduled,
}

#[derive(Debug, thiserror::Error)]
pub enum TickError {
    #[error("reload config: {0}")]
    Reload(#[source] ConfigError),

    #[error("{0}")]
    Schedule(#[from] SchedulerError),

    #[error("update config: {0}")]
    Update(#[source] ConfigError),
}

/// `scheduled_time` as the scheduler should see it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTime {
    pub value: Option<String>,
    /// Computed from the policy rather than read from the document
    pub derived: bool,
}

/// Normalise a stored time, or derive the Linux default for empty ones.
///
/// An unparsable stored value is passed through unchanged; the Unix script
/// treats it as already due.
pub fn resolve_scheduled_time(
    raw: &str,
    policy: &RebootPolicy,
    os: HostOs,
    now: DateTime<Local>,
) -> ResolvedTime {
    let raw = raw.trim();
    if !raw.is_empty() {
        let value = match parse_schedule_time(raw) {
            Some(parsed) => parsed.format(SCHEDULE_TIME_FORMAT).to_string(),
            None => {
                warn!("[LOOP] Unparsable scheduled_time {:?}, passing through", raw);
                raw.to_string()
            }
        };
        return ResolvedTime {
            value: Some(value),
            derived: false,
        };
    }

    if os != HostOs::Linux {
        return ResolvedTime {
            value: None,
            derived: false,
        };
    }

    let delay = match policy {
        RebootPolicy::ForceReboot => FORCE_REBOOT_DELAY_MINUTES,
        RebootPolicy::GracefulReboot => GRACEFUL_REBOOT_DELAY_MINUTES,
        _ => {
            return ResolvedTime {
                value: None,
                derived: false,
            }
        }
    };
    ResolvedTime {
        value: Some(format_schedule_time(&(now + ChronoDuration::minutes(delay)))),
        derived: true,
    }
}

pub struct Controller {
    store: Arc<ConfigStore>,
    adapter: Box<dyn SchedulingAdapter>,
    patch_client: PatchTaskClient,
    os: HostOs,
    settings: Settings,
    /// Reboot script started but `reboot_now` not yet cleared on disk
    reboot_started: AtomicBool,
}

impl Controller {
    pub fn new(
        store: Arc<ConfigStore>,
        adapter: Box<dyn SchedulingAdapter>,
        patch_client: PatchTaskClient,
        os: HostOs,
        settings: Settings,
    ) -> Self {
        Self {
            store,
            adapter,
            patch_client,
            os,
            settings,
            reboot_started: AtomicBool::new(false),
        }
    }

    pub fn adapter(&self) -> &dyn SchedulingAdapter {
        self.adapter.as_ref()
    }

    /// Loop until `shutdown` is notified
    pub async fn run(&self, shutdown: Arc<Notify>) {
        info!(
            "[LOOP] Decision loop started (adapter={}, interval={:?})",
            self.adapter.name(),
            self.settings.loop_interval()
        );
        let mut last_state = None;

        loop {
            let pause = match self.tick().await {
                Ok(state) => {
                    if last_state != Some(state) {
                        info!("[LOOP] State: {:?}", state);
                        last_state = Some(state);
                    }
                    self.settings.loop_interval()
                }
                Err(e @ TickError::Reload(_)) => {
                    warn!("[LOOP] {}; retrying in {:?}", e, self.settings.reload_retry());
                    self.settings.reload_retry()
                }
                Err(e) => {
                    warn!("[LOOP] {}", e);
                    self.settings.loop_interval()
                }
            };

            tokio::select! {
                _ = shutdown.notified() => {
                    info!("[SHUTDOWN] Decision loop stopping");
                    return;
                }
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }

    /// One iteration at the current local time
    pub async fn tick(&self) -> Result<LoopState, TickError> {
        self.tick_at(Local::now()).await
    }

    pub async fn tick_at(&self, now: DateTime<Local>) -> Result<LoopState, TickError> {
        let config = self.store.load().map_err(TickError::Reload)?;
        let resolved =
            resolve_scheduled_time(&config.scheduled_time, &config.reboot_config, self.os, now);
        debug!(
            "[LOOP] reboot_now={} task_scheduled={} scheduled_time={:?}",
            config.reboot_now, config.task_scheduled, resolved.value
        );

        if config.reboot_now {
            return self.handle_reboot_now(&config).await;
        }

        if config.task_scheduled {
            return Ok(LoopState::TaskScheduled);
        }

        self.schedule(&config, resolved).await
    }

    async fn handle_reboot_now(&self, config: &NotifierConfig) -> Result<LoopState, TickError> {
        if self.reboot_started.load(Ordering::SeqCst) {
            // The window is already running; only the write is outstanding
            warn!("[LOOP] Retrying document update for the started reboot");
            return self.mark_reboot_started();
        }

        if let Err(e) = self.adapter.cancel_action().await {
            warn!("[LOOP] Error while cancelling pending action: {}", e);
        }

        if self.patch_client.is_patch_task_running(config).await {
            debug!("[LOOP] Patch task running, deferring reboot");
            return Ok(LoopState::WaitingForPatchIdle);
        }

        self.adapter
            .schedule_reboot_now(&config.custom_message)
            .await?;
        self.reboot_started.store(true, Ordering::SeqCst);
        self.mark_reboot_started()
    }

    fn mark_reboot_started(&self) -> Result<LoopState, TickError> {
        let patch = ConfigPatch {
            task_scheduled: Some(true),
            reboot_now: Some(false),
            ..Default::default()
        };
        if let Err(e) = self.store.update(&patch) {
            warn!(
                "[LOOP] Reboot started but reboot_now could not be cleared: {}",
                e
            );
            return Err(TickError::Update(e));
        }
        self.reboot_started.store(false, Ordering::SeqCst);
        Ok(LoopState::ForceRebootPending)
    }

    async fn schedule(
        &self,
        config: &NotifierConfig,
        resolved: ResolvedTime,
    ) -> Result<LoopState, TickError> {
        let request = ScheduleRequest {
            scheduled_time: resolved.value.clone(),
            custom_message: config.custom_message.clone(),
        };
        if let Err(e) = self.adapter.schedule_action(&request).await {
            // task_scheduled stays false, so the next tick retries
            warn!("[LOOP] {}", e);
            return Ok(LoopState::GracefulSchedulePending);
        }

        let patch = ConfigPatch {
            task_scheduled: Some(true),
            scheduled_time: resolved.value.filter(|_| resolved.derived),
            ..Default::default()
        };
        self.store.update(&patch).map_err(TickError::Update)?;
        Ok(LoopState::TaskScheduled)
    }
}
