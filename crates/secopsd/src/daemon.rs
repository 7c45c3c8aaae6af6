//! Daemon lifecycle
//!
//! boot: settings, singleton lock, legacy cleanup, first config load,
//! reboot check. Then one of two branches:
//! - reboot required: platform hooks, then the decision loop until a signal
//! - no reboot needed: settle, reload, patch scan, cleanup, release, exit
//!
//! Boot failures are returned as errors and end the process non-zero.

use std::sync::Arc;

use anyhow::{Context, Result};
use secops_common::{ConfigStore, ProcessLock, SecurePaths, VERSION};
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::controller::Controller;
use crate::patch_client::PatchTaskClient;
use crate::patch_scan::PatchScanLauncher;
use crate::platform::PlatformHooks;
use crate::reboot_check::RebootCheck;
use crate::scheduler::{self, SchedulingAdapter};
use crate::settings::Settings;

/// How the daemon finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Decision loop stopped by a shutdown signal
    Interrupted,
    /// Post-reboot work done; the service can go away
    Completed,
}

pub struct Daemon {
    paths: SecurePaths,
    settings: Settings,
    hooks: PlatformHooks,
    shutdown: Arc<Notify>,
    adapter: Option<Box<dyn SchedulingAdapter>>,
    reboot_required: Option<bool>,
}

impl Daemon {
    pub fn new(paths: SecurePaths, settings: Settings, shutdown: Arc<Notify>) -> Self {
        let hooks = PlatformHooks::new(&paths, &settings);
        Self {
            paths,
            settings,
            hooks,
            shutdown,
            adapter: None,
            reboot_required: None,
        }
    }

    /// Load `secopsd.toml` from the secure directory
    pub fn with_settings_file(paths: SecurePaths, shutdown: Arc<Notify>) -> Self {
        let settings = Settings::load(&paths.settings());
        Self::new(paths, settings, shutdown)
    }

    /// Use `adapter` instead of the host's native scheduler
    pub fn with_adapter(mut self, adapter: Box<dyn SchedulingAdapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    /// Take `required` as the reboot check's answer instead of checking the host
    pub fn with_reboot_required(mut self, required: bool) -> Self {
        self.reboot_required = Some(required);
        self
    }

    pub async fn run(mut self) -> Result<Outcome> {
        let mut lock = ProcessLock::acquire(self.paths.pid_file())
            .context("Could not acquire process lock")?;
        info!("[LOCK] Running as pid {} ({})", lock.pid(), lock.path().display());

        self.hooks.cleanup_legacy_scripts();

        let store = Arc::new(ConfigStore::new(self.paths.notifier_config(), VERSION));
        store.load().context("Error loading configuration")?;
        info!("[BOOT] Config loaded from {}", store.path().display());

        let required = match self.reboot_required {
            Some(required) => required,
            None => RebootCheck::new(&self.paths, &self.settings)
                .reboot_required()
                .await
                .context("Error checking reboot requirement")?,
        };
        info!("[BOOT] Reboot required: {}", required);

        let adapter = match self.adapter.take() {
            Some(adapter) => adapter,
            None => scheduler::for_host(&self.paths, &self.settings),
        };

        if required {
            self.hooks.on_reboot_required().await;
            let controller = Controller::new(
                store,
                adapter,
                PatchTaskClient::new(self.settings.patch_check_timeout()),
                self.paths.os(),
                self.settings.clone(),
            );
            controller.run(Arc::clone(&self.shutdown)).await;
            release(&mut lock);
            return Ok(Outcome::Interrupted);
        }

        self.post_reboot(&store, adapter.as_ref(), &mut lock).await
    }

    async fn post_reboot(
        &self,
        store: &ConfigStore,
        adapter: &dyn SchedulingAdapter,
        lock: &mut ProcessLock,
    ) -> Result<Outcome> {
        info!("[BOOT] Machine rebooted successfully");

        tokio::select! {
            _ = self.shutdown.notified() => {
                info!("[SHUTDOWN] Interrupted before post-reboot patch scan");
                release(lock);
                return Ok(Outcome::Interrupted);
            }
            _ = tokio::time::sleep(self.settings.post_reboot_settle()) => {}
        }

        let config = store
            .load()
            .context("Error loading config after reboot")?;

        if let Err(e) = PatchScanLauncher::new(&self.paths).launch(&config) {
            warn!("[SCAN] Error running patch scan: {}", e);
        }

        if let Err(e) = adapter.cleanup().await {
            warn!("[SHUTDOWN] Error removing scheduled action: {}", e);
        }
        release(lock);
        self.hooks.stop_service().await;

        Ok(Outcome::Completed)
    }
}

fn release(lock: &mut ProcessLock) {
    match lock.release() {
        Ok(()) => info!("[LOCK] Released"),
        Err(e) => warn!("[LOCK] Error releasing process lock: {}", e),
    }
}
