//! Platform Scheduling Adapters
//!
//! One adapter per host family, chosen once at startup:
//! - Windows: a named Task Scheduler task, replaced on every registration
//! - Linux / macOS: a self-sleeping background script in the secure directory
//!
//! Every adapter keeps at most one scheduled action alive per host and
//! treats cancelling an absent action as success.

pub mod scripts;
pub mod unix_script;
pub mod windows;

use std::io;
use std::path::PathBuf;

use secops_common::{HostOs, SecurePaths};

use crate::settings::Settings;

pub use unix_script::{ScriptFlavor, UnixScriptScheduler};
pub use windows::WindowsTaskScheduler;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("{op}: {detail}")]
    Command { op: &'static str, detail: String },

    #[error("{op}: error writing script {}: {source}", path.display())]
    Script {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{op}: error launching {}: {source}", path.display())]
    Launch {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{op}: error removing {}: {source}", path.display())]
    Remove {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// What the notifier workflow should be scheduled with
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleRequest {
    /// `YYYY-MM-DD HH:MM:SS` local time; `None` means "now" on Windows and
    /// "act immediately" in the Unix scripts
    pub scheduled_time: Option<String>,
    /// Text shown to the user alongside the reminder
    pub custom_message: String,
}

#[async_trait::async_trait]
pub trait SchedulingAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Replace any pending action with one firing at the requested time
    async fn schedule_action(&self, request: &ScheduleRequest) -> Result<(), SchedulerError>;

    /// Start the reboot warning window right away
    async fn schedule_reboot_now(&self, custom_message: &str) -> Result<(), SchedulerError>;

    /// Remove the pending action; succeeds when there is none
    async fn cancel_action(&self) -> Result<(), SchedulerError>;

    /// Remove every artifact the adapter left on the host
    async fn cleanup(&self) -> Result<(), SchedulerError>;
}

/// Adapter for the host the paths were resolved for
pub fn for_host(paths: &SecurePaths, settings: &Settings) -> Box<dyn SchedulingAdapter> {
    match paths.os() {
        HostOs::Windows => Box::new(WindowsTaskScheduler::new(paths, settings)),
        HostOs::Linux => Box::new(UnixScriptScheduler::new(
            ScriptFlavor::Linux,
            paths,
            settings,
        )),
        HostOs::MacOs => Box::new(UnixScriptScheduler::new(ScriptFlavor::Mac, paths, settings)),
    }
}
