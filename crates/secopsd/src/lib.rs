//! secopsd - reboot orchestration daemon
//!
//! Library half of the daemon so the integration tests can drive the
//! decision loop, the scheduling adapters and the patch task client
//! directly.

pub mod command;
pub mod controller;
pub mod daemon;
pub mod patch_client;
pub mod patch_scan;
pub mod platform;
pub mod reboot_check;
pub mod scheduler;
pub mod settings;
pub mod signals;

pub use controller::{Controller, LoopState};
pub use daemon::{Daemon, Outcome};
pub use patch_client::PatchTaskClient;
pub use scheduler::{ScheduleRequest, SchedulerError, SchedulingAdapter};
pub use settings::Settings;
