//! SecOps Common - shared types for the reboot notifier daemon and CLI.
//!
//! Holds the notifier config document, its atomic store, the process
//! singleton lock and the on-disk locations both binaries agree on.

pub mod atomic;
pub mod config_store;
pub mod notifier_config;
pub mod obfuscation;
pub mod paths;
pub mod process_lock;

pub use config_store::{ConfigError, ConfigStore};
pub use notifier_config::{ConfigPatch, NotifierConfig, RebootPolicy};
pub use paths::{HostOs, SecurePaths};
pub use process_lock::{LockError, ProcessLock};

/// Version written into the config document's `version` marker
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
