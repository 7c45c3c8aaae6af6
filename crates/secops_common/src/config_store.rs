//! Config Store
//!
//! Owns the notifier document and the mutex that serialises every access to
//! it within this process. Another process (the notifier surface, the
//! scheduled shell script) may rewrite the file at any time, so `update`
//! always re-reads the on-disk copy before applying a patch. The only
//! atomicity guarantee is the temp-file rename in `atomic_write`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, info, warn};

use crate::atomic::{atomic_write, set_mode, SHARED_FILE_MODE};
use crate::notifier_config::{ConfigPatch, NotifierConfig};

/// Config store errors. Each variant names the operation that failed.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{op}: error reading {}: {source}", path.display())]
    Read {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{op}: error parsing {}: {source}", path.display())]
    Parse {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{op}: error serializing config: {source}")]
    Serialize {
        op: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("{op}: error writing {}: {source}", path.display())]
    Write {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Mutex-guarded, atomically persisted notifier document
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    version: String,
    document: Mutex<NotifierConfig>,
}

impl ConfigStore {
    /// Create a store for `path`. Nothing is read until `load`.
    pub fn new(path: impl Into<PathBuf>, version: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            version: version.into(),
            document: Mutex::new(NotifierConfig::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Last document loaded or written by this process
    pub fn snapshot(&self) -> NotifierConfig {
        self.lock().clone()
    }

    /// Load the document from disk.
    ///
    /// A missing file is replaced with the initial document. A document
    /// written by another version is rewritten with this version and a
    /// fresh timestamp, every other field preserved.
    pub fn load(&self) -> Result<NotifierConfig, ConfigError> {
        let mut cached = self.lock();
        debug!("Loading config from {}", self.path.display());

        let mut doc = match fs::read(&self.path) {
            Ok(bytes) => parse_document("load", &self.path, &bytes)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("Config not found at {}, writing defaults", self.path.display());
                let mut doc = NotifierConfig::initial(&self.version);
                self.persist("load", &mut doc)?;
                *cached = doc.clone();
                return Ok(doc);
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    op: "load",
                    path: self.path.clone(),
                    source,
                })
            }
        };

        if doc.version != self.version {
            info!(
                "Config version {:?} differs from {}, rewriting marker",
                doc.version, self.version
            );
            doc.version = self.version.clone();
            self.persist("load", &mut doc)?;
        }

        *cached = doc.clone();
        Ok(doc)
    }

    /// Persist the in-memory document with a fresh `last_updated`
    pub fn save(&self) -> Result<(), ConfigError> {
        let mut cached = self.lock();
        let mut doc = cached.clone();
        self.persist("save", &mut doc)?;
        *cached = doc;
        Ok(())
    }

    /// Read-modify-write against the on-disk document.
    ///
    /// Fields absent from `patch` keep whatever the file holds right now,
    /// including values another process wrote since our last `load`. On
    /// error the cached document is left untouched.
    pub fn update(&self, patch: &ConfigPatch) -> Result<NotifierConfig, ConfigError> {
        let mut cached = self.lock();

        let bytes = fs::read(&self.path).map_err(|source| ConfigError::Read {
            op: "update",
            path: self.path.clone(),
            source,
        })?;
        let mut doc = parse_document("update", &self.path, &bytes)?;

        patch.apply_to(&mut doc);
        doc.version = self.version.clone();
        self.persist("update", &mut doc)?;

        debug!("Config updated: {:?}", patch);
        *cached = doc.clone();
        Ok(doc)
    }

    fn persist(&self, op: &'static str, doc: &mut NotifierConfig) -> Result<(), ConfigError> {
        let version = doc.version.clone();
        doc.stamp(&version);

        let data = serde_json::to_vec_pretty(doc)
            .map_err(|source| ConfigError::Serialize { op, source })?;

        atomic_write(&self.path, &data).map_err(|source| ConfigError::Write {
            op,
            path: self.path.clone(),
            source,
        })?;

        if let Err(e) = set_mode(&self.path, SHARED_FILE_MODE) {
            warn!("Could not set permissions on {}: {}", self.path.display(), e);
        }

        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, NotifierConfig> {
        self.document
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Read a document without taking ownership of it (no migration, no writes)
pub fn read_document(path: &Path) -> Result<NotifierConfig, ConfigError> {
    let bytes = fs::read(path).map_err(|source| ConfigError::Read {
        op: "read",
        path: path.to_path_buf(),
        source,
    })?;
    parse_document("read", path, &bytes)
}

fn parse_document(
    op: &'static str,
    path: &Path,
    bytes: &[u8],
) -> Result<NotifierConfig, ConfigError> {
    serde_json::from_slice(bytes).map_err(|source| ConfigError::Parse {
        op,
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier_config::RebootPolicy;
    use serde_json::json;
    use tempfile::TempDir;

    fn store_in(temp: &TempDir) -> ConfigStore {
        ConfigStore::new(temp.path().join("SecOpsNotifierConfig.json"), "2.0.0")
    }

    #[test]
    fn test_load_creates_default_document() {
        let temp = TempDir::new().unwrap();
        let store = store_in(&temp);

        let doc = store.load().unwrap();
        assert_eq!(doc.reboot_config, RebootPolicy::GracefulReboot);
        assert_eq!(doc.delay_counter, 3);
        assert_eq!(doc.version, "2.0.0");
        assert!(store.path().exists());
    }

    #[test]
    fn test_default_document_round_trips_byte_for_byte() {
        let temp = TempDir::new().unwrap();
        let store = store_in(&temp);

        let first = store.load().unwrap();
        let bytes_after_create = fs::read(store.path()).unwrap();

        let second = store.load().unwrap();
        let bytes_after_reload = fs::read(store.path()).unwrap();

        assert_eq!(first, second);
        assert_eq!(bytes_after_create, bytes_after_reload);
        assert_eq!(serde_json::to_vec_pretty(&second).unwrap(), bytes_after_reload);
    }

    #[test]
    fn test_version_mismatch_rewrites_marker_only() {
        let temp = TempDir::new().unwrap();
        let store = store_in(&temp);
        fs::write(
            store.path(),
            serde_json::to_vec(&json!({
                "reboot_config": "Schedule reboot",
                "scheduled_time": "2030-05-01 10:00:00",
                "delay_counter": 1,
                "asset": "db-7",
                "version": "1.4.0",
                "last_updated": "2020-01-01T00:00:00Z"
            }))
            .unwrap(),
        )
        .unwrap();

        let doc = store.load().unwrap();
        assert_eq!(doc.version, "2.0.0");
        assert_ne!(doc.last_updated, "2020-01-01T00:00:00Z");
        assert_eq!(doc.reboot_config, RebootPolicy::ScheduleReboot);
        assert_eq!(doc.scheduled_time, "2030-05-01 10:00:00");
        assert_eq!(doc.asset, "db-7");

        let on_disk = read_document(store.path()).unwrap();
        assert_eq!(on_disk.version, "2.0.0");
    }

    #[test]
    fn test_malformed_document_fails_load() {
        let temp = TempDir::new().unwrap();
        let store = store_in(&temp);
        fs::write(store.path(), "{ not json").unwrap();

        let err = store.load().unwrap_err();
        assert!(matches!(err, ConfigError::Parse { op: "load", .. }));
        assert!(err.to_string().starts_with("load: error parsing"));
    }

    #[test]
    fn test_null_fields_load_as_defaults() {
        let temp = TempDir::new().unwrap();
        let store = store_in(&temp);
        fs::write(
            store.path(),
            serde_json::to_vec(&json!({
                "base_url": null,
                "jump_host_base_url": null,
                "reboot_config": "Graceful reboot",
                "scheduled_time": null,
                "identifier": null,
                "task_scheduled": null,
                "delay_counter": 3,
                "patch_record_id_list": null,
                "version": "2.0.0"
            }))
            .unwrap(),
        )
        .unwrap();

        let doc = store.load().unwrap();
        assert_eq!(doc.base_url, "");
        assert_eq!(doc.jump_host_base_url, "");
        assert_eq!(doc.scheduled_time, "");
        assert!(!doc.task_scheduled);
        assert!(doc.patch_record_id_list.is_empty());
        assert_eq!(doc.delay_counter, 3);
        assert_eq!(doc.reboot_config, RebootPolicy::GracefulReboot);

        // Updates go through the same parse
        let updated = store
            .update(&ConfigPatch {
                task_scheduled: Some(true),
                ..Default::default()
            })
            .unwrap();
        assert!(updated.task_scheduled);
    }

    #[test]
    fn test_null_policy_is_graceful() {
        let temp = TempDir::new().unwrap();
        let store = store_in(&temp);
        fs::write(
            store.path(),
            r#"{"reboot_config": null, "reboot_now": null, "version": "2.0.0"}"#,
        )
        .unwrap();

        let doc = store.load().unwrap();
        assert_eq!(doc.reboot_config, RebootPolicy::GracefulReboot);
        assert!(!doc.reboot_now);
    }

    #[test]
    fn test_update_preserves_untouched_fields() {
        let temp = TempDir::new().unwrap();
        let store = store_in(&temp);
        store.load().unwrap();

        // Another process edits the file behind our back
        let mut external = read_document(store.path()).unwrap();
        external.delay_counter = 1;
        external.asset = "web-3".to_string();
        external.patch_record_id_list = vec!["p-1".to_string(), "p-2".to_string()];
        external
            .extra
            .insert("notifier_state".to_string(), json!({"open": true}));
        fs::write(store.path(), serde_json::to_vec_pretty(&external).unwrap()).unwrap();

        let updated = store
            .update(&ConfigPatch {
                task_scheduled: Some(true),
                ..Default::default()
            })
            .unwrap();

        assert!(updated.task_scheduled);
        assert_eq!(updated.delay_counter, 1);
        assert_eq!(updated.asset, "web-3");
        assert_eq!(updated.patch_record_id_list, vec!["p-1", "p-2"]);
        assert_eq!(updated.extra["notifier_state"], json!({"open": true}));
        assert_eq!(updated.custom_message, external.custom_message);
        assert_eq!(read_document(store.path()).unwrap(), updated);
        assert_eq!(store.snapshot(), updated);
    }

    #[test]
    fn test_failed_update_leaves_cache_untouched() {
        let temp = TempDir::new().unwrap();
        let store = store_in(&temp);
        let before = store.load().unwrap();

        fs::write(store.path(), "garbage").unwrap();
        let err = store
            .update(&ConfigPatch {
                reboot_now: Some(true),
                ..Default::default()
            })
            .unwrap_err();

        assert!(matches!(err, ConfigError::Parse { op: "update", .. }));
        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn test_update_without_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        let store = store_in(&temp);
        let err = store.update(&ConfigPatch::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Read { op: "update", .. }));
    }

    #[test]
    fn test_save_refreshes_timestamp() {
        let temp = TempDir::new().unwrap();
        let store = store_in(&temp);
        store.load().unwrap();

        store.save().unwrap();
        let on_disk = read_document(store.path()).unwrap();
        assert_eq!(on_disk, store.snapshot());
        assert!(!on_disk.last_updated.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_written_file_is_group_shared() {
        use std::os::unix::fs::PermissionsExt;
        let temp = TempDir::new().unwrap();
        let store = store_in(&temp);
        store.load().unwrap();
        let mode = fs::metadata(store.path()).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o660);
    }
}
