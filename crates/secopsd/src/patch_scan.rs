//! Post-reboot patch scan launcher
//!
//! Stages the platform patch binary and its JSON config in a fresh working
//! directory under the secure root and starts it detached.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use secops_common::atomic::{atomic_write, set_mode, EXECUTABLE_FILE_MODE};
use secops_common::paths::PATCH_BINARY_CONFIG_FILE_NAME;
use secops_common::{NotifierConfig, SecurePaths};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::command::spawn_detached;

pub const PATCH_SCAN_ACTION: &str = "Patch Scan";
const WORKING_DIR_PREFIX: &str = "Patch_Scan";

/// Staged config files (rw-r-----)
const STAGED_FILE_MODE: u32 = 0o640;

#[derive(Debug, thiserror::Error)]
pub enum PatchScanError {
    #[error("error reading patch binary config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("error parsing patch binary config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("patch binary config {} is not a JSON object", path.display())]
    NotAnObject { path: PathBuf },

    #[error("error serializing patch binary config: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("error creating working directory {}: {source}", path.display())]
    WorkingDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("error writing {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("error copying {} to {}: {source}", from.display(), to.display())]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("error starting patch binary {}: {source}", path.display())]
    Launch {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct PatchScanLauncher {
    root: PathBuf,
    binary: PathBuf,
    binary_file_name: &'static str,
    binary_config: PathBuf,
}

impl PatchScanLauncher {
    pub fn new(paths: &SecurePaths) -> Self {
        Self {
            root: paths.root().to_path_buf(),
            binary: paths.patch_binary(),
            binary_file_name: paths.os().patch_binary_file_name(),
            binary_config: paths.patch_binary_config(),
        }
    }

    /// Stage and start a patch scan; returns the working directory
    pub fn launch(&self, notifier: &NotifierConfig) -> Result<PathBuf, PatchScanError> {
        info!("[SCAN] Initiating patch scan");
        let working_dir = self.prepare(notifier, Local::now())?;

        let binary = working_dir.join(self.binary_file_name);
        let pid = spawn_detached(&binary, &[] as &[&str], Some(&working_dir)).map_err(|source| {
            PatchScanError::Launch {
                path: binary.clone(),
                source,
            }
        })?;

        info!(
            "[SCAN] Started {} in {} (pid={})",
            self.binary_file_name,
            working_dir.display(),
            pid
        );
        Ok(working_dir)
    }

    /// Everything up to the launch: working dir, rewritten config, copies
    pub fn prepare(
        &self,
        notifier: &NotifierConfig,
        now: DateTime<Local>,
    ) -> Result<PathBuf, PatchScanError> {
        let mut doc = self.read_binary_config()?;

        let asset = doc
            .get("asset")
            .and_then(Value::as_str)
            .filter(|a| !a.is_empty())
            .unwrap_or(notifier.asset.as_str())
            .to_string();
        let working_dir = create_working_dir(&self.root, &asset, now)?;

        let embedded = serde_json::to_value(notifier).map_err(PatchScanError::Serialize)?;
        doc.insert("action".to_string(), Value::String(PATCH_SCAN_ACTION.to_string()));
        doc.insert("secops_notifier_config".to_string(), embedded);
        doc.insert(
            "working_dir".to_string(),
            Value::String(working_dir.to_string_lossy().to_string()),
        );

        let bytes = serde_json::to_vec(&doc).map_err(PatchScanError::Serialize)?;
        atomic_write(&self.binary_config, &bytes).map_err(|source| PatchScanError::Write {
            path: self.binary_config.clone(),
            source,
        })?;
        restrict(&self.binary_config, STAGED_FILE_MODE);

        let staged_binary = working_dir.join(self.binary_file_name);
        copy(&self.binary, &staged_binary)?;
        restrict(&staged_binary, EXECUTABLE_FILE_MODE);

        let staged_config = working_dir.join(PATCH_BINARY_CONFIG_FILE_NAME);
        copy(&self.binary_config, &staged_config)?;
        restrict(&staged_config, STAGED_FILE_MODE);

        debug!("[SCAN] Staged patch scan in {}", working_dir.display());
        Ok(working_dir)
    }

    fn read_binary_config(&self) -> Result<Map<String, Value>, PatchScanError> {
        let bytes = fs::read(&self.binary_config).map_err(|source| PatchScanError::Read {
            path: self.binary_config.clone(),
            source,
        })?;
        match serde_json::from_slice(&bytes) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(PatchScanError::NotAnObject {
                path: self.binary_config.clone(),
            }),
            Err(source) => Err(PatchScanError::Parse {
                path: self.binary_config.clone(),
                source,
            }),
        }
    }
}

/// `{root}/Patch_Scan_{asset}_{YYYYmmddHHMMSS}`, suffixed when taken
pub fn create_working_dir(
    root: &Path,
    asset: &str,
    now: DateTime<Local>,
) -> Result<PathBuf, PatchScanError> {
    let base = format!(
        "{}_{}_{}",
        WORKING_DIR_PREFIX,
        sanitize_component(asset),
        now.format("%Y%m%d%H%M%S")
    );

    let mut dir = root.join(&base);
    if dir.exists() {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        dir = root.join(format!("{}_{}", base, &suffix[..8]));
    }

    fs::create_dir_all(&dir).map_err(|source| PatchScanError::WorkingDir {
        path: dir.clone(),
        source,
    })?;
    restrict(&dir, EXECUTABLE_FILE_MODE);
    Ok(dir)
}

/// Keep a directory name component free of separators and shell specials
fn sanitize_component(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn copy(from: &Path, to: &Path) -> Result<(), PatchScanError> {
    fs::copy(from, to).map_err(|source| PatchScanError::Copy {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    })?;
    Ok(())
}

fn restrict(path: &Path, mode: u32) {
    if let Err(e) = set_mode(path, mode) {
        warn!("[SCAN] Could not set permissions on {}: {}", path.display(), e);
    }
}
