//! Secure storage locations for the reboot notifier.
//!
//! Every artifact the controller owns (config document, PID file, scheduled
//! scripts, patch-scan binary and its config) lives in one per-host
//! directory whose location depends on the operating system.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Name of the Windows service and of the per-host storage directory
pub const SERVICE_NAME: &str = "SecOpsNotifierService";

/// Name of the Windows scheduled task
pub const TASK_NAME: &str = "SecOpsNotifierTask";

pub const NOTIFIER_CONFIG_FILE_NAME: &str = "SecOpsNotifierConfig.json";
pub const PATCH_BINARY_CONFIG_FILE_NAME: &str = "SecOpsPatchBinaryConfig.json";
pub const WINDOWS_PATCH_BINARY_FILE_NAME: &str = "SecOpsPatchWindowsBinary.exe";
pub const LINUX_PATCH_BINARY_FILE_NAME: &str = "SecOpsPatchLinuxBinary";
pub const MAC_PATCH_BINARY_FILE_NAME: &str = "SecOpsPatchMacBinary";

pub const PID_FILE_NAME: &str = "secops_notifier.pid";
pub const SETTINGS_FILE_NAME: &str = "secopsd.toml";
pub const TASK_SCRIPT_FILE_NAME: &str = "secops_notifier_task.sh";
pub const LINUX_REBOOT_NOW_SCRIPT_FILE_NAME: &str = "secops_reboot_now.sh";
pub const MAC_REBOOT_NOW_SCRIPT_FILE_NAME: &str = "secops_mac_reboot_now.sh";
pub const PENDING_REBOOT_FLAG_FILE_NAME: &str = "pendingReboot.txt";

/// Unix install location shared by Linux and macOS
const UNIX_SECURE_DIR: &str = "/usr/local/bin/SecOpsNotifierService";

/// Directory mode on Unix hosts (rwxr-x---)
#[cfg(unix)]
const SECURE_DIR_MODE: u32 = 0o750;

/// Operating systems the controller knows how to drive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostOs {
    Windows,
    Linux,
    MacOs,
}

impl HostOs {
    /// Detect the running operating system
    pub fn current() -> Result<Self, PathError> {
        Self::from_os_name(std::env::consts::OS)
    }

    pub fn from_os_name(name: &str) -> Result<Self, PathError> {
        match name {
            "windows" => Ok(Self::Windows),
            "linux" => Ok(Self::Linux),
            "macos" => Ok(Self::MacOs),
            other => Err(PathError::UnsupportedOs(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Windows => "windows",
            Self::Linux => "linux",
            Self::MacOs => "macos",
        }
    }

    pub fn is_unix(&self) -> bool {
        !matches!(self, Self::Windows)
    }

    /// File name of the platform's patch-scan binary
    pub fn patch_binary_file_name(&self) -> &'static str {
        match self {
            Self::Windows => WINDOWS_PATCH_BINARY_FILE_NAME,
            Self::Linux => LINUX_PATCH_BINARY_FILE_NAME,
            Self::MacOs => MAC_PATCH_BINARY_FILE_NAME,
        }
    }

    fn notifier_app_file_name(&self) -> &'static str {
        match self {
            Self::Windows => "SecOpsNotifier.exe",
            Self::Linux => "SecOpsNotifier",
            Self::MacOs => "SecOpsRebootNotifier.app",
        }
    }

    fn reboot_now_script_file_name(&self) -> &'static str {
        match self {
            Self::MacOs => MAC_REBOOT_NOW_SCRIPT_FILE_NAME,
            _ => LINUX_REBOOT_NOW_SCRIPT_FILE_NAME,
        }
    }
}

impl fmt::Display for HostOs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Path resolution errors
#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error("unsupported OS: {0}")]
    UnsupportedOs(String),

    #[error("failed to create secure directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Default storage directory for an operating system
pub fn default_secure_dir(os: HostOs) -> PathBuf {
    match os {
        HostOs::Windows => {
            let program_data =
                std::env::var("ProgramData").unwrap_or_else(|_| r"C:\ProgramData".to_string());
            PathBuf::from(program_data).join(SERVICE_NAME)
        }
        HostOs::Linux | HostOs::MacOs => PathBuf::from(UNIX_SECURE_DIR),
    }
}

/// All well-known file locations under the secure directory
#[derive(Debug, Clone)]
pub struct SecurePaths {
    root: PathBuf,
    os: HostOs,
}

impl SecurePaths {
    /// Resolve the platform default directory, creating it if needed
    pub fn resolve() -> Result<Self, PathError> {
        let os = HostOs::current()?;
        Self::under(default_secure_dir(os), os)
    }

    /// Use an explicit root (tests, alternative installs)
    pub fn under(root: impl Into<PathBuf>, os: HostOs) -> Result<Self, PathError> {
        let root = root.into();
        ensure_secure_dir(&root)?;
        Ok(Self { root, os })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn os(&self) -> HostOs {
        self.os
    }

    pub fn notifier_config(&self) -> PathBuf {
        self.root.join(NOTIFIER_CONFIG_FILE_NAME)
    }

    pub fn pid_file(&self) -> PathBuf {
        self.root.join(PID_FILE_NAME)
    }

    pub fn settings(&self) -> PathBuf {
        self.root.join(SETTINGS_FILE_NAME)
    }

    pub fn task_script(&self) -> PathBuf {
        self.root.join(TASK_SCRIPT_FILE_NAME)
    }

    pub fn reboot_now_script(&self) -> PathBuf {
        self.root.join(self.os.reboot_now_script_file_name())
    }

    pub fn notifier_app(&self) -> PathBuf {
        self.root.join(self.os.notifier_app_file_name())
    }

    pub fn patch_binary(&self) -> PathBuf {
        self.root.join(self.os.patch_binary_file_name())
    }

    pub fn patch_binary_config(&self) -> PathBuf {
        self.root.join(PATCH_BINARY_CONFIG_FILE_NAME)
    }

    pub fn pending_reboot_flag(&self) -> PathBuf {
        self.root.join(PENDING_REBOOT_FLAG_FILE_NAME)
    }
}

fn ensure_secure_dir(path: &Path) -> Result<(), PathError> {
    fs::create_dir_all(path).map_err(|source| PathError::CreateDir {
        path: path.to_path_buf(),
        source,
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(SECURE_DIR_MODE)) {
            tracing::warn!("Could not set secure permissions on {}: {}", path.display(), e);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_host_os_from_name() {
        assert_eq!(HostOs::from_os_name("linux").unwrap(), HostOs::Linux);
        assert_eq!(HostOs::from_os_name("macos").unwrap(), HostOs::MacOs);
        assert_eq!(HostOs::from_os_name("windows").unwrap(), HostOs::Windows);
        assert!(matches!(
            HostOs::from_os_name("freebsd"),
            Err(PathError::UnsupportedOs(_))
        ));
    }

    #[test]
    fn test_unix_default_dir() {
        assert_eq!(
            default_secure_dir(HostOs::Linux),
            PathBuf::from("/usr/local/bin/SecOpsNotifierService")
        );
        assert_eq!(default_secure_dir(HostOs::MacOs), default_secure_dir(HostOs::Linux));
    }

    #[test]
    fn test_paths_under_root() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("svc");
        let paths = SecurePaths::under(&root, HostOs::Linux).unwrap();

        assert!(root.is_dir());
        assert_eq!(paths.notifier_config(), root.join("SecOpsNotifierConfig.json"));
        assert_eq!(paths.pid_file(), root.join("secops_notifier.pid"));
        assert_eq!(paths.patch_binary(), root.join("SecOpsPatchLinuxBinary"));
        assert_eq!(paths.reboot_now_script(), root.join("secops_reboot_now.sh"));
    }

    #[test]
    fn test_platform_specific_names() {
        let temp = TempDir::new().unwrap();
        let mac = SecurePaths::under(temp.path(), HostOs::MacOs).unwrap();
        assert!(mac.notifier_app().ends_with("SecOpsRebootNotifier.app"));
        assert!(mac.reboot_now_script().ends_with("secops_mac_reboot_now.sh"));

        let win = SecurePaths::under(temp.path(), HostOs::Windows).unwrap();
        assert!(win.patch_binary().ends_with("SecOpsPatchWindowsBinary.exe"));
    }
}
