//! Process Singleton Lock
//!
//! Ensures only one controller runs per host using a PID file:
//! - the file holds the holder's PID as plain decimal text
//! - a recorded PID that is no longer alive is reclaimed (liveness, not age)
//! - an absent or unparsable file is simply overwritten
//!
//! The lock is released on drop. A crash leaves the file behind; the next
//! start detects the dead PID and takes over.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process;

use tracing::{debug, info, warn};

use crate::atomic::{atomic_write, remove_if_exists, set_mode};

/// PID file mode (rw-r-----)
const PID_FILE_MODE: u32 = 0o640;

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("another instance is already running with PID {pid}")]
    AlreadyRunning { pid: u32 },

    #[error("{op}: error accessing PID file {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Held singleton lock; removes the PID file on release or drop
#[derive(Debug)]
pub struct ProcessLock {
    path: PathBuf,
    pid: u32,
    released: bool,
}

impl ProcessLock {
    /// Attempt to become the single running instance
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self, LockError> {
        let path = path.into();

        if let Some(pid) = read_holder(&path)? {
            if is_process_alive(pid) {
                return Err(LockError::AlreadyRunning { pid });
            }
            info!("[LOCK] Process with PID {} is not running, reclaiming lock", pid);
        }

        let pid = process::id();
        atomic_write(&path, pid.to_string().as_bytes()).map_err(|source| LockError::Io {
            op: "acquire",
            path: path.clone(),
            source,
        })?;
        if let Err(e) = set_mode(&path, PID_FILE_MODE) {
            warn!("[LOCK] Could not set permissions on {}: {}", path.display(), e);
        }

        debug!("[LOCK] Acquired {} (pid={})", path.display(), pid);
        Ok(Self {
            path,
            pid,
            released: false,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the PID file if it still records this process
    pub fn release(&mut self) -> Result<(), LockError> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        match read_holder(&self.path)? {
            Some(pid) if pid != self.pid => {
                warn!(
                    "[LOCK] PID file now records {} (we are {}), leaving it in place",
                    pid, self.pid
                );
                Ok(())
            }
            _ => {
                remove_if_exists(&self.path).map_err(|source| LockError::Io {
                    op: "release",
                    path: self.path.clone(),
                    source,
                })?;
                debug!("[LOCK] Released {}", self.path.display());
                Ok(())
            }
        }
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("[LOCK] Failed to release lock: {}", e);
        }
    }
}

/// PID recorded in the lock file, if the file exists and parses
pub fn read_holder(path: &Path) -> Result<Option<u32>, LockError> {
    match fs::read_to_string(path) {
        Ok(content) => {
            let pid = parse_pid(&content);
            if pid.is_none() {
                debug!("[LOCK] Invalid PID in {}, treating as free", path.display());
            }
            Ok(pid)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(LockError::Io {
            op: "read holder",
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn parse_pid(content: &str) -> Option<u32> {
    content.trim().parse::<u32>().ok().filter(|pid| *pid > 0)
}

/// OS-level liveness check for a PID
#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }

    // Signal 0 only checks existence
    match kill(Pid::from_raw(raw), None::<Signal>) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
pub fn is_process_alive(pid: u32) -> bool {
    use sysinfo::{Pid, System};

    let mut system = System::new();
    system.refresh_process(Pid::from_u32(pid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[cfg(unix)]
    fn dead_pid() -> u32 {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        pid
    }

    #[test]
    fn test_acquire_writes_our_pid() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("secops_notifier.pid");

        let lock = ProcessLock::acquire(&path).unwrap();
        assert_eq!(lock.pid(), process::id());
        assert_eq!(fs::read_to_string(&path).unwrap(), process::id().to_string());
    }

    #[test]
    fn test_second_acquire_fails_while_holder_alive() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("secops_notifier.pid");

        let _first = ProcessLock::acquire(&path).unwrap();
        let second = ProcessLock::acquire(&path);
        assert!(matches!(
            second,
            Err(LockError::AlreadyRunning { pid }) if pid == process::id()
        ));
        // The failed attempt must not have removed the holder's file
        assert!(path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_dead_holder_is_reclaimed() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("secops_notifier.pid");
        let stale = dead_pid();
        fs::write(&path, stale.to_string()).unwrap();

        let lock = ProcessLock::acquire(&path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), lock.pid().to_string());
        assert_ne!(lock.pid(), stale);
    }

    #[test]
    fn test_garbage_pid_file_is_overwritten() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("secops_notifier.pid");
        fs::write(&path, "not-a-pid\n").unwrap();

        let _lock = ProcessLock::acquire(&path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), process::id().to_string());
    }

    #[test]
    fn test_release_and_drop_remove_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("secops_notifier.pid");

        let mut lock = ProcessLock::acquire(&path).unwrap();
        lock.release().unwrap();
        assert!(!path.exists());
        // Idempotent
        lock.release().unwrap();

        {
            let _lock = ProcessLock::acquire(&path).unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_parse_pid() {
        assert_eq!(parse_pid("1234\n"), Some(1234));
        assert_eq!(parse_pid("  42 "), Some(42));
        assert_eq!(parse_pid("0"), None);
        assert_eq!(parse_pid("-5"), None);
        assert_eq!(parse_pid(""), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_liveness() {
        assert!(is_process_alive(process::id()));
        assert!(!is_process_alive(dead_pid()));
        assert!(!is_process_alive(0));
    }
}
