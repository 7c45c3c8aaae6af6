//! Command Executor
//!
//! Timeout-bounded subprocess runner used by the scheduling adapters, the
//! reboot check and the patch scan launcher. Captures exit code, stdout,
//! stderr and duration without interpreting them.

use std::ffi::{OsStr, OsString};
use std::io;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::{debug, warn};

/// Why a command produced no exit status
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("failed to start: {0}")]
    Spawn(String),

    #[error("timed out after {0:?}")]
    TimedOut(Duration),
}

/// Outcome of one subprocess invocation
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// Command line as logged
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    /// -1 when the process never reported a status
    pub exit_code: i32,
    pub duration: Duration,
    /// Execution failure, distinct from a non-zero exit
    pub error: Option<CommandError>,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.error.is_none() && self.exit_code == 0
    }

    /// One-line summary for error reporting
    pub fn describe(&self) -> String {
        match &self.error {
            Some(e) => format!("`{}` {}", self.command, e),
            None => format!(
                "`{}` exited with {} after {}ms: {}",
                self.command,
                self.exit_code,
                self.duration.as_millis(),
                self.stderr.trim()
            ),
        }
    }
}

/// Run a script with `bash -c`
pub async fn run_bash(script: &str, timeout: Duration) -> CommandResult {
    run("bash", &["-c", script], timeout).await
}

/// Run a script with `powershell -Command`
pub async fn run_powershell(script: &str, timeout: Duration) -> CommandResult {
    run(
        "powershell",
        &["-NoProfile", "-NonInteractive", "-Command", script],
        timeout,
    )
    .await
}

/// Run `program` with `args`, killing it if `timeout` elapses
pub async fn run<S: AsRef<OsStr>>(program: &str, args: &[S], timeout: Duration) -> CommandResult {
    let command = display_command(program, args);
    let start = Instant::now();

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let outcome = tokio::time::timeout(timeout, cmd.output()).await;
    let duration = start.elapsed();

    let result = match outcome {
        Ok(Ok(output)) => CommandResult {
            command,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
            duration,
            error: None,
        },
        Ok(Err(e)) => CommandResult {
            command,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: -1,
            duration,
            error: Some(CommandError::Spawn(e.to_string())),
        },
        // Dropping the output future kills the child
        Err(_) => CommandResult {
            command,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: -1,
            duration,
            error: Some(CommandError::TimedOut(timeout)),
        },
    };

    // Non-zero exits are the caller's call; only execution failures warn here
    match &result.error {
        None => debug!(
            "Command `{}` exit={} in {}ms",
            result.command,
            result.exit_code,
            result.duration.as_millis()
        ),
        Some(_) => warn!("Command failed: {}", result.describe()),
    }
    result
}

/// Start `program` without waiting for it.
///
/// The child gets its own process group and null stdio so it survives the
/// daemon. Must be called from within a tokio runtime, which reaps the
/// child in the background once it exits.
pub fn spawn_detached<S: AsRef<OsStr>>(
    program: impl AsRef<OsStr>,
    args: &[S],
    cwd: Option<&Path>,
) -> io::Result<u32> {
    spawn_detached_with_env(program, args, cwd, &[])
}

/// `spawn_detached` with extra variables layered over the inherited environment
pub fn spawn_detached_with_env<S: AsRef<OsStr>>(
    program: impl AsRef<OsStr>,
    args: &[S],
    cwd: Option<&Path>,
    envs: &[(OsString, OsString)],
) -> io::Result<u32> {
    let mut std_cmd = std::process::Command::new(program.as_ref());
    std_cmd
        .args(args)
        .envs(envs.iter().map(|(k, v)| (k, v)))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    if let Some(dir) = cwd {
        std_cmd.current_dir(dir);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        std_cmd.process_group(0);
    }

    let child = Command::from(std_cmd).spawn()?;
    let pid = child.id().unwrap_or(0);
    debug!(
        "Detached `{}` (pid={})",
        display_command(&program.as_ref().to_string_lossy(), args),
        pid
    );
    Ok(pid)
}

fn display_command<S: AsRef<OsStr>>(program: &str, args: &[S]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(&arg.as_ref().to_string_lossy());
    }
    line
}
