use std::sync::Arc;

use anyhow::{Context, Result};
use secops_common::{SecurePaths, VERSION};
use secopsd::{signals, Daemon, Outcome};
use tokio::sync::Notify;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Environment flag that raises the default log level to debug
const DEBUG_ENV: &str = "SECOPS_DEBUG";

#[tokio::main]
async fn main() -> Result<()> {
    let verbose = debug_enabled(std::env::var(DEBUG_ENV).ok().as_deref());
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    info!("[BOOT] secopsd v{} starting (debug={})", VERSION, verbose);

    if let Err(e) = run().await {
        error!("[FATAL] {:#}", e);
        return Err(e);
    }
    Ok(())
}

async fn run() -> Result<()> {
    let paths = SecurePaths::resolve().context("Failed to get secure path")?;

    let shutdown = Arc::new(Notify::new());
    signals::spawn_shutdown_handler(Arc::clone(&shutdown));

    match Daemon::with_settings_file(paths, shutdown).run().await? {
        Outcome::Interrupted => info!("[SHUTDOWN] Stopped by signal"),
        Outcome::Completed => info!("[SHUTDOWN] Post-reboot work complete"),
    }
    Ok(())
}

fn debug_enabled(value: Option<&str>) -> bool {
    matches!(value.map(str::trim), Some(v) if v == "1" || v.eq_ignore_ascii_case("true"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_flag_values() {
        assert!(debug_enabled(Some("1")));
        assert!(debug_enabled(Some("TRUE")));
        assert!(debug_enabled(Some("true")));
        assert!(!debug_enabled(Some("0")));
        assert!(!debug_enabled(Some("yes")));
        assert!(!debug_enabled(None));
    }
}
