//! Shutdown signal handling
//!
//! SIGINT/SIGTERM (Ctrl-C on Windows) wake the decision loop through a
//! `Notify`; the loop returns and the process lock is dropped on the way out.

use std::sync::Arc;

use tokio::sync::Notify;
use tracing::{info, warn};

/// Spawn the task that turns the first shutdown signal into `notify_one`
pub fn spawn_shutdown_handler(shutdown: Arc<Notify>) {
    tokio::spawn(async move {
        if wait_for_signal().await {
            shutdown.notify_one();
        }
    });
}

#[cfg(unix)]
async fn wait_for_signal() -> bool {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!("[SHUTDOWN] Failed to register SIGTERM handler: {}", e);
            return wait_for_ctrl_c().await;
        }
    };

    let sigint = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("[SHUTDOWN] Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => info!("[SHUTDOWN] SIGTERM received"),
        _ = sigint => info!("[SHUTDOWN] SIGINT received"),
    }
    true
}

#[cfg(not(unix))]
async fn wait_for_signal() -> bool {
    wait_for_ctrl_c().await
}

async fn wait_for_ctrl_c() -> bool {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("[SHUTDOWN] Ctrl-C received");
            true
        }
        Err(e) => {
            warn!("[SHUTDOWN] Failed to listen for Ctrl-C: {}", e);
            false
        }
    }
}
