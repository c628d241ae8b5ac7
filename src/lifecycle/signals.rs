//! OS signal handling and parent-process liveness.
//!
//! # Responsibilities
//! - Translate SIGINT/SIGTERM into a shutdown trigger
//! - Detect that the launching parent process is gone
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - Parent liveness is polled from the dispatcher's periodic check, not a timer of its own

use std::path::Path;

use crate::lifecycle::Shutdown;

/// Wait for SIGINT or SIGTERM and trigger shutdown.
pub async fn listen_for_signals(shutdown: Shutdown) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Interrupt received"),
        _ = terminate => tracing::info!("Terminate received"),
        _ = shutdown.wait() => return,
    }
    shutdown.trigger();
}

/// Whether the process `pid` still exists.
pub fn parent_alive(pid: u32) -> bool {
    if cfg!(target_os = "linux") {
        Path::new("/proc").join(pid.to_string()).exists()
    } else {
        true
    }
}

/// Periodic check that triggers shutdown once `parent_pid` has exited.
pub fn parent_watchdog(parent_pid: Option<u32>, shutdown: Shutdown) -> impl Fn() + Send + Sync + 'static {
    move || {
        if let Some(pid) = parent_pid {
            if !parent_alive(pid) && !shutdown.is_triggered() {
                tracing::warn!(parent_pid = pid, "Parent process exited, shutting down");
                shutdown.trigger();
            }
        }
    }
}
