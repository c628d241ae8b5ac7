//! Watch-folder change detection.
//!
//! Filesystem events and a periodic sweep both feed one trigger channel.
//! A single consumer debounces bursts (an unpacking package produces many
//! events) into one rescan at a time.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::deploy::coordinator::Deployer;

/// Quiet period gathered into one rescan.
pub const DEBOUNCE: Duration = Duration::from_millis(750);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RescanTrigger {
    FileSystem,
    Sweep,
}

/// Watches the watch folder recursively for artifact changes.
pub struct FolderWatcher {
    path: PathBuf,
    trigger_tx: mpsc::UnboundedSender<RescanTrigger>,
}

impl FolderWatcher {
    /// Returns the watcher and the receiving end of its trigger channel.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<RescanTrigger>) {
        let (trigger_tx, trigger_rx) = mpsc::unbounded_channel();
        (
            Self {
                path: path.to_path_buf(),
                trigger_tx,
            },
            trigger_rx,
        )
    }

    /// Sender for other trigger sources (the sweeper).
    pub fn trigger_sender(&self) -> mpsc::UnboundedSender<RescanTrigger> {
        self.trigger_tx.clone()
    }

    /// Start watching on notify's background thread. Keep the returned
    /// watcher alive for as long as events are wanted.
    pub fn run(&self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.trigger_tx.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if event.kind.is_create() || event.kind.is_modify() || event.kind.is_remove() {
                        tracing::trace!(paths = ?event.paths, "Watch folder change detected");
                        let _ = tx.send(RescanTrigger::FileSystem);
                    }
                }
                Err(e) => tracing::error!("Watch error: {:?}", e),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.path, RecursiveMode::Recursive)?;

        tracing::info!(path = ?self.path, "Watch folder watcher started");
        Ok(watcher)
    }
}

/// Periodically request a full rescan. A zero interval disables the sweep.
pub fn spawn_sweeper(
    interval: Duration,
    tx: mpsc::UnboundedSender<RescanTrigger>,
    mut shutdown: broadcast::Receiver<()>,
) -> Option<JoinHandle<()>> {
    if interval.is_zero() {
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // the first tick fires immediately; the initial scan covers it
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if tx.send(RescanTrigger::Sweep).is_err() {
                        break;
                    }
                }
                _ = shutdown.recv() => break,
            }
        }
    }))
}

/// Consume triggers and run debounced rescans until shutdown.
pub async fn run_rescans(
    deployer: Arc<Deployer>,
    mut triggers: mpsc::UnboundedReceiver<RescanTrigger>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        let first = tokio::select! {
            trigger = triggers.recv() => match trigger {
                Some(trigger) => trigger,
                None => break,
            },
            _ = shutdown.recv() => break,
        };

        tokio::time::sleep(DEBOUNCE).await;
        let mut coalesced = 1;
        while triggers.try_recv().is_ok() {
            coalesced += 1;
        }

        tracing::debug!(trigger = ?first, coalesced, "Rescanning watch folder");
        match deployer.rescan().await {
            Ok(report) if !report.promoted.is_empty() || !report.removed.is_empty() => {
                tracing::info!(promoted = ?report.promoted, removed = ?report.removed, "Watch folder rescan applied");
            }
            Ok(report) if !report.deferred.is_empty() => {
                tracing::info!(deferred = ?report.deferred, "Watch folder rescan left busy artifacts");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Watch folder rescan failed"),
        }
    }
    tracing::debug!("Rescan loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sweeper_sends_until_shutdown() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = broadcast::channel(1);
        let handle = spawn_sweeper(Duration::from_millis(10), tx, stop_rx).unwrap();

        assert_eq!(rx.recv().await, Some(RescanTrigger::Sweep));
        stop_tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn zero_interval_disables_sweep() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let (_stop_tx, stop_rx) = broadcast::channel(1);
        assert!(spawn_sweeper(Duration::ZERO, tx, stop_rx).is_none());
    }
}
