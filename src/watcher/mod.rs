//! Watches the configuration file and drives reconciliation. Change
//! detection polls the file's modification time; a 500 ms quiet window
//! collapses bursts of writes into a single reload.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::{self, reconciler, Config};
use crate::plugin::Manager;

const POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(250);
const DEBOUNCE: std::time::Duration = std::time::Duration::from_millis(500);

pub struct ConfigWatcher {
    path: PathBuf,
    manager: Arc<Manager>,
    last_config: Config,
    shutdown_rx: broadcast::Receiver<()>,
}

impl ConfigWatcher {
    pub fn new(
        path: PathBuf,
        manager: Arc<Manager>,
        initial: Config,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            path,
            manager,
            last_config: initial,
            shutdown_rx,
        }
    }

    pub async fn run(mut self) {
        info!(path = %self.path.display(), "watching config file");

        let mut last_seen = modified(&self.path);
        let mut interval = tokio::time::interval(POLL_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    debug!("config watcher stopping");
                    return;
                }
                _ = interval.tick() => {
                    let current = modified(&self.path);
                    if current != last_seen {
                        last_seen = current;
                        self.settle(&mut last_seen).await;
                        self.reload().await;
                    }
                }
            }
        }
    }

    // Wait until the file has been quiet for the debounce window, so one
    // reload covers a burst of writes.
    async fn settle(&self, last_seen: &mut Option<SystemTime>) {
        loop {
            tokio::time::sleep(DEBOUNCE).await;
            let current = modified(&self.path);
            if current == *last_seen {
                return;
            }
            *last_seen = current;
        }
    }

    async fn reload(&mut self) {
        info!(path = %self.path.display(), "watch:change reloading config");

        let new_config = match config::load_from_path(&self.path) {
            Ok(config) => config,
            Err(e) => {
                // The previous snapshot stays in effect; no sessions are
                // touched.
                warn!(kind = e.kind(), "watch:invalid config, keeping previous: {}", e);
                return;
            }
        };

        let plan = reconciler::diff(&self.last_config, &new_config);
        if plan.is_empty() {
            debug!("watch:unchanged");
        } else {
            info!(
                stop = plan.stop.len(),
                start = plan.start.len(),
                reload = plan.reload.len(),
                "watch:apply"
            );
            reconciler::apply(&self.manager, &plan, &new_config).await;
        }

        // Committed even when individual actions failed: reload is
        // desired-state convergence, not a transaction.
        self.last_config = new_config;
    }
}

fn modified(path: &std::path::Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}
