//! Desired-state reconciliation between two config snapshots. The diff is
//! computed over enabled entries only; actions apply best-effort, in
//! stop → start → reload order.

use tracing::{info, warn};

use super::schema::{Config, ServerEntry};
use crate::plugin::Manager;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    /// Enabled before, absent or disabled now.
    pub stop: Vec<String>,
    /// Enabled now, absent or disabled before.
    pub start: Vec<String>,
    /// Enabled in both with structurally different entries.
    pub reload: Vec<String>,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.stop.is_empty() && self.start.is_empty() && self.reload.is_empty()
    }
}

pub fn diff(old: &Config, new: &Config) -> ReconcilePlan {
    let old_enabled = old.enabled_servers();
    let new_enabled = new.enabled_servers();

    let mut plan = ReconcilePlan::default();

    for name in old_enabled.keys() {
        if !new_enabled.contains_key(name) {
            plan.stop.push(name.clone());
        }
    }

    for (name, entry) in &new_enabled {
        match old_enabled.get(name) {
            None => plan.start.push(name.clone()),
            Some(previous) if entries_differ(previous, entry) => plan.reload.push(name.clone()),
            Some(_) => {}
        }
    }

    plan.stop.sort();
    plan.start.sort();
    plan.reload.sort();
    plan
}

// Canonical-value comparison: map fields compare order-insensitively.
fn entries_differ(a: &ServerEntry, b: &ServerEntry) -> bool {
    match (serde_json::to_value(a), serde_json::to_value(b)) {
        (Ok(a), Ok(b)) => a != b,
        _ => true,
    }
}

/// Apply a plan against the manager. Per-action failures are logged and do
/// not stop the reconciliation; the caller commits `new` as the last-applied
/// snapshot regardless.
pub async fn apply(manager: &Manager, plan: &ReconcilePlan, new: &Config) {
    for name in &plan.stop {
        info!(server = %name, "reconcile:stop");
        if let Err(e) = manager.stop_server(name).await {
            warn!(server = %name, kind = e.kind(), "reconcile:fail stopping: {}", e);
        }
    }

    for name in &plan.start {
        let Some(entry) = new.mcp_servers.get(name) else {
            continue;
        };
        info!(server = %name, "reconcile:start");
        if let Err(e) = manager.start_server(name, entry).await {
            warn!(server = %name, kind = e.kind(), "reconcile:fail starting: {}", e);
        }
    }

    for name in &plan.reload {
        let Some(entry) = new.mcp_servers.get(name) else {
            continue;
        };
        info!(server = %name, "reconcile:reload");
        if let Err(e) = manager.reload_server(name, entry).await {
            warn!(server = %name, kind = e.kind(), "reconcile:fail reloading: {}", e);
        }
    }
}
