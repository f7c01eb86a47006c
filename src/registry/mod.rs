//! Hub-wide tool catalog. Mutations broadcast immutable snapshots to
//! subscribers; a slow subscriber always observes the most recent state and
//! may skip intermediate ones.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::{watch, RwLock};

/// A tool in the hub catalog. `id` is globally unique because it is the
/// owning server's name, a `:` separator, and the server-local tool name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tool {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub plugin_id: String,
}

pub type Snapshot = Vec<Tool>;

pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Tool>>,
    snapshot_tx: watch::Sender<Snapshot>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        let (snapshot_tx, _) = watch::channel(Vec::new());
        Self {
            tools: RwLock::new(HashMap::new()),
            snapshot_tx,
        }
    }

    /// Insert (or replace by id) the given tools, stamped with their owner,
    /// and broadcast the resulting snapshot.
    pub async fn register_tools(&self, plugin_id: &str, tools: Vec<Tool>) {
        let mut guard = self.tools.write().await;
        for mut tool in tools {
            tool.plugin_id = plugin_id.to_string();
            guard.insert(tool.id.clone(), tool);
        }
        self.broadcast(&guard);
    }

    /// Remove every tool owned by `plugin_id` and broadcast the resulting
    /// snapshot.
    pub async fn unregister_tools(&self, plugin_id: &str) {
        let mut guard = self.tools.write().await;
        guard.retain(|_, tool| tool.plugin_id != plugin_id);
        self.broadcast(&guard);
    }

    pub async fn list(&self) -> Snapshot {
        let guard = self.tools.read().await;
        let mut tools: Snapshot = guard.values().cloned().collect();
        tools.sort_by(|a, b| a.id.cmp(&b.id));
        tools
    }

    /// A receiver whose current value is the present snapshot. Each send
    /// replaces the previous value, so an unconsumed snapshot is overwritten
    /// rather than queued; dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshot_tx.subscribe()
    }

    // Runs under the registry lock; the watch send is non-blocking.
    fn broadcast(&self, tools: &HashMap<String, Tool>) {
        let mut snapshot: Snapshot = tools.values().cloned().collect();
        snapshot.sort_by(|a, b| a.id.cmp(&b.id));
        self.snapshot_tx.send_replace(snapshot);
    }
}
