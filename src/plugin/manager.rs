//! Owns the live MCP sessions, translates config entries into transports,
//! namespaces discovered tools into the registry, and routes invocations.

use futures::future::join_all;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::schema::{Config, ServerEntry};
use crate::error::{HubError, Result};
use crate::registry::{Tool, ToolRegistry};
use crate::session::Session;
use crate::transport;

const ARG_LOG_LIMIT: usize = 200;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

static EXEC_SEQ: AtomicU64 = AtomicU64::new(0);

pub struct Manager {
    registry: Arc<ToolRegistry>,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl Manager {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Start every enabled server in the config. Individual failures are
    /// logged and absorbed so one bad server does not keep the hub down.
    pub async fn load_from_config(&self, config: &Config) {
        let mut names: Vec<_> = config.enabled_servers().into_iter().collect();
        names.sort_by(|a, b| a.0.cmp(&b.0));

        for (name, entry) in names {
            match self.start_server(&name, &entry).await {
                Ok(()) => {
                    info!(
                        server = %name,
                        transport = %entry
                            .transport_kind()
                            .map(|k| k.to_string())
                            .unwrap_or_else(|| "unknown".to_string()),
                        "loaded MCP server"
                    );
                }
                Err(e) => {
                    warn!(server = %name, kind = e.kind(), "failed to start server: {}", e);
                }
            }
        }
    }

    /// Construct the entry's transport, connect a session, and register its
    /// tools under `<name>:<tool>`. Returns once discovery is complete.
    pub async fn start_server(&self, name: &str, entry: &ServerEntry) -> Result<()> {
        if self.sessions.read().await.contains_key(name) {
            return Err(HubError::AlreadyRunning(name.to_string()));
        }

        let transport = transport::for_entry(name, entry)?;
        let kind = transport.kind();

        info!(server = %name, transport = %kind, "connect:attempt");
        let started = Instant::now();

        let session = match Session::connect(name, transport, entry.request_timeout()).await {
            Ok(session) => session,
            Err(e) => {
                warn!(
                    server = %name,
                    transport = %kind,
                    kind = e.kind(),
                    duration_ms = started.elapsed().as_millis() as u64,
                    "connect:fail: {}",
                    e
                );
                return Err(e);
            }
        };

        let tools: Vec<Tool> = session
            .tools()
            .await
            .into_iter()
            .map(|t| Tool {
                id: format!("{name}:{}", t.name),
                name: t.name,
                description: t.description,
                plugin_id: name.to_string(),
            })
            .collect();

        info!(
            server = %name,
            transport = %kind,
            tools = tools.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "connect:ok"
        );

        // Registration, then map insertion, atomically for this name.
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(name) {
            drop(sessions);
            session.shutdown().await;
            return Err(HubError::AlreadyRunning(name.to_string()));
        }
        self.registry.register_tools(name, tools).await;
        sessions.insert(name.to_string(), session);

        Ok(())
    }

    /// Remove the server's tools from the registry, then close its session.
    pub async fn stop_server(&self, name: &str) -> Result<()> {
        let session = self
            .sessions
            .write()
            .await
            .remove(name)
            .ok_or_else(|| HubError::ServerNotFound(name.to_string()))?;

        self.registry.unregister_tools(name).await;
        session.shutdown().await;

        info!(server = %name, "stopped MCP server");
        Ok(())
    }

    /// Stop-then-start. A failed start leaves the name not running; there is
    /// no rollback to the previous session.
    pub async fn reload_server(&self, name: &str, entry: &ServerEntry) -> Result<()> {
        match self.stop_server(name).await {
            Ok(()) | Err(HubError::ServerNotFound(_)) => {}
            Err(e) => return Err(e),
        }
        self.start_server(name, entry).await
    }

    /// Dispatch a tool call to the named server and return the raw result.
    pub async fn execute(
        &self,
        plugin_id: &str,
        tool_name: &str,
        arguments: Option<Value>,
    ) -> Result<Value> {
        let session = self
            .sessions
            .read()
            .await
            .get(plugin_id)
            .cloned()
            .ok_or_else(|| HubError::ServerNotFound(plugin_id.to_string()))?;

        let exec_id = EXEC_SEQ.fetch_add(1, Ordering::Relaxed);
        let args_preview = arguments
            .as_ref()
            .map(|v| truncate(&v.to_string(), ARG_LOG_LIMIT))
            .unwrap_or_default();

        info!(
            id = exec_id,
            plugin = %plugin_id,
            tool = %tool_name,
            args = %args_preview,
            "exec:start"
        );
        let started = Instant::now();

        match session.call(tool_name, arguments).await {
            Ok(raw) => {
                let result_bytes = raw.to_string().len();
                info!(
                    id = exec_id,
                    plugin = %plugin_id,
                    tool = %tool_name,
                    duration_ms = started.elapsed().as_millis() as u64,
                    result_bytes,
                    "exec:done"
                );
                Ok(raw)
            }
            Err(e) => {
                warn!(
                    id = exec_id,
                    plugin = %plugin_id,
                    tool = %tool_name,
                    duration_ms = started.elapsed().as_millis() as u64,
                    kind = e.kind(),
                    "exec:fail: {}",
                    e
                );
                Err(e)
            }
        }
    }

    pub async fn list_servers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Close every session concurrently, ignoring individual errors, bounded
    /// by the shutdown grace.
    pub async fn stop_all(&self) {
        let drained: Vec<(String, Arc<Session>)> =
            self.sessions.write().await.drain().collect();

        for (name, _) in &drained {
            self.registry.unregister_tools(name).await;
        }

        let closers = drained.into_iter().map(|(name, session)| async move {
            session.shutdown().await;
            debug!(server = %name, "session closed");
        });

        if tokio::time::timeout(SHUTDOWN_GRACE, join_all(closers))
            .await
            .is_err()
        {
            warn!("shutdown grace elapsed, abandoning slow sessions");
        }
    }
}

fn truncate(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        text.to_string()
    } else {
        let mut end = limit;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &text[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{stdio_entry, write_peer, ECHO_PEER};
    use serde_json::json;
    use tempfile::TempDir;

    fn new_manager() -> Manager {
        Manager::new(Arc::new(ToolRegistry::new()))
    }

    #[tokio::test]
    async fn start_registers_namespaced_tools() {
        let dir = TempDir::new().unwrap();
        let script = write_peer(&dir, "echo.sh", ECHO_PEER);
        let manager = new_manager();

        manager.start_server("echo", &stdio_entry(&script)).await.unwrap();

        let tools = manager.registry().list().await;
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].id, "echo:echo");
        assert_eq!(tools[0].name, "echo");
        assert_eq!(tools[0].plugin_id, "echo");
        assert_eq!(manager.list_servers().await, vec!["echo".to_string()]);
    }

    #[tokio::test]
    async fn start_twice_reports_already_running() {
        let dir = TempDir::new().unwrap();
        let script = write_peer(&dir, "echo.sh", ECHO_PEER);
        let manager = new_manager();
        let entry = stdio_entry(&script);

        manager.start_server("echo", &entry).await.unwrap();
        assert!(matches!(
            manager.start_server("echo", &entry).await,
            Err(HubError::AlreadyRunning(_))
        ));

        manager.stop_all().await;
    }

    #[tokio::test]
    async fn execute_round_trips_through_the_peer() {
        let dir = TempDir::new().unwrap();
        let script = write_peer(&dir, "echo.sh", ECHO_PEER);
        let manager = new_manager();

        manager.start_server("echo", &stdio_entry(&script)).await.unwrap();

        let result = manager
            .execute("echo", "echo", Some(json!({"msg": "hi"})))
            .await
            .unwrap();
        assert_eq!(result["content"][0]["text"], "hi");

        manager.stop_all().await;
    }

    #[tokio::test]
    async fn execute_unknown_server_is_not_found() {
        let manager = new_manager();
        assert!(matches!(
            manager.execute("ghost", "echo", None).await,
            Err(HubError::ServerNotFound(_))
        ));
    }

    #[tokio::test]
    async fn stop_removes_tools_before_the_session_dies() {
        let dir = TempDir::new().unwrap();
        let script = write_peer(&dir, "echo.sh", ECHO_PEER);
        let manager = new_manager();

        manager.start_server("echo", &stdio_entry(&script)).await.unwrap();
        manager.stop_server("echo").await.unwrap();

        assert!(manager.registry().list().await.is_empty());
        assert!(manager.list_servers().await.is_empty());
        assert!(matches!(
            manager.execute("echo", "echo", None).await,
            Err(HubError::ServerNotFound(_))
        ));
        assert!(matches!(
            manager.stop_server("echo").await,
            Err(HubError::ServerNotFound(_))
        ));
    }

    #[tokio::test]
    async fn failed_start_registers_nothing() {
        let manager = new_manager();
        let entry: ServerEntry =
            serde_json::from_value(json!({"command": "/nonexistent-mcp-peer", "timeout": 2}))
                .unwrap();

        assert!(manager.start_server("ghost", &entry).await.is_err());
        assert!(manager.registry().list().await.is_empty());
        assert!(manager.list_servers().await.is_empty());
    }

    #[tokio::test]
    async fn reload_replaces_the_session() {
        let dir = TempDir::new().unwrap();
        let script = write_peer(&dir, "echo.sh", ECHO_PEER);
        let manager = new_manager();
        let entry = stdio_entry(&script);

        manager.start_server("echo", &entry).await.unwrap();
        manager.reload_server("echo", &entry).await.unwrap();

        assert_eq!(manager.list_servers().await, vec!["echo".to_string()]);
        assert_eq!(manager.registry().list().await.len(), 1);

        manager.stop_all().await;
    }

    #[tokio::test]
    async fn bulk_load_absorbs_individual_failures() {
        let dir = TempDir::new().unwrap();
        let script = write_peer(&dir, "echo.sh", ECHO_PEER);
        let manager = new_manager();

        let config: Config = serde_json::from_value(json!({
            "mcpServers": {
                "good": { "command": "/bin/sh", "args": [script], "timeout": 5 },
                "bad": { "command": "/nonexistent-mcp-peer", "timeout": 2 },
                "off": { "command": "/bin/sh", "args": [script], "disabled": true }
            }
        }))
        .unwrap();

        manager.load_from_config(&config).await;

        // One bad server does not keep the hub down, and a disabled server
        // never contributes tools.
        assert_eq!(manager.list_servers().await, vec!["good".to_string()]);
        assert_eq!(manager.registry().list().await.len(), 1);

        manager.stop_all().await;
    }

    #[tokio::test]
    async fn stop_all_drains_every_session() {
        let dir = TempDir::new().unwrap();
        let script = write_peer(&dir, "echo.sh", ECHO_PEER);
        let manager = new_manager();

        manager.start_server("a", &stdio_entry(&script)).await.unwrap();
        manager.start_server("b", &stdio_entry(&script)).await.unwrap();

        manager.stop_all().await;

        assert!(manager.list_servers().await.is_empty());
        assert!(manager.registry().list().await.is_empty());
    }
}
