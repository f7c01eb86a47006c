use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use super::process::ProcessIo;
use super::Transport;
use crate::config::schema::{ServerEntry, TransportKind};
use crate::error::{ConfigError, Result};
use crate::protocol::JsonRpcMessage;

/// Spawns the configured executable and speaks newline-delimited JSON-RPC
/// over its stdio.
pub struct StdioTransport {
    name: String,
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    io: ProcessIo,
}

impl StdioTransport {
    pub fn new(name: &str, entry: &ServerEntry) -> Result<Self> {
        if entry.command.is_empty() {
            return Err(ConfigError::Validation(format!(
                "server '{name}': command is required for stdio transport"
            ))
            .into());
        }

        Ok(Self {
            name: name.to_string(),
            command: entry.command.clone(),
            args: entry.args.clone(),
            env: entry.env.clone(),
            io: ProcessIo::new(name, entry.request_timeout()),
        })
    }

    fn build_command(&self) -> Command {
        let mut command = Command::new(&self.command);
        command.args(&self.args).kill_on_drop(true);
        for (key, value) in &self.env {
            command.env(key, value);
        }
        command
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn open(&self, _deadline: Duration) -> Result<()> {
        self.io.open(self.build_command()).await?;
        debug!(server = %self.name, command = %self.command, "process started");
        Ok(())
    }

    async fn request(&self, message: JsonRpcMessage, deadline: Duration) -> Result<JsonRpcMessage> {
        self.io.request(message, deadline).await
    }

    async fn notify(&self, message: JsonRpcMessage) -> Result<()> {
        self.io.notify(message).await
    }

    async fn close(&self) {
        self.io.close(None).await;
    }

    fn connected(&self) -> bool {
        self.io.connected()
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }
}
