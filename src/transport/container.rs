use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use super::process::ProcessIo;
use super::Transport;
use crate::config::schema::{ServerEntry, TransportKind};
use crate::error::{ConfigError, Result};
use crate::protocol::JsonRpcMessage;

/// Runs the configured image via `docker run -i --rm` and speaks the same
/// line framing as the stdio transport over the container's stdio.
pub struct ContainerTransport {
    name: String,
    container_name: String,
    entry: ServerEntry,
    io: ProcessIo,
}

impl ContainerTransport {
    pub fn new(name: &str, entry: &ServerEntry) -> Result<Self> {
        if entry.image.is_empty() {
            return Err(ConfigError::Validation(format!(
                "server '{name}': image is required for container transport"
            ))
            .into());
        }

        // Unique per transport instance so a reload cannot collide with a
        // predecessor container that is still tearing down.
        static NEXT_CONTAINER: AtomicU64 = AtomicU64::new(0);
        let seq = NEXT_CONTAINER.fetch_add(1, Ordering::Relaxed);

        Ok(Self {
            name: name.to_string(),
            container_name: format!("mcp-hub-{name}-{}-{seq}", std::process::id()),
            entry: entry.clone(),
            io: ProcessIo::new(name, entry.request_timeout()),
        })
    }

    fn build_command(&self) -> Command {
        let mut command = Command::new("docker");
        command.arg("run").arg("-i").arg("--rm");
        command.arg("--name").arg(&self.container_name);

        // Sorted for stable argv in logs and tests.
        let mut env: Vec<_> = self.entry.env.iter().collect();
        env.sort();
        for (key, value) in env {
            command.arg("-e").arg(format!("{key}={value}"));
        }

        let mut volumes: Vec<_> = self.entry.volumes.iter().collect();
        volumes.sort();
        for (host, inside) in volumes {
            command.arg("-v").arg(format!("{host}:{inside}"));
        }

        if !self.entry.network.is_empty() {
            command.arg("--network").arg(&self.entry.network);
        }

        command.arg(&self.entry.image);
        command.args(&self.entry.args);
        command.kill_on_drop(true);
        command
    }

    fn stop_command(&self) -> Command {
        let mut command = Command::new("docker");
        command.arg("stop").arg(&self.container_name);
        command
    }
}

#[async_trait]
impl Transport for ContainerTransport {
    async fn open(&self, _deadline: Duration) -> Result<()> {
        self.io.open(self.build_command()).await?;
        debug!(server = %self.name, image = %self.entry.image, "container started");
        Ok(())
    }

    async fn request(&self, message: JsonRpcMessage, deadline: Duration) -> Result<JsonRpcMessage> {
        self.io.request(message, deadline).await
    }

    async fn notify(&self, message: JsonRpcMessage) -> Result<()> {
        self.io.notify(message).await
    }

    async fn close(&self) {
        self.io.close(Some(self.stop_command())).await;
    }

    fn connected(&self) -> bool {
        self.io.connected()
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Container
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn argv(command: &Command) -> Vec<String> {
        let std = command.as_std();
        std::iter::once(std.get_program())
            .chain(std.get_args())
            .map(|s| s.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn run_command_carries_env_volumes_and_network() {
        let entry: ServerEntry = serde_json::from_value(json!({
            "image": "ghcr.io/acme/mcp:latest",
            "args": ["--verbose"],
            "env": { "B": "2", "A": "1" },
            "volumes": { "/srv/data": "/data" },
            "network": "backend"
        }))
        .unwrap();

        let transport = ContainerTransport::new("files", &entry).unwrap();
        let argv = argv(&transport.build_command());

        assert_eq!(argv[0], "docker");
        assert_eq!(&argv[1..4], ["run", "-i", "--rm"]);
        assert_eq!(argv[4], "--name");
        assert!(argv[5].starts_with("mcp-hub-files-"));
        // Env flags come sorted by key.
        assert_eq!(&argv[6..10], ["-e", "A=1", "-e", "B=2"]);
        assert_eq!(&argv[10..12], ["-v", "/srv/data:/data"]);
        assert_eq!(&argv[12..14], ["--network", "backend"]);
        assert_eq!(argv[14], "ghcr.io/acme/mcp:latest");
        assert_eq!(argv[15], "--verbose");
    }

    #[test]
    fn missing_image_is_rejected() {
        let entry: ServerEntry =
            serde_json::from_value(json!({ "type": "docker", "command": "x" })).unwrap();
        assert!(ContainerTransport::new("files", &entry).is_err());
    }

    #[test]
    fn stop_command_targets_the_named_container() {
        let entry: ServerEntry =
            serde_json::from_value(json!({ "image": "ghcr.io/acme/mcp:latest" })).unwrap();
        let transport = ContainerTransport::new("files", &entry).unwrap();

        let argv = argv(&transport.stop_command());
        assert_eq!(argv[0], "docker");
        assert_eq!(argv[1], "stop");
        assert_eq!(argv[2], transport.container_name);
    }
}
