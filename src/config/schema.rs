use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Root of the hub configuration file: `{"mcpServers": {<name>: <entry>}}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(rename = "mcpServers", default)]
    pub mcp_servers: HashMap<String, ServerEntry>,
}

/// A single aggregated MCP server. The transport is either declared via
/// `type` (with `transport` accepted as a legacy alias) or inferred from
/// which fields are populated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ServerEntry {
    #[serde(default, skip_serializing_if = "is_false")]
    pub disabled: bool,

    /// Request timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    // stdio
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub command: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    // http and event-stream
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,

    // container
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
    /// host path -> container path
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub volumes: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub network: String,

    /// Legacy alias for `type`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Stdio,
    Container,
    Http,
    EventStream,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportKind::Stdio => "stdio",
            TransportKind::Container => "container",
            TransportKind::Http => "http",
            TransportKind::EventStream => "event-stream",
        };
        f.write_str(name)
    }
}

fn normalize_kind(raw: &str) -> Option<TransportKind> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "stdio" => Some(TransportKind::Stdio),
        "sse" | "event-stream" | "eventstream" => Some(TransportKind::EventStream),
        "http" | "streamable-http" | "streamablehttp" => Some(TransportKind::Http),
        "docker" | "container" => Some(TransportKind::Container),
        _ => None,
    }
}

impl ServerEntry {
    /// Normalized transport discriminator. `None` when an explicit `type`
    /// (or legacy `transport`) names an unsupported transport.
    pub fn transport_kind(&self) -> Option<TransportKind> {
        if let Some(declared) = self.kind.as_deref().or(self.transport.as_deref()) {
            return normalize_kind(declared);
        }
        if !self.image.is_empty() {
            return Some(TransportKind::Container);
        }
        if !self.url.is_empty() {
            return Some(TransportKind::Http);
        }
        Some(TransportKind::Stdio)
    }

    pub fn request_timeout(&self) -> Duration {
        match self.timeout {
            Some(secs) if secs > 0 => Duration::from_secs(secs),
            _ => DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn enabled(&self) -> bool {
        !self.disabled
    }
}

impl Config {
    /// Entries that are not disabled.
    pub fn enabled_servers(&self) -> HashMap<String, ServerEntry> {
        self.mcp_servers
            .iter()
            .filter(|(_, entry)| entry.enabled())
            .map(|(name, entry)| (name.clone(), entry.clone()))
            .collect()
    }
}

fn is_false(v: &bool) -> bool {
    !v
}
