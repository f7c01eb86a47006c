use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::schema::{ServerEntry, TransportKind};
use crate::error::{ConfigError, Result};
use crate::protocol::JsonRpcMessage;

pub mod container;
pub mod http;
pub mod process;
pub mod sse;
pub mod stdio;

/// One bidirectional channel to one remote MCP peer.
///
/// Implementations differ only in framing and correlation; the session layer
/// is written against this contract alone.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Establish the underlying channel. Calling `open` again after `close`
    /// produces a fresh channel.
    async fn open(&self, deadline: Duration) -> Result<()>;

    /// Send a correlated request and wait for the matching response. The
    /// effective timeout is `min(transport default, deadline)`.
    async fn request(&self, message: JsonRpcMessage, deadline: Duration) -> Result<JsonRpcMessage>;

    /// Send a fire-and-forget message.
    async fn notify(&self, message: JsonRpcMessage) -> Result<()>;

    /// Idempotent; releases the channel and fails any in-flight `request`
    /// with `TransportClosed`.
    async fn close(&self);

    fn connected(&self) -> bool;

    fn kind(&self) -> TransportKind;
}

/// Construct the transport an entry's discriminator calls for.
pub fn for_entry(name: &str, entry: &ServerEntry) -> Result<Arc<dyn Transport>> {
    let kind = entry.transport_kind().ok_or_else(|| {
        ConfigError::Validation(format!("server '{name}' has an unsupported transport type"))
    })?;

    let transport: Arc<dyn Transport> = match kind {
        TransportKind::Stdio => Arc::new(stdio::StdioTransport::new(name, entry)?),
        TransportKind::Container => Arc::new(container::ContainerTransport::new(name, entry)?),
        TransportKind::Http => Arc::new(http::HttpTransport::new(name, entry)?),
        TransportKind::EventStream => Arc::new(sse::EventStreamTransport::new(name, entry)?),
    };

    Ok(transport)
}
