//! The MCP conversation layered on a transport: handshake, discovery, and
//! tool invocation.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::schema::TransportKind;
use crate::error::{HubError, Result, TransportError};
use crate::protocol::{mcp, JsonRpcId, JsonRpcMessage};
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    New,
    Opening,
    Handshaking,
    Discovering,
    Ready,
    Closing,
    Closed,
}

#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub protocol_version: String,
    pub capabilities: mcp::ServerCapabilities,
    pub server_info: mcp::Implementation,
}

pub struct Session {
    name: String,
    transport: Arc<dyn Transport>,
    request_timeout: Duration,
    next_id: AtomicI64,
    state: RwLock<SessionState>,
    peer: RwLock<Option<PeerInfo>>,
    tools: RwLock<Vec<mcp::ToolDescriptor>>,
    connected_at: RwLock<Option<DateTime<Utc>>>,
}

fn client_info() -> mcp::Implementation {
    mcp::Implementation {
        name: "mcp-hub".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }
}

impl Session {
    /// Open the transport, run the MCP handshake, and discover tools. A
    /// failure at any stage closes the transport and yields the cause; a
    /// partially initialized session is never returned.
    pub async fn connect(
        name: &str,
        transport: Arc<dyn Transport>,
        request_timeout: Duration,
    ) -> Result<Arc<Session>> {
        let session = Arc::new(Session {
            name: name.to_string(),
            transport,
            request_timeout,
            next_id: AtomicI64::new(0),
            state: RwLock::new(SessionState::New),
            peer: RwLock::new(None),
            tools: RwLock::new(Vec::new()),
            connected_at: RwLock::new(None),
        });

        match session.establish().await {
            Ok(()) => Ok(session),
            Err(e) => {
                session.shutdown().await;
                Err(e)
            }
        }
    }

    async fn establish(&self) -> Result<()> {
        self.set_state(SessionState::Opening).await;
        self.transport.open(self.request_timeout).await?;

        self.set_state(SessionState::Handshaking).await;
        let init = self
            .roundtrip(mcp::initialize_request(self.next_id(), &client_info()))
            .await?;
        let init: mcp::InitializeResult = serde_json::from_value(init)
            .map_err(|e| TransportError::Handshake(format!("invalid initialize result: {e}")))?;

        debug!(
            server = %self.name,
            peer = %init.server_info.name,
            protocol = %init.protocol_version,
            "handshake complete"
        );

        let kind = self.transport.kind();
        let half_duplex = matches!(kind, TransportKind::Http | TransportKind::EventStream);

        if let Err(e) = self.transport.notify(mcp::initialized_notification()).await {
            if half_duplex {
                warn!(server = %self.name, "failed to deliver initialized notification: {}", e);
            } else {
                return Err(e);
            }
        }

        // Half-duplex peers cannot push list_changed to us, so their catalog
        // stays as discovered for the life of the session.
        if half_duplex && init.capabilities.tools_list_changed() {
            info!(
                server = %self.name,
                transport = %kind,
                "peer advertises listChanged; catalog treated as static for this session"
            );
        }

        *self.peer.write().await = Some(PeerInfo {
            protocol_version: init.protocol_version,
            capabilities: init.capabilities,
            server_info: init.server_info,
        });

        self.set_state(SessionState::Discovering).await;
        let listed = self.roundtrip(mcp::list_tools_request(self.next_id())).await?;
        let listed: mcp::ListToolsResult = serde_json::from_value(listed)
            .map_err(|e| TransportError::Decode(format!("invalid tools/list result: {e}")))?;

        debug!(server = %self.name, count = listed.tools.len(), "tools discovered");

        *self.tools.write().await = listed.tools;
        *self.connected_at.write().await = Some(Utc::now());
        self.set_state(SessionState::Ready).await;

        Ok(())
    }

    /// Invoke a tool on the peer and return the raw `tools/call` result.
    /// A result flagged `isError` surfaces as `HubError::Tool` carrying it.
    pub async fn call(&self, tool_name: &str, arguments: Option<Value>) -> Result<Value> {
        if self.state().await != SessionState::Ready {
            return Err(TransportError::Closed.into());
        }

        let raw = self
            .roundtrip(mcp::call_tool_request(self.next_id(), tool_name, arguments))
            .await?;

        let result: mcp::CallToolResult = serde_json::from_value(raw.clone())
            .map_err(|e| TransportError::Decode(format!("invalid tools/call result: {e}")))?;
        if result.is_error {
            return Err(HubError::Tool(raw));
        }

        Ok(raw)
    }

    pub async fn shutdown(&self) {
        self.set_state(SessionState::Closing).await;
        self.transport.close().await;
        self.set_state(SessionState::Closed).await;
    }

    async fn roundtrip(&self, message: JsonRpcMessage) -> Result<Value> {
        let reply = self.transport.request(message, self.request_timeout).await?;
        let reply = reply
            .into_response()
            .ok_or_else(|| TransportError::Decode("reply is not a response envelope".into()))?;

        if let Some(err) = reply.error {
            return Err(TransportError::Peer {
                code: err.code,
                message: err.message,
            }
            .into());
        }

        reply
            .result
            .ok_or_else(|| TransportError::Decode("response carries neither result nor error".into()).into())
    }

    fn next_id(&self) -> JsonRpcId {
        JsonRpcId::Number(self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn set_state(&self, next: SessionState) {
        *self.state.write().await = next;
    }

    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.transport.kind()
    }

    pub async fn tools(&self) -> Vec<mcp::ToolDescriptor> {
        self.tools.read().await.clone()
    }

    pub async fn peer(&self) -> Option<PeerInfo> {
        self.peer.read().await.clone()
    }

    pub async fn connected_at(&self) -> Option<DateTime<Utc>> {
        *self.connected_at.read().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicBool;

    /// Transport double that answers the MCP method set from canned data.
    struct ScriptedTransport {
        connected: AtomicBool,
        fail_discovery: bool,
        call_is_error: bool,
    }

    impl ScriptedTransport {
        fn new() -> Self {
            Self {
                connected: AtomicBool::new(false),
                fail_discovery: false,
                call_is_error: false,
            }
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn open(&self, _deadline: Duration) -> Result<()> {
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn request(
            &self,
            message: JsonRpcMessage,
            _deadline: Duration,
        ) -> Result<JsonRpcMessage> {
            let (id, method) = match &message {
                JsonRpcMessage::V2(crate::protocol::JsonRpcV2Message::Request(req)) => {
                    (req.id.clone(), req.method.clone())
                }
                other => panic!("unexpected envelope: {other:?}"),
            };

            let reply = match method.as_str() {
                mcp::INITIALIZE_METHOD => json!({
                    "protocolVersion": mcp::PROTOCOL_VERSION,
                    "capabilities": { "tools": {} },
                    "serverInfo": { "name": "scripted", "version": "0.0.1" }
                }),
                mcp::LIST_TOOLS_METHOD => {
                    if self.fail_discovery {
                        return Ok(JsonRpcMessage::error_response(id, -32603, "listing broke"));
                    }
                    json!({
                        "tools": [
                            { "name": "echo", "description": "echo back", "inputSchema": { "type": "object" } }
                        ]
                    })
                }
                mcp::CALL_TOOL_METHOD => json!({
                    "content": [{ "type": "text", "text": "hi" }],
                    "isError": self.call_is_error
                }),
                other => panic!("unexpected method: {other}"),
            };

            Ok(JsonRpcMessage::response(id, reply))
        }

        async fn notify(&self, _message: JsonRpcMessage) -> Result<()> {
            Ok(())
        }

        async fn close(&self) {
            self.connected.store(false, Ordering::SeqCst);
        }

        fn connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        fn kind(&self) -> TransportKind {
            TransportKind::Stdio
        }
    }

    #[tokio::test]
    async fn connect_runs_handshake_and_discovery() {
        let transport = Arc::new(ScriptedTransport::new());
        let session = Session::connect("scripted", transport, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(session.state().await, SessionState::Ready);
        let tools = session.tools().await;
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "echo");
        assert_eq!(
            session.peer().await.unwrap().protocol_version,
            mcp::PROTOCOL_VERSION
        );
        assert!(session.connected_at().await.is_some());
    }

    #[tokio::test]
    async fn discovery_failure_never_yields_a_session() {
        let transport = Arc::new(ScriptedTransport {
            fail_discovery: true,
            ..ScriptedTransport::new()
        });
        let result = Session::connect("scripted", transport.clone(), Duration::from_secs(5)).await;

        assert!(matches!(
            result,
            Err(HubError::Transport(TransportError::Peer { .. }))
        ));
        // The failed connect closed the transport behind it.
        assert!(!transport.connected());
    }

    #[tokio::test]
    async fn call_returns_raw_result() {
        let transport = Arc::new(ScriptedTransport::new());
        let session = Session::connect("scripted", transport, Duration::from_secs(5))
            .await
            .unwrap();

        let result = session.call("echo", Some(json!({"msg": "hi"}))).await.unwrap();
        assert_eq!(result["content"][0]["text"], "hi");
    }

    #[tokio::test]
    async fn call_surfaces_peer_tool_error() {
        let transport = Arc::new(ScriptedTransport {
            call_is_error: true,
            ..ScriptedTransport::new()
        });
        let session = Session::connect("scripted", transport, Duration::from_secs(5))
            .await
            .unwrap();

        match session.call("echo", None).await {
            Err(HubError::Tool(raw)) => assert_eq!(raw["isError"], true),
            other => panic!("expected tool error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn call_is_rejected_after_shutdown() {
        let transport = Arc::new(ScriptedTransport::new());
        let session = Session::connect("scripted", transport, Duration::from_secs(5))
            .await
            .unwrap();

        session.shutdown().await;
        assert_eq!(session.state().await, SessionState::Closed);
        assert!(matches!(
            session.call("echo", None).await,
            Err(HubError::Transport(TransportError::Closed))
        ));
    }
}
