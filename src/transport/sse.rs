use async_trait::async_trait;
use bytes::BytesMut;
use dashmap::DashMap;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::Transport;
use crate::config::schema::{ServerEntry, TransportKind};
use crate::error::{ConfigError, HubError, Result, TransportError};
use crate::protocol::{JsonRpcId, JsonRpcMessage, JsonRpcV2Message};

type Pending = Arc<DashMap<JsonRpcId, oneshot::Sender<JsonRpcMessage>>>;

/// Event-stream transport: requests are POSTed to `<base>/messages` and the
/// replies arrive asynchronously on a long-lived `GET <base>/sse`, routed
/// back to their callers by correlation id.
pub struct EventStreamTransport {
    name: String,
    base_url: String,
    headers: HashMap<String, String>,
    default_timeout: Duration,
    client: reqwest::Client,
    connected: Arc<AtomicBool>,
    pending: Pending,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl EventStreamTransport {
    pub fn new(name: &str, entry: &ServerEntry) -> Result<Self> {
        if entry.url.is_empty() {
            return Err(ConfigError::Validation(format!(
                "server '{name}': url is required for event-stream transport"
            ))
            .into());
        }

        // Accept a configured URL that already points at the stream.
        let base_url = entry
            .url
            .strip_suffix("/sse")
            .unwrap_or(&entry.url)
            .trim_end_matches('/')
            .to_string();

        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| TransportError::Unavailable(format!("failed to build client: {e}")))?;

        Ok(Self {
            name: name.to_string(),
            base_url,
            headers: entry.headers.clone(),
            default_timeout: entry.request_timeout(),
            client,
            connected: Arc::new(AtomicBool::new(false)),
            pending: Arc::new(DashMap::new()),
            reader: Mutex::new(None),
        })
    }

    fn apply_headers(&self, mut builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        for (key, value) in &self.headers {
            builder = builder.header(key, value);
        }
        builder
    }

    async fn post_message(&self, message: &JsonRpcMessage, timeout: Duration) -> Result<reqwest::StatusCode> {
        let builder = self
            .apply_headers(self.client.post(format!("{}/messages", self.base_url)))
            .timeout(timeout)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .json(message);

        let response = builder.send().await.map_err(|e| -> HubError {
            if e.is_timeout() {
                HubError::Timeout
            } else {
                TransportError::Closed.into()
            }
        })?;

        Ok(response.status())
    }
}

#[async_trait]
impl Transport for EventStreamTransport {
    async fn open(&self, deadline: Duration) -> Result<()> {
        if self.connected() {
            return Err(TransportError::Unavailable("transport already open".into()).into());
        }

        let builder = self
            .apply_headers(self.client.get(format!("{}/sse", self.base_url)))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .header(reqwest::header::CACHE_CONTROL, "no-cache");

        let response = tokio::time::timeout(deadline, builder.send())
            .await
            .map_err(|_| HubError::Timeout)?
            .map_err(|e| TransportError::Unavailable(format!("stream connect failed: {e}")))?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(TransportError::Handshake(format!(
                "stream rejected with status {}",
                response.status()
            ))
            .into());
        }

        self.pending.clear();

        let reader = tokio::spawn(read_events(
            self.name.clone(),
            response,
            Arc::clone(&self.connected),
            Arc::clone(&self.pending),
        ));
        *self.reader.lock().await = Some(reader);
        self.connected.store(true, Ordering::SeqCst);

        Ok(())
    }

    async fn request(&self, message: JsonRpcMessage, deadline: Duration) -> Result<JsonRpcMessage> {
        if !self.connected() {
            return Err(TransportError::Closed.into());
        }

        let id = message
            .id()
            .cloned()
            .ok_or_else(|| HubError::InvalidRequest("request envelope has no id".into()))?;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id.clone(), tx);

        let timeout = deadline.min(self.default_timeout);
        let status = match self.post_message(&message, timeout).await {
            Ok(status) => status,
            Err(e) => {
                self.pending.remove(&id);
                return Err(e);
            }
        };

        if status != reqwest::StatusCode::OK && status != reqwest::StatusCode::ACCEPTED {
            self.pending.remove(&id);
            return Err(TransportError::Peer {
                code: status.as_u16() as i64,
                message: "message rejected".to_string(),
            }
            .into());
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(envelope)) => Ok(envelope),
            Ok(Err(_)) => Err(TransportError::Closed.into()),
            Err(_) => {
                self.pending.remove(&id);
                Err(HubError::Timeout)
            }
        }
    }

    async fn notify(&self, message: JsonRpcMessage) -> Result<()> {
        if !self.connected() {
            return Err(TransportError::Closed.into());
        }

        // No correlation slot: notifications have no reply, so a peer that
        // answers 4xx is logged and otherwise ignored.
        let status = self
            .post_message(&message, self.default_timeout)
            .await
            .map_err(|_| TransportError::Closed)?;
        if !status.is_success() {
            debug!(server = %self.name, status = %status, "notification rejected by peer");
        }
        Ok(())
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(reader) = self.reader.lock().await.take() {
            reader.abort();
        }
        // Dropping the senders fails any in-flight request with Closed.
        self.pending.clear();
    }

    fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn kind(&self) -> TransportKind {
        TransportKind::EventStream
    }
}

async fn read_events(
    label: String,
    response: reqwest::Response,
    connected: Arc<AtomicBool>,
    pending: Pending,
) {
    let mut stream = response.bytes_stream();
    let mut buffer = BytesMut::new();
    let mut event_data = String::new();

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                debug!(server = %label, "stream read failed: {}", e);
                break;
            }
        };
        buffer.extend_from_slice(&chunk);

        while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
            let raw = buffer.split_to(pos + 1);
            let line = match std::str::from_utf8(&raw) {
                Ok(text) => text.trim_end_matches(['\n', '\r']),
                Err(_) => {
                    warn!(server = %label, "discarding non-UTF-8 event line");
                    continue;
                }
            };

            if line.is_empty() {
                if !event_data.is_empty() {
                    dispatch_event(&label, &pending, &event_data);
                    event_data.clear();
                }
            } else if let Some(data) = line.strip_prefix("data: ") {
                event_data.push_str(data);
            }
            // Other SSE fields (event:, id:, retry:) are ignored.
        }
    }

    connected.store(false, Ordering::SeqCst);
    pending.clear();
}

fn dispatch_event(label: &str, pending: &Pending, data: &str) {
    let message: JsonRpcMessage = match serde_json::from_str(data) {
        Ok(message) => message,
        Err(e) => {
            debug!(server = %label, "discarding undecodable event: {}", e);
            return;
        }
    };

    match &message {
        JsonRpcMessage::V2(JsonRpcV2Message::Response(resp)) => {
            let id = resp.id.clone();
            match pending.remove(&id) {
                Some((_, slot)) => {
                    let _ = slot.send(message);
                }
                None => {
                    trace!(server = %label, "discarding uncorrelated reply {:?}", id);
                }
            }
        }
        _ => {
            trace!(server = %label, "discarding uncorrelated event");
        }
    }
}
