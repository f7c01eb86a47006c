use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::debug;

use super::Transport;
use crate::config::schema::{ServerEntry, TransportKind};
use crate::error::{ConfigError, HubError, Result, TransportError};
use crate::protocol::{mcp, JsonRpcMessage, JsonRpcV2Message};

/// Request/response HTTP transport: every request is an independent POST
/// whose response body is the reply envelope. There is no stream, so the
/// transport counts as connected from `open` until `close`.
pub struct HttpTransport {
    name: String,
    url: String,
    headers: HashMap<String, String>,
    default_timeout: Duration,
    client: reqwest::Client,
    connected: AtomicBool,
}

impl HttpTransport {
    pub fn new(name: &str, entry: &ServerEntry) -> Result<Self> {
        if entry.url.is_empty() {
            return Err(ConfigError::Validation(format!(
                "server '{name}': url is required for http transport"
            ))
            .into());
        }

        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| TransportError::Unavailable(format!("failed to build client: {e}")))?;

        Ok(Self {
            name: name.to_string(),
            url: entry.url.clone(),
            headers: entry.headers.clone(),
            default_timeout: entry.request_timeout(),
            client,
            connected: AtomicBool::new(false),
        })
    }

    fn builder(&self, method: reqwest::Method, timeout: Duration) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(method, &self.url)
            .timeout(timeout)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        for (key, value) in &self.headers {
            builder = builder.header(key, value);
        }
        builder
    }

    async fn round_trip(
        &self,
        method: reqwest::Method,
        message: &JsonRpcMessage,
        timeout: Duration,
    ) -> Result<reqwest::Response> {
        let response = self
            .builder(method, timeout)
            .json(message)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    HubError::Timeout
                } else {
                    TransportError::Closed.into()
                }
            })?;
        Ok(response)
    }
}

fn is_initialize(message: &JsonRpcMessage) -> bool {
    matches!(
        message,
        JsonRpcMessage::V2(JsonRpcV2Message::Request(req)) if req.method == mcp::INITIALIZE_METHOD
    )
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open(&self, _deadline: Duration) -> Result<()> {
        // The actual connection happens per-request.
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn request(&self, message: JsonRpcMessage, deadline: Duration) -> Result<JsonRpcMessage> {
        if !self.connected() {
            return Err(TransportError::Closed.into());
        }

        let timeout = deadline.min(self.default_timeout);
        let mut response = self
            .round_trip(reqwest::Method::POST, &message, timeout)
            .await?;

        // Some servers only accept the initialize envelope as a GET.
        if response.status() == reqwest::StatusCode::METHOD_NOT_ALLOWED && is_initialize(&message) {
            debug!(server = %self.name, "POST not allowed for initialize, retrying as GET");
            response = self
                .round_trip(reqwest::Method::GET, &message, timeout)
                .await?;
        }

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Peer {
                code: status.as_u16() as i64,
                message: truncate(&body, 200),
            }
            .into());
        }

        let body = response
            .bytes()
            .await
            .map_err(|_| TransportError::Closed)?;
        serde_json::from_slice(&body)
            .map_err(|e| TransportError::Decode(format!("invalid reply envelope: {e}")).into())
    }

    async fn notify(&self, message: JsonRpcMessage) -> Result<()> {
        if !self.connected() {
            return Err(TransportError::Closed.into());
        }

        // Notifications have no reply; the body and any non-2xx status are
        // discarded.
        match self
            .round_trip(reqwest::Method::POST, &message, self.default_timeout)
            .await
        {
            Ok(response) => {
                if !response.status().is_success() {
                    debug!(
                        server = %self.name,
                        status = %response.status(),
                        "notification rejected by peer"
                    );
                }
                Ok(())
            }
            Err(_) => Err(TransportError::Closed.into()),
        }
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Http
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
