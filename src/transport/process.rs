//! Line-framed JSON-RPC over a child process's stdio, shared by the stdio
//! and container transports.

use bytes::BytesMut;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::{HubError, Result, TransportError};
use crate::protocol::{mcp, JsonRpcId, JsonRpcMessage, JsonRpcV2Message};

const MAX_FRAME_BYTES: usize = 1024 * 1024;
const CLOSE_GRACE: Duration = Duration::from_secs(2);
const KILL_GRACE: Duration = Duration::from_millis(500);

type Pending = Arc<DashMap<JsonRpcId, oneshot::Sender<JsonRpcMessage>>>;

/// Plumbing for one spawned child speaking newline-delimited JSON-RPC on
/// stdout/stdin. Responses are routed by correlation id; stderr is drained
/// into logs and never parsed as protocol.
pub(super) struct ProcessIo {
    label: String,
    default_timeout: Duration,
    connected: Arc<AtomicBool>,
    pending: Pending,
    stdin: Mutex<Option<ChildStdin>>,
    child: Mutex<Option<Child>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl ProcessIo {
    pub fn new(label: &str, default_timeout: Duration) -> Self {
        Self {
            label: label.to_string(),
            default_timeout,
            connected: Arc::new(AtomicBool::new(false)),
            pending: Arc::new(DashMap::new()),
            stdin: Mutex::new(None),
            child: Mutex::new(None),
            reader: Mutex::new(None),
        }
    }

    pub async fn open(&self, mut command: Command) -> Result<()> {
        if self.connected() {
            return Err(TransportError::Unavailable("transport already open".into()).into());
        }

        command
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        let mut child = command.spawn().map_err(|e| {
            TransportError::Unavailable(format!("failed to spawn process: {e}"))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::Unavailable("failed to take stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Unavailable("failed to take stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| TransportError::Unavailable("failed to take stderr".into()))?;

        // Drain stderr into logs; it carries the peer's diagnostics only.
        let stderr_label = self.label.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(server = %stderr_label, "stderr: {}", line);
            }
        });

        self.pending.clear();

        let reader = tokio::spawn(read_loop(
            self.label.clone(),
            stdout,
            Arc::clone(&self.connected),
            Arc::clone(&self.pending),
        ));

        *self.stdin.lock().await = Some(stdin);
        *self.child.lock().await = Some(child);
        *self.reader.lock().await = Some(reader);
        self.connected.store(true, Ordering::SeqCst);

        Ok(())
    }

    pub async fn request(
        &self,
        message: JsonRpcMessage,
        deadline: Duration,
    ) -> Result<JsonRpcMessage> {
        if !self.connected() {
            return Err(TransportError::Closed.into());
        }

        let id = message
            .id()
            .cloned()
            .ok_or_else(|| HubError::InvalidRequest("request envelope has no id".into()))?;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id.clone(), tx);

        if let Err(e) = self.write(&message).await {
            self.pending.remove(&id);
            return Err(e);
        }

        let effective = deadline.min(self.default_timeout);
        match tokio::time::timeout(effective, rx).await {
            Ok(Ok(envelope)) => Ok(envelope),
            Ok(Err(_)) => Err(TransportError::Closed.into()),
            Err(_) => {
                // Late replies for this id are discarded by the reader.
                self.pending.remove(&id);
                Err(HubError::Timeout)
            }
        }
    }

    pub async fn notify(&self, message: JsonRpcMessage) -> Result<()> {
        if !self.connected() {
            return Err(TransportError::Closed.into());
        }
        self.write(&message).await
    }

    async fn write(&self, message: &JsonRpcMessage) -> Result<()> {
        let mut frame = serde_json::to_vec(message)?;
        frame.push(b'\n');
        trace!(server = %self.label, "sending {} bytes", frame.len());

        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(TransportError::Closed)?;
        if let Err(e) = async {
            stdin.write_all(&frame).await?;
            stdin.flush().await
        }
        .await
        {
            debug!(server = %self.label, "write failed: {}", e);
            self.connected.store(false, Ordering::SeqCst);
            return Err(TransportError::Closed.into());
        }
        Ok(())
    }

    /// Close stdin, wait a grace period, then terminate the child. The
    /// optional escalation command (e.g. `docker stop`) runs when the grace
    /// period expires, before the child is signalled.
    pub async fn close(&self, escalation: Option<Command>) {
        self.connected.store(false, Ordering::SeqCst);

        // Dropping stdin closes the pipe and asks the peer to exit.
        self.stdin.lock().await.take();

        if let Some(mut child) = self.child.lock().await.take() {
            let exited = tokio::select! {
                _ = child.wait() => true,
                _ = tokio::time::sleep(CLOSE_GRACE) => false,
            };

            if !exited {
                if let Some(mut stop) = escalation {
                    let _ = stop.status().await;
                }
                terminate(&mut child).await;
            }
        }

        if let Some(reader) = self.reader.lock().await.take() {
            reader.abort();
        }

        // Dropping the senders fails any in-flight request with Closed.
        self.pending.clear();
    }

    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        if let Some(id) = child.id() {
            let _ = signal::kill(Pid::from_raw(id as i32), Signal::SIGTERM);
            let exited = tokio::select! {
                _ = child.wait() => true,
                _ = tokio::time::sleep(KILL_GRACE) => false,
            };
            if exited {
                return;
            }
        }
    }

    if let Err(e) = child.kill().await {
        warn!("failed to kill child process: {}", e);
    }
    let _ = child.wait().await;
}

async fn read_loop(
    label: String,
    mut stdout: ChildStdout,
    connected: Arc<AtomicBool>,
    pending: Pending,
) {
    let mut buffer = BytesMut::with_capacity(8192);

    loop {
        match stdout.read_buf(&mut buffer).await {
            Ok(0) => {
                debug!(server = %label, "peer closed stdout");
                break;
            }
            Ok(_) => {
                while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                    let frame = buffer.split_to(pos + 1);
                    route_frame(&label, &pending, &frame);
                }
                if buffer.len() > MAX_FRAME_BYTES {
                    warn!(server = %label, "frame exceeds {} bytes, closing", MAX_FRAME_BYTES);
                    break;
                }
            }
            Err(e) => {
                debug!(server = %label, "read failed: {}", e);
                break;
            }
        }
    }

    connected.store(false, Ordering::SeqCst);
    // Pending requests observe TransportClosed via their dropped senders.
    pending.clear();
}

fn route_frame(label: &str, pending: &Pending, frame: &[u8]) {
    let line = match std::str::from_utf8(frame) {
        Ok(text) => text.trim(),
        Err(_) => {
            warn!(server = %label, "discarding non-UTF-8 frame");
            return;
        }
    };
    if line.is_empty() {
        return;
    }

    let message: JsonRpcMessage = match serde_json::from_str(line) {
        Ok(message) => message,
        Err(_) => {
            // Peers occasionally chat on stdout; surface it, don't parse it.
            debug!(server = %label, "stdout: {}", line);
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
                    debug!(server = %label, "discarding reply with unknown id {:?}", id);
                }
            }
        }
        JsonRpcMessage::V2(JsonRpcV2Message::Notification(n)) => {
            if n.method == mcp::TOOLS_LIST_CHANGED_METHOD {
                // The catalog stays as discovered until the owning entry is
                // reloaded.
                debug!(server = %label, "peer reports a changed tool list");
            } else {
                debug!(server = %label, method = %n.method, "peer notification");
            }
        }
        JsonRpcMessage::V2(JsonRpcV2Message::Request(req)) => {
            debug!(server = %label, method = %req.method, "discarding peer-initiated request");
        }
    }
}
