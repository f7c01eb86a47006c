use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HubError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Timeout error")]
    Timeout,

    #[error("Server not found: {0}")]
    ServerNotFound(String),

    #[error("Server already running: {0}")]
    AlreadyRunning(String),

    #[error("Tool returned error")]
    Tool(serde_json::Value),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Server error: {0}")]
    Server(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Transport unavailable: {0}")]
    Unavailable(String),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Transport closed")]
    Closed,

    #[error("Peer error {code}: {message}")]
    Peer { code: i64, message: String },

    #[error("Decode error: {0}")]
    Decode(String),
}

impl HubError {
    /// Stable token for the error kind; used in log lines and by the
    /// HTTP layer when mapping errors to responses.
    pub fn kind(&self) -> &'static str {
        match self {
            HubError::Config(_) => "ConfigInvalid",
            HubError::Transport(TransportError::Unavailable(_)) => "TransportUnavailable",
            HubError::Transport(TransportError::Handshake(_)) => "TransportHandshake",
            HubError::Transport(TransportError::Closed) => "TransportClosed",
            HubError::Transport(TransportError::Peer { .. }) => "PeerError",
            HubError::Transport(TransportError::Decode(_)) => "Decode",
            HubError::Io(_) => "TransportClosed",
            HubError::Serialization(_) => "Decode",
            HubError::Timeout => "Timeout",
            HubError::ServerNotFound(_) => "NotFound",
            HubError::AlreadyRunning(_) => "AlreadyRunning",
            HubError::Tool(_) => "ToolError",
            HubError::InvalidRequest(_) => "InvalidRequest",
            HubError::Server(_) => "ServerError",
        }
    }
}

pub type Result<T> = std::result::Result<T, HubError>;

impl warp::reject::Reject for HubError {}
