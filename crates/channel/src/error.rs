use storjdemo_protocol::ProtocolError;
use storjdemo_protocol::constants::{
    ERR_PROTOCOL_VIOLATION, ERR_REFUSED, ERR_STEP_FAILED, ERR_UNKNOWN_CHANNEL,
};

/// Errors produced by a sequenced channel.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("no responder for channel {0}")]
    UnknownChannel(String),

    #[error("channel refused: {0}")]
    Refused(String),

    #[error("peer error {code}: {message}")]
    Remote { code: i32, message: String },

    #[error("channel closed")]
    Closed,

    #[error("timed out")]
    Timeout,

    #[error("cancelled")]
    Cancelled,

    #[error("step failed: {0}")]
    Step(String),
}

impl ChannelError {
    /// Error code sent to the peer when this error fails a channel.
    pub fn code(&self) -> i32 {
        match self {
            Self::ProtocolViolation(_) | Self::Json(_) | Self::Protocol(_) => {
                ERR_PROTOCOL_VIOLATION
            }
            Self::UnknownChannel(_) => ERR_UNKNOWN_CHANNEL,
            Self::Refused(_) => ERR_REFUSED,
            Self::Remote { code, .. } => *code,
            _ => ERR_STEP_FAILED,
        }
    }
}
