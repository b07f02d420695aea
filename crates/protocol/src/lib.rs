//! Wire vocabulary shared by both roles: content identities, channel kinds
//! and their ordered steps, the frame envelope, and the per-step payloads.

pub mod constants;
pub mod envelope;
pub mod messages;
pub mod types;

pub use envelope::{Frame, FrameError};
pub use types::{ChallengeStep, ChannelKind, ContentId, HandoffStep, StepKind};

/// Errors produced while interpreting protocol data.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid content identity: {0}")]
    InvalidIdentity(String),

    #[error("step {0} requires a payload")]
    MissingPayload(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
