use storjdemo_channel::ChannelError;
use storjdemo_data_channel::DataChannelError;
use storjdemo_heartbeat::SchemeError;
use storjdemo_transfer::TransferError;

/// Errors produced by the uploader and farmer roles.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("transport error: {0}")]
    Transport(#[from] DataChannelError),

    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("proof scheme error: {0}")]
    Scheme(#[from] SchemeError),

    #[error("farmer closed the channel during {0}")]
    UnexpectedClose(&'static str),

    #[error("handoff of session {0} was rejected by the farmer")]
    HandoffRejected(String),

    #[error("session {0} already has its identities")]
    IdentitiesAlreadySet(String),

    #[error("session {0} has not completed its handoff")]
    NotReady(String),

    #[error("task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
