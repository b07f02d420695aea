//! Integrity checking of transferred files and the gate that turns two
//! independent arrivals (data file + tag file) into one outcome.

mod gate;
mod integrity;
mod validation;

pub use gate::{FileTransferGate, TransferOutcome};
pub use integrity::{digest_bytes, digest_file, verify, verify_file};
pub use validation::{content_path, parse_content_name};

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transfer aborted: {0}")]
    Aborted(String),

    #[error("cancelled")]
    Cancelled,

    #[error("invalid content name: {0}")]
    InvalidName(String),
}
