//! TCP transport that pushes content-addressed files from the uploader to
//! the farmer.
//!
//! The farmer registers the identities it expects and every registration is
//! notified once per stored file; anything not registered is refused.
//!
//! # Wire format
//!
//! See [`wire`] for the framing.

pub mod client;
pub mod error;
pub mod server;
pub mod wire;

pub use client::TransportClient;
pub use error::DataChannelError;
pub use server::{ArrivalCallback, Registration, TransportServer};
pub use wire::FileHeader;

use std::time::Duration;

/// TCP read/write buffer size (256 KB).
pub const TCP_BUFFER_SIZE: usize = 256 * 1024;

/// Timeout for the TCP connection attempt.
pub const TCP_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for the per-file acknowledgment.
pub const TCP_ACK_TIMEOUT: Duration = Duration::from_secs(30);
