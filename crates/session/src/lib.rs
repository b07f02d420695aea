//! The two roles of a storjdemo node.
//!
//! The farmer answers handoff and challenge channels from its channel
//! server; the uploader hands a file off to a farmer and then keeps
//! challenging it on a fixed interval through the [`ChallengeScheduler`].
//! Both share a [`ProcessContext`] carrying the stop signal and the
//! process health.

mod config;
mod context;
mod error;
mod farmer;
mod scheduler;
mod sender;
mod uploader;

pub use config::SessionConfig;
pub use context::{Health, ProcessContext};
pub use error::SessionError;
pub use farmer::{CycleMaterial, Farmer, FarmerNode, FarmerSession};
pub use scheduler::{ChallengeScheduler, ChannelCycleRunner, CycleFuture, CycleRunner, CycleVerdict};
pub use sender::{FileSender, SendFuture, TcpFileSender};
pub use uploader::{Uploader, UploaderSession};

/// Fresh session identifier.
pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
