//! Sequenced request/response channels between an initiator and a
//! responder.
//!
//! Every channel is one WebSocket connection. The initiator drives it with
//! a [`ChannelClient`]; the responder side runs a [`ChannelServer`] that
//! looks up a [`Responder`] in the [`ChannelRegistry`] by channel kind and
//! feeds it every frame in order. Both ends track the expected step with a
//! [`StepMachine`], so an out-of-order step fails the channel on whichever
//! side sees it first.

mod client;
mod error;
mod handler;
mod machine;
mod registry;
mod server;

pub use client::ChannelClient;
pub use error::ChannelError;
pub use handler::{Responder, ResponseFuture, Sequenced, StepFuture, StepHandler, reply_payload};
pub use machine::{ChannelState, StepMachine};
pub use registry::{ChannelRegistry, ResponderFactory};
pub use server::ChannelServer;

use storjdemo_protocol::constants::MAX_FRAME_SIZE;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;

/// WebSocket limits shared by both ends.
pub(crate) fn ws_config() -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(MAX_FRAME_SIZE);
    config.max_frame_size = Some(MAX_FRAME_SIZE);
    config
}
