//! Initiator-side channel client.

use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use storjdemo_protocol::constants::{CHANNEL_CONNECT_TIMEOUT, STEP_RESPONSE_TIMEOUT};
use storjdemo_protocol::{Frame, StepKind};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

use crate::error::ChannelError;
use crate::machine::StepMachine;
use crate::server::{next_frame, send_frame};
use crate::ws_config;

/// One open channel of step type `S`, driven by the initiator.
///
/// Steps must be requested in order; requesting any other step fails the
/// channel locally without sending anything.
pub struct ChannelClient<S: StepKind> {
    session: String,
    machine: StepMachine<S>,
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    response_timeout: Duration,
}

impl<S: StepKind> ChannelClient<S> {
    /// Opens a channel to the responder at `peer` (`host:port`).
    pub async fn open(peer: &str, session: impl Into<String>) -> Result<Self, ChannelError> {
        let url = format!("ws://{peer}");
        let connect = tokio_tungstenite::connect_async_with_config(&url, Some(ws_config()), false);
        let (ws, _) = tokio::time::timeout(CHANNEL_CONNECT_TIMEOUT, connect)
            .await
            .map_err(|_| ChannelError::Timeout)??;

        let session = session.into();
        debug!(%session, %peer, channel = %S::CHANNEL, "channel connected");

        Ok(Self {
            session,
            machine: StepMachine::new(),
            ws,
            response_timeout: STEP_RESPONSE_TIMEOUT,
        })
    }

    /// Overrides the time allowed for each step's response.
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    pub fn is_closed(&self) -> bool {
        self.machine.is_closed()
    }

    /// Sends `step` and waits for its response.
    ///
    /// Returns `None` when the responder closed the channel instead of
    /// answering. An error frame from the responder fails the channel with
    /// [`ChannelError::Remote`].
    pub async fn request<Req, Resp>(
        &mut self,
        step: S,
        payload: &Req,
    ) -> Result<Option<Resp>, ChannelError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        self.machine.accept(step.name())?;

        let frame = Frame::request(self.session.as_str(), step, payload)?;
        if let Err(e) = send_frame(&mut self.ws, &frame).await {
            self.machine.close();
            return Err(e);
        }
        trace!(session = %self.session, step = step.name(), "step sent");

        let reply = match tokio::time::timeout(self.response_timeout, next_frame(&mut self.ws)).await
        {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                self.machine.close();
                return Err(e);
            }
            Err(_) => {
                self.machine.close();
                return Err(ChannelError::Timeout);
            }
        };

        let Some(reply) = reply else {
            self.machine.complete(step, false);
            debug!(session = %self.session, step = step.name(), "responder closed channel");
            return Ok(None);
        };

        if let Some(err) = reply.error {
            self.machine.close();
            return Err(ChannelError::Remote {
                code: err.code,
                message: err.message,
            });
        }

        if reply.step != step.name() {
            self.machine.close();
            return Err(ChannelError::ProtocolViolation(format!(
                "response for step {} to request {}",
                reply.step,
                step.name()
            )));
        }

        let parsed = match reply.require_payload() {
            Ok(p) => p,
            Err(e) => {
                self.machine.close();
                return Err(e.into());
            }
        };
        self.machine.complete(step, true);
        Ok(Some(parsed))
    }

    /// Closes the channel from the initiator side.
    pub async fn close(mut self) {
        self.machine.close();
        let _ = self.ws.close(None).await;
    }
}
