//! Step handlers and the responder adapter the server drives.
//!
//! Implementors of [`StepHandler`] provide the domain logic of one channel
//! kind; [`Sequenced`] wraps a handler with its step machine so the server
//! only ever sees the object-safe [`Responder`].

use std::future::Future;
use std::pin::Pin;

use serde::Serialize;
use serde_json::value::RawValue;
use storjdemo_protocol::{ChannelKind, Frame, StepKind};

use crate::error::ChannelError;
use crate::machine::StepMachine;

/// Future returned by a step handler: the response payload, or `None` to
/// close the channel without answering.
pub type StepFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Option<Box<RawValue>>, ChannelError>> + Send + 'a>>;

/// Future returned by a responder: the frame to send back, if any.
pub type ResponseFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Option<Frame>, ChannelError>> + Send + 'a>>;

/// Domain logic for the steps of one channel kind.
///
/// `handle` is only called with the step the channel currently expects.
pub trait StepHandler: Send + 'static {
    type Step: StepKind;

    fn handle<'a>(&'a mut self, step: Self::Step, frame: &'a Frame) -> StepFuture<'a>;
}

/// A channel endpoint driven frame by frame by the server.
pub trait Responder: Send {
    fn kind(&self) -> ChannelKind;

    /// `true` once the channel accepts no further steps.
    fn is_closed(&self) -> bool;

    fn respond<'a>(&'a mut self, frame: &'a Frame) -> ResponseFuture<'a>;
}

/// Serializes a step response.
pub fn reply_payload<T: Serialize>(payload: &T) -> Result<Option<Box<RawValue>>, ChannelError> {
    Ok(Some(serde_json::value::to_raw_value(payload)?))
}

/// A [`StepHandler`] bound to its step machine.
pub struct Sequenced<H: StepHandler> {
    machine: StepMachine<H::Step>,
    handler: H,
}

impl<H: StepHandler> Sequenced<H> {
    pub fn new(handler: H) -> Self {
        Self {
            machine: StepMachine::new(),
            handler,
        }
    }
}

impl<H: StepHandler> Responder for Sequenced<H> {
    fn kind(&self) -> ChannelKind {
        <H::Step as StepKind>::CHANNEL
    }

    fn is_closed(&self) -> bool {
        self.machine.is_closed()
    }

    fn respond<'a>(&'a mut self, frame: &'a Frame) -> ResponseFuture<'a> {
        Box::pin(async move {
            let kind = <H::Step as StepKind>::CHANNEL;
            if frame.channel != kind {
                self.machine.close();
                return Err(ChannelError::ProtocolViolation(format!(
                    "frame for {} channel on a {kind} channel",
                    frame.channel
                )));
            }

            let step = self.machine.accept(&frame.step)?;
            match self.handler.handle(step, frame).await {
                Ok(Some(payload)) => {
                    self.machine.complete(step, true);
                    Ok(Some(frame.reply_raw(payload)))
                }
                Ok(None) => {
                    self.machine.complete(step, false);
                    Ok(None)
                }
                Err(e) => {
                    self.machine.close();
                    Err(e)
                }
            }
        })
    }
}
