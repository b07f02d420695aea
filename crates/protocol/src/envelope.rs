use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::ProtocolError;
use crate::types::{ChannelKind, StepKind};

/// Error body carried by a frame that fails a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameError {
    pub code: i32,
    pub message: String,
}

/// One message on a sequenced channel.
///
/// Requests and their responses carry the same `step` name; a response
/// either has a `payload` or an `error`. Closing the connection instead of
/// answering means the step produced no response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub session: String,
    pub channel: ChannelKind,
    pub step: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Box<RawValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<FrameError>,
}

impl Frame {
    /// Creates a frame with an optional serialized payload.
    pub fn new<T: Serialize>(
        session: impl Into<String>,
        channel: ChannelKind,
        step: impl Into<String>,
        payload: Option<&T>,
    ) -> Result<Self, serde_json::Error> {
        let raw = match payload {
            Some(p) => Some(serde_json::value::to_raw_value(p)?),
            None => None,
        };
        Ok(Self {
            session: session.into(),
            channel,
            step: step.into(),
            payload: raw,
            error: None,
        })
    }

    /// Creates a request frame for a typed step.
    pub fn request<S: StepKind, T: Serialize>(
        session: impl Into<String>,
        step: S,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Self::new(session, S::CHANNEL, step.name(), Some(payload))
    }

    /// Creates an error frame.
    pub fn error(
        session: impl Into<String>,
        channel: ChannelKind,
        step: impl Into<String>,
        code: i32,
        message: impl Into<String>,
    ) -> Self {
        Self {
            session: session.into(),
            channel,
            step: step.into(),
            payload: None,
            error: Some(FrameError {
                code,
                message: message.into(),
            }),
        }
    }

    /// Deserializes the payload into the given type.
    pub fn parse_payload<T: DeserializeOwned>(&self) -> Result<Option<T>, serde_json::Error> {
        match &self.payload {
            Some(raw) => Ok(Some(serde_json::from_str(raw.get())?)),
            None => Ok(None),
        }
    }

    /// Deserializes a payload the step cannot do without.
    pub fn require_payload<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        self.parse_payload()?
            .ok_or_else(|| ProtocolError::MissingPayload(self.step.clone()))
    }

    /// Creates the response frame for this request.
    pub fn reply_raw(&self, payload: Box<RawValue>) -> Self {
        Self {
            session: self.session.clone(),
            channel: self.channel,
            step: self.step.clone(),
            payload: Some(payload),
            error: None,
        }
    }

    /// Creates a response frame carrying a serialized payload.
    pub fn reply<T: Serialize>(&self, payload: &T) -> Result<Self, serde_json::Error> {
        Ok(self.reply_raw(serde_json::value::to_raw_value(payload)?))
    }

    /// Creates an error response for this request.
    pub fn reply_error(&self, code: i32, message: impl Into<String>) -> Self {
        Self::error(
            self.session.clone(),
            self.channel,
            self.step.clone(),
            code,
            message,
        )
    }
}
