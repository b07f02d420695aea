use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::ProtocolError;

/// Length of a content identity in bytes (SHA-256 digest).
pub const CONTENT_ID_LEN: usize = 32;

/// SHA-256 identity of a file's content.
///
/// Rendered as upper-case hex both on the wire and as the on-disk file name.
/// Parsing accepts either case.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentId([u8; CONTENT_ID_LEN]);

impl ContentId {
    pub const fn from_bytes(bytes: [u8; CONTENT_ID_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; CONTENT_ID_LEN] {
        &self.0
    }

    /// Upper-case hex encoding (64 characters).
    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, ProtocolError> {
        let bytes =
            hex::decode(s).map_err(|e| ProtocolError::InvalidIdentity(format!("{s:?}: {e}")))?;
        let bytes: [u8; CONTENT_ID_LEN] = bytes.try_into().map_err(|b: Vec<u8>| {
            ProtocolError::InvalidIdentity(format!(
                "expected {CONTENT_ID_LEN} bytes, got {}",
                b.len()
            ))
        })?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentId({})", self.to_hex())
    }
}

impl FromStr for ContentId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for ContentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Logical channel types multiplexed between two peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// Three-step file + tag handoff.
    Handoff,
    /// Two-step proof-of-retrievability challenge.
    Challenge,
    /// Any channel name this build does not know.
    #[serde(other)]
    Unknown,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Handoff => "handoff",
            Self::Challenge => "challenge",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The ordered steps of one channel kind.
///
/// `ORDER` is the whole transition table: step `ORDER[i]` may only be
/// received while the channel expects it, and is followed by `ORDER[i + 1]`
/// (or by the closed state after the last step).
pub trait StepKind: Copy + Eq + fmt::Debug + Send + Sync + 'static {
    const CHANNEL: ChannelKind;
    const ORDER: &'static [Self];

    /// Name used in the `step` field of a frame.
    fn name(self) -> &'static str;

    fn from_name(name: &str) -> Option<Self> {
        Self::ORDER.iter().copied().find(|s| s.name() == name)
    }

    fn first() -> Option<Self> {
        Self::ORDER.first().copied()
    }

    fn successor(self) -> Option<Self> {
        let pos = Self::ORDER.iter().position(|s| *s == self)?;
        Self::ORDER.get(pos + 1).copied()
    }
}

/// Steps of the handoff channel, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandoffStep {
    /// Farmer advertises its channel location.
    Request,
    /// Uploader declares file and tag identities; farmer answers with its
    /// transport endpoint.
    AcceptFiles,
    /// Uploader hands over the public proof parameters; farmer confirms
    /// both files arrived intact.
    ReportDownloaded,
}

impl StepKind for HandoffStep {
    const CHANNEL: ChannelKind = ChannelKind::Handoff;
    const ORDER: &'static [Self] = &[Self::Request, Self::AcceptFiles, Self::ReportDownloaded];

    fn name(self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::AcceptFiles => "accept_files",
            Self::ReportDownloaded => "report_downloaded",
        }
    }
}

/// Steps of the challenge channel, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChallengeStep {
    /// Uploader sends a challenge; farmer answers with a proof.
    SendProof,
    /// Uploader reports its verdict; farmer closes the channel.
    ReceiveResult,
}

impl StepKind for ChallengeStep {
    const CHANNEL: ChannelKind = ChannelKind::Challenge;
    const ORDER: &'static [Self] = &[Self::SendProof, Self::ReceiveResult];

    fn name(self) -> &'static str {
        match self {
            Self::SendProof => "send_proof",
            Self::ReceiveResult => "receive_result",
        }
    }
}
