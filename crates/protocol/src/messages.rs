//! Payloads of every step, one request and one response type per step.
//!
//! Proof-scheme values (`publicProofParams`, `challenge`, `proof`) are
//! carried as opaque JSON; only the scheme interprets them.

use serde::{Deserialize, Serialize};

use crate::types::ContentId;

// ---------------------------------------------------------------------------
// Handoff channel
// ---------------------------------------------------------------------------

/// Step 1 request. Carries nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffRequest {}

/// Step 1 response: where the farmer accepts channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerLocation {
    pub peer_location: String,
}

/// Step 2 request: identities of the two files about to be pushed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterFiles {
    pub file_identity_hex: ContentId,
    pub tag_identity_hex: ContentId,
}

/// Step 2 response: transport endpoint the files should be pushed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportEndpoint {
    pub transport_ip: String,
    pub transport_port: u16,
}

impl TransportEndpoint {
    /// `ip:port` form accepted by socket connect calls.
    pub fn address(&self) -> String {
        if self.transport_ip.contains(':') {
            format!("[{}]:{}", self.transport_ip, self.transport_port)
        } else {
            format!("{}:{}", self.transport_ip, self.transport_port)
        }
    }
}

/// Step 3 request: public proof parameters for the farmer to keep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportDownloaded {
    pub public_proof_params: serde_json::Value,
}

/// Step 3 response: `1` when both files arrived intact, `0` otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffResult {
    pub success: u8,
}

impl HandoffResult {
    pub fn accepted() -> Self {
        Self { success: 1 }
    }

    pub fn rejected() -> Self {
        Self { success: 0 }
    }

    pub fn is_success(&self) -> bool {
        self.success != 0
    }
}

// ---------------------------------------------------------------------------
// Challenge channel
// ---------------------------------------------------------------------------

/// Step 1 request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChallengeRequest {
    pub challenge: serde_json::Value,
}

/// Step 1 response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProofResponse {
    pub proof: serde_json::Value,
}

/// Step 2 request. The farmer answers by closing the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofVerdict {
    pub valid: bool,
}
