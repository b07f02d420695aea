//! Proof-of-retrievability schemes.
//!
//! The challenge cycle only moves opaque values between the two roles: the
//! uploader encodes a file once, keeps the [`CycleState`], and hands the
//! farmer the tag and the [`PublicParams`]. Every cycle the uploader draws a
//! [`Challenge`] from the state, the farmer answers with a [`Proof`] built
//! from its stored file and tag, and the uploader verifies it against the
//! state. Only the scheme looks inside these values.

mod merkle;

pub use merkle::{DEFAULT_CHUNK_SIZE, MerkleScheme};

use serde::{Deserialize, Serialize};

/// Errors produced by a proof scheme.
#[derive(Debug, thiserror::Error)]
pub enum SchemeError {
    #[error("malformed {what}: {reason}")]
    Malformed { what: &'static str, reason: String },

    #[error("chunk size must be positive")]
    InvalidChunkSize,

    #[error("challenged chunk {index} out of range ({leaves} chunks)")]
    IndexOutOfRange { index: u64, leaves: u64 },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SchemeError {
    pub(crate) fn malformed(what: &'static str, reason: impl ToString) -> Self {
        Self::Malformed {
            what,
            reason: reason.to_string(),
        }
    }
}

macro_rules! opaque {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub serde_json::Value);

        impl From<serde_json::Value> for $name {
            fn from(v: serde_json::Value) -> Self {
                Self(v)
            }
        }

        impl From<$name> for serde_json::Value {
            fn from(v: $name) -> Self {
                v.0
            }
        }
    };
}

opaque!(
    /// Parameters the farmer needs to answer challenges.
    PublicParams
);
opaque!(
    /// Uploader-only state produced at encode time and threaded through
    /// every cycle.
    CycleState
);
opaque!(Challenge);
opaque!(Proof);

/// Output of [`ProofScheme::encode`].
#[derive(Debug, Clone)]
pub struct Encoded {
    /// Tag shipped to the farmer alongside the file.
    pub tag: Vec<u8>,
    pub state: CycleState,
    pub public: PublicParams,
}

/// A proof-of-retrievability scheme.
pub trait ProofScheme: Send + Sync + 'static {
    /// Prepares `file` for remote storage.
    fn encode(&self, file: &[u8]) -> Result<Encoded, SchemeError>;

    /// Draws a fresh challenge.
    fn gen_challenge(&self, state: &CycleState) -> Result<Challenge, SchemeError>;

    /// Answers `challenge` from the stored file and tag.
    fn prove(
        &self,
        public: &PublicParams,
        file: &[u8],
        challenge: &Challenge,
        tag: &[u8],
    ) -> Result<Proof, SchemeError>;

    /// Checks a proof. Malformed proofs are invalid, not errors.
    fn verify(&self, state: &CycleState, challenge: &Challenge, proof: &Proof) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opaque_values_serialize_transparently() {
        let c = Challenge(serde_json::json!({"index": 1}));
        assert_eq!(serde_json::to_string(&c).unwrap(), r#"{"index":1}"#);
        let back: Challenge = serde_json::from_str(r#"{"index":1}"#).unwrap();
        assert_eq!(back, c);
    }

    #[test]
    fn scheme_is_object_safe() {
        let scheme: Box<dyn ProofScheme> = Box::new(MerkleScheme::new(64).unwrap());
        let encoded = scheme.encode(b"object safe").unwrap();
        assert!(!encoded.tag.is_empty());
    }
}
