//! Merkle-sampling proof of retrievability.
//!
//! The file is cut into fixed-size chunks. Each chunk hashes to a leaf
//! `SHA-256(0x00 || chunk)`, interior nodes are `SHA-256(0x01 || left ||
//! right)`, and a level with an odd node count pairs its last node with
//! itself. The tag is the concatenated leaves, so the farmer can build any
//! authentication path without rehashing the file; the uploader keeps only
//! the root.
//!
//! A challenge names one chunk and a fresh nonce. The proof carries the
//! chunk, its sibling path, and `SHA-256(nonce || chunk)` so an old proof
//! cannot be replayed against a new challenge.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::{Rng, RngCore};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use tracing::debug;

use crate::{Challenge, CycleState, Encoded, Proof, ProofScheme, PublicParams, SchemeError};

type Digest = [u8; 32];

const LEAF_PREFIX: u8 = 0x00;
const NODE_PREFIX: u8 = 0x01;
const DIGEST_LEN: usize = 32;
const NONCE_LEN: usize = 16;

/// Default chunk size in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

// ---------------------------------------------------------------------------
// Wire forms of the opaque values
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Params {
    chunk_size: u64,
    leaf_count: u64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct State {
    root: String,
    leaf_count: u64,
    chunk_size: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChunkChallenge {
    index: u64,
    nonce: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChunkProof {
    index: u64,
    chunk: String,
    siblings: Vec<String>,
    binding: String,
}

fn decode<T: DeserializeOwned>(what: &'static str, value: &serde_json::Value) -> Result<T, SchemeError> {
    serde_json::from_value(value.clone()).map_err(|e| SchemeError::malformed(what, e))
}

fn decode_digest(what: &'static str, s: &str) -> Result<Digest, SchemeError> {
    let bytes = hex::decode(s).map_err(|e| SchemeError::malformed(what, e))?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| SchemeError::malformed(what, format!("{} bytes", b.len())))
}

// ---------------------------------------------------------------------------
// Tree
// ---------------------------------------------------------------------------

fn hash_leaf(chunk: &[u8]) -> Digest {
    let mut h = Sha256::new();
    h.update([LEAF_PREFIX]);
    h.update(chunk);
    h.finalize().into()
}

fn hash_node(left: &Digest, right: &Digest) -> Digest {
    let mut h = Sha256::new();
    h.update([NODE_PREFIX]);
    h.update(left);
    h.update(right);
    h.finalize().into()
}

fn hash_binding(nonce: &[u8], chunk: &[u8]) -> Digest {
    let mut h = Sha256::new();
    h.update(nonce);
    h.update(chunk);
    h.finalize().into()
}

/// Chunks of `file`. An empty file is a single empty chunk.
fn chunks(file: &[u8], chunk_size: usize) -> Vec<&[u8]> {
    if file.is_empty() {
        return vec![file];
    }
    file.chunks(chunk_size).collect()
}

fn parent_level(level: &[Digest]) -> Vec<Digest> {
    level
        .chunks(2)
        .map(|pair| hash_node(&pair[0], pair.get(1).unwrap_or(&pair[0])))
        .collect()
}

fn root(leaves: &[Digest]) -> Digest {
    let mut level = leaves.to_vec();
    while level.len() > 1 {
        level = parent_level(&level);
    }
    level.first().copied().unwrap_or_else(|| hash_leaf(&[]))
}

/// Number of siblings on every authentication path.
fn depth(leaf_count: u64) -> usize {
    let mut n = leaf_count;
    let mut d = 0;
    while n > 1 {
        n = n.div_ceil(2);
        d += 1;
    }
    d
}

fn sibling_path(leaves: &[Digest], mut index: usize) -> Vec<Digest> {
    let mut path = Vec::new();
    let mut level = leaves.to_vec();
    while level.len() > 1 {
        let sibling = if index % 2 == 0 {
            level.get(index + 1).unwrap_or(&level[index])
        } else {
            &level[index - 1]
        };
        path.push(*sibling);
        level = parent_level(&level);
        index /= 2;
    }
    path
}

fn fold_path(leaf: Digest, mut index: u64, siblings: &[Digest]) -> Digest {
    siblings.iter().fold(leaf, |node, sibling| {
        let parent = if index % 2 == 0 {
            hash_node(&node, sibling)
        } else {
            hash_node(sibling, &node)
        };
        index /= 2;
        parent
    })
}

// ---------------------------------------------------------------------------
// Scheme
// ---------------------------------------------------------------------------

/// Merkle-sampling scheme with a fixed chunk size.
#[derive(Debug, Clone, Copy)]
pub struct MerkleScheme {
    chunk_size: usize,
}

impl Default for MerkleScheme {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl MerkleScheme {
    pub fn new(chunk_size: usize) -> Result<Self, SchemeError> {
        if chunk_size == 0 {
            return Err(SchemeError::InvalidChunkSize);
        }
        Ok(Self { chunk_size })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Challenge for a specific chunk and nonce.
    pub fn challenge_at(index: u64, nonce: &[u8]) -> Challenge {
        let challenge = ChunkChallenge {
            index,
            nonce: hex::encode(nonce),
        };
        Challenge(serde_json::json!(challenge))
    }

    fn check(state: &CycleState, challenge: &Challenge, proof: &Proof) -> Result<bool, SchemeError> {
        let state: State = decode("cycle state", &state.0)?;
        let challenge: ChunkChallenge = decode("challenge", &challenge.0)?;
        let proof: ChunkProof = decode("proof", &proof.0)?;

        if proof.index != challenge.index || proof.index >= state.leaf_count {
            return Ok(false);
        }
        if proof.siblings.len() != depth(state.leaf_count) {
            return Ok(false);
        }

        let chunk = BASE64
            .decode(&proof.chunk)
            .map_err(|e| SchemeError::malformed("proof chunk", e))?;
        if chunk.len() as u64 > state.chunk_size {
            return Ok(false);
        }

        let nonce = hex::decode(&challenge.nonce).map_err(|e| SchemeError::malformed("nonce", e))?;
        if decode_digest("binding", &proof.binding)? != hash_binding(&nonce, &chunk) {
            return Ok(false);
        }

        let siblings = proof
            .siblings
            .iter()
            .map(|s| decode_digest("sibling", s))
            .collect::<Result<Vec<_>, _>>()?;
        let expected = decode_digest("root", &state.root)?;

        Ok(fold_path(hash_leaf(&chunk), proof.index, &siblings) == expected)
    }
}

impl ProofScheme for MerkleScheme {
    fn encode(&self, file: &[u8]) -> Result<Encoded, SchemeError> {
        let leaves: Vec<Digest> = chunks(file, self.chunk_size)
            .into_iter()
            .map(hash_leaf)
            .collect();
        let leaf_count = leaves.len() as u64;
        let root = root(&leaves);

        let tag = leaves.concat();
        let state = State {
            root: hex::encode(root),
            leaf_count,
            chunk_size: self.chunk_size as u64,
        };
        let public = Params {
            chunk_size: self.chunk_size as u64,
            leaf_count,
        };

        Ok(Encoded {
            tag,
            state: CycleState(serde_json::to_value(state)?),
            public: PublicParams(serde_json::to_value(public)?),
        })
    }

    fn gen_challenge(&self, state: &CycleState) -> Result<Challenge, SchemeError> {
        let state: State = decode("cycle state", &state.0)?;
        if state.leaf_count == 0 {
            return Err(SchemeError::malformed("cycle state", "no chunks"));
        }

        let mut rng = rand::thread_rng();
        let index = rng.gen_range(0..state.leaf_count);
        let mut nonce = [0u8; NONCE_LEN];
        rng.fill_bytes(&mut nonce);

        Ok(Self::challenge_at(index, &nonce))
    }

    fn prove(
        &self,
        public: &PublicParams,
        file: &[u8],
        challenge: &Challenge,
        tag: &[u8],
    ) -> Result<Proof, SchemeError> {
        let params: Params = decode("public params", &public.0)?;
        let challenge: ChunkChallenge = decode("challenge", &challenge.0)?;
        if params.chunk_size == 0 {
            return Err(SchemeError::InvalidChunkSize);
        }

        let tag_len = params
            .leaf_count
            .checked_mul(DIGEST_LEN as u64)
            .ok_or_else(|| SchemeError::malformed("public params", "leaf count overflows"))?;
        if tag.len() as u64 != tag_len {
            return Err(SchemeError::malformed(
                "tag",
                format!("{} bytes for {} chunks", tag.len(), params.leaf_count),
            ));
        }
        if challenge.index >= params.leaf_count {
            return Err(SchemeError::IndexOutOfRange {
                index: challenge.index,
                leaves: params.leaf_count,
            });
        }

        let leaves: Vec<Digest> = tag
            .chunks_exact(DIGEST_LEN)
            .map(|c| {
                let mut d = [0u8; DIGEST_LEN];
                d.copy_from_slice(c);
                d
            })
            .collect();

        let start = challenge
            .index
            .checked_mul(params.chunk_size)
            .ok_or_else(|| SchemeError::malformed("public params", "chunk offset overflows"))?;
        if start > file.len() as u64 || (start == file.len() as u64 && !file.is_empty()) {
            return Err(SchemeError::malformed(
                "file",
                format!("{} bytes, chunk {} starts at {start}", file.len(), challenge.index),
            ));
        }
        let start = start as usize;
        let end = usize::try_from(params.chunk_size)
            .ok()
            .and_then(|size| start.checked_add(size))
            .map_or(file.len(), |end| file.len().min(end));
        let chunk = &file[start..end];

        let nonce = hex::decode(&challenge.nonce).map_err(|e| SchemeError::malformed("nonce", e))?;
        let proof = ChunkProof {
            index: challenge.index,
            chunk: BASE64.encode(chunk),
            siblings: sibling_path(&leaves, challenge.index as usize)
                .iter()
                .map(hex::encode)
                .collect(),
            binding: hex::encode(hash_binding(&nonce, chunk)),
        };

        Ok(Proof(serde_json::to_value(proof)?))
    }

    fn verify(&self, state: &CycleState, challenge: &Challenge, proof: &Proof) -> bool {
        match Self::check(state, challenge, proof) {
            Ok(valid) => valid,
            Err(e) => {
                debug!("rejecting unreadable proof: {e}");
                false
            }
        }
    }
}
