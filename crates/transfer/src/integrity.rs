use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};
use storjdemo_protocol::ContentId;

use crate::TransferError;

fn finish(hasher: Sha256) -> ContentId {
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    ContentId::from_bytes(out)
}

/// Computes the SHA-256 identity of `data`.
pub fn digest_bytes(data: &[u8]) -> ContentId {
    let mut hasher = Sha256::new();
    hasher.update(data);
    finish(hasher)
}

/// Computes the SHA-256 identity of an entire file.
pub fn digest_file(path: &Path) -> Result<ContentId, TransferError> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(finish(hasher))
}

/// Returns `true` when `content` hashes to `expected`.
pub fn verify(expected: &ContentId, content: &[u8]) -> bool {
    digest_bytes(content) == *expected
}

/// Like [`verify`], reading the content from disk.
///
/// A read failure is returned as an error, never as a failed verification.
pub fn verify_file(expected: &ContentId, path: &Path) -> Result<bool, TransferError> {
    Ok(digest_file(path)? == *expected)
}
