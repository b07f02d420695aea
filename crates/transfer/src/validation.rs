use std::path::{Path, PathBuf};

use storjdemo_protocol::ContentId;

use crate::TransferError;

/// Where a file with the given identity lives inside `dir`.
pub fn content_path(dir: &Path, id: &ContentId) -> PathBuf {
    dir.join(id.to_hex())
}

/// Parses a file name received from a peer into a content identity.
///
/// Only bare 64-character hex names are accepted, so a name can never
/// carry a separator, a drive prefix, or a parent reference.
pub fn parse_content_name(name: &str) -> Result<ContentId, TransferError> {
    if name.is_empty() {
        return Err(TransferError::InvalidName("empty name".into()));
    }
    if !name.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(TransferError::InvalidName(format!(
            "not a hex identity: {name}"
        )));
    }
    ContentId::from_hex(name).map_err(|e| TransferError::InvalidName(e.to_string()))
}
