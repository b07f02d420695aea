//! TCP wire format for file pushes.
//!
//! # Wire format
//!
//! ```text
//! PER FILE (sender -> receiver):
//!   [2 bytes BE: name_len]
//!   [name_len bytes: upper-hex content identity, ASCII]
//!   [8 bytes BE: file_size]
//!   [file_size bytes: raw file data]
//! ACK (receiver -> sender): [1 byte: 0x01=stored, 0x00=rejected]
//!
//! END MARKER: [2 bytes: 0x0000]
//! ```

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::DataChannelError;

/// Acknowledgment: file stored.
pub const ACK_STORED: u8 = 0x01;

/// Acknowledgment: file refused (unknown or malformed name).
pub const ACK_REJECTED: u8 = 0x00;

/// A file header in the TCP stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    /// Upper-hex content identity, doubling as the stored file name.
    pub name: String,
    /// Total file size in bytes.
    pub file_size: u64,
}

/// Writes a file header to the stream.
pub async fn write_file_header<W: AsyncWrite + Unpin>(
    writer: &mut W,
    header: &FileHeader,
) -> Result<(), DataChannelError> {
    let name_bytes = header.name.as_bytes();
    let name_len = name_bytes.len();
    if name_len == 0 || name_len > u16::MAX as usize {
        return Err(DataChannelError::Protocol(format!(
            "name length {name_len} out of range (1..={})",
            u16::MAX
        )));
    }

    writer.write_u16(name_len as u16).await?;
    writer.write_all(name_bytes).await?;
    writer.write_u64(header.file_size).await?;
    Ok(())
}

/// Reads a file header from the stream.
///
/// Returns `None` if the end marker (name_len == 0) is encountered.
pub async fn read_file_header<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Option<FileHeader>, DataChannelError> {
    let name_len = reader.read_u16().await?;
    if name_len == 0 {
        return Ok(None);
    }

    let mut name_buf = vec![0u8; name_len as usize];
    reader.read_exact(&mut name_buf).await?;
    let name = String::from_utf8(name_buf)
        .map_err(|e| DataChannelError::Protocol(format!("invalid UTF-8 name: {e}")))?;

    let file_size = reader.read_u64().await?;

    Ok(Some(FileHeader { name, file_size }))
}

/// Writes the end-of-transfer marker (name_len = 0).
pub async fn write_end_marker<W: AsyncWrite + Unpin>(
    writer: &mut W,
) -> Result<(), DataChannelError> {
    writer.write_u16(0).await?;
    Ok(())
}

/// Writes the per-file acknowledgment byte.
pub async fn write_ack<W: AsyncWrite + Unpin>(
    writer: &mut W,
    stored: bool,
) -> Result<(), DataChannelError> {
    writer
        .write_u8(if stored { ACK_STORED } else { ACK_REJECTED })
        .await?;
    writer.flush().await?;
    Ok(())
}

/// Reads the per-file acknowledgment byte.
pub async fn read_ack<R: AsyncRead + Unpin>(reader: &mut R) -> Result<bool, DataChannelError> {
    let byte = reader.read_u8().await?;
    Ok(byte == ACK_STORED)
}
