//! TCP transport client (uploader side).
//!
//! Pushes files named by their content identity and waits for the
//! receiver's per-file acknowledgment.

use std::path::{Path, PathBuf};

use storjdemo_protocol::ContentId;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::DataChannelError;
use crate::wire::{FileHeader, read_ack, write_end_marker, write_file_header};
use crate::{TCP_ACK_TIMEOUT, TCP_BUFFER_SIZE, TCP_CONNECT_TIMEOUT};

/// TCP transport client.
pub struct TransportClient;

impl TransportClient {
    /// Pushes one file under the name `id`.
    pub async fn send_file(
        addr: &str,
        path: &Path,
        id: ContentId,
        cancel: &CancellationToken,
    ) -> Result<u64, DataChannelError> {
        Self::send_files(addr, &[(path.to_path_buf(), id)], cancel).await
    }

    /// Pushes every `(local_path, identity)` pair over a single connection.
    ///
    /// Each file must be acknowledged before the next one starts. Returns the
    /// total bytes sent.
    pub async fn send_files(
        addr: &str,
        files: &[(PathBuf, ContentId)],
        cancel: &CancellationToken,
    ) -> Result<u64, DataChannelError> {
        let stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(DataChannelError::Cancelled);
            }
            result = tokio::time::timeout(TCP_CONNECT_TIMEOUT, TcpStream::connect(addr)) => {
                match result {
                    Ok(Ok(s)) => {
                        info!(%addr, "transport connected");
                        s
                    }
                    Ok(Err(e)) => return Err(e.into()),
                    Err(_) => return Err(DataChannelError::Timeout),
                }
            }
        };

        let (mut reader, writer) = stream.into_split();
        let mut writer = BufWriter::with_capacity(TCP_BUFFER_SIZE, writer);

        let mut total_bytes: u64 = 0;
        let mut buf = vec![0u8; TCP_BUFFER_SIZE];

        for (local_path, id) in files {
            if cancel.is_cancelled() {
                return Err(DataChannelError::Cancelled);
            }

            let file_size = tokio::fs::metadata(local_path).await?.len();
            let header = FileHeader {
                name: id.to_hex(),
                file_size,
            };
            write_file_header(&mut writer, &header).await?;

            let mut file = tokio::fs::File::open(local_path).await?;
            let mut remaining = file_size;

            while remaining > 0 {
                if cancel.is_cancelled() {
                    return Err(DataChannelError::Cancelled);
                }

                let to_read = (remaining as usize).min(buf.len());
                let n = file.read(&mut buf[..to_read]).await?;
                if n == 0 {
                    return Err(DataChannelError::Protocol(
                        "unexpected EOF reading local file".into(),
                    ));
                }

                writer.write_all(&buf[..n]).await?;
                remaining -= n as u64;
            }
            writer.flush().await?;

            let stored = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(DataChannelError::Cancelled);
                }
                result = tokio::time::timeout(TCP_ACK_TIMEOUT, read_ack(&mut reader)) => {
                    match result {
                        Ok(r) => r?,
                        Err(_) => return Err(DataChannelError::Timeout),
                    }
                }
            };

            if !stored {
                return Err(DataChannelError::Rejected(id.to_hex()));
            }

            total_bytes += file_size;
            debug!(%id, size = file_size, "transport: file acknowledged");
        }

        write_end_marker(&mut writer).await?;
        writer.flush().await?;

        info!(total_bytes, files = files.len(), "transport: all files sent");
        Ok(total_bytes)
    }
}
