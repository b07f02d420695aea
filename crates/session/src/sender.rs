//! How the uploader pushes files to the farmer's transport.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use storjdemo_data_channel::TransportClient;
use storjdemo_protocol::ContentId;
use tokio_util::sync::CancellationToken;

use crate::error::SessionError;

pub type SendFuture<'a> = Pin<Box<dyn Future<Output = Result<(), SessionError>> + Send + 'a>>;

/// Pushes content-addressed files to a transport endpoint.
pub trait FileSender: Send + Sync + 'static {
    /// Sends every `(path, identity)` pair to `endpoint` (`host:port`), in
    /// order.
    fn send<'a>(
        &'a self,
        endpoint: &'a str,
        files: &'a [(PathBuf, ContentId)],
        cancel: &'a CancellationToken,
    ) -> SendFuture<'a>;
}

/// Sends over the TCP transport.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpFileSender;

impl FileSender for TcpFileSender {
    fn send<'a>(
        &'a self,
        endpoint: &'a str,
        files: &'a [(PathBuf, ContentId)],
        cancel: &'a CancellationToken,
    ) -> SendFuture<'a> {
        Box::pin(async move {
            TransportClient::send_files(endpoint, files, cancel).await?;
            Ok(())
        })
    }
}
