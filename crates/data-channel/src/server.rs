//! TCP transport server (farmer side).
//!
//! Binds a port, accepts any number of sender connections, and stores each
//! registered file under its content name. Every stored file is reported to
//! all callbacks registered for its identity.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use storjdemo_protocol::ContentId;
use storjdemo_transfer::{content_path, parse_content_name};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::TCP_BUFFER_SIZE;
use crate::error::DataChannelError;
use crate::wire::{read_file_header, write_ack};

/// Invoked once per stored file with the identity it was stored under.
pub type ArrivalCallback = Arc<dyn Fn(ContentId) + Send + Sync>;

/// Handle for one registration; only its owner can remove it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Registration(u64);

/// TCP transport server for receiving pushed files.
///
/// Several registrations may expect the same identity at once; a stored
/// file is reported to each of them, and removing one leaves the others in
/// place. Transfer failures are not reported to callbacks since the server
/// cannot tell which registration a sender belongs to; the sender sees the
/// failure on its own connection.
pub struct TransportServer {
    download_dir: PathBuf,
    local_addr: SocketAddr,
    listener: tokio::sync::Mutex<Option<TcpListener>>,
    registrations: RwLock<HashMap<ContentId, Vec<(Registration, ArrivalCallback)>>>,
    next_id: AtomicU64,
    cancel: CancellationToken,
}

impl TransportServer {
    /// Binds the listener. Call [`run`](Self::run) to start accepting.
    pub async fn bind(
        addr: SocketAddr,
        download_dir: PathBuf,
        cancel: CancellationToken,
    ) -> Result<Arc<Self>, DataChannelError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, dir = %download_dir.display(), "transport listener bound");

        Ok(Arc::new(Self {
            download_dir,
            local_addr,
            listener: tokio::sync::Mutex::new(Some(listener)),
            registrations: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            cancel,
        }))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Accepts the file named `id` and reports each arrival to `callback`
    /// until the returned registration is removed.
    pub fn register(&self, id: ContentId, callback: ArrivalCallback) -> Registration {
        let registration = Registration(self.next_id.fetch_add(1, Ordering::Relaxed));
        if let Ok(mut regs) = self.registrations.write() {
            regs.entry(id).or_default().push((registration, callback));
        }
        debug!(%id, registration = registration.0, "identity registered");
        registration
    }

    /// Removes one registration of `id`. Other registrations of the same
    /// identity stay active. Returns `false` if it was not registered.
    pub fn unregister(&self, id: &ContentId, registration: Registration) -> bool {
        let removed = self
            .registrations
            .write()
            .map(|mut regs| {
                let Some(entries) = regs.get_mut(id) else {
                    return false;
                };
                let before = entries.len();
                entries.retain(|(r, _)| *r != registration);
                let removed = entries.len() != before;
                if entries.is_empty() {
                    regs.remove(id);
                }
                removed
            })
            .unwrap_or(false);
        debug!(%id, registration = registration.0, removed, "identity unregistered");
        removed
    }

    /// `true` while at least one registration expects `id`.
    pub fn is_registered(&self, id: &ContentId) -> bool {
        self.registrations
            .read()
            .map(|regs| regs.contains_key(id))
            .unwrap_or(false)
    }

    fn callbacks_for(&self, id: &ContentId) -> Vec<ArrivalCallback> {
        self.registrations
            .read()
            .ok()
            .and_then(|regs| {
                regs.get(id)
                    .map(|entries| entries.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            })
            .unwrap_or_default()
    }

    /// Runs the accept loop until cancellation.
    pub async fn run(self: Arc<Self>) -> Result<(), DataChannelError> {
        let listener = self
            .listener
            .lock()
            .await
            .take()
            .ok_or_else(|| DataChannelError::Protocol("transport server already running".into()))?;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("transport server shutting down");
                    break Ok(());
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let server = Arc::clone(&self);
                            tokio::spawn(async move {
                                match server.receive(stream).await {
                                    Ok(total_bytes) => {
                                        debug!(%peer_addr, total_bytes, "sender finished");
                                    }
                                    Err(e) => warn!(%peer_addr, "transport connection error: {e}"),
                                }
                            });
                        }
                        Err(e) => warn!("transport accept error: {e}"),
                    }
                }
            }
        }
    }

    /// Receives files from one sender until its end marker.
    ///
    /// Returns the total bytes stored.
    async fn receive(&self, stream: TcpStream) -> Result<u64, DataChannelError> {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::with_capacity(TCP_BUFFER_SIZE, reader);
        let mut total_bytes: u64 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Err(DataChannelError::Cancelled);
            }

            let header = match read_file_header(&mut reader).await? {
                Some(h) => h,
                None => {
                    debug!("transport: end marker received");
                    break;
                }
            };

            let accepted = parse_content_name(&header.name)
                .ok()
                .map(|id| (id, self.callbacks_for(&id)))
                .filter(|(_, callbacks)| !callbacks.is_empty());

            let Some((id, callbacks)) = accepted else {
                warn!(name = %header.name, "refusing unregistered file");
                discard(&mut reader, header.file_size).await?;
                write_ack(&mut writer, false).await?;
                continue;
            };

            self.store(&mut reader, &id, header.file_size).await?;
            total_bytes += header.file_size;
            write_ack(&mut writer, true).await?;
            info!(%id, size = header.file_size, "file received");
            notify(callbacks, id);
        }

        Ok(total_bytes)
    }

    /// Streams `size` bytes into `<download_dir>/<HEX>`.
    ///
    /// Data lands in a `.part` file unique to this transfer first, so a
    /// reader never sees a half-written file under the final name and two
    /// concurrent pushes of one identity never share a file.
    async fn store<R: AsyncRead + Unpin>(
        &self,
        reader: &mut R,
        id: &ContentId,
        size: u64,
    ) -> Result<(), DataChannelError> {
        tokio::fs::create_dir_all(&self.download_dir).await?;
        let final_path = content_path(&self.download_dir, id);
        let part = self.next_id.fetch_add(1, Ordering::Relaxed);
        let part_path = self
            .download_dir
            .join(format!("{}.{part}.part", id.to_hex()));

        let result = self.write_part(reader, &part_path, size).await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(&part_path).await;
        }
        result?;
        tokio::fs::rename(&part_path, &final_path).await?;
        Ok(())
    }

    async fn write_part<R: AsyncRead + Unpin>(
        &self,
        reader: &mut R,
        part_path: &Path,
        size: u64,
    ) -> Result<(), DataChannelError> {
        let mut file = tokio::fs::File::create(part_path).await?;
        let mut remaining = size;
        let mut buf = vec![0u8; TCP_BUFFER_SIZE.min(size.max(1) as usize)];

        while remaining > 0 {
            if self.cancel.is_cancelled() {
                return Err(DataChannelError::Cancelled);
            }

            let to_read = (remaining as usize).min(buf.len());
            let n = reader.read(&mut buf[..to_read]).await?;
            if n == 0 {
                return Err(DataChannelError::Protocol(
                    "unexpected EOF during file data".into(),
                ));
            }

            file.write_all(&buf[..n]).await?;
            remaining -= n as u64;
        }

        file.flush().await?;
        file.sync_all().await?;
        Ok(())
    }
}

/// Hands the arrival to its callbacks off the I/O task; callbacks may hash
/// the whole file.
fn notify(callbacks: Vec<ArrivalCallback>, id: ContentId) {
    tokio::task::spawn_blocking(move || {
        for callback in callbacks {
            callback(id);
        }
    });
}

async fn discard<R: AsyncRead + Unpin>(reader: &mut R, size: u64) -> Result<(), DataChannelError> {
    let copied = tokio::io::copy(&mut reader.take(size), &mut tokio::io::sink()).await?;
    if copied != size {
        return Err(DataChannelError::Protocol(
            "unexpected EOF while discarding file data".into(),
        ));
    }
    Ok(())
}
