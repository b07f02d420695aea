//! Responder-side channel server.
//!
//! Listens on a TCP port, upgrades each connection to WebSocket, and
//! drives one responder per connection until the channel closes.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use storjdemo_protocol::{ChannelKind, Frame};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::accept_async_with_config;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ChannelError;
use crate::handler::Responder;
use crate::registry::ChannelRegistry;
use crate::ws_config;

/// The channel server.
///
/// Any number of channels may be open at once; each connection carries
/// exactly one channel.
pub struct ChannelServer {
    registry: Arc<ChannelRegistry>,
    local_addr: SocketAddr,
    listener: Mutex<Option<TcpListener>>,
    cancel: CancellationToken,
}

impl ChannelServer {
    /// Binds the listener. Call [`run`](Self::run) to start accepting.
    pub async fn bind(
        addr: SocketAddr,
        registry: Arc<ChannelRegistry>,
        cancel: CancellationToken,
    ) -> Result<Arc<Self>, ChannelError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("channel server listening on {local_addr}");

        Ok(Arc::new(Self {
            registry,
            local_addr,
            listener: Mutex::new(Some(listener)),
            cancel,
        }))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Gracefully shuts down the server and every open channel.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Runs the accept loop until cancellation.
    pub async fn run(self: Arc<Self>) -> Result<(), ChannelError> {
        let listener = self
            .listener
            .lock()
            .await
            .take()
            .ok_or_else(|| ChannelError::Step("channel server already running".into()))?;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("channel server shutting down");
                    break Ok(());
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let server = Arc::clone(&self);
                            tokio::spawn(async move {
                                if let Err(e) = server.handle_connection(stream, peer_addr).await {
                                    warn!(%peer_addr, "channel connection error: {e}");
                                }
                            });
                        }
                        Err(e) => warn!("accept error: {e}"),
                    }
                }
            }
        }
    }

    async fn handle_connection(
        &self,
        stream: TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<(), ChannelError> {
        let mut ws = accept_async_with_config(stream, Some(ws_config())).await?;
        debug!(%peer_addr, "channel connection established");

        let mut open: Option<(String, Box<dyn Responder>)> = None;

        loop {
            let frame = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                next = next_frame(&mut ws) => match next {
                    Ok(Some(frame)) => frame,
                    Ok(None) => {
                        debug!(%peer_addr, "initiator closed channel");
                        return Ok(());
                    }
                    Err(e) => {
                        warn!(%peer_addr, "unreadable frame: {e}");
                        let reply = Frame::error("", ChannelKind::Unknown, "", e.code(), e.to_string());
                        send_frame(&mut ws, &reply).await?;
                        break;
                    }
                },
            };

            if open.is_none() {
                match self.registry.open(frame.channel, &frame.session) {
                    Ok(responder) => {
                        info!(session = %frame.session, channel = %frame.channel, %peer_addr, "channel opened");
                        open = Some((frame.session.clone(), responder));
                    }
                    Err(e) => {
                        warn!(session = %frame.session, channel = %frame.channel, "channel rejected: {e}");
                        send_frame(&mut ws, &frame.reply_error(e.code(), e.to_string())).await?;
                        break;
                    }
                }
            }
            let Some((session, responder)) = open.as_mut() else {
                break;
            };

            if frame.session != *session {
                let e = ChannelError::ProtocolViolation(format!(
                    "frame for session {} on channel of session {session}",
                    frame.session
                ));
                warn!(%session, "{e}");
                send_frame(&mut ws, &frame.reply_error(e.code(), e.to_string())).await?;
                break;
            }

            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                result = responder.respond(&frame) => result,
            };

            match result {
                Ok(Some(reply)) => {
                    send_frame(&mut ws, &reply).await?;
                    if responder.is_closed() {
                        debug!(%session, channel = %frame.channel, "channel complete");
                        break;
                    }
                }
                Ok(None) => {
                    debug!(%session, step = %frame.step, "step produced no response, closing");
                    break;
                }
                Err(e) => {
                    warn!(%session, step = %frame.step, "step failed: {e}");
                    send_frame(&mut ws, &frame.reply_error(e.code(), e.to_string())).await?;
                    break;
                }
            }
        }

        let _ = ws.close(None).await;
        Ok(())
    }
}

/// Reads the next frame, skipping control messages. `None` means the peer
/// closed the connection.
pub(crate) async fn next_frame<S>(ws: &mut S) -> Result<Option<Frame>, ChannelError>
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    use tokio_tungstenite::tungstenite::Error as WsError;

    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return Ok(Some(serde_json::from_str(text.as_str())?)),
            Some(Ok(Message::Binary(_))) => {
                return Err(ChannelError::ProtocolViolation(
                    "binary frames are not part of the protocol".into(),
                ));
            }
            Some(Ok(Message::Close(_))) | None => return Ok(None),
            Some(Ok(_)) => continue,
            Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => return Ok(None),
            Some(Err(e)) => return Err(e.into()),
        }
    }
}

pub(crate) async fn send_frame<S>(ws: &mut S, frame: &Frame) -> Result<(), ChannelError>
where
    S: Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let json = serde_json::to_string(frame)?;
    ws.send(Message::Text(json.into())).await?;
    Ok(())
}
