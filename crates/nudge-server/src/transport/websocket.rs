//! WebSocket listener using tokio-tungstenite.
//!
//! Each accepted connection splits into the frame halves the session worker
//! consumes: a [`FrameSource`] for the sniffer task and a [`FrameSink`] for
//! the run loop.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use nudge_core::{FrameSink, FrameSource, PushError, PushResult};
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

/// Maximum frame size for WebSocket messages (1 MiB).
const MAX_WS_FRAME_SIZE: usize = 1_048_576;

/// A handle to an accepted WebSocket connection.
pub struct WebSocketConnection {
    pub ws_stream: WebSocketStream<TcpStream>,
    pub remote_addr: SocketAddr,
}

/// Start the WebSocket listener.
///
/// Accepted connections come back through the returned channel; what
/// happens to each of them is the caller's business.
pub async fn start_listener(
    bind_addr: SocketAddr,
) -> PushResult<mpsc::Receiver<WebSocketConnection>> {
    let listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| PushError::Transport(format!("cannot bind {bind_addr}: {e}")))?;
    info!(addr = %bind_addr, "listening for clients");

    let (accepted_tx, accepted_rx) = mpsc::channel(64);
    tokio::spawn(accept_loop(listener, accepted_tx));
    Ok(accepted_rx)
}

/// Accept TCP connections forever, upgrading each on its own task so a
/// slow handshake never stalls the accept path.
async fn accept_loop(listener: TcpListener, accepted: mpsc::Sender<WebSocketConnection>) {
    loop {
        let (stream, remote_addr) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                error!(error = %e, "accept failed");
                continue;
            }
        };
        tokio::spawn(upgrade(stream, remote_addr, accepted.clone()));
    }
}

/// Run the WebSocket handshake for one freshly accepted TCP connection.
async fn upgrade(
    stream: TcpStream,
    remote_addr: SocketAddr,
    accepted: mpsc::Sender<WebSocketConnection>,
) {
    let ws_stream = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(remote = %remote_addr, error = %e, "handshake failed, dropping connection");
            return;
        }
    };
    debug!(remote = %remote_addr, "client upgraded");

    let conn = WebSocketConnection {
        ws_stream,
        remote_addr,
    };
    if accepted.send(conn).await.is_err() {
        debug!(remote = %remote_addr, "server no longer accepting, dropping connection");
    }
}

/// Split an accepted connection into the session's frame halves.
pub fn split(conn: WebSocketConnection) -> (WsFrameSource, WsFrameSink) {
    let (sink, stream) = conn.ws_stream.split();
    (WsFrameSource { stream }, WsFrameSink { sink })
}

/// Read half: yields frame payloads, answering nothing.
pub struct WsFrameSource {
    stream: SplitStream<WebSocketStream<TcpStream>>,
}

impl FrameSource for WsFrameSource {
    /// Receive the next text or binary payload. Control frames are skipped;
    /// `Ok(None)` means the peer closed. Frames over 1 MiB are rejected.
    fn recv_frame(
        &mut self,
    ) -> Pin<Box<dyn Future<Output = PushResult<Option<Vec<u8>>>> + Send + '_>> {
        Box::pin(async move {
            loop {
                match self.stream.next().await {
                    Some(Ok(Message::Text(text))) => {
                        let data = text.as_bytes();
                        if data.len() > MAX_WS_FRAME_SIZE {
                            return Err(PushError::Transport(format!(
                                "WS frame too large: {} bytes (max {MAX_WS_FRAME_SIZE})",
                                data.len()
                            )));
                        }
                        return Ok(Some(data.to_vec()));
                    }
                    Some(Ok(Message::Binary(data))) => {
                        if data.len() > MAX_WS_FRAME_SIZE {
                            return Err(PushError::Transport(format!(
                                "WS frame too large: {} bytes (max {MAX_WS_FRAME_SIZE})",
                                data.len()
                            )));
                        }
                        return Ok(Some(data.to_vec()));
                    }
                    Some(Ok(Message::Close(_))) => return Ok(None),
                    Some(Ok(_)) => {
                        // Ping/pong and other control frames.
                        continue;
                    }
                    Some(Err(e)) => {
                        return Err(PushError::Transport(format!("WS recv failed: {e}")));
                    }
                    None => return Ok(None),
                }
            }
        })
    }
}

/// Write half, owned by the session run loop.
pub struct WsFrameSink {
    sink: SplitSink<WebSocketStream<TcpStream>, Message>,
}

impl FrameSink for WsFrameSink {
    fn send_frame(
        &mut self,
        payload: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = PushResult<()>> + Send + '_>> {
        Box::pin(async move {
            let text = String::from_utf8(payload)
                .map_err(|e| PushError::Transport(format!("non-UTF8 frame: {e}")))?;
            self.sink
                .send(Message::Text(text.into()))
                .await
                .map_err(|e| PushError::Transport(format!("WS send failed: {e}")))
        })
    }

    fn close(&mut self) -> Pin<Box<dyn Future<Output = PushResult<()>> + Send + '_>> {
        Box::pin(async move {
            self.sink
                .close()
                .await
                .map_err(|e| PushError::Transport(format!("WS close failed: {e}")))
        })
    }
}
