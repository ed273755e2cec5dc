//! Core server: accepts connections, runs the shared dispatcher, and owns
//! the per-node client registry.
//!
//! The dispatcher is the single back-end every session talks to over its
//! command channel: it tracks which UAID is connected where, mints push
//! endpoints on `register`, and forgets sessions on `die`. Notifications
//! from a delivery front end enter through [`PushServer::notify`], which
//! pushes a flush command into the owning session.

use crate::config::ServerConfig;
use crate::locator::Locator;
use crate::metrics::{SESSIONS_ACTIVE, SESSIONS_OPENED_TOTAL};
use crate::registry::ClientRegistry;
use crate::storage::{MemStore, Store};
use crate::transport::websocket::{self, WebSocketConnection};
use crate::worker::Session;
use nudge_core::{DispatchCmd, DispatchReply, PushError, PushResult, ServerCommand};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Capacity of the shared dispatcher queue.
const DISPATCH_CAPACITY: usize = 256;
/// Capacity of each session's server-command queue.
const COMMAND_CAPACITY: usize = 16;

/// The push server instance.
pub struct PushServer {
    config: ServerConfig,
    registry: Arc<ClientRegistry>,
    store: Arc<MemStore>,
    locator: Arc<dyn Locator>,
}

impl PushServer {
    pub fn new(config: ServerConfig, locator: Arc<dyn Locator>) -> Self {
        let store = Arc::new(MemStore::new(config.host.clone()));
        Self {
            config,
            registry: Arc::new(ClientRegistry::new()),
            store,
            locator,
        }
    }

    /// Accept connections and spawn a session worker per client. Runs until
    /// the listener dies.
    pub async fn run(&self) -> PushResult<()> {
        let addr: SocketAddr = format!("0.0.0.0:{}", self.config.port)
            .parse()
            .map_err(|e| PushError::Other(format!("invalid address: {e}")))?;

        let (dispatch_tx, dispatch_rx) = mpsc::channel(DISPATCH_CAPACITY);
        let dispatcher = Dispatcher::new(self.registry.clone(), self.config.endpoint_url());
        tokio::spawn(dispatcher.run(dispatch_rx));

        let mut connections = websocket::start_listener(addr).await?;

        info!(
            port = self.config.port,
            host = %self.config.host,
            "nudge-server ready"
        );

        while let Some(conn) = connections.recv().await {
            let store: Arc<dyn Store> = self.store.clone();
            let dispatch = dispatch_tx.clone();
            tokio::spawn(handle_connection(conn, store, dispatch));
        }

        warn!("listener closed, shutting down");
        Ok(())
    }

    /// Ask the session owning `uaid` to flush. Returns false when the UAID
    /// is not connected to this node; routing to peers is the caller's
    /// problem, via the locator.
    pub async fn notify(&self, uaid: &str) -> bool {
        if self.registry.push(uaid, ServerCommand::Flush).await {
            return true;
        }
        debug!(uaid, "uaid not connected locally");
        false
    }

    /// The store backing this node.
    pub fn store(&self) -> &Arc<MemStore> {
        &self.store
    }

    /// The connected-client registry.
    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    /// The peer locator for cross-node fan-out.
    pub fn locator(&self) -> &Arc<dyn Locator> {
        &self.locator
    }
}

/// Run one accepted connection to completion.
async fn handle_connection(
    conn: WebSocketConnection,
    store: Arc<dyn Store>,
    dispatch: mpsc::Sender<DispatchCmd>,
) {
    let remote = conn.remote_addr;
    debug!(remote = %remote, "handling connection");
    metrics::counter!(SESSIONS_OPENED_TOTAL).increment(1);
    metrics::gauge!(SESSIONS_ACTIVE).increment(1.0);

    let (source, sink) = websocket::split(conn);
    let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
    let session = Session::new(Box::new(sink), command_rx, command_tx, dispatch, store);
    session.run(Box::new(source)).await;

    metrics::gauge!(SESSIONS_ACTIVE).decrement(1.0);
    debug!(remote = %remote, "connection finished");
}

/// The shared server side of every session's dispatch channel.
pub struct Dispatcher {
    registry: Arc<ClientRegistry>,
    endpoint_base: String,
}

impl Dispatcher {
    pub fn new(registry: Arc<ClientRegistry>, endpoint_base: String) -> Self {
        Self {
            registry,
            endpoint_base,
        }
    }

    /// Serve dispatch requests until every session sender is gone.
    pub async fn run(self, mut requests: mpsc::Receiver<DispatchCmd>) {
        while let Some(cmd) = requests.recv().await {
            self.handle(cmd).await;
        }
        debug!("dispatcher drained");
    }

    async fn handle(&self, cmd: DispatchCmd) {
        match cmd {
            DispatchCmd::Hello {
                uaid,
                channel_ids,
                commands,
                reply,
            } => {
                let channels = channel_ids.as_array().map(|a| a.len()).unwrap_or(0);
                self.registry.register(uaid.clone(), commands).await;
                debug!(uaid = %uaid, channels, "client announced");
                let _ = reply.send(DispatchReply {
                    status: 200,
                    push_endpoint: None,
                });
            }
            DispatchCmd::Register {
                uaid,
                channel_id,
                reply,
            } => {
                let endpoint = self.mint_endpoint(&uaid, &channel_id);
                debug!(uaid = %uaid, channel_id = %channel_id, endpoint = %endpoint, "endpoint minted");
                let _ = reply.send(DispatchReply {
                    status: 200,
                    push_endpoint: Some(endpoint),
                });
            }
            DispatchCmd::Die { uaid } => {
                if uaid.is_empty() {
                    return;
                }
                self.registry.unregister(&uaid).await;
            }
        }
    }

    /// `<base>/update/<token>`, where the token encodes `uaid.chid`.
    fn mint_endpoint(&self, uaid: &str, channel_id: &str) -> String {
        let token = hex::encode(format!("{uaid}.{channel_id}"));
        format!("{}/update/{token}", self.endpoint_base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nudge_core::ServerCommand;
    use serde_json::json;
    use tokio::sync::oneshot;

    fn dispatcher() -> (Arc<ClientRegistry>, mpsc::Sender<DispatchCmd>) {
        let registry = Arc::new(ClientRegistry::new());
        let (tx, rx) = mpsc::channel(16);
        let dispatcher = Dispatcher::new(registry.clone(), "https://push.example.org".to_owned());
        tokio::spawn(dispatcher.run(rx));
        (registry, tx)
    }

    #[tokio::test]
    async fn hello_registers_the_session() {
        let (registry, dispatch) = dispatcher();
        let (command_tx, mut command_rx) = mpsc::channel(4);
        let (reply_tx, reply_rx) = oneshot::channel();

        dispatch
            .send(DispatchCmd::Hello {
                uaid: "u1".to_owned(),
                channel_ids: json!(["c1"]),
                commands: command_tx,
                reply: reply_tx,
            })
            .await
            .unwrap();
        let reply = reply_rx.await.unwrap();
        assert_eq!(reply.status, 200);
        assert!(reply.push_endpoint.is_none());

        // A push for the announced UAID reaches the session.
        assert!(registry.push("u1", ServerCommand::Flush).await);
        assert!(matches!(command_rx.recv().await, Some(ServerCommand::Flush)));
    }

    #[tokio::test]
    async fn register_mints_a_routable_endpoint() {
        let (_registry, dispatch) = dispatcher();
        let (reply_tx, reply_rx) = oneshot::channel();

        dispatch
            .send(DispatchCmd::Register {
                uaid: "u1".to_owned(),
                channel_id: "c1".to_owned(),
                reply: reply_tx,
            })
            .await
            .unwrap();
        let reply = reply_rx.await.unwrap();
        assert_eq!(reply.status, 200);

        let endpoint = reply.push_endpoint.unwrap();
        let token = endpoint
            .strip_prefix("https://push.example.org/update/")
            .expect("endpoint under the configured base");
        assert_eq!(hex::decode(token).unwrap(), b"u1.c1");
    }

    #[tokio::test]
    async fn die_unregisters_the_uaid() {
        let (registry, dispatch) = dispatcher();
        let (command_tx, _command_rx) = mpsc::channel(4);
        let (reply_tx, reply_rx) = oneshot::channel();
        dispatch
            .send(DispatchCmd::Hello {
                uaid: "u1".to_owned(),
                channel_ids: json!([]),
                commands: command_tx,
                reply: reply_tx,
            })
            .await
            .unwrap();
        reply_rx.await.unwrap();
        assert_eq!(registry.count().await, 1);

        dispatch
            .send(DispatchCmd::Die {
                uaid: "u1".to_owned(),
            })
            .await
            .unwrap();
        // The die has no reply; settle with a follow-up request.
        let (reply_tx, reply_rx) = oneshot::channel();
        dispatch
            .send(DispatchCmd::Register {
                uaid: "u1".to_owned(),
                channel_id: "c1".to_owned(),
                reply: reply_tx,
            })
            .await
            .unwrap();
        reply_rx.await.unwrap();
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn die_with_empty_uaid_is_ignored() {
        let (registry, dispatch) = dispatcher();
        dispatch
            .send(DispatchCmd::Die {
                uaid: String::new(),
            })
            .await
            .unwrap();
        assert_eq!(registry.count().await, 0);
    }
}
