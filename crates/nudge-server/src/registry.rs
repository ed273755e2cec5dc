//! Connected-client registry.
//!
//! Maps each announced UAID to the command channel of the session that owns
//! it, so the dispatcher can push flush and die commands into live
//! connections.

use nudge_core::ServerCommand;
use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

/// A connected session available for server-initiated pushes.
#[derive(Debug, Clone)]
pub struct ClientEntry {
    pub uaid: String,
    pub commands: mpsc::Sender<ServerCommand>,
    pub connected_at: Instant,
}

/// Registry of sessions currently connected to this node, keyed by UAID.
#[derive(Default)]
pub struct ClientRegistry {
    clients: RwLock<HashMap<String, ClientEntry>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session for a UAID. A reconnecting device replaces the
    /// previous entry; the displaced session ends on its own when its
    /// socket drops.
    pub async fn register(&self, uaid: String, commands: mpsc::Sender<ServerCommand>) {
        let entry = ClientEntry {
            uaid: uaid.clone(),
            commands,
            connected_at: Instant::now(),
        };
        let mut clients = self.clients.write().await;
        if clients.insert(uaid.clone(), entry).is_some() {
            debug!(uaid = %uaid, "client re-registered, previous entry replaced");
        } else {
            info!(uaid = %uaid, "client registered");
        }
    }

    /// Remove a UAID's registration.
    pub async fn unregister(&self, uaid: &str) {
        let mut clients = self.clients.write().await;
        if clients.remove(uaid).is_some() {
            debug!(uaid = %uaid, "client unregistered");
        }
    }

    /// Look up the session owning a UAID.
    pub async fn resolve(&self, uaid: &str) -> Option<ClientEntry> {
        let clients = self.clients.read().await;
        clients.get(uaid).cloned()
    }

    /// Push a command to the session owning `uaid`. Returns false when the
    /// UAID is not connected to this node or the session's queue is full.
    pub async fn push(&self, uaid: &str, cmd: ServerCommand) -> bool {
        let clients = self.clients.read().await;
        match clients.get(uaid) {
            Some(entry) => entry.commands.try_send(cmd).is_ok(),
            None => false,
        }
    }

    /// Number of connected clients.
    pub async fn count(&self) -> usize {
        self.clients.read().await.len()
    }
}
