//! Notification storage.
//!
//! [`Store`] is the narrow interface the session worker drives; everything
//! it holds is scoped by UAID and safe for concurrent use, since one store
//! is shared by every session on the node. [`MemStore`] is the in-process
//! implementation backing a single node.

use nudge_core::{PushError, PushResult};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use tokio::sync::RwLock;
use tracing::debug;

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = PushResult<T>> + Send + 'a>>;

/// Operations the session worker invokes on the notification store.
pub trait Store: Send + Sync {
    /// Record the UAID -> host binding for this node.
    fn set_uaid_host<'a>(&'a self, uaid: &'a str) -> StoreFuture<'a, ()>;

    /// Pending updates newer than `since` (unix seconds; 0 means since
    /// forever). `None` when there is nothing to deliver.
    fn get_updates<'a>(&'a self, uaid: &'a str, since: i64) -> StoreFuture<'a, Option<Value>>;

    /// Drop the channel versions the client acknowledged.
    fn ack<'a>(&'a self, uaid: &'a str, updates: &'a Value) -> StoreFuture<'a, ()>;

    /// Register a channel under the UAID at the given version.
    fn register_app_id<'a>(
        &'a self,
        uaid: &'a str,
        channel_id: &'a str,
        version: i64,
    ) -> StoreFuture<'a, ()>;

    /// Delete one channel, or every channel of the UAID when `clear_all`
    /// is set.
    fn delete_app_id<'a>(
        &'a self,
        uaid: &'a str,
        channel_id: &'a str,
        clear_all: bool,
    ) -> StoreFuture<'a, ()>;
}

/// State of one registered channel.
#[derive(Debug, Clone, Copy)]
struct ChannelState {
    version: i64,
    /// Set when the current version has not been acknowledged yet.
    pending: bool,
}

/// Everything stored for one UAID.
#[derive(Debug, Default)]
struct UaidRecord {
    host: Option<String>,
    channels: HashMap<String, ChannelState>,
}

/// In-memory store for a single node.
pub struct MemStore {
    host: String,
    records: RwLock<HashMap<String, UaidRecord>>,
}

impl MemStore {
    pub fn new(host: String) -> Self {
        Self {
            host,
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Record an incoming update for a channel and mark it pending. This is
    /// the write half a delivery front end performs before asking the
    /// server to flush the device.
    pub async fn put_update(&self, uaid: &str, channel_id: &str, version: i64) {
        let mut records = self.records.write().await;
        let record = records.entry(uaid.to_owned()).or_default();
        record.channels.insert(
            channel_id.to_owned(),
            ChannelState {
                version,
                pending: true,
            },
        );
    }

    /// The host currently bound to a UAID, if any.
    pub async fn uaid_host(&self, uaid: &str) -> Option<String> {
        let records = self.records.read().await;
        records.get(uaid).and_then(|r| r.host.clone())
    }

    /// Channels registered under a UAID.
    pub async fn channels(&self, uaid: &str) -> Vec<String> {
        let records = self.records.read().await;
        records
            .get(uaid)
            .map(|r| r.channels.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl Store for MemStore {
    fn set_uaid_host<'a>(&'a self, uaid: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut records = self.records.write().await;
            records.entry(uaid.to_owned()).or_default().host = Some(self.host.clone());
            Ok(())
        })
    }

    // Acked versions are dropped on the spot, so the pending set is always
    // newer than any client cursor; `since` needs no second filter here.
    fn get_updates<'a>(&'a self, uaid: &'a str, _since: i64) -> StoreFuture<'a, Option<Value>> {
        Box::pin(async move {
            let records = self.records.read().await;
            let Some(record) = records.get(uaid) else {
                return Ok(None);
            };
            let mut updates: Vec<Value> = record
                .channels
                .iter()
                .filter(|(_, state)| state.pending)
                .map(|(channel_id, state)| {
                    json!({"channelID": channel_id, "version": state.version})
                })
                .collect();
            if updates.is_empty() {
                return Ok(None);
            }
            // Stable delivery order.
            updates.sort_by(|a, b| a["channelID"].as_str().cmp(&b["channelID"].as_str()));
            Ok(Some(json!({ "updates": updates })))
        })
    }

    fn ack<'a>(&'a self, uaid: &'a str, updates: &'a Value) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let entries = updates
                .as_array()
                .ok_or_else(|| PushError::Storage("ack payload is not a list".to_owned()))?;
            let mut records = self.records.write().await;
            let Some(record) = records.get_mut(uaid) else {
                return Ok(());
            };
            for entry in entries {
                let Some(channel_id) = entry.get("channelID").and_then(Value::as_str) else {
                    continue;
                };
                if let Some(state) = record.channels.get_mut(channel_id) {
                    // Only the delivered version is cleared; a newer update
                    // racing in stays pending for the next flush.
                    let acked = entry.get("version").and_then(Value::as_i64);
                    if acked.is_none() || acked == Some(state.version) {
                        state.pending = false;
                    }
                }
            }
            Ok(())
        })
    }

    fn register_app_id<'a>(
        &'a self,
        uaid: &'a str,
        channel_id: &'a str,
        version: i64,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut records = self.records.write().await;
            let record = records.entry(uaid.to_owned()).or_default();
            record.channels.insert(
                channel_id.to_owned(),
                ChannelState {
                    version,
                    pending: version > 0,
                },
            );
            debug!(uaid, channel_id, version, "channel registered");
            Ok(())
        })
    }

    fn delete_app_id<'a>(
        &'a self,
        uaid: &'a str,
        channel_id: &'a str,
        clear_all: bool,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut records = self.records.write().await;
            let Some(record) = records.get_mut(uaid) else {
                return Err(PushError::Storage(format!("unknown uaid: {uaid}")));
            };
            if clear_all {
                record.channels.clear();
                return Ok(());
            }
            if record.channels.remove(channel_id).is_none() {
                return Err(PushError::Storage(format!("unknown channel: {channel_id}")));
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn now_secs() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }

    fn store() -> MemStore {
        MemStore::new("push-1.example.org".to_owned())
    }

    #[tokio::test]
    async fn set_uaid_host_binds_this_node() {
        let store = store();
        store.set_uaid_host("u1").await.unwrap();
        assert_eq!(store.uaid_host("u1").await.as_deref(), Some("push-1.example.org"));
    }

    #[tokio::test]
    async fn fresh_registration_has_nothing_pending() {
        let store = store();
        store.register_app_id("u1", "c1", 0).await.unwrap();
        assert!(store.get_updates("u1", 0).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_update_shows_up_in_get_updates() {
        let store = store();
        store.register_app_id("u1", "c1", 0).await.unwrap();
        store.put_update("u1", "c1", 7).await;

        let updates = store.get_updates("u1", 0).await.unwrap().unwrap();
        assert_eq!(updates["updates"][0]["channelID"], "c1");
        assert_eq!(updates["updates"][0]["version"], 7);
    }

    #[tokio::test]
    async fn pending_updates_survive_the_since_cursor() {
        let store = store();
        store.put_update("u1", "c1", 7).await;
        // A server-pushed flush passes "now"; anything unacknowledged must
        // still be delivered.
        let updates = store.get_updates("u1", now_secs()).await.unwrap().unwrap();
        assert_eq!(updates["updates"][0]["version"], 7);
    }

    #[tokio::test]
    async fn ack_clears_the_delivered_version() {
        let store = store();
        store.put_update("u1", "c1", 7).await;
        store
            .ack("u1", &json!([{"channelID": "c1", "version": 7}]))
            .await
            .unwrap();
        assert!(store.get_updates("u1", 0).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ack_of_stale_version_keeps_newer_pending() {
        let store = store();
        store.put_update("u1", "c1", 8).await;
        store
            .ack("u1", &json!([{"channelID": "c1", "version": 7}]))
            .await
            .unwrap();
        let updates = store.get_updates("u1", 0).await.unwrap().unwrap();
        assert_eq!(updates["updates"][0]["version"], 8);
    }

    #[tokio::test]
    async fn ack_rejects_non_list_payload() {
        let store = store();
        assert!(store.ack("u1", &json!({"channelID": "c1"})).await.is_err());
    }

    #[tokio::test]
    async fn delete_unknown_channel_errors() {
        let store = store();
        store.register_app_id("u1", "c1", 0).await.unwrap();
        assert!(store.delete_app_id("u1", "nope", false).await.is_err());
        assert!(store.delete_app_id("u1", "c1", false).await.is_ok());
    }

    #[tokio::test]
    async fn clear_all_empties_the_uaid() {
        let store = store();
        store.register_app_id("u1", "c1", 0).await.unwrap();
        store.register_app_id("u1", "c2", 0).await.unwrap();
        store.delete_app_id("u1", "", true).await.unwrap();
        assert!(store.channels("u1").await.is_empty());
    }

    #[tokio::test]
    async fn reregistration_after_delete_succeeds() {
        let store = store();
        store.register_app_id("u1", "c1", 0).await.unwrap();
        store.delete_app_id("u1", "c1", false).await.unwrap();
        store.register_app_id("u1", "c1", 0).await.unwrap();
        assert_eq!(store.channels("u1").await, vec!["c1".to_owned()]);
    }
}
