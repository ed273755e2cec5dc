//! nudge-server: SimplePush-style push notification server.
//!
//! Maintains long-lived WebSocket sessions, associates each with a stable
//! user-agent identity (UAID), lets clients register opaque channel IDs,
//! and flushes pending notifications to connected devices as they arrive
//! or on demand.

pub mod config;
pub mod locator;
pub mod metrics;
pub mod registry;
pub mod server;
pub mod storage;
pub mod transport;
pub mod worker;
