//! Protocol message types.
//!
//! Inbound frames decode into an [`Envelope`]: the `messageType` string as
//! the client sent it (replies echo it verbatim) plus a [`ClientMessage`]
//! classified from its lower-cased form. Field extraction stays lazy: the
//! request structs carry raw JSON values and each handler checks presence
//! and type itself, so a malformed field surfaces as `missing-data` or
//! `invalid-data` for that one operation and never as a crash.

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

/// A decoded inbound frame.
#[derive(Debug)]
pub struct Envelope {
    /// `messageType` exactly as received; empty when the frame had none.
    pub message_type: String,
    pub body: ClientMessage,
}

/// Tagged union over the recognized client operations.
#[derive(Debug)]
pub enum ClientMessage {
    Hello(HelloRequest),
    Register(RegisterRequest),
    Unregister(UnregisterRequest),
    Ack(AckRequest),
    Ping,
    /// Missing, non-string, or unrecognized `messageType`.
    Unknown,
}

impl ClientMessage {
    /// Stable lower-case name for logging and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Hello(_) => "hello",
            ClientMessage::Register(_) => "register",
            ClientMessage::Unregister(_) => "unregister",
            ClientMessage::Ack(_) => "ack",
            ClientMessage::Ping => "ping",
            ClientMessage::Unknown => "unknown",
        }
    }
}

/// `hello`: associate the connection with a user-agent identity.
#[derive(Debug)]
pub struct HelloRequest {
    /// Absent and blank are equivalent: the server mints a fresh UAID.
    pub uaid: Option<Value>,
    /// Required by the protocol, though the list may be empty. Forwarded to
    /// the dispatcher verbatim.
    pub channel_ids: Option<Value>,
}

/// `register`: subscribe a channel under the session's UAID.
#[derive(Debug)]
pub struct RegisterRequest {
    pub channel_id: Option<Value>,
}

/// `unregister`: drop a channel subscription.
#[derive(Debug)]
pub struct UnregisterRequest {
    pub channel_id: Option<Value>,
}

/// `ack`: the client confirms receipt of delivered updates.
#[derive(Debug)]
pub struct AckRequest {
    pub updates: Option<Value>,
}

/// Server-initiated commands pushed into a session by the dispatcher.
#[derive(Debug)]
pub enum ServerCommand {
    /// Deliver pending notifications now.
    Flush,
    /// Tear the session down.
    Die,
}

/// Requests a session sends to the shared dispatcher.
///
/// Every request that expects an answer carries its own reply channel, so
/// concurrent dispatches from different sessions can never cross.
#[derive(Debug)]
pub enum DispatchCmd {
    /// Announce a UAID and hand over the session's command sender so the
    /// dispatcher can route pushes back to this connection.
    Hello {
        uaid: String,
        channel_ids: Value,
        commands: mpsc::Sender<ServerCommand>,
        reply: oneshot::Sender<DispatchReply>,
    },
    /// Ask the server to mint a push endpoint for a channel.
    Register {
        uaid: String,
        channel_id: String,
        reply: oneshot::Sender<DispatchReply>,
    },
    /// The session is gone; drop its registration.
    Die { uaid: String },
}

/// Dispatcher verdict: a status code and, for `register`, the minted
/// endpoint URL.
#[derive(Debug)]
pub struct DispatchReply {
    pub status: u32,
    pub push_endpoint: Option<String>,
}
