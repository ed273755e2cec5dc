//! nudge-core: Shared protocol library for the nudge push server.
//!
//! Provides the JSON message envelope and codec, identifier rules, the
//! error taxonomy, the dispatcher command types, and abstract frame
//! transport traits.

pub mod codec;
pub mod error;
pub mod messages;
pub mod transport;
pub mod validate;

// Re-export commonly used items at crate root.
pub use codec::{classify, encode, error_reply, notification, parse_frame};
pub use error::{PushError, PushResult};
pub use messages::{
    AckRequest, ClientMessage, DispatchCmd, DispatchReply, Envelope, HelloRequest,
    RegisterRequest, ServerCommand, UnregisterRequest,
};
pub use transport::{FrameSink, FrameSource};
pub use validate::{check_channel_id, check_uaid, CHID_MAX_LEN, UAID_MAX_LEN};
