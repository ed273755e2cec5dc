//! Abstract frame transport for push sessions.
//!
//! The session worker never touches a socket directly. The read half is a
//! [`FrameSource`] drained by the sniffer task; the write half is a
//! [`FrameSink`] owned by the session run loop, which keeps all writes on
//! one task so frames are never interleaved.

use crate::error::PushResult;
use std::future::Future;
use std::pin::Pin;

/// The read half of a message-framed connection.
pub trait FrameSource: Send {
    /// Receive the next frame payload. `Ok(None)` means the peer closed.
    fn recv_frame(
        &mut self,
    ) -> Pin<Box<dyn Future<Output = PushResult<Option<Vec<u8>>>> + Send + '_>>;
}

/// The write half of a message-framed connection.
pub trait FrameSink: Send {
    /// Write one frame.
    fn send_frame(
        &mut self,
        payload: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = PushResult<()>> + Send + '_>>;

    /// Close the connection. The session guarantees this is called exactly
    /// once per connection.
    fn close(&mut self) -> Pin<Box<dyn Future<Output = PushResult<()>> + Send + '_>>;
}
