//! Per-connection worker: the sniffer task and the session run loop.

pub mod session;
pub mod sniffer;

pub use session::{Phase, Session};
