//! Per-session socket reader.
//!
//! Reading the socket is a blocking operation, and push events must be able
//! to go out while a read is parked, so reads live on their own task. The
//! sniffer is the sole reader of the connection and never writes; it
//! signals EOF by dropping its end of the inbound channel, and the run loop
//! owns teardown.

use nudge_core::codec;
use nudge_core::transport::FrameSource;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, error};

/// Drain the socket into the inbound channel until EOF, a read error, or an
/// unparsable frame.
pub async fn run(mut source: Box<dyn FrameSource>, inbound: mpsc::Sender<Map<String, Value>>) {
    loop {
        let raw = match source.recv_frame().await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!("socket closed by peer");
                break;
            }
            Err(e) => {
                error!(error = %e, "socket read failed");
                break;
            }
        };
        // Zero-length payloads carry nothing worth forwarding.
        if raw.is_empty() {
            continue;
        }
        debug!(len = raw.len(), "socket receive");
        let frame = match codec::parse_frame(&raw) {
            Ok(frame) => frame,
            Err(_) => {
                error!(raw = %String::from_utf8_lossy(&raw), "unparsable frame");
                break;
            }
        };
        if inbound.send(frame).await.is_err() {
            // Run loop is gone; nothing left to read for.
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nudge_core::PushResult;
    use std::future::Future;
    use std::pin::Pin;

    /// Frame source scripted from a list of payloads.
    struct ScriptedSource {
        frames: Vec<PushResult<Option<Vec<u8>>>>,
    }

    impl ScriptedSource {
        fn new(mut frames: Vec<PushResult<Option<Vec<u8>>>>) -> Self {
            frames.reverse();
            Self { frames }
        }
    }

    impl FrameSource for ScriptedSource {
        fn recv_frame(
            &mut self,
        ) -> Pin<Box<dyn Future<Output = PushResult<Option<Vec<u8>>>> + Send + '_>> {
            let next = self.frames.pop().unwrap_or(Ok(None));
            Box::pin(async move { next })
        }
    }

    #[tokio::test]
    async fn forwards_parsed_frames_until_eof() {
        let source = ScriptedSource::new(vec![
            Ok(Some(br#"{"messageType": "ping"}"#.to_vec())),
            Ok(Some(b"{}".to_vec())),
            Ok(None),
        ]);
        let (tx, mut rx) = mpsc::channel(8);
        run(Box::new(source), tx).await;

        let first = rx.recv().await.unwrap();
        assert_eq!(first.get("messageType").unwrap(), "ping");
        let second = rx.recv().await.unwrap();
        assert!(second.is_empty());
        // Channel closed after the sniffer returned.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn skips_zero_length_payloads() {
        let source = ScriptedSource::new(vec![
            Ok(Some(Vec::new())),
            Ok(Some(b"{}".to_vec())),
            Ok(None),
        ]);
        let (tx, mut rx) = mpsc::channel(8);
        run(Box::new(source), tx).await;

        assert!(rx.recv().await.unwrap().is_empty());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn unparsable_frame_ends_the_reader() {
        let source = ScriptedSource::new(vec![
            Ok(Some(b"not json".to_vec())),
            Ok(Some(b"{}".to_vec())),
        ]);
        let (tx, mut rx) = mpsc::channel(8);
        run(Box::new(source), tx).await;

        // The frame after the garbage is never read.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn read_error_ends_the_reader() {
        let source = ScriptedSource::new(vec![Err(nudge_core::PushError::Transport(
            "connection reset".into(),
        ))]);
        let (tx, mut rx) = mpsc::channel(8);
        run(Box::new(source), tx).await;
        assert!(rx.recv().await.is_none());
    }
}
