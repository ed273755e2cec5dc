//! Per-connection session worker.
//!
//! One session owns two tasks: the sniffer (sole reader of the socket) and
//! the run loop below, which multiplexes inbound client messages with
//! server-initiated push commands. Handlers run to completion before the
//! next message is dequeued, and every socket write happens on this task,
//! so per-session state needs no locking and frames are never interleaved.
//!
//! A session is `Inactive` until a successful `hello` binds its UAID, then
//! `Active` for the rest of the connection. Termination (peer EOF, a decode
//! error, a dispatcher `die`, or a transport write failure) always funnels
//! through [`Session::teardown`], which emits exactly one `die` and closes
//! the socket exactly once.

use crate::metrics::{
    ERROR_REPLIES_TOTAL, FLUSH_DURATION_SECONDS, MESSAGES_TOTAL, NOTIFICATIONS_SENT_TOTAL,
    SESSIONS_CLOSED_TOTAL,
};
use crate::storage::Store;
use crate::worker::sniffer;
use nudge_core::transport::{FrameSink, FrameSource};
use nudge_core::{
    codec, validate, AckRequest, ClientMessage, DispatchCmd, Envelope, HelloRequest, PushError,
    PushResult, RegisterRequest, ServerCommand, UnregisterRequest,
};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Capacity of the inbound frame channel.
const INBOUND_CAPACITY: usize = 64;

/// Activity phase of a session. One-way: a successful `hello` is the only
/// transition, and the terminal state is simply the run loop returning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Inactive,
    Active,
}

/// State and collaborators of one connected client.
pub struct Session {
    sink: Box<dyn FrameSink>,
    uaid: String,
    phase: Phase,
    commands: mpsc::Receiver<ServerCommand>,
    /// Our own command sender, attached to `hello` so the dispatcher can
    /// route pushes back to this connection.
    command_tx: mpsc::Sender<ServerCommand>,
    dispatch: mpsc::Sender<DispatchCmd>,
    store: Arc<dyn Store>,
    /// Set when a handler decided the session must die.
    dying: bool,
    /// Teardown guards: one `die`, one close, ever.
    die_sent: bool,
    sink_closed: bool,
}

impl Session {
    pub fn new(
        sink: Box<dyn FrameSink>,
        commands: mpsc::Receiver<ServerCommand>,
        command_tx: mpsc::Sender<ServerCommand>,
        dispatch: mpsc::Sender<DispatchCmd>,
        store: Arc<dyn Store>,
    ) -> Self {
        Self {
            sink,
            uaid: String::new(),
            phase: Phase::Inactive,
            commands,
            command_tx,
            dispatch,
            store,
            dying: false,
            die_sent: false,
            sink_closed: false,
        }
    }

    /// Drive the session to completion: spawn the sniffer for `source`,
    /// multiplex it with server commands, then tear down.
    pub async fn run(mut self, source: Box<dyn FrameSource>) {
        let (inbound_tx, mut inbound) = mpsc::channel(INBOUND_CAPACITY);
        let reader = tokio::spawn(sniffer::run(source, inbound_tx));

        loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(ServerCommand::Flush) => {
                        debug!(uaid = %self.uaid, "server flush");
                        if self.flush(now_secs()).await.is_err() {
                            break;
                        }
                        if self.dying {
                            break;
                        }
                    }
                    Some(ServerCommand::Die) | None => {
                        debug!(uaid = %self.uaid, "dispatcher terminated session");
                        break;
                    }
                },
                frame = inbound.recv() => match frame {
                    Some(frame) => {
                        if !self.handle_frame(frame).await {
                            break;
                        }
                    }
                    // Sniffer exited: peer EOF, read error, or decode error.
                    None => break,
                },
            }
        }

        self.teardown().await;
        reader.abort();
    }

    /// Classify and dispatch one inbound frame. Returns false when the
    /// session must terminate.
    async fn handle_frame(&mut self, frame: Map<String, Value>) -> bool {
        let envelope = codec::classify(frame);
        let message_type = envelope.message_type.clone();
        metrics::counter!(MESSAGES_TOTAL, "kind" => envelope.body.kind()).increment(1);

        if let Err(err) = self.dispatch_message(envelope).await {
            if err.is_fatal() {
                error!(uaid = %self.uaid, error = %err, "socket write failed");
                return false;
            }
            info!(message_type = %message_type, error = %err, "sending error reply");
            metrics::counter!(ERROR_REPLIES_TOTAL).increment(1);
            if self.send(codec::error_reply(&message_type, &err)).await.is_err() {
                return false;
            }
        }
        !self.dying
    }

    async fn dispatch_message(&mut self, envelope: Envelope) -> PushResult<()> {
        match envelope.body {
            ClientMessage::Hello(req) => self.on_hello(&envelope.message_type, req).await,
            ClientMessage::Register(req) => self.on_register(&envelope.message_type, req).await,
            ClientMessage::Unregister(req) => {
                self.on_unregister(&envelope.message_type, req).await
            }
            ClientMessage::Ack(req) => self.on_ack(req).await,
            ClientMessage::Ping => self.on_ping(&envelope.message_type).await,
            ClientMessage::Unknown => {
                warn!(message_type = %envelope.message_type, "bad command");
                Err(PushError::UnknownCommand)
            }
        }
    }

    /// Associate the UAID for this connection and flush anything pending.
    async fn on_hello(&mut self, message_type: &str, req: HelloRequest) -> PushResult<()> {
        // channelIDs must be present, even if empty.
        let channel_ids = req.channel_ids.ok_or(PushError::MissingData)?;
        let presented = match req.uaid {
            None => String::new(),
            Some(Value::String(s)) => s,
            Some(_) => return Err(PushError::InvalidData),
        };
        if !self.uaid.is_empty() && !presented.is_empty() && self.uaid != presented {
            // A connection keeps its first identity.
            return Err(PushError::InvalidCommand);
        }
        if self.uaid.is_empty() {
            validate::check_uaid(&presented)?;
            self.uaid = if presented.is_empty() {
                Uuid::new_v4().to_string()
            } else {
                presented
            };
        }

        // Announce the UAID to the shared server. Blocks until the
        // dispatcher answers; no other inbound frame is processed until
        // then.
        let (reply_tx, reply_rx) = oneshot::channel();
        self.dispatch
            .send(DispatchCmd::Hello {
                uaid: self.uaid.clone(),
                channel_ids,
                commands: self.command_tx.clone(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| PushError::Transport("dispatcher gone".to_owned()))?;
        let verdict = reply_rx
            .await
            .map_err(|_| PushError::Transport("dispatcher gone".to_owned()))?;

        self.store.set_uaid_host(&self.uaid).await?;

        debug!(uaid = %self.uaid, status = verdict.status, "hello response");
        self.send(json!({
            "messageType": message_type,
            "status": verdict.status,
            "uaid": self.uaid,
        }))
        .await?;
        self.phase = Phase::Active;
        // Drain anything stored while the device was offline.
        self.flush(0).await
    }

    /// Register a new ChannelID and return the minted endpoint.
    async fn on_register(&mut self, message_type: &str, req: RegisterRequest) -> PushResult<()> {
        if self.phase != Phase::Active {
            return Err(PushError::InvalidCommand);
        }
        let channel_id = match req.channel_id {
            None => return Err(PushError::MissingData),
            Some(Value::String(s)) => s,
            Some(_) => return Err(PushError::InvalidData),
        };
        validate::check_channel_id(&channel_id)?;

        if let Err(err) = self
            .store
            .register_app_id(&self.uaid, &channel_id, 0)
            .await
        {
            error!(uaid = %self.uaid, channel_id = %channel_id, error = %err, "channel registration failed");
            return Err(err);
        }

        // The server mints the callback URL.
        let (reply_tx, reply_rx) = oneshot::channel();
        self.dispatch
            .send(DispatchCmd::Register {
                uaid: self.uaid.clone(),
                channel_id: channel_id.clone(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| PushError::Transport("dispatcher gone".to_owned()))?;
        let verdict = reply_rx
            .await
            .map_err(|_| PushError::Transport("dispatcher gone".to_owned()))?;
        let endpoint = verdict.push_endpoint.ok_or(PushError::InvalidData)?;

        debug!(uaid = %self.uaid, channel_id = %channel_id, endpoint = %endpoint, "sending response");
        self.send(json!({
            "messageType": message_type,
            "uaid": self.uaid,
            "status": 200,
            "channelID": channel_id,
            "pushEndpoint": endpoint,
        }))
        .await
    }

    /// Drop a ChannelID. Deletion is best-effort; the client sees success
    /// either way.
    async fn on_unregister(
        &mut self,
        message_type: &str,
        req: UnregisterRequest,
    ) -> PushResult<()> {
        if self.phase != Phase::Active {
            warn!("unregister refused before hello");
            return Err(PushError::InvalidCommand);
        }
        let channel_id = match req.channel_id {
            None => {
                warn!(uaid = %self.uaid, "unregister with no channelID");
                return Err(PushError::MissingData);
            }
            Some(Value::String(s)) => s,
            Some(_) => return Err(PushError::InvalidData),
        };

        if let Err(err) = self.store.delete_app_id(&self.uaid, &channel_id, false).await {
            debug!(uaid = %self.uaid, channel_id = %channel_id, error = %err, "unregister delete failed");
        }
        self.send(json!({
            "messageType": message_type,
            "status": 200,
            "channelID": channel_id,
        }))
        .await
    }

    /// Clear acknowledged updates, then re-flush anything newer.
    async fn on_ack(&mut self, req: AckRequest) -> PushResult<()> {
        if self.phase != Phase::Active {
            return Err(PushError::InvalidCommand);
        }
        let updates = req.updates.ok_or(PushError::MissingData)?;
        if let Err(err) = self.store.ack(&self.uaid, &updates).await {
            debug!(uaid = %self.uaid, error = %err, "ack failed");
            return Err(err);
        }
        self.flush(0).await
    }

    async fn on_ping(&mut self, message_type: &str) -> PushResult<()> {
        self.send(json!({
            "messageType": message_type,
            "status": 200,
        }))
        .await
    }

    /// Deliver pending notifications. `last_accessed` of 0 means everything.
    ///
    /// Storage failures are reported on the socket as a `notification` error
    /// and do not end the session; only a write failure propagates.
    async fn flush(&mut self, last_accessed: i64) -> PushResult<()> {
        let started = Instant::now();
        let result = self.flush_inner(last_accessed).await;
        let elapsed = started.elapsed();
        metrics::histogram!(FLUSH_DURATION_SECONDS).record(elapsed.as_secs_f64());
        debug!(
            uaid = %self.uaid,
            duration_us = elapsed.as_micros() as u64,
            "client flush completed"
        );
        result
    }

    async fn flush_inner(&mut self, last_accessed: i64) -> PushResult<()> {
        if self.uaid.is_empty() {
            error!("flush with no UAID, tearing session down");
            self.send_die().await;
            self.dying = true;
            // The lookup below still runs against the empty UAID.
        }
        let updates = match self.store.get_updates(&self.uaid, last_accessed).await {
            Ok(updates) => updates,
            Err(err) => {
                return self.send(codec::error_reply("notification", &err)).await;
            }
        };
        let Some(updates) = updates else {
            return Ok(());
        };
        debug!(uaid = %self.uaid, "flushing stored updates");
        metrics::counter!(NOTIFICATIONS_SENT_TOTAL).increment(1);
        self.send(codec::notification(updates)).await
    }

    async fn send(&mut self, reply: Value) -> PushResult<()> {
        let payload = codec::encode(&reply)?;
        self.sink.send_frame(payload).await
    }

    /// Exactly one `die` and one socket close, regardless of which exit
    /// path ran.
    async fn teardown(&mut self) {
        self.send_die().await;
        if !self.sink_closed {
            self.sink_closed = true;
            if let Err(err) = self.sink.close().await {
                debug!(error = %err, "socket close failed");
            }
        }
        metrics::counter!(SESSIONS_CLOSED_TOTAL).increment(1);
        info!(uaid = %self.uaid, "session ended");
    }

    async fn send_die(&mut self) {
        if self.die_sent {
            return;
        }
        self.die_sent = true;
        let _ = self
            .dispatch
            .send(DispatchCmd::Die {
                uaid: self.uaid.clone(),
            })
            .await;
    }
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
