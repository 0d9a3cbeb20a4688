//! WebSocket channel to a room's sync endpoint.
//!
//! Provides:
//! - One connection per room visit, guarded against duplicate concurrent
//!   connects to the same room
//! - Fire-and-forget sends through a writer task
//! - Decoded inbound messages as a stream of [`ChannelEvent`]s
//! - A bounded initial connect window with no automatic retry
//!
//! ```text
//!            send(&SyncMessage)            ┌──────────────┐
//! Session ──────────────────► mpsc ──────► │ writer task  │ ──► WebSocket
//!    ▲                                     └──────────────┘
//!    │       ChannelEvent                  ┌──────────────┐
//!    └──────────────────────── mpsc ◄───── │ reader task  │ ◄── WebSocket
//!                                          └──────────────┘
//! ```

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use codecollab_core::RoomId;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::protocol::SyncMessage;

/// How long `close` waits for the close frame to be written.
const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Channel connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    /// The peer went away or the socket failed
    Disconnected,
    /// Closed locally
    Closed,
}

/// Events delivered by a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A decoded message from another participant
    Message(SyncMessage),
    /// The connection is gone; no further events follow
    Disconnected,
}

/// Transport errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("a connection to room {0} is already open or pending")]
    AlreadyConnected(RoomId),
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),
    #[error("connect failed: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),
}

type Registry = Arc<Mutex<HashSet<RoomId>>>;

fn lock(registry: &Registry) -> MutexGuard<'_, HashSet<RoomId>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Claim on a room in the connector registry, released on drop.
#[derive(Debug)]
struct RoomSlot {
    room: RoomId,
    registry: Registry,
}

impl RoomSlot {
    fn acquire(registry: &Registry, room: &RoomId) -> Option<Self> {
        if !lock(registry).insert(room.clone()) {
            return None;
        }
        Some(Self {
            room: room.clone(),
            registry: registry.clone(),
        })
    }
}

impl Drop for RoomSlot {
    fn drop(&mut self) {
        lock(&self.registry).remove(&self.room);
    }
}

/// A room claim shared by a channel and the task that watches its socket.
/// Whichever sees the connection end first releases it.
type SharedSlot = Arc<Mutex<Option<RoomSlot>>>;

fn release(slot: &SharedSlot) {
    let released = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
    drop(released);
}

// ───────────────────────────────────────────────────────────────────
// Connector
// ───────────────────────────────────────────────────────────────────

/// Opens room channels, allowing at most one live or pending connection
/// per room.
///
/// Clones share the same registry, so one connector should be shared by
/// everything that may mount a session for the same room.
#[derive(Debug, Clone, Default)]
pub struct SyncConnector {
    live: Registry,
}

impl SyncConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a connection to `room` is open or being established. A
    /// channel whose socket has gone away no longer counts.
    pub fn is_live(&self, room: &RoomId) -> bool {
        lock(&self.live).contains(room)
    }

    /// Connect to `url` for `room`.
    ///
    /// Fails fast with [`TransportError::AlreadyConnected`] if the room is
    /// already claimed. The attempt is abandoned after `connect_timeout`.
    /// Dropping the returned future cancels the attempt and frees the room.
    pub async fn connect(
        &self,
        room: &RoomId,
        url: &str,
        connect_timeout: Duration,
    ) -> Result<SyncChannel, TransportError> {
        let slot = RoomSlot::acquire(&self.live, room)
            .ok_or_else(|| TransportError::AlreadyConnected(room.clone()))?;

        log::debug!("Connecting to room {room} at {url}");
        let (ws_stream, _) = tokio::time::timeout(connect_timeout, tokio_tungstenite::connect_async(url))
            .await
            .map_err(|_| TransportError::Timeout(connect_timeout))??;

        log::info!("Connected to room {room}");
        Ok(SyncChannel::spawn(room.clone(), ws_stream, slot))
    }

    /// In-memory channel for `room`, with the far end handed back as a
    /// [`LoopbackPeer`]. Subject to the same one-per-room rule.
    pub fn loopback(&self, room: &RoomId) -> Result<(SyncChannel, LoopbackPeer), TransportError> {
        let slot = RoomSlot::acquire(&self.live, room)
            .ok_or_else(|| TransportError::AlreadyConnected(room.clone()))?;

        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let state = Arc::new(watch::Sender::new(ConnectionState::Connected));
        let slot = Arc::new(Mutex::new(Some(slot)));

        let channel = SyncChannel {
            room: room.clone(),
            state: state.clone(),
            outgoing_tx,
            event_rx: Some(event_rx),
            reader: None,
            writer: None,
            slot: slot.clone(),
        };
        let peer = LoopbackPeer {
            outgoing_rx,
            event_tx,
            state,
            slot,
            saw_close: false,
        };
        Ok((channel, peer))
    }
}

// ───────────────────────────────────────────────────────────────────
// Channel
// ───────────────────────────────────────────────────────────────────

/// An open room channel.
pub struct SyncChannel {
    room: RoomId,
    state: Arc<watch::Sender<ConnectionState>>,
    outgoing_tx: mpsc::UnboundedSender<Message>,
    event_rx: Option<mpsc::UnboundedReceiver<ChannelEvent>>,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
    slot: SharedSlot,
}

impl SyncChannel {
    fn spawn(room: RoomId, ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>, slot: RoomSlot) -> Self {
        let (mut ws_writer, mut ws_reader) = ws_stream.split();
        let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let state = Arc::new(watch::Sender::new(ConnectionState::Connected));
        let slot = Arc::new(Mutex::new(Some(slot)));

        // Writer task: forward outgoing frames to the socket
        let writer_room = room.clone();
        let writer = tokio::spawn(async move {
            while let Some(frame) = outgoing_rx.recv().await {
                let closing = matches!(frame, Message::Close(_));
                if let Err(e) = ws_writer.send(frame).await {
                    log::debug!("Room {writer_room} send failed: {e}");
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        // Reader task: decode inbound frames
        let reader_room = room.clone();
        let reader_state = state.clone();
        let reader_slot = slot.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = ws_reader.next().await {
                let decoded = match frame {
                    Ok(Message::Text(text)) => SyncMessage::decode(text.as_str()),
                    Ok(Message::Binary(data)) => SyncMessage::decode_bytes(&data),
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        log::warn!("Room {reader_room} receive error: {e}");
                        break;
                    }
                };
                match decoded {
                    Ok(msg) => {
                        if event_tx.send(ChannelEvent::Message(msg)).is_err() {
                            break;
                        }
                    }
                    Err(e) => log::warn!("Dropping malformed frame in room {reader_room}: {e}"),
                }
            }

            mark_disconnected(&reader_state, &reader_slot);
            log::info!("Room {reader_room} channel disconnected");
            let _ = event_tx.send(ChannelEvent::Disconnected);
        });

        Self {
            room,
            state,
            outgoing_tx,
            event_rx: Some(event_rx),
            reader: Some(reader),
            writer: Some(writer),
            slot,
        }
    }

    pub fn room(&self) -> &RoomId {
        &self.room
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Queue a message for sending without waiting for delivery.
    ///
    /// Returns `false` when the message was dropped because the channel is
    /// not open or the message could not be encoded.
    pub fn send(&self, msg: &SyncMessage) -> bool {
        if !self.is_open() {
            log::debug!("Room {} channel not open, dropping {} message", self.room, msg.kind());
            return false;
        }
        match msg.encode() {
            Ok(text) => self.outgoing_tx.send(Message::Text(text.into())).is_ok(),
            Err(e) => {
                log::warn!("Failed to encode {} message: {e}", msg.kind());
                false
            }
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::UnboundedReceiver<ChannelEvent>> {
        self.event_rx.take()
    }

    /// Next inbound event, or `None` once the stream has ended or the
    /// receiver was taken.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        match self.event_rx.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    /// Close the channel and free the room. Safe to call more than once.
    pub async fn close(&mut self) {
        if self.state() == ConnectionState::Closed {
            return;
        }
        self.state.send_replace(ConnectionState::Closed);
        let _ = self.outgoing_tx.send(Message::Close(None));

        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(writer) = self.writer.take() {
            let abort = writer.abort_handle();
            if tokio::time::timeout(CLOSE_GRACE, writer).await.is_err() {
                log::debug!("Room {} writer did not finish closing, aborting", self.room);
                abort.abort();
            }
        }

        release(&self.slot);
        log::info!("Closed channel for room {}", self.room);
    }
}

impl Drop for SyncChannel {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
        release(&self.slot);
    }
}

/// Record that the far end went away and free the room. A locally closed
/// channel stays `Closed`.
fn mark_disconnected(state: &watch::Sender<ConnectionState>, slot: &SharedSlot) {
    release(slot);
    state.send_if_modified(|current| {
        if *current == ConnectionState::Connected {
            *current = ConnectionState::Disconnected;
            true
        } else {
            false
        }
    });
}

// ───────────────────────────────────────────────────────────────────
// Loopback
// ───────────────────────────────────────────────────────────────────

/// Far end of an in-memory channel: sees what the client sent and can
/// deliver messages to it.
pub struct LoopbackPeer {
    outgoing_rx: mpsc::UnboundedReceiver<Message>,
    event_tx: mpsc::UnboundedSender<ChannelEvent>,
    state: Arc<watch::Sender<ConnectionState>>,
    slot: SharedSlot,
    saw_close: bool,
}

impl LoopbackPeer {
    /// Deliver a message to the client as if another participant sent it.
    pub fn deliver(&self, msg: SyncMessage) -> bool {
        self.event_tx.send(ChannelEvent::Message(msg)).is_ok()
    }

    /// Drain everything the client has sent so far.
    pub fn sent(&mut self) -> Vec<SyncMessage> {
        let mut messages = Vec::new();
        while let Ok(frame) = self.outgoing_rx.try_recv() {
            match frame {
                Message::Text(text) => match SyncMessage::decode(text.as_str()) {
                    Ok(msg) => messages.push(msg),
                    Err(e) => log::warn!("Loopback received undecodable frame: {e}"),
                },
                Message::Close(_) => self.saw_close = true,
                _ => {}
            }
        }
        messages
    }

    /// Whether the client sent a close frame (checked after [`sent`](Self::sent)).
    pub fn saw_close(&mut self) -> bool {
        self.sent();
        self.saw_close
    }

    /// Simulate the connection dropping.
    pub fn disconnect(&self) {
        mark_disconnected(&self.state, &self.slot);
        let _ = self.event_tx.send(ChannelEvent::Disconnected);
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }
}
