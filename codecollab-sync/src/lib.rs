//! # codecollab-sync: real-time room synchronization client
//!
//! Keeps one client's view of a room in step with everyone else's over a
//! WebSocket, without echoing remote edits back onto the wire.
//!
//! ## Architecture
//!
//! ```text
//!                      ┌──────────────────────────────┐
//!   host commands ───► │           Session            │ ◄─── Outcome (HTTP results)
//!                      │  RoomStore   EchoGuard       │
//!                      │  CursorPresence              │
//!                      │  CompletionBridge            │
//!                      └──────┬───────────────┬───────┘
//!                             │               │
//!                  EditorSurface          SyncChannel ◄──► relay (/ws/rooms/{id})
//!                  (TextBuffer)
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: JSON wire messages (`code`, `cursor`)
//! - [`transport`]: WebSocket channel with a one-connection-per-room guard
//! - [`echo`]: origin tags and the remote-apply suppression scope
//! - [`surface`]: the editing surface trait and a headless buffer
//! - [`presence`]: remote cursor markers
//! - [`completion`]: inline suggestion requests
//! - [`api`]: HTTP storage, runner and suggestion clients
//! - [`config`]: session configuration
//! - [`session`]: the controller tying it all together
//!
//! Conflict handling is last-writer-wins: every `code` message replaces the
//! whole file, so two participants typing in the same file within one round
//! trip will lose one side's edit.

pub mod api;
pub mod completion;
pub mod config;
pub mod echo;
pub mod presence;
pub mod protocol;
pub mod session;
pub mod surface;
pub mod transport;

// Re-exports for convenience
pub use api::{ApiError, Backend, HttpBackend, RunnerApi, StorageApi};
pub use completion::{CompletionBridge, CompletionRequest, Suggestion, SuggestionOracle};
pub use config::SessionConfig;
pub use echo::{EchoGuard, Origin};
pub use presence::{CursorMarker, CursorPresence, PresenceCapacity, REMOTE_CURSOR_CLASS};
pub use protocol::{ProtocolError, SyncMessage};
pub use session::{Notice, Session, SessionCommand, SessionError};
pub use surface::{
    Decoration, DecorationId, EditorSurface, InlineCompletion, Range, SubscriptionId,
    SubscriptionKind, SurfaceEvent, TextBuffer,
};
pub use transport::{
    ChannelEvent, ConnectionState, LoopbackPeer, SyncChannel, SyncConnector, TransportError,
};
