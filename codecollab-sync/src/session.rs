//! Session controller: one client's visit to a room.
//!
//! ## Event flow
//!
//! ```text
//!   host command ──► EditorSurface ──► take_events() ──► pump_surface
//!                                                            │
//!                          RoomStore::update_file_content ◄──┤
//!                                                            │ origin == Local
//!                                                            ▼ and guard down
//!                                                    SyncChannel::send
//!
//!   ChannelEvent ──► handle_sync_message
//!                      ├─ code   ─► RoomStore + EchoGuard::apply_remote(set_value)
//!                      └─ cursor ─► CursorPresence::render   (active file only)
//!
//!   spawned HTTP call ──► Outcome ──► handle_outcome   (dropped when stale)
//! ```
//!
//! Everything runs on the task that drives [`Session::run`]. Network calls
//! are spawned and report back through an internal channel, so a handler
//! never blocks the loop and never holds session state across an await.

use codecollab_core::{File, FileId, Position, RoomId, RoomStore, StoreError};
use tokio::sync::mpsc;

use crate::api::{ApiError, Backend};
use crate::completion::{CompletionBridge, Suggestion};
use crate::config::SessionConfig;
use crate::echo::EchoGuard;
use crate::presence::CursorPresence;
use crate::protocol::SyncMessage;
use crate::surface::{EditorSurface, SubscriptionId, SubscriptionKind, SurfaceEvent};
use crate::transport::{ChannelEvent, ConnectionState, SyncChannel, SyncConnector};

/// Terminal text before anything has run.
pub const TERMINAL_READY: &str = "Terminal ready...";
/// Terminal text while a run is in flight.
pub const RUNNING: &str = "Running...";
/// Terminal text when the runner could not be reached.
pub const RUNNER_ERROR: &str = "Error connecting to runner.";

const MOUNT_SUBSCRIPTIONS: [SubscriptionKind; 3] = [
    SubscriptionKind::ContentChanged,
    SubscriptionKind::CursorMoved,
    SubscriptionKind::InlineCompletions,
];

/// Session errors. None of these are fatal; the host decides whether to
/// show them.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("no file is active")]
    NoActiveFile,
    #[error("file name must not be blank")]
    BlankFilename,
    #[error("session is closed")]
    Closed,
}

/// Requests from the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// Type text at the caret
    Insert(String),
    /// Delete characters before the caret
    Backspace(usize),
    /// Replace the whole buffer as a local edit
    SetContent(String),
    MoveCursor(Position),
    /// Commit the ghost text on offer
    AcceptSuggestion,
    SwitchFile(FileId),
    NewFile(String),
    Save,
    Run,
    /// Ask the suggestion service for ghost text at the caret
    Complete,
    Close,
}

/// Things the host may want to show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Terminal output replaced
    Output(String),
    Saved(FileId),
    SaveFailed(FileId),
    FileCreated(FileId),
    ActiveFileChanged(FileId),
    /// Sync connection lost; editing continues locally
    Disconnected,
}

/// Result of a spawned collaborator call.
#[derive(Debug)]
enum Outcome {
    FileCreated(Result<File, ApiError>),
    Saved { id: FileId, result: Result<(), ApiError> },
    RunFinished(Result<String, ApiError>),
    Suggestion {
        file: FileId,
        revision: u64,
        suggestion: Option<Suggestion>,
    },
}

/// A client session in one room, driving one editing surface.
pub struct Session<S: EditorSurface> {
    config: SessionConfig,
    room: RoomId,
    store: RoomStore,
    guard: EchoGuard,
    presence: CursorPresence,
    completion: CompletionBridge,
    backend: Backend,
    channel: Option<SyncChannel>,
    surface: S,
    subscriptions: Vec<SubscriptionId>,
    output: String,
    /// Bumped on every buffer or caret change; stale suggestions are
    /// detected against it
    revision: u64,
    closed: bool,
    outcome_tx: mpsc::UnboundedSender<Outcome>,
    outcome_rx: mpsc::UnboundedReceiver<Outcome>,
    notices: Option<mpsc::UnboundedSender<Notice>>,
}

impl<S: EditorSurface> Session<S> {
    /// An empty, unconnected session.
    pub fn new(config: SessionConfig, backend: Backend, room: RoomId, surface: S) -> Self {
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        Self {
            presence: CursorPresence::new(config.sender_id.clone(), config.presence_capacity),
            completion: CompletionBridge::new(backend.oracle.clone(), config.language.clone()),
            config,
            room,
            store: RoomStore::new(),
            guard: EchoGuard::new(),
            backend,
            channel: None,
            surface,
            subscriptions: Vec::new(),
            output: TERMINAL_READY.to_string(),
            revision: 0,
            closed: false,
            outcome_tx,
            outcome_rx,
            notices: None,
        }
    }

    /// Fetch the room's files, show the first one and open the sync channel.
    ///
    /// A failed fetch leaves the room empty and a failed connect leaves the
    /// session local-only. Both are logged.
    pub async fn start(
        config: SessionConfig,
        backend: Backend,
        connector: &SyncConnector,
        room: RoomId,
        surface: S,
    ) -> Self {
        let mut session = Self::new(config, backend, room, surface);
        match session.backend.storage.list_files(&session.room).await {
            Ok(files) => session.load_files(files),
            Err(e) => log::warn!("Failed to load files for room {}: {e}", session.room),
        }
        session.connect(connector).await;
        session
    }

    /// Seed the store, activate the first file and mount it.
    pub fn load_files(&mut self, files: Vec<File>) {
        self.store.load(files);
        if self.store.active_id().is_none() {
            if let Some(first) = self.store.files().first().map(|f| f.id) {
                if let Err(e) = self.store.set_active(first) {
                    log::warn!("Could not activate first file: {e}");
                }
            }
        }
        self.mount_active();
    }

    /// Open the room channel. Returns `false` if the session stays local-only.
    pub async fn connect(&mut self, connector: &SyncConnector) -> bool {
        let url = self.config.room_ws_url(&self.room);
        match connector.connect(&self.room, &url, self.config.connect_timeout).await {
            Ok(channel) => {
                self.attach_channel(channel);
                true
            }
            Err(e) => {
                log::warn!("Could not connect to room {}: {e}; editing locally", self.room);
                false
            }
        }
    }

    pub fn attach_channel(&mut self, channel: SyncChannel) {
        self.channel = Some(channel);
    }

    /// Receive host notices. Replaces any earlier receiver.
    pub fn subscribe_notices(&mut self) -> mpsc::UnboundedReceiver<Notice> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.notices = Some(tx);
        rx
    }

    // ───────────────────────────────────────────────────────────────
    // Inbound
    // ───────────────────────────────────────────────────────────────

    pub fn handle_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Message(msg) => self.handle_sync_message(msg),
            ChannelEvent::Disconnected => {
                log::warn!("Lost connection to room {}; continuing locally", self.room);
                self.notify(Notice::Disconnected);
            }
        }
    }

    /// Route one inbound message.
    ///
    /// Code for the active file replaces the buffer. Code for another file
    /// only updates the store. Cursors are rendered for the active file only.
    pub fn handle_sync_message(&mut self, msg: SyncMessage) {
        if self.closed {
            return;
        }
        match msg {
            SyncMessage::Code { file_id, data } => self.apply_remote_code(file_id, data),
            SyncMessage::Cursor {
                file_id,
                position,
                sender_id,
            } => {
                if self.store.active_id() != Some(file_id) {
                    log::debug!("Dropping cursor from {sender_id} for inactive file {file_id}");
                    return;
                }
                self.presence.render(&mut self.surface, position, &sender_id);
            }
        }
    }

    fn apply_remote_code(&mut self, file_id: FileId, data: String) {
        if self.store.active_id() == Some(file_id) {
            // Pending local events belong to the buffer about to be replaced.
            self.pump_surface();
        }
        if !self.store.update_file_content(file_id, data.as_str()) {
            log::debug!("Dropping code message for unknown file {file_id}");
            return;
        }
        if self.store.active_id() != Some(file_id) || self.surface.value() == data {
            return;
        }

        let caret = self.surface.position();
        let surface = &mut self.surface;
        self.guard.apply_remote(|origin| {
            surface.set_value(&data, origin);
            surface.set_position(caret, origin);
        });
        self.revision += 1;
        self.pump_surface();
    }

    // ───────────────────────────────────────────────────────────────
    // Outbound
    // ───────────────────────────────────────────────────────────────

    /// Drain surface events into the store and onto the wire.
    ///
    /// Only locally originated changes are sent. Returns the number of
    /// messages sent.
    pub fn pump_surface(&mut self) -> usize {
        let events = self.surface.take_events();
        let mut sent = 0;
        for event in events {
            self.revision += 1;
            let Some(active) = self.store.active_id() else {
                continue;
            };
            match event {
                SurfaceEvent::ContentChanged { value, origin } => {
                    self.store.update_file_content(active, value.as_str());
                    if self.guard.should_broadcast(origin) && self.send(&SyncMessage::code(active, value)) {
                        sent += 1;
                    }
                }
                SurfaceEvent::CursorMoved { position, origin } => {
                    let msg = SyncMessage::cursor(active, position, self.config.sender_id.as_str());
                    if self.guard.should_broadcast(origin) && self.send(&msg) {
                        sent += 1;
                    }
                }
            }
        }
        sent
    }

    fn send(&self, msg: &SyncMessage) -> bool {
        match &self.channel {
            Some(channel) => channel.send(msg),
            None => false,
        }
    }

    // ───────────────────────────────────────────────────────────────
    // Files
    // ───────────────────────────────────────────────────────────────

    /// Copy the live buffer into the store for the active file.
    pub fn flush_active(&mut self) {
        self.pump_surface();
        if let Some(id) = self.store.active_id() {
            self.store.update_file_content(id, self.surface.value());
        }
    }

    /// Flush the current file, then show `id`.
    pub fn switch_file(&mut self, id: FileId) -> Result<(), SessionError> {
        self.ensure_open()?;
        if self.store.get(id).is_none() {
            return Err(StoreError::UnknownFile(id).into());
        }
        if self.store.active_id() == Some(id) {
            return Ok(());
        }
        self.flush_active();
        self.store.set_active(id)?;
        self.mount_active();
        self.notify(Notice::ActiveFileChanged(id));
        Ok(())
    }

    /// Load the active file into the surface and take fresh subscriptions.
    fn mount_active(&mut self) {
        self.unmount();
        let Some(file) = self.store.get_active() else {
            self.surface.load("");
            return;
        };
        log::debug!("Mounting {} ({})", file.filename, file.id);
        self.surface.load(&file.content);
        for kind in MOUNT_SUBSCRIPTIONS {
            let id = self.surface.subscribe(kind);
            self.subscriptions.push(id);
        }
        self.revision += 1;
    }

    /// Remove markers and release every subscription taken by `mount_active`.
    fn unmount(&mut self) {
        self.presence.clear(&mut self.surface);
        for id in self.subscriptions.drain(..) {
            if !self.surface.dispose(id) {
                log::debug!("Subscription {id:?} was already released");
            }
        }
        // Drop anything the old file left unprocessed.
        self.surface.take_events();
    }

    /// Create a file in the room. It becomes active once the storage service
    /// answers.
    pub fn create_file(&mut self, filename: &str) -> Result<(), SessionError> {
        self.ensure_open()?;
        let filename = filename.trim();
        if filename.is_empty() {
            return Err(SessionError::BlankFilename);
        }

        let storage = self.backend.storage.clone();
        let room = self.room.clone();
        let filename = filename.to_string();
        let tx = self.outcome_tx.clone();
        tokio::spawn(async move {
            let result = storage.create_file(&room, &filename).await;
            let _ = tx.send(Outcome::FileCreated(result));
        });
        Ok(())
    }

    /// Persist the active file.
    pub fn save(&mut self) -> Result<(), SessionError> {
        self.ensure_open()?;
        self.flush_active();
        let file = self.store.get_active().ok_or(SessionError::NoActiveFile)?;
        let (id, content) = (file.id, file.content.clone());

        let storage = self.backend.storage.clone();
        let tx = self.outcome_tx.clone();
        tokio::spawn(async move {
            let result = storage.save_file(id, &content).await;
            let _ = tx.send(Outcome::Saved { id, result });
        });
        Ok(())
    }

    /// Execute the active file and show its output.
    pub fn run_active(&mut self) -> Result<(), SessionError> {
        self.ensure_open()?;
        self.flush_active();
        let code = self
            .store
            .get_active()
            .map(|f| f.content.clone())
            .ok_or(SessionError::NoActiveFile)?;

        self.set_output(RUNNING.to_string());
        let runner = self.backend.runner.clone();
        let tx = self.outcome_tx.clone();
        tokio::spawn(async move {
            let result = runner.run(&code).await;
            let _ = tx.send(Outcome::RunFinished(result));
        });
        Ok(())
    }

    /// Ask for ghost text at the caret.
    pub fn request_completion(&mut self) -> Result<(), SessionError> {
        self.ensure_open()?;
        let file = self.store.active_id().ok_or(SessionError::NoActiveFile)?;
        self.pump_surface();

        let buffer = self.surface.value();
        let offset = self.surface.offset_at(self.surface.position());
        let revision = self.revision;
        let bridge = self.completion.clone();
        let tx = self.outcome_tx.clone();
        tokio::spawn(async move {
            let suggestion = bridge.request_completion(&buffer, offset).await;
            let _ = tx.send(Outcome::Suggestion {
                file,
                revision,
                suggestion,
            });
        });
        Ok(())
    }

    fn handle_outcome(&mut self, outcome: Outcome) {
        if self.closed {
            log::debug!("Ignoring {outcome:?} for closed session");
            return;
        }
        match outcome {
            Outcome::FileCreated(Ok(file)) => {
                self.flush_active();
                let id = file.id;
                match self.store.add_file(file) {
                    Ok(()) => {
                        self.mount_active();
                        self.notify(Notice::FileCreated(id));
                    }
                    Err(e) => log::warn!("Created file not added: {e}"),
                }
            }
            Outcome::FileCreated(Err(e)) => log::warn!("Failed to create file: {e}"),
            Outcome::Saved { id, result: Ok(()) } => {
                log::info!("Saved file {id}");
                self.notify(Notice::Saved(id));
            }
            Outcome::Saved { id, result: Err(e) } => {
                log::warn!("Failed to save file {id}: {e}");
                self.notify(Notice::SaveFailed(id));
            }
            Outcome::RunFinished(result) => {
                let output = result.unwrap_or_else(|e| {
                    log::warn!("Run failed: {e}");
                    RUNNER_ERROR.to_string()
                });
                self.set_output(output);
            }
            Outcome::Suggestion {
                file,
                revision,
                suggestion,
            } => {
                if self.store.active_id() != Some(file) || revision != self.revision {
                    log::debug!("Discarding stale suggestion for file {file}");
                    return;
                }
                if let Some(suggestion) = suggestion {
                    let start = self.surface.position_at(suggestion.offset);
                    let ghost = suggestion.inline_completion(start);
                    self.surface.show_inline_completion(ghost);
                }
            }
        }
    }

    // ───────────────────────────────────────────────────────────────
    // Loop
    // ───────────────────────────────────────────────────────────────

    /// Apply one host command.
    pub async fn handle_command(&mut self, command: SessionCommand) -> Result<(), SessionError> {
        if matches!(command, SessionCommand::Close) {
            self.close().await;
            return Ok(());
        }
        self.ensure_open()?;
        match command {
            SessionCommand::Insert(text) => self.surface.insert_text(&text),
            SessionCommand::Backspace(count) => self.surface.backspace(count),
            SessionCommand::SetContent(text) => self.surface.set_value(&text, self.guard.origin()),
            SessionCommand::MoveCursor(position) => self.surface.move_cursor(position),
            SessionCommand::AcceptSuggestion => {
                if !self.surface.accept_inline_completion() {
                    log::debug!("No suggestion to accept");
                }
            }
            SessionCommand::SwitchFile(id) => self.switch_file(id)?,
            SessionCommand::NewFile(name) => self.create_file(&name)?,
            SessionCommand::Save => self.save()?,
            SessionCommand::Run => self.run_active()?,
            SessionCommand::Complete => self.request_completion()?,
            SessionCommand::Close => {}
        }
        self.pump_surface();
        Ok(())
    }

    /// Drive the session until `Close` arrives or the command sender is
    /// dropped. In the latter case the session is returned to the host still
    /// open, and unprocessed channel events stay queued.
    pub async fn run(&mut self, mut commands: mpsc::UnboundedReceiver<SessionCommand>) {
        while !self.closed {
            tokio::select! {
                Some(event) = next_event(&mut self.channel) => {
                    self.handle_channel_event(event);
                }
                command = commands.recv() => match command {
                    Some(command) => {
                        if let Err(e) = self.handle_command(command).await {
                            log::info!("Command rejected: {e}");
                        }
                    }
                    None => break,
                },
                Some(outcome) = self.outcome_rx.recv() => {
                    self.handle_outcome(outcome);
                }
            }
        }
    }

    /// Leave the room: release surface resources and close the channel.
    /// Late results of in-flight requests are ignored afterwards.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.flush_active();
        self.unmount();
        self.closed = true;
        if let Some(mut channel) = self.channel.take() {
            channel.close().await;
        }
        log::info!("Left room {}", self.room);
    }

    // ───────────────────────────────────────────────────────────────
    // Accessors
    // ───────────────────────────────────────────────────────────────

    pub fn room(&self) -> &RoomId {
        &self.room
    }

    pub fn store(&self) -> &RoomStore {
        &self.store
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    /// Direct surface access for hosts. Call [`pump_surface`](Self::pump_surface)
    /// after mutating.
    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    pub fn presence(&self) -> &CursorPresence {
        &self.presence
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn sender_id(&self) -> &str {
        &self.config.sender_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.channel.as_ref().map(SyncChannel::state)
    }

    fn set_output(&mut self, output: String) {
        self.output = output;
        self.notify(Notice::Output(self.output.clone()));
    }

    fn notify(&self, notice: Notice) {
        if let Some(tx) = &self.notices {
            let _ = tx.send(notice);
        }
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.closed {
            Err(SessionError::Closed)
        } else {
            Ok(())
        }
    }
}

async fn next_event(channel: &mut Option<SyncChannel>) -> Option<ChannelEvent> {
    match channel {
        Some(channel) => channel.recv().await,
        None => std::future::pending().await,
    }
}

// ===================================================================
// Tests
// ===================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{RunnerApi, StorageApi};
    use crate::completion::{CompletionRequest, SuggestionOracle};
    use crate::echo::Origin;
    use crate::surface::{Decoration, DecorationId, InlineCompletion, TextBuffer};
    use crate::transport::LoopbackPeer;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    // ── Fakes ──────────────────────────────────────────────────────

    #[derive(Default)]
    struct FakeStorage {
        files: Vec<File>,
        next_id: Mutex<i64>,
        saved: Mutex<Vec<(FileId, String)>>,
        fail_save: bool,
    }

    #[async_trait]
    impl StorageApi for FakeStorage {
        async fn list_files(&self, _room: &RoomId) -> Result<Vec<File>, ApiError> {
            Ok(self.files.clone())
        }

        async fn create_file(&self, _room: &RoomId, filename: &str) -> Result<File, ApiError> {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            Ok(File::new(100 + *next, filename, ""))
        }

        async fn save_file(&self, id: FileId, content: &str) -> Result<(), ApiError> {
            if self.fail_save {
                return Err(ApiError::Unexpected("disk full".into()));
            }
            self.saved.lock().unwrap().push((id, content.to_string()));
            Ok(())
        }

        async fn create_room(&self) -> Result<RoomId, ApiError> {
            Ok(RoomId::parse("fresh").unwrap())
        }
    }

    struct FakeRunner(Result<String, String>);

    #[async_trait]
    impl RunnerApi for FakeRunner {
        async fn run(&self, _code: &str) -> Result<String, ApiError> {
            self.0.clone().map_err(ApiError::Unexpected)
        }
    }

    struct FakeOracle(Option<String>);

    #[async_trait]
    impl SuggestionOracle for FakeOracle {
        async fn suggest(&self, _request: &CompletionRequest) -> Result<Option<String>, ApiError> {
            Ok(self.0.clone())
        }
    }

    fn backend_with(storage: Arc<FakeStorage>, runner: FakeRunner, suggestion: Option<&str>) -> Backend {
        Backend {
            storage,
            runner: Arc::new(runner),
            oracle: Arc::new(FakeOracle(suggestion.map(String::from))),
        }
    }

    fn config() -> SessionConfig {
        SessionConfig {
            sender_id: "me".into(),
            ..SessionConfig::default()
        }
    }

    fn room() -> RoomId {
        RoomId::parse("room-1").unwrap()
    }

    fn two_files() -> Vec<File> {
        vec![File::new(1, "a.py", "x=1"), File::new(2, "b.py", "print(2)")]
    }

    /// Session over `files` with a loopback channel attached.
    fn session_with<S: EditorSurface>(files: Vec<File>, surface: S) -> (Session<S>, LoopbackPeer) {
        let storage = Arc::new(FakeStorage::default());
        let backend = backend_with(storage, FakeRunner(Ok("3\n".into())), Some("pass"));
        let mut session = Session::new(config(), backend, room(), surface);
        session.load_files(files);

        let (channel, peer) = SyncConnector::new().loopback(&room()).unwrap();
        session.attach_channel(channel);
        (session, peer)
    }

    fn code_messages(sent: Vec<SyncMessage>) -> Vec<SyncMessage> {
        sent.into_iter()
            .filter(|m| matches!(m, SyncMessage::Code { .. }))
            .collect()
    }

    async fn settle<S: EditorSurface>(session: &mut Session<S>) {
        let outcome = tokio::time::timeout(Duration::from_secs(2), session.outcome_rx.recv())
            .await
            .expect("outcome in time")
            .expect("outcome channel open");
        session.handle_outcome(outcome);
    }

    /// Surface that records the origin of every whole-buffer replacement.
    #[derive(Default)]
    struct RecordingSurface {
        inner: TextBuffer,
        replacements: Vec<(String, Origin)>,
    }

    impl EditorSurface for RecordingSurface {
        fn value(&self) -> String {
            self.inner.value()
        }
        fn set_value(&mut self, text: &str, origin: Origin) {
            self.replacements.push((text.to_string(), origin));
            self.inner.set_value(text, origin);
        }
        fn position(&self) -> Position {
            self.inner.position()
        }
        fn set_position(&mut self, position: Position, origin: Origin) {
            self.inner.set_position(position, origin);
        }
        fn load(&mut self, content: &str) {
            self.inner.load(content);
        }
        fn insert_text(&mut self, text: &str) {
            self.inner.insert_text(text);
        }
        fn backspace(&mut self, count: usize) {
            self.inner.backspace(count);
        }
        fn offset_at(&self, position: Position) -> usize {
            self.inner.offset_at(position)
        }
        fn position_at(&self, offset: usize) -> Position {
            self.inner.position_at(offset)
        }
        fn delta_decorations(&mut self, old: &[DecorationId], new: Vec<Decoration>) -> Vec<DecorationId> {
            self.inner.delta_decorations(old, new)
        }
        fn show_inline_completion(&mut self, completion: InlineCompletion) {
            self.inner.show_inline_completion(completion);
        }
        fn inline_completion(&self) -> Option<&InlineCompletion> {
            self.inner.inline_completion()
        }
        fn accept_inline_completion(&mut self) -> bool {
            self.inner.accept_inline_completion()
        }
        fn subscribe(&mut self, kind: SubscriptionKind) -> SubscriptionId {
            self.inner.subscribe(kind)
        }
        fn dispose(&mut self, id: SubscriptionId) -> bool {
            self.inner.dispose(id)
        }
        fn take_events(&mut self) -> Vec<SurfaceEvent> {
            self.inner.take_events()
        }
    }

    // ── Local edits ────────────────────────────────────────────────

    #[tokio::test]
    async fn test_local_edit_sends_one_code_message() {
        let (mut session, mut peer) = session_with(vec![File::new(1, "a.py", "x=1")], TextBuffer::new());
        assert_eq!(session.store().active_id(), Some(FileId(1)));
        assert_eq!(session.surface().value(), "x=1");

        session
            .handle_command(SessionCommand::SetContent("x=2".into()))
            .await
            .unwrap();

        assert_eq!(code_messages(peer.sent()), vec![SyncMessage::code(FileId(1), "x=2")]);
        assert_eq!(session.store().get(FileId(1)).unwrap().content, "x=2");
    }

    #[tokio::test]
    async fn test_each_keystroke_sends_post_edit_buffer() {
        let (mut session, mut peer) = session_with(vec![File::new(1, "a.py", "")], TextBuffer::new());

        for ch in ["a", "b", "c"] {
            session.handle_command(SessionCommand::Insert(ch.into())).await.unwrap();
        }

        assert_eq!(
            code_messages(peer.sent()),
            vec![
                SyncMessage::code(FileId(1), "a"),
                SyncMessage::code(FileId(1), "ab"),
                SyncMessage::code(FileId(1), "abc"),
            ]
        );
    }

    #[tokio::test]
    async fn test_backspace_broadcasts_shortened_buffer() {
        let (mut session, mut peer) = session_with(vec![File::new(1, "a.py", "")], TextBuffer::new());
        session.handle_command(SessionCommand::Insert("xy".into())).await.unwrap();
        session.handle_command(SessionCommand::Backspace(1)).await.unwrap();

        assert_eq!(
            code_messages(peer.sent()),
            vec![SyncMessage::code(FileId(1), "xy"), SyncMessage::code(FileId(1), "x")]
        );
        assert_eq!(session.store().get(FileId(1)).unwrap().content, "x");
    }

    #[tokio::test]
    async fn test_cursor_move_is_broadcast_with_sender() {
        let (mut session, mut peer) = session_with(two_files(), TextBuffer::new());
        session
            .handle_command(SessionCommand::MoveCursor(Position::new(1, 3)))
            .await
            .unwrap();

        assert_eq!(
            peer.sent(),
            vec![SyncMessage::cursor(FileId(1), Position::new(1, 3), "me")]
        );
    }

    // ── Remote edits ───────────────────────────────────────────────

    #[tokio::test]
    async fn test_remote_code_applied_under_guard_without_echo() {
        let (mut session, mut peer) =
            session_with(vec![File::new(1, "a.py", "x=1")], RecordingSurface::default());

        session.handle_sync_message(SyncMessage::code(FileId(1), "y=9"));

        assert_eq!(session.surface().value(), "y=9");
        assert_eq!(session.surface().replacements, vec![("y=9".to_string(), Origin::Remote)]);
        assert!(!session.guard.is_suppressing());
        assert!(peer.sent().is_empty());
    }

    #[tokio::test]
    async fn test_remote_code_preserves_caret() {
        let (mut session, mut peer) = session_with(vec![File::new(1, "a.py", "x=1")], TextBuffer::new());
        session
            .handle_command(SessionCommand::MoveCursor(Position::new(1, 3)))
            .await
            .unwrap();
        peer.sent();

        session.handle_sync_message(SyncMessage::code(FileId(1), "y=99"));
        assert_eq!(session.surface().position(), Position::new(1, 3));

        // Out-of-range carets are clamped by the surface.
        session.handle_sync_message(SyncMessage::code(FileId(1), "z"));
        assert_eq!(session.surface().position(), Position::new(1, 2));
        assert!(peer.sent().is_empty());
    }

    #[tokio::test]
    async fn test_identical_remote_code_is_noop() {
        let (mut session, mut peer) =
            session_with(vec![File::new(1, "a.py", "x=1")], RecordingSurface::default());
        session
            .handle_command(SessionCommand::MoveCursor(Position::new(1, 3)))
            .await
            .unwrap();
        peer.sent();

        session.handle_sync_message(SyncMessage::code(FileId(1), "x=1"));

        assert!(session.surface().replacements.is_empty());
        assert_eq!(session.surface().position(), Position::new(1, 3));
        assert!(peer.sent().is_empty());
    }

    #[tokio::test]
    async fn test_remote_code_for_inactive_file_updates_store_only() {
        let (mut session, mut peer) = session_with(two_files(), TextBuffer::new());

        session.handle_sync_message(SyncMessage::code(FileId(2), "print(3)"));

        assert_eq!(session.surface().value(), "x=1");
        assert_eq!(session.store().get(FileId(2)).unwrap().content, "print(3)");

        session.switch_file(FileId(2)).unwrap();
        assert_eq!(session.surface().value(), "print(3)");
        assert!(code_messages(peer.sent()).is_empty());
    }

    #[tokio::test]
    async fn test_remote_code_for_unknown_file_dropped() {
        let (mut session, _peer) = session_with(two_files(), TextBuffer::new());
        session.handle_sync_message(SyncMessage::code(FileId(9), "lost"));
        assert_eq!(session.store().len(), 2);
        assert!(session.store().get(FileId(9)).is_none());
        assert_eq!(session.surface().value(), "x=1");
    }

    // ── Presence ───────────────────────────────────────────────────

    #[tokio::test]
    async fn test_cursor_rendered_only_for_active_file() {
        let (mut session, _peer) = session_with(two_files(), TextBuffer::new());

        let inactive = SyncMessage::cursor(FileId(2), Position::new(1, 1), "bob");
        session.handle_sync_message(inactive);
        assert_eq!(session.surface().decoration_count(), 0);

        let active = SyncMessage::cursor(FileId(1), Position::new(1, 2), "bob");
        session.handle_sync_message(active);
        assert_eq!(session.surface().decoration_count(), 1);

        // Inactive-file cursors are not replayed after a switch.
        session.switch_file(FileId(2)).unwrap();
        assert_eq!(session.surface().decoration_count(), 0);
        assert!(session.presence().is_empty());
    }

    #[tokio::test]
    async fn test_own_cursor_not_rendered() {
        let (mut session, _peer) = session_with(two_files(), TextBuffer::new());
        let own = SyncMessage::cursor(FileId(1), Position::new(1, 1), "me");
        session.handle_sync_message(own);
        assert_eq!(session.surface().decoration_count(), 0);
    }

    // ── Files ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_switch_flushes_live_buffer() {
        let (mut session, _peer) = session_with(two_files(), TextBuffer::new());
        session
            .handle_command(SessionCommand::MoveCursor(Position::new(1, 4)))
            .await
            .unwrap();
        session.surface_mut().insert_text("0");

        session.switch_file(FileId(2)).unwrap();
        assert_eq!(session.store().get(FileId(1)).unwrap().content, "x=10");
        assert_eq!(session.surface().value(), "print(2)");

        session.switch_file(FileId(1)).unwrap();
        assert_eq!(session.surface().value(), "x=10");
    }

    #[tokio::test]
    async fn test_switch_to_unknown_file_keeps_active() {
        let (mut session, _peer) = session_with(two_files(), TextBuffer::new());
        let err = session.switch_file(FileId(7)).unwrap_err();
        assert!(matches!(err, SessionError::Store(StoreError::UnknownFile(FileId(7)))));
        assert_eq!(session.store().active_id(), Some(FileId(1)));
    }

    #[tokio::test]
    async fn test_subscriptions_not_duplicated_across_switches() {
        let (mut session, _peer) = session_with(two_files(), TextBuffer::new());
        for id in [2, 1, 2, 1] {
            session.switch_file(FileId(id)).unwrap();
        }
        for kind in MOUNT_SUBSCRIPTIONS {
            assert_eq!(session.surface().subscription_count(kind), 1);
        }

        session.close().await;
        for kind in MOUNT_SUBSCRIPTIONS {
            assert_eq!(session.surface().subscription_count(kind), 0);
        }
    }

    #[tokio::test]
    async fn test_new_file_appended_and_activated() {
        let (mut session, _peer) = session_with(vec![File::new(1, "a.py", "x=1")], TextBuffer::new());
        let mut notices = session.subscribe_notices();

        session.create_file("b.py").unwrap();
        settle(&mut session).await;

        let files = session.store().files();
        assert_eq!(files.len(), 2);
        assert_eq!(files[1].filename, "b.py");
        assert_eq!(session.store().active_id(), Some(files[1].id));
        assert_eq!(session.surface().value(), "");
        assert_eq!(notices.try_recv().unwrap(), Notice::FileCreated(files[1].id));
    }

    #[tokio::test]
    async fn test_blank_filename_rejected() {
        let (mut session, _peer) = session_with(two_files(), TextBuffer::new());
        assert!(matches!(session.create_file("   "), Err(SessionError::BlankFilename)));
    }

    #[tokio::test]
    async fn test_save_sends_flushed_content() {
        let storage = Arc::new(FakeStorage::default());
        let backend = backend_with(storage.clone(), FakeRunner(Ok(String::new())), None);
        let mut session = Session::new(config(), backend, room(), TextBuffer::new());
        session.load_files(two_files());
        let mut notices = session.subscribe_notices();

        session.surface_mut().insert_text("# ");
        session.save().unwrap();
        settle(&mut session).await;

        assert_eq!(
            *storage.saved.lock().unwrap(),
            vec![(FileId(1), "# x=1".to_string())]
        );
        assert_eq!(notices.try_recv().unwrap(), Notice::Saved(FileId(1)));
    }

    #[tokio::test]
    async fn test_save_failure_notice() {
        let storage = Arc::new(FakeStorage {
            fail_save: true,
            ..FakeStorage::default()
        });
        let backend = backend_with(storage, FakeRunner(Ok(String::new())), None);
        let mut session = Session::new(config(), backend, room(), TextBuffer::new());
        session.load_files(two_files());
        let mut notices = session.subscribe_notices();

        session.save().unwrap();
        settle(&mut session).await;
        assert_eq!(notices.try_recv().unwrap(), Notice::SaveFailed(FileId(1)));
    }

    #[tokio::test]
    async fn test_save_without_active_file() {
        let (mut session, _peer) = session_with(Vec::new(), TextBuffer::new());
        assert!(matches!(session.save(), Err(SessionError::NoActiveFile)));
        assert!(matches!(session.run_active(), Err(SessionError::NoActiveFile)));
    }

    // ── Run ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_run_shows_output() {
        let (mut session, _peer) = session_with(two_files(), TextBuffer::new());
        assert_eq!(session.output(), TERMINAL_READY);

        session.run_active().unwrap();
        assert_eq!(session.output(), RUNNING);
        settle(&mut session).await;
        assert_eq!(session.output(), "3\n");
    }

    #[tokio::test]
    async fn test_run_failure_shows_neutral_message() {
        let storage = Arc::new(FakeStorage::default());
        let backend = backend_with(storage, FakeRunner(Err("refused".into())), None);
        let mut session = Session::new(config(), backend, room(), TextBuffer::new());
        session.load_files(two_files());

        session.run_active().unwrap();
        settle(&mut session).await;
        assert_eq!(session.output(), RUNNER_ERROR);
    }

    // ── Completion ─────────────────────────────────────────────────

    #[tokio::test]
    async fn test_suggestion_shown_as_ghost_text_until_accepted() {
        let (mut session, mut peer) =
            session_with(vec![File::new(1, "a.py", "def f():\n    ")], TextBuffer::new());
        session
            .handle_command(SessionCommand::MoveCursor(Position::new(2, 5)))
            .await
            .unwrap();

        session.handle_command(SessionCommand::Complete).await.unwrap();
        settle(&mut session).await;

        let ghost = session.surface().inline_completion().unwrap();
        assert_eq!(ghost.insert_text, "pass");
        assert_eq!(ghost.anchor_offset, 13);
        assert_eq!(session.surface().value(), "def f():\n    ");
        peer.sent();

        session.handle_command(SessionCommand::AcceptSuggestion).await.unwrap();
        assert_eq!(session.surface().value(), "def f():\n    pass");
        assert_eq!(
            code_messages(peer.sent()),
            vec![SyncMessage::code(FileId(1), "def f():\n    pass")]
        );
    }

    #[tokio::test]
    async fn test_stale_suggestion_discarded() {
        let (mut session, _peer) = session_with(vec![File::new(1, "a.py", "def f():\n    ")], TextBuffer::new());
        session.request_completion().unwrap();
        session.surface_mut().insert_text("#");
        session.pump_surface();

        settle(&mut session).await;
        assert!(session.surface().inline_completion().is_none());
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    #[tokio::test]
    async fn test_disconnect_keeps_local_editing() {
        let (mut session, mut peer) = session_with(two_files(), TextBuffer::new());
        let mut notices = session.subscribe_notices();

        peer.disconnect();
        session.handle_channel_event(ChannelEvent::Disconnected);
        assert_eq!(notices.try_recv().unwrap(), Notice::Disconnected);
        assert_eq!(session.connection_state(), Some(ConnectionState::Disconnected));

        session.handle_command(SessionCommand::Insert("#".into())).await.unwrap();
        assert_eq!(session.store().get(FileId(1)).unwrap().content, "#x=1");
        assert!(peer.sent().is_empty());
    }

    #[tokio::test]
    async fn test_closed_session_ignores_late_results() {
        let (mut session, mut peer) = session_with(two_files(), TextBuffer::new());
        session.run_active().unwrap();
        session.handle_command(SessionCommand::Close).await.unwrap();

        assert!(session.is_closed());
        assert!(peer.saw_close());
        settle(&mut session).await;
        assert_eq!(session.output(), RUNNING);

        assert!(matches!(
            session.handle_command(SessionCommand::Insert("x".into())).await,
            Err(SessionError::Closed)
        ));
        session.handle_sync_message(SyncMessage::code(FileId(1), "late"));
        assert_ne!(session.store().get(FileId(1)).unwrap().content, "late");
    }

    #[tokio::test]
    async fn test_start_without_server_is_local_only() {
        let storage = Arc::new(FakeStorage {
            files: two_files(),
            ..FakeStorage::default()
        });
        let backend = backend_with(storage, FakeRunner(Ok(String::new())), None);
        let config = SessionConfig {
            ws_url: Some("ws://127.0.0.1:9".into()),
            connect_timeout: Duration::from_millis(500),
            ..config()
        };
        let connector = SyncConnector::new();

        let mut session = Session::start(config, backend, &connector, room(), TextBuffer::new()).await;
        assert_eq!(session.store().len(), 2);
        assert_eq!(session.surface().value(), "x=1");
        assert_eq!(session.connection_state(), None);
        assert!(!connector.is_live(&room()));

        session.handle_command(SessionCommand::SetContent("x=5".into())).await.unwrap();
        assert_eq!(session.store().get(FileId(1)).unwrap().content, "x=5");
    }

    #[tokio::test]
    async fn test_run_loop_processes_channel_and_commands() {
        let (mut session, mut peer) = session_with(two_files(), TextBuffer::new());
        let (tx, rx) = mpsc::unbounded_channel();

        peer.deliver(SyncMessage::code(FileId(1), "y=9"));
        tx.send(SessionCommand::Run).unwrap();

        let handle = tokio::spawn(async move {
            session.run(rx).await;
            session
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(SessionCommand::Close).unwrap();

        let session = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(session.is_closed());
        assert_eq!(session.store().get(FileId(1)).unwrap().content, "y=9");
        assert_eq!(session.output(), "3\n");
        assert!(code_messages(peer.sent()).is_empty());
    }
}
