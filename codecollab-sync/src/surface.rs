//! The editing surface driven by a session.
//!
//! [`EditorSurface`] is the seam between the sync engine and whatever widget
//! actually shows the text. The engine only needs whole-buffer reads and
//! writes, caret access, decorations, inline completions, and a queue of
//! change events stamped with their [`Origin`].
//!
//! [`TextBuffer`] is a headless implementation used by the command-line host
//! and by tests.

use std::collections::{BTreeMap, HashMap};

use codecollab_core::Position;
use ropey::Rope;

use crate::echo::Origin;

/// Half-open range in editor coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    /// Zero-width range at `position`.
    pub fn caret(position: Position) -> Self {
        Self::new(position, position)
    }
}

/// Visual decoration attached to a range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoration {
    pub range: Range,
    pub class_name: String,
    pub hover_message: String,
}

/// Handle of a decoration applied to a surface.
pub type DecorationId = u64;

/// Ghost text offered at the caret. Not part of the buffer until accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineCompletion {
    pub insert_text: String,
    /// Character offset where the text would be inserted
    pub anchor_offset: usize,
    pub range: Range,
}

/// Kinds of surface subscriptions a session holds while a file is mounted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionKind {
    ContentChanged,
    CursorMoved,
    InlineCompletions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Change notifications produced by a surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceEvent {
    ContentChanged { value: String, origin: Origin },
    CursorMoved { position: Position, origin: Origin },
}

/// An editing surface the session can drive.
pub trait EditorSurface {
    /// Current buffer text.
    fn value(&self) -> String;

    /// Replace the whole buffer. Emits a change event tagged with `origin`.
    fn set_value(&mut self, text: &str, origin: Origin);

    /// Current caret position.
    fn position(&self) -> Position;

    /// Move the caret. Out-of-range positions are clamped by the surface.
    fn set_position(&mut self, position: Position, origin: Origin);

    /// Show a different file: replace the text and reset the caret without
    /// emitting change events.
    fn load(&mut self, content: &str);

    /// User keystroke at the caret.
    fn insert_text(&mut self, text: &str);

    /// User deletion of up to `count` characters before the caret.
    fn backspace(&mut self, count: usize);

    /// User caret movement.
    fn move_cursor(&mut self, position: Position) {
        self.set_position(position, Origin::Local);
    }

    /// Remove the decorations in `old` and apply `new`, returning the new
    /// handles in order.
    fn delta_decorations(&mut self, old: &[DecorationId], new: Vec<Decoration>) -> Vec<DecorationId>;

    /// Offer ghost text. Ignored unless an inline-completion provider is
    /// subscribed.
    fn show_inline_completion(&mut self, completion: InlineCompletion);

    fn inline_completion(&self) -> Option<&InlineCompletion>;

    /// Commit the offered ghost text as a local edit.
    fn accept_inline_completion(&mut self) -> bool;

    fn subscribe(&mut self, kind: SubscriptionKind) -> SubscriptionId;

    /// Release a subscription. Returns `false` if it was not active.
    fn dispose(&mut self, id: SubscriptionId) -> bool;

    /// Drain pending change events in the order they happened.
    fn take_events(&mut self) -> Vec<SurfaceEvent>;

    /// Char offset of `position`, clamped to the buffer.
    fn offset_at(&self, position: Position) -> usize;

    fn position_at(&self, offset: usize) -> Position;
}

// ───────────────────────────────────────────────────────────────────
// Headless buffer
// ───────────────────────────────────────────────────────────────────

/// In-memory editing surface over a [`Rope`].
///
/// The caret is a char index into the rope. Any keystroke or caret movement
/// dismisses pending ghost text.
#[derive(Debug, Default)]
pub struct TextBuffer {
    text: Rope,
    caret: usize,
    decorations: BTreeMap<DecorationId, Decoration>,
    next_decoration: DecorationId,
    inline: Option<InlineCompletion>,
    subscriptions: HashMap<SubscriptionId, SubscriptionKind>,
    next_subscription: u64,
    events: Vec<SurfaceEvent>,
}

impl TextBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_content(content: &str) -> Self {
        let mut buffer = Self::new();
        buffer.load(content);
        buffer
    }

    /// Decorations currently applied.
    pub fn decorations(&self) -> impl Iterator<Item = &Decoration> {
        self.decorations.values()
    }

    pub fn decoration_count(&self) -> usize {
        self.decorations.len()
    }

    /// Number of live subscriptions of `kind`.
    pub fn subscription_count(&self, kind: SubscriptionKind) -> usize {
        self.subscriptions.values().filter(|k| **k == kind).count()
    }

    pub fn caret_offset(&self) -> usize {
        self.caret
    }

    fn subscribed(&self, kind: SubscriptionKind) -> bool {
        self.subscriptions.values().any(|k| *k == kind)
    }

    fn emit_content(&mut self, origin: Origin) {
        if self.subscribed(SubscriptionKind::ContentChanged) {
            self.events.push(SurfaceEvent::ContentChanged {
                value: self.text.to_string(),
                origin,
            });
        }
    }

    fn emit_cursor(&mut self, origin: Origin) {
        if self.subscribed(SubscriptionKind::CursorMoved) {
            self.events.push(SurfaceEvent::CursorMoved {
                position: self.position(),
                origin,
            });
        }
    }

    fn move_caret(&mut self, offset: usize, origin: Origin) {
        if offset != self.caret {
            self.caret = offset;
            self.emit_cursor(origin);
        }
    }
}

impl EditorSurface for TextBuffer {
    fn value(&self) -> String {
        self.text.to_string()
    }

    fn set_value(&mut self, text: &str, origin: Origin) {
        self.inline = None;
        self.text = Rope::from_str(text);
        self.emit_content(origin);
        // Replacing the model puts the caret back at the start.
        self.move_caret(0, origin);
    }

    fn position(&self) -> Position {
        Position::from_char_idx(self.text.slice(..), self.caret)
    }

    fn set_position(&mut self, position: Position, origin: Origin) {
        if origin == Origin::Local {
            self.inline = None;
        }
        let offset = position.to_char_idx(self.text.slice(..));
        self.move_caret(offset, origin);
    }

    fn load(&mut self, content: &str) {
        self.text = Rope::from_str(content);
        self.caret = 0;
        self.inline = None;
    }

    fn insert_text(&mut self, text: &str) {
        self.inline = None;
        if text.is_empty() {
            return;
        }
        self.text.insert(self.caret, text);
        self.caret += text.chars().count();
        self.emit_content(Origin::Local);
        self.emit_cursor(Origin::Local);
    }

    fn backspace(&mut self, count: usize) {
        self.inline = None;
        let count = count.min(self.caret);
        if count == 0 {
            return;
        }
        self.text.remove(self.caret - count..self.caret);
        self.caret -= count;
        self.emit_content(Origin::Local);
        self.emit_cursor(Origin::Local);
    }

    fn offset_at(&self, position: Position) -> usize {
        position.to_char_idx(self.text.slice(..))
    }

    fn position_at(&self, offset: usize) -> Position {
        Position::from_char_idx(self.text.slice(..), offset)
    }

    fn delta_decorations(&mut self, old: &[DecorationId], new: Vec<Decoration>) -> Vec<DecorationId> {
        for id in old {
            self.decorations.remove(id);
        }
        new.into_iter()
            .map(|decoration| {
                self.next_decoration += 1;
                let id = self.next_decoration;
                self.decorations.insert(id, decoration);
                id
            })
            .collect()
    }

    fn show_inline_completion(&mut self, completion: InlineCompletion) {
        if !self.subscribed(SubscriptionKind::InlineCompletions) {
            log::debug!("No inline completion provider registered, dropping suggestion");
            return;
        }
        if completion.anchor_offset > self.text.len_chars() {
            return;
        }
        self.inline = Some(completion);
    }

    fn inline_completion(&self) -> Option<&InlineCompletion> {
        self.inline.as_ref()
    }

    fn accept_inline_completion(&mut self) -> bool {
        let Some(completion) = self
            .inline
            .take()
            .filter(|c| c.anchor_offset <= self.text.len_chars())
        else {
            return false;
        };
        self.text.insert(completion.anchor_offset, &completion.insert_text);
        self.caret = completion.anchor_offset + completion.insert_text.chars().count();
        self.emit_content(Origin::Local);
        self.emit_cursor(Origin::Local);
        true
    }

    fn subscribe(&mut self, kind: SubscriptionKind) -> SubscriptionId {
        self.next_subscription += 1;
        let id = SubscriptionId(self.next_subscription);
        self.subscriptions.insert(id, kind);
        id
    }

    fn dispose(&mut self, id: SubscriptionId) -> bool {
        let removed = self.subscriptions.remove(&id);
        if removed == Some(SubscriptionKind::InlineCompletions)
            && !self.subscribed(SubscriptionKind::InlineCompletions)
        {
            self.inline = None;
        }
        removed.is_some()
    }

    fn take_events(&mut self) -> Vec<SurfaceEvent> {
        std::mem::take(&mut self.events)
    }
}
