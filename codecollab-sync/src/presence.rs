//! Remote cursor presence for the active file.
//!
//! ## Data flow
//!
//! ```text
//! inbound `cursor` message
//!       │  (dropped unless fileId == active file, and not our own senderId)
//!       ▼
//! CursorPresence::render(surface, position, sender_id)
//!       │
//!       ▼
//! EditorSurface::delta_decorations(old, [marker])
//! ```
//!
//! Markers are ephemeral. They are never queued for files that are not
//! shown, and they are all removed when the file is unmounted.
//!
//! ## Capacity
//!
//! [`PresenceCapacity::SingleSlot`] keeps exactly one marker: every render
//! replaces the whole set. [`PresenceCapacity::PerSender`] keys markers by
//! sender and replaces only that sender's entry, for rooms with more than two
//! participants.

use std::collections::HashMap;

use codecollab_core::Position;

use crate::surface::{Decoration, DecorationId, EditorSurface, Range};

/// CSS-style class applied to remote cursor markers.
pub const REMOTE_CURSOR_CLASS: &str = "remote-cursor";

/// How many remote cursors are shown at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PresenceCapacity {
    /// One marker; each update replaces the whole set.
    #[default]
    SingleSlot,
    /// One marker per sender.
    PerSender,
}

/// A remote participant's visible caret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorMarker {
    pub sender_id: String,
    pub position: Position,
    decorations: Vec<DecorationId>,
}

/// Renders other participants' carets into the active file.
#[derive(Debug)]
pub struct CursorPresence {
    local_sender_id: String,
    capacity: PresenceCapacity,
    markers: HashMap<String, CursorMarker>,
}

impl CursorPresence {
    pub fn new(local_sender_id: impl Into<String>, capacity: PresenceCapacity) -> Self {
        Self {
            local_sender_id: local_sender_id.into(),
            capacity,
            markers: HashMap::new(),
        }
    }

    /// Show `sender_id`'s caret at `position`.
    ///
    /// Returns `false` without touching the surface when the sender is the
    /// local participant.
    pub fn render<S>(&mut self, surface: &mut S, position: Position, sender_id: &str) -> bool
    where
        S: EditorSurface + ?Sized,
    {
        if sender_id == self.local_sender_id {
            return false;
        }

        let old: Vec<DecorationId> = match self.capacity {
            PresenceCapacity::SingleSlot => self
                .markers
                .drain()
                .flat_map(|(_, marker)| marker.decorations)
                .collect(),
            PresenceCapacity::PerSender => self
                .markers
                .remove(sender_id)
                .map(|marker| marker.decorations)
                .unwrap_or_default(),
        };

        let decorations = surface.delta_decorations(&old, vec![marker_decoration(position, sender_id)]);
        self.markers.insert(
            sender_id.to_string(),
            CursorMarker {
                sender_id: sender_id.to_string(),
                position,
                decorations,
            },
        );
        true
    }

    /// Remove every marker from the surface.
    pub fn clear<S>(&mut self, surface: &mut S)
    where
        S: EditorSurface + ?Sized,
    {
        if self.markers.is_empty() {
            return;
        }
        let old: Vec<DecorationId> = self
            .markers
            .drain()
            .flat_map(|(_, marker)| marker.decorations)
            .collect();
        surface.delta_decorations(&old, Vec::new());
    }

    pub fn markers(&self) -> impl Iterator<Item = &CursorMarker> {
        self.markers.values()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }
}

fn marker_decoration(position: Position, sender_id: &str) -> Decoration {
    Decoration {
        range: Range::caret(position),
        class_name: REMOTE_CURSOR_CLASS.to_string(),
        hover_message: format!("User {sender_id}"),
    }
}

// ===================================================================
// Tests
// ===================================================================
