//! Echo suppression for remotely applied edits.
//!
//! ```text
//!  inbound `code` ──► EchoGuard::apply_remote(|origin| buffer.set_value(.., origin))
//!                                          │
//!                                          ▼
//!                            SurfaceEvent::ContentChanged { origin: Remote }
//!                                          │
//!  local change handler ◄──────────────────┘
//!      origin == Local && should_broadcast_local_change()  ──► send `code`
//! ```
//!
//! Every buffer mutation carries an [`Origin`]. Mutations performed inside
//! [`EchoGuard::apply_remote`] are tagged [`Origin::Remote`], and the flag it
//! raises is lowered by a scope guard, so it is released on every exit path
//! including unwinding. A handler that runs synchronously inside the scope
//! sees `should_broadcast_local_change() == false`; a handler that runs later
//! sees the `Remote` tag on the event. Either way nothing is re-broadcast.

use std::cell::Cell;

/// Where a buffer mutation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// The user typed or moved the caret.
    Local,
    /// Content arrived from another participant.
    Remote,
}

/// Suppression flag raised while a remote replacement is applied.
///
/// Single-threaded by construction (`Cell`), matching the session's one
/// event loop.
#[derive(Debug, Default)]
pub struct EchoGuard {
    suppressing: Cell<bool>,
}

/// Lowers the flag when dropped.
struct SuppressionScope<'a> {
    flag: &'a Cell<bool>,
    previous: bool,
}

impl Drop for SuppressionScope<'_> {
    fn drop(&mut self) {
        self.flag.set(self.previous);
    }
}

impl EchoGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run a buffer mutation with suppression raised.
    ///
    /// `apply` receives the origin to stamp on the mutations it performs.
    /// Nested calls keep the flag raised until the outermost scope ends.
    pub fn apply_remote<R>(&self, apply: impl FnOnce(Origin) -> R) -> R {
        let _scope = SuppressionScope {
            flag: &self.suppressing,
            previous: self.suppressing.replace(true),
        };
        apply(Origin::Remote)
    }

    /// True unless currently inside [`apply_remote`](Self::apply_remote).
    pub fn should_broadcast_local_change(&self) -> bool {
        !self.suppressing.get()
    }

    pub fn is_suppressing(&self) -> bool {
        self.suppressing.get()
    }

    /// Origin to stamp on a mutation made right now.
    pub fn origin(&self) -> Origin {
        if self.is_suppressing() {
            Origin::Remote
        } else {
            Origin::Local
        }
    }

    /// Decide whether a change event should go out on the wire.
    pub fn should_broadcast(&self, origin: Origin) -> bool {
        origin == Origin::Local && self.should_broadcast_local_change()
    }
}
