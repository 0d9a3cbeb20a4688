//! # codecollab-core: room and file model for collaborative editing
//!
//! Plain data types shared by the sync layer and its hosts, plus the
//! client-side [`RoomStore`] that tracks which files are open and which one
//! is active.
//!
//! ```text
//! Room (RoomId)
//!   ├── File { id: 1, filename: "a.py", content }   ◄── active
//!   ├── File { id: 2, filename: "b.py", content }
//!   └── ...
//! ```
//!
//! Nothing here performs I/O. Content is always a full text body: a file is
//! replaced wholesale, never patched.

pub mod store;

use ropey::RopeSlice;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use store::{RoomStore, StoreError};

/// Opaque room identifier issued by the storage service.
///
/// Room ids are used verbatim as URL path segments, so only unreserved URL
/// characters (`A-Z a-z 0-9 - _ . ~`) are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct RoomId(String);

impl RoomId {
    /// Parse a user-supplied room id. Surrounding whitespace is trimmed.
    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(StoreError::EmptyRoomId);
        }
        let unreserved = |c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~');
        // "." and ".." are rewritten away by URL normalization.
        if !trimmed.chars().all(unreserved) || trimmed.chars().all(|c| c == '.') {
            return Err(StoreError::InvalidRoomId(trimmed.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RoomId {
    type Error = StoreError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw)
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// File identifier, unique within a room and stable for the file's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(pub i64);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A named text buffer belonging to a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    pub id: FileId,
    pub filename: String,
    pub content: String,
}

impl File {
    pub fn new(id: i64, filename: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: FileId(id),
            filename: filename.into(),
            content: content.into(),
        }
    }
}

/// Caret position in editor coordinates.
///
/// Both fields are 1-based, the way editor widgets report them. Columns count
/// characters, not bytes. Editor widgets emit the line as `lineNumber`, so
/// that name is accepted when decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    #[serde(alias = "lineNumber")]
    pub line: u32,
    pub column: u32,
}

impl Position {
    pub const START: Position = Position { line: 1, column: 1 };

    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }

    /// Char index of this position inside `text`.
    ///
    /// Out-of-range lines and columns are clamped to the end of the text and
    /// the end of the line respectively.
    pub fn to_char_idx(self, text: RopeSlice<'_>) -> usize {
        let line = self.line.max(1) as usize - 1;
        if line >= text.len_lines() {
            return text.len_chars();
        }
        let column = (self.column.max(1) as usize - 1).min(line_len(text.line(line)));
        text.line_to_char(line) + column
    }

    /// Position of the char index `idx` inside `text`, clamped to the end of
    /// the text.
    pub fn from_char_idx(text: RopeSlice<'_>, idx: usize) -> Self {
        let idx = idx.min(text.len_chars());
        let line = text.char_to_line(idx);
        let column = idx - text.line_to_char(line);
        Self {
            line: line as u32 + 1,
            column: column as u32 + 1,
        }
    }
}

/// Chars in `line`, excluding its line break.
fn line_len(line: RopeSlice<'_>) -> usize {
    let mut len = line.len_chars();
    if len > 0 && line.char(len - 1) == '\n' {
        len -= 1;
    }
    if len > 0 && line.char(len - 1) == '\r' {
        len -= 1;
    }
    len
}

impl Default for Position {
    fn default() -> Self {
        Self::START
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}
