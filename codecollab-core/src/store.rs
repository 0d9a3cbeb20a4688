//! Client-side room state: the ordered file collection and the active file.
//!
//! The store does not know where a change came from. Local edits and remote
//! `code` messages both land in [`RoomStore::update_file_content`]; deciding
//! whether a change should be re-broadcast is done a layer above.

use crate::{File, FileId};

/// Store errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("unknown file id {0}")]
    UnknownFile(FileId),
    #[error("file id {0} already exists in this room")]
    DuplicateFile(FileId),
    #[error("room id must not be blank")]
    EmptyRoomId,
    #[error("room id {0:?} is not a valid path segment")]
    InvalidRoomId(String),
}

/// Open files of one room plus this client's active selection.
#[derive(Debug, Default, Clone)]
pub struct RoomStore {
    files: Vec<File>,
    active: Option<FileId>,
}

impl RoomStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the entire file collection.
    ///
    /// The active selection survives only if the active file is still present.
    pub fn load(&mut self, files: Vec<File>) {
        log::debug!("Loading {} files into room store", files.len());
        self.files = files;
        if let Some(active) = self.active {
            if self.get(active).is_none() {
                self.active = None;
            }
        }
    }

    /// Change which file is active. Content is never touched.
    pub fn set_active(&mut self, id: FileId) -> Result<(), StoreError> {
        if self.get(id).is_none() {
            return Err(StoreError::UnknownFile(id));
        }
        self.active = Some(id);
        Ok(())
    }

    /// Replace a file's content. Returns `false` when the id is unknown, in
    /// which case nothing changes.
    pub fn update_file_content(&mut self, id: FileId, content: impl Into<String>) -> bool {
        match self.files.iter_mut().find(|f| f.id == id) {
            Some(file) => {
                file.content = content.into();
                true
            }
            None => false,
        }
    }

    /// Append a file and make it active.
    pub fn add_file(&mut self, file: File) -> Result<(), StoreError> {
        if self.get(file.id).is_some() {
            return Err(StoreError::DuplicateFile(file.id));
        }
        self.active = Some(file.id);
        self.files.push(file);
        Ok(())
    }

    pub fn get_active(&self) -> Option<&File> {
        self.active.and_then(|id| self.get(id))
    }

    pub fn active_id(&self) -> Option<FileId> {
        self.active
    }

    pub fn get(&self, id: FileId) -> Option<&File> {
        self.files.iter().find(|f| f.id == id)
    }

    pub fn files(&self) -> &[File] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
