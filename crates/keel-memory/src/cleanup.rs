//! Keel Cleanup - Deferred Arena Cleanup Actions
//!
//! Handlers registered on an arena run when the arena is reset or destroyed,
//! most recently registered first. A handler may own a data span allocated
//! from the arena itself; it receives that span when it runs.
//!
//! @version 0.1.0
//! @author Keel Development Team

use crate::arena::{Arena, ArenaPtr};
use crate::buf::BufFile;
use keel_common::{FileId, KeelError, Result};
use std::sync::Arc;

// =============================================================================
// Types
// =============================================================================

/// Deferred action; receives the record's data span (empty if none).
pub type CleanupHandler = Box<dyn FnOnce(&mut [u8]) + Send>;

/// Handle to a registered cleanup record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CleanupId(usize);

pub(crate) struct Cleanup {
    data: Option<ArenaPtr>,
    handler: Option<CleanupHandler>,
    file: Option<FileId>,
}

// =============================================================================
// Arena Cleanup API
// =============================================================================

impl Arena {
    /// Register a cleanup record with `size` bytes of arena data.
    ///
    /// The record has no handler until one is set; records without a handler
    /// are skipped.
    pub fn add_cleanup(&mut self, size: usize) -> Result<CleanupId> {
        let data = if size > 0 { Some(self.alloc(size)?) } else { None };

        self.cleanups
            .try_reserve(1)
            .map_err(|_| KeelError::alloc(std::mem::size_of::<Cleanup>()))?;
        self.cleanups.push(Cleanup {
            data,
            handler: None,
            file: None,
        });

        tracing::trace!(arena = self.id().0, size, "add cleanup");
        Ok(CleanupId(self.cleanups.len() - 1))
    }

    /// Set (or replace) the handler of a cleanup record.
    pub fn set_cleanup_handler<F>(&mut self, id: CleanupId, handler: F)
    where
        F: FnOnce(&mut [u8]) + Send + 'static,
    {
        self.cleanups[id.0].handler = Some(Box::new(handler));
    }

    /// Data span of a cleanup record.
    pub fn cleanup_data_mut(&mut self, id: CleanupId) -> &mut [u8] {
        match self.cleanups[id.0].data {
            Some(ptr) => self.bytes_mut(ptr),
            None => &mut [],
        }
    }

    /// Register a handler without data.
    pub fn on_destroy<F>(&mut self, handler: F) -> Result<CleanupId>
    where
        F: FnOnce() + Send + 'static,
    {
        let id = self.add_cleanup(0)?;
        self.set_cleanup_handler(id, move |_| handler());
        Ok(id)
    }

    /// Keep `file` open until the arena goes away, optionally deleting it
    /// from disk at that point.
    pub fn add_file_cleanup(&mut self, file: Arc<BufFile>, delete: bool) -> Result<CleanupId> {
        let id = self.add_cleanup(0)?;
        self.cleanups[id.0].file = Some(file.id());

        self.set_cleanup_handler(id, move |_| {
            if delete {
                match std::fs::remove_file(file.path()) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => {
                        tracing::warn!(path = %file.path().display(), error = %e, "failed to delete file")
                    }
                }
            }
            tracing::trace!(file = file.id().0, "file cleanup");
        });
        Ok(id)
    }

    /// Run the file cleanup registered for `file` now instead of at destroy.
    ///
    /// Returns false if no pending cleanup refers to the file.
    pub fn run_file_cleanup(&mut self, file: FileId) -> bool {
        let found = self
            .cleanups
            .iter()
            .rposition(|c| c.file == Some(file) && c.handler.is_some());

        match found {
            Some(index) => {
                self.cleanups[index].file = None;
                self.run_cleanup(index);
                true
            }
            None => false,
        }
    }

    pub(crate) fn run_cleanups(&mut self) {
        let count = self.cleanups.len();
        for index in (0..count).rev() {
            self.run_cleanup(index);
        }
        self.cleanups.clear();

        if count > 0 {
            tracing::trace!(arena = self.id().0, count, "ran cleanups");
        }
    }

    fn run_cleanup(&mut self, index: usize) {
        let Some(handler) = self.cleanups[index].handler.take() else {
            return;
        };
        match self.cleanups[index].data {
            Some(ptr) => handler(self.bytes_mut(ptr)),
            None => handler(&mut []),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_cleanups_run_in_reverse_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut arena = Arena::new(1024).unwrap();

        for n in 0..3 {
            let order = Arc::clone(&order);
            arena.on_destroy(move || order.lock().push(n)).unwrap();
        }
        arena.destroy();

        assert_eq!(*order.lock(), vec![2, 1, 0]);
    }

    #[test]
    fn test_cleanup_receives_data() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut arena = Arena::new(1024).unwrap();

        let id = arena.add_cleanup(4).unwrap();
        arena.cleanup_data_mut(id).copy_from_slice(b"keel");
        let sink = Arc::clone(&seen);
        arena.set_cleanup_handler(id, move |data| sink.lock().extend_from_slice(data));

        // Without a handler this one is skipped.
        arena.add_cleanup(8).unwrap();

        arena.reset();
        assert_eq!(&*seen.lock(), b"keel");
        assert_eq!(arena.stats().cleanups, 0);

        drop(arena);
        assert_eq!(seen.lock().len(), 4);
    }

    #[test]
    fn test_run_file_cleanup_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spool");
        let file = Arc::new(BufFile::create(&path).unwrap());
        let id = file.id();

        let mut arena = Arena::new(1024).unwrap();
        arena.add_file_cleanup(Arc::clone(&file), true).unwrap();
        drop(file);

        assert!(arena.run_file_cleanup(id));
        assert!(!path.exists());
        assert!(!arena.run_file_cleanup(id));
        assert!(!arena.run_file_cleanup(FileId(u64::MAX)));
    }
}
