//! Keel Types - Core Identifier Types
//!
//! Small type-safe identifiers shared by the memory core and its callers.
//!
//! @version 0.1.0
//! @author Keel Development Team

use std::sync::atomic::{AtomicU64, Ordering};

// =============================================================================
// Identifier Types
// =============================================================================

/// Opaque owner identifier carried by a buffer.
///
/// A drained buffer is recycled onto a coordinator's free chain only when its
/// tag matches the coordinator's tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufTag(pub u64);

/// Process-unique identifier of an arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArenaId(pub u64);

/// Process-unique identifier of an open file referenced by buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId(pub u64);

static NEXT_ARENA_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_FILE_ID: AtomicU64 = AtomicU64::new(1);

impl ArenaId {
    /// Allocate the next arena identifier.
    pub fn next() -> Self {
        ArenaId(NEXT_ARENA_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl FileId {
    /// Allocate the next file identifier.
    pub fn next() -> Self {
        FileId(NEXT_FILE_ID.fetch_add(1, Ordering::Relaxed))
    }
}
