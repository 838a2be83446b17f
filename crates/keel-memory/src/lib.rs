//! Keel Memory - Arena Allocation and Zero-Copy Buffers
//!
//! Region-based memory management for per-request work, plus the buffer and
//! chain types that move data through output stages without copying it.
//!
//! Key Features:
//! - Arena allocator with small/large tiers and deferred cleanups
//! - Arena-backed growable arrays and segmented lists
//! - Memory and file buffers linked into recyclable chains
//! - Chain writer with file range coalescing and partial-send resumption
//! - Shared pool of reusable arenas
//!
//! @version 0.1.0
//! @author Keel Development Team

pub mod arena;
pub mod array;
pub mod buf;
pub mod chain;
pub mod chain_set;
pub mod cleanup;
pub mod list;
pub mod pool;
pub mod writer;

pub use arena::{Arena, ArenaPtr, ArenaStats};
pub use array::ArenaArray;
pub use buf::{Backing, Buf, BufFile, BufFlags, BufId, MemKind};
pub use chain::{Chain, ChainLink, LinkId};
pub use chain_set::ChainSet;
pub use cleanup::{CleanupHandler, CleanupId};
pub use list::ArenaList;
pub use pool::{ArenaPool, PoolStats, PooledArena};
pub use writer::{ChainWriter, IoSink, SendChain, WriteStatus};
