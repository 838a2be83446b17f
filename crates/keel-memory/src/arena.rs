//! Keel Arena - Region-Based Memory Allocation
//!
//! Bump allocator owning a list of equally sized blocks. Small requests are
//! carved from the tail of a block; requests above the arena's threshold are
//! served individually by the system allocator and tracked as large records.
//! Everything is released together when the arena is reset or destroyed.
//!
//! Key Features:
//! - O(1) small allocation via cursor bumping
//! - Bounded block search: blocks that keep failing are skipped
//! - Large allocations with tombstoned, reusable record slots
//! - Bulk reset for reuse, destroy with deferred cleanups
//! - Handle-based access (`ArenaPtr`) instead of raw addresses
//!
//! @version 0.1.0
//! @author Keel Development Team

use crate::buf::Buf;
use crate::chain::{ChainLink, LinkId};
use crate::cleanup::Cleanup;
use keel_common::config::ArenaConfig;
use keel_common::utils::align_up;
use keel_common::{ArenaId, KeelError, Result};
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;

// =============================================================================
// Constants
// =============================================================================

/// Alignment of aligned small allocations.
pub const ALIGNMENT: usize = std::mem::size_of::<usize>();
/// Alignment of every block.
pub const ARENA_ALIGNMENT: usize = 16;
pub const PAGE_SIZE: usize = 4096;

/// Bytes reserved at the start of the first block for the arena header.
pub const ARENA_HEADER_SIZE: usize = 80;
/// Bytes reserved at the start of every additional block.
pub const BLOCK_HEADER_SIZE: usize = 32;
/// Small-path cost of one large allocation record.
pub const LARGE_RECORD_SIZE: usize = 16;
pub const MIN_ARENA_SIZE: usize =
    align_up(2 * LARGE_RECORD_SIZE, ARENA_ALIGNMENT) + ARENA_HEADER_SIZE;

const LARGE_SLOT_SCAN: usize = 4;
const BLOCK_FAILURE_LIMIT: u32 = 4;

// =============================================================================
// Arena Pointer
// =============================================================================

/// Handle to a span of bytes owned by an arena.
///
/// Handles are plain values. They stay memory-safe after a reset (the blocks
/// are retained) but then refer to reclaimed space; a handle to a freed large
/// allocation panics on access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArenaPtr {
    region: Region,
    offset: usize,
    len: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Region {
    Block(usize),
    Large { slot: usize, id: u64 },
}

impl ArenaPtr {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Offset of the first byte inside its block or large allocation.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Offset one past the last byte.
    pub fn end(&self) -> usize {
        self.offset + self.len
    }

    /// Index of the owning block, `None` for large allocations.
    pub fn block(&self) -> Option<usize> {
        match self.region {
            Region::Block(index) => Some(index),
            Region::Large { .. } => None,
        }
    }

    pub fn is_large(&self) -> bool {
        matches!(self.region, Region::Large { .. })
    }

    /// Sub-span of `len` bytes starting `start` bytes into this span.
    ///
    /// # Panics
    ///
    /// Panics if the sub-span does not fit.
    pub fn slice(&self, start: usize, len: usize) -> ArenaPtr {
        assert!(
            start.checked_add(len).is_some_and(|end| end <= self.len),
            "sub-span {}+{} exceeds span of {} bytes",
            start,
            len,
            self.len
        );
        ArenaPtr {
            region: self.region,
            offset: self.offset + start,
            len,
        }
    }
}

// =============================================================================
// Memory Block
// =============================================================================

struct Block {
    data: NonNull<u8>,
    size: usize,
    start: usize,
    last: usize,
    failed: u32,
}

impl Block {
    fn new(size: usize, header: usize) -> Option<Self> {
        let layout = Layout::from_size_align(size, ARENA_ALIGNMENT).ok()?;
        let ptr = unsafe { alloc_zeroed(layout) };
        let data = NonNull::new(ptr)?;

        Some(Self {
            data,
            size,
            start: header,
            last: header,
            failed: 0,
        })
    }

    fn allocate(&mut self, size: usize, aligned: bool) -> Option<usize> {
        let m = if aligned {
            align_up(self.last, ALIGNMENT)
        } else {
            self.last
        };

        if m <= self.size && self.size - m >= size {
            self.last = m + size;
            return Some(m);
        }
        None
    }

    fn remaining(&self) -> usize {
        self.size - self.last
    }

    fn reset(&mut self) {
        self.last = self.start;
        self.failed = 0;
    }

    fn raw(&self, offset: usize, len: usize) -> *mut u8 {
        assert!(offset + len <= self.size, "span outside of block");
        unsafe { self.data.as_ptr().add(offset) }
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        if let Ok(layout) = Layout::from_size_align(self.size, ARENA_ALIGNMENT) {
            unsafe {
                dealloc(self.data.as_ptr(), layout);
            }
        }
    }
}

// SAFETY: a block exclusively owns its allocation.
unsafe impl Send for Block {}

// =============================================================================
// Large Allocation
// =============================================================================

struct LargeAlloc {
    id: u64,
    data: NonNull<u8>,
    layout: Layout,
}

impl LargeAlloc {
    fn new(id: u64, size: usize, align: usize) -> Option<Self> {
        let layout = Layout::from_size_align(size, align).ok()?;
        let ptr = unsafe { alloc_zeroed(layout) };
        let data = NonNull::new(ptr)?;
        Some(Self { id, data, layout })
    }

    fn size(&self) -> usize {
        self.layout.size()
    }

    fn raw(&self, offset: usize, len: usize) -> *mut u8 {
        assert!(offset + len <= self.layout.size(), "span outside of large allocation");
        unsafe { self.data.as_ptr().add(offset) }
    }
}

impl Drop for LargeAlloc {
    fn drop(&mut self) {
        unsafe {
            dealloc(self.data.as_ptr(), self.layout);
        }
    }
}

// SAFETY: a large allocation exclusively owns its memory.
unsafe impl Send for LargeAlloc {}

// =============================================================================
// Statistics
// =============================================================================

/// Snapshot of an arena's memory usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArenaStats {
    pub blocks: usize,
    pub current_block: usize,
    pub block_bytes: usize,
    pub used_bytes: usize,
    pub large_allocations: usize,
    pub large_bytes: usize,
    pub cleanups: usize,
    pub bufs: usize,
    pub links: usize,
    pub free_links: usize,
}

// =============================================================================
// Arena
// =============================================================================

/// Region allocator for one unit of work.
///
/// An arena is used by one execution context at a time; it is `Send` so whole
/// arenas can move between threads, but it is not shared.
pub struct Arena {
    id: ArenaId,
    generation: u64,
    blocks: Vec<Block>,
    current: usize,
    max: usize,
    large: Vec<Option<LargeAlloc>>,
    next_large_id: u64,
    memory_limit: Option<usize>,
    reserved: usize,
    pub(crate) cleanups: Vec<Cleanup>,
    pub(crate) bufs: Vec<Buf>,
    pub(crate) links: Vec<ChainLink>,
    pub(crate) free_links: Option<LinkId>,
}

impl Arena {
    /// Create an arena whose blocks are `size` bytes each.
    pub fn new(size: usize) -> Result<Self> {
        Self::with_config(&ArenaConfig::with_size(size))
    }

    /// Create an arena from configuration.
    pub fn with_config(config: &ArenaConfig) -> Result<Self> {
        let size = config.size.max(MIN_ARENA_SIZE);
        if size != config.size {
            tracing::warn!(
                requested = config.size,
                size,
                "arena size raised to the minimum"
            );
        }

        if config.memory_limit.is_some_and(|limit| size > limit) {
            return Err(KeelError::alloc(size));
        }

        let block = Block::new(size, ARENA_HEADER_SIZE).ok_or_else(|| {
            tracing::error!(size, "arena allocation failed");
            KeelError::alloc(size)
        })?;

        let usable = size - ARENA_HEADER_SIZE;
        let max = config.max_small_alloc.unwrap_or(PAGE_SIZE).min(usable);

        let arena = Self {
            id: ArenaId::next(),
            generation: 0,
            blocks: vec![block],
            current: 0,
            max,
            large: Vec::new(),
            next_large_id: 0,
            memory_limit: config.memory_limit,
            reserved: size,
            cleanups: Vec::new(),
            bufs: Vec::new(),
            links: Vec::new(),
            free_links: None,
        };

        tracing::debug!(arena = arena.id.0, size, max, "create arena");
        Ok(arena)
    }

    pub fn id(&self) -> ArenaId {
        self.id
    }

    /// Number of resets so far; typed containers use it to detect stale use.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Largest request served from the blocks.
    pub fn max_small_alloc(&self) -> usize {
        self.max
    }

    /// Total size of every block.
    pub fn block_size(&self) -> usize {
        self.blocks[0].size
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Index of the first block searched by small allocations.
    pub fn current_block(&self) -> usize {
        self.current
    }

    /// Bytes currently reserved from the system (blocks plus live large).
    pub fn reserved_bytes(&self) -> usize {
        self.reserved
    }

    // -------------------------------------------------------------------------
    // Allocation
    // -------------------------------------------------------------------------

    /// Allocate `size` bytes aligned to [`ALIGNMENT`].
    pub fn alloc(&mut self, size: usize) -> Result<ArenaPtr> {
        self.alloc_with(size, true)
    }

    /// Allocate `size` bytes without aligning the cursor first.
    pub fn alloc_unaligned(&mut self, size: usize) -> Result<ArenaPtr> {
        self.alloc_with(size, false)
    }

    /// Allocate `size` zero-filled bytes.
    pub fn calloc(&mut self, size: usize) -> Result<ArenaPtr> {
        let ptr = self.alloc(size)?;
        self.bytes_mut(ptr).fill(0);
        Ok(ptr)
    }

    /// Allocate `size` bytes, routed by the small/large threshold.
    pub fn alloc_with(&mut self, size: usize, aligned: bool) -> Result<ArenaPtr> {
        if size <= self.max {
            return self.alloc_small(size, aligned);
        }
        self.alloc_large(size)
    }

    /// Allocate `size` bytes on the large path with an explicit alignment.
    pub fn alloc_aligned_large(&mut self, size: usize, alignment: usize) -> Result<ArenaPtr> {
        let large = self.new_large(size, alignment)?;
        self.push_large(large, size)
    }

    /// Release a large allocation before the arena goes away.
    pub fn free_large(&mut self, ptr: ArenaPtr) -> Result<()> {
        if let Region::Large { slot, id } = ptr.region {
            if let Some(entry) = self.large.get_mut(slot) {
                if entry.as_ref().is_some_and(|large| large.id == id) {
                    if let Some(large) = entry.take() {
                        self.reserved -= large.size();
                        tracing::trace!(arena = self.id.0, id, "free large allocation");
                    }
                    return Ok(());
                }
            }
        }
        Err(KeelError::NotFound(format!(
            "no live large allocation at {:?}",
            ptr
        )))
    }

    fn alloc_small(&mut self, size: usize, aligned: bool) -> Result<ArenaPtr> {
        for index in self.current..self.blocks.len() {
            if let Some(offset) = self.blocks[index].allocate(size, aligned) {
                return Ok(ArenaPtr {
                    region: Region::Block(index),
                    offset,
                    len: size,
                });
            }
        }
        self.alloc_block(size)
    }

    fn alloc_block(&mut self, size: usize) -> Result<ArenaPtr> {
        let psize = self.blocks[0].size;
        self.reserve(psize)?;

        if self.blocks.try_reserve(1).is_err() {
            self.reserved -= psize;
            return Err(KeelError::alloc(psize));
        }

        let mut block = match Block::new(psize, align_up(BLOCK_HEADER_SIZE, ALIGNMENT)) {
            Some(block) => block,
            None => {
                self.reserved -= psize;
                tracing::error!(arena = self.id.0, size = psize, "block allocation failed");
                return Err(KeelError::alloc(psize));
            }
        };

        let offset = block.last;
        block.last = offset + size;

        // Blocks that keep failing stop being searched.
        for index in self.current..self.blocks.len() - 1 {
            let failed = self.blocks[index].failed;
            self.blocks[index].failed += 1;
            if failed > BLOCK_FAILURE_LIMIT {
                self.current = index + 1;
            }
        }

        self.blocks.push(block);
        tracing::debug!(
            arena = self.id.0,
            blocks = self.blocks.len(),
            current = self.current,
            "arena grew a block"
        );

        Ok(ArenaPtr {
            region: Region::Block(self.blocks.len() - 1),
            offset,
            len: size,
        })
    }

    fn alloc_large(&mut self, size: usize) -> Result<ArenaPtr> {
        let large = self.new_large(size, ALIGNMENT)?;
        let id = large.id;

        let len = self.large.len();
        for slot in (len.saturating_sub(LARGE_SLOT_SCAN)..len).rev() {
            if self.large[slot].is_none() {
                self.large[slot] = Some(large);
                return Ok(ArenaPtr {
                    region: Region::Large { slot, id },
                    offset: 0,
                    len: size,
                });
            }
        }

        self.push_large(large, size)
    }

    fn new_large(&mut self, size: usize, align: usize) -> Result<LargeAlloc> {
        let bytes = size.max(1);
        self.reserve(bytes)?;

        let id = self.next_large_id;
        self.next_large_id += 1;

        match LargeAlloc::new(id, bytes, align.max(1)) {
            Some(large) => {
                tracing::trace!(arena = self.id.0, id, size, "large allocation");
                Ok(large)
            }
            None => {
                self.reserved -= bytes;
                tracing::error!(arena = self.id.0, size, align, "large allocation failed");
                Err(KeelError::alloc(size))
            }
        }
    }

    fn push_large(&mut self, large: LargeAlloc, size: usize) -> Result<ArenaPtr> {
        // The record itself is paid for on the small path.
        let record = self.alloc_small(LARGE_RECORD_SIZE, true).and_then(|_| {
            self.large
                .try_reserve(1)
                .map_err(|_| KeelError::alloc(LARGE_RECORD_SIZE))
        });

        if let Err(e) = record {
            self.reserved -= large.size();
            return Err(e);
        }

        let id = large.id;
        let slot = self.large.len();
        self.large.push(Some(large));

        Ok(ArenaPtr {
            region: Region::Large { slot, id },
            offset: 0,
            len: size,
        })
    }

    fn reserve(&mut self, bytes: usize) -> Result<()> {
        let reserved = self
            .reserved
            .checked_add(bytes)
            .ok_or_else(|| KeelError::alloc(bytes))?;

        if let Some(limit) = self.memory_limit {
            if reserved > limit {
                tracing::debug!(
                    arena = self.id.0,
                    reserved = self.reserved,
                    bytes,
                    limit,
                    "arena memory limit reached"
                );
                return Err(KeelError::alloc(bytes));
            }
        }
        self.reserved = reserved;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Frontier Operations
    // -------------------------------------------------------------------------

    /// Returns true if `ptr` ends exactly at its block's cursor.
    pub fn is_frontier(&self, ptr: ArenaPtr) -> bool {
        match ptr.region {
            Region::Block(index) => self.blocks[index].last == ptr.end(),
            Region::Large { .. } => false,
        }
    }

    /// Grow `ptr` by `extra` bytes if it is the frontier of its block and the
    /// block has room.
    pub(crate) fn extend_in_place(&mut self, ptr: ArenaPtr, extra: usize) -> Option<ArenaPtr> {
        let Region::Block(index) = ptr.region else {
            return None;
        };

        let block = &mut self.blocks[index];
        if block.last != ptr.end() || block.remaining() < extra {
            return None;
        }

        block.last += extra;
        Some(ArenaPtr {
            len: ptr.len + extra,
            ..ptr
        })
    }

    /// Hand the bytes of `ptr` back to its block if it is the frontier.
    pub(crate) fn retract(&mut self, ptr: ArenaPtr) -> bool {
        let Region::Block(index) = ptr.region else {
            return false;
        };

        let block = &mut self.blocks[index];
        if block.last != ptr.end() {
            return false;
        }
        block.last = ptr.offset;
        true
    }

    // -------------------------------------------------------------------------
    // Byte Access
    // -------------------------------------------------------------------------

    fn raw(&self, ptr: ArenaPtr) -> *mut u8 {
        match ptr.region {
            Region::Block(index) => self.blocks[index].raw(ptr.offset, ptr.len),
            Region::Large { slot, id } => match self.large.get(slot) {
                Some(Some(large)) if large.id == id => large.raw(ptr.offset, ptr.len),
                _ => panic!("stale large allocation handle (id {})", id),
            },
        }
    }

    /// Read access to the bytes of `ptr`.
    ///
    /// # Panics
    ///
    /// Panics if `ptr` refers to a freed large allocation.
    pub fn bytes(&self, ptr: ArenaPtr) -> &[u8] {
        let data = self.raw(ptr);
        unsafe { std::slice::from_raw_parts(data, ptr.len) }
    }

    /// Write access to the bytes of `ptr`.
    ///
    /// # Panics
    ///
    /// Panics if `ptr` refers to a freed large allocation.
    pub fn bytes_mut(&mut self, ptr: ArenaPtr) -> &mut [u8] {
        let data = self.raw(ptr);
        unsafe { std::slice::from_raw_parts_mut(data, ptr.len) }
    }

    /// Copy the bytes of `src` to the start of `dst`.
    pub(crate) fn copy_span(&mut self, src: ArenaPtr, dst: ArenaPtr) {
        assert!(src.len <= dst.len, "copy destination too small");
        if src.len == 0 {
            return;
        }
        let from = self.raw(src);
        let to = self.raw(dst);
        unsafe { std::ptr::copy(from, to, src.len) }
    }

    // -------------------------------------------------------------------------
    // Reset
    // -------------------------------------------------------------------------

    /// Reclaim everything allocated so far while keeping the blocks.
    ///
    /// Pending cleanups run first since their data lives in reclaimed space.
    /// File cleanups included: an arena handed back through
    /// [`ArenaPool::release`](crate::ArenaPool::release) closes its registered
    /// files at release time, not when the pooled arena is finally destroyed.
    pub fn reset(&mut self) {
        self.run_cleanups();
        self.release_large();

        for block in &mut self.blocks {
            block.reset();
        }

        self.current = 0;
        self.generation += 1;
        self.bufs.clear();
        self.links.clear();
        self.free_links = None;

        tracing::debug!(arena = self.id.0, blocks = self.blocks.len(), "reset arena");
    }

    /// Run cleanups and release all memory.
    pub fn destroy(self) {
        drop(self);
    }

    fn release_large(&mut self) {
        for large in self.large.drain(..).flatten() {
            self.reserved -= large.size();
            tracing::trace!(arena = self.id.0, id = large.id, "free large allocation");
        }
    }

    // -------------------------------------------------------------------------
    // Statistics
    // -------------------------------------------------------------------------

    /// Snapshot of the arena's memory usage.
    pub fn stats(&self) -> ArenaStats {
        let live_large = self.large.iter().flatten();
        ArenaStats {
            blocks: self.blocks.len(),
            current_block: self.current,
            block_bytes: self.blocks.iter().map(|b| b.size).sum(),
            used_bytes: self.blocks.iter().map(|b| b.last - b.start).sum(),
            large_allocations: live_large.clone().count(),
            large_bytes: live_large.map(|l| l.size()).sum(),
            cleanups: self.cleanups.len(),
            bufs: self.bufs.len(),
            links: self.links.len(),
            free_links: self.free_link_count(),
        }
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        self.run_cleanups();

        self.bufs.clear();
        self.links.clear();
        self.free_links = None;
        self.release_large();

        for (index, block) in self.blocks.iter().enumerate() {
            tracing::trace!(
                arena = self.id.0,
                block = index,
                unused = block.remaining(),
                "free block"
            );
        }
        tracing::debug!(arena = self.id.0, blocks = self.blocks.len(), "destroy arena");
        self.blocks.clear();
    }
}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("id", &self.id)
            .field("max", &self.max)
            .field("stats", &self.stats())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn limited(size: usize, limit: usize) -> Arena {
        Arena::with_config(&ArenaConfig {
            size,
            max_small_alloc: None,
            memory_limit: Some(limit),
        })
        .unwrap()
    }

    #[test]
    fn test_arena_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<Arena>();
    }

    #[test]
    fn test_threshold() {
        let arena = Arena::new(4096).unwrap();
        assert_eq!(arena.max_small_alloc(), 4096 - ARENA_HEADER_SIZE);

        let arena = Arena::new(64 * 1024).unwrap();
        assert_eq!(arena.max_small_alloc(), PAGE_SIZE);

        let arena = Arena::with_config(&ArenaConfig {
            size: 64 * 1024,
            max_small_alloc: Some(512),
            memory_limit: None,
        })
        .unwrap();
        assert_eq!(arena.max_small_alloc(), 512);
    }

    #[test]
    fn test_minimum_size() {
        let arena = Arena::new(1).unwrap();
        assert_eq!(arena.block_size(), MIN_ARENA_SIZE);
    }

    #[test]
    fn test_small_allocations_disjoint_and_increasing() {
        let mut arena = Arena::new(4096).unwrap();
        let mut prev: Option<ArenaPtr> = None;

        for size in [1, 7, 8, 33, 100, 250, 3, 512] {
            let ptr = arena.alloc(size).unwrap();
            assert_eq!(ptr.block(), Some(0));
            assert_eq!(ptr.len(), size);
            if let Some(prev) = prev {
                assert!(ptr.offset() >= prev.end());
            }
            prev = Some(ptr);
        }
        assert_eq!(arena.block_count(), 1);
    }

    #[test]
    fn test_aligned_and_unaligned() {
        let mut arena = Arena::new(4096).unwrap();

        let a = arena.alloc_unaligned(3).unwrap();
        let b = arena.alloc_unaligned(5).unwrap();
        assert_eq!(b.offset(), a.end());

        let c = arena.alloc(16).unwrap();
        assert_eq!(c.offset() % ALIGNMENT, 0);
        assert_eq!(arena.bytes(c).as_ptr() as usize % ALIGNMENT, 0);
    }

    #[test]
    fn test_large_path_ignores_tail_space() {
        let mut arena = Arena::with_config(&ArenaConfig {
            size: 64 * 1024,
            max_small_alloc: Some(256),
            memory_limit: None,
        })
        .unwrap();

        let ptr = arena.alloc(257).unwrap();
        assert!(ptr.is_large());
        assert_eq!(arena.stats().large_allocations, 1);

        let ptr = arena.alloc(256).unwrap();
        assert!(!ptr.is_large());
    }

    #[test]
    fn test_reset_rewinds_to_fresh_position() {
        let fresh_offset = Arena::new(4096).unwrap().alloc(24).unwrap().offset();

        let mut arena = Arena::new(4096).unwrap();
        for _ in 0..20 {
            arena.alloc(900).unwrap();
        }
        arena.alloc(8000).unwrap();
        assert!(arena.block_count() > 1);

        arena.reset();
        let ptr = arena.alloc(24).unwrap();
        assert_eq!(ptr.block(), Some(0));
        assert_eq!(ptr.offset(), fresh_offset);
        assert_eq!(arena.current_block(), 0);
        assert_eq!(arena.stats().large_allocations, 0);
        assert_eq!(arena.stats().used_bytes, 24);
    }

    #[test]
    fn test_block_growth_is_uniform() {
        let mut arena = Arena::new(1024).unwrap();
        for _ in 0..10 {
            arena.alloc(700).unwrap();
        }
        let stats = arena.stats();
        assert_eq!(stats.blocks, 10);
        assert_eq!(stats.block_bytes, 10 * 1024);
    }

    #[test]
    fn test_current_skips_failing_blocks() {
        let mut arena = Arena::new(256).unwrap();
        assert_eq!(arena.max_small_alloc(), 176);

        for _ in 0..7 {
            arena.alloc(170).unwrap();
        }
        assert_eq!(arena.block_count(), 7);
        assert_eq!(arena.current_block(), 0);

        // The first block has already failed five times when the seventh
        // growth visits it.
        arena.alloc(170).unwrap();
        assert_eq!(arena.block_count(), 8);
        assert_eq!(arena.current_block(), 1);

        arena.alloc(170).unwrap();
        assert_eq!(arena.block_count(), 9);
        assert_eq!(arena.current_block(), 2);

        // Skipped blocks are no longer searched even when they have room.
        let ptr = arena.alloc(4).unwrap();
        assert_eq!(ptr.block(), Some(2));
    }

    #[test]
    fn test_oversized_request_fails() {
        let mut arena = Arena::new(4096).unwrap();
        assert!(arena.alloc(usize::MAX).unwrap_err().is_allocation_failure());
        assert!(arena.alloc(usize::MAX - 100).unwrap_err().is_allocation_failure());
        assert!(arena
            .alloc_aligned_large(usize::MAX, 8)
            .unwrap_err()
            .is_allocation_failure());
        assert_eq!(arena.reserved_bytes(), 4096);

        let mut arena = limited(4096, 64 * 1024);
        assert!(arena.alloc(usize::MAX).unwrap_err().is_allocation_failure());
        assert!(arena
            .alloc_aligned_large(usize::MAX, 8)
            .unwrap_err()
            .is_allocation_failure());
        assert_eq!(arena.reserved_bytes(), 4096);
        assert_eq!(arena.stats().large_allocations, 0);

        // The arena stays usable afterwards.
        assert!(arena.alloc(5000).unwrap().is_large());
    }

    #[test]
    fn test_large_slot_reuse_is_tombstoned() {
        let mut arena = Arena::new(1024).unwrap();

        let a = arena.alloc(5000).unwrap();
        let b = arena.alloc(6000).unwrap();
        arena.bytes_mut(b)[0] = 42;

        arena.free_large(a).unwrap();
        let c = arena.alloc(7000).unwrap();

        // Same record slot, new allocation: the old handle stays dead.
        assert_eq!(arena.large.len(), 2);
        assert!(matches!(arena.free_large(a), Err(KeelError::NotFound(_))));
        assert_eq!(arena.bytes(c).len(), 7000);
        assert_eq!(arena.bytes(b)[0], 42);
    }

    #[test]
    fn test_free_large_not_found() {
        let mut arena = Arena::new(1024).unwrap();
        let small = arena.alloc(10).unwrap();
        assert!(matches!(arena.free_large(small), Err(KeelError::NotFound(_))));

        let large = arena.alloc(2000).unwrap();
        arena.free_large(large).unwrap();
        assert!(arena.free_large(large).is_err());
    }

    #[test]
    #[should_panic(expected = "stale large allocation")]
    fn test_freed_large_access_panics() {
        let mut arena = Arena::new(1024).unwrap();
        let large = arena.alloc(2000).unwrap();
        arena.free_large(large).unwrap();
        let _ = arena.bytes(large);
    }

    #[test]
    fn test_alloc_aligned_large() {
        let mut arena = Arena::new(4096).unwrap();
        let ptr = arena.alloc_aligned_large(100, 4096).unwrap();
        assert!(ptr.is_large());
        assert_eq!(arena.bytes(ptr).as_ptr() as usize % 4096, 0);
    }

    #[test]
    fn test_memory_limit() {
        let mut arena = limited(1024, 2048);
        arena.alloc(900).unwrap();
        arena.alloc(900).unwrap();
        let err = arena.alloc(900).unwrap_err();
        assert!(err.is_allocation_failure());
        assert_eq!(arena.block_count(), 2);
    }

    #[test]
    fn test_large_record_failure_releases_memory() {
        let mut arena = limited(256, 256 + 300);
        arena.alloc(170).unwrap();

        // Large memory fits the limit, the record's new block does not.
        let err = arena.alloc(250).unwrap_err();
        assert!(err.is_allocation_failure());

        let stats = arena.stats();
        assert_eq!(stats.large_allocations, 0);
        assert_eq!(stats.blocks, 1);
        assert_eq!(arena.reserved_bytes(), 256);
    }

    #[test]
    fn test_calloc_zeroes_reused_space() {
        let mut arena = Arena::new(1024).unwrap();
        let ptr = arena.alloc(64).unwrap();
        arena.bytes_mut(ptr).fill(0xAB);

        arena.reset();
        let zeroed = arena.calloc(64).unwrap();
        assert_eq!(zeroed.offset(), ptr.offset());
        assert!(arena.bytes(zeroed).iter().all(|&b| b == 0));
    }

    #[test]
    fn test_extend_and_retract() {
        let mut arena = Arena::new(1024).unwrap();
        let ptr = arena.alloc(16).unwrap();
        assert!(arena.is_frontier(ptr));

        let grown = arena.extend_in_place(ptr, 16).unwrap();
        assert_eq!(grown.len(), 32);

        let other = arena.alloc(8).unwrap();
        assert!(arena.extend_in_place(grown, 8).is_none());
        assert!(!arena.retract(grown));
        assert!(arena.retract(other));
        assert!(arena.retract(grown));
        assert_eq!(arena.stats().used_bytes, 0);
    }
}
