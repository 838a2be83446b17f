//! Keel Pool - Shared Pool of Idle Arenas
//!
//! Keeps reset arenas around so a new unit of work can start without going
//! back to the system allocator. The pool is shared between threads; each
//! arena handed out is owned by exactly one unit of work.
//!
//! Key Features:
//! - Reuse of reset arenas, blocks retained
//! - Bounded number of idle arenas
//! - RAII checkout that returns the arena on drop
//! - Usage statistics
//!
//! @version 0.1.0
//! @author Keel Development Team

use crate::arena::Arena;
use keel_common::config::{ArenaConfig, KeelConfig, PoolConfig};
use keel_common::Result;
use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};

// =============================================================================
// Pool Statistics
// =============================================================================

/// Statistics about pool usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub created: u64,
    pub reused: u64,
    pub discarded: u64,
    pub idle: usize,
}

// =============================================================================
// Arena Pool
// =============================================================================

/// Thread-safe pool of idle arenas.
pub struct ArenaPool {
    config: ArenaConfig,
    max_idle: usize,
    idle: Mutex<Vec<Arena>>,
    stats: Mutex<PoolStats>,
}

impl ArenaPool {
    pub fn new(config: ArenaConfig, pool: &PoolConfig) -> Self {
        Self {
            config,
            max_idle: pool.max_idle,
            idle: Mutex::new(Vec::new()),
            stats: Mutex::new(PoolStats::default()),
        }
    }

    pub fn from_config(config: &KeelConfig) -> Self {
        Self::new(config.arena.clone(), &config.pool)
    }

    /// Take an idle arena, or create one.
    pub fn acquire(&self) -> Result<Arena> {
        if let Some(arena) = self.idle.lock().pop() {
            self.stats.lock().reused += 1;
            return Ok(arena);
        }

        let arena = Arena::with_config(&self.config)?;
        self.stats.lock().created += 1;
        Ok(arena)
    }

    /// Reset `arena` and keep it for reuse, or destroy it if the pool is full.
    pub fn release(&self, mut arena: Arena) {
        arena.reset();

        let rejected = {
            let mut idle = self.idle.lock();
            if idle.len() < self.max_idle {
                idle.push(arena);
                None
            } else {
                Some(arena)
            }
        };

        if let Some(arena) = rejected {
            self.stats.lock().discarded += 1;
            tracing::debug!(arena = arena.id().0, "pool full, destroying arena");
            arena.destroy();
        }
    }

    /// Acquire an arena that goes back to the pool when dropped.
    pub fn checkout(&self) -> Result<PooledArena<'_>> {
        Ok(PooledArena {
            pool: self,
            arena: Some(self.acquire()?),
        })
    }

    /// Destroy every idle arena.
    pub fn clear(&self) {
        let idle = std::mem::take(&mut *self.idle.lock());
        tracing::debug!(count = idle.len(), "clearing arena pool");
        drop(idle);
    }

    pub fn stats(&self) -> PoolStats {
        let mut stats = *self.stats.lock();
        stats.idle = self.idle.lock().len();
        stats
    }
}

impl std::fmt::Debug for ArenaPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArenaPool")
            .field("config", &self.config)
            .field("max_idle", &self.max_idle)
            .field("stats", &self.stats())
            .finish()
    }
}

// =============================================================================
// Pooled Arena
// =============================================================================

/// Arena checked out of an [`ArenaPool`].
pub struct PooledArena<'a> {
    pool: &'a ArenaPool,
    arena: Option<Arena>,
}

impl PooledArena<'_> {
    /// Keep the arena instead of returning it to the pool.
    pub fn detach(mut self) -> Option<Arena> {
        self.arena.take()
    }
}

impl Deref for PooledArena<'_> {
    type Target = Arena;

    fn deref(&self) -> &Arena {
        match &self.arena {
            Some(arena) => arena,
            None => unreachable!("pooled arena already detached"),
        }
    }
}

impl DerefMut for PooledArena<'_> {
    fn deref_mut(&mut self) -> &mut Arena {
        match &mut self.arena {
            Some(arena) => arena,
            None => unreachable!("pooled arena already detached"),
        }
    }
}

impl Drop for PooledArena<'_> {
    fn drop(&mut self) {
        if let Some(arena) = self.arena.take() {
            self.pool.release(arena);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buf::BufFile;
    use std::sync::Arc;

    fn pool(max_idle: usize) -> ArenaPool {
        ArenaPool::new(ArenaConfig::with_size(1024), &PoolConfig { max_idle })
    }

    #[test]
    fn test_acquire_and_reuse() {
        let pool = pool(4);

        let mut arena = pool.acquire().unwrap();
        let id = arena.id();
        arena.alloc(5000).unwrap();
        pool.release(arena);

        let arena = pool.acquire().unwrap();
        assert_eq!(arena.id(), id);
        assert_eq!(arena.stats().large_allocations, 0);
        assert_eq!(arena.stats().used_bytes, 0);

        let stats = pool.stats();
        assert_eq!(stats.created, 1);
        assert_eq!(stats.reused, 1);
        assert_eq!(stats.idle, 0);
    }

    #[test]
    fn test_full_pool_discards() {
        let pool = pool(1);
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        pool.release(a);
        pool.release(b);

        let stats = pool.stats();
        assert_eq!(stats.created, 2);
        assert_eq!(stats.discarded, 1);
        assert_eq!(stats.idle, 1);

        pool.clear();
        assert_eq!(pool.stats().idle, 0);
    }

    #[test]
    fn test_checkout_returns_on_drop() {
        let pool = pool(2);
        {
            let mut arena = pool.checkout().unwrap();
            arena.alloc(64).unwrap();
        }
        assert_eq!(pool.stats().idle, 1);

        let arena = pool.checkout().unwrap().detach();
        assert!(arena.is_some());
        assert_eq!(pool.stats().idle, 0);
    }

    #[test]
    fn test_release_runs_file_cleanups() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spool");
        let pool = pool(2);

        let mut arena = pool.acquire().unwrap();
        let file = Arc::new(BufFile::create(&path).unwrap());
        arena.add_file_cleanup(file, true).unwrap();
        assert_eq!(arena.stats().cleanups, 1);

        // The idle arena keeps its blocks but not its registered files.
        pool.release(arena);
        assert!(!path.exists());

        let arena = pool.acquire().unwrap();
        assert_eq!(arena.stats().cleanups, 0);
    }

    #[test]
    fn test_shared_between_threads() {
        let pool = Arc::new(pool(8));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        let mut arena = pool.checkout().unwrap();
                        let ptr = arena.alloc(128).unwrap();
                        arena.bytes_mut(ptr).fill(1);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let stats = pool.stats();
        assert_eq!(stats.created + stats.reused, 200);
        assert!(stats.created <= 4);
    }
}
