//! Keel Array - Arena-Backed Growable Array
//!
//! Contiguous array of `Copy` elements stored in arena memory. When full it
//! grows in place if its storage is the frontier of its block, otherwise it
//! moves to a span twice as large. The old storage is simply abandoned to
//! the arena.
//!
//! @version 0.1.0
//! @author Keel Development Team

use crate::arena::{Arena, ArenaPtr};
use keel_common::{ArenaId, KeelError, Result};
use std::marker::PhantomData;
use std::mem::size_of;

/// Arena bytes taken by an array header created with [`ArenaArray::create`].
pub const ARRAY_HEADER_SIZE: usize = 40;

/// Growable array living in an arena.
///
/// The array is bound to the arena and generation it was created in; using
/// it with another arena or after a reset panics.
#[derive(Debug)]
pub struct ArenaArray<T: Copy> {
    header: Option<ArenaPtr>,
    storage: ArenaPtr,
    count: usize,
    capacity: usize,
    arena: ArenaId,
    generation: u64,
    _marker: PhantomData<T>,
}

impl<T: Copy> ArenaArray<T> {
    /// Allocate a header and storage for `n` elements.
    pub fn create(arena: &mut Arena, n: usize) -> Result<Self> {
        let header = arena.alloc(ARRAY_HEADER_SIZE)?;
        let mut array = Self::init(arena, n)?;
        array.header = Some(header);
        Ok(array)
    }

    /// Allocate storage for `n` elements only.
    pub fn init(arena: &mut Arena, n: usize) -> Result<Self> {
        let bytes = Self::bytes_for(n)?;
        let storage = arena.alloc(bytes)?;

        Ok(Self {
            header: None,
            storage,
            count: 0,
            capacity: n,
            arena: arena.id(),
            generation: arena.generation(),
            _marker: PhantomData,
        })
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn storage(&self) -> ArenaPtr {
        self.storage
    }

    /// Append `value`; returns its index.
    pub fn push(&mut self, arena: &mut Arena, value: T) -> Result<usize> {
        self.check(arena);

        if self.count == self.capacity {
            let doubled = self.capacity.saturating_mul(2).max(1);
            self.grow(arena, 1, doubled)?;
        }

        let index = self.count;
        self.write(arena, index, value);
        self.count += 1;
        Ok(index)
    }

    /// Append every element of `values`; returns the index of the first.
    pub fn push_n(&mut self, arena: &mut Arena, values: &[T]) -> Result<usize> {
        self.check(arena);

        let n = values.len();
        if self.count + n > self.capacity {
            let doubled = n.max(self.capacity).saturating_mul(2);
            self.grow(arena, n, doubled)?;
        }

        let first = self.count;
        for (i, value) in values.iter().enumerate() {
            self.write(arena, first + i, *value);
        }
        self.count += n;
        Ok(first)
    }

    pub fn get(&self, arena: &Arena, index: usize) -> Option<T> {
        self.check(arena);
        (index < self.count).then(|| self.read(arena, index))
    }

    /// Overwrite the element at `index`; returns false if out of range.
    pub fn set(&self, arena: &mut Arena, index: usize, value: T) -> bool {
        self.check(arena);
        if index >= self.count {
            return false;
        }
        self.write(arena, index, value);
        true
    }

    pub fn iter<'a>(&'a self, arena: &'a Arena) -> impl Iterator<Item = T> + 'a {
        self.check(arena);
        (0..self.count).map(move |i| self.read(arena, i))
    }

    pub fn to_vec(&self, arena: &Arena) -> Vec<T> {
        self.iter(arena).collect()
    }

    /// Give the storage, then the header, back to the arena if they sit at
    /// the frontier of their block. Otherwise nothing happens.
    pub fn destroy(self, arena: &mut Arena) {
        if arena.id() != self.arena || arena.generation() != self.generation {
            return;
        }
        if arena.retract(self.storage) {
            if let Some(header) = self.header {
                arena.retract(header);
            }
        }
    }

    fn grow(&mut self, arena: &mut Arena, extra: usize, new_capacity: usize) -> Result<()> {
        let extra_bytes = Self::bytes_for(extra)?;
        if let Some(grown) = arena.extend_in_place(self.storage, extra_bytes) {
            self.storage = grown;
            self.capacity += extra;
            return Ok(());
        }

        let storage = arena.alloc(Self::bytes_for(new_capacity)?)?;
        let used = self.storage.slice(0, self.count * size_of::<T>());
        arena.copy_span(used, storage);

        tracing::trace!(
            from = self.capacity,
            to = new_capacity,
            "array moved to new storage"
        );
        self.storage = storage;
        self.capacity = new_capacity;
        Ok(())
    }

    fn bytes_for(n: usize) -> Result<usize> {
        n.checked_mul(size_of::<T>())
            .ok_or_else(|| KeelError::alloc(usize::MAX))
    }

    fn check(&self, arena: &Arena) {
        assert!(
            arena.id() == self.arena && arena.generation() == self.generation,
            "array used with a different arena or after reset"
        );
    }

    fn slot(&self, index: usize) -> ArenaPtr {
        let size = size_of::<T>();
        self.storage.slice(index * size, size)
    }

    fn read(&self, arena: &Arena, index: usize) -> T {
        let bytes = arena.bytes(self.slot(index));
        // SAFETY: the slot is size_of::<T>() bytes holding a value written by
        // `write` in this generation of the arena.
        unsafe { std::ptr::read_unaligned(bytes.as_ptr() as *const T) }
    }

    fn write(&self, arena: &mut Arena, index: usize, value: T) {
        let bytes = arena.bytes_mut(self.slot(index));
        // SAFETY: the slot is size_of::<T>() bytes of arena memory.
        unsafe { std::ptr::write_unaligned(bytes.as_mut_ptr() as *mut T, value) }
    }
}

// =============================================================================
// Tests
// =============================================================================
