//! Keel List - Arena-Backed Segmented List
//!
//! Append-only list made of fixed-size parts. Unlike [`ArenaArray`] it never
//! moves elements: a full part stays where it is and a new part is chained
//! after it.
//!
//! [`ArenaArray`]: crate::array::ArenaArray
//!
//! @version 0.1.0
//! @author Keel Development Team

use crate::arena::{Arena, ArenaPtr};
use keel_common::{ArenaId, KeelError, Result};
use std::marker::PhantomData;
use std::mem::size_of;

#[derive(Debug, Clone, Copy)]
struct ListPart {
    storage: ArenaPtr,
    count: usize,
}

/// Segmented list living in an arena.
#[derive(Debug)]
pub struct ArenaList<T: Copy> {
    parts: Vec<ListPart>,
    nalloc: usize,
    arena: ArenaId,
    generation: u64,
    _marker: PhantomData<T>,
}

impl<T: Copy> ArenaList<T> {
    /// Create a list whose parts hold `n` elements each.
    pub fn create(arena: &mut Arena, n: usize) -> Result<Self> {
        let mut list = Self {
            parts: Vec::new(),
            nalloc: n.max(1),
            arena: arena.id(),
            generation: arena.generation(),
            _marker: PhantomData,
        };
        list.add_part(arena)?;
        Ok(list)
    }

    pub fn len(&self) -> usize {
        self.parts.iter().map(|p| p.count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.iter().all(|p| p.count == 0)
    }

    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    /// Append `value` to the last part, starting a new part when it is full.
    pub fn push(&mut self, arena: &mut Arena, value: T) -> Result<()> {
        self.check(arena);

        if self.parts.last().map_or(true, |p| p.count == self.nalloc) {
            self.add_part(arena)?;
        }

        let size = size_of::<T>();
        let Some(part) = self.parts.last_mut() else {
            return Err(KeelError::alloc(size));
        };

        let slot = part.storage.slice(part.count * size, size);
        let bytes = arena.bytes_mut(slot);
        // SAFETY: the slot is size_of::<T>() bytes of arena memory.
        unsafe { std::ptr::write_unaligned(bytes.as_mut_ptr() as *mut T, value) };
        part.count += 1;
        Ok(())
    }

    /// Elements in insertion order, part by part.
    pub fn iter<'a>(&'a self, arena: &'a Arena) -> impl Iterator<Item = T> + 'a {
        self.check(arena);
        let size = size_of::<T>();

        self.parts.iter().flat_map(move |part| {
            (0..part.count).map(move |i| {
                let bytes = arena.bytes(part.storage.slice(i * size, size));
                // SAFETY: slots below `count` were written by `push` in this
                // generation of the arena.
                unsafe { std::ptr::read_unaligned(bytes.as_ptr() as *const T) }
            })
        })
    }

    pub fn to_vec(&self, arena: &Arena) -> Vec<T> {
        self.iter(arena).collect()
    }

    fn add_part(&mut self, arena: &mut Arena) -> Result<()> {
        let bytes = self
            .nalloc
            .checked_mul(size_of::<T>())
            .ok_or_else(|| KeelError::alloc(usize::MAX))?;
        let storage = arena.alloc(bytes)?;

        self.parts
            .try_reserve(1)
            .map_err(|_| KeelError::alloc(size_of::<ListPart>()))?;
        self.parts.push(ListPart { storage, count: 0 });
        Ok(())
    }

    fn check(&self, arena: &Arena) {
        assert!(
            arena.id() == self.arena && arena.generation() == self.generation,
            "list used with a different arena or after reset"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_spans_parts() {
        let mut arena = Arena::new(1024).unwrap();
        let mut list = ArenaList::<u32>::create(&mut arena, 4).unwrap();
        assert!(list.is_empty());

        for i in 0..10 {
            list.push(&mut arena, i).unwrap();
        }

        assert_eq!(list.len(), 10);
        assert_eq!(list.part_count(), 3);
        assert_eq!(list.to_vec(&arena), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_parts_never_move() {
        let mut arena = Arena::new(1024).unwrap();
        let mut list = ArenaList::<u64>::create(&mut arena, 2).unwrap();
        list.push(&mut arena, 1).unwrap();
        let first = list.parts[0].storage;

        for i in 2..=7 {
            list.push(&mut arena, i).unwrap();
        }
        assert_eq!(list.parts[0].storage, first);
        assert_eq!(list.iter(&arena).sum::<u64>(), 28);
    }
}
