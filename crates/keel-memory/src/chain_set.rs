//! Keel Chain Set - Output Buffer Coordination
//!
//! Tracks the three chains an output stage works with: `out` holds buffers
//! queued for the next send, `busy` holds buffers handed to the sink that
//! are not fully consumed yet, and `free` holds drained buffers owned by this
//! stage, ready for reuse. Buffer allocation is bounded by a budget.
//!
//! @version 0.1.0
//! @author Keel Development Team

use crate::arena::Arena;
use crate::buf::BufId;
use crate::chain::{Chain, LinkId};
use keel_common::config::BufsConfig;
use keel_common::{BufTag, Result};

/// Free/busy/out chains of one output stage.
#[derive(Debug)]
pub struct ChainSet {
    tag: BufTag,
    bufs: BufsConfig,
    allocated: usize,
    free: Chain,
    busy: Chain,
    out: Chain,
    out_tail: Option<LinkId>,
}

impl ChainSet {
    /// Create a chain set with the default buffer budget.
    pub fn new(tag: BufTag) -> Self {
        Self::with_bufs(tag, BufsConfig::default())
    }

    pub fn with_bufs(tag: BufTag, bufs: BufsConfig) -> Self {
        Self {
            tag,
            bufs,
            allocated: 0,
            free: None,
            busy: None,
            out: None,
            out_tail: None,
        }
    }

    pub fn tag(&self) -> BufTag {
        self.tag
    }

    pub fn free(&self) -> Chain {
        self.free
    }

    pub fn busy(&self) -> Chain {
        self.busy
    }

    pub fn out(&self) -> Chain {
        self.out
    }

    /// Buffers allocated against the budget so far.
    pub fn allocated(&self) -> usize {
        self.allocated
    }

    /// True when nothing is queued or in flight.
    pub fn is_idle(&self) -> bool {
        self.busy.is_none() && self.out.is_none()
    }

    /// Get a writable buffer: a recycled one from `free`, or a new one while
    /// the budget allows. Returns `None` when the budget is exhausted.
    pub fn acquire_buf(&mut self, arena: &mut Arena) -> Result<Option<LinkId>> {
        if self.free.is_some() {
            return arena.get_recycled_or_new(&mut self.free).map(Some);
        }

        if self.allocated >= self.bufs.num {
            tracing::trace!(tag = self.tag.0, num = self.bufs.num, "output buffers exhausted");
            return Ok(None);
        }

        let buf = arena.new_memory_buffer(self.bufs.size)?;
        let desc = arena.buf_mut(buf);
        desc.flags.recycled = true;
        desc.set_tag(self.tag);

        let link = arena.alloc_chain_link(buf)?;
        self.allocated += 1;
        Ok(Some(link))
    }

    /// Pop a recycled link from `free`, or allocate a zeroed buffer outside
    /// the budget.
    pub fn get_recycled_or_new(&mut self, arena: &mut Arena) -> Result<LinkId> {
        arena.get_recycled_or_new(&mut self.free)
    }

    /// Queue `buf` behind everything already in `out`.
    pub fn queue(&mut self, arena: &mut Arena, buf: BufId) -> Result<LinkId> {
        let link = arena.alloc_chain_link(buf)?;
        self.queue_link(arena, link);
        Ok(link)
    }

    /// Queue an existing single link.
    pub fn queue_link(&mut self, arena: &mut Arena, link: LinkId) {
        arena.link_mut(link).next = None;
        match self.out_tail {
            Some(tail) => arena.link_mut(tail).next = Some(link),
            None => self.out = Some(link),
        }
        self.out_tail = Some(link);
    }

    /// Queue fresh links for every buffer of `chain`.
    pub fn queue_chain(&mut self, arena: &mut Arena, chain: Chain) -> Result<()> {
        for id in arena.chain_iter(chain).collect::<Vec<_>>() {
            let buf = arena.link(id).buf;
            self.queue(arena, buf)?;
        }
        Ok(())
    }

    /// Hand the queued buffers over: `out` moves to the tail of `busy`.
    ///
    /// Returns the buffers that were queued.
    pub fn dispatch(&mut self, arena: &mut Arena) -> Chain {
        let out = self.out.take();
        self.out_tail = None;
        arena.chain_append(&mut self.busy, out);
        out
    }

    /// Dispatch and drain consumed buffers from `busy` in one step.
    pub fn update(&mut self, arena: &mut Arena) {
        self.out_tail = None;
        arena.update_chains(&mut self.free, &mut self.busy, &mut self.out, self.tag);
    }

    /// Drain consumed buffers from the head of `busy`; returns how many.
    pub fn reclaim(&mut self, arena: &mut Arena) -> usize {
        let before = arena.chain_len(self.busy);
        let mut out = None;
        arena.update_chains(&mut self.free, &mut self.busy, &mut out, self.tag);
        before - arena.chain_len(self.busy)
    }

    /// Pending bytes in `busy`.
    pub fn busy_bytes(&self, arena: &Arena) -> u64 {
        arena.chain_size(self.busy)
    }
}

// =============================================================================
// Tests
// =============================================================================
