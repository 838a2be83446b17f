//! Keel Chain - Linked Buffer Chains
//!
//! Singly linked chains of buffers, stored as arena-owned links. Retired
//! links go onto the arena's free-link list and are reused before new ones
//! are allocated. Provides the primitives output pipelines are built from:
//! batch buffer creation, chain copying, tag-based recycling, file range
//! coalescing and post-send cursor accounting.
//!
//! @version 0.1.0
//! @author Keel Development Team

use crate::arena::{Arena, PAGE_SIZE};
use crate::buf::{Buf, BufId};
use keel_common::utils::align_down_u64;
use keel_common::{BufTag, KeelError, Result};

// =============================================================================
// Types
// =============================================================================

/// Handle to a chain link owned by an arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkId(pub(crate) usize);

/// One element of a buffer chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainLink {
    pub buf: BufId,
    pub next: Option<LinkId>,
}

/// Head of a chain; `None` is the empty chain.
pub type Chain = Option<LinkId>;

/// Iterator over the links of a chain.
pub struct ChainIter<'a> {
    arena: &'a Arena,
    next: Chain,
}

impl<'a> Iterator for ChainIter<'a> {
    type Item = LinkId;

    fn next(&mut self) -> Option<LinkId> {
        let id = self.next?;
        self.next = self.arena.link(id).next;
        Some(id)
    }
}

/// Result of scanning a run of contiguous file ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FileRun {
    pub len: u64,
    pub rest: Chain,
    pub truncated: bool,
}

// =============================================================================
// Link Management
// =============================================================================

impl Arena {
    pub fn link(&self, id: LinkId) -> &ChainLink {
        &self.links[id.0]
    }

    pub fn link_mut(&mut self, id: LinkId) -> &mut ChainLink {
        &mut self.links[id.0]
    }

    /// Buffer referenced by a link.
    pub fn link_buf(&self, id: LinkId) -> &Buf {
        self.buf(self.links[id.0].buf)
    }

    /// Get a link for `buf`, reusing a retired one when available.
    pub fn alloc_chain_link(&mut self, buf: BufId) -> Result<LinkId> {
        if let Some(id) = self.free_links {
            self.free_links = self.links[id.0].next;
            self.links[id.0] = ChainLink { buf, next: None };
            return Ok(id);
        }

        self.links
            .try_reserve(1)
            .map_err(|_| KeelError::alloc(std::mem::size_of::<ChainLink>()))?;
        self.links.push(ChainLink { buf, next: None });
        Ok(LinkId(self.links.len() - 1))
    }

    /// Retire a link onto the free-link list.
    pub fn retire_chain_link(&mut self, id: LinkId) {
        self.links[id.0].next = self.free_links;
        self.free_links = Some(id);
    }

    pub(crate) fn free_link_count(&self) -> usize {
        self.chain_iter(self.free_links).count()
    }

    // -------------------------------------------------------------------------
    // Chain Inspection
    // -------------------------------------------------------------------------

    pub fn chain_iter(&self, chain: Chain) -> ChainIter<'_> {
        ChainIter {
            arena: self,
            next: chain,
        }
    }

    pub fn chain_len(&self, chain: Chain) -> usize {
        self.chain_iter(chain).count()
    }

    pub fn chain_last(&self, chain: Chain) -> Option<LinkId> {
        self.chain_iter(chain).last()
    }

    /// Total pending bytes of every buffer in the chain.
    pub fn chain_size(&self, chain: Chain) -> u64 {
        self.chain_iter(chain).map(|id| self.link_buf(id).size()).sum()
    }

    /// Attach `other` to the tail of `chain`.
    pub fn chain_append(&mut self, chain: &mut Chain, other: Chain) {
        match self.chain_last(*chain) {
            Some(tail) => self.links[tail.0].next = other,
            None => *chain = other,
        }
    }

    // -------------------------------------------------------------------------
    // Chain Construction
    // -------------------------------------------------------------------------

    /// Create a chain of `count` writable buffers of `size` bytes each,
    /// carved from one contiguous allocation.
    pub fn create_buffer_batch(&mut self, count: usize, size: usize) -> Result<Chain> {
        if count == 0 {
            return Ok(None);
        }

        let total = count
            .checked_mul(size)
            .ok_or_else(|| KeelError::alloc(usize::MAX))?;
        let span = self.alloc(total)?;

        let mut head: Chain = None;
        let mut tail: Option<LinkId> = None;

        for i in 0..count {
            let buf = self.insert_buf(Buf::temporary(span.slice(i * size, size)))?;
            let link = self.alloc_chain_link(buf)?;
            match tail {
                Some(t) => self.links[t.0].next = Some(link),
                None => head = Some(link),
            }
            tail = Some(link);
        }

        Ok(head)
    }

    /// Append fresh links for every buffer of `input` to `chain`.
    ///
    /// The buffers are shared, not copied. On failure the chain stays
    /// terminated after the last link that was added.
    pub fn copy_chain(&mut self, chain: &mut Chain, input: Chain) -> Result<()> {
        let mut tail = self.chain_last(*chain);
        let mut cur = input;

        while let Some(id) = cur {
            let ChainLink { buf, next } = self.links[id.0];
            let link = self.alloc_chain_link(buf)?;

            match tail {
                Some(t) => self.links[t.0].next = Some(link),
                None => *chain = Some(link),
            }
            tail = Some(link);
            cur = next;
        }

        Ok(())
    }

    /// Pop a link from `free`, or allocate a new link with a zeroed buffer.
    pub fn get_recycled_or_new(&mut self, free: &mut Chain) -> Result<LinkId> {
        if let Some(id) = *free {
            *free = self.links[id.0].next;
            self.links[id.0].next = None;
            return Ok(id);
        }

        let buf = self.alloc_buf()?;
        self.alloc_chain_link(buf)
    }

    // -------------------------------------------------------------------------
    // Recycling
    // -------------------------------------------------------------------------

    /// Move `out` to the tail of `busy`, then drain fully consumed buffers
    /// from the head of `busy`.
    ///
    /// Drained buffers tagged `tag` are rewound and their links pushed onto
    /// `free`; other drained links are retired to the arena.
    pub fn update_chains(
        &mut self,
        free: &mut Chain,
        busy: &mut Chain,
        out: &mut Chain,
        tag: BufTag,
    ) {
        if let Some(head) = out.take() {
            self.chain_append(busy, Some(head));
        }

        while let Some(id) = *busy {
            let ChainLink { buf, next } = self.links[id.0];

            if self.bufs[buf.0].size() != 0 {
                break;
            }

            *busy = next;

            if self.bufs[buf.0].tag() != Some(tag) {
                self.retire_chain_link(id);
                continue;
            }

            self.bufs[buf.0].reset_window();
            self.links[id.0].next = *free;
            *free = Some(id);
        }
    }

    // -------------------------------------------------------------------------
    // Sending
    // -------------------------------------------------------------------------

    /// Sum the run of contiguous file ranges at the head of `chain`, up to
    /// `limit` bytes, and advance `chain` past the run.
    ///
    /// When the limit cuts a range, the cut is moved back to a page boundary
    /// if that boundary lies inside the range; the cut link is left as the
    /// new head.
    pub fn coalesce_file_span(&self, chain: &mut Chain, limit: u64) -> u64 {
        let run = self.file_run(*chain, limit);
        *chain = run.rest;
        run.len
    }

    pub(crate) fn file_run(&self, chain: Chain, limit: u64) -> FileRun {
        let mut run = FileRun {
            len: 0,
            rest: chain,
            truncated: false,
        };

        let Some(head) = chain else {
            return run;
        };
        let Some(fd) = self.link_buf(head).file_id() else {
            return run;
        };

        let mut cur = Some(head);
        while let Some(id) = cur {
            let buf = self.link_buf(id);
            let pos = buf.file_pos();
            let mut size = buf.file_last() - pos;

            if size > limit - run.len {
                size = limit - run.len;

                let aligned = align_down_u64(pos + size, PAGE_SIZE as u64);
                if aligned > pos {
                    size = aligned - pos;
                }

                run.len += size;
                run.truncated = true;
                break;
            }

            run.len += size;
            let end = pos + size;
            cur = self.links[id.0].next;

            let Some(next) = cur else {
                break;
            };
            let next = self.link_buf(next);
            let contiguous = next.in_file()
                && next.file_id() == Some(fd)
                && next.file_pos() == end
                && run.len < limit;
            if !contiguous {
                break;
            }
        }

        run.rest = cur;
        run
    }

    /// Consume `sent` bytes from the head of `chain`; returns the first link
    /// that still has pending data.
    ///
    /// Markers are skipped. The returned link may be partially consumed.
    pub fn advance_sent(&mut self, chain: Chain, sent: u64) -> Chain {
        let mut sent = sent;
        let mut cur = chain;

        while let Some(id) = cur {
            let ChainLink { buf, next } = self.links[id.0];
            let buf = &mut self.bufs[buf.0];

            if buf.is_special() {
                cur = next;
                continue;
            }

            if sent == 0 {
                break;
            }

            let size = buf.size();
            if sent >= size {
                sent -= size;
                buf.consume();
                cur = next;
                continue;
            }

            buf.advance(sent);
            break;
        }

        cur
    }
}

// =============================================================================
// Tests
// =============================================================================
