//! Keel Writer - Chain Output
//!
//! Sends buffer chains to a sink without copying memory payloads. The writer
//! keeps the chain of not yet sent buffers between calls, so a sink that
//! would block simply leaves the remainder for the next call.
//!
//! Key Features:
//! - `SendChain` abstraction over the transport
//! - Per-call byte limit
//! - Contiguous file ranges batched into a single read/write run
//! - Resumption after partial sends
//!
//! @version 0.1.0
//! @author Keel Development Team

use crate::arena::Arena;
use crate::buf::BufFile;
use crate::chain::Chain;
use keel_common::config::OutputConfig;
use keel_common::Result;
use std::io::{self, Write};

const FILE_CHUNK_SIZE: usize = 64 * 1024;

// =============================================================================
// Send Abstraction
// =============================================================================

/// Transport that accepts buffer chains.
pub trait SendChain {
    /// Send up to `limit` bytes from the head of `chain`; returns the number
    /// of bytes accepted. Must not move any buffer cursor.
    fn send_chain(&mut self, arena: &Arena, chain: Chain, limit: u64) -> io::Result<u64>;
}

/// Outcome of a write call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    /// Everything was sent.
    Done,
    /// Data remains; call again when the sink can accept more.
    Again,
}

// =============================================================================
// Chain Writer
// =============================================================================

/// Output context holding the chain of pending buffers.
#[derive(Debug)]
pub struct ChainWriter {
    pending: Chain,
    limit: u64,
    sent: u64,
}

impl ChainWriter {
    /// Create a writer sending at most `limit` bytes per call (0: no limit).
    pub fn new(limit: u64) -> Self {
        Self {
            pending: None,
            limit: if limit == 0 { u64::MAX } else { limit },
            sent: 0,
        }
    }

    pub fn from_config(config: &OutputConfig) -> Self {
        Self::new(config.send_limit)
    }

    /// Buffers not fully sent yet.
    pub fn pending(&self) -> Chain {
        self.pending
    }

    pub fn total_sent(&self) -> u64 {
        self.sent
    }

    /// Queue `input` behind the pending buffers and send as much as the sink
    /// and the limit allow.
    pub fn write<S: SendChain>(
        &mut self,
        arena: &mut Arena,
        input: Chain,
        sink: &mut S,
    ) -> Result<WriteStatus> {
        arena.copy_chain(&mut self.pending, input)?;

        if self.pending.is_none() {
            return Ok(WriteStatus::Done);
        }

        let sent = sink.send_chain(arena, self.pending, self.limit)?;
        self.sent += sent;

        let mut rest = arena.advance_sent(self.pending, sent);
        while let Some(id) = rest {
            let buf = arena.link_buf(id);
            if buf.size() != 0 || buf.is_special() {
                break;
            }
            rest = arena.link(id).next;
        }

        let mut cur = self.pending;
        while cur != rest {
            let Some(id) = cur else {
                break;
            };
            cur = arena.link(id).next;
            arena.retire_chain_link(id);
        }
        self.pending = rest;

        tracing::trace!(sent, total = self.sent, done = rest.is_none(), "chain write");

        if self.pending.is_none() {
            Ok(WriteStatus::Done)
        } else {
            Ok(WriteStatus::Again)
        }
    }
}

// =============================================================================
// I/O Sink
// =============================================================================

/// `SendChain` over any [`Write`] implementation.
///
/// `WouldBlock` from the writer ends the send early with the bytes written
/// so far; other errors are returned.
#[derive(Debug)]
pub struct IoSink<W> {
    inner: W,
    scratch: Vec<u8>,
}

impl<W: Write> IoSink<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            scratch: Vec::new(),
        }
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }

    fn write_some(&mut self, data: &[u8]) -> io::Result<usize> {
        write_some(&mut self.inner, data)
    }

    fn send_file(&mut self, file: &BufFile, offset: u64, len: u64) -> io::Result<u64> {
        if self.scratch.len() < FILE_CHUNK_SIZE {
            self.scratch.resize(FILE_CHUNK_SIZE, 0);
        }

        let mut done = 0u64;
        while done < len {
            let want = (len - done).min(FILE_CHUNK_SIZE as u64) as usize;
            let n = file.read_at(offset + done, &mut self.scratch[..want])?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("{} is shorter than its buffers", file.path().display()),
                ));
            }

            let written = write_some(&mut self.inner, &self.scratch[..n])?;
            done += written as u64;
            if written < n {
                break;
            }
        }
        Ok(done)
    }
}

fn write_some<W: Write>(inner: &mut W, data: &[u8]) -> io::Result<usize> {
    let mut done = 0;
    while done < data.len() {
        match inner.write(&data[done..]) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => done += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) => return Err(e),
        }
    }
    Ok(done)
}

impl<W: Write> SendChain for IoSink<W> {
    fn send_chain(&mut self, arena: &Arena, chain: Chain, limit: u64) -> io::Result<u64> {
        let mut sent = 0u64;
        let mut cur = chain;

        while let Some(id) = cur {
            if sent >= limit {
                break;
            }

            let buf = arena.link_buf(id);
            let next = arena.link(id).next;

            if buf.is_special() {
                cur = next;
                continue;
            }

            if buf.in_memory() {
                let data = arena.buf_data(arena.link(id).buf);
                let want = (data.len() as u64).min(limit - sent) as usize;
                let n = self.write_some(&data[..want])?;
                sent += n as u64;
                if n < data.len() {
                    break;
                }
                cur = next;
                continue;
            }

            if buf.in_file() {
                let run = arena.file_run(cur, limit - sent);
                let Some(file) = buf.file() else {
                    break;
                };
                let n = self.send_file(file, buf.file_pos(), run.len)?;
                sent += n;
                if n < run.len || run.truncated {
                    break;
                }
                cur = run.rest;
                continue;
            }

            cur = next;
        }

        Ok(sent)
    }
}

// =============================================================================
// Tests
// =============================================================================
