//! End-to-end tests for Keel arena and buffer pipelines
//!
//! Exercises the arena, containers, chain recycling and chain writer
//! together, the way an output stage drives them for one request.

use bytes::Bytes;
use keel_common::config::{ArenaConfig, BufsConfig};
use keel_common::BufTag;
use keel_memory::{
    Arena, ArenaArray, Buf, BufFile, BufId, Chain, ChainSet, ChainWriter, IoSink, WriteStatus,
};
use std::io::{self, Write};
use std::sync::Arc;

const TAG: BufTag = BufTag(0x6b65656c);

fn chain_of(arena: &mut Arena, bufs: &[BufId]) -> Chain {
    let mut chain = None;
    for &buf in bufs {
        let link = arena.alloc_chain_link(buf).unwrap();
        arena.chain_append(&mut chain, Some(link));
    }
    chain
}

fn bufs_of(arena: &Arena, chain: Chain) -> Vec<BufId> {
    arena.chain_iter(chain).map(|id| arena.link(id).buf).collect()
}

/// Writer that accepts a fixed number of bytes per round.
struct RoundLimited {
    out: Vec<u8>,
    per_round: usize,
    left: usize,
}

impl RoundLimited {
    fn new(per_round: usize) -> Self {
        Self {
            out: Vec::new(),
            per_round,
            left: per_round,
        }
    }

    fn next_round(&mut self) {
        self.left = self.per_round;
    }
}

impl Write for RoundLimited {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.left == 0 {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = buf.len().min(self.left);
        self.out.extend_from_slice(&buf[..n]);
        self.left -= n;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// =============================================================================
// Arena
// =============================================================================

#[test]
fn test_reset_matches_fresh_arena() {
    let mut fresh = Arena::new(2048).unwrap();
    let expected = fresh.alloc(100).unwrap();

    let mut arena = Arena::new(2048).unwrap();
    for size in [10, 200, 1500, 1800, 3000, 40] {
        arena.alloc(size).unwrap();
    }
    arena.on_destroy(|| {}).unwrap();
    arena.reset();

    let ptr = arena.alloc(100).unwrap();
    assert_eq!(ptr.block(), expected.block());
    assert_eq!(ptr.offset(), expected.offset());
}

#[test]
fn test_memory_limit_failure_leaves_no_free_links() {
    let mut arena = Arena::with_config(&ArenaConfig {
        size: 1024,
        max_small_alloc: None,
        memory_limit: Some(1024),
    })
    .unwrap();

    let err = arena.create_buffer_batch(4, 512).unwrap_err();
    assert!(err.is_allocation_failure());
    assert!(!err.is_recoverable());

    let stats = arena.stats();
    assert_eq!(stats.links, 0);
    assert_eq!(stats.free_links, 0);
    assert_eq!(stats.large_allocations, 0);
}

#[test]
fn test_array_values_survive_growth() {
    let mut arena = Arena::new(512).unwrap();
    let mut array = ArenaArray::<(u32, u16)>::create(&mut arena, 1).unwrap();

    for i in 0..300u32 {
        array.push(&mut arena, (i, (i % 7) as u16)).unwrap();
        // Interleaved allocations keep the array off the frontier.
        if i % 5 == 0 {
            arena.alloc(3).unwrap();
        }
    }

    for i in 0..300u32 {
        assert_eq!(array.get(&arena, i as usize), Some((i, (i % 7) as u16)));
    }
}

// =============================================================================
// Chains
// =============================================================================

#[test]
fn test_request_lifecycle() {
    let mut arena = Arena::new(4096).unwrap();
    for _ in 0..3 {
        let span = arena.alloc(1000).unwrap();
        assert_eq!(span.block(), Some(0));
    }

    let batch = arena.create_buffer_batch(3, 100).unwrap();
    for (i, id) in bufs_of(&arena, batch).into_iter().enumerate() {
        arena.buf_mut(id).set_tag(TAG);
        assert_eq!(arena.buf_write(id, &[b'a' + i as u8; 100]), 100);
    }
    let bufs = bufs_of(&arena, batch);

    let mut free = None;
    let mut busy = None;
    let mut out = batch;
    arena.update_chains(&mut free, &mut busy, &mut out, TAG);
    assert_eq!(out, None);
    assert_eq!(arena.chain_len(busy), 3);
    assert_eq!(free, None);

    let rest = arena.advance_sent(busy, 250);
    assert_eq!(rest.map(|id| arena.link(id).buf), Some(bufs[2]));
    assert_eq!(arena.buf(bufs[0]).size(), 0);
    assert_eq!(arena.buf(bufs[1]).size(), 0);
    assert_eq!(arena.buf_data(bufs[2]), &[b'c'; 50][..]);

    arena.update_chains(&mut free, &mut busy, &mut out, TAG);
    let recycled = bufs_of(&arena, free);
    assert_eq!(recycled.len(), 2);
    assert!(recycled.contains(&bufs[0]) && recycled.contains(&bufs[1]));
    assert_eq!(bufs_of(&arena, busy), vec![bufs[2]]);

    // Nothing changed since: a second update is a no-op.
    arena.update_chains(&mut free, &mut busy, &mut out, TAG);
    assert_eq!(arena.chain_len(free), 2);
    assert_eq!(bufs_of(&arena, busy), vec![bufs[2]]);
    for id in bufs_of(&arena, free) {
        assert_eq!(arena.buf(id).size(), 0);
    }
}

#[test]
fn test_advance_sent_bounds() {
    let mut arena = Arena::new(4096).unwrap();
    let a = arena.insert_buf(Buf::shared(Bytes::from_static(b"abc"))).unwrap();
    let flush = arena.insert_buf(Buf::flush_marker()).unwrap();
    let b = arena.new_memory_buffer(8).unwrap();
    arena.buf_write(b, b"defgh");
    let chain = chain_of(&mut arena, &[a, flush, b]);

    let rest = arena.advance_sent(chain, 0);
    assert_eq!(rest, chain);
    assert_eq!(arena.chain_size(chain), 8);

    let total = arena.chain_size(chain);
    assert_eq!(arena.advance_sent(chain, total), None);
    assert_eq!(arena.buf(a).size(), 0);
    assert_eq!(arena.buf(b).size(), 0);
}

#[test]
fn test_coalesce_contiguous_file_ranges() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    let file = Arc::new(BufFile::open(tmp.path()).unwrap());
    let mut arena = Arena::new(4096).unwrap();

    let ids: Vec<BufId> = [(0, 4096), (4096, 8192), (9000, 10000)]
        .into_iter()
        .map(|(start, end)| {
            arena
                .insert_buf(Buf::file_range(Arc::clone(&file), start..end))
                .unwrap()
        })
        .collect();
    let chain = chain_of(&mut arena, &ids);

    let mut cursor = chain;
    assert_eq!(arena.coalesce_file_span(&mut cursor, 100_000), 8192);
    assert_eq!(cursor.map(|id| arena.link(id).buf), Some(ids[2]));
}

// =============================================================================
// Writer
// =============================================================================

#[test]
fn test_mixed_chain_through_throttled_sink() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("payload");
    let payload: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
    std::fs::write(&path, &payload).unwrap();
    let file = Arc::new(BufFile::open(&path).unwrap());

    let mut arena = Arena::new(4096).unwrap();
    arena.add_file_cleanup(Arc::clone(&file), false).unwrap();

    let head = arena.insert_buf(Buf::shared(Bytes::from_static(b"HEADER\n"))).unwrap();
    let body = [
        Buf::file_range(Arc::clone(&file), 0..8000),
        Buf::file_range(Arc::clone(&file), 8000..20_000),
    ];
    let mut ids = vec![head];
    for buf in body {
        ids.push(arena.insert_buf(buf).unwrap());
    }
    ids.push(arena.insert_buf(Buf::last_marker()).unwrap());
    let input = chain_of(&mut arena, &ids);

    let mut writer = ChainWriter::new(0);
    let mut sink = IoSink::new(RoundLimited::new(3000));

    let mut status = writer.write(&mut arena, input, &mut sink).unwrap();
    let mut rounds = 1;
    while status == WriteStatus::Again {
        sink.get_mut().next_round();
        status = writer.write(&mut arena, None, &mut sink).unwrap();
        rounds += 1;
        assert!(rounds < 100);
    }

    let mut expected = b"HEADER\n".to_vec();
    expected.extend_from_slice(&payload);
    assert_eq!(sink.get_ref().out, expected);
    assert_eq!(writer.total_sent(), expected.len() as u64);
    assert_eq!(rounds, (expected.len() + 2999) / 3000);
}

#[test]
fn test_send_limit_stops_on_page_boundary() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("big");
    std::fs::write(&path, vec![7u8; 30_000]).unwrap();
    let file = Arc::new(BufFile::open(&path).unwrap());

    let mut arena = Arena::new(4096).unwrap();
    let buf = arena.insert_buf(Buf::file_range(file, 100..30_000)).unwrap();
    let input = chain_of(&mut arena, &[buf]);

    let mut writer = ChainWriter::new(10_000);
    let mut sink = IoSink::new(Vec::new());

    assert_eq!(writer.write(&mut arena, input, &mut sink).unwrap(), WriteStatus::Again);
    assert_eq!(arena.buf(buf).file_pos(), 8192);
    assert_eq!(sink.get_ref().len(), 8092);

    while writer.write(&mut arena, None, &mut sink).unwrap() == WriteStatus::Again {}
    assert_eq!(sink.get_ref().len(), 29_900);
}

#[test]
fn test_budgeted_copy_loop() {
    let source: Vec<u8> = (0..10_000u32).map(|i| (i % 97) as u8).collect();
    let mut arena = Arena::new(16 * 1024).unwrap();
    let mut set = ChainSet::with_bufs(TAG, BufsConfig { num: 2, size: 1024 });
    let mut writer = ChainWriter::new(0);
    let mut sink = IoSink::new(RoundLimited::new(1500));

    let mut offset = 0;
    while offset < source.len() || !set.is_idle() {
        while offset < source.len() {
            let Some(link) = set.acquire_buf(&mut arena).unwrap() else {
                break;
            };
            let buf = arena.link(link).buf;
            offset += arena.buf_write(buf, &source[offset..]);
            set.queue_link(&mut arena, link);
        }

        let out = set.dispatch(&mut arena);
        writer.write(&mut arena, out, &mut sink).unwrap();
        set.reclaim(&mut arena);
        sink.get_mut().next_round();
    }

    assert_eq!(sink.get_ref().out, source);
    assert_eq!(set.allocated(), 2);
    assert!(writer.pending().is_none());
}
