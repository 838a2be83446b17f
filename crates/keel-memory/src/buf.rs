//! Keel Buffer - Zero-Copy Data Descriptors
//!
//! A buffer describes data without owning a copy of it: a window over arena
//! memory or a shared immutable region, a byte range of an open file, or
//! both at once. Buffers without any data act as markers (flush, sync, last).
//!
//! Key Features:
//! - Memory windows over arena spans or `bytes::Bytes` regions
//! - File ranges over shared open files
//! - Shadow links to the buffer a derived buffer was produced from
//! - Owner tags used for recycling
//!
//! @version 0.1.0
//! @author Keel Development Team

use crate::arena::{Arena, ArenaPtr};
use bytes::Bytes;
use keel_common::{BufTag, FileId, KeelError, Result};
use std::fs::{File, OpenOptions};
use std::io;
use std::ops::Range;
use std::path::{Path, PathBuf};

// =============================================================================
// Buffer File
// =============================================================================

/// Open file shared by the buffers that reference it.
#[derive(Debug)]
pub struct BufFile {
    id: FileId,
    path: PathBuf,
    file: File,
}

impl BufFile {
    /// Open an existing file for reading.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        Ok(Self::from_file(file, path))
    }

    /// Create (or truncate) a file for reading and writing.
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self::from_file(file, path))
    }

    pub fn from_file(file: File, path: impl Into<PathBuf>) -> Self {
        Self {
            id: FileId::next(),
            path: path.into(),
            file,
        }
    }

    pub fn id(&self) -> FileId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    pub fn len(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    pub fn is_empty(&self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Read up to `buf.len()` bytes at `offset`.
    #[cfg(unix)]
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        use std::os::unix::fs::FileExt;
        self.file.read_at(buf, offset)
    }

    /// Read up to `buf.len()` bytes at `offset`.
    #[cfg(not(unix))]
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        use std::io::{Read, Seek, SeekFrom};
        let mut file = &self.file;
        file.seek(SeekFrom::Start(offset))?;
        file.read(buf)
    }
}

// =============================================================================
// Views
// =============================================================================

/// Handle to a buffer descriptor owned by an arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufId(pub(crate) usize);

/// Mutability class of a memory window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemKind {
    /// Writable arena memory.
    Temporary,
    /// Immutable memory that must not be written.
    ReadOnly,
    /// Immutable memory mapped from a file.
    Mapped,
}

/// Storage behind a memory window.
#[derive(Debug, Clone)]
pub enum Backing {
    Arena(ArenaPtr),
    Shared(Bytes),
}

impl Backing {
    pub fn len(&self) -> usize {
        match self {
            Backing::Arena(ptr) => ptr.len(),
            Backing::Shared(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Window `[pos, last)` over a memory backing.
#[derive(Debug, Clone)]
pub struct MemView {
    backing: Backing,
    kind: MemKind,
    pos: usize,
    last: usize,
}

/// Range `[pos, last)` of an open file.
#[derive(Debug, Clone)]
pub struct FileView {
    file: std::sync::Arc<BufFile>,
    pos: u64,
    last: u64,
}

/// Marker and ownership flags of a buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufFlags {
    pub recycled: bool,
    pub flush: bool,
    pub sync: bool,
    pub last_buf: bool,
    pub last_in_chain: bool,
    pub last_shadow: bool,
    pub temp_file: bool,
}

// =============================================================================
// Buffer
// =============================================================================

/// Descriptor of data to be processed or sent.
#[derive(Debug, Clone, Default)]
pub struct Buf {
    mem: Option<MemView>,
    file: Option<FileView>,
    tag: Option<BufTag>,
    shadow: Option<BufId>,
    pub flags: BufFlags,
}

impl Buf {
    /// Empty writable window over an arena span.
    pub fn temporary(span: ArenaPtr) -> Self {
        Self {
            mem: Some(MemView {
                backing: Backing::Arena(span),
                kind: MemKind::Temporary,
                pos: 0,
                last: 0,
            }),
            ..Default::default()
        }
    }

    /// Read-only buffer holding all of `data`.
    pub fn shared(data: Bytes) -> Self {
        Self::full(data, MemKind::ReadOnly)
    }

    /// Buffer holding all of a mapped region.
    pub fn mapped(data: Bytes) -> Self {
        Self::full(data, MemKind::Mapped)
    }

    fn full(data: Bytes, kind: MemKind) -> Self {
        let last = data.len();
        Self {
            mem: Some(MemView {
                backing: Backing::Shared(data),
                kind,
                pos: 0,
                last,
            }),
            ..Default::default()
        }
    }

    /// Buffer referencing `range` of `file`.
    pub fn file_range(file: std::sync::Arc<BufFile>, range: Range<u64>) -> Self {
        let mut buf = Self::default();
        buf.attach_file(file, range);
        buf
    }

    /// Data-less marker buffer.
    pub fn marker(flags: BufFlags) -> Self {
        Self {
            flags,
            ..Default::default()
        }
    }

    pub fn flush_marker() -> Self {
        Self::marker(BufFlags {
            flush: true,
            ..Default::default()
        })
    }

    pub fn sync_marker() -> Self {
        Self::marker(BufFlags {
            sync: true,
            ..Default::default()
        })
    }

    pub fn last_marker() -> Self {
        Self::marker(BufFlags {
            last_buf: true,
            ..Default::default()
        })
    }

    /// Attach an empty writable window over `span`.
    pub fn attach_memory(&mut self, span: ArenaPtr) {
        self.mem = Some(MemView {
            backing: Backing::Arena(span),
            kind: MemKind::Temporary,
            pos: 0,
            last: 0,
        });
    }

    pub fn attach_file(&mut self, file: std::sync::Arc<BufFile>, range: Range<u64>) {
        self.file = Some(FileView {
            file,
            pos: range.start,
            last: range.end.max(range.start),
        });
    }

    pub fn detach_file(&mut self) {
        self.file = None;
    }

    // -------------------------------------------------------------------------
    // Predicates
    // -------------------------------------------------------------------------

    pub fn in_memory(&self) -> bool {
        self.mem.is_some()
    }

    pub fn in_file(&self) -> bool {
        self.file.as_ref().is_some_and(|f| f.last > f.pos)
    }

    pub fn in_memory_only(&self) -> bool {
        self.in_memory() && !self.in_file()
    }

    pub fn is_temporary(&self) -> bool {
        self.mem_kind() == Some(MemKind::Temporary)
    }

    pub fn is_read_only(&self) -> bool {
        self.mem_kind() == Some(MemKind::ReadOnly)
    }

    pub fn is_mapped(&self) -> bool {
        self.mem_kind() == Some(MemKind::Mapped)
    }

    /// A marker: flush, sync or last flag set and no data.
    pub fn is_special(&self) -> bool {
        let flags = &self.flags;
        (flags.flush || flags.last_buf || flags.sync) && !self.in_memory() && !self.in_file()
    }

    /// A sync marker that carries nothing else.
    pub fn is_sync_only(&self) -> bool {
        let flags = &self.flags;
        flags.sync && !self.in_memory() && !self.in_file() && !flags.flush && !flags.last_buf
    }

    /// Bytes still pending; memory is authoritative when present.
    pub fn size(&self) -> u64 {
        match (&self.mem, &self.file) {
            (Some(mem), _) => (mem.last - mem.pos) as u64,
            (None, Some(file)) => file.last - file.pos,
            (None, None) => 0,
        }
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn mem_kind(&self) -> Option<MemKind> {
        self.mem.as_ref().map(|m| m.kind)
    }

    pub fn backing(&self) -> Option<&Backing> {
        self.mem.as_ref().map(|m| &m.backing)
    }

    /// Memory window as `(pos, last)`.
    pub fn window(&self) -> Option<(usize, usize)> {
        self.mem.as_ref().map(|m| (m.pos, m.last))
    }

    /// Unused space after the window, for writable buffers.
    pub fn free_space(&self) -> usize {
        match &self.mem {
            Some(mem) if mem.kind == MemKind::Temporary => mem.backing.len() - mem.last,
            _ => 0,
        }
    }

    pub fn file(&self) -> Option<&std::sync::Arc<BufFile>> {
        self.file.as_ref().map(|f| &f.file)
    }

    pub fn file_id(&self) -> Option<FileId> {
        self.file.as_ref().map(|f| f.file.id())
    }

    pub fn file_pos(&self) -> u64 {
        self.file.as_ref().map_or(0, |f| f.pos)
    }

    pub fn file_last(&self) -> u64 {
        self.file.as_ref().map_or(0, |f| f.last)
    }

    pub fn tag(&self) -> Option<BufTag> {
        self.tag
    }

    pub fn set_tag(&mut self, tag: BufTag) {
        self.tag = Some(tag);
    }

    pub fn shadow(&self) -> Option<BufId> {
        self.shadow
    }

    pub fn set_shadow(&mut self, shadow: Option<BufId>) {
        self.shadow = shadow;
    }

    // -------------------------------------------------------------------------
    // Cursor Movement
    // -------------------------------------------------------------------------

    /// Mark `n` bytes as processed in every view that has data.
    pub fn advance(&mut self, n: u64) {
        if let Some(mem) = &mut self.mem {
            let n = (n as usize).min(mem.last - mem.pos);
            mem.pos += n;
        }
        if let Some(file) = &mut self.file {
            file.pos = file.pos.saturating_add(n).min(file.last);
        }
    }

    /// Mark everything as processed.
    pub fn consume(&mut self) {
        if let Some(mem) = &mut self.mem {
            mem.pos = mem.last;
        }
        if let Some(file) = &mut self.file {
            file.pos = file.last;
        }
    }

    /// Extend the window by `n` bytes of freshly written data.
    pub fn produce(&mut self, n: usize) {
        if let Some(mem) = &mut self.mem {
            mem.last = (mem.last + n).min(mem.backing.len());
        }
    }

    /// Rewind the memory window to the start of its backing.
    pub fn reset_window(&mut self) {
        if let Some(mem) = &mut self.mem {
            mem.pos = 0;
            mem.last = 0;
        }
    }
}

// =============================================================================
// Arena Buffer API
// =============================================================================

impl Arena {
    /// Allocate a zeroed buffer descriptor.
    pub fn alloc_buf(&mut self) -> Result<BufId> {
        self.insert_buf(Buf::default())
    }

    /// Store a buffer descriptor in the arena.
    pub fn insert_buf(&mut self, buf: Buf) -> Result<BufId> {
        self.bufs
            .try_reserve(1)
            .map_err(|_| KeelError::alloc(std::mem::size_of::<Buf>()))?;
        self.bufs.push(buf);
        Ok(BufId(self.bufs.len() - 1))
    }

    /// Allocate a writable buffer with `size` bytes of fresh arena memory.
    pub fn new_memory_buffer(&mut self, size: usize) -> Result<BufId> {
        let span = self.alloc(size)?;
        self.insert_buf(Buf::temporary(span))
    }

    pub fn buf(&self, id: BufId) -> &Buf {
        &self.bufs[id.0]
    }

    pub fn buf_mut(&mut self, id: BufId) -> &mut Buf {
        &mut self.bufs[id.0]
    }

    /// Pending bytes of a buffer's memory window.
    pub fn buf_data(&self, id: BufId) -> &[u8] {
        let Some(mem) = &self.bufs[id.0].mem else {
            return &[];
        };
        match &mem.backing {
            Backing::Arena(ptr) => &self.bytes(*ptr)[mem.pos..mem.last],
            Backing::Shared(bytes) => &bytes[mem.pos..mem.last],
        }
    }

    /// Unused space after a writable buffer's window. Bytes filled in here
    /// become data once committed with [`Buf::produce`].
    pub fn buf_spare_mut(&mut self, id: BufId) -> &mut [u8] {
        let (span, last) = match &self.bufs[id.0].mem {
            Some(MemView {
                backing: Backing::Arena(ptr),
                kind: MemKind::Temporary,
                last,
                ..
            }) => (*ptr, *last),
            _ => return &mut [],
        };
        &mut self.bytes_mut(span)[last..]
    }

    /// Append `data` to a writable buffer; returns the number of bytes copied.
    pub fn buf_write(&mut self, id: BufId, data: &[u8]) -> usize {
        let spare = self.buf_spare_mut(id);
        let n = data.len().min(spare.len());
        spare[..n].copy_from_slice(&data[..n]);
        self.bufs[id.0].produce(n);
        n
    }
}

// =============================================================================
// Tests
// =============================================================================
