//! Chunk-bounded block provider: the framing layer every serializer runs on.
//!
//! # Model
//! A RenderWare file is a tree of chunks.  Each chunk is a 12-byte header
//! (`id`, body `length`, packed version) followed by `length` body bytes that
//! may themselves contain chunks.  [`BlockProvider`] keeps one frame per open
//! chunk and validates every access against the innermost frame before it
//! touches the backing stream.
//!
//! # Modes
//! The provider is type-state: [`BlockReader`] parses existing chunks,
//! [`BlockWriter`] reserves headers and backfills their lengths when the
//! chunk is left.  Both hand out a [`BlockContext`] guard from `enter`; the
//! guard derefs to the provider, so nested chunks are entered through it.
//!
//! # Unwinding
//! `BlockContext::leave()` reports errors.  A guard dropped without `leave()`
//! (an early `?` return) still pops its frame, so the parent's cursor stays
//! consistent on every exit path.
//!
//! # Coordinates
//! `tell`/`seek`/`skip` are relative to the current chunk body;
//! `tell_absolute` is relative to the start of the backing stream.
//!
//! # Endianness
//! All typed helpers are little-endian.  Every platform this crate supports
//! stores chunk data little-endian; no runtime negotiation is performed.

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

use crate::chunk::{ChunkHeader, CHUNK_HEADER_SIZE};
use crate::version::LibraryVersion;

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum BlockError {
    #[error("Chunk bound exceeded: requested {requested} bytes, {available} available")]
    OutOfBounds { requested: u64, available: u64 },
    #[error("Stream bound exceeded: requested {requested} bytes, {available} available")]
    StreamOutOfBounds { requested: u64, available: u64 },
    #[error("Unexpected chunk {found:#x}, expected {expected:#x}")]
    UnexpectedChunk { expected: u32, found: u32 },
    #[error("Seek to {offset} outside chunk of {length} bytes")]
    InvalidSeek { offset: i64, length: u64 },
    #[error("Chunk body of {0} bytes does not fit the 32-bit length field")]
    ChunkTooLarge(u64),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── Frames ────────────────────────────────────────────────────────────────────

/// One open chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFrame {
    pub header:          ChunkHeader,
    /// Absolute offset of the chunk header.
    pub header_offset:   u64,
    /// Offset of the chunk header relative to the parent body (or the
    /// provider base for top-level chunks).
    pub relative_offset: u64,
    /// Writing: furthest absolute offset produced inside the body.
    written_end:         u64,
}

impl ChunkFrame {
    pub fn body_begin(&self) -> u64 {
        self.header_offset + CHUNK_HEADER_SIZE
    }

    pub fn body_end(&self) -> u64 {
        self.body_begin() + self.header.length as u64
    }
}

// ── Provider ──────────────────────────────────────────────────────────────────

/// Marker for parsing providers.
#[derive(Debug)]
pub struct Reading;
/// Marker for producing providers.
#[derive(Debug)]
pub struct Writing;

pub struct BlockProvider<S, M> {
    stream:               S,
    frames:               Vec<ChunkFrame>,
    version:              LibraryVersion,
    ignore_block_regions: bool,
    base:                 u64,
    pos:                  u64,
    /// Reading: length of the backing stream.  Writing: highest offset written.
    extent:               u64,
    _mode:                PhantomData<M>,
}

pub type BlockReader<S> = BlockProvider<S, Reading>;
pub type BlockWriter<S> = BlockProvider<S, Writing>;

impl<S, M> BlockProvider<S, M> {
    /// Chunk-relative cursor.
    pub fn tell(&self) -> u64 {
        self.pos - self.body_begin()
    }

    pub fn tell_absolute(&self) -> u64 {
        self.pos
    }

    /// Number of open chunks.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn current_frame(&self) -> Option<&ChunkFrame> {
        self.frames.last()
    }

    /// Reading: version of the most recently entered chunk.
    /// Writing: version stamped into every new chunk header.
    pub fn version(&self) -> LibraryVersion {
        self.version
    }

    pub fn set_ignore_block_regions(&mut self, ignore: bool) {
        self.ignore_block_regions = ignore;
    }

    pub fn is_ignoring_block_regions(&self) -> bool {
        self.ignore_block_regions
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    fn body_begin(&self) -> u64 {
        self.frames.last().map(ChunkFrame::body_begin).unwrap_or(self.base)
    }

    fn push_frame(&mut self, header: ChunkHeader, header_offset: u64) {
        let relative_offset = header_offset - self.body_begin();
        let written_end = header_offset + CHUNK_HEADER_SIZE;
        self.frames.push(ChunkFrame { header, header_offset, relative_offset, written_end });
    }
}

impl<S: Seek, M> BlockProvider<S, M> {
    fn seek_absolute(&mut self, abs: u64) -> Result<(), BlockError> {
        self.stream.seek(SeekFrom::Start(abs))?;
        self.pos = abs;
        Ok(())
    }
}

// ── Reading ───────────────────────────────────────────────────────────────────

impl<S: Read + Seek> BlockProvider<S, Reading> {
    pub fn new(mut stream: S) -> Result<Self, BlockError> {
        let base = stream.stream_position()?;
        let extent = stream.seek(SeekFrom::End(0))?;
        stream.seek(SeekFrom::Start(base))?;
        Ok(Self {
            stream,
            frames: Vec::new(),
            version: LibraryVersion::default(),
            ignore_block_regions: false,
            base,
            pos: base,
            extent,
            _mode: PhantomData,
        })
    }

    /// Validate that `n` bytes can be read at the cursor: chunk bound first,
    /// then the backing stream.
    fn validate_read(&self, n: u64) -> Result<(), BlockError> {
        if !self.ignore_block_regions {
            if let Some(frame) = self.frames.last() {
                let available = frame.body_end().saturating_sub(self.pos);
                if n > available {
                    return Err(BlockError::OutOfBounds { requested: n, available });
                }
            }
        }
        let available = self.extent.saturating_sub(self.pos);
        if n > available {
            return Err(BlockError::StreamOutOfBounds { requested: n, available });
        }
        Ok(())
    }

    /// Non-consuming bounds probe.
    pub fn check_read_ahead(&self, n: u64) -> Result<(), BlockError> {
        self.validate_read(n)
    }

    /// Bytes left in the current chunk (or the stream at top level).
    pub fn remaining(&self) -> u64 {
        match self.frames.last() {
            Some(frame) if !self.ignore_block_regions => frame.body_end().saturating_sub(self.pos),
            _ => self.extent.saturating_sub(self.pos),
        }
    }

    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), BlockError> {
        self.validate_read(buf.len() as u64)?;
        self.stream.read_exact(buf)?;
        self.pos += buf.len() as u64;
        Ok(())
    }

    pub fn read_vec(&mut self, n: usize) -> Result<Vec<u8>, BlockError> {
        self.validate_read(n as u64)?;
        let mut buf = vec![0u8; n];
        self.stream.read_exact(&mut buf)?;
        self.pos += n as u64;
        Ok(buf)
    }

    pub fn skip(&mut self, n: u64) -> Result<(), BlockError> {
        self.validate_read(n)?;
        self.seek_absolute(self.pos + n)
    }

    /// Move to a chunk-relative offset.
    pub fn seek(&mut self, offset: u64) -> Result<(), BlockError> {
        if !self.ignore_block_regions {
            if let Some(frame) = self.frames.last() {
                if offset > frame.header.length as u64 {
                    return Err(BlockError::InvalidSeek {
                        offset: offset as i64,
                        length: frame.header.length as u64,
                    });
                }
            }
        }
        let abs = self.body_begin() + offset;
        if abs > self.extent {
            return Err(BlockError::InvalidSeek {
                offset: offset as i64,
                length: self.extent.saturating_sub(self.body_begin()),
            });
        }
        self.seek_absolute(abs)
    }

    pub fn read_u8(&mut self) -> Result<u8, BlockError> {
        let mut b = [0u8; 1];
        self.read_exact(&mut b)?;
        Ok(b[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, BlockError> {
        let mut b = [0u8; 2];
        self.read_exact(&mut b)?;
        Ok(LittleEndian::read_u16(&b))
    }

    pub fn read_u32(&mut self) -> Result<u32, BlockError> {
        let mut b = [0u8; 4];
        self.read_exact(&mut b)?;
        Ok(LittleEndian::read_u32(&b))
    }

    pub fn read_i32(&mut self) -> Result<i32, BlockError> {
        let mut b = [0u8; 4];
        self.read_exact(&mut b)?;
        Ok(LittleEndian::read_i32(&b))
    }

    pub fn read_f32(&mut self) -> Result<f32, BlockError> {
        let mut b = [0u8; 4];
        self.read_exact(&mut b)?;
        Ok(LittleEndian::read_f32(&b))
    }

    /// Read a `u32` without moving the cursor.
    pub fn peek_u32(&mut self) -> Result<u32, BlockError> {
        let start = self.pos;
        let value = self.read_u32();
        self.seek_absolute(start)?;
        value
    }

    /// Parse the next chunk header without entering it.
    pub fn peek_header(&mut self) -> Result<ChunkHeader, BlockError> {
        let start = self.pos;
        let mut raw = [0u8; CHUNK_HEADER_SIZE as usize];
        let result = self.read_exact(&mut raw);
        self.seek_absolute(start)?;
        result?;
        Ok(ChunkHeader::from_bytes(&raw))
    }

    /// Parse the chunk header at the cursor and open a frame for its body.
    pub fn enter(&mut self) -> Result<BlockContext<'_, S, Reading>, BlockError> {
        let header_offset = self.pos;
        let mut raw = [0u8; CHUNK_HEADER_SIZE as usize];
        self.read_exact(&mut raw)?;
        let header = ChunkHeader::from_bytes(&raw);

        if !self.ignore_block_regions {
            if let Err(e) = self.validate_read(header.length as u64) {
                self.seek_absolute(header_offset)?;
                return Err(e);
            }
        }

        log::trace!(
            "enter chunk {:#x} ({} bytes) at {header_offset}, depth {}",
            header.id, header.length, self.frames.len() + 1,
        );
        self.version = header.version;
        self.push_frame(header, header_offset);
        Ok(BlockContext::new(self))
    }

    fn leave_read(&mut self) -> Result<(), BlockError> {
        let frame = match self.frames.pop() {
            Some(f) => f,
            None    => return Ok(()),
        };
        if !self.ignore_block_regions && self.pos != frame.body_end() {
            let end = frame.body_end().min(self.extent);
            self.seek_absolute(end)?;
        }
        Ok(())
    }
}

// ── Writing ───────────────────────────────────────────────────────────────────

impl<S: Write + Seek> BlockProvider<S, Writing> {
    pub fn new(mut stream: S, version: LibraryVersion) -> Result<Self, BlockError> {
        let base = stream.stream_position()?;
        Ok(Self {
            stream,
            frames: Vec::new(),
            version,
            ignore_block_regions: false,
            base,
            pos: base,
            extent: base,
            _mode: PhantomData,
        })
    }

    pub fn set_version(&mut self, version: LibraryVersion) {
        self.version = version;
    }

    pub fn write_all(&mut self, buf: &[u8]) -> Result<(), BlockError> {
        self.stream.write_all(buf)?;
        self.pos += buf.len() as u64;
        self.extent = self.extent.max(self.pos);
        self.mark_written(self.pos);
        Ok(())
    }

    fn mark_written(&mut self, end: u64) {
        if let Some(frame) = self.frames.last_mut() {
            frame.written_end = frame.written_end.max(end);
        }
    }

    pub fn write_zeros(&mut self, n: usize) -> Result<(), BlockError> {
        const ZEROS: [u8; 64] = [0u8; 64];
        let mut left = n;
        while left > 0 {
            let step = left.min(ZEROS.len());
            self.write_all(&ZEROS[..step])?;
            left -= step;
        }
        Ok(())
    }

    /// Move to a chunk-relative offset inside what has been written so far.
    pub fn seek(&mut self, offset: u64) -> Result<(), BlockError> {
        let abs = self.body_begin() + offset;
        if abs > self.extent {
            return Err(BlockError::InvalidSeek {
                offset: offset as i64,
                length: self.extent - self.body_begin(),
            });
        }
        self.seek_absolute(abs)
    }

    pub fn write_u8(&mut self, v: u8) -> Result<(), BlockError> {
        self.write_all(&[v])
    }

    pub fn write_u16(&mut self, v: u16) -> Result<(), BlockError> {
        let mut b = [0u8; 2];
        LittleEndian::write_u16(&mut b, v);
        self.write_all(&b)
    }

    pub fn write_u32(&mut self, v: u32) -> Result<(), BlockError> {
        let mut b = [0u8; 4];
        LittleEndian::write_u32(&mut b, v);
        self.write_all(&b)
    }

    pub fn write_i32(&mut self, v: i32) -> Result<(), BlockError> {
        let mut b = [0u8; 4];
        LittleEndian::write_i32(&mut b, v);
        self.write_all(&b)
    }

    pub fn write_f32(&mut self, v: f32) -> Result<(), BlockError> {
        let mut b = [0u8; 4];
        LittleEndian::write_f32(&mut b, v);
        self.write_all(&b)
    }

    /// Reserve a header for a new chunk; its length is backfilled on leave.
    pub fn enter(&mut self, id: u32) -> Result<BlockContext<'_, S, Writing>, BlockError> {
        let header_offset = self.pos;
        self.write_zeros(CHUNK_HEADER_SIZE as usize)?;
        let header = ChunkHeader { id, length: 0, version: self.version };
        log::trace!("open chunk {id:#x} at {header_offset}, depth {}", self.frames.len() + 1);
        self.push_frame(header, header_offset);
        Ok(BlockContext::new(self))
    }

    fn leave_write(&mut self) -> Result<(), BlockError> {
        let mut frame = match self.frames.pop() {
            Some(f) => f,
            None    => return Ok(()),
        };
        let end = frame.written_end.max(self.pos);
        let length = end - frame.body_begin();
        frame.header.length = u32::try_from(length).map_err(|_| BlockError::ChunkTooLarge(length))?;

        self.seek_absolute(frame.header_offset)?;
        self.stream.write_all(&frame.header.to_bytes())?;
        self.seek_absolute(end)?;
        self.mark_written(end);
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), BlockError> {
        self.stream.flush()?;
        Ok(())
    }
}

// ── Scoped context ────────────────────────────────────────────────────────────

/// Mode-specific frame release.
pub trait LeaveContext<S>: Sized {
    fn leave_context(provider: &mut BlockProvider<S, Self>) -> Result<(), BlockError>;
}

impl<S: Read + Seek> LeaveContext<S> for Reading {
    fn leave_context(provider: &mut BlockProvider<S, Self>) -> Result<(), BlockError> {
        provider.leave_read()
    }
}

impl<S: Write + Seek> LeaveContext<S> for Writing {
    fn leave_context(provider: &mut BlockProvider<S, Self>) -> Result<(), BlockError> {
        provider.leave_write()
    }
}

/// Guard over one open chunk.  Entering a second chunk through the same
/// guard is only possible for a child: the guard is mutably borrowed by the
/// child's guard until that one is released.
pub struct BlockContext<'a, S, M: LeaveContext<S>> {
    provider: &'a mut BlockProvider<S, M>,
    released: bool,
}

impl<'a, S, M: LeaveContext<S>> BlockContext<'a, S, M> {
    fn new(provider: &'a mut BlockProvider<S, M>) -> Self {
        Self { provider, released: false }
    }

    fn frame(&self) -> &ChunkFrame {
        // A live guard always owns the innermost frame.
        &self.provider.frames[self.provider.frames.len() - 1]
    }

    pub fn header(&self) -> &ChunkHeader {
        &self.frame().header
    }

    pub fn id(&self) -> u32 {
        self.frame().header.id
    }

    pub fn chunk_version(&self) -> LibraryVersion {
        self.frame().header.version
    }

    /// Declared body length (reading) or zero until left (writing).
    pub fn length(&self) -> u32 {
        self.frame().header.length
    }

    pub fn begin_absolute(&self) -> u64 {
        self.frame().header_offset
    }

    pub fn begin_relative(&self) -> u64 {
        self.frame().relative_offset
    }

    /// Strict chunk id check.
    pub fn expect_id(&self, expected: u32) -> Result<(), BlockError> {
        let found = self.id();
        if found != expected {
            return Err(BlockError::UnexpectedChunk { expected, found });
        }
        Ok(())
    }

    /// Release the frame, reporting any error from seeking or backfilling.
    pub fn leave(mut self) -> Result<(), BlockError> {
        self.released = true;
        M::leave_context(self.provider)
    }
}

impl<'a, S, M: LeaveContext<S>> Deref for BlockContext<'a, S, M> {
    type Target = BlockProvider<S, M>;

    fn deref(&self) -> &Self::Target {
        self.provider
    }
}

impl<'a, S, M: LeaveContext<S>> DerefMut for BlockContext<'a, S, M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.provider
    }
}

impl<'a, S, M: LeaveContext<S>> Drop for BlockContext<'a, S, M> {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = M::leave_context(self.provider) {
                log::warn!("failed to unwind chunk context: {e}");
            }
        }
    }
}
