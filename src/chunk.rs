//! Chunk headers, well-known chunk ids and the diagnostic chunk-tree walker.
//!
//! # Header layout (12 bytes, little-endian)
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0      | 4    | chunk id |
//! | 4      | 4    | body length (header excluded) |
//! | 8      | 4    | packed [`LibraryVersion`] |

use std::io::{self, Read, Seek, Write};

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::stream::{BlockError, BlockReader};
use crate::version::LibraryVersion;

pub const CHUNK_HEADER_SIZE: u64 = 12;

pub mod chunk_id {
    pub const STRUCT:         u32 = 0x01;
    pub const STRING:         u32 = 0x02;
    pub const EXTENSION:      u32 = 0x03;
    pub const TEXTURE:        u32 = 0x06;
    pub const TEXTURE_NATIVE: u32 = 0x15;
    pub const TEX_DICTIONARY: u32 = 0x16;
}

/// Human-readable chunk name (diagnostics only).
pub fn chunk_name(id: u32) -> &'static str {
    match id {
        chunk_id::STRUCT         => "Struct",
        chunk_id::STRING         => "String",
        chunk_id::EXTENSION      => "Extension",
        chunk_id::TEXTURE        => "Texture",
        chunk_id::TEXTURE_NATIVE => "Texture Native",
        chunk_id::TEX_DICTIONARY => "Texture Dictionary",
        _                        => "Unknown",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub id:      u32,
    pub length:  u32,
    pub version: LibraryVersion,
}

impl ChunkHeader {
    pub fn from_bytes(raw: &[u8; CHUNK_HEADER_SIZE as usize]) -> Self {
        Self {
            id:      LittleEndian::read_u32(&raw[0..4]),
            length:  LittleEndian::read_u32(&raw[4..8]),
            version: LibraryVersion::unpack(LittleEndian::read_u32(&raw[8..12])),
        }
    }

    pub fn to_bytes(&self) -> [u8; CHUNK_HEADER_SIZE as usize] {
        let mut raw = [0u8; CHUNK_HEADER_SIZE as usize];
        LittleEndian::write_u32(&mut raw[0..4], self.id);
        LittleEndian::write_u32(&mut raw[4..8], self.length);
        LittleEndian::write_u32(&mut raw[8..12], self.version.pack());
        raw
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(self.id)?;
        writer.write_u32::<LittleEndian>(self.length)?;
        writer.write_u32::<LittleEndian>(self.version.pack())?;
        Ok(())
    }

    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        Ok(Self {
            id:      reader.read_u32::<LittleEndian>()?,
            length:  reader.read_u32::<LittleEndian>()?,
            version: LibraryVersion::unpack(reader.read_u32::<LittleEndian>()?),
        })
    }
}

/// A chunk kept verbatim, e.g. an extension plugin this crate does not
/// interpret.  Re-emitted unchanged on serialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChunk {
    pub id:      u32,
    pub version: LibraryVersion,
    pub body:    Vec<u8>,
}

// ── Chunk tree walker ─────────────────────────────────────────────────────────

/// One node of a walked chunk tree.
#[derive(Debug, Clone)]
pub struct ChunkNode {
    pub header:          ChunkHeader,
    /// Absolute offset of the header.
    pub offset:          u64,
    /// Raw header bytes, for hex dumps.
    pub raw_header:      [u8; CHUNK_HEADER_SIZE as usize],
    pub children:        Vec<ChunkNode>,
    /// Set when the body could not be decomposed; the walker stops
    /// descending and records why.
    pub problem:         Option<String>,
}

impl ChunkNode {
    pub fn name(&self) -> &'static str {
        chunk_name(self.header.id)
    }
}

/// Chunks whose bodies are known to consist of child chunks only.
fn is_container(id: u32) -> bool {
    matches!(id, chunk_id::EXTENSION | chunk_id::TEX_DICTIONARY | chunk_id::TEXTURE_NATIVE | chunk_id::TEXTURE)
}

/// Walk every chunk reachable from the cursor down to `max_depth` levels.
///
/// Structural problems inside a container are recorded on the node instead
/// of aborting the walk.  Only a problem with a top-level header ends the
/// walk early; the nodes gathered so far are returned.
pub fn scan_chunk_tree<R: Read + Seek>(
    reader:    &mut BlockReader<R>,
    max_depth: usize,
) -> Result<Vec<ChunkNode>, BlockError> {
    let mut nodes = Vec::new();
    while reader.remaining() >= CHUNK_HEADER_SIZE {
        match scan_node(reader, max_depth) {
            Ok(node) => nodes.push(node),
            Err(e) if nodes.is_empty() => return Err(e),
            Err(e) => {
                log::debug!("chunk walk stopped at {}: {e}", reader.tell_absolute());
                break;
            }
        }
    }
    Ok(nodes)
}

fn scan_node<R: Read + Seek>(reader: &mut BlockReader<R>, depth_left: usize) -> Result<ChunkNode, BlockError> {
    let raw_header = {
        let header = reader.peek_header()?;
        header.to_bytes()
    };
    let mut ctx = reader.enter()?;
    let mut node = ChunkNode {
        header:     *ctx.header(),
        offset:     ctx.begin_absolute(),
        raw_header,
        children:   Vec::new(),
        problem:    None,
    };

    if depth_left > 0 && is_container(node.header.id) {
        while ctx.remaining() >= CHUNK_HEADER_SIZE {
            match scan_node(&mut *ctx, depth_left - 1) {
                Ok(child) => node.children.push(child),
                Err(e) => {
                    node.problem = Some(e.to_string());
                    break;
                }
            }
        }
        if node.problem.is_none() && ctx.remaining() > 0 {
            node.problem = Some(format!("{} trailing bytes", ctx.remaining()));
        }
    }
    ctx.leave()?;
    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::BlockWriter;
    use std::io::Cursor;

    #[test]
    fn header_round_trips_through_bytes() {
        let header = ChunkHeader { id: chunk_id::TEXTURE_NATIVE, length: 1234, version: LibraryVersion::default() };
        let raw = header.to_bytes();
        assert_eq!(ChunkHeader::from_bytes(&raw), header);

        let mut buf = Vec::new();
        header.write(&mut buf).unwrap();
        assert_eq!(buf, raw);
        assert_eq!(ChunkHeader::read(Cursor::new(&buf)).unwrap(), header);
    }

    #[test]
    fn walks_nested_tree() {
        let mut w = BlockWriter::new(Cursor::new(Vec::new()), LibraryVersion::default()).unwrap();
        {
            let mut dict = w.enter(chunk_id::TEX_DICTIONARY).unwrap();
            {
                let mut st = dict.enter(chunk_id::STRUCT).unwrap();
                st.write_u32(0).unwrap();
                st.leave().unwrap();
            }
            dict.enter(chunk_id::EXTENSION).unwrap().leave().unwrap();
            dict.leave().unwrap();
        }
        let bytes = w.into_inner().into_inner();

        let mut r = BlockReader::new(Cursor::new(bytes)).unwrap();
        let tree = scan_chunk_tree(&mut r, 8).unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].name(), "Texture Dictionary");
        assert_eq!(tree[0].children.len(), 2);
        assert_eq!(tree[0].children[0].header.id, chunk_id::STRUCT);
        assert_eq!(tree[0].children[1].offset, 12 + 16);
        assert!(tree[0].problem.is_none());
    }
}
