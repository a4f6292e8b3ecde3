//! Memory-encoding engine: linear texel rows ↔ tiled ("swizzled") layouts
//! used by console texture memory.
//!
//! A [`SwizzleScheme`] describes one tile: a raw tile of linear texels and
//! the packed tile it occupies after swizzling.  A packed unit is
//! `packed_depth` bits wide and holds `stride` raw texels; the permutation
//! tables say, for every raw texel of a tile, which packed unit and slot it
//! lands in.  Even and odd tile rows may use different tables.
//!
//! | Encodings                     | Raw tile        | Packed tile        | Stride |
//! |-------------------------------|-----------------|--------------------|--------|
//! | `IdTex8` ↔ `Tex32`            | 16×4 @ 8 bit    | 8×2 @ 32 bit       | 4      |
//! | `LinearBlocks` ↔ `SwizzledBlocks` | (128/depth)×8 | (16·8 bytes)×1   | 1      |

use crate::error::{Result, RwError};
use crate::pixel::color::{get_texel_bits, set_texel_bits};
use crate::pixel::row_size;

/// Memory layout of a texel buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatEncoding {
    /// 8-bit indices, linear rows.
    IdTex8,
    /// 32-bit GS-style column layout holding 8-bit indices.
    Tex32,
    /// Linear rows of `depth`-bit texels.
    LinearBlocks { depth: u32 },
    /// 16-byte × 8-row blocks stored contiguously.
    SwizzledBlocks { depth: u32 },
}

/// Where one raw texel lands inside a packed tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackedSlot {
    pub unit_x: u32,
    pub unit_y: u32,
    pub slot:   u32,
}

#[derive(Debug, Clone)]
pub struct SwizzleScheme {
    pub raw_tile_width:     u32,
    pub raw_tile_height:    u32,
    pub packed_tile_width:  u32,
    pub packed_tile_height: u32,
    pub raw_depth:          u32,
    pub packed_depth:       u32,
    pub stride:             u32,
    /// Row-major over the effective raw tile.
    pub even_table:         Vec<PackedSlot>,
    pub odd_table:          Vec<PackedSlot>,
}

impl SwizzleScheme {
    /// Raw tile widths a single packed unit spans.
    pub fn horizontal_split(&self) -> u32 {
        self.stride.div_ceil(self.raw_tile_width).max(1)
    }

    pub fn effective_raw_tile_width(&self) -> u32 {
        self.raw_tile_width * self.horizontal_split()
    }

    fn table(&self, tile_row: u32) -> &[PackedSlot] {
        if tile_row & 1 == 0 { &self.even_table } else { &self.odd_table }
    }

    /// 8-bit indices in PSMT8 order inside 32-bit PSMCT32 columns.
    pub fn psmt8_to_psmct32() -> Self {
        let build = |parity: u32| {
            let mut table = Vec::with_capacity(64);
            for ly in 0..4u32 {
                for x in 0..16u32 {
                    let swap = ((parity + u32::from(ly >= 2)) & 1) * 4;
                    table.push(PackedSlot {
                        unit_x: (x + swap) & 7,
                        unit_y: ly & 1,
                        slot:   ((ly >> 1) & 1) + ((x >> 2) & 2),
                    });
                }
            }
            table
        };
        Self {
            raw_tile_width:     16,
            raw_tile_height:    4,
            packed_tile_width:  8,
            packed_tile_height: 2,
            raw_depth:          8,
            packed_depth:       32,
            stride:             4,
            even_table:         build(0),
            odd_table:          build(1),
        }
    }

    /// 16-byte × 8-row blocks laid out as one contiguous run per block.
    pub fn psp_blocks(depth: u32) -> Result<Self> {
        if !matches!(depth, 4 | 8 | 16 | 32) {
            return Err(RwError::unsupported(format!("no block swizzle for {depth}-bit texels")));
        }
        let raw_w = 128 / depth;
        let table: Vec<PackedSlot> = (0..8u32)
            .flat_map(|y| (0..raw_w).map(move |x| PackedSlot { unit_x: y * raw_w + x, unit_y: 0, slot: 0 }))
            .collect();
        Ok(Self {
            raw_tile_width:     raw_w,
            raw_tile_height:    8,
            packed_tile_width:  raw_w * 8,
            packed_tile_height: 1,
            raw_depth:          depth,
            packed_depth:       depth,
            stride:             1,
            even_table:         table.clone(),
            odd_table:          table,
        })
    }

    fn tile_grid(&self, width: u32, height: u32) -> (u32, u32) {
        (width.div_ceil(self.effective_raw_tile_width()), height.div_ceil(self.raw_tile_height))
    }

    pub fn packed_dimensions(&self, width: u32, height: u32) -> (u32, u32) {
        let (tiles_x, tiles_y) = self.tile_grid(width, height);
        (tiles_x * self.packed_tile_width * self.horizontal_split(), tiles_y * self.packed_tile_height)
    }
}

/// Pick the scheme linking two encodings and whether `src → dst` packs.
fn resolve(src: FormatEncoding, dst: FormatEncoding) -> Result<(SwizzleScheme, bool)> {
    use FormatEncoding::*;
    match (src, dst) {
        (IdTex8, Tex32) => Ok((SwizzleScheme::psmt8_to_psmct32(), true)),
        (Tex32, IdTex8) => Ok((SwizzleScheme::psmt8_to_psmct32(), false)),
        (LinearBlocks { depth: a }, SwizzledBlocks { depth: b }) if a == b => Ok((SwizzleScheme::psp_blocks(a)?, true)),
        (SwizzledBlocks { depth: a }, LinearBlocks { depth: b }) if a == b => Ok((SwizzleScheme::psp_blocks(a)?, false)),
        _ => Err(RwError::unsupported(format!("no memory transform from {src:?} to {dst:?}"))),
    }
}

/// Dimensions of the packed form of a `width`×`height` linear image.
pub fn get_packed_format_dimensions(
    linear: FormatEncoding,
    packed: FormatEncoding,
    width:  u32,
    height: u32,
) -> Result<(u32, u32)> {
    let (scheme, _) = resolve(linear, packed)?;
    Ok(scheme.packed_dimensions(width, height))
}

/// Depth of one texel as stored in the given encoding.
pub fn encoding_depth(encoding: FormatEncoding) -> u32 {
    match encoding {
        FormatEncoding::IdTex8 => 8,
        FormatEncoding::Tex32  => 32,
        FormatEncoding::LinearBlocks { depth } | FormatEncoding::SwizzledBlocks { depth } => depth,
    }
}

/// Re-lay `texels` from `src` to `dst` encoding.  `width`×`height` are the
/// linear image dimensions in both directions; rows on either side are
/// aligned to `row_alignment` bytes.  Texels outside the linear extent are
/// neither read nor written.
pub fn transform_image_data(
    src:           FormatEncoding,
    dst:           FormatEncoding,
    texels:        &[u8],
    width:         u32,
    height:        u32,
    row_alignment: u32,
) -> Result<Vec<u8>> {
    if src == dst {
        return Ok(texels.to_vec());
    }
    let (scheme, packing) = resolve(src, dst)?;
    let (packed_w, packed_h) = scheme.packed_dimensions(width, height);
    let raw_stride = row_size(width, scheme.raw_depth, row_alignment);
    let packed_stride = row_size(packed_w, scheme.packed_depth, row_alignment);

    let (in_size, out_size) = if packing {
        (raw_stride * height as usize, packed_stride * packed_h as usize)
    } else {
        (packed_stride * packed_h as usize, raw_stride * height as usize)
    };
    if texels.len() < in_size {
        return Err(RwError::format(format!(
            "{src:?} image of {width}x{height} needs {in_size} bytes, got {}", texels.len()
        )));
    }
    let mut out = vec![0u8; out_size];

    let tile_w = scheme.effective_raw_tile_width();
    let (tiles_x, tiles_y) = scheme.tile_grid(width, height);
    let split = scheme.horizontal_split();
    let depth = scheme.raw_depth;

    for ty in 0..tiles_y {
        let table = scheme.table(ty);
        for tx in 0..tiles_x {
            for (i, cell) in table.iter().enumerate() {
                let lx = i as u32 % tile_w;
                let ly = i as u32 / tile_w;
                let x = tx * tile_w + lx;
                let y = ty * scheme.raw_tile_height + ly;
                if x >= width || y >= height {
                    continue;
                }
                let unit_x = tx * scheme.packed_tile_width * split + cell.unit_x;
                let unit_y = ty * scheme.packed_tile_height + cell.unit_y;

                let raw_off = y as usize * raw_stride;
                let packed_off = unit_y as usize * packed_stride;
                let packed_index = (unit_x * scheme.stride + cell.slot) as usize;

                if packing {
                    let v = get_texel_bits(&texels[raw_off..raw_off + raw_stride], x as usize, depth);
                    set_texel_bits(&mut out[packed_off..packed_off + packed_stride], packed_index, depth, v);
                } else {
                    let v = get_texel_bits(&texels[packed_off..packed_off + packed_stride], packed_index, depth);
                    set_texel_bits(&mut out[raw_off..raw_off + raw_stride], x as usize, depth, v);
                }
            }
        }
    }
    Ok(out)
}
