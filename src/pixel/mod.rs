//! Canonical pixel model: the format-neutral exchange type every native
//! texture backend converts to and from.
//!
//! # Buffers and ownership
//! Texel and palette buffers are `Cow<[u8]>`.  `Borrowed` aliases memory
//! owned elsewhere (usually a native texture), `Owned` was allocated for the
//! caller.  [`PixelDataTraversal::is_newly_allocated`] summarises this so a
//! caller can tell at a glance whether anything was produced for it.
//!
//! # Sizes
//! Raw mip data occupies `row_size(width, depth, row_alignment) * height`
//! bytes.  Block-compressed data occupies one 8- or 16-byte block per 4×4
//! texel tile of the surface, and the surface is the layer size aligned up
//! to 4 in both directions.

pub mod color;
pub mod convert;
pub mod dxt;
pub mod palette;

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RwError};
use color::Rgba8;

// ── Format enums ──────────────────────────────────────────────────────────────

/// Raster color formats.  Discriminants are the values RenderWare stores in
/// bits 8–11 of the raster format flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RasterFormat {
    Default  = 0x0,
    R5G5B5A1 = 0x1,
    R5G6B5   = 0x2,
    R4G4B4A4 = 0x3,
    Lum      = 0x4,
    R8G8B8A8 = 0x5,
    R8G8B8   = 0x6,
    Depth16  = 0x7,
    Depth24  = 0x8,
    Depth32  = 0x9,
    R5G5B5   = 0xA,
    /// Luminance with alpha; not a RenderWare-native format.
    LumAlpha = 0xB,
}

impl RasterFormat {
    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0x0 => RasterFormat::Default,
            0x1 => RasterFormat::R5G5B5A1,
            0x2 => RasterFormat::R5G6B5,
            0x3 => RasterFormat::R4G4B4A4,
            0x4 => RasterFormat::Lum,
            0x5 => RasterFormat::R8G8B8A8,
            0x6 => RasterFormat::R8G8B8,
            0x7 => RasterFormat::Depth16,
            0x8 => RasterFormat::Depth24,
            0x9 => RasterFormat::Depth32,
            0xA => RasterFormat::R5G5B5,
            0xB => RasterFormat::LumAlpha,
            _   => return None,
        })
    }

    pub fn raw(self) -> u32 {
        self as u32
    }

    /// Bit depth a texel of this format occupies when it is not palettized.
    pub fn natural_depth(self) -> u32 {
        match self {
            RasterFormat::Default  => 0,
            RasterFormat::R5G5B5A1 |
            RasterFormat::R5G6B5   |
            RasterFormat::R4G4B4A4 |
            RasterFormat::R5G5B5   |
            RasterFormat::Depth16  |
            RasterFormat::LumAlpha => 16,
            RasterFormat::Lum      => 8,
            RasterFormat::Depth24  => 24,
            RasterFormat::R8G8B8A8 |
            RasterFormat::R8G8B8   |
            RasterFormat::Depth32  => 32,
        }
    }

    pub fn has_alpha_channel(self) -> bool {
        matches!(
            self,
            RasterFormat::R5G5B5A1 | RasterFormat::R4G4B4A4 | RasterFormat::R8G8B8A8 | RasterFormat::LumAlpha
        )
    }

    pub fn is_luminance(self) -> bool {
        matches!(self, RasterFormat::Lum | RasterFormat::LumAlpha)
    }

    pub fn is_depth_buffer(self) -> bool {
        matches!(self, RasterFormat::Depth16 | RasterFormat::Depth24 | RasterFormat::Depth32)
    }

    pub fn name(self) -> &'static str {
        match self {
            RasterFormat::Default  => "default",
            RasterFormat::R5G5B5A1 => "1555",
            RasterFormat::R5G6B5   => "565",
            RasterFormat::R4G4B4A4 => "4444",
            RasterFormat::Lum      => "LUM",
            RasterFormat::R8G8B8A8 => "8888",
            RasterFormat::R8G8B8   => "888",
            RasterFormat::Depth16  => "depth16",
            RasterFormat::Depth24  => "depth24",
            RasterFormat::Depth32  => "depth32",
            RasterFormat::R5G5B5   => "555",
            RasterFormat::LumAlpha => "LUM_ALPHA",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        let s = s.to_ascii_uppercase();
        [
            RasterFormat::R5G5B5A1, RasterFormat::R5G6B5, RasterFormat::R4G4B4A4, RasterFormat::Lum,
            RasterFormat::R8G8B8A8, RasterFormat::R8G8B8, RasterFormat::R5G5B5, RasterFormat::LumAlpha,
        ]
        .into_iter()
        .find(|f| f.name().to_ascii_uppercase() == s)
    }
}

impl fmt::Display for RasterFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Channel order, listed from the lowest bit upward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColorOrder {
    Rgba,
    Bgra,
    Abgr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaletteType {
    None,
    /// 16 entries; the first texel of a byte lives in the low nibble.
    Pal4,
    Pal8,
}

impl PaletteType {
    pub fn max_entries(self) -> u32 {
        match self {
            PaletteType::None => 0,
            PaletteType::Pal4 => 16,
            PaletteType::Pal8 => 256,
        }
    }

    pub fn is_palettized(self) -> bool {
        self != PaletteType::None
    }

    /// Smallest index depth able to address every entry.
    pub fn min_index_depth(self) -> u32 {
        match self {
            PaletteType::None => 0,
            PaletteType::Pal4 => 4,
            PaletteType::Pal8 => 8,
        }
    }
}

/// Block compression, by the index RenderWare uses (0 = none, 1..5 = DXT1..DXT5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Compression {
    None = 0,
    Dxt1 = 1,
    Dxt2 = 2,
    Dxt3 = 3,
    Dxt4 = 4,
    Dxt5 = 5,
}

impl Compression {
    pub fn from_index(index: u32) -> Option<Self> {
        Some(match index {
            0 => Compression::None,
            1 => Compression::Dxt1,
            2 => Compression::Dxt2,
            3 => Compression::Dxt3,
            4 => Compression::Dxt4,
            5 => Compression::Dxt5,
            _ => return None,
        })
    }

    pub fn index(self) -> u32 {
        self as u32
    }

    pub fn is_compressed(self) -> bool {
        self != Compression::None
    }

    /// Bytes per 4×4 block.
    pub fn block_size(self) -> usize {
        match self {
            Compression::None => 0,
            Compression::Dxt1 => 8,
            _                 => 16,
        }
    }

    /// DXT2 and DXT4 store color premultiplied by alpha.
    pub fn is_premultiplied(self) -> bool {
        matches!(self, Compression::Dxt2 | Compression::Dxt4)
    }

    pub fn name(self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Dxt1 => "DXT1",
            Compression::Dxt2 => "DXT2",
            Compression::Dxt3 => "DXT3",
            Compression::Dxt4 => "DXT4",
            Compression::Dxt5 => "DXT5",
        }
    }
}

// ── Format descriptor ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixelFormat {
    pub raster_format: RasterFormat,
    pub depth:         u32,
    pub row_alignment: u32,
    pub color_order:   ColorOrder,
    pub palette_type:  PaletteType,
    pub compression:   Compression,
}

impl PixelFormat {
    /// Uncompressed, unpalettized format at the format's natural depth.
    pub fn raw(raster_format: RasterFormat, color_order: ColorOrder, row_alignment: u32) -> Self {
        Self {
            raster_format,
            depth: raster_format.natural_depth(),
            row_alignment,
            color_order,
            palette_type: PaletteType::None,
            compression: Compression::None,
        }
    }

    /// 32-bit RGBA with 4-byte rows; the intermediate of every lossy path.
    pub const RGBA8888: PixelFormat = PixelFormat {
        raster_format: RasterFormat::R8G8B8A8,
        depth:         32,
        row_alignment: 4,
        color_order:   ColorOrder::Rgba,
        palette_type:  PaletteType::None,
        compression:   Compression::None,
    };

    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_palette(mut self, palette_type: PaletteType, depth: u32) -> Self {
        self.palette_type = palette_type;
        self.depth = depth;
        self
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Depth of one palette entry (palettes are stored in `raster_format`).
    pub fn palette_entry_depth(&self) -> u32 {
        self.raster_format.natural_depth()
    }

    pub fn palette_data_size(&self, palette_size: u32) -> usize {
        palette_size as usize * (self.palette_entry_depth() as usize / 8)
    }

    /// Byte size of one mip level with the given surface dimensions.
    pub fn data_size(&self, width: u32, height: u32) -> usize {
        if self.compression.is_compressed() {
            compressed_data_size(width, height, self.compression)
        } else {
            raw_data_size(width, height, self.depth, self.row_alignment)
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.compression.is_compressed() {
            return write!(f, "{} ({})", self.compression.name(), self.raster_format);
        }
        write!(f, "{} {}bit {:?}", self.raster_format, self.depth, self.color_order)?;
        match self.palette_type {
            PaletteType::None => Ok(()),
            PaletteType::Pal4 => f.write_str(" PAL4"),
            PaletteType::Pal8 => f.write_str(" PAL8"),
        }
    }
}

// ── Size helpers ──────────────────────────────────────────────────────────────

pub fn align_up(value: usize, alignment: usize) -> usize {
    if alignment <= 1 {
        return value;
    }
    value.div_ceil(alignment) * alignment
}

/// Bytes per row of `width` texels at `depth` bits, aligned to `alignment` bytes.
pub fn row_size(width: u32, depth: u32, alignment: u32) -> usize {
    let bits = width as usize * depth as usize;
    align_up(bits.div_ceil(8), alignment as usize)
}

pub fn raw_data_size(width: u32, height: u32, depth: u32, alignment: u32) -> usize {
    row_size(width, depth, alignment) * height as usize
}

pub fn compressed_data_size(width: u32, height: u32, compression: Compression) -> usize {
    let blocks_x = width.div_ceil(4) as usize;
    let blocks_y = height.div_ceil(4) as usize;
    blocks_x * blocks_y * compression.block_size()
}

/// Dimensions of mip `level` below a `width`×`height` base; never below 1.
pub fn mip_dimensions(width: u32, height: u32, level: u32) -> (u32, u32) {
    ((width >> level).max(1), (height >> level).max(1))
}

/// Surface dimensions backing a layer: compressed surfaces cover whole blocks.
pub fn surface_dimensions(layer_width: u32, layer_height: u32, compression: Compression) -> (u32, u32) {
    if compression.is_compressed() {
        (align_up(layer_width as usize, 4) as u32, align_up(layer_height as usize, 4) as u32)
    } else {
        (layer_width, layer_height)
    }
}

// ── Mipmaps and traversals ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MipmapLayer<'a> {
    pub texels:       Cow<'a, [u8]>,
    /// Surface dimensions.
    pub width:        u32,
    pub height:       u32,
    /// Logical dimensions.
    pub layer_width:  u32,
    pub layer_height: u32,
}

impl<'a> MipmapLayer<'a> {
    pub fn new(texels: Cow<'a, [u8]>, width: u32, height: u32) -> Self {
        Self { texels, width, height, layer_width: width, layer_height: height }
    }

    pub fn data_size(&self) -> usize {
        self.texels.len()
    }

    pub fn is_owned(&self) -> bool {
        matches!(self.texels, Cow::Owned(_))
    }

    pub fn borrowed(&self) -> MipmapLayer<'_> {
        MipmapLayer {
            texels:       Cow::Borrowed(&self.texels),
            width:        self.width,
            height:       self.height,
            layer_width:  self.layer_width,
            layer_height: self.layer_height,
        }
    }

    pub fn into_owned(self) -> MipmapLayer<'static> {
        MipmapLayer {
            texels:       Cow::Owned(self.texels.into_owned()),
            width:        self.width,
            height:       self.height,
            layer_width:  self.layer_width,
            layer_height: self.layer_height,
        }
    }
}

/// A complete set of pixels: format, optional palette and every mip level.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelDataTraversal<'a> {
    pub format:             PixelFormat,
    pub palette:            Option<Cow<'a, [u8]>>,
    pub palette_size:       u32,
    pub mipmaps:            Vec<MipmapLayer<'a>>,
    pub has_alpha:          bool,
    pub auto_mipmaps:       bool,
    pub cube_texture:       bool,
    pub raster_type:        u8,
    /// True when any buffer in this traversal was allocated for the caller.
    pub is_newly_allocated: bool,
}

/// Raster type RenderWare uses for textures.
pub const RASTER_TYPE_TEXTURE: u8 = 4;

impl<'a> PixelDataTraversal<'a> {
    pub fn new(format: PixelFormat) -> Self {
        Self {
            format,
            palette:            None,
            palette_size:       0,
            mipmaps:            Vec::new(),
            has_alpha:          false,
            auto_mipmaps:       false,
            cube_texture:       false,
            raster_type:        RASTER_TYPE_TEXTURE,
            is_newly_allocated: false,
        }
    }

    pub fn base_dimensions(&self) -> Option<(u32, u32)> {
        self.mipmaps.first().map(|m| (m.layer_width, m.layer_height))
    }

    pub fn palette_ref(&self) -> Option<&[u8]> {
        self.palette.as_deref()
    }

    /// Recompute `is_newly_allocated` from the buffers actually held.
    pub fn refresh_allocation_flag(&mut self) {
        self.is_newly_allocated = self.mipmaps.iter().any(MipmapLayer::is_owned)
            || matches!(self.palette, Some(Cow::Owned(_)));
    }

    pub fn borrowed(&self) -> PixelDataTraversal<'_> {
        PixelDataTraversal {
            format:             self.format,
            palette:            self.palette.as_deref().map(Cow::Borrowed),
            palette_size:       self.palette_size,
            mipmaps:            self.mipmaps.iter().map(MipmapLayer::borrowed).collect(),
            has_alpha:          self.has_alpha,
            auto_mipmaps:       self.auto_mipmaps,
            cube_texture:       self.cube_texture,
            raster_type:        self.raster_type,
            is_newly_allocated: false,
        }
    }

    pub fn into_owned(self) -> PixelDataTraversal<'static> {
        PixelDataTraversal {
            format:             self.format,
            palette:            self.palette.map(|p| Cow::Owned(p.into_owned())),
            palette_size:       self.palette_size,
            mipmaps:            self.mipmaps.into_iter().map(MipmapLayer::into_owned).collect(),
            has_alpha:          self.has_alpha,
            auto_mipmaps:       self.auto_mipmaps,
            cube_texture:       self.cube_texture,
            raster_type:        self.raster_type,
            is_newly_allocated: true,
        }
    }

    /// Check the size invariants of every buffer.
    pub fn validate(&self) -> Result<()> {
        if self.mipmaps.is_empty() {
            return Err(RwError::format("pixel data has no mipmap layers"));
        }
        if self.format.palette_type.is_palettized() {
            let palette = self.palette.as_deref()
                .ok_or_else(|| RwError::format("palettized pixel data without a palette"))?;
            if self.palette_size == 0 || self.palette_size > self.format.palette_type.max_entries() {
                return Err(RwError::format(format!(
                    "palette of {} entries does not fit {:?}", self.palette_size, self.format.palette_type
                )));
            }
            if palette.len() < self.format.palette_data_size(self.palette_size) {
                return Err(RwError::format("palette buffer is shorter than its entry count"));
            }
        }
        for (level, mip) in self.mipmaps.iter().enumerate() {
            let expected = self.format.data_size(mip.width, mip.height);
            if mip.texels.len() < expected {
                return Err(RwError::format(format!(
                    "mip {level} holds {} bytes, {expected} required for {}x{} {}",
                    mip.texels.len(), mip.width, mip.height, self.format
                )));
            }
        }
        Ok(())
    }
}

/// One mip level with the format context needed to interpret it.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMipmapLayer<'a> {
    pub format:             PixelFormat,
    pub mipmap:             MipmapLayer<'a>,
    pub palette:            Option<Cow<'a, [u8]>>,
    pub palette_size:       u32,
    pub has_alpha:          bool,
    pub is_newly_allocated: bool,
}

impl<'a> RawMipmapLayer<'a> {
    pub fn into_owned(self) -> RawMipmapLayer<'static> {
        RawMipmapLayer {
            format:             self.format,
            mipmap:             self.mipmap.into_owned(),
            palette:            self.palette.map(|p| Cow::Owned(p.into_owned())),
            palette_size:       self.palette_size,
            has_alpha:          self.has_alpha,
            is_newly_allocated: true,
        }
    }
}

// ── Bitmap ────────────────────────────────────────────────────────────────────

/// A plain 32-bit RGBA image (8888, RGBA order, rows of `width * 4` bytes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    width:  u32,
    height: u32,
    data:   Vec<u8>,
}

impl Bitmap {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height, data: vec![0u8; width as usize * height as usize * 4] }
    }

    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        if data.len() != expected || width == 0 || height == 0 {
            return Err(RwError::format(format!(
                "bitmap of {width}x{height} needs {expected} bytes, got {}", data.len()
            )));
        }
        Ok(Self { width, height, data })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn pixel(&self, x: u32, y: u32) -> Rgba8 {
        let i = (y as usize * self.width as usize + x as usize) * 4;
        Rgba8::new(self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3])
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, c: Rgba8) {
        let i = (y as usize * self.width as usize + x as usize) * 4;
        self.data[i..i + 4].copy_from_slice(&[c.r, c.g, c.b, c.a]);
    }

    pub fn has_alpha(&self) -> bool {
        self.data.chunks_exact(4).any(|px| px[3] != 255)
    }

    /// Wrap the bitmap as single-level pixel data without copying.
    pub fn as_pixel_data(&self) -> PixelDataTraversal<'_> {
        let mut data = PixelDataTraversal::new(PixelFormat::RGBA8888);
        data.mipmaps.push(MipmapLayer::new(Cow::Borrowed(&self.data), self.width, self.height));
        data.has_alpha = self.has_alpha();
        data
    }

    /// Move the bitmap into single-level pixel data.
    pub fn into_pixel_data(self) -> PixelDataTraversal<'static> {
        let has_alpha = self.has_alpha();
        let mut data = PixelDataTraversal::new(PixelFormat::RGBA8888);
        data.mipmaps.push(MipmapLayer::new(Cow::Owned(self.data), self.width, self.height));
        data.has_alpha = has_alpha;
        data.is_newly_allocated = true;
        data
    }
}
