//! Pieces shared by the Direct3D 8 and 9 texture-native layouts.
//!
//! Both layouts start with the same header and end with the same palette
//! and mip sections:
//!
//! | Size | Field |
//! |------|-------|
//! | 4    | platform descriptor |
//! | 4    | filter mode (bits 0–7), U addressing (8–11), V addressing (12–15) |
//! | 32   | texture name, NUL padded |
//! | 32   | mask name, NUL padded |
//! | 4    | raster flags |
//! | ...  | layout specific |
//! | n×4  | palette (256 or 16 RGBA entries), palettized rasters only |
//! | ...  | per mip: `u32` size, texels |

pub mod d3d8;
pub mod d3d9;

use std::borrow::Cow;
use std::io::{Read, Seek, Write};

use crate::error::{Result, RwError};
use crate::pixel::convert::{convert_mipmap_layer_ex, convert_pixel_data_deferred, FormatDesc, MipDims};
use crate::pixel::{
    mip_dimensions, surface_dimensions, ColorOrder, Compression, MipmapLayer, PaletteType, PixelDataTraversal,
    PixelFormat, RasterFormat, RawMipmapLayer, RASTER_TYPE_TEXTURE,
};
use crate::stream::{BlockReader, BlockWriter};
use crate::texture::{SamplerState, TextureProperties};
use crate::warnings::WarningSink;

/// D3D surfaces pad every row to four bytes.
pub const D3D_ROW_ALIGNMENT: u32 = 4;

pub const NAME_SLOT_SIZE: usize = 32;

// ── Raster flags ──────────────────────────────────────────────────────────────

pub mod raster_flags {
    pub const FORMAT_MASK: u32 = 0x0F00;
    pub const AUTO_MIPMAP: u32 = 0x1000;
    pub const PAL8:        u32 = 0x2000;
    pub const PAL4:        u32 = 0x4000;
    pub const MIPMAP:      u32 = 0x8000;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterFlags {
    pub format:       RasterFormat,
    pub palette_type: PaletteType,
    pub auto_mipmaps: bool,
    pub has_mipmaps:  bool,
}

impl RasterFlags {
    pub fn pack(&self) -> u32 {
        let mut raw = (self.format.raw() << 8) & raster_flags::FORMAT_MASK;
        if self.auto_mipmaps {
            raw |= raster_flags::AUTO_MIPMAP;
        }
        raw |= match self.palette_type {
            PaletteType::None => 0,
            PaletteType::Pal8 => raster_flags::PAL8,
            PaletteType::Pal4 => raster_flags::PAL4,
        };
        if self.has_mipmaps {
            raw |= raster_flags::MIPMAP;
        }
        raw
    }

    pub fn unpack(raw: u32) -> Result<Self> {
        let nibble = (raw & raster_flags::FORMAT_MASK) >> 8;
        let format = RasterFormat::from_raw(nibble)
            .ok_or_else(|| RwError::format(format!("unknown raster format {nibble:#x}")))?;
        let palette_type = match (raw & raster_flags::PAL8 != 0, raw & raster_flags::PAL4 != 0) {
            (false, false) => PaletteType::None,
            (true, false)  => PaletteType::Pal8,
            (false, true)  => PaletteType::Pal4,
            (true, true)   => return Err(RwError::format("raster flags claim both PAL8 and PAL4")),
        };
        Ok(Self {
            format,
            palette_type,
            auto_mipmaps: raw & raster_flags::AUTO_MIPMAP != 0,
            has_mipmaps:  raw & raster_flags::MIPMAP != 0,
        })
    }
}

// ── Names ─────────────────────────────────────────────────────────────────────

pub fn read_name<R: Read + Seek>(reader: &mut BlockReader<R>) -> Result<String> {
    let mut raw = [0u8; NAME_SLOT_SIZE];
    reader.read_exact(&mut raw)?;
    let end = raw.iter().position(|&b| b == 0).unwrap_or(NAME_SLOT_SIZE);
    Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
}

/// Write a NUL-terminated name into a 32-byte slot, truncating to 31 bytes.
pub fn write_name<W: Write + Seek>(warnings: &dyn WarningSink, writer: &mut BlockWriter<W>, name: &str) -> Result<()> {
    let mut raw = [0u8; NAME_SLOT_SIZE];
    let bytes = name.as_bytes();
    let len = bytes.len().min(NAME_SLOT_SIZE - 1);
    if bytes.len() > len {
        warnings.warn(format!(
            "name \"{name}\" is longer than {} bytes and was truncated", NAME_SLOT_SIZE - 1
        ));
    }
    raw[..len].copy_from_slice(&bytes[..len]);
    writer.write_all(&raw)?;
    Ok(())
}

/// Common header up to and including the raster flags.
pub fn read_common_header<R: Read + Seek>(
    warnings: &dyn WarningSink,
    reader:   &mut BlockReader<R>,
    platform: u32,
    props:    &mut TextureProperties,
) -> Result<RasterFlags> {
    let found = reader.read_u32()?;
    if found != platform {
        return Err(RwError::format(format!("platform {found:#x} where {platform:#x} was expected")));
    }
    let (sampler, exact) = SamplerState::unpack(reader.read_u32()?);
    if !exact {
        warnings.notice("texture sampler state has unknown filter or addressing values".to_string());
    }
    props.sampler = sampler;
    props.name = read_name(reader)?;
    props.mask_name = read_name(reader)?;
    RasterFlags::unpack(reader.read_u32()?)
}

pub fn write_common_header<W: Write + Seek>(
    warnings: &dyn WarningSink,
    writer:   &mut BlockWriter<W>,
    platform: u32,
    props:    &TextureProperties,
    flags:    &RasterFlags,
) -> Result<()> {
    writer.write_u32(platform)?;
    writer.write_u32(props.sampler.pack())?;
    write_name(warnings, writer, &props.name)?;
    write_name(warnings, writer, &props.mask_name)?;
    writer.write_u32(flags.pack())?;
    Ok(())
}

// ── Pixel storage ─────────────────────────────────────────────────────────────

/// Pixel payload of a D3D native texture.  Mip buffers are owned; the
/// canonical view borrows them.
#[derive(Debug, Clone, PartialEq)]
pub struct D3DPixels {
    pub raster_format: RasterFormat,
    pub depth:         u32,
    pub color_order:   ColorOrder,
    pub palette_type:  PaletteType,
    pub palette:       Option<Vec<u8>>,
    pub palette_size:  u32,
    pub compression:   Compression,
    pub mipmaps:       Vec<MipmapLayer<'static>>,
    pub has_alpha:     bool,
    pub auto_mipmaps:  bool,
    pub raster_type:   u8,
}

impl Default for D3DPixels {
    fn default() -> Self {
        Self {
            raster_format: RasterFormat::Default,
            depth:         0,
            color_order:   ColorOrder::Bgra,
            palette_type:  PaletteType::None,
            palette:       None,
            palette_size:  0,
            compression:   Compression::None,
            mipmaps:       Vec::new(),
            has_alpha:     false,
            auto_mipmaps:  false,
            raster_type:   RASTER_TYPE_TEXTURE,
        }
    }
}

impl D3DPixels {
    pub fn format(&self) -> PixelFormat {
        PixelFormat {
            raster_format: self.raster_format,
            depth:         self.depth,
            row_alignment: D3D_ROW_ALIGNMENT,
            color_order:   self.color_order,
            palette_type:  self.palette_type,
            compression:   self.compression,
        }
    }

    pub fn base_dimensions(&self) -> (u32, u32) {
        self.mipmaps.first().map(|m| (m.layer_width, m.layer_height)).unwrap_or((0, 0))
    }

    pub fn is_empty(&self) -> bool {
        self.mipmaps.is_empty()
    }

    pub fn describe(&self) -> FormatDesc<'_> {
        FormatDesc { format: self.format(), palette: self.palette.as_deref(), palette_size: self.palette_size }
    }

    /// Canonical view over the stored buffers.
    pub fn traversal(&self) -> PixelDataTraversal<'_> {
        PixelDataTraversal {
            format:             self.format(),
            palette:            self.palette.as_deref().map(Cow::Borrowed),
            palette_size:       self.palette_size,
            mipmaps:            self.mipmaps.iter().map(MipmapLayer::borrowed).collect(),
            has_alpha:          self.has_alpha,
            auto_mipmaps:       self.auto_mipmaps,
            cube_texture:       false,
            raster_type:        self.raster_type,
            is_newly_allocated: false,
        }
    }

    pub fn raw_layer(&self, level: usize) -> Result<RawMipmapLayer<'_>> {
        let mip = self.mipmaps.get(level).ok_or_else(|| {
            RwError::format(format!("mip level {level} out of range ({} levels)", self.mipmaps.len()))
        })?;
        Ok(RawMipmapLayer {
            format:             self.format(),
            mipmap:             mip.borrowed(),
            palette:            self.palette.as_deref().map(Cow::Borrowed),
            palette_size:       self.palette_size,
            has_alpha:          self.has_alpha,
            is_newly_allocated: false,
        })
    }

    /// Take over a traversal already in this storage's target format.
    /// Returns whether every buffer was moved rather than copied.
    pub fn acquire(data: PixelDataTraversal<'_>) -> (Self, bool) {
        let moved = data.mipmaps.iter().all(MipmapLayer::is_owned)
            && !matches!(data.palette, Some(Cow::Borrowed(_)));
        let palettized = data.format.palette_type.is_palettized();
        let palette_size = if palettized { data.palette_size } else { 0 };
        let pixels = Self {
            raster_format: data.format.raster_format,
            depth:         data.format.depth,
            color_order:   data.format.color_order,
            palette_type:  data.format.palette_type,
            palette:       data.palette.filter(|_| palettized).map(Cow::into_owned),
            palette_size,
            compression:   data.format.compression,
            mipmaps:       data.mipmaps.into_iter().map(MipmapLayer::into_owned).collect(),
            has_alpha:     data.has_alpha,
            auto_mipmaps:  data.auto_mipmaps,
            raster_type:   data.raster_type,
        };
        (pixels, moved)
    }

    /// Store `data` as `target`, converting when the encodings differ.
    pub fn store(warnings: &dyn WarningSink, data: PixelDataTraversal<'_>, target: &PixelFormat) -> Result<(Self, bool)> {
        data.validate()?;
        if data.cube_texture {
            return Err(RwError::unsupported("cube textures are not supported by D3D native textures"));
        }
        if data.format == *target {
            return Ok(Self::acquire(data));
        }
        let converted = convert_pixel_data_deferred(warnings, &data, target)?.into_owned();
        let (pixels, _) = Self::acquire(converted);
        Ok((pixels, false))
    }

    /// Append the next mip level, converting it to the stored format.
    pub fn push_layer(&mut self, warnings: &dyn WarningSink, layer: RawMipmapLayer<'_>) -> Result<bool> {
        let (base_w, base_h) = match self.mipmaps.first() {
            Some(m) => (m.layer_width, m.layer_height),
            None    => return Err(RwError::format("cannot add a mip level to a texture without pixels")),
        };
        let level = self.mipmaps.len() as u32;
        let expected = mip_dimensions(base_w, base_h, level);
        let got = (layer.mipmap.layer_width, layer.mipmap.layer_height);
        if got != expected {
            return Err(RwError::format(format!(
                "mip level {level} must be {}x{}, got {}x{}", expected.0, expected.1, got.0, got.1
            )));
        }

        let src = FormatDesc { format: layer.format, palette: layer.palette.as_deref(), palette_size: layer.palette_size };
        let dst = self.describe();
        let direct = src.is_same_encoding(&dst) && layer.mipmap.is_owned();
        let mip = if src.is_same_encoding(&dst) {
            layer.mipmap.into_owned()
        } else {
            let (texels, dims) = convert_mipmap_layer_ex(
                warnings, &layer.mipmap.texels, MipDims::of(&layer.mipmap), &src, &dst, false,
            )?;
            MipmapLayer {
                texels:       Cow::Owned(texels.into_owned()),
                width:        dims.width,
                height:       dims.height,
                layer_width:  dims.layer_width,
                layer_height: dims.layer_height,
            }
        };
        self.mipmaps.push(mip);
        Ok(direct)
    }

    // ── Palette and mip sections ──────────────────────────────────────────────

    pub fn read_palette<R: Read + Seek>(&mut self, reader: &mut BlockReader<R>) -> Result<()> {
        if !self.palette_type.is_palettized() {
            self.palette = None;
            self.palette_size = 0;
            return Ok(());
        }
        let entries = self.palette_type.max_entries();
        self.palette = Some(reader.read_vec(entries as usize * 4)?);
        self.palette_size = entries;
        Ok(())
    }

    /// Palettes are always written at full size, padded with zeros.
    pub fn write_palette<W: Write + Seek>(&self, writer: &mut BlockWriter<W>) -> Result<()> {
        if !self.palette_type.is_palettized() {
            return Ok(());
        }
        let full = self.palette_type.max_entries() as usize * 4;
        let palette = self.palette.as_deref().unwrap_or(&[]);
        let used = palette.len().min(full);
        writer.write_all(&palette[..used])?;
        writer.write_zeros(full - used)?;
        Ok(())
    }

    /// Read `count` levels below a `width`×`height` base.  `expected_size`
    /// returns the size a level must have, when it is known.
    pub fn read_mipmaps<R: Read + Seek>(
        &mut self,
        warnings:      &dyn WarningSink,
        reader:        &mut BlockReader<R>,
        width:         u32,
        height:        u32,
        count:         u32,
        expected_size: impl Fn(u32, u32) -> Option<usize>,
    ) -> Result<()> {
        if count == 0 {
            return Err(RwError::format("texture has no mip levels"));
        }
        self.mipmaps.clear();
        for level in 0..count {
            let size = reader.read_u32()? as usize;
            let (lw, lh) = mip_dimensions(width, height, level);
            let (sw, sh) = surface_dimensions(lw, lh, self.compression);
            if size == 0 && level > 0 {
                warnings.warn(format!("mip chain ends early at level {level} of {count}"));
                break;
            }
            if let Some(expected) = expected_size(sw, sh) {
                if size < expected {
                    return Err(RwError::format(format!(
                        "mip level {level} ({lw}x{lh}) holds {size} bytes, {expected} required"
                    )));
                }
            }
            let texels = reader.read_vec(size)?;
            self.mipmaps.push(MipmapLayer {
                texels:       Cow::Owned(texels),
                width:        sw,
                height:       sh,
                layer_width:  lw,
                layer_height: lh,
            });
        }
        Ok(())
    }

    pub fn write_mipmaps<W: Write + Seek>(&self, writer: &mut BlockWriter<W>) -> Result<()> {
        for mip in &self.mipmaps {
            let size = u32::try_from(mip.texels.len())
                .map_err(|_| RwError::format("mip level does not fit a 32-bit size field"))?;
            writer.write_u32(size)?;
            writer.write_all(&mip.texels)?;
        }
        Ok(())
    }

    pub fn raster_flags(&self) -> RasterFlags {
        RasterFlags {
            format:       self.raster_format,
            palette_type: self.palette_type,
            auto_mipmaps: self.auto_mipmaps,
            has_mipmaps:  self.mipmaps.len() > 1,
        }
    }

    pub fn check_dimensions(&self) -> Result<(u16, u16)> {
        let (w, h) = self.base_dimensions();
        let w = u16::try_from(w).map_err(|_| RwError::format(format!("width {w} exceeds 65535")))?;
        let h = u16::try_from(h).map_err(|_| RwError::format(format!("height {h} exceeds 65535")))?;
        if self.mipmaps.is_empty() {
            return Err(RwError::format("texture has no pixel data"));
        }
        if self.mipmaps.len() > u8::MAX as usize {
            return Err(RwError::format("more than 255 mip levels"));
        }
        Ok((w, h))
    }
}

/// Palette storage format shared by both layouts: 8888 or 888 entries in
/// RGBA byte order, index depth 8 (PAL8) or 4 (PAL4).
pub fn palettized_storage(format: &PixelFormat) -> PixelFormat {
    let entry_format = match format.raster_format {
        RasterFormat::R8G8B8 => RasterFormat::R8G8B8,
        _                    => RasterFormat::R8G8B8A8,
    };
    PixelFormat::raw(entry_format, ColorOrder::Rgba, D3D_ROW_ALIGNMENT)
        .with_palette(format.palette_type, format.palette_type.min_index_depth())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raster_flags_round_trip() {
        let flags = RasterFlags {
            format:       RasterFormat::R8G8B8A8,
            palette_type: PaletteType::Pal8,
            auto_mipmaps: false,
            has_mipmaps:  true,
        };
        assert_eq!(flags.pack(), 0x0500 | 0x2000 | 0x8000);
        assert_eq!(RasterFlags::unpack(flags.pack()).unwrap(), flags);
        assert!(RasterFlags::unpack(0x6500).is_err());
        assert!(RasterFlags::unpack(0x0F00).is_err());
    }

    #[test]
    fn palette_storage_keeps_888_entries() {
        let fmt = PixelFormat::raw(RasterFormat::R8G8B8, ColorOrder::Bgra, 1).with_palette(PaletteType::Pal4, 8);
        let stored = palettized_storage(&fmt);
        assert_eq!(stored.raster_format, RasterFormat::R8G8B8);
        assert_eq!(stored.color_order, ColorOrder::Rgba);
        assert_eq!(stored.depth, 4);
        assert_eq!(stored.row_alignment, 4);
    }
}
