//! Direct3D 9 texture natives (platform descriptor 9).
//!
//! The body after the shared header:
//!
//! | Size | Field |
//! |------|-------|
//! | 4    | `D3DFORMAT` of the stored texels |
//! | 2+2  | width, height |
//! | 1    | depth |
//! | 1    | mip count |
//! | 1    | raster type (low 3 bits) |
//! | 1    | bit 0 has alpha, bit 1 cube map, bit 2 auto mipmaps, bit 3 not RW compatible |
//!
//! Formats without a canonical equivalent are stored as-is and decoded by a
//! [`D3DFormatHandler`] registered for their `D3DFORMAT`.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::io::{Read, Seek, Write};
use std::rc::Rc;

use super::{palettized_storage, read_common_header, write_common_header, D3DPixels, D3D_ROW_ALIGNMENT};
use crate::error::{Result, RwError};
use crate::native::{
    AcquireFeedback, CompatibilityVerdict, NativeTextureInfo, PlatformClaim, StorageCapabilities,
    TexNativeTypeProvider,
};
use crate::pixel::color::{expand_channel, is_valid_index_depth, reduce_channel};
use crate::pixel::convert::{convert_mipmap_layer_ex, convert_pixel_data_deferred, DxtSupport, FormatDesc, MipDims};
use crate::pixel::{
    mip_dimensions, raw_data_size, row_size, ColorOrder, Compression, MipmapLayer, PaletteType, PixelDataTraversal,
    PixelFormat, RasterFormat, RawMipmapLayer,
};
use crate::stream::{BlockReader, BlockWriter};
use crate::texture::TextureProperties;
use crate::warnings::WarningSink;

pub const PLATFORM_D3D9: u32 = 9;
pub const DEVICE_ID_D3D9: u16 = 2;

/// `D3DFORMAT` values used by texture natives.
pub mod d3dfmt {
    pub const UNKNOWN:  u32 = 0;
    pub const R8G8B8:   u32 = 20;
    pub const A8R8G8B8: u32 = 21;
    pub const X8R8G8B8: u32 = 22;
    pub const R5G6B5:   u32 = 23;
    pub const X1R5G5B5: u32 = 24;
    pub const A1R5G5B5: u32 = 25;
    pub const A4R4G4B4: u32 = 26;
    pub const R3G3B2:   u32 = 27;
    pub const A8:       u32 = 28;
    pub const X4R4G4B4: u32 = 30;
    pub const A8B8G8R8: u32 = 32;
    pub const X8B8G8R8: u32 = 33;
    pub const P8:       u32 = 41;
    pub const L8:       u32 = 50;
    pub const A8L8:     u32 = 51;
    pub const A4L4:     u32 = 52;
    pub const DXT1:     u32 = 0x3154_5844;
    pub const DXT2:     u32 = 0x3254_5844;
    pub const DXT3:     u32 = 0x3354_5844;
    pub const DXT4:     u32 = 0x3454_5844;
    pub const DXT5:     u32 = 0x3554_5844;

    pub fn name(format: u32) -> Option<&'static str> {
        Some(match format {
            R8G8B8   => "R8G8B8",
            A8R8G8B8 => "A8R8G8B8",
            X8R8G8B8 => "X8R8G8B8",
            R5G6B5   => "R5G6B5",
            X1R5G5B5 => "X1R5G5B5",
            A1R5G5B5 => "A1R5G5B5",
            A4R4G4B4 => "A4R4G4B4",
            R3G3B2   => "R3G3B2",
            A8       => "A8",
            X4R4G4B4 => "X4R4G4B4",
            A8B8G8R8 => "A8B8G8R8",
            X8B8G8R8 => "X8B8G8R8",
            P8       => "P8",
            L8       => "L8",
            A8L8     => "A8L8",
            A4L4     => "A4L4",
            DXT1     => "DXT1",
            DXT2     => "DXT2",
            DXT3     => "DXT3",
            DXT4     => "DXT4",
            DXT5     => "DXT5",
            _        => return None,
        })
    }
}

fn fourcc(compression: Compression) -> u32 {
    match compression {
        Compression::None => d3dfmt::UNKNOWN,
        Compression::Dxt1 => d3dfmt::DXT1,
        Compression::Dxt2 => d3dfmt::DXT2,
        Compression::Dxt3 => d3dfmt::DXT3,
        Compression::Dxt4 => d3dfmt::DXT4,
        Compression::Dxt5 => d3dfmt::DXT5,
    }
}

fn compression_of(d3d_format: u32) -> Option<Compression> {
    Some(match d3d_format {
        d3dfmt::DXT1 => Compression::Dxt1,
        d3dfmt::DXT2 => Compression::Dxt2,
        d3dfmt::DXT3 => Compression::Dxt3,
        d3dfmt::DXT4 => Compression::Dxt4,
        d3dfmt::DXT5 => Compression::Dxt5,
        _            => return None,
    })
}

/// `D3DFORMAT` of a format produced by [`D3D9Provider::storage_format`].
fn d3d_format_of(format: &PixelFormat) -> u32 {
    use RasterFormat as F;
    if format.compression.is_compressed() {
        return fourcc(format.compression);
    }
    if format.palette_type.is_palettized() {
        return d3dfmt::P8;
    }
    match (format.raster_format, format.depth, format.color_order) {
        (F::R5G5B5A1, 16, _)                => d3dfmt::A1R5G5B5,
        (F::R5G6B5, 16, _)                  => d3dfmt::R5G6B5,
        (F::R4G4B4A4, 16, _)                => d3dfmt::A4R4G4B4,
        (F::R5G5B5, 16, _)                  => d3dfmt::X1R5G5B5,
        (F::Lum, 8, _)                      => d3dfmt::L8,
        (F::LumAlpha, 8, _)                 => d3dfmt::A4L4,
        (F::LumAlpha, 16, _)                => d3dfmt::A8L8,
        (F::R8G8B8A8, 32, ColorOrder::Rgba) => d3dfmt::A8B8G8R8,
        (F::R8G8B8, 32, ColorOrder::Rgba)   => d3dfmt::X8B8G8R8,
        (F::R8G8B8, 32, _)                  => d3dfmt::X8R8G8B8,
        (F::R8G8B8, 24, _)                  => d3dfmt::R8G8B8,
        _                                   => d3dfmt::A8R8G8B8,
    }
}

/// Canonical format of texels stored as `d3d_format`, if one exists.
fn canonical_format(d3d_format: u32, raster_format: RasterFormat, palette_type: PaletteType, depth: u32) -> Result<Option<PixelFormat>> {
    use RasterFormat as F;
    let raw = |format: F, order: ColorOrder| PixelFormat::raw(format, order, D3D_ROW_ALIGNMENT);
    let format = match d3d_format {
        d3dfmt::A8R8G8B8 => raw(F::R8G8B8A8, ColorOrder::Bgra),
        d3dfmt::X8R8G8B8 => raw(F::R8G8B8, ColorOrder::Bgra),
        d3dfmt::R8G8B8   => raw(F::R8G8B8, ColorOrder::Bgra).with_depth(24),
        d3dfmt::A8B8G8R8 => raw(F::R8G8B8A8, ColorOrder::Rgba),
        d3dfmt::X8B8G8R8 => raw(F::R8G8B8, ColorOrder::Rgba),
        d3dfmt::R5G6B5   => raw(F::R5G6B5, ColorOrder::Bgra),
        d3dfmt::X1R5G5B5 => raw(F::R5G5B5, ColorOrder::Bgra),
        d3dfmt::A1R5G5B5 => raw(F::R5G5B5A1, ColorOrder::Bgra),
        d3dfmt::A4R4G4B4 => raw(F::R4G4B4A4, ColorOrder::Bgra),
        d3dfmt::L8       => raw(F::Lum, ColorOrder::Bgra),
        d3dfmt::A8L8     => raw(F::LumAlpha, ColorOrder::Bgra),
        d3dfmt::A4L4     => raw(F::LumAlpha, ColorOrder::Bgra).with_depth(8),
        d3dfmt::P8 => {
            if !palette_type.is_palettized() {
                return Err(RwError::format("P8 texture without a palette flag"));
            }
            if !is_valid_index_depth(palette_type, depth) {
                return Err(RwError::format(format!("{depth}-bit indices cannot address a {palette_type:?} palette")));
            }
            let entries = PixelFormat::raw(raster_format, ColorOrder::Rgba, D3D_ROW_ALIGNMENT)
                .with_palette(palette_type, depth);
            palettized_storage(&entries).with_depth(depth)
        }
        other => match compression_of(other) {
            Some(c) => raw(raster_format, ColorOrder::Bgra).with_depth(depth).with_compression(c),
            None    => return Ok(None),
        },
    };
    Ok(Some(format))
}

fn has_canonical_mapping(d3d_format: u32) -> bool {
    matches!(
        canonical_format(d3d_format, RasterFormat::R8G8B8A8, PaletteType::Pal8, 8),
        Ok(Some(_))
    )
}

// ── Format handlers ───────────────────────────────────────────────────────────

/// Codec for a `D3DFORMAT` with no canonical equivalent.  Buffers on both
/// sides use 4-byte row alignment.
pub trait D3DFormatHandler {
    fn name(&self) -> &str;

    /// Bits per texel in the D3D encoding.
    fn depth(&self) -> u32;

    /// Non-palettized, uncompressed format the texels decode to.
    fn canonical_format(&self) -> PixelFormat;

    fn format_data_size(&self, width: u32, height: u32) -> usize {
        raw_data_size(width, height, self.depth(), D3D_ROW_ALIGNMENT)
    }

    fn convert_to_rw(&self, src: &[u8], width: u32, height: u32, dst: &mut [u8]) -> Result<()>;

    fn convert_from_rw(&self, src: &[u8], width: u32, height: u32, dst: &mut [u8]) -> Result<()>;
}

fn check_buffers(src: &[u8], src_size: usize, dst: &[u8], dst_size: usize, name: &str) -> Result<()> {
    if src.len() < src_size || dst.len() < dst_size {
        return Err(RwError::format(format!(
            "{name}: buffers of {}/{} bytes, {src_size}/{dst_size} required", src.len(), dst.len()
        )));
    }
    Ok(())
}

/// Alpha-only texels; color decodes as black.
#[derive(Debug, Clone, Copy, Default)]
pub struct A8Handler;

impl D3DFormatHandler for A8Handler {
    fn name(&self) -> &str {
        "A8"
    }

    fn depth(&self) -> u32 {
        8
    }

    fn canonical_format(&self) -> PixelFormat {
        PixelFormat::raw(RasterFormat::R8G8B8A8, ColorOrder::Bgra, D3D_ROW_ALIGNMENT)
    }

    fn convert_to_rw(&self, src: &[u8], width: u32, height: u32, dst: &mut [u8]) -> Result<()> {
        let (src_row, dst_row) = (row_size(width, 8, D3D_ROW_ALIGNMENT), row_size(width, 32, D3D_ROW_ALIGNMENT));
        check_buffers(src, src_row * height as usize, dst, dst_row * height as usize, self.name())?;
        for y in 0..height as usize {
            let s = &src[y * src_row..][..width as usize];
            let d = &mut dst[y * dst_row..][..width as usize * 4];
            for (px, &a) in d.chunks_exact_mut(4).zip(s) {
                px.copy_from_slice(&[0, 0, 0, a]);
            }
        }
        Ok(())
    }

    fn convert_from_rw(&self, src: &[u8], width: u32, height: u32, dst: &mut [u8]) -> Result<()> {
        let (src_row, dst_row) = (row_size(width, 32, D3D_ROW_ALIGNMENT), row_size(width, 8, D3D_ROW_ALIGNMENT));
        check_buffers(src, src_row * height as usize, dst, dst_row * height as usize, self.name())?;
        for y in 0..height as usize {
            let s = &src[y * src_row..][..width as usize * 4];
            let d = &mut dst[y * dst_row..][..width as usize];
            for (a, px) in d.iter_mut().zip(s.chunks_exact(4)) {
                *a = px[3];
            }
        }
        Ok(())
    }
}

/// 4-bit RGB in 16-bit texels; the top nibble is unused.
#[derive(Debug, Clone, Copy, Default)]
pub struct X4R4G4B4Handler;

impl D3DFormatHandler for X4R4G4B4Handler {
    fn name(&self) -> &str {
        "X4R4G4B4"
    }

    fn depth(&self) -> u32 {
        16
    }

    fn canonical_format(&self) -> PixelFormat {
        PixelFormat::raw(RasterFormat::R8G8B8, ColorOrder::Bgra, D3D_ROW_ALIGNMENT)
    }

    fn convert_to_rw(&self, src: &[u8], width: u32, height: u32, dst: &mut [u8]) -> Result<()> {
        let (src_row, dst_row) = (row_size(width, 16, D3D_ROW_ALIGNMENT), row_size(width, 32, D3D_ROW_ALIGNMENT));
        check_buffers(src, src_row * height as usize, dst, dst_row * height as usize, self.name())?;
        for y in 0..height as usize {
            let s = &src[y * src_row..][..width as usize * 2];
            let d = &mut dst[y * dst_row..][..width as usize * 4];
            for (px, texel) in d.chunks_exact_mut(4).zip(s.chunks_exact(2)) {
                let v = u16::from_le_bytes([texel[0], texel[1]]) as u32;
                px.copy_from_slice(&[
                    expand_channel(v & 0xF, 4),
                    expand_channel((v >> 4) & 0xF, 4),
                    expand_channel((v >> 8) & 0xF, 4),
                    0xFF,
                ]);
            }
        }
        Ok(())
    }

    fn convert_from_rw(&self, src: &[u8], width: u32, height: u32, dst: &mut [u8]) -> Result<()> {
        let (src_row, dst_row) = (row_size(width, 32, D3D_ROW_ALIGNMENT), row_size(width, 16, D3D_ROW_ALIGNMENT));
        check_buffers(src, src_row * height as usize, dst, dst_row * height as usize, self.name())?;
        for y in 0..height as usize {
            let s = &src[y * src_row..][..width as usize * 4];
            let d = &mut dst[y * dst_row..][..width as usize * 2];
            for (texel, px) in d.chunks_exact_mut(2).zip(s.chunks_exact(4)) {
                let v = 0xF000
                    | (reduce_channel(px[2], 4) << 8)
                    | (reduce_channel(px[1], 4) << 4)
                    | reduce_channel(px[0], 4);
                texel.copy_from_slice(&(v as u16).to_le_bytes());
            }
        }
        Ok(())
    }
}

fn with_texels(mip: &MipmapLayer<'_>, texels: Vec<u8>) -> MipmapLayer<'static> {
    MipmapLayer {
        texels:       Cow::Owned(texels),
        width:        mip.width,
        height:       mip.height,
        layer_width:  mip.layer_width,
        layer_height: mip.layer_height,
    }
}

// ── Native texture ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct D3D9Texture {
    pub pixels:           D3DPixels,
    pub d3d_format:       u32,
    /// Texels are in a canonical encoding rather than handler-decoded.
    pub is_direct_format: bool,
    pub is_cube:          bool,
}

impl Default for D3D9Texture {
    fn default() -> Self {
        Self {
            pixels:           D3DPixels::default(),
            d3d_format:       d3dfmt::UNKNOWN,
            is_direct_format: true,
            is_cube:          false,
        }
    }
}

// ── Provider ──────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct D3D9Provider {
    name:     String,
    handlers: HashMap<u32, Rc<dyn D3DFormatHandler>>,
}

impl fmt::Debug for D3D9Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut handlers: Vec<_> = self.handlers.iter().map(|(k, h)| (*k, h.name().to_string())).collect();
        handlers.sort();
        f.debug_struct("D3D9Provider").field("name", &self.name).field("handlers", &handlers).finish()
    }
}

impl Default for D3D9Provider {
    fn default() -> Self {
        Self::new()
    }
}

impl D3D9Provider {
    pub const NAME: &'static str = "Direct3D9";

    /// Provider with no format handlers.
    pub fn new() -> Self {
        Self::named(Self::NAME)
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into(), handlers: HashMap::new() }
    }

    /// Provider with the A8 and X4R4G4B4 handlers installed.
    pub fn with_standard_handlers() -> Self {
        let mut provider = Self::new();
        provider.handlers.insert(d3dfmt::A8, Rc::new(A8Handler));
        provider.handlers.insert(d3dfmt::X4R4G4B4, Rc::new(X4R4G4B4Handler));
        provider
    }

    pub fn register_handler(&mut self, d3d_format: u32, handler: Rc<dyn D3DFormatHandler>) -> Result<()> {
        if has_canonical_mapping(d3d_format) {
            return Err(RwError::registration(format!(
                "D3DFORMAT {d3d_format} has a canonical mapping and cannot take a handler"
            )));
        }
        if let Some(existing) = self.handlers.get(&d3d_format) {
            return Err(RwError::registration(format!(
                "D3DFORMAT {d3d_format} already handled by {}", existing.name()
            )));
        }
        log::debug!("registered D3D9 format handler {} for format {d3d_format}", handler.name());
        self.handlers.insert(d3d_format, handler);
        Ok(())
    }

    pub fn unregister_handler(&mut self, d3d_format: u32) -> Option<Rc<dyn D3DFormatHandler>> {
        self.handlers.remove(&d3d_format)
    }

    pub fn handler(&self, d3d_format: u32) -> Option<&dyn D3DFormatHandler> {
        self.handlers.get(&d3d_format).map(|h| h.as_ref())
    }

    fn require_handler(&self, d3d_format: u32) -> Result<&dyn D3DFormatHandler> {
        self.handler(d3d_format).ok_or_else(|| {
            RwError::unsupported(format!("no format handler registered for D3DFORMAT {d3d_format}"))
        })
    }

    /// Encode canonical pixels into the format of the handler registered
    /// for `d3d_format`.
    pub fn set_pixel_data_with_handler(
        &self,
        warnings:   &dyn WarningSink,
        native:     &mut D3D9Texture,
        data:       PixelDataTraversal<'_>,
        d3d_format: u32,
    ) -> Result<AcquireFeedback> {
        let handler = self.require_handler(d3d_format)?;
        data.validate()?;
        if data.cube_texture {
            return Err(RwError::unsupported("cube textures are not supported by D3D native textures"));
        }
        let canonical = convert_pixel_data_deferred(warnings, &data, &handler.canonical_format())?;
        let mut mipmaps = Vec::with_capacity(canonical.mipmaps.len());
        for mip in &canonical.mipmaps {
            let mut out = vec![0u8; handler.format_data_size(mip.width, mip.height)];
            handler.convert_from_rw(&mip.texels, mip.width, mip.height, &mut out)?;
            mipmaps.push(with_texels(mip, out));
        }

        let format = handler.canonical_format();
        native.pixels = D3DPixels {
            raster_format: format.raster_format,
            depth:         handler.depth(),
            color_order:   format.color_order,
            palette_type:  PaletteType::None,
            palette:       None,
            palette_size:  0,
            compression:   Compression::None,
            mipmaps,
            has_alpha:     canonical.has_alpha,
            auto_mipmaps:  canonical.auto_mipmaps,
            raster_type:   canonical.raster_type,
        };
        native.d3d_format = d3d_format;
        native.is_direct_format = false;
        native.is_cube = false;
        Ok(AcquireFeedback { has_directly_acquired: false })
    }

    fn decode_layer(&self, native: &D3D9Texture, mip: &MipmapLayer<'_>) -> Result<MipmapLayer<'static>> {
        let handler = self.require_handler(native.d3d_format)?;
        let mut out = vec![0u8; handler.canonical_format().data_size(mip.width, mip.height)];
        handler.convert_to_rw(&mip.texels, mip.width, mip.height, &mut out)?;
        Ok(with_texels(mip, out))
    }
}

impl TexNativeTypeProvider for D3D9Provider {
    type Native = D3D9Texture;

    fn name(&self) -> &str {
        &self.name
    }

    /// Descriptor 9 is also written by a third-party layout.
    fn platform_claim(&self) -> PlatformClaim {
        PlatformClaim { descriptor: PLATFORM_D3D9, verdict: CompatibilityVerdict::Maybe }
    }

    fn is_compatible_texture_block<R: Read + Seek>(&self, reader: &mut BlockReader<R>) -> Result<CompatibilityVerdict> {
        Ok(match reader.peek_u32().ok() {
            Some(PLATFORM_D3D9) => CompatibilityVerdict::Maybe,
            _                   => CompatibilityVerdict::None,
        })
    }

    fn serialize<W: Write + Seek>(
        &self,
        warnings: &dyn WarningSink,
        native:   &D3D9Texture,
        props:    &TextureProperties,
        writer:   &mut BlockWriter<W>,
    ) -> Result<()> {
        if native.is_cube {
            return Err(RwError::unsupported("cube textures are not supported by D3D native textures"));
        }
        let pixels = &native.pixels;
        let (width, height) = pixels.check_dimensions()?;

        write_common_header(warnings, writer, PLATFORM_D3D9, props, &pixels.raster_flags())?;
        writer.write_u32(native.d3d_format)?;
        writer.write_u16(width)?;
        writer.write_u16(height)?;
        writer.write_u8(pixels.depth as u8)?;
        writer.write_u8(pixels.mipmaps.len() as u8)?;
        writer.write_u8(pixels.raster_type & 0x7)?;

        let mut bits = 0u8;
        if pixels.has_alpha {
            bits |= 0x1;
        }
        if pixels.auto_mipmaps {
            bits |= 0x4;
        }
        if !native.is_direct_format {
            bits |= 0x8;
        }
        writer.write_u8(bits)?;

        pixels.write_palette(writer)?;
        pixels.write_mipmaps(writer)
    }

    fn deserialize<R: Read + Seek>(
        &self,
        warnings: &dyn WarningSink,
        native:   &mut D3D9Texture,
        props:    &mut TextureProperties,
        reader:   &mut BlockReader<R>,
    ) -> Result<()> {
        let flags = read_common_header(warnings, reader, PLATFORM_D3D9, props)?;
        let d3d_format = reader.read_u32()?;
        let width = reader.read_u16()? as u32;
        let height = reader.read_u16()? as u32;
        let depth = reader.read_u8()? as u32;
        let mip_count = reader.read_u8()? as u32;
        let raster_type = reader.read_u8()? & 0x7;
        let bits = reader.read_u8()?;

        if bits & 0x2 != 0 {
            return Err(RwError::unsupported("cube textures are not supported by D3D native textures"));
        }
        if width == 0 || height == 0 {
            return Err(RwError::format(format!("texture has invalid dimensions {width}x{height}")));
        }

        let canonical = canonical_format(d3d_format, flags.format, flags.palette_type, depth)?;
        let (format, expected): (PixelFormat, Box<dyn Fn(u32, u32) -> Option<usize>>) = match canonical {
            Some(format) => {
                if bits & 0x8 != 0 {
                    warnings.notice(format!(
                        "texture \"{}\" is flagged incompatible but uses canonical D3DFORMAT {d3d_format}", props.name
                    ));
                }
                (format, Box::new(move |w, h| Some(format.data_size(w, h))))
            }
            None => {
                let handler = self.handler(d3d_format);
                if handler.is_none() {
                    warnings.notice(format!("no handler for D3DFORMAT {d3d_format}; texels kept undecoded"));
                }
                let size = handler.map(|h| h.depth()).filter(|&d| d == depth);
                let format = PixelFormat::raw(flags.format, ColorOrder::Bgra, D3D_ROW_ALIGNMENT).with_depth(depth);
                (format, Box::new(move |w, h| size.map(|d| raw_data_size(w, h, d, D3D_ROW_ALIGNMENT))))
            }
        };

        let mut pixels = D3DPixels {
            raster_format: format.raster_format,
            depth:         format.depth,
            color_order:   format.color_order,
            palette_type:  format.palette_type,
            compression:   format.compression,
            has_alpha:     bits & 0x1 != 0,
            auto_mipmaps:  bits & 0x4 != 0,
            raster_type,
            ..D3DPixels::default()
        };
        pixels.read_palette(reader)?;
        pixels.read_mipmaps(warnings, reader, width, height, mip_count, expected)?;

        native.pixels = pixels;
        native.d3d_format = d3d_format;
        native.is_direct_format = canonical.is_some();
        native.is_cube = false;
        Ok(())
    }

    fn get_pixel_data<'a>(&self, native: &'a D3D9Texture) -> Result<PixelDataTraversal<'a>> {
        let pixels = &native.pixels;
        if pixels.is_empty() {
            return Err(RwError::format("texture has no pixel data"));
        }
        if native.is_direct_format {
            return Ok(pixels.traversal());
        }
        let handler = self.require_handler(native.d3d_format)?;
        let mut data = PixelDataTraversal::new(handler.canonical_format());
        for mip in &pixels.mipmaps {
            data.mipmaps.push(self.decode_layer(native, mip)?);
        }
        data.has_alpha = pixels.has_alpha;
        data.auto_mipmaps = pixels.auto_mipmaps;
        data.raster_type = pixels.raster_type;
        data.is_newly_allocated = true;
        Ok(data)
    }

    fn set_pixel_data(
        &self,
        warnings: &dyn WarningSink,
        native:   &mut D3D9Texture,
        data:     PixelDataTraversal<'_>,
    ) -> Result<AcquireFeedback> {
        let target = self.storage_format(&data.format);
        let (pixels, moved) = D3DPixels::store(warnings, data, &target)?;
        native.d3d_format = d3d_format_of(&pixels.format());
        native.pixels = pixels;
        native.is_direct_format = true;
        native.is_cube = false;
        Ok(AcquireFeedback { has_directly_acquired: moved })
    }

    fn unset_pixel_data(&self, native: &mut D3D9Texture) {
        *native = D3D9Texture::default();
    }

    fn get_mipmap_layer<'a>(&self, native: &'a D3D9Texture, level: usize) -> Result<RawMipmapLayer<'a>> {
        if native.is_direct_format {
            return native.pixels.raw_layer(level);
        }
        let handler = self.require_handler(native.d3d_format)?;
        let stored = native.pixels.raw_layer(level)?;
        Ok(RawMipmapLayer {
            format:             handler.canonical_format(),
            mipmap:             self.decode_layer(native, &stored.mipmap)?,
            palette:            None,
            palette_size:       0,
            has_alpha:          native.pixels.has_alpha,
            is_newly_allocated: true,
        })
    }

    fn add_mipmap_layer(
        &self,
        warnings: &dyn WarningSink,
        native:   &mut D3D9Texture,
        layer:    RawMipmapLayer<'_>,
    ) -> Result<AcquireFeedback> {
        if native.is_direct_format {
            let direct = native.pixels.push_layer(warnings, layer)?;
            return Ok(AcquireFeedback { has_directly_acquired: direct });
        }

        let handler = self.require_handler(native.d3d_format)?;
        let (base_w, base_h) = native.pixels.base_dimensions();
        let level = native.pixels.mipmaps.len() as u32;
        let expected = mip_dimensions(base_w, base_h, level);
        if (layer.mipmap.layer_width, layer.mipmap.layer_height) != expected {
            return Err(RwError::format(format!(
                "mip level {level} must be {}x{}", expected.0, expected.1
            )));
        }
        let src = FormatDesc { format: layer.format, palette: layer.palette.as_deref(), palette_size: layer.palette_size };
        let dst = FormatDesc::direct(handler.canonical_format());
        let (rgba, dims) = convert_mipmap_layer_ex(warnings, &layer.mipmap.texels, MipDims::of(&layer.mipmap), &src, &dst, false)?;
        let mut out = vec![0u8; handler.format_data_size(dims.width, dims.height)];
        handler.convert_from_rw(&rgba, dims.width, dims.height, &mut out)?;
        native.pixels.mipmaps.push(MipmapLayer {
            texels:       Cow::Owned(out),
            width:        dims.width,
            height:       dims.height,
            layer_width:  dims.layer_width,
            layer_height: dims.layer_height,
        });
        Ok(AcquireFeedback { has_directly_acquired: false })
    }

    fn clear_mipmaps(&self, native: &mut D3D9Texture) {
        native.pixels.mipmaps.truncate(1);
        native.pixels.auto_mipmaps = false;
    }

    fn storage_capabilities(&self) -> StorageCapabilities {
        StorageCapabilities { dxt: DxtSupport::ALL, supports_palette: true, supports_cube: false }
    }

    fn texture_info(&self, native: &D3D9Texture) -> NativeTextureInfo {
        let pixels = &native.pixels;
        let (width, height) = pixels.base_dimensions();
        let format_name = match (d3dfmt::name(native.d3d_format), self.handler(native.d3d_format)) {
            (Some(name), _) => name.to_string(),
            (None, Some(h)) => h.name().to_string(),
            (None, None)    => format!("D3DFORMAT {}", native.d3d_format),
        };
        NativeTextureInfo {
            width,
            height,
            depth:        pixels.depth,
            mipmap_count: pixels.mipmaps.len() as u32,
            format_name,
            compression:  pixels.compression,
            palette_type: pixels.palette_type,
            has_alpha:    pixels.has_alpha,
        }
    }

    fn driver_identifier(&self) -> u16 {
        DEVICE_ID_D3D9
    }

    fn storage_format(&self, format: &PixelFormat) -> PixelFormat {
        use RasterFormat as F;
        let raw = |f: F, order: ColorOrder| PixelFormat::raw(f, order, D3D_ROW_ALIGNMENT);
        if format.compression.is_compressed() {
            return PixelFormat { row_alignment: D3D_ROW_ALIGNMENT, palette_type: PaletteType::None, ..*format };
        }
        if format.palette_type.is_palettized() {
            return palettized_storage(format);
        }
        match (format.raster_format, format.depth, format.color_order) {
            (F::R5G5B5A1, 16, ColorOrder::Bgra) => raw(F::R5G5B5A1, ColorOrder::Bgra),
            (F::R5G6B5, 16, ColorOrder::Bgra)   => raw(F::R5G6B5, ColorOrder::Bgra),
            (F::R4G4B4A4, 16, ColorOrder::Bgra) => raw(F::R4G4B4A4, ColorOrder::Bgra),
            (F::R5G5B5, 16, ColorOrder::Bgra)   => raw(F::R5G5B5, ColorOrder::Bgra),
            (F::Lum, 8, order)                  => raw(F::Lum, order),
            (F::LumAlpha, 8, order)             => raw(F::LumAlpha, order).with_depth(8),
            (F::LumAlpha, 16, order)            => raw(F::LumAlpha, order),
            (F::R8G8B8A8, 32, ColorOrder::Bgra) => raw(F::R8G8B8A8, ColorOrder::Bgra),
            (F::R8G8B8A8, 32, ColorOrder::Rgba) => raw(F::R8G8B8A8, ColorOrder::Rgba),
            (F::R8G8B8, 32, ColorOrder::Bgra)   => raw(F::R8G8B8, ColorOrder::Bgra),
            (F::R8G8B8, 32, ColorOrder::Rgba)   => raw(F::R8G8B8, ColorOrder::Rgba),
            (F::R8G8B8, 24, ColorOrder::Bgra)   => raw(F::R8G8B8, ColorOrder::Bgra).with_depth(24),
            _                                   => raw(F::R8G8B8A8, ColorOrder::Bgra),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::chunk_id;
    use crate::pixel::Bitmap;
    use crate::version::LibraryVersion;
    use crate::warnings::WarningCollector;
    use std::io::Cursor;

    fn alpha_bitmap() -> Bitmap {
        let mut data = Vec::new();
        for i in 0..16u8 {
            data.extend_from_slice(&[i * 16, 255 - i * 16, i, if i % 2 == 0 { 255 } else { 128 }]);
        }
        Bitmap::from_rgba(4, 4, data).unwrap()
    }

    fn traversal(format: PixelFormat, texels: Vec<u8>, w: u32, h: u32) -> PixelDataTraversal<'static> {
        let mut data = PixelDataTraversal::new(format);
        data.mipmaps.push(MipmapLayer::new(Cow::Owned(texels), w, h));
        data
    }

    fn round_trip(provider: &D3D9Provider, native: &D3D9Texture) -> (D3D9Texture, TextureProperties) {
        let warnings = WarningCollector::new();
        let props = TextureProperties { name: "tex".into(), ..TextureProperties::default() };
        let mut w = BlockWriter::new(Cursor::new(Vec::new()), LibraryVersion::default()).unwrap();
        {
            let mut st = w.enter(chunk_id::STRUCT).unwrap();
            provider.serialize(&warnings, native, &props, &mut *st).unwrap();
            st.leave().unwrap();
        }
        let bytes = w.into_inner().into_inner();
        let mut r = BlockReader::new(Cursor::new(bytes)).unwrap();
        let mut st = r.enter().unwrap();
        let mut back = D3D9Texture::default();
        let mut back_props = TextureProperties::default();
        provider.deserialize(&warnings, &mut back, &mut back_props, &mut *st).unwrap();
        assert_eq!(st.remaining(), 0);
        (back, back_props)
    }

    #[test]
    fn bgra_traversal_is_taken_as_a8r8g8b8() {
        let provider = D3D9Provider::new();
        let warnings = WarningCollector::new();
        let format = PixelFormat::raw(RasterFormat::R8G8B8A8, ColorOrder::Bgra, 4);
        let mut data = traversal(format, alpha_bitmap().into_data(), 4, 4);
        data.has_alpha = true;
        let mut native = D3D9Texture::default();
        let fb = provider.set_pixel_data(&warnings, &mut native, data).unwrap();
        assert!(fb.has_directly_acquired);
        assert_eq!(native.d3d_format, d3dfmt::A8R8G8B8);
        assert!(native.is_direct_format);
        assert_eq!(native.pixels.mipmaps[0].texels.len(), 64);
        assert!(native.pixels.palette.is_none());
    }

    #[test]
    fn rgba_bitmap_is_copied_as_a8b8g8r8() {
        let provider = D3D9Provider::new();
        let warnings = WarningCollector::new();
        let mut native = D3D9Texture::default();
        let bmp = alpha_bitmap();
        let fb = provider.set_pixel_data(&warnings, &mut native, bmp.as_pixel_data()).unwrap();
        assert!(!fb.has_directly_acquired);
        assert_eq!(native.d3d_format, d3dfmt::A8B8G8R8);
        assert_eq!(native.pixels.mipmaps[0].texels.as_ref(), bmp.data());
        assert!(native.pixels.has_alpha);

        let bgra = PixelFormat::raw(RasterFormat::R8G8B8A8, ColorOrder::Bgra, 4);
        let mut swapped = D3D9Texture::default();
        let rgba = bmp.as_pixel_data();
        let data = convert_pixel_data_deferred(&warnings, &rgba, &bgra).unwrap();
        provider.set_pixel_data(&warnings, &mut swapped, data).unwrap();
        assert_eq!(swapped.d3d_format, d3dfmt::A8R8G8B8);
        assert_eq!(&swapped.pixels.mipmaps[0].texels[4..8], &[1, 239, 16, 128]);
    }

    #[test]
    fn owned_matching_data_is_moved() {
        let provider = D3D9Provider::new();
        let warnings = WarningCollector::new();
        let format = PixelFormat::raw(RasterFormat::R5G6B5, ColorOrder::Bgra, 4);
        let texels: Vec<u8> = (0..32).collect();
        let ptr = texels.as_ptr();
        let mut native = D3D9Texture::default();
        let fb = provider.set_pixel_data(&warnings, &mut native, traversal(format, texels, 4, 4)).unwrap();
        assert!(fb.has_directly_acquired);
        assert_eq!(native.d3d_format, d3dfmt::R5G6B5);
        assert_eq!(native.pixels.mipmaps[0].texels.as_ptr(), ptr);

        let got = provider.get_pixel_data(&native).unwrap();
        assert!(!got.is_newly_allocated);
        assert_eq!(got.mipmaps[0].texels.as_ptr(), ptr);
    }

    #[test]
    fn borrowed_matching_data_is_copied() {
        let provider = D3D9Provider::new();
        let warnings = WarningCollector::new();
        let format = PixelFormat::raw(RasterFormat::R8G8B8A8, ColorOrder::Rgba, 4);
        let texels = vec![7u8; 16];
        let mut data = PixelDataTraversal::new(format);
        data.mipmaps.push(MipmapLayer::new(Cow::Borrowed(&texels), 2, 2));
        let mut native = D3D9Texture::default();
        let fb = provider.set_pixel_data(&warnings, &mut native, data).unwrap();
        assert!(!fb.has_directly_acquired);
        assert_eq!(native.d3d_format, d3dfmt::A8B8G8R8);
        assert_eq!(native.pixels.mipmaps[0].texels.as_ref(), texels.as_slice());
    }

    #[test]
    fn decision_table() {
        let provider = D3D9Provider::new();
        let bgra = |f, d| PixelFormat::raw(f, ColorOrder::Bgra, 1).with_depth(d);
        let cases = [
            (bgra(RasterFormat::R5G5B5A1, 16), d3dfmt::A1R5G5B5),
            (bgra(RasterFormat::R4G4B4A4, 16), d3dfmt::A4R4G4B4),
            (bgra(RasterFormat::R5G5B5, 16), d3dfmt::X1R5G5B5),
            (bgra(RasterFormat::Lum, 8), d3dfmt::L8),
            (bgra(RasterFormat::LumAlpha, 8), d3dfmt::A4L4),
            (bgra(RasterFormat::LumAlpha, 16), d3dfmt::A8L8),
            (bgra(RasterFormat::R8G8B8, 32), d3dfmt::X8R8G8B8),
            (bgra(RasterFormat::R8G8B8, 24), d3dfmt::R8G8B8),
            (PixelFormat::raw(RasterFormat::R8G8B8, ColorOrder::Rgba, 1), d3dfmt::X8B8G8R8),
            (PixelFormat::raw(RasterFormat::R5G6B5, ColorOrder::Rgba, 1), d3dfmt::A8R8G8B8),
            (bgra(RasterFormat::R8G8B8A8, 32).with_palette(PaletteType::Pal8, 8), d3dfmt::P8),
            (bgra(RasterFormat::R8G8B8A8, 16).with_compression(Compression::Dxt3), d3dfmt::DXT3),
        ];
        for (format, expected) in cases {
            let stored = provider.storage_format(&format);
            assert_eq!(stored.row_alignment, 4);
            assert_eq!(d3d_format_of(&stored), expected, "{format}");
        }
    }

    #[test]
    fn probe_is_maybe() {
        let provider = D3D9Provider::new();
        let mut w = BlockWriter::new(Cursor::new(Vec::new()), LibraryVersion::default()).unwrap();
        w.write_u32(PLATFORM_D3D9).unwrap();
        let mut r = BlockReader::new(Cursor::new(w.into_inner().into_inner())).unwrap();
        assert_eq!(provider.is_compatible_texture_block(&mut r).unwrap(), CompatibilityVerdict::Maybe);
        assert_eq!(r.tell(), 0);
    }

    #[test]
    fn palettized_round_trip() {
        let provider = D3D9Provider::new();
        let warnings = WarningCollector::new();
        let format = PixelFormat::raw(RasterFormat::R8G8B8A8, ColorOrder::Rgba, 4).with_palette(PaletteType::Pal4, 4);
        let mut data = traversal(format, vec![0x10, 0x32, 0, 0, 0x54, 0x76, 0, 0], 4, 2);
        data.palette = Some(Cow::Owned((0..32u8).collect()));
        data.palette_size = 8;
        let mut native = D3D9Texture::default();
        assert!(provider.set_pixel_data(&warnings, &mut native, data).unwrap().has_directly_acquired);
        assert_eq!(native.d3d_format, d3dfmt::P8);

        let (back, _) = round_trip(&provider, &native);
        assert_eq!(back.pixels.palette_size, 16);
        assert_eq!(back.pixels.depth, 4);
        assert_eq!(&back.pixels.palette.as_deref().unwrap()[..32], &(0..32u8).collect::<Vec<_>>()[..]);
        assert_eq!(back.pixels.mipmaps, native.pixels.mipmaps);
    }

    #[test]
    fn serialized_body_round_trips() {
        let provider = D3D9Provider::new();
        let warnings = WarningCollector::new();
        let mut native = D3D9Texture::default();
        let format = PixelFormat::raw(RasterFormat::LumAlpha, ColorOrder::Bgra, 4);
        let mut data = traversal(format, (0..32).collect(), 4, 4);
        data.mipmaps.push(MipmapLayer::new(Cow::Owned(vec![1, 2, 3, 4, 5, 6, 7, 8]), 2, 2));
        data.has_alpha = true;
        provider.set_pixel_data(&warnings, &mut native, data).unwrap();

        let (back, props) = round_trip(&provider, &native);
        assert_eq!(props.name, "tex");
        assert_eq!(back, native);
        assert_eq!(back.d3d_format, d3dfmt::A8L8);
    }

    #[test]
    fn handler_formats_decode_into_new_buffers() {
        let provider = D3D9Provider::with_standard_handlers();
        let warnings = WarningCollector::new();
        let mut native = D3D9Texture::default();
        let bmp = alpha_bitmap();
        let fb = provider.set_pixel_data_with_handler(&warnings, &mut native, bmp.as_pixel_data(), d3dfmt::A8).unwrap();
        assert!(!fb.has_directly_acquired);
        assert!(!native.is_direct_format);
        assert_eq!(native.pixels.mipmaps[0].texels.len(), 16);

        let (back, _) = round_trip(&provider, &native);
        assert_eq!(back.d3d_format, d3dfmt::A8);
        assert!(!back.is_direct_format);

        let got = provider.get_pixel_data(&back).unwrap();
        assert!(got.is_newly_allocated);
        assert_eq!(got.format, A8Handler.canonical_format());
        for (px, src) in got.mipmaps[0].texels.chunks_exact(4).zip(bmp.data().chunks_exact(4)) {
            assert_eq!(px, &[0, 0, 0, src[3]]);
        }

        let bare = D3D9Provider::new();
        assert!(matches!(bare.get_pixel_data(&back), Err(RwError::Unsupported(_))));
    }

    #[test]
    fn x4r4g4b4_keeps_high_nibbles() {
        let handler = X4R4G4B4Handler;
        let src = [0x12, 0x34, 0x56, 0xFF, 0xFF, 0xEE, 0xDD, 0xFF];
        let mut packed = vec![0u8; handler.format_data_size(2, 1)];
        handler.convert_from_rw(&src, 2, 1, &mut packed).unwrap();
        let mut back = vec![0u8; 8];
        handler.convert_to_rw(&packed, 2, 1, &mut back).unwrap();
        for (a, b) in back.iter().zip(src.iter()) {
            assert!((*a as i32 - *b as i32).abs() <= 8, "{a} vs {b}");
        }
    }

    #[test]
    fn handlers_cannot_shadow_canonical_formats() {
        let mut provider = D3D9Provider::with_standard_handlers();
        assert!(provider.register_handler(d3dfmt::A8R8G8B8, Rc::new(A8Handler)).is_err());
        assert!(provider.register_handler(d3dfmt::A8, Rc::new(A8Handler)).is_err());
        assert!(provider.unregister_handler(d3dfmt::A8).is_some());
        provider.register_handler(d3dfmt::A8, Rc::new(A8Handler)).unwrap();
    }

    #[test]
    fn cube_textures_are_rejected() {
        let provider = D3D9Provider::new();
        let warnings = WarningCollector::new();
        let mut data = traversal(PixelFormat::RGBA8888, vec![0; 16], 2, 2);
        data.cube_texture = true;
        let mut native = D3D9Texture::default();
        assert!(matches!(
            provider.set_pixel_data(&warnings, &mut native, data),
            Err(RwError::Unsupported(_))
        ));
        assert_eq!(native, D3D9Texture::default());
    }
}
