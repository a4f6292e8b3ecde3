//! Direct3D 8 texture natives (platform descriptor 8).
//!
//! The body after the shared header:
//!
//! | Size | Field |
//! |------|-------|
//! | 4    | has alpha |
//! | 2+2  | width, height |
//! | 1    | depth |
//! | 1    | mip count |
//! | 1    | raster type |
//! | 1    | DXT compression (0 = none, 1..5) |
//!
//! Unlike Direct3D 9 there is no `D3DFORMAT` field: the raster format nibble,
//! the depth and the compression byte fully describe the texels.

use std::io::{Read, Seek, Write};

use super::{read_common_header, write_common_header, D3DPixels, RasterFlags, D3D_ROW_ALIGNMENT};
use crate::error::{Result, RwError};
use crate::native::{
    AcquireFeedback, CompatibilityVerdict, NativeTextureInfo, PlatformClaim, StorageCapabilities,
    TexNativeTypeProvider,
};
use crate::pixel::color::is_valid_index_depth;
use crate::pixel::convert::DxtSupport;
use crate::pixel::{ColorOrder, Compression, PaletteType, PixelDataTraversal, PixelFormat, RasterFormat, RawMipmapLayer};
use crate::stream::{BlockReader, BlockWriter};
use crate::texture::TextureProperties;
use crate::warnings::WarningSink;

pub const PLATFORM_D3D8: u32 = 8;
pub const DEVICE_ID_D3D8: u16 = 1;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct D3D8Texture {
    pub pixels: D3DPixels,
}

#[derive(Debug, Clone)]
pub struct D3D8Provider {
    name: String,
}

impl Default for D3D8Provider {
    fn default() -> Self {
        Self::new()
    }
}

impl D3D8Provider {
    pub const NAME: &'static str = "Direct3D8";

    pub fn new() -> Self {
        Self::named(Self::NAME)
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Validate the format a serialized body describes.
    fn stored_format(&self, flags: &RasterFlags, depth: u32, compression: Compression) -> Result<PixelFormat> {
        let format = if compression.is_compressed() {
            PixelFormat::raw(flags.format, ColorOrder::Bgra, D3D_ROW_ALIGNMENT)
                .with_depth(depth)
                .with_compression(compression)
        } else if flags.palette_type.is_palettized() {
            if !is_valid_index_depth(flags.palette_type, depth) {
                return Err(RwError::format(format!(
                    "{depth}-bit indices cannot address a {:?} palette", flags.palette_type
                )));
            }
            PixelFormat::raw(RasterFormat::R8G8B8A8, ColorOrder::Rgba, D3D_ROW_ALIGNMENT)
                .with_palette(flags.palette_type, depth)
        } else {
            PixelFormat::raw(flags.format, ColorOrder::Bgra, D3D_ROW_ALIGNMENT).with_depth(depth)
        };
        if !format.compression.is_compressed()
            && !format.palette_type.is_palettized()
            && self.storage_format(&format) != format
        {
            return Err(RwError::format(format!("{format} is not a Direct3D 8 texture format")));
        }
        Ok(format)
    }
}

impl TexNativeTypeProvider for D3D8Provider {
    type Native = D3D8Texture;

    fn name(&self) -> &str {
        &self.name
    }

    fn platform_claim(&self) -> PlatformClaim {
        PlatformClaim { descriptor: PLATFORM_D3D8, verdict: CompatibilityVerdict::Absolute }
    }

    fn is_compatible_texture_block<R: Read + Seek>(&self, reader: &mut BlockReader<R>) -> Result<CompatibilityVerdict> {
        Ok(match reader.peek_u32().ok() {
            Some(PLATFORM_D3D8) => CompatibilityVerdict::Absolute,
            _                   => CompatibilityVerdict::None,
        })
    }

    fn serialize<W: Write + Seek>(
        &self,
        warnings: &dyn WarningSink,
        native:   &D3D8Texture,
        props:    &TextureProperties,
        writer:   &mut BlockWriter<W>,
    ) -> Result<()> {
        let pixels = &native.pixels;
        let (width, height) = pixels.check_dimensions()?;

        write_common_header(warnings, writer, PLATFORM_D3D8, props, &pixels.raster_flags())?;
        writer.write_u32(pixels.has_alpha as u32)?;
        writer.write_u16(width)?;
        writer.write_u16(height)?;
        writer.write_u8(pixels.depth as u8)?;
        writer.write_u8(pixels.mipmaps.len() as u8)?;
        writer.write_u8(pixels.raster_type)?;
        writer.write_u8(pixels.compression.index() as u8)?;

        pixels.write_palette(writer)?;
        pixels.write_mipmaps(writer)
    }

    fn deserialize<R: Read + Seek>(
        &self,
        warnings: &dyn WarningSink,
        native:   &mut D3D8Texture,
        props:    &mut TextureProperties,
        reader:   &mut BlockReader<R>,
    ) -> Result<()> {
        let flags = read_common_header(warnings, reader, PLATFORM_D3D8, props)?;
        let has_alpha = reader.read_u32()? != 0;
        let width = reader.read_u16()? as u32;
        let height = reader.read_u16()? as u32;
        let depth = reader.read_u8()? as u32;
        let mip_count = reader.read_u8()? as u32;
        let raster_type = reader.read_u8()?;
        let dxt = reader.read_u8()?;

        if width == 0 || height == 0 {
            return Err(RwError::format(format!("texture has invalid dimensions {width}x{height}")));
        }
        let compression = Compression::from_index(dxt as u32)
            .ok_or_else(|| RwError::format(format!("unknown DXT compression {dxt}")))?;
        let format = self.stored_format(&flags, depth, compression)?;

        let mut pixels = D3DPixels {
            raster_format: format.raster_format,
            depth:         format.depth,
            color_order:   format.color_order,
            palette_type:  format.palette_type,
            compression:   format.compression,
            has_alpha,
            auto_mipmaps:  flags.auto_mipmaps,
            raster_type,
            ..D3DPixels::default()
        };
        pixels.read_palette(reader)?;
        pixels.read_mipmaps(warnings, reader, width, height, mip_count, |w, h| Some(format.data_size(w, h)))?;
        native.pixels = pixels;
        Ok(())
    }

    fn get_pixel_data<'a>(&self, native: &'a D3D8Texture) -> Result<PixelDataTraversal<'a>> {
        if native.pixels.is_empty() {
            return Err(RwError::format("texture has no pixel data"));
        }
        Ok(native.pixels.traversal())
    }

    fn set_pixel_data(
        &self,
        warnings: &dyn WarningSink,
        native:   &mut D3D8Texture,
        data:     PixelDataTraversal<'_>,
    ) -> Result<AcquireFeedback> {
        let target = self.storage_format(&data.format);
        let (pixels, moved) = D3DPixels::store(warnings, data, &target)?;
        native.pixels = pixels;
        Ok(AcquireFeedback { has_directly_acquired: moved })
    }

    fn unset_pixel_data(&self, native: &mut D3D8Texture) {
        native.pixels = D3DPixels::default();
    }

    fn get_mipmap_layer<'a>(&self, native: &'a D3D8Texture, level: usize) -> Result<RawMipmapLayer<'a>> {
        native.pixels.raw_layer(level)
    }

    fn add_mipmap_layer(
        &self,
        warnings: &dyn WarningSink,
        native:   &mut D3D8Texture,
        layer:    RawMipmapLayer<'_>,
    ) -> Result<AcquireFeedback> {
        let direct = native.pixels.push_layer(warnings, layer)?;
        Ok(AcquireFeedback { has_directly_acquired: direct })
    }

    fn clear_mipmaps(&self, native: &mut D3D8Texture) {
        native.pixels.mipmaps.truncate(1);
        native.pixels.auto_mipmaps = false;
    }

    fn storage_capabilities(&self) -> StorageCapabilities {
        StorageCapabilities { dxt: DxtSupport::ALL, supports_palette: true, supports_cube: false }
    }

    fn texture_info(&self, native: &D3D8Texture) -> NativeTextureInfo {
        let pixels = &native.pixels;
        let (width, height) = pixels.base_dimensions();
        NativeTextureInfo {
            width,
            height,
            depth:        pixels.depth,
            mipmap_count: pixels.mipmaps.len() as u32,
            format_name:  pixels.format().to_string(),
            compression:  pixels.compression,
            palette_type: pixels.palette_type,
            has_alpha:    pixels.has_alpha,
        }
    }

    fn driver_identifier(&self) -> u16 {
        DEVICE_ID_D3D8
    }

    fn storage_format(&self, format: &PixelFormat) -> PixelFormat {
        use RasterFormat as F;
        let bgra = |f: F| PixelFormat::raw(f, ColorOrder::Bgra, D3D_ROW_ALIGNMENT);
        if format.compression.is_compressed() {
            return PixelFormat { row_alignment: D3D_ROW_ALIGNMENT, palette_type: PaletteType::None, ..*format };
        }
        if format.palette_type.is_palettized() {
            return PixelFormat::raw(F::R8G8B8A8, ColorOrder::Rgba, D3D_ROW_ALIGNMENT)
                .with_palette(format.palette_type, format.palette_type.min_index_depth());
        }
        match (format.raster_format, format.depth, format.color_order) {
            (F::R5G5B5A1, 16, ColorOrder::Bgra) => bgra(F::R5G5B5A1),
            (F::R5G6B5, 16, ColorOrder::Bgra)   => bgra(F::R5G6B5),
            (F::R4G4B4A4, 16, ColorOrder::Bgra) => bgra(F::R4G4B4A4),
            (F::R5G5B5, 16, ColorOrder::Bgra)   => bgra(F::R5G5B5),
            (F::R8G8B8A8, 32, ColorOrder::Bgra) => bgra(F::R8G8B8A8),
            (F::R8G8B8, 32, ColorOrder::Bgra)   => bgra(F::R8G8B8),
            (F::Lum, 8, _)                      => bgra(F::Lum),
            _                                   => bgra(F::R8G8B8A8),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::chunk_id;
    use crate::pixel::{Bitmap, MipmapLayer};
    use crate::version::LibraryVersion;
    use crate::warnings::WarningCollector;
    use std::borrow::Cow;
    use std::io::Cursor;

    fn serialize(native: &D3D8Texture, props: &TextureProperties) -> Vec<u8> {
        let mut w = BlockWriter::new(Cursor::new(Vec::new()), LibraryVersion::default()).unwrap();
        {
            let mut st = w.enter(chunk_id::STRUCT).unwrap();
            D3D8Provider::new().serialize(&WarningCollector::new(), native, props, &mut *st).unwrap();
            st.leave().unwrap();
        }
        w.into_inner().into_inner()
    }

    #[test]
    fn probe_is_absolute() {
        let native = {
            let mut t = D3D8Texture::default();
            let bmp = Bitmap::from_rgba(1, 1, vec![1, 2, 3, 4]).unwrap();
            D3D8Provider::new().set_pixel_data(&WarningCollector::new(), &mut t, bmp.as_pixel_data()).unwrap();
            t
        };
        let bytes = serialize(&native, &TextureProperties::default());
        let mut r = BlockReader::new(Cursor::new(bytes)).unwrap();
        let mut st = r.enter().unwrap();
        let verdict = D3D8Provider::new().is_compatible_texture_block(&mut *st).unwrap();
        assert_eq!(verdict, CompatibilityVerdict::Absolute);
        assert_eq!(st.tell(), 0);
    }

    #[test]
    fn lum_alpha_is_forced_to_8888() {
        let provider = D3D8Provider::new();
        let format = PixelFormat::raw(RasterFormat::LumAlpha, ColorOrder::Bgra, 4);
        assert_eq!(provider.storage_format(&format), PixelFormat::raw(RasterFormat::R8G8B8A8, ColorOrder::Bgra, 4));

        let mut data = PixelDataTraversal::new(format);
        data.mipmaps.push(MipmapLayer::new(Cow::Owned(vec![0x80, 0xFF, 0x40, 0x7F]), 2, 1));
        data.has_alpha = true;
        let mut native = D3D8Texture::default();
        let fb = provider.set_pixel_data(&WarningCollector::new(), &mut native, data).unwrap();
        assert!(!fb.has_directly_acquired);
        assert_eq!(native.pixels.raster_format, RasterFormat::R8G8B8A8);
        assert_eq!(native.pixels.mipmaps[0].texels.as_ref(), &[0x80, 0x80, 0x80, 0xFF, 0x40, 0x40, 0x40, 0x7F]);
    }

    #[test]
    fn dxt_body_round_trips() {
        let provider = D3D8Provider::new();
        let warnings = WarningCollector::new();
        let format = PixelFormat::raw(RasterFormat::R5G6B5, ColorOrder::Bgra, 4).with_compression(Compression::Dxt1);
        let mut data = PixelDataTraversal::new(format);
        data.mipmaps.push(MipmapLayer {
            texels:       Cow::Owned((0..16).collect()),
            width:        8,
            height:       4,
            layer_width:  6,
            layer_height: 3,
        });
        let mut native = D3D8Texture::default();
        assert!(provider.set_pixel_data(&warnings, &mut native, data).unwrap().has_directly_acquired);

        let props = TextureProperties { name: "road".into(), mask_name: "roadm".into(), ..Default::default() };
        let bytes = serialize(&native, &props);
        let mut r = BlockReader::new(Cursor::new(bytes)).unwrap();
        let mut st = r.enter().unwrap();
        let mut back = D3D8Texture::default();
        let mut back_props = TextureProperties::default();
        provider.deserialize(&warnings, &mut back, &mut back_props, &mut *st).unwrap();
        assert_eq!(back, native);
        assert_eq!(back_props, props);
        assert!(warnings.is_empty());
    }

    #[test]
    fn rejects_unknown_layouts() {
        let provider = D3D8Provider::new();
        let flags = RasterFlags {
            format:       RasterFormat::R5G6B5,
            palette_type: PaletteType::None,
            auto_mipmaps: false,
            has_mipmaps:  false,
        };
        assert!(provider.stored_format(&flags, 32, Compression::None).is_err());
        assert!(provider.stored_format(&flags, 16, Compression::None).is_ok());
        let pal = RasterFlags { palette_type: PaletteType::Pal8, ..flags };
        assert!(provider.stored_format(&pal, 4, Compression::None).is_err());
    }
}
