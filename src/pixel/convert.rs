//! Conversion engine: moves texels between any two [`PixelFormat`]s.
//!
//! Every lossy path decodes to 8-bit RGBA ([`Rgba8`]) and re-encodes.  Two
//! shortcuts avoid that:
//!
//! - identical encodings (format, row alignment and palette bytes) return
//!   the source buffer borrowed, without allocating;
//! - palette → palette with the same palette only rewrites index widths.
//!
//! Block-compressed data goes through 32-bit RGBA on the way in or out.
//! Traversal-level conversion builds the complete result before anything
//! is committed, so a failure leaves the source untouched.

use std::borrow::Cow;

use crate::error::{Result, RwError};
use crate::pixel::color::{encode_palette, get_texel_bits, is_valid_index_depth, set_texel_bits, Rgba8, TexelCodec};
use crate::pixel::palette::{build_palette, PaletteIndexer};
use crate::pixel::{
    dxt, raw_data_size, row_size, Bitmap, Compression, MipmapLayer, PixelDataTraversal, PixelFormat,
};
use crate::warnings::WarningSink;

const LOSSY_LUMINANCE: &str = "lossy luminance conversion: colored texels were averaged to gray";

/// A pixel format together with the palette its indices refer to.
#[derive(Debug, Clone, Copy)]
pub struct FormatDesc<'p> {
    pub format:       PixelFormat,
    pub palette:      Option<&'p [u8]>,
    pub palette_size: u32,
}

impl<'p> FormatDesc<'p> {
    pub fn direct(format: PixelFormat) -> Self {
        Self { format, palette: None, palette_size: 0 }
    }

    pub fn of(data: &'p PixelDataTraversal<'_>) -> Self {
        Self { format: data.format, palette: data.palette_ref(), palette_size: data.palette_size }
    }

    fn palette_bytes(&self) -> Option<&'p [u8]> {
        let len = self.format.palette_data_size(self.palette_size);
        self.palette.map(|p| &p[..len.min(p.len())])
    }

    fn shares_palette_with(&self, other: &FormatDesc<'_>) -> bool {
        self.format.raster_format == other.format.raster_format
            && self.format.color_order == other.format.color_order
            && self.palette_size == other.palette_size
            && self.palette_bytes() == other.palette_bytes()
    }

    /// Same bytes would represent the same image in both descriptions.
    pub fn is_same_encoding(&self, other: &FormatDesc<'_>) -> bool {
        self.format == other.format
            && (!self.format.palette_type.is_palettized() || self.shares_palette_with(other))
    }
}

const RGBA_DESC: FormatDesc<'static> = FormatDesc {
    format:       PixelFormat::RGBA8888,
    palette:      None,
    palette_size: 0,
};

/// Surface and logical dimensions of one mip level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MipDims {
    pub width:        u32,
    pub height:       u32,
    pub layer_width:  u32,
    pub layer_height: u32,
}

impl MipDims {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height, layer_width: width, layer_height: height }
    }

    pub fn of(mip: &MipmapLayer<'_>) -> Self {
        Self { width: mip.width, height: mip.height, layer_width: mip.layer_width, layer_height: mip.layer_height }
    }
}

// ── Raw (uncompressed) paths ──────────────────────────────────────────────────

fn check_length(texels: &[u8], needed: usize, format: &PixelFormat) -> Result<()> {
    if texels.len() < needed {
        return Err(RwError::format(format!(
            "{format} texel buffer holds {} bytes, {needed} required", texels.len()
        )));
    }
    Ok(())
}

fn remap_indices(texels: &[u8], width: u32, height: u32, src: &FormatDesc<'_>, dst: &FormatDesc<'_>) -> Result<Vec<u8>> {
    let max = dst.format.palette_type.max_entries();
    if src.palette_size > max {
        return Err(RwError::format(format!(
            "palette of {} entries does not fit {:?} ({max} entries)", src.palette_size, dst.format.palette_type
        )));
    }
    if !is_valid_index_depth(dst.format.palette_type, dst.format.depth) {
        return Err(RwError::format(format!(
            "index depth {} cannot address a {:?} palette", dst.format.depth, dst.format.palette_type
        )));
    }
    let src_stride = row_size(width, src.format.depth, src.format.row_alignment);
    let dst_stride = row_size(width, dst.format.depth, dst.format.row_alignment);
    let mut out = vec![0u8; dst_stride * height as usize];
    for y in 0..height as usize {
        let src_row = &texels[y * src_stride..(y + 1) * src_stride];
        let dst_row = &mut out[y * dst_stride..(y + 1) * dst_stride];
        for x in 0..width as usize {
            let index = get_texel_bits(src_row, x, src.format.depth);
            if index >= src.palette_size {
                return Err(RwError::format(format!(
                    "palette index {index} out of range ({} entries)", src.palette_size
                )));
            }
            set_texel_bits(dst_row, x, dst.format.depth, index);
        }
    }
    Ok(out)
}

fn decode_colors(texels: &[u8], width: u32, height: u32, src: &FormatDesc<'_>) -> Result<Vec<Rgba8>> {
    let codec = TexelCodec::new(&src.format, src.palette, src.palette_size)?;
    let stride = row_size(width, src.format.depth, src.format.row_alignment);
    let mut out = Vec::with_capacity(width as usize * height as usize);
    for y in 0..height as usize {
        let row = &texels[y * stride..(y + 1) * stride];
        for x in 0..width {
            out.push(codec.read(row, x)?);
        }
    }
    Ok(out)
}

/// Encode row-major colors; the flag reports a lossy luminance reduction.
fn encode_colors(colors: &[Rgba8], width: u32, height: u32, dst: &FormatDesc<'_>) -> Result<(Vec<u8>, bool)> {
    let stride = row_size(width, dst.format.depth, dst.format.row_alignment);
    let mut out = vec![0u8; stride * height as usize];
    let mut lossy = false;

    if dst.format.palette_type.is_palettized() {
        let palette = dst.palette.ok_or_else(|| RwError::format("destination palette is missing"))?;
        let codec = TexelCodec::new(&dst.format, Some(palette), dst.palette_size)?;
        let entries = codec.palette_colors();
        let mut indexer = PaletteIndexer::new(&entries);
        for y in 0..height as usize {
            let row = &mut out[y * stride..(y + 1) * stride];
            for x in 0..width as usize {
                let index = indexer.index_of(colors[y * width as usize + x]);
                set_texel_bits(row, x, dst.format.depth, index);
            }
        }
        return Ok((out, false));
    }

    let codec = TexelCodec::new(&dst.format, None, 0)?;
    let luminance = dst.format.raster_format.is_luminance();
    for y in 0..height as usize {
        let row = &mut out[y * stride..(y + 1) * stride];
        for x in 0..width {
            let c = colors[y * width as usize + x as usize];
            if luminance && !c.is_gray() {
                lossy = true;
            }
            codec.write(row, x, c)?;
        }
    }
    Ok((out, lossy))
}

fn convert_raw(texels: &[u8], width: u32, height: u32, src: &FormatDesc<'_>, dst: &FormatDesc<'_>) -> Result<(Vec<u8>, bool)> {
    check_length(texels, raw_data_size(width, height, src.format.depth, src.format.row_alignment), &src.format)?;

    let src_pal = src.format.palette_type.is_palettized();
    let dst_pal = dst.format.palette_type.is_palettized();
    if src_pal && dst_pal && (dst.palette.is_none() || src.shares_palette_with(dst)) {
        return remap_indices(texels, width, height, src, dst).map(|out| (out, false));
    }
    let colors = decode_colors(texels, width, height, src)?;
    encode_colors(&colors, width, height, dst)
}

/// Cut the `layer_width`×`layer_height` corner out of tightly packed RGBA.
fn crop_rgba(rgba: &[u8], surface_width: u32, layer_width: u32, layer_height: u32) -> Vec<u8> {
    if surface_width == layer_width {
        let len = layer_width as usize * layer_height as usize * 4;
        return rgba[..len].to_vec();
    }
    let src_stride = surface_width as usize * 4;
    let dst_stride = layer_width as usize * 4;
    let mut out = Vec::with_capacity(dst_stride * layer_height as usize);
    for y in 0..layer_height as usize {
        out.extend_from_slice(&rgba[y * src_stride..y * src_stride + dst_stride]);
    }
    out
}

/// Convert one level between any two encodings.  Always allocates.
fn convert_any(texels: &[u8], dims: MipDims, src: &FormatDesc<'_>, dst: &FormatDesc<'_>) -> Result<(Vec<u8>, MipDims, bool)> {
    if src.is_same_encoding(dst) {
        let size = src.format.data_size(dims.width, dims.height);
        check_length(texels, size, &src.format)?;
        return Ok((texels[..size].to_vec(), dims, false));
    }

    let src_comp = src.format.compression;
    let dst_comp = dst.format.compression;
    match (src_comp.is_compressed(), dst_comp.is_compressed()) {
        (false, false) => {
            let (out, lossy) = convert_raw(texels, dims.width, dims.height, src, dst)?;
            Ok((out, dims, lossy))
        }
        (true, _) => {
            let surface = dxt::decompress(texels, dims.width, dims.height, src_comp)?;
            let (lw, lh) = (dims.layer_width.min(dims.width), dims.layer_height.min(dims.height));
            let rgba = crop_rgba(&surface, dims.width, lw, lh);
            if dst_comp.is_compressed() {
                let (blocks, sw, sh) = dxt::compress(&rgba, lw, lh, dst_comp)?;
                Ok((blocks, MipDims { width: sw, height: sh, layer_width: lw, layer_height: lh }, false))
            } else {
                let (out, lossy) = convert_raw(&rgba, lw, lh, &RGBA_DESC, dst)?;
                Ok((out, MipDims::new(lw, lh), lossy))
            }
        }
        (false, true) => {
            let (rgba, _) = convert_raw(texels, dims.width, dims.height, src, &RGBA_DESC)?;
            let (blocks, sw, sh) = dxt::compress(&rgba, dims.width, dims.height, dst_comp)?;
            Ok((blocks, MipDims { width: sw, height: sh, layer_width: dims.width, layer_height: dims.height }, false))
        }
    }
}

// ── Mip-level entry points ────────────────────────────────────────────────────

/// Convert uncompressed texels.  With an identical encoding and no forced
/// copy, the source is returned borrowed.
pub fn convert_mipmap_layer_native<'a>(
    warnings:   &dyn WarningSink,
    texels:     &'a [u8],
    width:      u32,
    height:     u32,
    src:        &FormatDesc<'_>,
    dst:        &FormatDesc<'_>,
    force_copy: bool,
) -> Result<Cow<'a, [u8]>> {
    if src.format.compression.is_compressed() || dst.format.compression.is_compressed() {
        return Err(RwError::format("block-compressed data cannot be converted texel by texel"));
    }
    if src.is_same_encoding(dst) {
        let size = raw_data_size(width, height, src.format.depth, src.format.row_alignment);
        check_length(texels, size, &src.format)?;
        return Ok(if force_copy { Cow::Owned(texels[..size].to_vec()) } else { Cow::Borrowed(texels) });
    }
    let (out, lossy) = convert_raw(texels, width, height, src, dst)?;
    if lossy {
        warnings.warn(LOSSY_LUMINANCE.to_string());
    }
    Ok(Cow::Owned(out))
}

/// Convert one level, compressing or decompressing as needed.  Returns the
/// new buffer and the dimensions it covers.
pub fn convert_mipmap_layer_ex<'a>(
    warnings:   &dyn WarningSink,
    texels:     &'a [u8],
    dims:       MipDims,
    src:        &FormatDesc<'_>,
    dst:        &FormatDesc<'_>,
    force_copy: bool,
) -> Result<(Cow<'a, [u8]>, MipDims)> {
    if !force_copy && src.is_same_encoding(dst) {
        check_length(texels, src.format.data_size(dims.width, dims.height), &src.format)?;
        return Ok((Cow::Borrowed(texels), dims));
    }
    let (out, out_dims, lossy) = convert_any(texels, dims, src, dst)?;
    if lossy {
        warnings.warn(LOSSY_LUMINANCE.to_string());
    }
    Ok((Cow::Owned(out), out_dims))
}

pub fn convert_mipmap_layer<'a>(
    warnings:   &dyn WarningSink,
    mip:        &'a MipmapLayer<'_>,
    src:        &FormatDesc<'_>,
    dst:        &FormatDesc<'_>,
    force_copy: bool,
) -> Result<MipmapLayer<'a>> {
    let (texels, dims) = convert_mipmap_layer_ex(warnings, &mip.texels, MipDims::of(mip), src, dst, force_copy)?;
    Ok(MipmapLayer {
        texels,
        width:        dims.width,
        height:       dims.height,
        layer_width:  dims.layer_width,
        layer_height: dims.layer_height,
    })
}

// ── Traversal-level conversion ────────────────────────────────────────────────

fn convert_layer_inner<'s>(
    mip: &'s MipmapLayer<'_>,
    src: &FormatDesc<'_>,
    dst: &FormatDesc<'_>,
) -> Result<(MipmapLayer<'s>, bool)> {
    if src.is_same_encoding(dst) {
        return Ok((mip.borrowed(), false));
    }
    let (texels, dims, lossy) = convert_any(&mip.texels, MipDims::of(mip), src, dst)?;
    let layer = MipmapLayer {
        texels:       Cow::Owned(texels),
        width:        dims.width,
        height:       dims.height,
        layer_width:  dims.layer_width,
        layer_height: dims.layer_height,
    };
    Ok((layer, lossy))
}

#[cfg(feature = "parallel")]
fn convert_mips<'s>(
    mips: &'s [MipmapLayer<'_>],
    src:  &FormatDesc<'_>,
    dst:  &FormatDesc<'_>,
) -> Result<Vec<(MipmapLayer<'s>, bool)>> {
    use rayon::prelude::*;
    mips.par_iter().map(|mip| convert_layer_inner(mip, src, dst)).collect()
}

#[cfg(not(feature = "parallel"))]
fn convert_mips<'s>(
    mips: &'s [MipmapLayer<'_>],
    src:  &FormatDesc<'_>,
    dst:  &FormatDesc<'_>,
) -> Result<Vec<(MipmapLayer<'s>, bool)>> {
    mips.iter().map(|mip| convert_layer_inner(mip, src, dst)).collect()
}

/// Every texel of every level, as colors.
fn gather_colors(data: &PixelDataTraversal<'_>) -> Result<Vec<Rgba8>> {
    let desc = FormatDesc::of(data);
    let mut colors = Vec::new();
    for mip in &data.mipmaps {
        let (rgba, ..) = convert_any(&mip.texels, MipDims::of(mip), &desc, &RGBA_DESC)?;
        colors.extend(rgba.chunks_exact(4).map(|px| Rgba8::new(px[0], px[1], px[2], px[3])));
    }
    Ok(colors)
}

fn can_share_palette(src: &PixelDataTraversal<'_>, dst: &PixelFormat) -> bool {
    src.format.palette_type.is_palettized()
        && src.format.raster_format == dst.raster_format
        && src.format.color_order == dst.color_order
        && src.palette_size <= dst.palette_type.max_entries()
}

/// Convert every level of `src` into `dst_format`.  Levels already in the
/// destination encoding stay borrowed; palettizing direct-color data builds
/// one palette shared by all levels.
pub fn convert_pixel_data_deferred<'s>(
    warnings:   &dyn WarningSink,
    src:        &'s PixelDataTraversal<'_>,
    dst_format: &PixelFormat,
) -> Result<PixelDataTraversal<'s>> {
    src.validate()?;

    let (palette, palette_size): (Option<Cow<'s, [u8]>>, u32) = if !dst_format.palette_type.is_palettized() {
        (None, 0)
    } else if can_share_palette(src, dst_format) {
        (src.palette.as_deref().map(Cow::Borrowed), src.palette_size)
    } else {
        let colors = gather_colors(src)?;
        let max = dst_format.palette_type.max_entries() as usize;
        let entries = build_palette(colors, max);
        if src.format.palette_type.is_palettized() && src.palette_size as usize > max {
            warnings.warn(format!(
                "palette reduced from {} to {} entries", src.palette_size, entries.len()
            ));
        }
        let bytes = encode_palette(&entries, dst_format.raster_format, dst_format.color_order)?;
        (Some(Cow::Owned(bytes)), entries.len() as u32)
    };

    let mipmaps = {
        let src_desc = FormatDesc::of(src);
        let dst_desc = FormatDesc { format: *dst_format, palette: palette.as_deref(), palette_size };
        let converted = convert_mips(&src.mipmaps, &src_desc, &dst_desc)?;
        if converted.iter().any(|(_, lossy)| *lossy) {
            warnings.warn(LOSSY_LUMINANCE.to_string());
        }
        converted.into_iter().map(|(mip, _)| mip).collect()
    };

    let mut result = PixelDataTraversal {
        format:             *dst_format,
        palette,
        palette_size,
        mipmaps,
        has_alpha:          false,
        auto_mipmaps:       src.auto_mipmaps,
        cube_texture:       src.cube_texture,
        raster_type:        src.raster_type,
        is_newly_allocated: false,
    };
    result.has_alpha = src.has_alpha && calculate_has_alpha(&result)?;
    result.refresh_allocation_flag();
    Ok(result)
}

/// Convert `data` in place.  Returns whether anything changed; on error
/// `data` is left as it was.
pub fn convert_pixel_data(
    warnings:   &dyn WarningSink,
    data:       &mut PixelDataTraversal<'_>,
    dst_format: &PixelFormat,
) -> Result<bool> {
    if data.format == *dst_format {
        return Ok(false);
    }
    let converted = convert_pixel_data_deferred(warnings, data, dst_format)?.into_owned();
    *data = converted;
    Ok(true)
}

// ── Block compression decision ────────────────────────────────────────────────

/// Which DXT variants a backend can store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DxtSupport {
    pub dxt1: bool,
    pub dxt2: bool,
    pub dxt3: bool,
    pub dxt4: bool,
    pub dxt5: bool,
}

impl DxtSupport {
    pub const NONE: DxtSupport = DxtSupport { dxt1: false, dxt2: false, dxt3: false, dxt4: false, dxt5: false };
    pub const ALL:  DxtSupport = DxtSupport { dxt1: true, dxt2: true, dxt3: true, dxt4: true, dxt5: true };

    pub fn supports(&self, compression: Compression) -> bool {
        match compression {
            Compression::None => true,
            Compression::Dxt1 => self.dxt1,
            Compression::Dxt2 => self.dxt2,
            Compression::Dxt3 => self.dxt3,
            Compression::Dxt4 => self.dxt4,
            Compression::Dxt5 => self.dxt5,
        }
    }

    pub fn any(&self) -> bool {
        self.dxt1 || self.dxt2 || self.dxt3 || self.dxt4 || self.dxt5
    }
}

/// Pick the DXT variant for an image.  Opaque images take the cheapest
/// supported variant.  Images with alpha take DXT1 (one-bit alpha) below
/// quality 0.5 and otherwise the variant with the best alpha precision.
pub fn decide_best_dxt_compression_format(has_alpha: bool, support: &DxtSupport, quality: f32) -> Option<Compression> {
    use Compression::{Dxt1, Dxt2, Dxt3, Dxt4, Dxt5};
    if !has_alpha {
        return [Dxt1, Dxt3, Dxt5, Dxt2, Dxt4].into_iter().find(|c| support.supports(*c));
    }
    if quality < 0.5 && support.dxt1 {
        return Some(Dxt1);
    }
    [Dxt5, Dxt4, Dxt3, Dxt2].into_iter().find(|c| support.supports(*c))
}

// ── Alpha scan, bitmaps and mipmap generation ─────────────────────────────────

/// Whether any texel of any level is not fully opaque.
pub fn calculate_has_alpha(data: &PixelDataTraversal<'_>) -> Result<bool> {
    let format = &data.format;
    if !format.compression.is_compressed()
        && !format.palette_type.is_palettized()
        && !format.raster_format.has_alpha_channel()
    {
        return Ok(false);
    }
    let desc = FormatDesc::of(data);
    for mip in &data.mipmaps {
        let (rgba, ..) = convert_any(&mip.texels, MipDims::of(mip), &desc, &RGBA_DESC)?;
        if rgba.chunks_exact(4).any(|px| px[3] != 255) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Decode level `level` into a bitmap of its logical size.
pub fn mip_to_bitmap(warnings: &dyn WarningSink, data: &PixelDataTraversal<'_>, level: usize) -> Result<Bitmap> {
    let mip = data.mipmaps.get(level).ok_or_else(|| {
        RwError::format(format!("mip level {level} out of range ({} levels)", data.mipmaps.len()))
    })?;
    let desc = FormatDesc::of(data);
    let (rgba, dims) = convert_mipmap_layer_ex(warnings, &mip.texels, MipDims::of(mip), &desc, &RGBA_DESC, false)?;
    let rgba = if dims.width != dims.layer_width || dims.height != dims.layer_height {
        crop_rgba(&rgba, dims.width, dims.layer_width, dims.layer_height)
    } else {
        let len = dims.width as usize * dims.height as usize * 4;
        rgba[..len].to_vec()
    };
    Bitmap::from_rgba(dims.layer_width, dims.layer_height, rgba)
}

/// 2×2 box filter; odd edges reuse their last row or column.
fn downsample(rgba: &[u8], width: u32, height: u32) -> (Vec<u8>, u32, u32) {
    let (w, h) = (width as usize, height as usize);
    let (nw, nh) = ((w / 2).max(1), (h / 2).max(1));
    let mut out = vec![0u8; nw * nh * 4];
    for y in 0..nh {
        for x in 0..nw {
            let (x0, y0) = ((x * 2).min(w - 1), (y * 2).min(h - 1));
            let (x1, y1) = ((x * 2 + 1).min(w - 1), (y * 2 + 1).min(h - 1));
            for ch in 0..4 {
                let sum = rgba[(y0 * w + x0) * 4 + ch] as u32
                    + rgba[(y0 * w + x1) * 4 + ch] as u32
                    + rgba[(y1 * w + x0) * 4 + ch] as u32
                    + rgba[(y1 * w + x1) * 4 + ch] as u32;
                out[(y * nw + x) * 4 + ch] = ((sum + 2) / 4) as u8;
            }
        }
    }
    (out, nw as u32, nh as u32)
}

/// Rebuild levels 1.. from level 0 until 1×1 or `max_levels` levels exist.
/// Returns the resulting level count.
pub fn generate_mipmaps(data: &mut PixelDataTraversal<'_>, max_levels: u32) -> Result<u32> {
    data.validate()?;
    let levels = {
        let desc = FormatDesc::of(data);
        let (mut rgba, dims, _) = convert_any(&data.mipmaps[0].texels, MipDims::of(&data.mipmaps[0]), &desc, &RGBA_DESC)?;
        let (mut w, mut h) = (dims.layer_width, dims.layer_height);
        if dims.width != w || dims.height != h {
            rgba = crop_rgba(&rgba, dims.width, w, h);
        }

        let mut levels = Vec::new();
        while (levels.len() as u32 + 1) < max_levels.max(1) && (w > 1 || h > 1) {
            let (next, nw, nh) = downsample(&rgba, w, h);
            let (texels, dims, _) = convert_any(&next, MipDims::new(nw, nh), &RGBA_DESC, &desc)?;
            levels.push(MipmapLayer {
                texels:       Cow::Owned(texels),
                width:        dims.width,
                height:       dims.height,
                layer_width:  dims.layer_width,
                layer_height: dims.layer_height,
            });
            rgba = next;
            w = nw;
            h = nh;
        }
        levels
    };
    data.mipmaps.truncate(1);
    data.mipmaps.extend(levels);
    data.refresh_allocation_flag();
    Ok(data.mipmaps.len() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixel::{ColorOrder, PaletteType, RasterFormat};
    use crate::warnings::WarningCollector;

    fn bgra8888() -> PixelFormat {
        PixelFormat::raw(RasterFormat::R8G8B8A8, ColorOrder::Bgra, 4)
    }

    fn rgba_traversal(width: u32, height: u32, pixels: &[[u8; 4]]) -> PixelDataTraversal<'static> {
        let bytes: Vec<u8> = pixels.iter().flatten().copied().collect();
        let bmp = Bitmap::from_rgba(width, height, bytes).unwrap();
        bmp.into_pixel_data()
    }

    #[test]
    fn identical_formats_are_zero_copy() {
        let texels = vec![7u8; 64];
        let desc = FormatDesc::direct(bgra8888());
        let out = convert_mipmap_layer_native(&WarningCollector::new(), &texels, 4, 4, &desc, &desc, false).unwrap();
        assert!(matches!(out, Cow::Borrowed(_)));
        assert_eq!(out.as_ptr(), texels.as_ptr());

        let copied = convert_mipmap_layer_native(&WarningCollector::new(), &texels, 4, 4, &desc, &desc, true).unwrap();
        assert!(matches!(copied, Cow::Owned(_)));
        assert_eq!(&*copied, &texels[..]);
    }

    #[test]
    fn rgba_to_bgra_swaps_channels() {
        let texels = [1u8, 2, 3, 4];
        let out = convert_mipmap_layer_native(
            &WarningCollector::new(), &texels, 1, 1, &RGBA_DESC, &FormatDesc::direct(bgra8888()), false,
        ).unwrap();
        assert_eq!(&*out, &[3, 2, 1, 4]);
    }

    #[test]
    fn palette_indices_remap_width() {
        let fmt8 = bgra8888().with_palette(PaletteType::Pal8, 8);
        let fmt4 = bgra8888().with_palette(PaletteType::Pal4, 4).with_depth(4);
        let palette = vec![0u8; 16 * 4];
        let src = FormatDesc { format: fmt8, palette: Some(&palette), palette_size: 16 };
        let dst = FormatDesc { format: fmt4, palette: None, palette_size: 0 };

        let texels = [1u8, 2, 3, 15, 0, 0, 0, 0];
        let out = convert_mipmap_layer_native(&WarningCollector::new(), &texels, 4, 2, &src, &dst, false).unwrap();
        assert_eq!(&out[..2], &[0x21, 0xF3]);

        let big = vec![0u8; 17 * 4];
        let too_many = FormatDesc { format: fmt8, palette: Some(&big), palette_size: 17 };
        assert!(convert_mipmap_layer_native(&WarningCollector::new(), &texels, 4, 2, &too_many, &dst, false).is_err());
    }

    #[test]
    fn luminance_reduction_warns_when_lossy() {
        let lum = FormatDesc::direct(PixelFormat::raw(RasterFormat::Lum, ColorOrder::Bgra, 4));
        let warnings = WarningCollector::new();
        let gray = [9u8, 9, 9, 255, 9, 9, 9, 255, 9, 9, 9, 255, 9, 9, 9, 255];
        let out = convert_mipmap_layer_native(&warnings, &gray, 4, 1, &RGBA_DESC, &lum, false).unwrap();
        assert_eq!(&*out, &[9, 9, 9, 9]);
        assert!(warnings.is_empty());

        let colored = [30u8, 60, 90, 255, 0, 0, 0, 255, 0, 0, 0, 255, 0, 0, 0, 255];
        let out = convert_mipmap_layer_native(&warnings, &colored, 4, 1, &RGBA_DESC, &lum, false).unwrap();
        assert_eq!(out[0], 60);
        assert!(warnings.contains("lossy luminance"));
    }

    #[test]
    fn compressed_layers_report_surface_dims() {
        let rgba = vec![255u8; 2 * 2 * 4];
        let dst = FormatDesc::direct(PixelFormat::RGBA8888.with_compression(Compression::Dxt1));
        let (blocks, dims) = convert_mipmap_layer_ex(
            &WarningCollector::new(), &rgba, MipDims::new(2, 2), &RGBA_DESC, &dst, false,
        ).unwrap();
        assert_eq!(blocks.len(), 8);
        assert_eq!(dims, MipDims { width: 4, height: 4, layer_width: 2, layer_height: 2 });

        let (back, dims) = convert_mipmap_layer_ex(&WarningCollector::new(), &blocks, dims, &dst, &RGBA_DESC, false).unwrap();
        assert_eq!(dims, MipDims::new(2, 2));
        assert_eq!(&*back, &rgba[..]);
    }

    #[test]
    fn deferred_palettization_shares_one_palette() {
        let mut data = rgba_traversal(2, 2, &[[255, 0, 0, 255], [0, 255, 0, 255], [0, 0, 255, 255], [255, 0, 0, 255]]);
        generate_mipmaps(&mut data, 8).unwrap();
        assert_eq!(data.mipmaps.len(), 2);

        let dst = PixelFormat::raw(RasterFormat::R8G8B8A8, ColorOrder::Rgba, 4).with_palette(PaletteType::Pal8, 8);
        let warnings = WarningCollector::new();
        let out = convert_pixel_data_deferred(&warnings, &data, &dst).unwrap();
        assert!(out.is_newly_allocated);
        assert_eq!(out.mipmaps.len(), 2);
        assert!(out.palette_size >= 3 && out.palette_size <= 4);
        assert_eq!(out.mipmaps[0].texels.len(), 8);

        let bmp = mip_to_bitmap(&warnings, &out, 0).unwrap();
        assert_eq!(bmp.pixel(1, 0), Rgba8::new(0, 255, 0, 255));
    }

    #[test]
    fn failed_conversion_leaves_data_untouched() {
        let mut data = rgba_traversal(1, 1, &[[1, 2, 3, 4]]);
        let before = data.clone();
        let impossible = PixelFormat::raw(RasterFormat::R5G6B5, ColorOrder::Bgra, 4).with_depth(12);
        assert!(convert_pixel_data(&WarningCollector::new(), &mut data, &impossible).is_err());
        assert_eq!(data, before);

        assert!(convert_pixel_data(&WarningCollector::new(), &mut data, &bgra8888()).unwrap());
        assert_eq!(data.format, bgra8888());
        assert_eq!(&*data.mipmaps[0].texels, &[3, 2, 1, 4]);
        assert!(!convert_pixel_data(&WarningCollector::new(), &mut data, &bgra8888()).unwrap());
    }

    #[test]
    fn dxt_decision_order() {
        let all = DxtSupport::ALL;
        assert_eq!(decide_best_dxt_compression_format(true, &all, 1.0), Some(Compression::Dxt5));
        assert_eq!(decide_best_dxt_compression_format(true, &all, 0.2), Some(Compression::Dxt1));
        assert_eq!(decide_best_dxt_compression_format(false, &all, 1.0), Some(Compression::Dxt1));

        let only3 = DxtSupport { dxt3: true, ..DxtSupport::NONE };
        assert_eq!(decide_best_dxt_compression_format(true, &only3, 0.0), Some(Compression::Dxt3));
        assert_eq!(decide_best_dxt_compression_format(false, &DxtSupport::NONE, 1.0), None);
    }

    #[test]
    fn alpha_scan_ignores_opaque_data() {
        let opaque = rgba_traversal(1, 2, &[[1, 2, 3, 255], [4, 5, 6, 255]]);
        assert!(!calculate_has_alpha(&opaque).unwrap());
        let translucent = rgba_traversal(1, 2, &[[1, 2, 3, 255], [4, 5, 6, 0]]);
        assert!(calculate_has_alpha(&translucent).unwrap());
    }

    #[test]
    fn mip_chain_stops_at_one_texel() {
        let mut data = rgba_traversal(4, 2, &[[200, 0, 0, 255]; 8]);
        assert_eq!(generate_mipmaps(&mut data, 16).unwrap(), 3);
        assert_eq!((data.mipmaps[2].width, data.mipmaps[2].height), (1, 1));
        assert_eq!(&*data.mipmaps[2].texels, &[200, 0, 0, 255]);
        assert_eq!(generate_mipmaps(&mut data, 2).unwrap(), 2);
    }
}
