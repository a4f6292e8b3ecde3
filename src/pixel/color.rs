//! Texel codec: one texel at any supported bit depth ↔ 8-bit-per-channel color.
//!
//! Every conversion path in the crate goes through [`Rgba8`].  Direct-color
//! texels are little-endian integers of `depth` bits whose channels are laid
//! out from the lowest bit upward in [`ColorOrder`] sequence; a channel the
//! format lacks takes no bits (alpha reads as 255) and unused high bits are
//! padding.

use crate::error::{Result, RwError};
use crate::pixel::{ColorOrder, PaletteType, PixelFormat, RasterFormat};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rgba8 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba8 {
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const fn opaque(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    /// Integer average of the three color channels.
    pub fn luminance(&self) -> u8 {
        ((self.r as u32 + self.g as u32 + self.b as u32) / 3) as u8
    }

    pub fn is_gray(&self) -> bool {
        self.r == self.g && self.g == self.b
    }

    pub fn distance_sq(&self, other: &Rgba8) -> u32 {
        let d = |a: u8, b: u8| {
            let v = a as i32 - b as i32;
            (v * v) as u32
        };
        d(self.r, other.r) + d(self.g, other.g) + d(self.b, other.b) + d(self.a, other.a)
    }
}

// ── Bit access ────────────────────────────────────────────────────────────────

/// Read texel `index` of `depth` bits from a packed row.  Sub-byte texels
/// fill each byte from the low bits up.
pub fn get_texel_bits(buf: &[u8], index: usize, depth: u32) -> u32 {
    match depth {
        1 | 2 | 4 => {
            let per_byte = 8 / depth as usize;
            let byte = buf[index / per_byte];
            let shift = (index % per_byte) as u32 * depth;
            (byte as u32 >> shift) & ((1 << depth) - 1)
        }
        8 => buf[index] as u32,
        16 => {
            let i = index * 2;
            u16::from_le_bytes([buf[i], buf[i + 1]]) as u32
        }
        24 => {
            let i = index * 3;
            u32::from_le_bytes([buf[i], buf[i + 1], buf[i + 2], 0])
        }
        32 => {
            let i = index * 4;
            u32::from_le_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]])
        }
        _ => 0,
    }
}

pub fn set_texel_bits(buf: &mut [u8], index: usize, depth: u32, value: u32) {
    match depth {
        1 | 2 | 4 => {
            let per_byte = 8 / depth as usize;
            let shift = (index % per_byte) as u32 * depth;
            let mask = (((1u32 << depth) - 1) << shift) as u8;
            let slot = &mut buf[index / per_byte];
            *slot = (*slot & !mask) | (((value << shift) as u8) & mask);
        }
        8 => buf[index] = value as u8,
        16 => {
            let i = index * 2;
            buf[i..i + 2].copy_from_slice(&(value as u16).to_le_bytes());
        }
        24 => {
            let i = index * 3;
            buf[i..i + 3].copy_from_slice(&value.to_le_bytes()[..3]);
        }
        32 => {
            let i = index * 4;
            buf[i..i + 4].copy_from_slice(&value.to_le_bytes());
        }
        _ => {}
    }
}

pub fn is_supported_texel_depth(depth: u32) -> bool {
    matches!(depth, 1 | 2 | 4 | 8 | 16 | 24 | 32)
}

/// Scale an n-bit channel to 8 bits, rounding to nearest.
#[inline]
pub fn expand_channel(value: u32, bits: u32) -> u8 {
    match bits {
        0 => 255,
        8 => value as u8,
        _ => {
            let max = (1u32 << bits) - 1;
            ((value * 255 + max / 2) / max) as u8
        }
    }
}

/// Scale an 8-bit channel to n bits, rounding to nearest.
#[inline]
pub fn reduce_channel(value: u8, bits: u32) -> u32 {
    match bits {
        0 => 0,
        8 => value as u32,
        _ => {
            let max = (1u32 << bits) - 1;
            (value as u32 * max + 127) / 255
        }
    }
}

// ── Channel layouts ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    R,
    G,
    B,
    A,
}

fn channel_sequence(order: ColorOrder) -> [Channel; 4] {
    match order {
        ColorOrder::Rgba => [Channel::R, Channel::G, Channel::B, Channel::A],
        ColorOrder::Bgra => [Channel::B, Channel::G, Channel::R, Channel::A],
        ColorOrder::Abgr => [Channel::A, Channel::B, Channel::G, Channel::R],
    }
}

/// How a texel of some format/depth is decoded.
#[derive(Debug, Clone, Copy)]
enum TexelLayout {
    /// Channel bit widths (r, g, b, a) packed in color-order sequence.
    Direct { widths: [u32; 4] },
    /// Luminance of `lum` bits in the low bits, alpha of `alpha` bits above it.
    Luminance { lum: u32, alpha: u32 },
}

fn texel_layout(format: RasterFormat, depth: u32) -> Option<TexelLayout> {
    use RasterFormat::*;
    let direct = |r, g, b, a| Some(TexelLayout::Direct { widths: [r, g, b, a] });
    match (format, depth) {
        (R5G5B5A1, 16) => direct(5, 5, 5, 1),
        (R5G6B5,   16) => direct(5, 6, 5, 0),
        (R4G4B4A4, 16) => direct(4, 4, 4, 4),
        (R5G5B5,   16) => direct(5, 5, 5, 0),
        (R8G8B8A8, 32) => direct(8, 8, 8, 8),
        (R8G8B8,   32) |
        (R8G8B8,   24) => direct(8, 8, 8, 0),
        (Lum,       8) => Some(TexelLayout::Luminance { lum: 8, alpha: 0 }),
        (Lum,       4) => Some(TexelLayout::Luminance { lum: 4, alpha: 0 }),
        (LumAlpha,  8) => Some(TexelLayout::Luminance { lum: 4, alpha: 4 }),
        (LumAlpha, 16) => Some(TexelLayout::Luminance { lum: 8, alpha: 8 }),
        _ => None,
    }
}

fn decode_direct(value: u32, widths: [u32; 4], order: ColorOrder) -> Rgba8 {
    let mut out = Rgba8::new(0, 0, 0, 255);
    let mut shift = 0;
    for ch in channel_sequence(order) {
        let bits = widths[ch as usize];
        if bits == 0 {
            continue;
        }
        let raw = (value >> shift) & ((1u32 << bits) - 1);
        let v = expand_channel(raw, bits);
        match ch {
            Channel::R => out.r = v,
            Channel::G => out.g = v,
            Channel::B => out.b = v,
            Channel::A => out.a = v,
        }
        shift += bits;
    }
    out
}

fn encode_direct(color: Rgba8, widths: [u32; 4], order: ColorOrder, depth: u32) -> u32 {
    let mut value = 0u32;
    let mut shift = 0;
    for ch in channel_sequence(order) {
        let bits = widths[ch as usize];
        if bits == 0 {
            continue;
        }
        let c = match ch {
            Channel::R => color.r,
            Channel::G => color.g,
            Channel::B => color.b,
            Channel::A => color.a,
        };
        value |= reduce_channel(c, bits) << shift;
        shift += bits;
    }
    // Padding bits above the channels are set, matching X8 conventions.
    if shift < depth && depth <= 32 {
        let pad_mask = if depth == 32 { u32::MAX } else { (1u32 << depth) - 1 };
        value |= pad_mask & !((1u64 << shift) - 1) as u32;
    }
    value
}

// ── Codec ─────────────────────────────────────────────────────────────────────

/// Reads and writes texels of one [`PixelFormat`].  Palettized formats read
/// through the palette; writing palettized texels goes through
/// [`set_texel_bits`] with an index instead.
#[derive(Debug, Clone, Copy)]
pub struct TexelCodec<'p> {
    format:       PixelFormat,
    layout:       Option<TexelLayout>,
    palette:      Option<(&'p [u8], u32, TexelLayout)>,
}

impl<'p> TexelCodec<'p> {
    pub fn new(format: &PixelFormat, palette: Option<&'p [u8]>, palette_size: u32) -> Result<Self> {
        if format.compression.is_compressed() {
            return Err(RwError::format(format!(
                "{} data has no per-texel representation", format.compression.name()
            )));
        }
        if !is_supported_texel_depth(format.depth) {
            return Err(RwError::format(format!("unsupported bit depth {}", format.depth)));
        }
        if format.palette_type.is_palettized() {
            let entries = palette.ok_or_else(|| RwError::format("palettized format without palette data"))?;
            let entry_depth = format.palette_entry_depth();
            let entry_layout = texel_layout(format.raster_format, entry_depth).ok_or_else(|| {
                RwError::format(format!("unsupported palette color format {}", format.raster_format))
            })?;
            if entries.len() < palette_size as usize * entry_depth as usize / 8 {
                return Err(RwError::format("palette buffer is shorter than its entry count"));
            }
            if format.depth < format.palette_type.min_index_depth() || format.depth > 8 {
                return Err(RwError::format(format!(
                    "index depth {} cannot address a {:?} palette", format.depth, format.palette_type
                )));
            }
            return Ok(Self { format: *format, layout: None, palette: Some((entries, palette_size, entry_layout)) });
        }
        let layout = texel_layout(format.raster_format, format.depth).ok_or_else(|| {
            RwError::format(format!(
                "unsupported bit depth {} for raster format {}", format.depth, format.raster_format
            ))
        })?;
        Ok(Self { format: *format, layout: Some(layout), palette: None })
    }

    pub fn format(&self) -> &PixelFormat {
        &self.format
    }

    pub fn is_palettized(&self) -> bool {
        self.palette.is_some()
    }

    fn decode(layout: TexelLayout, value: u32, order: ColorOrder) -> Rgba8 {
        match layout {
            TexelLayout::Direct { widths } => decode_direct(value, widths, order),
            TexelLayout::Luminance { lum, alpha } => {
                let l = expand_channel(value & ((1 << lum) - 1), lum);
                let a = if alpha == 0 {
                    255
                } else {
                    expand_channel((value >> lum) & ((1 << alpha) - 1), alpha)
                };
                Rgba8::new(l, l, l, a)
            }
        }
    }

    fn encode(layout: TexelLayout, color: Rgba8, order: ColorOrder, depth: u32) -> u32 {
        match layout {
            TexelLayout::Direct { widths } => encode_direct(color, widths, order, depth),
            TexelLayout::Luminance { lum, alpha } => {
                let l = reduce_channel(color.luminance(), lum);
                let a = if alpha == 0 { 0 } else { reduce_channel(color.a, alpha) };
                l | (a << lum)
            }
        }
    }

    /// Decode texel `x` of a row.
    pub fn read(&self, row: &[u8], x: u32) -> Result<Rgba8> {
        let raw = get_texel_bits(row, x as usize, self.format.depth);
        match (self.layout, self.palette) {
            (Some(layout), _) => Ok(Self::decode(layout, raw, self.format.color_order)),
            (None, Some((entries, size, entry_layout))) => {
                if raw >= size {
                    return Err(RwError::format(format!("palette index {raw} out of range ({size} entries)")));
                }
                let entry_depth = self.format.palette_entry_depth();
                let value = get_texel_bits(entries, raw as usize, entry_depth);
                Ok(Self::decode(entry_layout, value, self.format.color_order))
            }
            (None, None) => Err(RwError::format("texel codec has no layout")),
        }
    }

    /// Encode a color into texel `x` of a row (direct-color formats only).
    pub fn write(&self, row: &mut [u8], x: u32, color: Rgba8) -> Result<()> {
        let layout = self.layout.ok_or_else(|| {
            RwError::format("palettized texels are written as indices, not colors")
        })?;
        let value = Self::encode(layout, color, self.format.color_order, self.format.depth);
        set_texel_bits(row, x as usize, self.format.depth, value);
        Ok(())
    }

    /// Decode every palette entry.
    pub fn palette_colors(&self) -> Vec<Rgba8> {
        match self.palette {
            Some((entries, size, layout)) => {
                let depth = self.format.palette_entry_depth();
                (0..size as usize)
                    .map(|i| Self::decode(layout, get_texel_bits(entries, i, depth), self.format.color_order))
                    .collect()
            }
            None => Vec::new(),
        }
    }
}

/// Encode colors as palette entries in the given palette color format.
pub fn encode_palette(colors: &[Rgba8], raster_format: RasterFormat, order: ColorOrder) -> Result<Vec<u8>> {
    let depth = raster_format.natural_depth();
    let layout = texel_layout(raster_format, depth).ok_or_else(|| {
        RwError::format(format!("unsupported palette color format {raster_format}"))
    })?;
    let mut out = vec![0u8; colors.len() * depth as usize / 8];
    for (i, c) in colors.iter().enumerate() {
        set_texel_bits(&mut out, i, depth, TexelCodec::encode(layout, *c, order, depth));
    }
    Ok(out)
}

/// Whether a palette type's index can be stored at `depth` bits.
pub fn is_valid_index_depth(palette_type: PaletteType, depth: u32) -> bool {
    palette_type.is_palettized() && depth >= palette_type.min_index_depth() && depth <= 8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixel::PixelFormat;

    #[test]
    fn sub_byte_texels_fill_low_bits_first() {
        let mut buf = [0u8; 2];
        set_texel_bits(&mut buf, 0, 4, 0xA);
        set_texel_bits(&mut buf, 1, 4, 0x3);
        set_texel_bits(&mut buf, 2, 4, 0xF);
        assert_eq!(buf, [0x3A, 0x0F]);
        assert_eq!(get_texel_bits(&buf, 1, 4), 0x3);
        assert_eq!(get_texel_bits(&buf, 2, 4), 0xF);
    }

    #[test]
    fn bgra_8888_matches_d3d_byte_order() {
        let fmt = PixelFormat::raw(RasterFormat::R8G8B8A8, ColorOrder::Bgra, 4);
        let codec = TexelCodec::new(&fmt, None, 0).unwrap();
        let mut row = [0u8; 4];
        codec.write(&mut row, 0, Rgba8::new(1, 2, 3, 4)).unwrap();
        assert_eq!(row, [3, 2, 1, 4]);
        assert_eq!(codec.read(&row, 0).unwrap(), Rgba8::new(1, 2, 3, 4));
    }

    #[test]
    fn a1r5g5b5_layout() {
        let fmt = PixelFormat::raw(RasterFormat::R5G5B5A1, ColorOrder::Bgra, 4);
        let codec = TexelCodec::new(&fmt, None, 0).unwrap();
        let mut row = [0u8; 2];
        codec.write(&mut row, 0, Rgba8::new(255, 0, 0, 255)).unwrap();
        assert_eq!(u16::from_le_bytes(row), 0xFC00);
        codec.write(&mut row, 0, Rgba8::new(0, 0, 255, 0)).unwrap();
        assert_eq!(u16::from_le_bytes(row), 0x001F);
    }

    #[test]
    fn x8_padding_reads_opaque() {
        let fmt = PixelFormat::raw(RasterFormat::R8G8B8, ColorOrder::Bgra, 4);
        let codec = TexelCodec::new(&fmt, None, 0).unwrap();
        let mut row = [0u8; 4];
        codec.write(&mut row, 0, Rgba8::new(10, 20, 30, 0)).unwrap();
        assert_eq!(row, [30, 20, 10, 0xFF]);
        assert_eq!(codec.read(&row, 0).unwrap().a, 255);
    }

    #[test]
    fn channel_scaling_round_trips() {
        for bits in [1u32, 4, 5, 6] {
            for v in 0..(1u32 << bits) {
                assert_eq!(reduce_channel(expand_channel(v, bits), bits), v, "bits={bits} v={v}");
            }
        }
    }

    #[test]
    fn luminance_alpha_16() {
        let fmt = PixelFormat::raw(RasterFormat::LumAlpha, ColorOrder::Bgra, 4);
        let codec = TexelCodec::new(&fmt, None, 0).unwrap();
        let mut row = [0u8; 2];
        codec.write(&mut row, 0, Rgba8::new(30, 60, 90, 128)).unwrap();
        assert_eq!(row, [60, 128]);
        assert_eq!(codec.read(&row, 0).unwrap(), Rgba8::new(60, 60, 60, 128));
    }

    #[test]
    fn palette_lookup() {
        let colors = [Rgba8::new(255, 0, 0, 255), Rgba8::new(0, 255, 0, 128)];
        let palette = encode_palette(&colors, RasterFormat::R8G8B8A8, ColorOrder::Rgba).unwrap();
        let fmt = PixelFormat::raw(RasterFormat::R8G8B8A8, ColorOrder::Rgba, 4)
            .with_palette(crate::pixel::PaletteType::Pal8, 8);
        let codec = TexelCodec::new(&fmt, Some(&palette), 2).unwrap();
        assert_eq!(codec.read(&[1], 0).unwrap(), colors[1]);
        assert!(codec.read(&[2], 0).is_err());
        assert!(codec.write(&mut [0], 0, colors[0]).is_err());
        assert_eq!(codec.palette_colors(), colors.to_vec());
    }

    #[test]
    fn rejects_impossible_depths() {
        let fmt = PixelFormat::raw(RasterFormat::R8G8B8A8, ColorOrder::Rgba, 4).with_depth(16);
        assert!(TexelCodec::new(&fmt, None, 0).is_err());
        let fmt = PixelFormat::raw(RasterFormat::R5G6B5, ColorOrder::Rgba, 4).with_depth(12);
        assert!(TexelCodec::new(&fmt, None, 0).is_err());
    }
}
