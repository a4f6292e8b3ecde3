//! DXT1..DXT5 block compression.
//!
//! Decoding follows the DX9 reference rounding: the two interpolated colors
//! of a four-color block are `(2*c0 + c1) / 3` and `(c0 + 2*c1) / 3`, and a
//! DXT1 block with `c0 <= c1` switches to three colors plus transparent
//! black.  DXT2 and DXT4 store premultiplied color; decoding divides it back
//! out so every caller sees straight alpha.
//!
//! The encoder is a plain bounding-box fit.  It is not meant to rival a
//! dedicated texture compressor; it produces valid blocks that decode close
//! to the source, which is what re-saving an edited texture needs.
//!
//! # Block layouts
//!
//! | Format     | Bytes | Layout |
//! |------------|-------|--------|
//! | DXT1       | 8     | c0:565, c1:565, 16×2-bit indices |
//! | DXT2/DXT3  | 16    | 16×4-bit explicit alpha, DXT1 color block |
//! | DXT4/DXT5  | 16    | a0, a1, 16×3-bit alpha indices, DXT1 color block |

use crate::error::{Result, RwError};
use crate::pixel::color::{expand_channel, reduce_channel, Rgba8};
use crate::pixel::{align_up, Compression};

// ── Color endpoints ───────────────────────────────────────────────────────────

fn decode_565(raw: u16) -> Rgba8 {
    Rgba8::new(
        expand_channel((raw >> 11) as u32 & 0x1F, 5),
        expand_channel((raw >> 5) as u32 & 0x3F, 6),
        expand_channel(raw as u32 & 0x1F, 5),
        255,
    )
}

fn encode_565(c: Rgba8) -> u16 {
    ((reduce_channel(c.r, 5) << 11) | (reduce_channel(c.g, 6) << 5) | reduce_channel(c.b, 5)) as u16
}

/// The four colors a color block can reference.
fn color_dictionary(c0_raw: u16, c1_raw: u16, three_color_mode: bool) -> [Rgba8; 4] {
    let c0 = decode_565(c0_raw);
    let c1 = decode_565(c1_raw);
    let mix = |a: u8, b: u8, wa: u32, wb: u32| ((a as u32 * wa + b as u32 * wb) / (wa + wb)) as u8;

    let mut dict = [c0, c1, Rgba8::default(), Rgba8::default()];
    if three_color_mode {
        dict[2] = Rgba8::new(mix(c0.r, c1.r, 1, 1), mix(c0.g, c1.g, 1, 1), mix(c0.b, c1.b, 1, 1), 255);
        dict[3] = Rgba8::new(0, 0, 0, 0);
    } else {
        dict[2] = Rgba8::new(mix(c0.r, c1.r, 2, 1), mix(c0.g, c1.g, 2, 1), mix(c0.b, c1.b, 2, 1), 255);
        dict[3] = Rgba8::new(mix(c0.r, c1.r, 1, 2), mix(c0.g, c1.g, 1, 2), mix(c0.b, c1.b, 1, 2), 255);
    }
    dict
}

fn decode_color_block(block: &[u8], allow_transparent: bool, out: &mut [Rgba8; 16]) {
    let c0 = u16::from_le_bytes([block[0], block[1]]);
    let c1 = u16::from_le_bytes([block[2], block[3]]);
    let indices = u32::from_le_bytes([block[4], block[5], block[6], block[7]]);
    let dict = color_dictionary(c0, c1, allow_transparent && c0 <= c1);
    for (i, px) in out.iter_mut().enumerate() {
        *px = dict[((indices >> (i * 2)) & 3) as usize];
    }
}

fn alpha_dictionary(a0: u8, a1: u8) -> [u8; 8] {
    let (a0w, a1w) = (a0 as u32, a1 as u32);
    let mut dict = [a0, a1, 0, 0, 0, 0, 0, 255];
    if a0 > a1 {
        for i in 1..7u32 {
            dict[i as usize + 1] = (((7 - i) * a0w + i * a1w) / 7) as u8;
        }
    } else {
        for i in 1..5u32 {
            dict[i as usize + 1] = (((5 - i) * a0w + i * a1w) / 5) as u8;
        }
        dict[6] = 0;
    }
    dict
}

// ── Decoding ──────────────────────────────────────────────────────────────────

/// Decode one block into 16 texels, row-major.
pub fn decode_block(block: &[u8], compression: Compression) -> [Rgba8; 16] {
    let mut texels = [Rgba8::default(); 16];
    match compression {
        Compression::Dxt1 => decode_color_block(&block[..8], true, &mut texels),
        Compression::Dxt2 | Compression::Dxt3 => {
            decode_color_block(&block[8..16], false, &mut texels);
            let alpha = u64::from_le_bytes([
                block[0], block[1], block[2], block[3], block[4], block[5], block[6], block[7],
            ]);
            for (i, px) in texels.iter_mut().enumerate() {
                px.a = ((alpha >> (i * 4)) & 0xF) as u8 * 17;
            }
        }
        Compression::Dxt4 | Compression::Dxt5 => {
            decode_color_block(&block[8..16], false, &mut texels);
            let dict = alpha_dictionary(block[0], block[1]);
            let mut bits = [0u8; 8];
            bits[..6].copy_from_slice(&block[2..8]);
            let indices = u64::from_le_bytes(bits);
            for (i, px) in texels.iter_mut().enumerate() {
                px.a = dict[((indices >> (i * 3)) & 7) as usize];
            }
        }
        Compression::None => {}
    }
    if compression.is_premultiplied() {
        for px in texels.iter_mut() {
            *px = unpremultiply(*px);
        }
    }
    texels
}

fn unpremultiply(c: Rgba8) -> Rgba8 {
    if c.a == 0 || c.a == 255 {
        return c;
    }
    let f = |v: u8| ((v as u32 * 255 + c.a as u32 / 2) / c.a as u32).min(255) as u8;
    Rgba8::new(f(c.r), f(c.g), f(c.b), c.a)
}

fn premultiply(c: Rgba8) -> Rgba8 {
    let f = |v: u8| ((v as u32 * c.a as u32 + 127) / 255) as u8;
    Rgba8::new(f(c.r), f(c.g), f(c.b), c.a)
}

/// Decode a compressed surface into tightly packed 32-bit RGBA texels of
/// the same surface dimensions.
pub fn decompress(src: &[u8], surface_width: u32, surface_height: u32, compression: Compression) -> Result<Vec<u8>> {
    if !compression.is_compressed() {
        return Err(RwError::format("decompress called on uncompressed data"));
    }
    let blocks_x = surface_width.div_ceil(4) as usize;
    let blocks_y = surface_height.div_ceil(4) as usize;
    let block_size = compression.block_size();
    let needed = blocks_x * blocks_y * block_size;
    if src.len() < needed {
        return Err(RwError::format(format!(
            "{} surface {surface_width}x{surface_height} needs {needed} bytes, got {}",
            compression.name(), src.len()
        )));
    }

    let width = surface_width as usize;
    let height = surface_height as usize;
    let mut out = vec![0u8; width * height * 4];
    for by in 0..blocks_y {
        for bx in 0..blocks_x {
            let offset = (by * blocks_x + bx) * block_size;
            let texels = decode_block(&src[offset..offset + block_size], compression);
            for (i, px) in texels.iter().enumerate() {
                let x = bx * 4 + (i & 3);
                let y = by * 4 + (i >> 2);
                if x < width && y < height {
                    let o = (y * width + x) * 4;
                    out[o..o + 4].copy_from_slice(&[px.r, px.g, px.b, px.a]);
                }
            }
        }
    }
    Ok(out)
}

// ── Encoding ──────────────────────────────────────────────────────────────────

fn nearest_color(dict: &[Rgba8], px: Rgba8) -> u32 {
    let opaque = Rgba8::opaque(px.r, px.g, px.b);
    dict.iter()
        .enumerate()
        .min_by_key(|(_, c)| Rgba8::opaque(c.r, c.g, c.b).distance_sq(&opaque))
        .map(|(i, _)| i as u32)
        .unwrap_or(0)
}

fn encode_color_block(texels: &[Rgba8; 16], allow_transparent: bool, out: &mut [u8]) {
    let transparent = |px: &Rgba8| allow_transparent && px.a < 128;
    let mut lo = Rgba8::new(255, 255, 255, 255);
    let mut hi = Rgba8::new(0, 0, 0, 255);
    let mut any_opaque = false;
    for px in texels.iter().filter(|px| !transparent(*px)) {
        any_opaque = true;
        lo = Rgba8::new(lo.r.min(px.r), lo.g.min(px.g), lo.b.min(px.b), 255);
        hi = Rgba8::new(hi.r.max(px.r), hi.g.max(px.g), hi.b.max(px.b), 255);
    }
    if !any_opaque {
        lo = Rgba8::new(0, 0, 0, 255);
        hi = lo;
    }

    let has_transparency = texels.iter().any(|px| transparent(px));
    let (c0, c1) = if has_transparency {
        (encode_565(lo), encode_565(hi))
    } else {
        (encode_565(hi), encode_565(lo))
    };
    let three_color = allow_transparent && (has_transparency || c0 <= c1);
    let dict = color_dictionary(c0, c1, three_color);
    let usable = if three_color { 3 } else { 4 };

    let mut indices = 0u32;
    for (i, px) in texels.iter().enumerate() {
        let index = if transparent(px) { 3 } else { nearest_color(&dict[..usable], *px) };
        indices |= index << (i * 2);
    }
    out[0..2].copy_from_slice(&c0.to_le_bytes());
    out[2..4].copy_from_slice(&c1.to_le_bytes());
    out[4..8].copy_from_slice(&indices.to_le_bytes());
}

fn encode_explicit_alpha(texels: &[Rgba8; 16], out: &mut [u8]) {
    let mut bits = 0u64;
    for (i, px) in texels.iter().enumerate() {
        bits |= (reduce_channel(px.a, 4) as u64) << (i * 4);
    }
    out[..8].copy_from_slice(&bits.to_le_bytes());
}

fn encode_interpolated_alpha(texels: &[Rgba8; 16], out: &mut [u8]) {
    let a0 = texels.iter().map(|px| px.a).max().unwrap_or(255);
    let a1 = texels.iter().map(|px| px.a).min().unwrap_or(255);
    let dict = alpha_dictionary(a0, a1);
    let mut bits = 0u64;
    for (i, px) in texels.iter().enumerate() {
        let index = dict.iter()
            .enumerate()
            .min_by_key(|(_, a)| (**a as i32 - px.a as i32).abs())
            .map(|(i, _)| i as u64)
            .unwrap_or(0);
        bits |= index << (i * 3);
    }
    out[0] = a0;
    out[1] = a1;
    out[2..8].copy_from_slice(&bits.to_le_bytes()[..6]);
}

/// Encode 16 row-major texels into one block.
pub fn encode_block(texels: &[Rgba8; 16], compression: Compression, out: &mut [u8]) {
    let mut src = *texels;
    if compression.is_premultiplied() {
        for px in src.iter_mut() {
            *px = premultiply(*px);
        }
    }
    match compression {
        Compression::Dxt1 => encode_color_block(&src, true, &mut out[..8]),
        Compression::Dxt2 | Compression::Dxt3 => {
            encode_explicit_alpha(&src, &mut out[..8]);
            encode_color_block(&src, false, &mut out[8..16]);
        }
        Compression::Dxt4 | Compression::Dxt5 => {
            encode_interpolated_alpha(&src, &mut out[..8]);
            encode_color_block(&src, false, &mut out[8..16]);
        }
        Compression::None => {}
    }
}

/// Compress tightly packed 32-bit RGBA texels of `width`×`height`.  Returns
/// the blocks and the surface dimensions they cover; texels beyond the
/// layer edge repeat the nearest edge texel.
pub fn compress(rgba: &[u8], width: u32, height: u32, compression: Compression) -> Result<(Vec<u8>, u32, u32)> {
    if !compression.is_compressed() {
        return Err(RwError::format("compress called without a block format"));
    }
    if width == 0 || height == 0 {
        return Err(RwError::format("cannot compress an empty layer"));
    }
    let w = width as usize;
    let h = height as usize;
    if rgba.len() < w * h * 4 {
        return Err(RwError::format(format!(
            "RGBA layer {width}x{height} needs {} bytes, got {}", w * h * 4, rgba.len()
        )));
    }

    let surface_w = align_up(w, 4);
    let surface_h = align_up(h, 4);
    let blocks_x = surface_w / 4;
    let blocks_y = surface_h / 4;
    let block_size = compression.block_size();
    let mut out = vec![0u8; blocks_x * blocks_y * block_size];

    for by in 0..blocks_y {
        for bx in 0..blocks_x {
            let mut texels = [Rgba8::default(); 16];
            for (i, px) in texels.iter_mut().enumerate() {
                let x = (bx * 4 + (i & 3)).min(w - 1);
                let y = (by * 4 + (i >> 2)).min(h - 1);
                let o = (y * w + x) * 4;
                *px = Rgba8::new(rgba[o], rgba[o + 1], rgba[o + 2], rgba[o + 3]);
            }
            let offset = (by * blocks_x + bx) * block_size;
            encode_block(&texels, compression, &mut out[offset..offset + block_size]);
        }
    }
    Ok((out, surface_w as u32, surface_h as u32))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(w: u32, h: u32, c: Rgba8) -> Vec<u8> {
        (0..w * h).flat_map(|_| [c.r, c.g, c.b, c.a]).collect()
    }

    #[test]
    fn solid_dxt1_round_trips_exactly() {
        let red = Rgba8::new(255, 0, 0, 255);
        let (blocks, sw, sh) = compress(&solid(4, 4, red), 4, 4, Compression::Dxt1).unwrap();
        assert_eq!((blocks.len(), sw, sh), (8, 4, 4));
        let back = decompress(&blocks, 4, 4, Compression::Dxt1).unwrap();
        assert_eq!(back, solid(4, 4, red));
    }

    #[test]
    fn dxt1_keeps_punch_through_alpha() {
        let mut src = solid(4, 4, Rgba8::new(0, 0, 255, 255));
        src[3] = 0;
        let (blocks, ..) = compress(&src, 4, 4, Compression::Dxt1).unwrap();
        let back = decompress(&blocks, 4, 4, Compression::Dxt1).unwrap();
        assert_eq!(back[3], 0);
        assert_eq!(&back[4..8], &[0, 0, 255, 255]);
    }

    #[test]
    fn dxt3_alpha_is_four_bit() {
        let (blocks, ..) = compress(&solid(4, 4, Rgba8::new(0, 255, 0, 0x88)), 4, 4, Compression::Dxt3).unwrap();
        let back = decompress(&blocks, 4, 4, Compression::Dxt3).unwrap();
        assert_eq!(back[3], 0x88);
        assert_eq!(&back[0..3], &[0, 255, 0]);
    }

    #[test]
    fn dxt5_alpha_gradient_stays_close() {
        let mut src = Vec::new();
        for i in 0..16u32 {
            src.extend_from_slice(&[255, 255, 255, (i * 17) as u8]);
        }
        let (blocks, ..) = compress(&src, 4, 4, Compression::Dxt5).unwrap();
        let back = decompress(&blocks, 4, 4, Compression::Dxt5).unwrap();
        for i in 0..16 {
            let diff = (back[i * 4 + 3] as i32 - src[i * 4 + 3] as i32).abs();
            assert!(diff <= 20, "texel {i}: {} vs {}", back[i * 4 + 3], src[i * 4 + 3]);
        }
    }

    #[test]
    fn premultiplied_formats_return_straight_alpha() {
        let c = Rgba8::new(255, 255, 255, 255);
        let (blocks, ..) = compress(&solid(4, 4, c), 4, 4, Compression::Dxt4).unwrap();
        assert_eq!(decompress(&blocks, 4, 4, Compression::Dxt4).unwrap(), solid(4, 4, c));
    }

    #[test]
    fn partial_blocks_pad_the_surface() {
        let (blocks, sw, sh) = compress(&solid(2, 1, Rgba8::new(0, 0, 0, 255)), 2, 1, Compression::Dxt5).unwrap();
        assert_eq!((blocks.len(), sw, sh), (16, 4, 4));
        assert!(decompress(&blocks[..8], 4, 4, Compression::Dxt5).is_err());
    }
}
