use proptest::prelude::*;
use rwtex::pixel::convert::convert_pixel_data_deferred;
use rwtex::swizzle::{transform_image_data, FormatEncoding};
use rwtex::{
    BlockReader, BlockWriter, ColorOrder, LibraryVersion, MipmapLayer, PixelDataTraversal, PixelFormat,
    RasterFormat, WarningCollector,
};
use std::borrow::Cow;
use std::io::Cursor;

fn image(max_w: u32, max_h: u32, bytes_per_texel: usize) -> impl Strategy<Value = (u32, u32, Vec<u8>)> {
    (1..=max_w, 1..=max_h).prop_flat_map(move |(w, h)| {
        let len = w as usize * h as usize * bytes_per_texel;
        (Just(w), Just(h), prop::collection::vec(any::<u8>(), len))
    })
}

proptest! {
    #[test]
    fn psmt8_swizzle_round_trips((w, h, linear) in image(64, 32, 1)) {
        let packed = transform_image_data(FormatEncoding::IdTex8, FormatEncoding::Tex32, &linear, w, h, 1).unwrap();
        let back = transform_image_data(FormatEncoding::Tex32, FormatEncoding::IdTex8, &packed, w, h, 1).unwrap();
        prop_assert_eq!(back, linear);
    }

    #[test]
    fn block_swizzle_round_trips(depth in prop::sample::select(vec![8u32, 16, 32]), (w, h) in (1u32..=48, 1u32..=24)) {
        let len = w as usize * h as usize * (depth / 8) as usize;
        let linear: Vec<u8> = (0..len).map(|i| (i * 31 % 253) as u8).collect();
        let (lin, swz) = (FormatEncoding::LinearBlocks { depth }, FormatEncoding::SwizzledBlocks { depth });
        let packed = transform_image_data(lin, swz, &linear, w, h, 1).unwrap();
        let back = transform_image_data(swz, lin, &packed, w, h, 1).unwrap();
        prop_assert_eq!(back, linear);
    }

    #[test]
    fn luminance_conversion_is_idempotent((w, h, rgba) in image(16, 16, 4)) {
        let warnings = WarningCollector::new();
        let mut src = PixelDataTraversal::new(PixelFormat::RGBA8888);
        src.mipmaps.push(MipmapLayer::new(Cow::Owned(rgba), w, h));
        src.has_alpha = true;

        let lum = PixelFormat::raw(RasterFormat::LumAlpha, ColorOrder::Bgra, 4);
        let once = convert_pixel_data_deferred(&warnings, &src, &lum).unwrap().into_owned();
        let rgba = convert_pixel_data_deferred(&warnings, &once, &PixelFormat::RGBA8888).unwrap().into_owned();
        let twice = convert_pixel_data_deferred(&warnings, &rgba, &lum).unwrap();
        prop_assert_eq!(&once.mipmaps[0].texels, &twice.mipmaps[0].texels);
    }

    #[test]
    fn chunk_lengths_cover_their_bodies(
        bodies in prop::collection::vec(
            (prop::collection::vec(any::<u8>(), 0..64), any::<u16>(), prop::collection::vec(any::<u8>(), 0..8)),
            0..6,
        )
    ) {
        // Each body is written, then partly overwritten after a backward seek.
        let expected: Vec<Vec<u8>> = bodies
            .iter()
            .map(|(body, at, patch)| {
                let at = *at as usize % (body.len() + 1);
                let mut out = body.clone();
                out.resize(out.len().max(at + patch.len()), 0);
                out[at..at + patch.len()].copy_from_slice(patch);
                out
            })
            .collect();

        let mut w = BlockWriter::new(Cursor::new(Vec::new()), LibraryVersion::default()).unwrap();
        {
            let mut outer = w.enter(0x16).unwrap();
            for (body, at, patch) in &bodies {
                let mut inner = outer.enter(0x1).unwrap();
                inner.write_all(body).unwrap();
                inner.seek((*at as usize % (body.len() + 1)) as u64).unwrap();
                inner.write_all(patch).unwrap();
                inner.leave().unwrap();
            }
            outer.leave().unwrap();
        }
        let bytes = w.into_inner().into_inner();
        let payload: usize = expected.iter().map(|b| b.len() + 12).sum();
        prop_assert_eq!(bytes.len(), payload + 12);

        let mut r = BlockReader::new(Cursor::new(bytes)).unwrap();
        let mut outer = r.enter().unwrap();
        prop_assert_eq!(outer.length() as usize, payload);
        for body in &expected {
            let mut inner = outer.enter().unwrap();
            prop_assert_eq!(inner.length() as usize, body.len());
            prop_assert_eq!(&inner.read_vec(body.len()).unwrap(), body);
            inner.leave().unwrap();
        }
        prop_assert_eq!(outer.remaining(), 0);
        outer.leave().unwrap();
    }
}
