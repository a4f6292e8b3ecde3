use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rwtex::pixel::convert::{convert_pixel_data_deferred, generate_mipmaps};
use rwtex::swizzle::{transform_image_data, FormatEncoding};
use rwtex::{
    Bitmap, ColorOrder, Compression, D3D9Provider, Engine, PixelFormat, RasterFormat, RwObject, TexDictionary,
    TextureBase, WarningCollector,
};
use std::io::Cursor;

fn noise(w: u32, h: u32) -> Bitmap {
    let mut state = 0x2545_F491u32;
    let data = (0..w * h * 4)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state as u8
        })
        .collect();
    Bitmap::from_rgba(w, h, data).unwrap()
}

fn bench_conversion(c: &mut Criterion) {
    let bitmap = noise(256, 256);
    let src = bitmap.as_pixel_data();
    let warnings = WarningCollector::new();

    let bgra = PixelFormat::raw(RasterFormat::R8G8B8A8, ColorOrder::Bgra, 4);
    let r565 = PixelFormat::raw(RasterFormat::R5G6B5, ColorOrder::Bgra, 4);
    let dxt5 = PixelFormat::raw(RasterFormat::R4G4B4A4, ColorOrder::Bgra, 4).with_compression(Compression::Dxt5);

    c.bench_function("rgba_to_bgra_256", |b| {
        b.iter(|| convert_pixel_data_deferred(&warnings, black_box(&src), &bgra).unwrap())
    });
    c.bench_function("rgba_to_565_256", |b| {
        b.iter(|| convert_pixel_data_deferred(&warnings, black_box(&src), &r565).unwrap())
    });
    c.bench_function("rgba_to_dxt5_256", |b| {
        b.iter(|| convert_pixel_data_deferred(&warnings, black_box(&src), &dxt5).unwrap())
    });
    c.bench_function("mipmaps_256", |b| {
        b.iter(|| {
            let mut data = bitmap.clone().into_pixel_data();
            generate_mipmaps(black_box(&mut data), 32).unwrap()
        })
    });
}

fn bench_swizzle(c: &mut Criterion) {
    let linear: Vec<u8> = (0..256 * 256).map(|i| (i % 251) as u8).collect();

    c.bench_function("psmt8_pack_256", |b| {
        b.iter(|| {
            transform_image_data(FormatEncoding::IdTex8, FormatEncoding::Tex32, black_box(&linear), 256, 256, 4).unwrap()
        })
    });
}

fn bench_dictionary_write(c: &mut Criterion) {
    let engine = Engine::default();
    let mut dict = TexDictionary::new();
    for i in 0..8 {
        let raster = engine.create_raster(D3D9Provider::NAME).unwrap();
        raster.set_image_data(&engine, &noise(128, 128)).unwrap();
        dict.add(TextureBase::with_raster(format!("tex{i}"), raster));
    }
    let object = RwObject::TexDictionary(dict);

    c.bench_function("txd_write_8x128", |b| {
        b.iter(|| engine.serialize(black_box(&object), Cursor::new(Vec::new())).unwrap())
    });

    let bytes = engine.serialize(&object, Cursor::new(Vec::new())).unwrap().into_inner();
    c.bench_function("txd_read_8x128", |b| {
        b.iter(|| engine.deserialize(Cursor::new(black_box(&bytes))).unwrap())
    });
}

criterion_group!(benches, bench_conversion, bench_swizzle, bench_dictionary_write);
criterion_main!(benches);
