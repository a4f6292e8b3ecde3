use rwtex::chunk::chunk_id;
use rwtex::native::d3d::d3d9::{d3dfmt, A8Handler};
use rwtex::texture::AddressMode;
use rwtex::{
    Bitmap, BlockReader, BlockWriter, ColorOrder, CompatibilityVerdict, Compression, D3D8Provider, D3D9Provider,
    Engine, EngineConfig, LibraryVersion, MipmapLayer, NativeProvider, PixelDataTraversal, PixelFormat,
    RasterFormat, RwError, RwObject, TexDictionary, TexNativeTypeProvider, TextureBase, TextureProperties,
    WarningCollector,
};
use rwtex::native::D3D9Texture;
use std::borrow::Cow;
use std::fs::File;
use std::io::{BufReader, Cursor};
use std::rc::Rc;
use tempfile::NamedTempFile;

fn gradient(w: u32, h: u32, with_alpha: bool) -> Bitmap {
    let mut data = Vec::with_capacity((w * h * 4) as usize);
    for y in 0..h {
        for x in 0..w {
            let a = if with_alpha && (x + y) % 2 == 1 { 96 } else { 255 };
            data.extend_from_slice(&[(x * 255 / w) as u8, (y * 255 / h) as u8, 0x5A, a]);
        }
    }
    Bitmap::from_rgba(w, h, data).unwrap()
}

fn gray(w: u32, h: u32) -> Bitmap {
    let mut data = Vec::with_capacity((w * h * 4) as usize);
    for i in 0..w * h {
        let l = (i * 13 % 256) as u8;
        data.extend_from_slice(&[l, l, l, 255 - l / 2]);
    }
    Bitmap::from_rgba(w, h, data).unwrap()
}

fn texture(engine: &Engine, name: &str, bitmap: &Bitmap) -> TextureBase {
    let raster = engine.create_raster(D3D9Provider::NAME).unwrap();
    raster.set_image_data(engine, bitmap).unwrap();
    TextureBase::with_raster(name, raster)
}

fn to_bytes(engine: &Engine, dict: TexDictionary) -> Vec<u8> {
    engine
        .serialize(&RwObject::TexDictionary(dict), Cursor::new(Vec::new()))
        .unwrap()
        .into_inner()
}

fn read_dict(engine: &Engine, bytes: &[u8]) -> TexDictionary {
    match engine.deserialize(Cursor::new(bytes.to_vec())).unwrap() {
        RwObject::TexDictionary(dict) => dict,
        other => panic!("expected a dictionary, got {}", other.type_name()),
    }
}

#[test]
fn test_bgra_pixels_are_acquired_directly() {
    let engine = Engine::default();
    let raster = engine.create_raster(D3D9Provider::NAME).unwrap();

    let format = PixelFormat::raw(RasterFormat::R8G8B8A8, ColorOrder::Bgra, 4);
    let texels: Vec<u8> = (0..64).collect();
    let mut data = PixelDataTraversal::new(format);
    data.mipmaps.push(MipmapLayer::new(Cow::Owned(texels.clone()), 4, 4));
    data.has_alpha = true;

    let feedback = raster.set_pixel_data(&engine, data).unwrap();
    assert!(feedback.has_directly_acquired);

    let info = raster.texture_info(&engine).unwrap();
    assert_eq!(info.format_name, "A8R8G8B8");
    assert_eq!((info.width, info.height, info.depth), (4, 4, 32));

    let stored = raster.get_pixel_data(&engine).unwrap();
    assert_eq!(stored.mipmaps[0].texels.len(), 64);
    assert_eq!(stored.mipmaps[0].texels.as_ref(), texels.as_slice());
    assert!(stored.palette.is_none());
}

#[test]
fn test_dictionary_file_round_trip() {
    let engine = Engine::default();
    let wall = gradient(8, 4, false);
    let sky = gradient(4, 4, true);

    let mut dict = TexDictionary::new();
    let mut first = texture(&engine, "wall", &wall);
    first.props.mask_name = "wallm".into();
    first.props.sampler.u_addressing = AddressMode::Clamp;
    dict.add(first);
    dict.add(texture(&engine, "Sky", &sky));

    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_path_buf();
    {
        let file = File::create(&path).unwrap();
        engine.serialize(&RwObject::TexDictionary(dict), file).unwrap();
    }

    let object = engine.deserialize(BufReader::new(File::open(&path).unwrap())).unwrap();
    let RwObject::TexDictionary(back) = object else { panic!("expected a dictionary") };
    assert_eq!(back.len(), 2);
    assert_eq!(back.recommended_device_id, 2);

    let wall_back = back.find("WALL").unwrap();
    assert_eq!(wall_back.name(), "wall");
    assert_eq!(wall_back.mask_name(), "wallm");
    assert_eq!(wall_back.props.sampler.u_addressing, AddressMode::Clamp);
    let raster = wall_back.raster.as_ref().unwrap();
    assert_eq!((raster.width(), raster.height(), raster.mipmap_count()), (8, 4, 1));
    assert_eq!(raster.get_bitmap(&engine).unwrap(), wall);

    let sky_back = back.find("sky").unwrap();
    assert_eq!(sky_back.raster.as_ref().unwrap().get_bitmap(&engine).unwrap(), sky);
}

#[test]
fn test_alpha_compresses_to_dxt5() {
    let engine = Engine::new(EngineConfig { compression_quality: 1.0, ..EngineConfig::default() });
    let tex = texture(&engine, "glass", &gradient(8, 8, true));
    let raster = tex.raster.clone().unwrap();
    raster.compress(&engine).unwrap();

    let info = raster.texture_info(&engine).unwrap();
    assert_eq!(info.compression, Compression::Dxt5);
    assert_eq!(info.format_name, "DXT5");
    assert!(info.has_alpha);

    let mut dict = TexDictionary::new();
    dict.add(tex);
    let back = read_dict(&engine, &to_bytes(&engine, dict));
    let info = back.find("glass").unwrap().raster.as_ref().unwrap().texture_info(&engine).unwrap();
    assert_eq!(info.compression, Compression::Dxt5);
    assert_eq!((info.width, info.height), (8, 8));
}

#[test]
fn test_d3d9_claim_is_shared() {
    let mut engine = Engine::default();
    let d3d9 = engine.registry().find(D3D9Provider::NAME).unwrap();
    assert_eq!(d3d9.platform_claim().verdict, CompatibilityVerdict::Maybe);
    assert_eq!(d3d9.platform_claim().descriptor, 9);

    let mut w = BlockWriter::new(Cursor::new(Vec::new()), LibraryVersion::default()).unwrap();
    w.write_u32(9).unwrap();
    let mut r = BlockReader::new(Cursor::new(w.into_inner().into_inner())).unwrap();
    assert_eq!(d3d9.is_compatible_texture_block(&mut r).unwrap(), CompatibilityVerdict::Maybe);
    let d3d8 = engine.registry().find(D3D8Provider::NAME).unwrap();
    assert_eq!(d3d8.is_compatible_texture_block(&mut r).unwrap(), CompatibilityVerdict::None);

    // A second Maybe claimant loses to the first registered one.
    let mut dict = TexDictionary::new();
    dict.add(texture(&engine, "t", &gradient(4, 4, false)));
    let bytes = to_bytes(&engine, dict);
    engine
        .register_provider(NativeProvider::Direct3D9(D3D9Provider::named("Direct3D9 Mobile")))
        .unwrap();
    let back = read_dict(&engine, &bytes);
    let raster = back.find("t").unwrap().raster.as_ref().unwrap();
    assert_eq!(raster.native_type_name().as_deref(), Some(D3D9Provider::NAME));
}

#[test]
fn test_luminance_alpha_round_trip_is_stable() {
    let engine = Engine::default();
    let source = gray(8, 8);
    let tex = texture(&engine, "smoke", &source);
    let raster = tex.raster.clone().unwrap();
    raster
        .convert_to_format(&engine, PixelFormat::raw(RasterFormat::LumAlpha, ColorOrder::Bgra, 4))
        .unwrap();
    assert_eq!(raster.texture_info(&engine).unwrap().format_name, "A8L8");

    let mut dict = TexDictionary::new();
    dict.add(tex);
    let first = to_bytes(&engine, dict);
    let back = read_dict(&engine, &first);
    let decoded = back.find("smoke").unwrap().raster.as_ref().unwrap().get_bitmap(&engine).unwrap();
    for (got, want) in decoded.data().iter().zip(source.data()) {
        assert!(got.abs_diff(*want) <= 1, "{got} vs {want}");
    }

    let second = to_bytes(&engine, back);
    assert_eq!(first, second);
}

#[test]
fn test_unknown_platform_texture_is_skipped() {
    let engine = Engine::default();
    let mut dict = TexDictionary::new();
    dict.add(texture(&engine, "first", &gradient(4, 4, false)));
    dict.add(texture(&engine, "second", &gradient(4, 4, true)));
    let mut bytes = to_bytes(&engine, dict);

    // dictionary header, struct header, struct body, texture header, struct header
    let platform_at = 12 + 12 + 4 + 12 + 12;
    assert_eq!(&bytes[platform_at..platform_at + 4], &9u32.to_le_bytes());
    bytes[platform_at..platform_at + 4].copy_from_slice(&0x77u32.to_le_bytes());

    let collector = WarningCollector::new();
    engine.push_warning_manager(Box::new(collector.clone()));
    let back = read_dict(&engine, &bytes);
    engine.pop_warning_manager();

    assert_eq!(back.len(), 1);
    assert!(back.find("first").is_none());
    assert!(back.find("second").is_some());
    assert!(collector.contains("skipped"));
}

#[test]
fn test_truncated_dictionary_fails_to_load() {
    let engine = Engine::default();
    let mut dict = TexDictionary::new();
    dict.add(texture(&engine, "big", &gradient(16, 16, false)));
    let bytes = to_bytes(&engine, dict);

    let err = engine.deserialize(Cursor::new(bytes[..200].to_vec())).unwrap_err();
    assert!(err.is_framing(), "{err}");
}

#[test]
fn test_registry_rejects_conflicts() {
    let mut engine = Engine::default();
    let err = engine.register_provider(NativeProvider::Direct3D9(D3D9Provider::new())).unwrap_err();
    assert!(matches!(err, RwError::Registration(_)));

    let err = engine
        .register_provider(NativeProvider::Direct3D8(D3D8Provider::named("Direct3D8 Clone")))
        .unwrap_err();
    assert!(matches!(err, RwError::Registration(_)));
    assert_eq!(engine.registry().len(), 2);

    let mut provider = D3D9Provider::new();
    let err = provider.register_handler(d3dfmt::A8R8G8B8, Rc::new(A8Handler)).unwrap_err();
    assert!(matches!(err, RwError::Registration(_)));
    provider.register_handler(d3dfmt::A8, Rc::new(A8Handler)).unwrap();
    assert!(matches!(provider.register_handler(d3dfmt::A8, Rc::new(A8Handler)), Err(RwError::Registration(_))));
}

#[test]
fn test_handler_pixels_are_newly_allocated() {
    let provider = D3D9Provider::with_standard_handlers();
    let warnings = WarningCollector::new();
    let bitmap = gradient(4, 4, true);
    let mut native = D3D9Texture::default();
    provider
        .set_pixel_data_with_handler(&warnings, &mut native, bitmap.as_pixel_data(), d3dfmt::A8)
        .unwrap();

    let props = TextureProperties { name: "glow".into(), ..TextureProperties::default() };
    let mut w = BlockWriter::new(Cursor::new(Vec::new()), LibraryVersion::default()).unwrap();
    {
        let mut tex = w.enter(chunk_id::TEXTURE_NATIVE).unwrap();
        {
            let mut st = tex.enter(chunk_id::STRUCT).unwrap();
            provider.serialize(&warnings, &native, &props, &mut *st).unwrap();
            st.leave().unwrap();
        }
        tex.enter(chunk_id::EXTENSION).unwrap().leave().unwrap();
        tex.leave().unwrap();
    }
    let bytes = w.into_inner().into_inner();

    let engine = Engine::default();
    let RwObject::Texture(native) = engine.deserialize(Cursor::new(bytes)).unwrap() else {
        panic!("expected a texture native");
    };
    assert_eq!(native.name(), "glow");
    let raster = native.raster.as_ref().unwrap();
    assert_eq!(raster.texture_info(&engine).unwrap().format_name, "A8");
    assert!(raster.with_pixel_data(&engine, |data| Ok(data.is_newly_allocated)).unwrap());

    let decoded = raster.get_bitmap(&engine).unwrap();
    for (got, want) in decoded.data().chunks_exact(4).zip(bitmap.data().chunks_exact(4)) {
        assert_eq!(got, &[0, 0, 0, want[3]]);
    }

    let direct = texture(&engine, "plain", &gradient(4, 4, false)).raster.unwrap();
    assert!(!direct.with_pixel_data(&engine, |data| Ok(data.is_newly_allocated)).unwrap());
}

#[test]
fn test_old_dictionaries_use_a_wide_count() {
    let old = Engine::new(EngineConfig { version: LibraryVersion::new(3, 4, 0, 3), ..EngineConfig::default() });
    let mut dict = TexDictionary::new();
    dict.add(texture(&old, "legacy", &gradient(4, 4, false)));
    let bytes = to_bytes(&old, dict);

    let mut r = BlockReader::new(Cursor::new(bytes.clone())).unwrap();
    assert!(!r.peek_header().unwrap().version.is_at_least(3, 6, 0, 0));
    assert_eq!(&bytes[16..20], &4u32.to_le_bytes());
    assert_eq!(&bytes[24..28], &1u32.to_le_bytes());

    let back = read_dict(&Engine::default(), &bytes);
    assert_eq!(back.len(), 1);
    assert_eq!(back.recommended_device_id, 0);
    assert!(back.find("legacy").is_some());
}

#[test]
fn test_convert_to_direct3d8() {
    let engine = Engine::default();
    let bitmap = gradient(8, 8, true);
    let mut dict = TexDictionary::new();
    dict.add(texture(&engine, "door", &bitmap));
    for tex in dict.textures.iter_mut() {
        tex.raster.as_ref().unwrap().convert_native_type(&engine, D3D8Provider::NAME).unwrap();
    }

    let back = read_dict(&engine, &to_bytes(&engine, dict));
    assert_eq!(back.recommended_device_id, 1);
    let raster = back.find("door").unwrap().raster.as_ref().unwrap();
    assert_eq!(raster.native_type_name().as_deref(), Some(D3D8Provider::NAME));
    assert_eq!(raster.get_bitmap(&engine).unwrap(), bitmap);
}

#[test]
fn test_config_file_is_loaded() {
    let temp_file = NamedTempFile::new().unwrap();
    std::fs::write(temp_file.path(), br#"{ "version": "3.4.0.3", "max_mipmaps": 2 }"#).unwrap();
    let config = EngineConfig::load(temp_file.path()).unwrap();
    assert_eq!(config.version, LibraryVersion::new(3, 4, 0, 3));
    assert_eq!(config.max_mipmaps, 2);
    assert!(config.fix_incompatible_rasters);

    let engine = Engine::new(config);
    let raster = texture(&engine, "m", &gradient(8, 8, false)).raster.unwrap();
    assert_eq!(raster.generate_mipmaps(&engine).unwrap(), 2);
    assert_eq!(raster.mipmap_count(), 2);
}
