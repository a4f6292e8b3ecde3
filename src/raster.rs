//! Rasters: a shared handle to one native texture.
//!
//! A [`Raster`] is reference counted; cloning it shares the pixels, as
//! several textures may point at one raster.  Every operation that needs a
//! provider, the configuration or the warning stack takes the [`Engine`].
//! Operations that replace pixels build the new native data first and only
//! swap it in when everything succeeded.

use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;

use crate::engine::Engine;
use crate::error::{Result, RwError};
use crate::native::{AcquireFeedback, NativeProvider, NativeTexture, NativeTextureInfo};
use crate::pixel::convert::{
    calculate_has_alpha, convert_pixel_data_deferred, decide_best_dxt_compression_format, generate_mipmaps,
    mip_to_bitmap,
};
use crate::pixel::{
    Bitmap, ColorOrder, Compression, PaletteType, PixelDataTraversal, PixelFormat, RasterFormat, RawMipmapLayer,
};

#[derive(Debug, Default)]
struct RasterData {
    /// Registry name of the provider that owns `native`.
    native_type: Option<String>,
    native:      Option<NativeTexture>,
}

#[derive(Debug, Clone, Default)]
pub struct Raster(Rc<RefCell<RasterData>>);

impl Raster {
    /// A raster without native data.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_native(type_name: &str, native: NativeTexture) -> Self {
        Raster(Rc::new(RefCell::new(RasterData {
            native_type: Some(type_name.to_string()),
            native:      Some(native),
        })))
    }

    /// Whether both handles share one raster.
    pub fn ptr_eq(&self, other: &Raster) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn native_type_name(&self) -> Option<String> {
        self.0.borrow().native_type.clone()
    }

    pub fn has_native_data(&self) -> bool {
        self.0.borrow().native.is_some()
    }

    /// Replace the native data with an empty texture of provider `type_name`.
    pub fn new_native_data(&self, engine: &Engine, type_name: &str) -> Result<()> {
        let provider = find_provider(engine, type_name)?;
        let mut data = self.data_mut()?;
        data.native = Some(provider.construct());
        data.native_type = Some(provider.name().to_string());
        Ok(())
    }

    /// Drop the native data.  Panics when called from inside
    /// [`Raster::with_native`] on the same raster.
    pub fn clear_native_data(&self) {
        let mut data = self.0.borrow_mut();
        data.native = None;
        data.native_type = None;
    }

    pub fn width(&self) -> u32 {
        self.0.borrow().native.as_ref().map(NativeTexture::width).unwrap_or(0)
    }

    pub fn height(&self) -> u32 {
        self.0.borrow().native.as_ref().map(NativeTexture::height).unwrap_or(0)
    }

    pub fn mipmap_count(&self) -> u32 {
        self.0.borrow().native.as_ref().map(NativeTexture::mipmap_count).unwrap_or(0)
    }

    /// Run `f` against the provider and native texture of this raster.
    ///
    /// The raster stays borrowed while `f` runs: mutating it from inside
    /// `f` fails with a format error.
    pub fn with_native<T>(
        &self,
        engine: &Engine,
        f:      impl FnOnce(&NativeProvider, &NativeTexture) -> Result<T>,
    ) -> Result<T> {
        let data = self.data()?;
        let (provider, native) = resolve(engine, &data)?;
        f(provider, native)
    }

    fn with_native_mut<T>(
        &self,
        engine: &Engine,
        f:      impl FnOnce(&NativeProvider, &mut NativeTexture) -> Result<T>,
    ) -> Result<T> {
        let mut data = self.data_mut()?;
        let type_name = data.native_type.clone().ok_or_else(no_native)?;
        let provider = find_provider(engine, &type_name)?;
        let native = data.native.as_mut().ok_or_else(no_native)?;
        f(provider, native)
    }

    pub fn texture_info(&self, engine: &Engine) -> Result<NativeTextureInfo> {
        self.with_native(engine, |provider, native| provider.texture_info(native))
    }

    // ── Pixel access ──────────────────────────────────────────────────────────

    /// Borrow the canonical pixels for the duration of `f`.  Same borrowing
    /// rule as [`Raster::with_native`].
    pub fn with_pixel_data<T>(
        &self,
        engine: &Engine,
        f:      impl FnOnce(&PixelDataTraversal<'_>) -> Result<T>,
    ) -> Result<T> {
        self.with_native(engine, |provider, native| {
            let data = provider.get_pixel_data(native)?;
            f(&data)
        })
    }

    /// An owned copy of the canonical pixels.
    pub fn get_pixel_data(&self, engine: &Engine) -> Result<PixelDataTraversal<'static>> {
        self.with_pixel_data(engine, |data| Ok(data.clone().into_owned()))
    }

    pub fn set_pixel_data(&self, engine: &Engine, data: PixelDataTraversal<'_>) -> Result<AcquireFeedback> {
        self.with_native_mut(engine, |provider, native| {
            let stored = provider.storage_format(&data.format);
            if stored != data.format && !engine.config().fix_incompatible_rasters {
                return Err(RwError::format(format!(
                    "{} cannot store {} without conversion", provider.name(), data.format
                )));
            }
            provider.set_pixel_data(engine, native, data)
        })
    }

    pub fn get_mipmap_layer(&self, engine: &Engine, level: usize) -> Result<RawMipmapLayer<'static>> {
        self.with_native(engine, |provider, native| {
            Ok(provider.get_mipmap_layer(native, level)?.into_owned())
        })
    }

    pub fn add_mipmap_layer(&self, engine: &Engine, layer: RawMipmapLayer<'_>) -> Result<AcquireFeedback> {
        self.with_native_mut(engine, |provider, native| provider.add_mipmap_layer(engine, native, layer))
    }

    pub fn clear_mipmaps(&self, engine: &Engine) -> Result<()> {
        self.with_native_mut(engine, |provider, native| provider.clear_mipmaps(native))
    }

    /// Decode the base level into an RGBA bitmap.
    pub fn get_bitmap(&self, engine: &Engine) -> Result<Bitmap> {
        self.with_pixel_data(engine, |data| mip_to_bitmap(engine, data, 0))
    }

    /// Replace the pixels with a single-level copy of `bitmap`.
    pub fn set_image_data(&self, engine: &Engine, bitmap: &Bitmap) -> Result<()> {
        self.set_pixel_data(engine, bitmap.as_pixel_data())?;
        Ok(())
    }

    // ── Transformations ───────────────────────────────────────────────────────

    fn transform(
        &self,
        engine: &Engine,
        f:      impl FnOnce(&PixelDataTraversal<'_>) -> Result<Option<PixelDataTraversal<'static>>>,
    ) -> Result<()> {
        let replacement = self.with_pixel_data(engine, f)?;
        if let Some(data) = replacement {
            self.set_pixel_data(engine, data)?;
        }
        Ok(())
    }

    pub fn convert_to_format(&self, engine: &Engine, format: PixelFormat) -> Result<()> {
        self.transform(engine, |data| {
            if data.format == format {
                return Ok(None);
            }
            Ok(Some(convert_pixel_data_deferred(engine, data, &format)?.into_owned()))
        })
    }

    pub fn convert_to_palette(&self, engine: &Engine, palette_type: PaletteType) -> Result<()> {
        if !palette_type.is_palettized() {
            return Err(RwError::format("palette conversion needs PAL4 or PAL8"));
        }
        let caps = self.with_native(engine, |provider, _| Ok(provider.storage_capabilities()))?;
        if !caps.supports_palette {
            return Err(RwError::unsupported("the native texture cannot store palettes"));
        }
        let format = PixelFormat::raw(RasterFormat::R8G8B8A8, ColorOrder::Rgba, 4)
            .with_palette(palette_type, palette_type.min_index_depth());
        self.convert_to_format(engine, format)
    }

    /// Compress with the variant the configured quality and the image's
    /// alpha call for.
    pub fn compress(&self, engine: &Engine) -> Result<()> {
        let caps = self.with_native(engine, |provider, _| Ok(provider.storage_capabilities()))?;
        if !caps.dxt.any() {
            return Err(RwError::unsupported("the native texture cannot store DXT data"));
        }
        let has_alpha = self.with_pixel_data(engine, calculate_has_alpha)?;
        let quality = engine.config().compression_quality;
        let compression = decide_best_dxt_compression_format(has_alpha, &caps.dxt, quality)
            .ok_or_else(|| RwError::unsupported("no DXT variant is available"))?;
        self.compress_custom(engine, compression)
    }

    pub fn compress_custom(&self, engine: &Engine, compression: Compression) -> Result<()> {
        if !compression.is_compressed() {
            return Err(RwError::format("compress_custom needs a DXT variant"));
        }
        let caps = self.with_native(engine, |provider, _| Ok(provider.storage_capabilities()))?;
        if !caps.dxt.supports(compression) {
            return Err(RwError::unsupported(format!("the native texture cannot store {}", compression.name())));
        }
        self.transform(engine, |data| {
            if data.format.compression == compression {
                return Ok(None);
            }
            let raster_format = match compression {
                Compression::Dxt1 if data.has_alpha => RasterFormat::R5G5B5A1,
                Compression::Dxt1                   => RasterFormat::R5G6B5,
                _                                   => RasterFormat::R4G4B4A4,
            };
            let format = PixelFormat::raw(raster_format, ColorOrder::Bgra, 4).with_compression(compression);
            Ok(Some(convert_pixel_data_deferred(engine, data, &format)?.into_owned()))
        })
    }

    /// Rebuild the mip chain from the base level, up to the configured
    /// maximum.  Returns the new level count.
    pub fn generate_mipmaps(&self, engine: &Engine) -> Result<u32> {
        let max = engine.config().max_mipmaps;
        let mut data = self.get_pixel_data(engine)?;
        let levels = generate_mipmaps(&mut data, max)?;
        self.set_pixel_data(engine, data)?;
        Ok(levels)
    }

    /// Move the pixels to a texture of another provider.
    pub fn convert_native_type(&self, engine: &Engine, type_name: &str) -> Result<()> {
        let target = find_provider(engine, type_name)?;
        if self.native_type_name().is_some_and(|name| name.eq_ignore_ascii_case(target.name())) {
            return Ok(());
        }
        let mut native = target.construct();
        self.with_pixel_data(engine, |data| {
            target.set_pixel_data(engine, &mut native, data.borrowed())?;
            Ok(())
        })?;

        let mut slot = self.data_mut()?;
        let source = slot.native_type.replace(target.name().to_string());
        if let (Some(mut old), Some(source)) = (slot.native.replace(native), source) {
            if let Some(provider) = engine.registry().find(&source) {
                provider.unset_pixel_data(&mut old)?;
            }
        }
        Ok(())
    }
}

impl Raster {
    fn data(&self) -> Result<Ref<'_, RasterData>> {
        self.0.try_borrow().map_err(|_| in_use())
    }

    fn data_mut(&self) -> Result<RefMut<'_, RasterData>> {
        self.0.try_borrow_mut().map_err(|_| in_use())
    }
}

fn in_use() -> RwError {
    RwError::format("raster is already borrowed by an enclosing call")
}

fn no_native() -> RwError {
    RwError::format("raster has no native data")
}

fn find_provider<'e>(engine: &'e Engine, type_name: &str) -> Result<&'e NativeProvider> {
    engine.registry().find(type_name).ok_or_else(|| {
        RwError::unsupported(format!("no native texture provider named {type_name}"))
    })
}

fn resolve<'e, 'd>(engine: &'e Engine, data: &'d RasterData) -> Result<(&'e NativeProvider, &'d NativeTexture)> {
    let type_name = data.native_type.as_deref().ok_or_else(no_native)?;
    let native = data.native.as_ref().ok_or_else(no_native)?;
    Ok((find_provider(engine, type_name)?, native))
}
