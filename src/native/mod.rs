//! Native texture plugins.
//!
//! Every platform stores texture-native chunks in its own layout.  A
//! [`TexNativeTypeProvider`] understands one layout: it probes a chunk for
//! compatibility, (de)serializes it into its native texture type, and moves
//! pixels between that type and the canonical pixel model.
//!
//! The set of backends is closed ([`NativeProvider`] / [`NativeTexture`]);
//! the engine keeps the active ones in a [`ProviderRegistry`] in
//! registration order, which also decides ties between providers that both
//! claim a chunk with [`CompatibilityVerdict::Maybe`].

pub mod d3d;

use std::fmt;
use std::io::{Read, Seek, Write};

use crate::chunk::chunk_id;
use crate::error::{Result, RwError};
use crate::pixel::convert::DxtSupport;
use crate::pixel::{Compression, PaletteType, PixelDataTraversal, PixelFormat, RawMipmapLayer};
use crate::stream::{BlockReader, BlockWriter};
use crate::texture::TextureProperties;
use crate::warnings::WarningSink;

pub use d3d::d3d8::{D3D8Provider, D3D8Texture};
pub use d3d::d3d9::{D3D9Provider, D3D9Texture, D3DFormatHandler};

// ── Contract types ────────────────────────────────────────────────────────────

/// How sure a provider is that a chunk body is in its layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CompatibilityVerdict {
    None,
    /// The descriptor matches but is shared with other producers.
    Maybe,
    /// The descriptor is owned by this provider.
    Absolute,
}

/// The platform descriptor a provider answers to, and how exclusively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformClaim {
    pub descriptor: u32,
    pub verdict:    CompatibilityVerdict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StorageCapabilities {
    pub dxt:              DxtSupport,
    pub supports_palette: bool,
    pub supports_cube:    bool,
}

/// Result of handing pixels to a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AcquireFeedback {
    /// Every buffer was moved in as-is: no conversion and no copy.
    pub has_directly_acquired: bool,
}

/// Summary of a native texture for listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeTextureInfo {
    pub width:         u32,
    pub height:        u32,
    pub depth:         u32,
    pub mipmap_count:  u32,
    pub format_name:   String,
    pub compression:   Compression,
    pub palette_type:  PaletteType,
    pub has_alpha:     bool,
}

/// One platform's texture-native layout.
pub trait TexNativeTypeProvider {
    type Native: Clone + Default + fmt::Debug;

    /// Registry name, e.g. `"Direct3D9"`.
    fn name(&self) -> &str;

    fn platform_claim(&self) -> PlatformClaim;

    fn construct(&self) -> Self::Native {
        Self::Native::default()
    }

    /// Chunk ids this layout appears inside.
    fn texture_chunk_ids(&self) -> &'static [u32] {
        &[chunk_id::TEXTURE_NATIVE]
    }

    /// Probe the struct body at the cursor without consuming it.
    fn is_compatible_texture_block<R: Read + Seek>(&self, reader: &mut BlockReader<R>) -> Result<CompatibilityVerdict>;

    fn serialize<W: Write + Seek>(
        &self,
        warnings: &dyn WarningSink,
        native:   &Self::Native,
        props:    &TextureProperties,
        writer:   &mut BlockWriter<W>,
    ) -> Result<()>;

    fn deserialize<R: Read + Seek>(
        &self,
        warnings: &dyn WarningSink,
        native:   &mut Self::Native,
        props:    &mut TextureProperties,
        reader:   &mut BlockReader<R>,
    ) -> Result<()>;

    fn get_pixel_data<'a>(&self, native: &'a Self::Native) -> Result<PixelDataTraversal<'a>>;

    fn set_pixel_data(
        &self,
        warnings: &dyn WarningSink,
        native:   &mut Self::Native,
        data:     PixelDataTraversal<'_>,
    ) -> Result<AcquireFeedback>;

    fn unset_pixel_data(&self, native: &mut Self::Native);

    fn get_mipmap_layer<'a>(&self, native: &'a Self::Native, level: usize) -> Result<RawMipmapLayer<'a>>;

    fn add_mipmap_layer(
        &self,
        warnings: &dyn WarningSink,
        native:   &mut Self::Native,
        layer:    RawMipmapLayer<'_>,
    ) -> Result<AcquireFeedback>;

    /// Drop every level below the base.
    fn clear_mipmaps(&self, native: &mut Self::Native);

    fn storage_capabilities(&self) -> StorageCapabilities;

    fn texture_info(&self, native: &Self::Native) -> NativeTextureInfo;

    /// Device id written into dictionaries holding only this layout.
    fn driver_identifier(&self) -> u16;

    /// Canonical format pixels of `format` are stored in by this provider.
    fn storage_format(&self, format: &PixelFormat) -> PixelFormat;
}

// ── Closed dispatch ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum NativeProvider {
    Direct3D8(D3D8Provider),
    Direct3D9(D3D9Provider),
}

#[derive(Debug, Clone)]
pub enum NativeTexture {
    Direct3D8(D3D8Texture),
    Direct3D9(D3D9Texture),
}

impl NativeTexture {
    pub fn type_name(&self) -> &'static str {
        match self {
            NativeTexture::Direct3D8(_) => D3D8Provider::NAME,
            NativeTexture::Direct3D9(_) => D3D9Provider::NAME,
        }
    }

    fn pixels(&self) -> &d3d::D3DPixels {
        match self {
            NativeTexture::Direct3D8(t) => &t.pixels,
            NativeTexture::Direct3D9(t) => &t.pixels,
        }
    }

    pub fn width(&self) -> u32 {
        self.pixels().base_dimensions().0
    }

    pub fn height(&self) -> u32 {
        self.pixels().base_dimensions().1
    }

    pub fn mipmap_count(&self) -> u32 {
        self.pixels().mipmaps.len() as u32
    }
}

fn mismatch(provider: &NativeProvider, native: &NativeTexture) -> RwError {
    RwError::format(format!(
        "{} native texture handed to the {} provider", native.type_name(), provider.name()
    ))
}

/// Forward a call to the backend matching both provider and texture.
macro_rules! dispatch_native {
    ($self:ident, $native:expr, |$p:ident, $t:ident| $body:expr) => {
        match ($self, $native) {
            (NativeProvider::Direct3D8($p), NativeTexture::Direct3D8($t)) => $body,
            (NativeProvider::Direct3D9($p), NativeTexture::Direct3D9($t)) => $body,
            (provider, native) => Err(mismatch(provider, native)),
        }
    };
}

impl NativeProvider {
    pub fn name(&self) -> &str {
        match self {
            NativeProvider::Direct3D8(p) => p.name(),
            NativeProvider::Direct3D9(p) => p.name(),
        }
    }

    pub fn platform_claim(&self) -> PlatformClaim {
        match self {
            NativeProvider::Direct3D8(p) => p.platform_claim(),
            NativeProvider::Direct3D9(p) => p.platform_claim(),
        }
    }

    pub fn texture_chunk_ids(&self) -> &'static [u32] {
        match self {
            NativeProvider::Direct3D8(p) => p.texture_chunk_ids(),
            NativeProvider::Direct3D9(p) => p.texture_chunk_ids(),
        }
    }

    pub fn construct(&self) -> NativeTexture {
        match self {
            NativeProvider::Direct3D8(p) => NativeTexture::Direct3D8(p.construct()),
            NativeProvider::Direct3D9(p) => NativeTexture::Direct3D9(p.construct()),
        }
    }

    pub fn is_compatible_texture_block<R: Read + Seek>(&self, reader: &mut BlockReader<R>) -> Result<CompatibilityVerdict> {
        match self {
            NativeProvider::Direct3D8(p) => p.is_compatible_texture_block(reader),
            NativeProvider::Direct3D9(p) => p.is_compatible_texture_block(reader),
        }
    }

    pub fn storage_capabilities(&self) -> StorageCapabilities {
        match self {
            NativeProvider::Direct3D8(p) => p.storage_capabilities(),
            NativeProvider::Direct3D9(p) => p.storage_capabilities(),
        }
    }

    pub fn driver_identifier(&self) -> u16 {
        match self {
            NativeProvider::Direct3D8(p) => p.driver_identifier(),
            NativeProvider::Direct3D9(p) => p.driver_identifier(),
        }
    }

    pub fn storage_format(&self, format: &PixelFormat) -> PixelFormat {
        match self {
            NativeProvider::Direct3D8(p) => p.storage_format(format),
            NativeProvider::Direct3D9(p) => p.storage_format(format),
        }
    }

    pub fn serialize<W: Write + Seek>(
        &self,
        warnings: &dyn WarningSink,
        native:   &NativeTexture,
        props:    &TextureProperties,
        writer:   &mut BlockWriter<W>,
    ) -> Result<()> {
        dispatch_native!(self, native, |p, t| p.serialize(warnings, t, props, writer))
    }

    pub fn deserialize<R: Read + Seek>(
        &self,
        warnings: &dyn WarningSink,
        native:   &mut NativeTexture,
        props:    &mut TextureProperties,
        reader:   &mut BlockReader<R>,
    ) -> Result<()> {
        dispatch_native!(self, native, |p, t| p.deserialize(warnings, t, props, reader))
    }

    pub fn get_pixel_data<'a>(&self, native: &'a NativeTexture) -> Result<PixelDataTraversal<'a>> {
        dispatch_native!(self, native, |p, t| p.get_pixel_data(t))
    }

    pub fn set_pixel_data(
        &self,
        warnings: &dyn WarningSink,
        native:   &mut NativeTexture,
        data:     PixelDataTraversal<'_>,
    ) -> Result<AcquireFeedback> {
        dispatch_native!(self, native, |p, t| p.set_pixel_data(warnings, t, data))
    }

    pub fn unset_pixel_data(&self, native: &mut NativeTexture) -> Result<()> {
        dispatch_native!(self, native, |p, t| {
            p.unset_pixel_data(t);
            Ok(())
        })
    }

    pub fn get_mipmap_layer<'a>(&self, native: &'a NativeTexture, level: usize) -> Result<RawMipmapLayer<'a>> {
        dispatch_native!(self, native, |p, t| p.get_mipmap_layer(t, level))
    }

    pub fn add_mipmap_layer(
        &self,
        warnings: &dyn WarningSink,
        native:   &mut NativeTexture,
        layer:    RawMipmapLayer<'_>,
    ) -> Result<AcquireFeedback> {
        dispatch_native!(self, native, |p, t| p.add_mipmap_layer(warnings, t, layer))
    }

    pub fn clear_mipmaps(&self, native: &mut NativeTexture) -> Result<()> {
        dispatch_native!(self, native, |p, t| {
            p.clear_mipmaps(t);
            Ok(())
        })
    }

    pub fn texture_info(&self, native: &NativeTexture) -> Result<NativeTextureInfo> {
        dispatch_native!(self, native, |p, t| Ok(p.texture_info(t)))
    }
}

// ── Registry ──────────────────────────────────────────────────────────────────

/// Engine-owned, ordered set of active providers.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    providers: Vec<NativeProvider>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct3D8 and Direct3D9 (with the standard format handlers).
    pub fn with_builtin() -> Self {
        Self {
            providers: vec![
                NativeProvider::Direct3D8(D3D8Provider::new()),
                NativeProvider::Direct3D9(D3D9Provider::with_standard_handlers()),
            ],
        }
    }

    pub fn register(&mut self, provider: NativeProvider) -> Result<()> {
        let name = provider.name();
        if self.find(name).is_some() {
            return Err(RwError::registration(format!("a provider named {name} is already registered")));
        }
        let claim = provider.platform_claim();
        if claim.verdict == CompatibilityVerdict::Absolute {
            let clash = self.providers.iter().find(|p| {
                let other = p.platform_claim();
                other.descriptor == claim.descriptor && other.verdict == CompatibilityVerdict::Absolute
            });
            if let Some(other) = clash {
                return Err(RwError::registration(format!(
                    "{name} and {} both claim platform {:#x} absolutely", other.name(), claim.descriptor
                )));
            }
        }
        log::debug!("registered native texture provider {name} (platform {:#x})", claim.descriptor);
        self.providers.push(provider);
        Ok(())
    }

    pub fn unregister(&mut self, name: &str) -> Option<NativeProvider> {
        let index = self.providers.iter().position(|p| p.name().eq_ignore_ascii_case(name))?;
        Some(self.providers.remove(index))
    }

    pub fn find(&self, name: &str) -> Option<&NativeProvider> {
        self.providers.iter().find(|p| p.name().eq_ignore_ascii_case(name))
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut NativeProvider> {
        self.providers.iter_mut().find(|p| p.name().eq_ignore_ascii_case(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &NativeProvider> {
        self.providers.iter()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Pick the provider for the struct body at the cursor, which sits
    /// inside a chunk with id `container_id`.
    pub fn resolve<R: Read + Seek>(&self, reader: &mut BlockReader<R>, container_id: u32) -> Result<&NativeProvider> {
        let mut absolute = Vec::new();
        let mut maybe = Vec::new();
        for provider in &self.providers {
            match provider.is_compatible_texture_block(reader)? {
                CompatibilityVerdict::Absolute => absolute.push(provider),
                CompatibilityVerdict::Maybe    => maybe.push(provider),
                CompatibilityVerdict::None     => {}
            }
        }

        match absolute.as_slice() {
            [only] => return Ok(*only),
            [first, second, ..] => {
                return Err(RwError::registration(format!(
                    "{} and {} both claim this texture absolutely", first.name(), second.name()
                )));
            }
            [] => {}
        }

        let candidates: Vec<&NativeProvider> = maybe
            .into_iter()
            .filter(|p| p.texture_chunk_ids().contains(&container_id))
            .collect();
        match candidates.as_slice() {
            [] => {
                let descriptor = reader.peek_u32().unwrap_or(0);
                Err(RwError::unsupported(format!(
                    "no native texture provider understands platform {descriptor:#x}"
                )))
            }
            [only] => Ok(*only),
            [first, rest @ ..] => {
                log::debug!(
                    "{} providers may own this texture, using {} (first registered) over {}",
                    rest.len() + 1,
                    first.name(),
                    rest.iter().map(|p| p.name()).collect::<Vec<_>>().join(", ")
                );
                Ok(*first)
            }
        }
    }
}
