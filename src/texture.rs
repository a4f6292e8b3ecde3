//! Textures and texture dictionaries, and their chunk layouts.
//!
//! ```text
//! TEX_DICTIONARY
//! ├── STRUCT          u16 count + u16 device id (3.6+), u32 count before
//! ├── TEXTURE_NATIVE  × count
//! │   ├── STRUCT      provider-specific body
//! │   └── EXTENSION   plugin chunks, kept verbatim
//! └── EXTENSION
//! ```
//!
//! A texture that fails to load with a format or unsupported error is
//! skipped with a warning; its siblings still load.  Framing errors end the
//! whole dictionary.

use std::io::{Read, Seek, Write};

use crate::chunk::{chunk_id, RawChunk, CHUNK_HEADER_SIZE};
use crate::engine::Engine;
use crate::error::{Result, RwError};
use crate::raster::Raster;
use crate::stream::{BlockReader, BlockWriter};
use crate::warnings::WarningSink;

// ── Sampler state ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FilterMode {
    None = 0,
    Nearest,
    #[default]
    Linear,
    MipNearest,
    MipLinear,
    LinearMipNearest,
    LinearMipLinear,
}

impl FilterMode {
    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => FilterMode::None,
            1 => FilterMode::Nearest,
            2 => FilterMode::Linear,
            3 => FilterMode::MipNearest,
            4 => FilterMode::MipLinear,
            5 => FilterMode::LinearMipNearest,
            6 => FilterMode::LinearMipLinear,
            _ => return None,
        })
    }

    pub fn uses_mipmaps(self) -> bool {
        matches!(
            self,
            FilterMode::MipNearest | FilterMode::MipLinear | FilterMode::LinearMipNearest | FilterMode::LinearMipLinear
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AddressMode {
    None = 0,
    #[default]
    Wrap,
    Mirror,
    Clamp,
    Border,
}

impl AddressMode {
    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => AddressMode::None,
            1 => AddressMode::Wrap,
            2 => AddressMode::Mirror,
            3 => AddressMode::Clamp,
            4 => AddressMode::Border,
            _ => return None,
        })
    }
}

/// Filter mode in bits 0–7, U addressing in 8–11, V addressing in 12–15.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SamplerState {
    pub filter:       FilterMode,
    pub u_addressing: AddressMode,
    pub v_addressing: AddressMode,
}

impl SamplerState {
    pub fn pack(&self) -> u32 {
        (self.filter as u32) | ((self.u_addressing as u32) << 8) | ((self.v_addressing as u32) << 12)
    }

    /// Unknown values fall back to the defaults; the flag reports whether
    /// every field was recognised.
    pub fn unpack(raw: u32) -> (Self, bool) {
        let defaults = SamplerState::default();
        let filter = FilterMode::from_raw(raw & 0xFF);
        let u = AddressMode::from_raw((raw >> 8) & 0xF);
        let v = AddressMode::from_raw((raw >> 12) & 0xF);
        let exact = filter.is_some() && u.is_some() && v.is_some() && raw >> 16 == 0;
        let state = SamplerState {
            filter:       filter.unwrap_or(defaults.filter),
            u_addressing: u.unwrap_or(defaults.u_addressing),
            v_addressing: v.unwrap_or(defaults.v_addressing),
        };
        (state, exact)
    }
}

/// Per-texture fields every native layout stores in its header.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TextureProperties {
    pub name:      String,
    pub mask_name: String,
    pub sampler:   SamplerState,
}

// ── Extensions ────────────────────────────────────────────────────────────────

/// Read an EXTENSION chunk at the cursor, if there is one.
pub fn read_extensions<R: Read + Seek>(reader: &mut BlockReader<R>) -> Result<Vec<RawChunk>> {
    if reader.remaining() < CHUNK_HEADER_SIZE || reader.peek_header()?.id != chunk_id::EXTENSION {
        return Ok(Vec::new());
    }
    let mut ext = reader.enter()?;
    let mut chunks = Vec::new();
    while ext.remaining() >= CHUNK_HEADER_SIZE {
        let mut child = ext.enter()?;
        let length = child.length() as usize;
        chunks.push(RawChunk { id: child.id(), version: child.chunk_version(), body: child.read_vec(length)? });
        child.leave()?;
    }
    ext.leave()?;
    Ok(chunks)
}

/// Write an EXTENSION chunk holding `chunks`, each under its own version.
pub fn write_extensions<W: Write + Seek>(writer: &mut BlockWriter<W>, chunks: &[RawChunk]) -> Result<()> {
    let mut ext = writer.enter(chunk_id::EXTENSION)?;
    let version = ext.version();
    for chunk in chunks {
        ext.set_version(chunk.version);
        let mut child = ext.enter(chunk.id)?;
        child.write_all(&chunk.body)?;
        child.leave()?;
    }
    ext.set_version(version);
    ext.leave()?;
    Ok(())
}

// ── Texture ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct TextureBase {
    pub props:      TextureProperties,
    pub raster:     Option<Raster>,
    pub extensions: Vec<RawChunk>,
}

impl TextureBase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            props: TextureProperties { name: name.into(), ..TextureProperties::default() },
            ..Self::default()
        }
    }

    pub fn with_raster(name: impl Into<String>, raster: Raster) -> Self {
        let mut texture = Self::new(name);
        texture.raster = Some(raster);
        texture.fix_filtering();
        texture
    }

    pub fn name(&self) -> &str {
        &self.props.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.props.name = name.into();
    }

    pub fn mask_name(&self) -> &str {
        &self.props.mask_name
    }

    /// Use a mip filter exactly when the raster has more than one level.
    pub fn fix_filtering(&mut self) {
        let levels = self.raster.as_ref().map(Raster::mipmap_count).unwrap_or(0);
        let filter = &mut self.props.sampler.filter;
        *filter = match (*filter, levels > 1) {
            (FilterMode::Nearest, true)          => FilterMode::MipNearest,
            (FilterMode::Linear, true)           => FilterMode::LinearMipLinear,
            (FilterMode::MipNearest, false)      |
            (FilterMode::MipLinear, false)       => FilterMode::Nearest,
            (FilterMode::LinearMipNearest, false) |
            (FilterMode::LinearMipLinear, false) => FilterMode::Linear,
            (unchanged, _)                       => unchanged,
        };
    }

    /// Parse a TEXTURE_NATIVE chunk at the cursor.
    pub fn read_native<R: Read + Seek>(engine: &Engine, reader: &mut BlockReader<R>) -> Result<Self> {
        let mut tex_ctx = reader.enter()?;
        tex_ctx.expect_id(chunk_id::TEXTURE_NATIVE)?;
        let container = tex_ctx.id();

        let mut texture = TextureBase::default();
        {
            let mut st = tex_ctx.enter()?;
            st.expect_id(chunk_id::STRUCT)?;
            let provider = engine.registry().resolve(&mut *st, container)?;
            log::debug!("texture native at {} handled by {}", st.begin_absolute(), provider.name());

            let mut native = provider.construct();
            provider.deserialize(engine, &mut native, &mut texture.props, &mut *st)?;
            if st.remaining() > 0 {
                engine.notice(format!(
                    "texture \"{}\": {} unread bytes in native struct", texture.props.name, st.remaining()
                ));
            }
            st.leave()?;
            texture.raster = Some(Raster::from_native(provider.name(), native));
        }
        texture.extensions = read_extensions(&mut *tex_ctx)?;
        tex_ctx.leave()?;
        Ok(texture)
    }

    pub fn write_native<W: Write + Seek>(&self, engine: &Engine, writer: &mut BlockWriter<W>) -> Result<()> {
        let raster = self.raster.as_ref()
            .ok_or_else(|| RwError::format(format!("texture \"{}\" has no raster", self.props.name)))?;
        let mut tex_ctx = writer.enter(chunk_id::TEXTURE_NATIVE)?;
        {
            let mut st = tex_ctx.enter(chunk_id::STRUCT)?;
            raster.with_native(engine, |provider, native| {
                provider.serialize(engine, native, &self.props, &mut *st)
            })?;
            st.leave()?;
        }
        write_extensions(&mut *tex_ctx, &self.extensions)?;
        tex_ctx.leave()?;
        Ok(())
    }
}

// ── Dictionary ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct TexDictionary {
    pub textures:              Vec<TextureBase>,
    /// Device id to write; 0 derives it from the textures.
    pub recommended_device_id: u16,
    pub extensions:            Vec<RawChunk>,
}

impl TexDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Case-insensitive lookup, as RenderWare resolves texture names.
    pub fn find(&self, name: &str) -> Option<&TextureBase> {
        self.textures.iter().find(|t| t.name().eq_ignore_ascii_case(name))
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut TextureBase> {
        self.textures.iter_mut().find(|t| t.name().eq_ignore_ascii_case(name))
    }

    pub fn add(&mut self, texture: TextureBase) {
        self.textures.push(texture);
    }

    pub fn remove(&mut self, name: &str) -> Option<TextureBase> {
        let index = self.textures.iter().position(|t| t.name().eq_ignore_ascii_case(name))?;
        Some(self.textures.remove(index))
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TextureBase> {
        self.textures.iter()
    }

    /// The recommended id, or the driver id every texture agrees on.
    pub fn device_id(&self, engine: &Engine) -> u16 {
        if self.recommended_device_id != 0 {
            return self.recommended_device_id;
        }
        let mut ids = self.textures.iter().filter_map(|t| {
            let raster = t.raster.as_ref()?;
            raster.with_native(engine, |provider, _| Ok(provider.driver_identifier())).ok()
        });
        match ids.next() {
            Some(first) if ids.all(|id| id == first) => first,
            _ => 0,
        }
    }

    pub fn read<R: Read + Seek>(engine: &Engine, reader: &mut BlockReader<R>) -> Result<Self> {
        let mut dict_ctx = reader.enter()?;
        dict_ctx.expect_id(chunk_id::TEX_DICTIONARY)?;

        let (count, device_id) = {
            let mut st = dict_ctx.enter()?;
            st.expect_id(chunk_id::STRUCT)?;
            let header = if st.chunk_version().is_at_least(3, 6, 0, 0) {
                (st.read_u16()? as u32, st.read_u16()?)
            } else {
                (st.read_u32()?, 0)
            };
            st.leave()?;
            header
        };
        log::debug!("texture dictionary: {count} textures, device id {device_id}");

        let mut dict = TexDictionary { recommended_device_id: device_id, ..TexDictionary::default() };
        for index in 0..count {
            match TextureBase::read_native(engine, &mut *dict_ctx) {
                Ok(texture) => dict.textures.push(texture),
                Err(e) if e.is_framing() => return Err(e),
                Err(e) => engine.warn(format!("texture {index} of {count} skipped: {e}")),
            }
        }
        dict.extensions = read_extensions(&mut *dict_ctx)?;
        dict_ctx.leave()?;
        Ok(dict)
    }

    pub fn write<W: Write + Seek>(&self, engine: &Engine, writer: &mut BlockWriter<W>) -> Result<()> {
        let mut dict_ctx = writer.enter(chunk_id::TEX_DICTIONARY)?;
        {
            let mut st = dict_ctx.enter(chunk_id::STRUCT)?;
            if st.version().is_at_least(3, 6, 0, 0) {
                st.write_u16(texture_count(self.textures.len())?)?;
                st.write_u16(self.device_id(engine))?;
            } else {
                st.write_u32(texture_count(self.textures.len())?)?;
            }
            st.leave()?;
        }
        for texture in &self.textures {
            texture.write_native(engine, &mut *dict_ctx)?;
        }
        write_extensions(&mut *dict_ctx, &self.extensions)?;
        dict_ctx.leave()?;
        Ok(())
    }
}

fn texture_count<T: TryFrom<usize>>(len: usize) -> Result<T> {
    T::try_from(len).map_err(|_| RwError::format(format!("{len} textures do not fit the dictionary count field")))
}
