//! The engine: configuration, native texture providers and the warning
//! stack, plus top-level (de)serialization of RenderWare objects.
//!
//! ```no_run
//! use std::fs::File;
//! use rwtex::{Engine, EngineConfig, RwObject};
//!
//! let engine = Engine::new(EngineConfig::default());
//! let object = engine.deserialize(File::open("vehicle.txd")?)?;
//! if let RwObject::TexDictionary(dict) = object {
//!     for texture in dict.iter() {
//!         println!("{}", texture.name());
//!     }
//! }
//! # Ok::<(), rwtex::RwError>(())
//! ```

use std::cell::RefCell;
use std::io::{Read, Seek, Write};

use crate::chunk::chunk_id;
use crate::config::EngineConfig;
use crate::error::{Result, RwError};
use crate::native::{NativeProvider, ProviderRegistry};
use crate::raster::Raster;
use crate::stream::{BlockReader, BlockWriter};
use crate::texture::{TexDictionary, TextureBase};
use crate::warnings::{WarningManager, WarningSink};

/// A top-level object read from or written to a stream.
#[derive(Debug, Clone)]
pub enum RwObject {
    TexDictionary(TexDictionary),
    Texture(TextureBase),
}

impl RwObject {
    pub fn type_name(&self) -> &'static str {
        match self {
            RwObject::TexDictionary(_) => "Texture Dictionary",
            RwObject::Texture(_)       => "Texture Native",
        }
    }
}

pub struct Engine {
    config:           EngineConfig,
    registry:         ProviderRegistry,
    warning_managers: RefCell<Vec<Box<dyn WarningManager>>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("warning_managers", &self.warning_managers.borrow().len())
            .finish()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Engine {
    /// Engine with the built-in Direct3D 8 and 9 providers.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_registry(config, ProviderRegistry::with_builtin())
    }

    pub fn with_registry(config: EngineConfig, registry: ProviderRegistry) -> Self {
        Self { config, registry, warning_managers: RefCell::new(Vec::new()) }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut EngineConfig {
        &mut self.config
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ProviderRegistry {
        &mut self.registry
    }

    pub fn register_provider(&mut self, provider: NativeProvider) -> Result<()> {
        self.registry.register(provider)
    }

    pub fn unregister_provider(&mut self, name: &str) -> Option<NativeProvider> {
        self.registry.unregister(name)
    }

    /// Route warnings to `manager` until it is popped.
    pub fn push_warning_manager(&self, manager: Box<dyn WarningManager>) {
        self.warning_managers.borrow_mut().push(manager);
    }

    pub fn pop_warning_manager(&self) -> Option<Box<dyn WarningManager>> {
        self.warning_managers.borrow_mut().pop()
    }

    /// A raster holding an empty texture of provider `type_name`.
    pub fn create_raster(&self, type_name: &str) -> Result<Raster> {
        let raster = Raster::new();
        raster.new_native_data(self, type_name)?;
        Ok(raster)
    }

    fn emit(&self, message: String, notice: bool) {
        let mut managers = self.warning_managers.borrow_mut();
        match managers.last_mut() {
            Some(manager) => manager.on_warning(&message),
            None if notice => log::info!("{message}"),
            None => log::warn!("{message}"),
        }
    }

    // ── Serialization ─────────────────────────────────────────────────────────

    /// Read the object at the start of `stream`.
    pub fn deserialize<R: Read + Seek>(&self, stream: R) -> Result<RwObject> {
        let mut reader = BlockReader::new(stream)?;
        reader.set_ignore_block_regions(self.config.ignore_block_regions);
        let header = reader.peek_header()?;
        log::debug!("deserializing top-level chunk {:#x} ({} bytes)", header.id, header.length);
        match header.id {
            chunk_id::TEX_DICTIONARY => Ok(RwObject::TexDictionary(TexDictionary::read(self, &mut reader)?)),
            chunk_id::TEXTURE_NATIVE => Ok(RwObject::Texture(TextureBase::read_native(self, &mut reader)?)),
            other => Err(RwError::unsupported(format!(
                "top-level chunk {other:#x} ({}) is not a texture object", crate::chunk::chunk_name(other)
            ))),
        }
    }

    /// Write `object` to `stream`, stamping chunks with the configured version.
    pub fn serialize<W: Write + Seek>(&self, object: &RwObject, stream: W) -> Result<W> {
        let mut writer = BlockWriter::new(stream, self.config.version)?;
        match object {
            RwObject::TexDictionary(dict) => dict.write(self, &mut writer)?,
            RwObject::Texture(texture)    => texture.write_native(self, &mut writer)?,
        }
        writer.flush()?;
        Ok(writer.into_inner())
    }
}

impl WarningSink for Engine {
    fn warn(&self, message: String) {
        if self.config.warning_level >= 1 {
            self.emit(message, false);
        }
    }

    fn notice(&self, message: String) {
        if self.config.warning_level >= 2 && !self.config.ignore_secure_warnings {
            self.emit(message, true);
        }
    }
}
