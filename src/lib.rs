pub mod chunk;
pub mod config;
pub mod engine;
pub mod error;
pub mod native;
pub mod pixel;
pub mod raster;
pub mod stream;
pub mod swizzle;
pub mod texture;
pub mod version;
pub mod warnings;

pub use chunk::{chunk_id, scan_chunk_tree, ChunkHeader, ChunkNode, RawChunk};
pub use config::EngineConfig;
pub use engine::{Engine, RwObject};
pub use error::{Result, RwError};
pub use native::{
    AcquireFeedback, CompatibilityVerdict, D3D8Provider, D3D9Provider, D3DFormatHandler, NativeProvider,
    NativeTexture, ProviderRegistry, TexNativeTypeProvider,
};
pub use pixel::{
    Bitmap, ColorOrder, Compression, MipmapLayer, PaletteType, PixelDataTraversal, PixelFormat, RasterFormat,
    RawMipmapLayer,
};
pub use raster::Raster;
pub use stream::{BlockError, BlockReader, BlockWriter};
pub use texture::{SamplerState, TexDictionary, TextureBase, TextureProperties};
pub use version::LibraryVersion;
pub use warnings::{WarningCollector, WarningManager, WarningSink};
