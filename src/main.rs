use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use rwtex::chunk::{scan_chunk_tree, ChunkNode};
use rwtex::{
    Bitmap, BlockReader, D3D8Provider, D3D9Provider, Engine, EngineConfig, LibraryVersion, RwObject, TexDictionary,
    TextureBase,
};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "rwtex", about = "RenderWare texture dictionary tool")]
struct Cli {
    /// Raise log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    /// Engine configuration as JSON
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Platform {
    D3d8,
    D3d9,
}

impl Platform {
    fn provider_name(self) -> &'static str {
        match self {
            Platform::D3d8 => D3D8Provider::NAME,
            Platform::D3d9 => D3D9Provider::NAME,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List the textures of a .txd file
    Info {
        input: PathBuf,
    },
    /// Dump the chunk tree with raw header bytes
    Tree {
        input: PathBuf,
        /// Deepest level to descend into
        #[arg(long, default_value = "16")]
        depth: usize,
    },
    /// Write every texture as a PNG
    Extract {
        input: PathBuf,
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,
    },
    /// Build a texture dictionary from PNG files
    Build {
        #[arg(short, long)]
        output: PathBuf,
        #[arg(short, long, value_enum, default_value = "d3d9")]
        platform: Platform,
        /// Library version to stamp, e.g. 3.6.0.3
        #[arg(long)]
        version: Option<LibraryVersion>,
        /// DXT-compress every texture
        #[arg(short, long)]
        compress: bool,
        /// Generate mipmaps
        #[arg(short, long)]
        mipmaps: bool,
        #[arg(required = true, num_args = 1..)]
        input: Vec<PathBuf>,
    },
    /// Re-encode a .txd for another platform or version
    Convert {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(short, long, value_enum)]
        platform: Option<Platform>,
        #[arg(long)]
        version: Option<LibraryVersion>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None       => EngineConfig::default(),
    };

    match cli.command {

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { input } => {
            let engine = Engine::new(config);
            let dict = read_dictionary(&engine, &input)?;
            println!("── Texture Dictionary ───────────────────────────────────");
            println!("  Path           {}", input.display());
            println!("  Textures       {}", dict.len());
            println!("  Device id      {}", dict.recommended_device_id);
            println!("  Extensions     {}", dict.extensions.len());
            println!();
            println!("{:<24} {:<10} {:>9} {:>5} {:<12} {:>5}  Mask",
                     "Name", "Platform", "Size", "Mips", "Format", "Alpha");
            for texture in dict.iter() {
                let Some(raster) = &texture.raster else { continue };
                let info = raster.texture_info(&engine)?;
                println!("{:<24} {:<10} {:>9} {:>5} {:<12} {:>5}  {}",
                    texture.name(),
                    raster.native_type_name().unwrap_or_default(),
                    format!("{}x{}", info.width, info.height),
                    info.mipmap_count,
                    info.format_name,
                    if info.has_alpha { "yes" } else { "no" },
                    texture.mask_name());
            }
        }

        // ── Tree ─────────────────────────────────────────────────────────────
        Commands::Tree { input, depth } => {
            let mut reader = BlockReader::new(BufReader::new(File::open(&input)?))?;
            for node in scan_chunk_tree(&mut reader, depth)? {
                print_node(&node, 0);
            }
        }

        // ── Extract ──────────────────────────────────────────────────────────
        Commands::Extract { input, output_dir } => {
            let engine = Engine::new(config);
            let dict = read_dictionary(&engine, &input)?;
            std::fs::create_dir_all(&output_dir)?;
            for texture in dict.iter() {
                let Some(raster) = &texture.raster else { continue };
                let bitmap = match raster.get_bitmap(&engine) {
                    Ok(b)  => b,
                    Err(e) => {
                        log::warn!("skipping {}: {e}", texture.name());
                        continue;
                    }
                };
                let path = output_dir.join(format!("{}.png", file_safe(texture.name())));
                save_png(&bitmap, &path)?;
                println!("  extracted  {}", path.display());
            }
        }

        // ── Build ────────────────────────────────────────────────────────────
        Commands::Build { output, platform, version, compress, mipmaps, input } => {
            if let Some(v) = version {
                config.version = v;
            }
            let engine = Engine::new(config);
            let mut dict = TexDictionary::new();
            for path in &input {
                let bitmap = load_png(path)?;
                let raster = engine.create_raster(platform.provider_name())?;
                raster.set_image_data(&engine, &bitmap)?;
                if mipmaps {
                    raster.generate_mipmaps(&engine)?;
                }
                if compress {
                    raster.compress(&engine)?;
                }
                let name = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
                println!("  added  {name} ({}x{}, {} mips)", raster.width(), raster.height(), raster.mipmap_count());
                dict.add(TextureBase::with_raster(name, raster));
            }
            write_object(&engine, &RwObject::TexDictionary(dict), &output)?;
            println!("Created: {}", output.display());
        }

        // ── Convert ──────────────────────────────────────────────────────────
        Commands::Convert { input, output, platform, version } => {
            let engine = Engine::new(config.clone());
            let mut dict = read_dictionary(&engine, &input)?;
            if let Some(platform) = platform {
                for texture in dict.textures.iter_mut() {
                    if let Some(raster) = &texture.raster {
                        raster.convert_native_type(&engine, platform.provider_name())?;
                    }
                    texture.fix_filtering();
                }
                dict.recommended_device_id = 0;
            }
            if let Some(v) = version {
                config.version = v;
            }
            let writer_engine = Engine::new(config);
            write_object(&writer_engine, &RwObject::TexDictionary(dict), &output)?;
            println!("Converted → {}", output.display());
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn read_dictionary(engine: &Engine, path: &Path) -> Result<TexDictionary, Box<dyn std::error::Error>> {
    let object = engine.deserialize(BufReader::new(File::open(path)?))?;
    Ok(match object {
        RwObject::TexDictionary(dict) => dict,
        RwObject::Texture(texture)    => {
            let mut dict = TexDictionary::new();
            dict.add(texture);
            dict
        }
    })
}

fn write_object(engine: &Engine, object: &RwObject, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let writer = engine.serialize(object, BufWriter::new(File::create(path)?))?;
    writer.into_inner().map_err(|e| e.into_error())?;
    Ok(())
}

fn print_node(node: &ChunkNode, indent: usize) {
    println!("{:indent$}{} ({:#x})  {} B  v{}  @{}  [{}]",
        "",
        node.name(),
        node.header.id,
        node.header.length,
        node.header.version,
        node.offset,
        hex::encode(node.raw_header),
        indent = indent * 2);
    if let Some(problem) = &node.problem {
        println!("{:indent$}  ! {problem}", "", indent = indent * 2);
    }
    for child in &node.children {
        print_node(child, indent + 1);
    }
}

fn load_png(path: &Path) -> Result<Bitmap, Box<dyn std::error::Error>> {
    let image = image::open(path)?.to_rgba8();
    let (width, height) = image.dimensions();
    Ok(Bitmap::from_rgba(width, height, image.into_raw())?)
}

fn save_png(bitmap: &Bitmap, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let image = image::RgbaImage::from_raw(bitmap.width(), bitmap.height(), bitmap.data().to_vec())
        .ok_or("bitmap buffer does not match its dimensions")?;
    image.save(path)?;
    Ok(())
}

fn file_safe(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect();
    if cleaned.is_empty() { "unnamed".to_string() } else { cleaned }
}
