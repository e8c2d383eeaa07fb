//! Pixel Stack Mesher CLI
//!
//! Build layered multi-material meshes from palette-reduced images.

use clap::{Parser, Subcommand};
use pixel_stack_mesher::{
    crop::opaque_bounds, export_obj, load_image, types::color::to_hex, BuildOutcome,
    BuildParams, Checkpoint, Detail, Progress, SchedulerConfig, StackMesher,
};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "pixel-stack-mesher")]
#[command(author, version, about = "Build layered 3D-printable meshes from palette-reduced images", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mesh an image and write one OBJ object per layer
    Build {
        /// Input image (PNG)
        #[arg(short, long)]
        image: PathBuf,

        /// Build parameters as JSON
        #[arg(short, long)]
        params: PathBuf,

        /// Output file path (without extension)
        #[arg(short, long)]
        output: PathBuf,

        /// Build the coarse preview instead of the full-resolution model
        #[arg(long)]
        preview: bool,

        /// Crops larger than this many pixels are coarsened
        #[arg(long, default_value_t = SchedulerConfig::default().full_pixel_limit)]
        max_pixels: u64,
    },

    /// Show the opaque bounds and colors of an image
    Inspect {
        /// Input image (PNG)
        #[arg(short, long)]
        image: PathBuf,
    },
}

fn init_tracing(verbose: u8) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        EnvFilter::new(level)
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .with(filter)
        .init();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Build {
            image,
            params,
            output,
            preview,
            max_pixels,
        } => {
            let detail = if preview {
                Detail::Preview {
                    pixel_target: SchedulerConfig::default().preview_pixels,
                }
            } else {
                Detail::Full {
                    pixel_limit: max_pixels,
                }
            };
            build(&image, &params, &output, detail)?;
        }
        Commands::Inspect { image } => {
            inspect(&image)?;
        }
    }

    Ok(())
}

fn build(
    image_path: &Path,
    params_path: &Path,
    output_path: &Path,
    detail: Detail,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("Loading image from {:?}...", image_path);
    let image = load_image(image_path)?;
    println!("  {}x{} pixels", image.width(), image.height());

    println!("Loading parameters from {:?}...", params_path);
    let params = BuildParams::from_json(&fs::read_to_string(params_path)?)?;
    println!("  {} layers, mode {:?}", params.layers.len(), params.mode);

    let mesher = StackMesher::new(params)?;
    let model = match mesher.build(
        &image,
        detail,
        &mut Checkpoint::unbounded(),
        &mut Progress::silent(),
    )? {
        BuildOutcome::Completed(model) => model,
        BuildOutcome::Cancelled => return Err("build was cancelled".into()),
    };

    println!(
        "  Generated {} layer meshes: {} vertices, {} triangles (step {})",
        model.layers.len(),
        model.total_vertices(),
        model.total_triangles(),
        model.step
    );
    for layer in &model.layers {
        println!(
            "  - layer {} {} z {:.3}..{:.3} mm: {} triangles",
            layer.layer_index,
            to_hex(layer.color),
            layer.z_min,
            layer.z_max,
            layer.mesh.triangle_count()
        );
    }

    let name = output_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("model")
        .to_string();
    let export = export_obj(&model, &name)?;
    let obj_path = output_path.with_extension("obj");
    let mtl_path = output_path.with_extension("mtl");
    fs::write(&obj_path, &export.obj)?;
    fs::write(&mtl_path, &export.mtl)?;

    println!("Exported OBJ to {:?}", obj_path);
    println!("  Material: {:?}", mtl_path);

    Ok(())
}

fn inspect(image_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Loading image from {:?}...", image_path);
    let image = load_image(image_path)?;
    let bounds = opaque_bounds(&image);

    let mut colors: BTreeMap<[u8; 3], usize> = BTreeMap::new();
    for pixel in image.pixels().filter(|p| p.0[3] > 0) {
        *colors.entry([pixel.0[0], pixel.0[1], pixel.0[2]]).or_insert(0) += 1;
    }

    println!("\nImage Info:");
    println!("  Size: {}x{}", image.width(), image.height());
    println!(
        "  Opaque bounds: {}x{} at ({}, {})",
        bounds.width, bounds.height, bounds.min_x, bounds.min_y
    );
    println!("  Colors: {}", colors.len());

    let mut by_count: Vec<_> = colors.into_iter().collect();
    by_count.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    for (color, count) in by_count {
        println!("    {} {}", to_hex(color), count);
    }

    Ok(())
}
