//! Command-line interface for reducing images embedded in PDF files.

use anyhow::{Context, Result};
use clap::Parser;
use reduce_pdf::{reduce_pdf_file, ReduceOptions};
use std::path::PathBuf;

/// Reduce the size of images in PDF files.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Parallel job count; 0 uses all hardware threads
    #[arg(short, long, default_value_t = 0)]
    jobs: usize,

    /// Use JPEG to encode color images
    #[arg(short = 'J', long)]
    use_jpg: bool,

    /// JPEG quality
    #[arg(short, long, default_value_t = 95)]
    quality: u8,

    /// Thumbnail size for checking image type
    #[arg(short, long, default_value_t = 128, value_name = "SIZE")]
    thumb_size: u32,

    /// Grey image threshold, unit is intensity (0-255)
    #[arg(short, long, default_value_t = 1.0, value_name = "X")]
    grey_cutoff: f32,

    /// Black&white pixel ratio threshold, range 0-1
    #[arg(short, long, default_value_t = 0.92, value_name = "X")]
    bw_ratio: f32,

    /// Rate of supersampling before converting to black&white
    #[arg(short = 's', long, default_value_t = 1.5, value_name = "X")]
    bw_supersample: f32,

    /// Set pixels with intensity [0, x] to 0
    #[arg(short = 'i', long, default_value_t = 10.0)]
    low: f32,

    /// Set pixels with intensity [255-x, 255] to 255
    #[arg(short = 'I', long, default_value_t = 35.0)]
    high: f32,

    /// Never accept a replacement larger than the original, even when the
    /// image was downgraded to a simpler pixel mode
    #[arg(long)]
    strict_shrink: bool,

    /// Leave uncompressed non-image streams as they are
    #[arg(long)]
    no_compress_streams: bool,

    /// Verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Input PDF file
    input: PathBuf,

    /// Output PDF file
    output: PathBuf,
}

fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(match args.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .init();

    let options = ReduceOptions {
        jobs: args.jobs,
        use_jpg: args.use_jpg,
        quality: args.quality,
        thumb_size: args.thumb_size,
        grey_cutoff: args.grey_cutoff,
        bw_ratio: args.bw_ratio,
        bw_supersample: args.bw_supersample,
        low: args.low,
        high: args.high,
        strict_shrink: args.strict_shrink,
        compress_streams: !args.no_compress_streams,
        progress: true,
    };

    let result = reduce_pdf_file(&args.input, &args.output, &options)
        .with_context(|| format!("failed to reduce {}", args.input.display()))?;

    println!(
        "Done! {} images: {} replaced, {} unchanged, {} skipped",
        result.total_images, result.replaced_images, result.unchanged_images, result.skipped_images
    );
    println!("Output saved to: {}", args.output.display());

    Ok(())
}
