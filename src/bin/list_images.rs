//! Print the image inventory of a PDF, grouped by page: object id,
//! dimensions, declared color model and filter, and stream size.

use anyhow::{Context, Result};
use clap::Parser;
use lopdf::{Document, Object};
use reduce_pdf::{page_images, ImageRecord};
use std::path::PathBuf;

/// List images embedded in a PDF.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// PDF file to inspect
    input: PathBuf,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let doc = Document::load(&args.input)
        .with_context(|| format!("failed to load {}", args.input.display()))?;

    for (page_no, images) in page_images(&doc) {
        if images.is_empty() {
            continue;
        }
        println!("page {}", page_no);
        for id in images {
            let stream = match doc.get_object(id) {
                Ok(Object::Stream(stream)) => stream,
                _ => continue,
            };
            match ImageRecord::from_stream(&doc, stream) {
                Some(record) => println!(
                    "  {} {} R: {}x{} {:?} {:?} {} bytes",
                    id.0,
                    id.1,
                    record.width,
                    record.height,
                    record.color_model,
                    record.filter,
                    record.data.len()
                ),
                None => println!(
                    "  {} {} R: not handled (unsupported color space), {} bytes",
                    id.0,
                    id.1,
                    stream.content.len()
                ),
            }
        }
    }

    Ok(())
}
