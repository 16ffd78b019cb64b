//! PDF image reducer library.
//!
//! Re-encodes the raster images embedded in a PDF so each one uses the most
//! compact representation its content class supports: color photos stay
//! color (Flate or JPEG), visually gray images drop their color channels,
//! and text scans collapse to Group-4 bilevel masks. A replacement is only
//! accepted when it does not grow the stream, unless the pixel mode itself
//! was downgraded.
//!
//! Per image the pipeline is decode, classify, clip, encode, select; pages
//! are processed concurrently and the rewritten document is serialized once
//! at the end.

mod classify;
mod decode;
mod encode;
mod raster;

pub use crate::classify::classify;
pub use crate::decode::{decode_image, ColorModel, FilterKind, ImageRecord};
pub use crate::encode::{select_replacement, ImageOutcome};
pub use crate::raster::{clip_levels, PixelBuffer, PixelMode};

use indicatif::ProgressBar;
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use rayon::prelude::*;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

/// Tuning knobs for one reduction run.
///
/// The classification values are heuristics; the defaults favor aggressive
/// downgrading of scanned documents while leaving photographic content
/// alone.
#[derive(Debug, Clone)]
pub struct ReduceOptions {
    /// Worker threads for page processing; 0 uses the available hardware
    /// concurrency.
    pub jobs: usize,
    /// Allow lossy JPEG candidates for color images that are not already
    /// JPEG-compressed.
    pub use_jpg: bool,
    /// JPEG quality (1-100).
    pub quality: u8,
    /// Long edge of the classification proxy image.
    pub thumb_size: u32,
    /// Maximum channel deviation (intensity units, 0-255) for an image to
    /// count as achromatic.
    pub grey_cutoff: f32,
    /// Fraction of near-black/near-white pixels required to go bilevel.
    pub bw_ratio: f32,
    /// Upscale factor applied to the proxy before the bilevel count (>= 1).
    pub bw_supersample: f32,
    /// Intensities at or below this are crushed to 0.
    pub low: f32,
    /// Intensities at or above `255 - high` are crushed to 255.
    pub high: f32,
    /// Never accept a replacement larger than the original, even when the
    /// pixel mode was downgraded.
    pub strict_shrink: bool,
    /// Flate-compress remaining uncompressed non-image streams before
    /// saving.
    pub compress_streams: bool,
    /// Draw a per-page progress bar on stderr.
    pub progress: bool,
}

impl Default for ReduceOptions {
    fn default() -> Self {
        Self {
            jobs: 0,
            use_jpg: false,
            quality: 95,
            thumb_size: 128,
            grey_cutoff: 1.0,
            bw_ratio: 0.92,
            bw_supersample: 1.5,
            low: 10.0,
            high: 35.0,
            strict_shrink: false,
            compress_streams: true,
            progress: false,
        }
    }
}

/// Summary of one reduction run.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReduceResult {
    pub total_images: usize,
    pub replaced_images: usize,
    pub unchanged_images: usize,
    pub skipped_images: usize,
}

/// Errors that abort a whole run.
///
/// Per-image problems never surface here; they leave the affected image
/// unchanged and the run continues.
#[derive(Debug, Error)]
pub enum ReduceError {
    #[error("invalid options: {0}")]
    InvalidOptions(String),
    #[error("failed to load PDF: {0}")]
    Load(#[source] lopdf::Error),
    #[error("failed to save PDF: {0}")]
    Save(#[source] lopdf::Error),
    #[error("failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

/// Reduce a PDF file on disk and write the result to `output`.
pub fn reduce_pdf_file(
    input: &Path,
    output: &Path,
    options: &ReduceOptions,
) -> Result<ReduceResult, ReduceError> {
    validate(options)?;
    let mut doc = Document::load(input).map_err(ReduceError::Load)?;
    let result = process_document(&mut doc, options)?;
    if options.compress_streams {
        doc.compress();
    }
    doc.save(output)
        .map_err(|err| ReduceError::Save(lopdf::Error::IO(err)))?;
    Ok(result)
}

/// Reduce a PDF held in memory, returning the rewritten bytes.
pub fn reduce_pdf_bytes(
    input: &[u8],
    options: &ReduceOptions,
) -> Result<(Vec<u8>, ReduceResult), ReduceError> {
    validate(options)?;
    let mut doc = Document::load_mem(input).map_err(ReduceError::Load)?;
    let result = process_document(&mut doc, options)?;
    if options.compress_streams {
        doc.compress();
    }
    let mut output = Vec::new();
    doc.save_to(&mut output)
        .map_err(|err| ReduceError::Save(lopdf::Error::IO(err)))?;
    Ok((output, result))
}

fn validate(options: &ReduceOptions) -> Result<(), ReduceError> {
    if options.quality == 0 || options.quality > 100 {
        return Err(ReduceError::InvalidOptions(format!(
            "quality must be between 1 and 100, got {}",
            options.quality
        )));
    }
    if options.bw_supersample < 1.0 {
        return Err(ReduceError::InvalidOptions(format!(
            "bw_supersample must be at least 1, got {}",
            options.bw_supersample
        )));
    }
    Ok(())
}

/// Run the pipeline over every image and merge the accepted replacements
/// back into the document.
///
/// One work unit per image-bearing page. Units run on a bounded pool and
/// only read the document; replacements are applied after the parallel
/// phase ends, so tasks share no mutable state and completion order does
/// not matter.
fn process_document(
    doc: &mut Document,
    options: &ReduceOptions,
) -> Result<ReduceResult, ReduceError> {
    let units = collect_page_units(doc);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.jobs)
        .build()?;
    let bar = if options.progress {
        ProgressBar::new(units.len() as u64)
    } else {
        ProgressBar::hidden()
    };

    let shared = &*doc;
    let outcomes: Vec<(ObjectId, ImageOutcome)> = pool.install(|| {
        units
            .par_iter()
            .flat_map_iter(|unit| {
                let done: Vec<_> = unit
                    .iter()
                    .map(|&id| (id, reduce_object(shared, id, options)))
                    .collect();
                bar.inc(1);
                done
            })
            .collect()
    });
    bar.finish_and_clear();

    let mut result = ReduceResult::default();
    for (id, outcome) in outcomes {
        result.total_images += 1;
        match outcome {
            ImageOutcome::Replaced(stream) => {
                result.replaced_images += 1;
                doc.objects.insert(id, Object::Stream(stream));
            }
            ImageOutcome::Unchanged => result.unchanged_images += 1,
            ImageOutcome::Skipped => result.skipped_images += 1,
        }
    }
    log::info!(
        "{} images: {} replaced, {} unchanged, {} skipped",
        result.total_images,
        result.replaced_images,
        result.unchanged_images,
        result.skipped_images
    );
    Ok(result)
}

/// Decode, classify, clip, and encode one image stream.
pub fn reduce_image(doc: &Document, stream: &Stream, options: &ReduceOptions) -> ImageOutcome {
    let record = match ImageRecord::from_stream(doc, stream) {
        Some(record) => record,
        None => return ImageOutcome::Skipped,
    };
    let decoded = match decode::decode_image(&record) {
        Some(buffer) => buffer,
        None => return ImageOutcome::Skipped,
    };
    let classified = classify::classify(decoded, options);
    let simplified = raster::clip_levels(classified, options.low, options.high);
    encode::select_replacement(&simplified, stream, record.color_model, record.filter, options)
}

fn reduce_object(doc: &Document, id: ObjectId, options: &ReduceOptions) -> ImageOutcome {
    match doc.get_object(id) {
        Ok(Object::Stream(stream)) => reduce_image(doc, stream, options),
        _ => ImageOutcome::Skipped,
    }
}

/// Image objects reachable from each page's resources, in page order.
///
/// Form XObjects are followed recursively. An image referenced from several
/// pages is claimed by the first one so it is processed exactly once.
pub fn page_images(doc: &Document) -> Vec<(u32, Vec<ObjectId>)> {
    let mut claimed: HashSet<ObjectId> = HashSet::new();
    let mut pages = Vec::new();
    for (page_no, page_id) in doc.get_pages() {
        let mut images = Vec::new();
        let mut visited = HashSet::new();
        for xobject_id in page_xobjects(doc, page_id) {
            collect_images(doc, xobject_id, &mut images, &mut visited, &mut claimed);
        }
        pages.push((page_no, images));
    }
    pages
}

fn collect_page_units(doc: &Document) -> Vec<Vec<ObjectId>> {
    page_images(doc)
        .into_iter()
        .filter_map(|(_, images)| (!images.is_empty()).then_some(images))
        .collect()
}

fn page_xobjects(doc: &Document, page_id: ObjectId) -> Vec<ObjectId> {
    let page_dict = match doc.get_object(page_id) {
        Ok(Object::Dictionary(dict)) => dict,
        _ => return Vec::new(),
    };
    xobject_ids(doc, page_resources(doc, page_dict))
}

/// A page's resource dictionary, falling back to its parent node for
/// inherited resources.
fn page_resources<'a>(doc: &'a Document, page_dict: &'a Dictionary) -> Option<&'a Dictionary> {
    if let Ok(resources) = page_dict.get(b"Resources") {
        return as_dict(doc, resources);
    }
    if let Ok(Object::Reference(parent_id)) = page_dict.get(b"Parent") {
        if let Ok(Object::Dictionary(parent)) = doc.get_object(*parent_id) {
            if let Ok(resources) = parent.get(b"Resources") {
                return as_dict(doc, resources);
            }
        }
    }
    None
}

fn xobject_ids(doc: &Document, resources: Option<&Dictionary>) -> Vec<ObjectId> {
    let mut ids = Vec::new();
    let xobjects = resources
        .and_then(|resources| resources.get(b"XObject").ok())
        .and_then(|obj| as_dict(doc, obj));
    if let Some(xobjects) = xobjects {
        for (_name, value) in xobjects.iter() {
            if let Object::Reference(id) = value {
                ids.push(*id);
            }
        }
    }
    ids
}

fn collect_images(
    doc: &Document,
    id: ObjectId,
    images: &mut Vec<ObjectId>,
    visited: &mut HashSet<ObjectId>,
    claimed: &mut HashSet<ObjectId>,
) {
    if !visited.insert(id) {
        return;
    }
    let stream = match doc.get_object(id) {
        Ok(Object::Stream(stream)) => stream,
        _ => return,
    };
    match stream.dict.get(b"Subtype") {
        Ok(Object::Name(name)) if name == b"Image" => {
            if claimed.insert(id) {
                images.push(id);
            }
        }
        Ok(Object::Name(name)) if name == b"Form" => {
            if let Ok(resources) = stream.dict.get(b"Resources") {
                for child in xobject_ids(doc, as_dict(doc, resources)) {
                    collect_images(doc, child, images, visited, claimed);
                }
            }
        }
        _ => {}
    }
}

fn as_dict<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Dictionary> {
    match obj {
        Object::Dictionary(dict) => Some(dict),
        Object::Reference(id) => match doc.get_object(*id) {
            Ok(Object::Dictionary(dict)) => Some(dict),
            _ => None,
        },
        _ => None,
    }
}
