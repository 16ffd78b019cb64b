//! Candidate encoding and output selection.
//!
//! Each pixel mode maps to one preferred codec. Gray and color candidates
//! must not grow the stream; a candidate that does loses to the original
//! unless the pixel mode changed underneath it, in which case a lossless
//! Flate fallback keeps the replacement consistent with the new mode.

use fax::encoder::Encoder;
use fax::{Color, VecWriter};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use image::{GrayImage, RgbImage};
use lopdf::{Dictionary, Object, Stream};
use std::io::Write;

use crate::decode::{ColorModel, FilterKind};
use crate::raster::PixelBuffer;
use crate::ReduceOptions;

/// Final decision for one image.
#[derive(Debug)]
pub enum ImageOutcome {
    /// Accepted candidate: written back over the original object.
    Replaced(Stream),
    /// Every candidate lost to the original; the object is left alone.
    Unchanged,
    /// The pipeline declined the image (unsupported or undecodable).
    Skipped,
}

/// Pick the output representation for a classified buffer.
///
/// Bilevel output is accepted unconditionally: the mode was already
/// downgraded and a Group-4 strip beats any gray or color rendition of a
/// text scan. Encode failures count as rejected candidates.
pub fn select_replacement(
    buffer: &PixelBuffer,
    original: &Stream,
    declared: ColorModel,
    filter: FilterKind,
    options: &ReduceOptions,
) -> ImageOutcome {
    let original_len = original.content.len();
    match buffer {
        PixelBuffer::Bilevel(img) => match encode_group4(img) {
            Some(data) => ImageOutcome::Replaced(bilevel_stream(&original.dict, img, data)),
            None => ImageOutcome::Unchanged,
        },
        PixelBuffer::Gray(img) => {
            let downgraded = declared == ColorModel::Rgb;
            let data = match deflate(img.as_raw()) {
                Ok(data) => data,
                Err(err) => {
                    log::debug!("deflate failed: {}", err);
                    return ImageOutcome::Unchanged;
                }
            };
            if data.len() <= original_len || (downgraded && !options.strict_shrink) {
                ImageOutcome::Replaced(flate_stream(
                    &original.dict,
                    img.width(),
                    img.height(),
                    true,
                    data,
                ))
            } else {
                ImageOutcome::Unchanged
            }
        }
        PixelBuffer::Rgb(img) => {
            let was_jpeg = matches!(filter, FilterKind::Dct | FilterKind::Jpx);
            if options.use_jpg && !was_jpeg {
                match encode_jpeg(img, options.quality) {
                    Some(data) if data.len() <= original_len => {
                        return ImageOutcome::Replaced(jpeg_stream(&original.dict, img, data));
                    }
                    Some(_) => return ImageOutcome::Unchanged,
                    // Encode failure: fall through to the lossless candidate.
                    None => {}
                }
            }
            let data = match deflate(img.as_raw()) {
                Ok(data) => data,
                Err(err) => {
                    log::debug!("deflate failed: {}", err);
                    return ImageOutcome::Unchanged;
                }
            };
            if data.len() <= original_len {
                ImageOutcome::Replaced(flate_stream(
                    &original.dict,
                    img.width(),
                    img.height(),
                    false,
                    data,
                ))
            } else {
                ImageOutcome::Unchanged
            }
        }
    }
}

/// Encode a bilevel buffer as a single CCITT Group-4 strip, dark pixels as
/// black. Returns `None` for widths beyond the coder's 16-bit extent.
fn encode_group4(img: &GrayImage) -> Option<Vec<u8>> {
    let width = u16::try_from(img.width()).ok()?;
    u16::try_from(img.height()).ok()?;
    let mut encoder = Encoder::new(VecWriter::new());
    for row in img.rows() {
        encoder.encode_line(
            row.map(|pixel| {
                if pixel.0[0] < 128 {
                    Color::Black
                } else {
                    Color::White
                }
            }),
            width,
        );
    }
    Some(encoder.finish().unwrap().finish())
}

fn encode_jpeg(img: &RgbImage, quality: u8) -> Option<Vec<u8>> {
    let width = u16::try_from(img.width()).ok()?;
    let height = u16::try_from(img.height()).ok()?;
    let mut data = Vec::new();
    let mut encoder = jpeg_encoder::Encoder::new(&mut data, quality);
    encoder.set_sampling_factor(jpeg_encoder::SamplingFactor::R_4_2_0);
    match encoder.encode(img.as_raw(), width, height, jpeg_encoder::ColorType::Rgb) {
        Ok(()) => Some(data),
        Err(err) => {
            log::debug!("jpeg encode failed: {}", err);
            None
        }
    }
}

fn deflate(samples: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(samples)?;
    encoder.finish()
}

/// Replacement dictionary seeded from the original, with the entries every
/// candidate rewrites. Unrelated entries (SMask, Intent, ...) carry over.
fn base_dict(original: &Dictionary, width: u32, height: u32, gray: bool) -> Dictionary {
    let mut dict = original.clone();
    dict.set("Width", Object::Integer(width as i64));
    dict.set("Height", Object::Integer(height as i64));
    dict.set("BitsPerComponent", Object::Integer(8));
    dict.remove(b"DecodeParms");
    dict.set(
        "ColorSpace",
        Object::Name(if gray { b"DeviceGray".to_vec() } else { b"DeviceRGB".to_vec() }),
    );
    dict
}

fn flate_stream(
    original: &Dictionary,
    width: u32,
    height: u32,
    gray: bool,
    data: Vec<u8>,
) -> Stream {
    let mut dict = base_dict(original, width, height, gray);
    dict.set("Filter", Object::Name(b"FlateDecode".to_vec()));
    Stream::new(dict, data)
}

fn jpeg_stream(original: &Dictionary, img: &RgbImage, data: Vec<u8>) -> Stream {
    let mut dict = base_dict(original, img.width(), img.height(), false);
    dict.set("Filter", Object::Name(b"DCTDecode".to_vec()));
    Stream::new(dict, data)
}

fn bilevel_stream(original: &Dictionary, img: &GrayImage, data: Vec<u8>) -> Stream {
    let (width, height) = img.dimensions();
    let mut dict = base_dict(original, width, height, true);
    dict.set("BitsPerComponent", Object::Integer(1));
    dict.set("ImageMask", Object::Boolean(true));
    dict.set("Filter", Object::Name(b"CCITTFaxDecode".to_vec()));
    let mut parms = Dictionary::new();
    parms.set("K", Object::Integer(-1));
    parms.set("Columns", Object::Integer(width as i64));
    parms.set("Rows", Object::Integer(height as i64));
    parms.set("BlackIs1", Object::Boolean(true));
    dict.set("DecodeParms", Object::Dictionary(parms));
    Stream::new(dict, data)
}
