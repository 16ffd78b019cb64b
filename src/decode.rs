//! Extraction and decoding of embedded image streams.

use flate2::read::ZlibDecoder;
use image::{DynamicImage, GenericImageView, GrayImage, RgbImage};
use lopdf::{Dictionary, Document, Object, Stream};
use std::io::Read;

use crate::raster::PixelBuffer;

/// Declared color model of an embedded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorModel {
    Gray,
    Rgb,
}

impl ColorModel {
    pub fn channels(self) -> usize {
        match self {
            ColorModel::Gray => 1,
            ColorModel::Rgb => 3,
        }
    }
}

/// Declared compression filter of an embedded image stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    /// No filter; the stream holds raw samples.
    Raw,
    Flate,
    /// The stream is a complete JPEG file.
    Dct,
    /// The stream is a complete JPEG 2000 file.
    Jpx,
    /// Anything else (CCITTFax, JBIG2, filter chains, ...); left untouched.
    Unsupported,
}

/// Immutable view of an image XObject as stored in the document.
#[derive(Debug, Clone, Copy)]
pub struct ImageRecord<'a> {
    pub width: u32,
    pub height: u32,
    pub color_model: ColorModel,
    pub filter: FilterKind,
    pub bits_per_component: u32,
    pub data: &'a [u8],
}

impl<'a> ImageRecord<'a> {
    /// Read a record out of a stream object.
    ///
    /// Returns `None` when the stream is not an image or declares a color
    /// space other than DeviceGray/DeviceRGB. A single level of indirect
    /// reference to the color space object is resolved.
    pub fn from_stream(doc: &Document, stream: &'a Stream) -> Option<ImageRecord<'a>> {
        let dict = &stream.dict;
        match dict.get(b"Subtype") {
            Ok(Object::Name(name)) if name == b"Image" => {}
            _ => return None,
        }
        let width = dict_u32(dict, b"Width")?;
        let height = dict_u32(dict, b"Height")?;
        let color_model = match resolved(doc, dict.get(b"ColorSpace").ok()?) {
            Object::Name(name) if name == b"DeviceRGB" => ColorModel::Rgb,
            Object::Name(name) if name == b"DeviceGray" => ColorModel::Gray,
            other => {
                log::debug!("skipping image with unsupported color space {:?}", other);
                return None;
            }
        };
        let mut filter = filter_kind(dict);
        if filter == FilterKind::Flate && dict.has(b"DecodeParms") {
            // Predictor-coded Flate data is not plain samples after inflate.
            filter = FilterKind::Unsupported;
        }
        Some(ImageRecord {
            width,
            height,
            color_model,
            filter,
            bits_per_component: dict_u32(dict, b"BitsPerComponent").unwrap_or(8),
            data: &stream.content,
        })
    }
}

/// Decode a record into a pixel buffer.
///
/// Returns `None` when the image should be skipped: unsupported filter,
/// corrupt stream, or a sample count that disagrees with the declared
/// geometry. Skipping leaves the original stream untouched.
pub fn decode_image(record: &ImageRecord<'_>) -> Option<PixelBuffer> {
    match record.filter {
        FilterKind::Raw => from_samples(record, record.data.to_vec()),
        FilterKind::Flate => {
            let mut decoder = ZlibDecoder::new(record.data);
            let mut samples = Vec::new();
            if let Err(err) = decoder.read_to_end(&mut samples) {
                log::debug!(
                    "inflate failed for {}x{} image: {}",
                    record.width,
                    record.height,
                    err
                );
                return None;
            }
            from_samples(record, samples)
        }
        FilterKind::Dct | FilterKind::Jpx => {
            let img = match image::load_from_memory(record.data) {
                Ok(img) => img,
                Err(err) => {
                    log::debug!("could not open embedded image file: {}", err);
                    return None;
                }
            };
            if img.dimensions() != (record.width, record.height) {
                log::debug!(
                    "embedded file is {}x{} but the dictionary declares {}x{}",
                    img.width(),
                    img.height(),
                    record.width,
                    record.height
                );
                return None;
            }
            Some(match img {
                DynamicImage::ImageLuma8(gray) => PixelBuffer::Gray(gray),
                other => PixelBuffer::Rgb(other.to_rgb8()),
            })
        }
        FilterKind::Unsupported => {
            log::debug!(
                "unsupported filter on {}x{} image, leaving it untouched",
                record.width,
                record.height
            );
            None
        }
    }
}

fn from_samples(record: &ImageRecord<'_>, samples: Vec<u8>) -> Option<PixelBuffer> {
    if record.bits_per_component != 8 {
        log::debug!(
            "skipping {}-bit image, only 8-bit samples are handled",
            record.bits_per_component
        );
        return None;
    }
    let expected =
        record.width as usize * record.height as usize * record.color_model.channels();
    if samples.len() != expected {
        log::debug!(
            "sample count mismatch: got {} bytes, expected {}",
            samples.len(),
            expected
        );
        return None;
    }
    match record.color_model {
        ColorModel::Gray => {
            GrayImage::from_raw(record.width, record.height, samples).map(PixelBuffer::Gray)
        }
        ColorModel::Rgb => {
            RgbImage::from_raw(record.width, record.height, samples).map(PixelBuffer::Rgb)
        }
    }
}

fn filter_kind(dict: &Dictionary) -> FilterKind {
    let filter = match dict.get(b"Filter") {
        Ok(obj) => obj,
        Err(_) => return FilterKind::Raw,
    };
    let name = match filter {
        Object::Name(name) => name,
        // A one-element filter array is equivalent to a bare name.
        Object::Array(array) if array.len() == 1 => match &array[0] {
            Object::Name(name) => name,
            _ => return FilterKind::Unsupported,
        },
        _ => return FilterKind::Unsupported,
    };
    match name.as_slice() {
        b"FlateDecode" => FilterKind::Flate,
        b"DCTDecode" => FilterKind::Dct,
        b"JPXDecode" => FilterKind::Jpx,
        _ => FilterKind::Unsupported,
    }
}

fn dict_u32(dict: &Dictionary, key: &[u8]) -> Option<u32> {
    match dict.get(key) {
        Ok(Object::Integer(value)) => u32::try_from(*value).ok(),
        _ => None,
    }
}

fn resolved<'a>(doc: &'a Document, obj: &'a Object) -> &'a Object {
    match obj {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(obj),
        _ => obj,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::PixelMode;
    use lopdf::dictionary;
    use std::io::Write;

    fn image_stream(color_space: &str, filter: Option<&str>, content: Vec<u8>) -> Stream {
        let mut dict = dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => 4,
            "Height" => 2,
            "ColorSpace" => color_space,
            "BitsPerComponent" => 8,
        };
        if let Some(name) = filter {
            dict.set("Filter", Object::Name(name.as_bytes().to_vec()));
        }
        Stream::new(dict, content)
    }

    fn deflate(data: &[u8]) -> Vec<u8> {
        let mut encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn raw_gray_decodes_directly() {
        let doc = Document::new();
        let stream = image_stream("DeviceGray", None, vec![0, 64, 128, 255, 1, 2, 3, 4]);
        let record = ImageRecord::from_stream(&doc, &stream).unwrap();
        assert_eq!(record.filter, FilterKind::Raw);
        let buffer = decode_image(&record).unwrap();
        assert_eq!(buffer.mode(), PixelMode::Gray8);
        assert_eq!(buffer.dimensions(), (4, 2));
    }

    #[test]
    fn flate_rgb_round_trips() {
        let doc = Document::new();
        let samples: Vec<u8> = (0u8..24).collect();
        let stream = image_stream("DeviceRGB", Some("FlateDecode"), deflate(&samples));
        let record = ImageRecord::from_stream(&doc, &stream).unwrap();
        let buffer = decode_image(&record).unwrap();
        match buffer {
            PixelBuffer::Rgb(img) => assert_eq!(img.into_raw(), samples),
            other => panic!("expected an RGB buffer, got {:?}", other.mode()),
        }
    }

    #[test]
    fn flate_length_mismatch_is_skipped() {
        let doc = Document::new();
        // 7 bytes for a 4x2 gray image that needs 8.
        let stream = image_stream("DeviceGray", Some("FlateDecode"), deflate(&[0u8; 7]));
        let record = ImageRecord::from_stream(&doc, &stream).unwrap();
        assert!(decode_image(&record).is_none());
    }

    #[test]
    fn corrupt_flate_stream_is_skipped() {
        let doc = Document::new();
        let stream = image_stream("DeviceGray", Some("FlateDecode"), vec![0xde, 0xad, 0xbe]);
        let record = ImageRecord::from_stream(&doc, &stream).unwrap();
        assert!(decode_image(&record).is_none());
    }

    #[test]
    fn jbig2_filter_is_unsupported() {
        let doc = Document::new();
        let stream = image_stream("DeviceGray", Some("JBIG2Decode"), vec![0; 8]);
        let record = ImageRecord::from_stream(&doc, &stream).unwrap();
        assert_eq!(record.filter, FilterKind::Unsupported);
        assert!(decode_image(&record).is_none());
    }

    #[test]
    fn cmyk_color_space_is_rejected() {
        let doc = Document::new();
        let stream = image_stream("DeviceCMYK", None, vec![0; 32]);
        assert!(ImageRecord::from_stream(&doc, &stream).is_none());
    }

    #[test]
    fn non_image_stream_is_rejected() {
        let doc = Document::new();
        let stream = Stream::new(
            dictionary! { "Type" => "XObject", "Subtype" => "Form" },
            Vec::new(),
        );
        assert!(ImageRecord::from_stream(&doc, &stream).is_none());
    }

    #[test]
    fn one_bit_samples_are_skipped() {
        let doc = Document::new();
        let mut stream = image_stream("DeviceGray", None, vec![0xAA]);
        stream.dict.set("BitsPerComponent", 1);
        let record = ImageRecord::from_stream(&doc, &stream).unwrap();
        assert_eq!(record.bits_per_component, 1);
        assert!(decode_image(&record).is_none());
    }

    #[test]
    fn predictor_coded_flate_is_unsupported() {
        let doc = Document::new();
        let mut stream = image_stream("DeviceGray", Some("FlateDecode"), deflate(&[0u8; 8]));
        stream.dict.set(
            "DecodeParms",
            dictionary! { "Predictor" => 2, "Columns" => 4 },
        );
        let record = ImageRecord::from_stream(&doc, &stream).unwrap();
        assert_eq!(record.filter, FilterKind::Unsupported);
        assert!(decode_image(&record).is_none());
    }

    #[test]
    fn single_element_filter_array_is_accepted() {
        let doc = Document::new();
        let mut stream = image_stream("DeviceGray", None, deflate(&[7u8; 8]));
        stream.dict.set(
            "Filter",
            vec![Object::Name(b"FlateDecode".to_vec())],
        );
        let record = ImageRecord::from_stream(&doc, &stream).unwrap();
        assert_eq!(record.filter, FilterKind::Flate);
        assert!(decode_image(&record).is_some());
    }

    #[test]
    fn indirect_color_space_is_resolved() {
        let mut doc = Document::new();
        let cs_id = doc.add_object(Object::Name(b"DeviceGray".to_vec()));
        let mut stream = image_stream("DeviceGray", None, vec![0; 8]);
        stream.dict.set("ColorSpace", Object::Reference(cs_id));
        let record = ImageRecord::from_stream(&doc, &stream).unwrap();
        assert_eq!(record.color_model, ColorModel::Gray);
    }

    #[test]
    fn embedded_jpeg_decodes_through_image_open() {
        let doc = Document::new();
        let mut jpeg = Vec::new();
        let encoder = jpeg_encoder::Encoder::new(&mut jpeg, 90);
        encoder
            .encode(&[128u8; 8], 4, 2, jpeg_encoder::ColorType::Luma)
            .unwrap();
        let stream = image_stream("DeviceGray", Some("DCTDecode"), jpeg);
        let record = ImageRecord::from_stream(&doc, &stream).unwrap();
        assert_eq!(record.filter, FilterKind::Dct);
        let buffer = decode_image(&record).unwrap();
        assert_eq!(buffer.mode(), PixelMode::Gray8);
        assert_eq!(buffer.dimensions(), (4, 2));
    }
}
