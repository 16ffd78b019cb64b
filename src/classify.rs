//! Content classification: decide whether an image really carries color,
//! grayscale, or bilevel information, and convert it to that mode.

use image::imageops::{self, FilterType};
use image::{GrayImage, ImageBuffer, Pixel, RgbImage};

use crate::raster::PixelBuffer;
use crate::ReduceOptions;

/// Intensity bands counted as "near black" / "near white" by the bilevel test.
const NEAR_BLACK: u8 = 63;
const NEAR_WHITE: u8 = 192;

/// Split point when producing a bilevel buffer from grayscale.
const MIDPOINT: u8 = 128;

/// Classify a buffer into its best-fit pixel mode.
///
/// The tests run on a small proxy image, so this is a heuristic rather than
/// color science: a faint color wash or a finely dithered scan can be
/// misjudged, and the thresholds in [`ReduceOptions`] tune that trade-off.
/// Fidelity only ever goes down (color to gray to bilevel), never up, and
/// the same input with the same thresholds always classifies the same way.
pub fn classify(buffer: PixelBuffer, options: &ReduceOptions) -> PixelBuffer {
    let (gray, gray_proxy) = match buffer {
        PixelBuffer::Bilevel(img) => return PixelBuffer::Bilevel(img),
        PixelBuffer::Rgb(img) => {
            let proxy = shrink_to_proxy(&img, options.thumb_size);
            if max_channel_deviation(&proxy) > options.grey_cutoff {
                return PixelBuffer::Rgb(img);
            }
            (imageops::grayscale(&img), imageops::grayscale(&proxy))
        }
        PixelBuffer::Gray(img) => {
            let proxy = shrink_to_proxy(&img, options.thumb_size);
            (img, proxy)
        }
    };
    if bilevel_fraction(&gray_proxy, options.bw_supersample) >= options.bw_ratio as f64 {
        PixelBuffer::Bilevel(threshold_midpoint(&gray))
    } else {
        PixelBuffer::Gray(gray)
    }
}

/// Downscale so the long edge is at most `thumb_size`, preserving aspect
/// ratio and averaging source pixels. Never upscales.
fn shrink_to_proxy<P>(image: &ImageBuffer<P, Vec<u8>>, thumb_size: u32) -> ImageBuffer<P, Vec<u8>>
where
    P: Pixel<Subpixel = u8> + 'static,
{
    let (width, height) = image.dimensions();
    let long_edge = width.max(height);
    if thumb_size == 0 || long_edge <= thumb_size {
        return image.clone();
    }
    let scale = thumb_size as f32 / long_edge as f32;
    let proxy_width = ((width as f32 * scale).round() as u32).max(1);
    let proxy_height = ((height as f32 * scale).round() as u32).max(1);
    imageops::thumbnail(image, proxy_width, proxy_height)
}

/// Largest channel spread seen over the whole proxy, in intensity units.
fn max_channel_deviation(proxy: &RgbImage) -> f32 {
    let mut max_deviation = 0u8;
    for pixel in proxy.pixels() {
        let [r, g, b] = pixel.0;
        let spread = r.max(g).max(b) - r.min(g).min(b);
        max_deviation = max_deviation.max(spread);
    }
    max_deviation as f32
}

/// Fraction of proxy pixels sitting in the near-black or near-white bands,
/// after supersampling the proxy to soften aliasing on thin strokes.
fn bilevel_fraction(proxy: &GrayImage, supersample: f32) -> f64 {
    let scaled;
    let counted = if supersample > 1.0 {
        let width = ((proxy.width() as f32 * supersample).round() as u32).max(1);
        let height = ((proxy.height() as f32 * supersample).round() as u32).max(1);
        scaled = imageops::resize(proxy, width, height, FilterType::Triangle);
        &scaled
    } else {
        proxy
    };
    let total = counted.width() as u64 * counted.height() as u64;
    if total == 0 {
        return 0.0;
    }
    let near = counted
        .pixels()
        .filter(|pixel| pixel.0[0] <= NEAR_BLACK || pixel.0[0] >= NEAR_WHITE)
        .count();
    near as f64 / total as f64
}

fn threshold_midpoint(gray: &GrayImage) -> GrayImage {
    let mut out = gray.clone();
    for pixel in out.pixels_mut() {
        pixel.0[0] = if pixel.0[0] < MIDPOINT { 0 } else { 255 };
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::PixelMode;
    use image::{Luma, Rgb};

    fn options() -> ReduceOptions {
        ReduceOptions::default()
    }

    fn photographic_rgb(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            Rgb([
                (x * 2) as u8,
                (y * 3) as u8,
                255 - (x + y) as u8,
            ])
        })
    }

    #[test]
    fn chromatic_image_stays_rgb() {
        let classified = classify(PixelBuffer::Rgb(photographic_rgb(64, 64)), &options());
        assert_eq!(classified.mode(), PixelMode::Rgb8);
    }

    #[test]
    fn achromatic_rgb_downgrades_to_gray() {
        let img = RgbImage::from_fn(64, 64, |x, y| {
            let v = ((x * 3 + y * 5) % 120 + 70) as u8;
            Rgb([v, v, v])
        });
        let classified = classify(PixelBuffer::Rgb(img), &options());
        assert_eq!(classified.mode(), PixelMode::Gray8);
    }

    #[test]
    fn faint_color_within_cutoff_counts_as_gray() {
        let mut opts = options();
        opts.grey_cutoff = 3.0;
        let img = RgbImage::from_fn(32, 32, |x, _| {
            let v = (90 + x) as u8;
            Rgb([v, v.saturating_add(2), v])
        });
        let classified = classify(PixelBuffer::Rgb(img), &opts);
        assert_eq!(classified.mode(), PixelMode::Gray8);
    }

    #[test]
    fn text_like_rgb_goes_bilevel() {
        // Near-black glyph block on a near-white page: well over 99% of the
        // proxy sits inside the black/white bands.
        let img = RgbImage::from_fn(100, 100, |x, _| {
            if x < 50 {
                Rgb([5, 5, 5])
            } else {
                Rgb([250, 250, 250])
            }
        });
        let classified = classify(PixelBuffer::Rgb(img), &options());
        assert_eq!(classified.mode(), PixelMode::Bilevel);
        match classified {
            PixelBuffer::Bilevel(out) => {
                assert_eq!(out.get_pixel(0, 0), &Luma([0]));
                assert_eq!(out.get_pixel(99, 0), &Luma([255]));
                assert_eq!(out.dimensions(), (100, 100));
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn midtone_gray_stays_gray() {
        let img = GrayImage::from_fn(80, 80, |x, y| Luma([((x * 2 + y) % 160 + 48) as u8]));
        let classified = classify(PixelBuffer::Gray(img), &options());
        assert_eq!(classified.mode(), PixelMode::Gray8);
    }

    #[test]
    fn classification_is_idempotent() {
        let opts = options();
        let img = GrayImage::from_fn(100, 100, |x, _| Luma([if x < 30 { 0 } else { 255 }]));
        let first = classify(PixelBuffer::Gray(img), &opts);
        let second = classify(first.clone(), &opts);
        match (&first, &second) {
            (PixelBuffer::Bilevel(a), PixelBuffer::Bilevel(b)) => assert_eq!(a, b),
            _ => panic!("expected stable bilevel classification"),
        }
    }

    #[test]
    fn gray_input_never_upgrades_to_color() {
        let img = GrayImage::from_fn(64, 64, |x, y| Luma([(x * y % 251) as u8]));
        let classified = classify(PixelBuffer::Gray(img), &options());
        assert!(classified.mode() <= PixelMode::Gray8);
    }

    #[test]
    fn proxy_never_upscales_small_images() {
        let img = RgbImage::from_pixel(16, 8, Rgb([10, 200, 30]));
        let proxy = shrink_to_proxy(&img, 128);
        assert_eq!(proxy.dimensions(), (16, 8));
    }

    #[test]
    fn proxy_clamps_long_edge() {
        let img = GrayImage::from_pixel(512, 256, Luma([128]));
        let proxy = shrink_to_proxy(&img, 128);
        assert_eq!(proxy.dimensions(), (128, 64));
    }
}
