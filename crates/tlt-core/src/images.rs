//! Image format detection and JPEG normalisation for photo workflows.

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, Rgba, RgbaImage};

/// JPEG quality used when re-encoding submissions for the vision model.
const JPEG_QUALITY: u8 = 95;

/// File suffixes recognised as promotional reference images.
pub const IMAGE_SUFFIXES: &[&str] = &["avif", "jpg", "jpeg", "png", "gif", "webp"];

/// Whether a file name carries a recognised image suffix.
pub fn has_image_suffix(name: &str) -> bool {
    name.rsplit_once('.')
        .is_some_and(|(_, ext)| IMAGE_SUFFIXES.iter().any(|s| ext.eq_ignore_ascii_case(s)))
}

/// Sniffs the image MIME type from magic bytes.
pub fn detect_mime(bytes: &[u8]) -> Option<&'static str> {
    let kind = infer::get(bytes)?;
    kind.mime_type().starts_with("image/").then(|| kind.mime_type())
}

/// Whether the bytes already hold a JPEG stream.
pub fn is_jpeg(bytes: &[u8]) -> bool {
    detect_mime(bytes) == Some("image/jpeg")
}

/// Normalises arbitrary image bytes to JPEG.
///
/// Non-JPEG inputs are decoded, flattened against a white background (JPEG
/// has no alpha channel), and re-encoded at quality 95. Inputs that are
/// already JPEG, or that fail to decode or re-encode, are returned unchanged.
pub fn ensure_jpeg(bytes: Vec<u8>) -> Vec<u8> {
    if is_jpeg(&bytes) {
        return bytes;
    }
    match reencode_jpeg(&bytes) {
        Ok(encoded) => encoded,
        Err(_) => bytes,
    }
}

fn reencode_jpeg(bytes: &[u8]) -> Result<Vec<u8>, image::ImageError> {
    let decoded = image::load_from_memory(bytes)?;
    let flattened = flatten_on_white(&decoded);
    let mut out = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
    encoder.encode_image(&DynamicImage::ImageRgba8(flattened))?;
    Ok(out)
}

fn flatten_on_white(image: &DynamicImage) -> RgbaImage {
    let rgba = image.to_rgba8();
    let mut flat = RgbaImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let [r, g, b, a] = pixel.0;
        let alpha = u32::from(a);
        let blend = |channel: u8| -> u8 {
            ((u32::from(channel) * alpha + 255 * (255 - alpha)) / 255) as u8
        };
        flat.put_pixel(x, y, Rgba([blend(r), blend(g), blend(b), 255]));
    }
    flat
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::ImageFormat;

    use super::*;

    fn png_bytes(pixel: Rgba<u8>) -> Vec<u8> {
        let mut img = RgbaImage::new(4, 4);
        for p in img.pixels_mut() {
            *p = pixel;
        }
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn suffix_detection() {
        assert!(has_image_suffix("party.JPG"));
        assert!(has_image_suffix("promo.webp"));
        assert!(!has_image_suffix("notes.txt"));
        assert!(!has_image_suffix("no_extension"));
    }

    #[test]
    fn png_is_reencoded_to_jpeg() {
        let png = png_bytes(Rgba([10, 20, 30, 255]));
        assert!(!is_jpeg(&png));
        let jpeg = ensure_jpeg(png);
        assert!(is_jpeg(&jpeg));
    }

    #[test]
    fn jpeg_passes_through_unchanged() {
        let jpeg = {
            let png = png_bytes(Rgba([1, 2, 3, 255]));
            ensure_jpeg(png)
        };
        let again = ensure_jpeg(jpeg.clone());
        assert_eq!(jpeg, again);
    }

    #[test]
    fn transparency_flattens_to_white() {
        let png = png_bytes(Rgba([0, 0, 0, 0]));
        let jpeg = ensure_jpeg(png);
        let decoded = image::load_from_memory(&jpeg).unwrap().to_rgba8();
        let pixel = decoded.get_pixel(0, 0);
        // Fully transparent black must come out white-ish after flattening.
        assert!(pixel.0[0] > 240 && pixel.0[1] > 240 && pixel.0[2] > 240);
    }

    #[test]
    fn undecodable_bytes_are_preserved() {
        let garbage = vec![0x00, 0x01, 0x02, 0x03];
        assert_eq!(ensure_jpeg(garbage.clone()), garbage);
    }
}
