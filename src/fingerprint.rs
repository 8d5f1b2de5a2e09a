//! Content and visual fingerprinting.
//!
//! Text fingerprints are SHA-256 digests of normalized text. Visual
//! fingerprints use the average hash (aHash) algorithm so that two
//! screenshots can be compared by Hamming distance instead of exact
//! equality — small rendering jitter stays below the threshold.

use image::DynamicImage;
use sha2::{Digest, Sha256};

/// Hash grid size (8x8 = 64 bits)
const HASH_SIZE: u32 = 8;

/// Perceptual hash value (64-bit)
pub type VisualHash = u64;

/// SHA-256 hex digest of the text's UTF-8 bytes
pub fn text_fingerprint(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Compute the average-hash signature of an encoded image (PNG, JPEG, ...)
///
/// Algorithm:
/// 1. Decode and force to grayscale
/// 2. Downsample to a fixed 8x8 grid
/// 3. Compute the mean pixel intensity
/// 4. One bit per pixel: 1 if pixel > mean, else 0
pub fn visual_fingerprint(image_bytes: &[u8]) -> Result<VisualHash, image::ImageError> {
    let img = image::load_from_memory(image_bytes)?;
    Ok(ahash(&img))
}

/// aHash over an already-decoded image
pub fn ahash(image: &DynamicImage) -> VisualHash {
    let resized = image.resize_exact(HASH_SIZE, HASH_SIZE, image::imageops::FilterType::Nearest);
    let gray = resized.to_luma8();

    let sum: u32 = gray.pixels().map(|p| p.0[0] as u32).sum();
    let avg = (sum / (HASH_SIZE * HASH_SIZE)) as u8;

    let mut hash: VisualHash = 0;
    for (i, pixel) in gray.pixels().enumerate() {
        if pixel.0[0] > avg {
            hash |= 1 << i;
        }
    }

    hash
}

/// Number of differing bits between two visual fingerprints (0-64)
pub fn hamming_distance(a: VisualHash, b: VisualHash) -> u32 {
    (a ^ b).count_ones()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn solid_image(brightness: u8) -> Vec<u8> {
        let mut img = RgbImage::new(64, 64);
        for pixel in img.pixels_mut() {
            *pixel = Rgb([brightness, brightness, brightness]);
        }
        encode_png(img)
    }

    fn split_image() -> Vec<u8> {
        let mut img = RgbImage::new(64, 64);
        for (x, _, pixel) in img.enumerate_pixels_mut() {
            let b = if x < 32 { 0 } else { 255 };
            *pixel = Rgb([b, b, b]);
        }
        encode_png(img)
    }

    fn encode_png(img: RgbImage) -> Vec<u8> {
        let mut out = std::io::Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut out, image::ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn test_text_fingerprint_deterministic() {
        let a = text_fingerprint("hello world");
        let b = text_fingerprint("hello world");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_text_fingerprint_sensitive_to_single_char() {
        assert_ne!(text_fingerprint("hello world"), text_fingerprint("hello worle"));
    }

    #[test]
    fn test_hamming_distance() {
        assert_eq!(hamming_distance(0, 0), 0);
        assert_eq!(hamming_distance(0, 1), 1);
        assert_eq!(hamming_distance(0, 0xFF), 8);
        assert_eq!(hamming_distance(0, u64::MAX), 64);
    }

    #[test]
    fn test_identical_images_same_fingerprint() {
        let a = visual_fingerprint(&solid_image(128)).unwrap();
        let b = visual_fingerprint(&solid_image(128)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_different_images_far_apart() {
        let black = visual_fingerprint(&solid_image(0)).unwrap();
        let split = visual_fingerprint(&split_image()).unwrap();
        let distance = hamming_distance(black, split);
        assert!(distance > 16, "distance was {}", distance);
    }

    #[test]
    fn test_undecodable_bytes_error() {
        assert!(visual_fingerprint(b"not an image").is_err());
    }
}
