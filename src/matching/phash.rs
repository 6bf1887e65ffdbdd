//! Block-mean perceptual hashing of poster art.
//!
//! The hash is 256 bits (a 16x16 grid) rendered as 64 lowercase hex chars.
//! Aspect ratio is intentionally not preserved: both sides of a comparison
//! are stretched onto the same grid, so the hash depends only on relative
//! block brightness.

use image::imageops::FilterType;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

const GRID: u32 = 16;
const FETCH_TIMEOUT: Duration = Duration::from_secs(15);
const BROWSER_UA: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Fetch `image_url` and produce its 64-hex block hash. Any failure
/// (network, decode, empty body) yields `None`; nothing escapes.
pub async fn phash(client: &Client, image_url: &str) -> Option<String> {
    let response = client
        .get(image_url)
        .header(reqwest::header::USER_AGENT, BROWSER_UA)
        .timeout(FETCH_TIMEOUT)
        .send()
        .await
        .ok()?;

    if !response.status().is_success() {
        debug!(url = %image_url, status = %response.status(), "poster fetch failed");
        return None;
    }

    let bytes = response.bytes().await.ok()?;
    phash_bytes(&bytes)
}

/// Hash already-fetched image bytes.
#[must_use]
pub fn phash_bytes(bytes: &[u8]) -> Option<String> {
    let decoded = image::load_from_memory(bytes).ok()?;
    let gray = decoded.to_luma8();
    let cells = image::imageops::resize(&gray, GRID, GRID, FilterType::Triangle);

    let total: u64 = cells.pixels().map(|p| u64::from(p.0[0])).sum();
    let mean = total as f64 / f64::from(GRID * GRID);

    let mut hash = String::with_capacity(64);
    let mut nibble = 0u8;
    for (i, pixel) in cells.pixels().enumerate() {
        nibble <<= 1;
        if f64::from(pixel.0[0]) >= mean {
            nibble |= 1;
        }
        if i % 4 == 3 {
            hash.push(char::from_digit(u32::from(nibble), 16)?);
            nibble = 0;
        }
    }

    Some(hash)
}

/// Bitwise Hamming distance between two hex hashes. Length mismatch makes
/// the pair incomparable and returns -1.
#[must_use]
pub fn hamming(a: &str, b: &str) -> i32 {
    if a.len() != b.len() {
        return -1;
    }

    let mut distance = 0i32;
    for (ca, cb) in a.chars().zip(b.chars()) {
        let (Some(na), Some(nb)) = (ca.to_digit(16), cb.to_digit(16)) else {
            return -1;
        };
        distance += (na ^ nb).count_ones() as i32;
    }
    distance
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hamming_symmetry_and_identity() {
        let a = "a".repeat(64);
        let b = "5".repeat(64);
        assert_eq!(hamming(&a, &a), 0);
        assert_eq!(hamming(&a, &b), hamming(&b, &a));
        assert_eq!(hamming(&a, &b), 256);
    }

    #[test]
    fn test_hamming_bounds() {
        let zero = "0".repeat(64);
        let full = "f".repeat(64);
        assert_eq!(hamming(&zero, &full), 256);
        let d = hamming(&zero, &"1".repeat(64));
        assert_eq!(d, 64);
    }

    #[test]
    fn test_hamming_length_mismatch() {
        assert_eq!(hamming("abc", "abcd"), -1);
        assert_eq!(hamming("", ""), 0);
    }

    #[test]
    fn test_hamming_rejects_non_hex() {
        assert_eq!(hamming("zz", "aa"), -1);
    }

    #[test]
    fn test_phash_bytes_shape() {
        // Flat image: every cell equals the mean, so every bit is set.
        let img = image::GrayImage::from_pixel(32, 48, image::Luma([128u8]));
        let mut bytes = Vec::new();
        img.write_to(
            &mut std::io::Cursor::new(&mut bytes),
            image::ImageFormat::Png,
        )
        .unwrap();

        let hash = phash_bytes(&bytes).unwrap();
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, "f".repeat(64));
    }

    #[test]
    fn test_phash_bytes_rejects_garbage() {
        assert!(phash_bytes(b"not an image").is_none());
    }
}
