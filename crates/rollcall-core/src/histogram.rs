//! Deterministic colour-distribution embedding.
//!
//! Used when no learned face model is available. The image is converted to
//! 8-bit HSV (hue in half-degrees, `[0, 180)`), binned into an 8×4×4 joint
//! histogram, L2-normalized and flattened hue-major into a 128-length vector.
//! The result depends only on pixel data, so repeated extraction of the same
//! image is bit-identical.

use crate::types::EMBEDDING_DIM;
use image::RgbImage;

const HUE_BINS: usize = 8;
const SAT_BINS: usize = 4;
const VAL_BINS: usize = 4;
/// Exclusive upper bound of the 8-bit hue range.
const HUE_RANGE: usize = 180;
const CHANNEL_RANGE: usize = 256;

const _: () = assert!(HUE_BINS * SAT_BINS * VAL_BINS == EMBEDDING_DIM);

/// Convert one RGB pixel to 8-bit HSV.
///
/// `V = max`, `S = 255 * (max - min) / max`, `H = degrees / 2` rounded.
/// A hue that rounds up to 180 wraps to 0.
pub fn rgb_to_hsv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (rf, gf, bf) = (r as f32, g as f32, b as f32);
    let max = rf.max(gf).max(bf);
    let min = rf.min(gf).min(bf);
    let diff = max - min;

    let s = if max > 0.0 {
        (255.0 * diff / max).round()
    } else {
        0.0
    };

    let h_deg = if diff == 0.0 {
        0.0
    } else if max == rf {
        60.0 * (gf - bf) / diff
    } else if max == gf {
        120.0 + 60.0 * (bf - rf) / diff
    } else {
        240.0 + 60.0 * (rf - gf) / diff
    };
    let h_deg = if h_deg < 0.0 { h_deg + 360.0 } else { h_deg };
    let h = ((h_deg / 2.0).round() as usize) % HUE_RANGE;

    (h as u8, s as u8, max as u8)
}

#[inline]
fn bin_index(h: u8, s: u8, v: u8) -> usize {
    let hb = h as usize * HUE_BINS / HUE_RANGE;
    let sb = s as usize * SAT_BINS / CHANNEL_RANGE;
    let vb = v as usize * VAL_BINS / CHANNEL_RANGE;
    (hb * SAT_BINS + sb) * VAL_BINS + vb
}

/// Compute the L2-normalized 128-bin HSV histogram of an image.
pub fn hsv_histogram(image: &RgbImage) -> Vec<f32> {
    let mut hist = vec![0.0f32; EMBEDDING_DIM];
    for px in image.pixels() {
        let [r, g, b] = px.0;
        let (h, s, v) = rgb_to_hsv(r, g, b);
        hist[bin_index(h, s, v)] += 1.0;
    }

    let norm = hist
        .iter()
        .map(|&c| (c as f64) * (c as f64))
        .sum::<f64>()
        .sqrt();
    if norm > 0.0 {
        for c in hist.iter_mut() {
            *c = (*c as f64 / norm) as f32;
        }
    }
    hist
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn solid(r: u8, g: u8, b: u8) -> RgbImage {
        RgbImage::from_pixel(32, 24, Rgb([r, g, b]))
    }

    #[test]
    fn test_hsv_primaries() {
        assert_eq!(rgb_to_hsv(255, 0, 0), (0, 255, 255));
        assert_eq!(rgb_to_hsv(0, 255, 0), (60, 255, 255));
        assert_eq!(rgb_to_hsv(0, 0, 255), (120, 255, 255));
    }

    #[test]
    fn test_hsv_gray_has_no_saturation() {
        assert_eq!(rgb_to_hsv(128, 128, 128), (0, 0, 128));
        assert_eq!(rgb_to_hsv(0, 0, 0), (0, 0, 0));
    }

    #[test]
    fn test_hsv_hue_near_360_wraps() {
        // Deep magenta-red: hue ~359.5 degrees rounds to 180 half-degrees.
        let (h, _, _) = rgb_to_hsv(255, 0, 1);
        assert!(h < 180);
    }

    #[test]
    fn test_histogram_solid_red_single_bin() {
        let hist = hsv_histogram(&solid(255, 0, 0));
        assert_eq!(hist.len(), EMBEDDING_DIM);
        // h bin 0, s bin 3, v bin 3
        assert_eq!(hist[15], 1.0);
        assert_eq!(hist.iter().filter(|&&c| c != 0.0).count(), 1);
    }

    #[test]
    fn test_histogram_solid_blue_single_bin() {
        let hist = hsv_histogram(&solid(0, 0, 255));
        // hue 120 -> bin 5
        assert_eq!(hist[5 * 16 + 15], 1.0);
    }

    #[test]
    fn test_histogram_is_unit_norm() {
        let mut img = solid(10, 200, 30);
        for x in 0..16 {
            for y in 0..12 {
                img.put_pixel(x, y, Rgb([250, 250, 10]));
            }
        }
        let hist = hsv_histogram(&img);
        let norm: f32 = hist.iter().map(|c| c * c).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5, "norm = {norm}");
    }

    #[test]
    fn test_histogram_empty_image_is_zero() {
        let hist = hsv_histogram(&RgbImage::new(0, 0));
        assert!(hist.iter().all(|&c| c == 0.0));
    }

    #[test]
    fn test_histogram_bit_reproducible() {
        let mut img = solid(0, 0, 0);
        for (i, px) in img.pixels_mut().enumerate() {
            let (r, g, b) = (i * 7 % 256, i * 13 % 256, i * 29 % 256);
            *px = Rgb([r as u8, g as u8, b as u8]);
        }
        let a = hsv_histogram(&img);
        let b = hsv_histogram(&img);
        let a_bits: Vec<u32> = a.iter().map(|v| v.to_bits()).collect();
        let b_bits: Vec<u32> = b.iter().map(|v| v.to_bits()).collect();
        assert_eq!(a_bits, b_bits);
    }
}
