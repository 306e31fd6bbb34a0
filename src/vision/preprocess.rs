//! Image preprocessing for the detection and recognition models
//!
//! Handles resizing, normalization, and tensor conversion.

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, RgbImage};
use ndarray::{Array2, Array3, Array4, Axis};

/// ImageNet channel means, in 0-255 pixel units
pub const DETECTION_MEAN: [f32; 3] = [0.485 * 255.0, 0.456 * 255.0, 0.406 * 255.0];
/// ImageNet channel standard deviations, in 0-255 pixel units
pub const DETECTION_STD: [f32; 3] = [0.229 * 255.0, 0.224 * 255.0, 0.225 * 255.0];

/// Convert an RGB image to an HWC f32 array holding raw 0-255 values
pub fn rgb_to_f32(image: &RgbImage) -> Array3<f32> {
    let (w, h) = image.dimensions();
    Array3::from_shape_fn((h as usize, w as usize, 3), |(y, x, c)| {
        image.get_pixel(x as u32, y as u32)[c] as f32
    })
}

/// Normalize image with mean and std
pub fn normalize(image: &Array3<f32>, mean: &[f32; 3], std: &[f32; 3]) -> Array3<f32> {
    let (h, w, _) = image.dim();
    let mut normalized = Array3::<f32>::zeros((h, w, 3));

    for y in 0..h {
        for x in 0..w {
            for c in 0..3 {
                normalized[[y, x, c]] = (image[[y, x, c]] - mean[c]) / std[c];
            }
        }
    }

    normalized
}

/// Convert HWC image to NCHW tensor (batch size 1)
pub fn hwc_to_nchw(image: &Array3<f32>) -> Array4<f32> {
    let (h, w, c) = image.dim();
    let mut tensor = Array4::<f32>::zeros((1, c, h, w));

    for y in 0..h {
        for x in 0..w {
            for ch in 0..c {
                tensor[[0, ch, y, x]] = image[[y, x, ch]];
            }
        }
    }

    tensor
}

/// Resize to the fixed detection input size (bilinear), normalize with the
/// ImageNet statistics and lay out as `[1, 3, H, W]`
pub fn prepare_detection_input(image: &RgbImage, width: u32, height: u32) -> Array4<f32> {
    let resized = imageops::resize(image, width, height, FilterType::Triangle);
    let normalized = normalize(&rgb_to_f32(&resized), &DETECTION_MEAN, &DETECTION_STD);
    hwc_to_nchw(&normalized)
}

/// Single-channel luminance with BT.601 weights
pub fn to_grayscale(image: &RgbImage) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let [r, g, b] = image.get_pixel(x, y).0;
        let luma = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
        Luma([luma.round().clamp(0.0, 255.0) as u8])
    })
}

/// Grayscale, map `[0, 255]` to `[-1, 1]`, then resize (bicubic, in float)
/// to the recognition input size, laid out as `[1, 1, H, W]`
pub fn prepare_recognition_input(crop: &RgbImage, width: u32, height: u32) -> Array4<f32> {
    let gray = to_grayscale(crop);
    let normalized = Array2::from_shape_fn((gray.height() as usize, gray.width() as usize), |(y, x)| {
        gray.get_pixel(x as u32, y as u32)[0] as f32 / 127.5 - 1.0
    });

    let resized = resize_cubic(&normalized, width as usize, height as usize);
    resized.insert_axis(Axis(0)).insert_axis(Axis(0))
}

const CUBIC_A: f32 = -0.75;

/// Bicubic resize of a float plane without clamping, following OpenCV's
/// `INTER_CUBIC`: half-pixel centers, `a = -0.75`, replicated borders.
pub fn resize_cubic(src: &Array2<f32>, width: usize, height: usize) -> Array2<f32> {
    let (src_h, src_w) = src.dim();
    if src_h == 0 || src_w == 0 || width == 0 || height == 0 {
        return Array2::zeros((height, width));
    }

    let cols = cubic_taps(src_w, width);
    let rows = cubic_taps(src_h, height);

    // horizontal pass, then vertical
    let mut horizontal = Array2::<f32>::zeros((src_h, width));
    for y in 0..src_h {
        for (x, (idx, w)) in cols.iter().enumerate() {
            horizontal[[y, x]] = (0..4).map(|k| src[[y, idx[k]]] * w[k]).sum::<f32>();
        }
    }

    let mut out = Array2::<f32>::zeros((height, width));
    for (y, (idx, w)) in rows.iter().enumerate() {
        for x in 0..width {
            out[[y, x]] = (0..4).map(|k| horizontal[[idx[k], x]] * w[k]).sum::<f32>();
        }
    }
    out
}

/// Source indices and weights of the four taps for each output position
fn cubic_taps(src_len: usize, dst_len: usize) -> Vec<([usize; 4], [f32; 4])> {
    let scale = src_len as f32 / dst_len as f32;
    let last = src_len as isize - 1;

    (0..dst_len)
        .map(|d| {
            let pos = (d as f32 + 0.5) * scale - 0.5;
            let base = pos.floor();
            let t = pos - base;
            let base = base as isize;

            let mut idx = [0usize; 4];
            for (k, slot) in idx.iter_mut().enumerate() {
                *slot = (base - 1 + k as isize).clamp(0, last) as usize;
            }
            (idx, cubic_weights(t))
        })
        .collect()
}

fn cubic_weights(t: f32) -> [f32; 4] {
    let a = CUBIC_A;
    let w0 = ((a * (t + 1.0) - 5.0 * a) * (t + 1.0) + 8.0 * a) * (t + 1.0) - 4.0 * a;
    let w1 = ((a + 2.0) * t - (a + 3.0)) * t * t + 1.0;
    let w2 = ((a + 2.0) * (1.0 - t) - (a + 3.0)) * (1.0 - t) * (1.0 - t) + 1.0;
    [w0, w1, w2, 1.0 - w0 - w1 - w2]
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_hwc_to_nchw() {
        let hwc = Array3::<f32>::from_shape_fn((10, 20, 3), |(h, w, c)| {
            (h * 100 + w * 10 + c) as f32
        });

        let nchw = hwc_to_nchw(&hwc);

        assert_eq!(nchw.dim(), (1, 3, 10, 20));
        assert_eq!(nchw[[0, 1, 5, 10]], hwc[[5, 10, 1]]);
    }

    #[test]
    fn test_normalize() {
        let image = Array3::<f32>::from_elem((2, 2, 3), 0.5);
        let mean = [0.485, 0.456, 0.406];
        let std = [0.229, 0.224, 0.225];

        let normalized = normalize(&image, &mean, &std);

        assert!((normalized[[0, 0, 0]] - (0.5 - 0.485) / 0.229).abs() < 0.01);
    }

    #[test]
    fn test_detection_input_shape_and_values() {
        let image = RgbImage::from_pixel(37, 21, Rgb([124, 116, 104]));
        let tensor = prepare_detection_input(&image, 60, 80);

        assert_eq!(tensor.dim(), (1, 3, 80, 60));
        // a flat image at roughly the mean normalizes to roughly zero
        for c in 0..3 {
            assert!(tensor[[0, c, 40, 30]].abs() < 0.05, "channel {}", c);
        }
    }

    #[test]
    fn test_recognition_input_range() {
        let crop = RgbImage::from_pixel(50, 10, Rgb([0, 0, 0]));
        let tensor = prepare_recognition_input(&crop, 100, 32);
        assert_eq!(tensor.dim(), (1, 1, 32, 100));
        assert!(tensor.iter().all(|v| (*v + 1.0).abs() < 1e-5));

        let crop = RgbImage::from_pixel(50, 10, Rgb([255, 255, 255]));
        let tensor = prepare_recognition_input(&crop, 100, 32);
        assert!(tensor.iter().all(|v| (*v - 1.0).abs() < 1e-5));
    }

    #[test]
    fn test_recognition_resize_keeps_cubic_overshoot() {
        let mut crop = RgbImage::from_pixel(50, 10, Rgb([255, 255, 255]));
        for x in 0..25 {
            for y in 0..10 {
                crop.put_pixel(x, y, Rgb([0, 0, 0]));
            }
        }

        let tensor = prepare_recognition_input(&crop, 100, 32);
        assert!((tensor[[0, 0, 16, 5]] + 1.0).abs() < 1e-5);
        assert!((tensor[[0, 0, 16, 95]] - 1.0).abs() < 1e-5);
        // ringing at the edge leaves [-1, 1] on both sides
        let row = tensor.slice(ndarray::s![0, 0, 16, ..]);
        assert!(row.iter().any(|v| *v < -1.0));
        assert!(row.iter().any(|v| *v > 1.0));
    }

    #[test]
    fn test_resize_cubic_weights_sum_to_one() {
        for t in [0.0, 0.25, 0.5, 0.9] {
            let w = cubic_weights(t);
            assert!((w.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        }
        assert_eq!(cubic_weights(0.0), [0.0, 1.0, 0.0, 0.0]);

        // same size is the identity
        let plane = Array2::from_shape_fn((3, 4), |(y, x)| (y * 4 + x) as f32 * 0.1 - 0.5);
        let out = resize_cubic(&plane, 4, 3);
        for (a, b) in plane.iter().zip(out.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_grayscale_weights() {
        let image = RgbImage::from_pixel(1, 1, Rgb([255, 0, 0]));
        assert_eq!(to_grayscale(&image).get_pixel(0, 0)[0], 76);
    }
}
