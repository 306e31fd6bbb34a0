//! Pixel buffer handed to the pipeline

use image::{DynamicImage, RgbImage};

use crate::error::OcrError;

/// Channel order of a [`PixelBuffer`]. Only RGB is stored; other orders are
/// converted on construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOrder {
    Rgb,
    Bgr,
}

/// An immutable height x width x 3 image with 8 bits per channel, RGB order
#[derive(Debug, Clone)]
pub struct PixelBuffer {
    image: RgbImage,
}

impl PixelBuffer {
    /// Wrap an RGB image
    pub fn from_image(image: RgbImage) -> Result<Self, OcrError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(OcrError::input_decode(format!(
                "image has zero extent ({}x{})",
                width, height
            )));
        }
        Ok(Self { image })
    }

    /// Convert any decoded image (gray, RGBA, 16-bit...) to an RGB buffer
    pub fn from_dynamic(image: DynamicImage) -> Result<Self, OcrError> {
        Self::from_image(image.to_rgb8())
    }

    /// Build from raw interleaved bytes in the given channel order
    pub fn from_raw(
        mut data: Vec<u8>,
        width: u32,
        height: u32,
        order: ChannelOrder,
    ) -> Result<Self, OcrError> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(OcrError::input_decode(format!(
                "raw buffer has {} bytes, expected {} for {}x{}x3",
                data.len(),
                expected,
                width,
                height
            )));
        }

        if order == ChannelOrder::Bgr {
            for chunk in data.chunks_exact_mut(3) {
                chunk.swap(0, 2);
            }
        }

        let image = RgbImage::from_raw(width, height, data)
            .ok_or_else(|| OcrError::input_decode("raw buffer does not match dimensions"))?;
        Self::from_image(image)
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Get dimensions as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn channel_order(&self) -> ChannelOrder {
        ChannelOrder::Rgb
    }

    pub fn as_image(&self) -> &RgbImage {
        &self.image
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bgr_is_swapped_to_rgb() {
        let data = vec![10, 20, 30, 40, 50, 60];
        let buffer = PixelBuffer::from_raw(data, 2, 1, ChannelOrder::Bgr).unwrap();
        assert_eq!(buffer.as_image().get_pixel(0, 0).0, [30, 20, 10]);
        assert_eq!(buffer.as_image().get_pixel(1, 0).0, [60, 50, 40]);
        assert_eq!(buffer.channel_order(), ChannelOrder::Rgb);
    }

    #[test]
    fn test_raw_length_mismatch_is_rejected() {
        let result = PixelBuffer::from_raw(vec![0; 5], 2, 1, ChannelOrder::Rgb);
        assert!(matches!(result, Err(OcrError::InputDecode { .. })));
    }

    #[test]
    fn test_zero_extent_is_rejected() {
        let result = PixelBuffer::from_image(RgbImage::new(0, 10));
        assert!(result.is_err());
    }

    #[test]
    fn test_dynamic_gray_becomes_rgb() {
        let gray = image::GrayImage::from_pixel(3, 2, image::Luma([77]));
        let buffer = PixelBuffer::from_dynamic(DynamicImage::ImageLuma8(gray)).unwrap();
        assert_eq!(buffer.dimensions(), (3, 2));
        assert_eq!(buffer.as_image().get_pixel(2, 1).0, [77, 77, 77]);
    }
}
