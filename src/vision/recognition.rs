//! Crop and recognition adapter
//!
//! Cuts one region out of the original image, prepares the recognition
//! tensor, runs a recognition handle, and decodes the result.

use image::imageops;
use image::RgbImage;

use super::decode::CtcDecoder;
use super::geometry::CropRect;
use super::models::RecognitionModel;
use super::preprocess;
use crate::config::RecognitionSettings;
use crate::error::RegionError;
use crate::input::PixelBuffer;

/// Stateless apart from its settings; shared by every worker
#[derive(Debug, Clone)]
pub struct RegionRecognizer {
    input_width: u32,
    input_height: u32,
    decoder: CtcDecoder,
}

impl Default for RegionRecognizer {
    fn default() -> Self {
        Self::new(&RecognitionSettings::default())
    }
}

impl RegionRecognizer {
    pub fn new(settings: &RecognitionSettings) -> Self {
        Self {
            input_width: settings.input_width,
            input_height: settings.input_height,
            decoder: CtcDecoder::new(&settings.alphabet),
        }
    }

    /// Copy the region out of `image`, clamped to its bounds.
    ///
    /// An empty intersection is a degenerate region.
    pub fn crop(&self, image: &PixelBuffer, rect: &CropRect, index: usize) -> Result<RgbImage, RegionError> {
        let (x, y, width, height) = rect.clamp_to(image.width(), image.height());
        if width == 0 || height == 0 {
            return Err(RegionError::Degenerate { index, width, height });
        }
        Ok(imageops::crop_imm(image.as_image(), x, y, width, height).to_image())
    }

    /// Recognize the text inside one region
    pub fn recognize(
        &self,
        model: &mut dyn RecognitionModel,
        image: &PixelBuffer,
        rect: &CropRect,
        index: usize,
    ) -> Result<String, RegionError> {
        let crop = self.crop(image, rect, index)?;
        let input = preprocess::prepare_recognition_input(&crop, self.input_width, self.input_height);

        let scores = model.infer(input.view()).map_err(|e| RegionError::Recognition {
            index,
            message: format!("{:#}", e),
        })?;

        let shape = scores.shape();
        if shape[0] == 0 || shape[2] == 0 {
            return Err(RegionError::Recognition {
                index,
                message: format!("empty score tensor {:?}", shape),
            });
        }

        Ok(self.decoder.decode_batch_first(scores.view()))
    }
}
