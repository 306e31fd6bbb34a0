//! Draws recognized regions onto a copy of the input image

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use super::ocr::OcrResult;
use crate::input::PixelBuffer;

/// Regions with a label
pub const LABELED_COLOR: Rgb<u8> = Rgb([0, 200, 0]);
/// Regions recognized as empty (or failed)
pub const EMPTY_COLOR: Rgb<u8> = Rgb([230, 40, 40]);

/// Outline every region box with a 2-pixel border
pub fn draw_regions(image: &PixelBuffer, result: &OcrResult) -> RgbImage {
    let mut output = image.as_image().clone();

    for region in &result.boxes {
        let [[x0, y0], [x1, y1]] = region.bounds;
        let (w, h) = ((x1 - x0).max(0) as u32, (y1 - y0).max(0) as u32);
        if w == 0 || h == 0 {
            continue;
        }

        let color = if region.label.is_empty() { EMPTY_COLOR } else { LABELED_COLOR };
        draw_hollow_rect_mut(&mut output, Rect::at(x0, y0).of_size(w, h), color);

        // Inner border for visibility
        if w > 2 && h > 2 {
            draw_hollow_rect_mut(&mut output, Rect::at(x0 + 1, y0 + 1).of_size(w - 2, h - 2), color);
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::ocr::RegionLabel;

    #[test]
    fn test_draws_two_pixel_border() {
        let page = PixelBuffer::from_image(RgbImage::from_pixel(30, 20, Rgb([255, 255, 255]))).unwrap();
        let result = OcrResult {
            final_text: "hi".to_string(),
            boxes: vec![
                RegionLabel { bounds: [[5, 5], [15, 12]], label: "hi".to_string() },
                RegionLabel { bounds: [[20, 2], [20, 9]], label: String::new() },
            ],
        };

        let out = draw_regions(&page, &result);
        assert_eq!(*out.get_pixel(5, 5), LABELED_COLOR);
        assert_eq!(*out.get_pixel(6, 6), LABELED_COLOR);
        assert_eq!(*out.get_pixel(14, 11), LABELED_COLOR);
        assert_eq!(*out.get_pixel(9, 8), Rgb([255, 255, 255]));
        // zero-width box is skipped
        assert_eq!(*out.get_pixel(20, 5), Rgb([255, 255, 255]));
        // input untouched
        assert_eq!(*page.as_image().get_pixel(5, 5), Rgb([255, 255, 255]));
    }

    #[test]
    fn test_boxes_outside_image_do_not_panic() {
        let page = PixelBuffer::from_image(RgbImage::from_pixel(10, 10, Rgb([0, 0, 0]))).unwrap();
        let result = OcrResult {
            final_text: String::new(),
            boxes: vec![RegionLabel { bounds: [[-5, -5], [40, 40]], label: String::new() }],
        };
        let out = draw_regions(&page, &result);
        assert_eq!(out.dimensions(), (10, 10));
    }
}
