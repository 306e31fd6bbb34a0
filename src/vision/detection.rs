//! Detection heatmap post-processing
//!
//! Converts the two-channel (text, link) score maps emitted by the detection
//! model into oriented candidate boxes:
//! 1. binarize both channels and label the 4-connected components of their union
//! 2. drop small components and components whose peak text score is too low
//! 3. remove link-only pixels, dilate, and fit a minimum-area rectangle
//! 4. apply diamond correction and clockwise ordering

use image::{GrayImage, ImageBuffer, Luma};
use imageproc::region_labelling::{connected_components, Connectivity};
use ndarray::{Array2, ArrayView4, Axis};
use tracing::debug;

use super::geometry::{self, OrientedBox, Point};
use crate::config::DetectionSettings;
use crate::error::OcrError;

/// One channel of the detection heatmap, indexed `[y, x]`
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreMap {
    scores: Array2<f32>,
}

impl ScoreMap {
    pub fn new(scores: Array2<f32>) -> Self {
        Self { scores }
    }

    pub fn zeros(width: usize, height: usize) -> Self {
        Self::new(Array2::zeros((height, width)))
    }

    pub fn width(&self) -> usize {
        self.scores.ncols()
    }

    pub fn height(&self) -> usize {
        self.scores.nrows()
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.scores[[y, x]]
    }

    pub fn set(&mut self, x: usize, y: usize, value: f32) {
        self.scores[[y, x]] = value;
    }

    /// 1 where the score is strictly above `threshold`, else 0
    pub fn binarize(&self, threshold: f32) -> Array2<u8> {
        self.scores.mapv(|v| u8::from(v > threshold))
    }
}

/// The text and link score maps produced by one detection pass
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionHeatmap {
    pub text: ScoreMap,
    pub link: ScoreMap,
}

impl DetectionHeatmap {
    pub fn new(text: ScoreMap, link: ScoreMap) -> Result<Self, OcrError> {
        if text.scores.dim() != link.scores.dim() {
            return Err(OcrError::detection(format!(
                "text map {:?} and link map {:?} differ in shape",
                text.scores.dim(),
                link.scores.dim()
            )));
        }
        Ok(Self { text, link })
    }

    pub fn zeros(width: usize, height: usize) -> Self {
        Self {
            text: ScoreMap::zeros(width, height),
            link: ScoreMap::zeros(width, height),
        }
    }

    pub fn width(&self) -> usize {
        self.text.width()
    }

    pub fn height(&self) -> usize {
        self.text.height()
    }

    /// Split a `[1, H, W, 2]` (channels-last) or `[1, 2, H, W]` model output
    /// into text (channel 0) and link (channel 1) maps.
    ///
    /// `[1, 2, H, W]` with `W != 2` is channels-first. A shape with 2 in both
    /// positions is read channels-last, the CRAFT export layout.
    pub fn from_model_output(output: ArrayView4<f32>) -> Result<Self, OcrError> {
        let shape = output.shape();
        if shape[0] != 1 {
            return Err(OcrError::detection(format!(
                "expected a batch of 1 heatmap, got shape {:?}",
                shape
            )));
        }

        let channel_axis = match (shape[1], shape[3]) {
            (2, c) if c != 2 => Axis(0),
            (_, 2) => Axis(2),
            _ => {
                return Err(OcrError::detection(format!(
                    "heatmap output must carry 2 channels, got shape {:?}",
                    shape
                )))
            }
        };

        let sample = output.index_axis(Axis(0), 0);
        let text = sample.index_axis(channel_axis, 0).to_owned();
        let link = sample.index_axis(channel_axis, 1).to_owned();

        Self::new(ScoreMap::new(text), ScoreMap::new(link))
    }
}

/// Bounding statistics of one connected component
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComponentStats {
    pub label: u32,
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
    /// Pixel count
    pub area: u32,
    /// Highest text-channel score among the component's pixels
    pub max_text: f32,
}

/// Label map of the thresholded heatmap; label 0 is background
#[derive(Debug, Clone)]
pub struct ComponentLabels {
    labels: ImageBuffer<Luma<u32>, Vec<u32>>,
    stats: Vec<ComponentStats>,
}

impl ComponentLabels {
    /// Label the non-zero pixels of `mask` with 4-connectivity and gather
    /// per-component stats, ordered by ascending label
    pub fn compute(mask: &GrayImage, text: &ScoreMap) -> Self {
        let labels = connected_components(mask, Connectivity::Four, Luma([0u8]));

        // label -> (min_x, min_y, max_x, max_y, area, max_text)
        let mut acc: Vec<(u32, u32, u32, u32, u32, f32)> = Vec::new();
        for (x, y, pixel) in labels.enumerate_pixels() {
            let label = pixel[0];
            if label == 0 {
                continue;
            }
            let slot = label as usize - 1;
            if acc.len() <= slot {
                acc.resize(slot + 1, (u32::MAX, u32::MAX, 0, 0, 0, f32::MIN));
            }
            let entry = &mut acc[slot];
            entry.0 = entry.0.min(x);
            entry.1 = entry.1.min(y);
            entry.2 = entry.2.max(x);
            entry.3 = entry.3.max(y);
            entry.4 += 1;
            entry.5 = entry.5.max(text.get(x as usize, y as usize));
        }

        let stats = acc
            .into_iter()
            .enumerate()
            .filter(|(_, e)| e.4 > 0)
            .map(|(i, (x0, y0, x1, y1, area, max_text))| ComponentStats {
                label: i as u32 + 1,
                left: x0,
                top: y0,
                width: x1 - x0 + 1,
                height: y1 - y0 + 1,
                area,
                max_text,
            })
            .collect();

        Self { labels, stats }
    }

    #[inline]
    pub fn label_at(&self, x: u32, y: u32) -> u32 {
        self.labels.get_pixel(x, y)[0]
    }

    pub fn stats(&self) -> &[ComponentStats] {
        &self.stats
    }

    pub fn count(&self) -> usize {
        self.stats.len()
    }
}

/// Thresholds applied to the heatmap
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub text_threshold: f32,
    pub link_threshold: f32,
    pub low_text: f32,
    pub min_area: u32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self::from(&DetectionSettings::default())
    }
}

impl From<&DetectionSettings> for Thresholds {
    fn from(settings: &DetectionSettings) -> Self {
        Self {
            text_threshold: settings.text_threshold,
            link_threshold: settings.link_threshold,
            low_text: settings.low_text,
            min_area: settings.min_area,
        }
    }
}

/// A surviving component turned into a box in heatmap coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateRegion {
    /// Detection index: position among surviving components in label order
    pub index: usize,
    /// Component label in the label map
    pub label: u32,
    pub bounds: OrientedBox,
}

/// Turns a [`DetectionHeatmap`] into ordered candidate boxes
#[derive(Debug, Clone, Default)]
pub struct HeatmapPostProcessor {
    thresholds: Thresholds,
}

impl HeatmapPostProcessor {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    /// Extract candidate boxes, ordered by ascending component label
    pub fn process(&self, heatmap: &DetectionHeatmap) -> Vec<CandidateRegion> {
        let (width, height) = (heatmap.width(), heatmap.height());
        if width == 0 || height == 0 {
            return Vec::new();
        }

        let text_mask = heatmap.text.binarize(self.thresholds.low_text);
        let link_mask = heatmap.link.binarize(self.thresholds.link_threshold);

        let union = GrayImage::from_fn(width as u32, height as u32, |x, y| {
            let (x, y) = (x as usize, y as usize);
            Luma([(text_mask[[y, x]] | link_mask[[y, x]]).min(1)])
        });

        let components = ComponentLabels::compute(&union, &heatmap.text);
        debug!("Heatmap {}x{}: {} components", width, height, components.count());

        let mut candidates = Vec::new();
        for stats in components.stats() {
            if stats.area < self.thresholds.min_area {
                continue;
            }
            if stats.max_text < self.thresholds.text_threshold {
                continue;
            }

            let foreground = self.segment(stats, &components, &text_mask, &link_mask);
            if foreground.is_empty() {
                debug!("Component {} has no text pixels after link removal", stats.label);
                continue;
            }

            let fitted = geometry::min_area_rect(&foreground).to_box();
            let bounds = geometry::correct_diamond(fitted, &foreground).canonicalize();

            candidates.push(CandidateRegion {
                index: candidates.len(),
                label: stats.label,
                bounds,
            });
        }

        debug!("{} candidate regions survived post-processing", candidates.len());
        candidates
    }

    /// Segmentation mask of one component with link-only pixels removed,
    /// dilated within its expanded bounding window. Returns the foreground
    /// pixel coordinates in heatmap space.
    fn segment(
        &self,
        stats: &ComponentStats,
        components: &ComponentLabels,
        text_mask: &Array2<u8>,
        link_mask: &Array2<u8>,
    ) -> Vec<Point> {
        let (img_h, img_w) = text_mask.dim();
        let (x, y, w, h) = (
            stats.left as usize,
            stats.top as usize,
            stats.width as usize,
            stats.height as usize,
        );

        let niter = dilation_iterations(stats.area, stats.width, stats.height);
        let sx = x.saturating_sub(niter);
        let sy = y.saturating_sub(niter);
        let ex = (x + w + niter + 1).min(img_w);
        let ey = (y + h + niter + 1).min(img_h);

        let mut window = Array2::<u8>::zeros((ey - sy, ex - sx));
        for gy in y..y + h {
            for gx in x..x + w {
                if components.label_at(gx as u32, gy as u32) != stats.label {
                    continue;
                }
                let link_only = link_mask[[gy, gx]] == 1 && text_mask[[gy, gx]] == 0;
                if !link_only {
                    window[[gy - sy, gx - sx]] = 1;
                }
            }
        }

        let dilated = dilate_rect(&window, 1 + niter);

        dilated
            .indexed_iter()
            .filter(|(_, v)| **v != 0)
            .map(|((wy, wx), _)| Point::new((wx + sx) as f32, (wy + sy) as f32))
            .collect()
    }
}

/// `floor(sqrt(area * min(w, h) / (w * h)) * 2)`
pub fn dilation_iterations(area: u32, width: u32, height: u32) -> usize {
    if width == 0 || height == 0 {
        return 0;
    }
    let (w, h) = (width as f64, height as f64);
    ((area as f64 * w.min(h) / (w * h)).sqrt() * 2.0) as usize
}

/// Binary dilation with a `size x size` square element anchored at
/// `size / 2`, matching OpenCV's `dilate`: the anchor is reflected, so an
/// even-sized element reaches one pixel further toward lower coordinates.
/// Pixels outside the mask do not contribute.
///
/// The square element is separable, so it runs as a row pass followed by a
/// column pass.
pub fn dilate_rect(mask: &Array2<u8>, size: usize) -> Array2<u8> {
    if size <= 1 {
        return mask.clone();
    }
    let anchor = size / 2;
    let (rows, cols) = mask.dim();

    let max_along = |len: usize, at: usize, get: &dyn Fn(usize) -> u8| -> u8 {
        let lo = at.saturating_sub(size - 1 - anchor);
        let hi = (at + anchor).min(len.saturating_sub(1));
        (lo..=hi).map(get).max().unwrap_or(0)
    };

    let mut horizontal = Array2::<u8>::zeros((rows, cols));
    for r in 0..rows {
        for c in 0..cols {
            horizontal[[r, c]] = max_along(cols, c, &|i| mask[[r, i]]);
        }
    }

    let mut out = Array2::<u8>::zeros((rows, cols));
    for r in 0..rows {
        for c in 0..cols {
            out[[r, c]] = max_along(rows, r, &|i| horizontal[[i, c]]);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    /// Paint a rectangle of text score into the heatmap
    fn paint(map: &mut ScoreMap, x0: usize, y0: usize, w: usize, h: usize, value: f32) {
        for y in y0..y0 + h {
            for x in x0..x0 + w {
                map.set(x, y, value);
            }
        }
    }

    #[test]
    fn test_all_zero_heatmap_has_no_candidates() {
        let heatmap = DetectionHeatmap::zeros(64, 48);
        let candidates = HeatmapPostProcessor::default().process(&heatmap);
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_component_below_min_area_is_discarded() {
        let mut heatmap = DetectionHeatmap::zeros(40, 40);
        paint(&mut heatmap.text, 10, 10, 3, 3, 0.95);

        let candidates = HeatmapPostProcessor::default().process(&heatmap);
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_component_above_min_area_survives_and_grows() {
        let mut heatmap = DetectionHeatmap::zeros(40, 40);
        paint(&mut heatmap.text, 10, 12, 4, 5, 0.95);

        let candidates = HeatmapPostProcessor::default().process(&heatmap);
        assert_eq!(candidates.len(), 1);

        let candidate = &candidates[0];
        assert_eq!(candidate.index, 0);
        assert!(candidate.bounds.area() >= 20.0, "area {}", candidate.bounds.area());
        assert!(candidate.bounds.is_clockwise());
        // dilation by niter = 4 with a 5x5 element grows the block by 2 per side
        let (l, t, r, b) = geometry::bounds(&candidate.bounds.points).unwrap();
        for (got, want) in [(l, 8.0), (t, 10.0), (r, 15.0), (b, 18.0)] {
            assert!((got - want).abs() < 1e-3, "{} != {}", got, want);
        }
        let p0 = candidate.bounds.points[0];
        assert!((p0.x - 8.0).abs() < 1e-3 && (p0.y - 10.0).abs() < 1e-3);
    }

    #[test]
    fn test_low_peak_score_is_discarded() {
        let mut heatmap = DetectionHeatmap::zeros(40, 40);
        paint(&mut heatmap.text, 5, 5, 10, 4, 0.6);

        let candidates = HeatmapPostProcessor::default().process(&heatmap);
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_link_bridge_joins_words_but_is_removed() {
        let mut heatmap = DetectionHeatmap::zeros(60, 20);
        paint(&mut heatmap.text, 5, 5, 8, 6, 0.9);
        paint(&mut heatmap.text, 30, 5, 8, 6, 0.9);
        // link-only bridge between the two words
        paint(&mut heatmap.link, 13, 7, 17, 2, 0.8);

        let processor = HeatmapPostProcessor::default();
        let candidates = processor.process(&heatmap);
        assert_eq!(candidates.len(), 1, "bridge should merge both words");

        let text_mask = heatmap.text.binarize(0.4);
        let link_mask = heatmap.link.binarize(0.4);
        let union = GrayImage::from_fn(60, 20, |x, y| {
            let (x, y) = (x as usize, y as usize);
            Luma([text_mask[[y, x]] | link_mask[[y, x]]])
        });
        let components = ComponentLabels::compute(&union, &heatmap.text);
        assert_eq!(components.count(), 1);
        // the middle of the bridge is farther than the dilation reach from either word
        let stats = components.stats()[0];
        let pixels = processor.segment(&stats, &components, &text_mask, &link_mask);
        assert!(!pixels.iter().any(|p| p.x == 21.0 && p.y == 7.0));
    }

    #[test]
    fn test_multiple_components_keep_label_order() {
        let mut heatmap = DetectionHeatmap::zeros(80, 60);
        paint(&mut heatmap.text, 50, 5, 12, 4, 0.9); // first in raster order
        paint(&mut heatmap.text, 5, 30, 12, 4, 0.9);
        paint(&mut heatmap.text, 40, 45, 2, 2, 0.9); // too small

        let candidates = HeatmapPostProcessor::default().process(&heatmap);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].index, 0);
        assert_eq!(candidates[1].index, 1);
        assert!(candidates[0].label < candidates[1].label);
        assert!(candidates[0].bounds.points[0].y < 10.0);
        assert!(candidates[1].bounds.points[0].y > 20.0);
    }

    #[test]
    fn test_square_blob_is_axis_aligned() {
        let mut heatmap = DetectionHeatmap::zeros(40, 40);
        for y in 10..=20i32 {
            for x in 10..=20i32 {
                if (x - 15).abs() + (y - 15).abs() <= 5 {
                    heatmap.text.set(x as usize, y as usize, 0.9);
                }
            }
        }

        let candidates = HeatmapPostProcessor::default().process(&heatmap);
        assert_eq!(candidates.len(), 1);
        let [p0, p1, p2, p3] = candidates[0].bounds.points;
        assert_eq!(p0.y, p1.y);
        assert_eq!(p1.x, p2.x);
        assert_eq!(p2.y, p3.y);
        assert_eq!(p3.x, p0.x);
        assert!(p0.x <= 10.0 && p0.y <= 10.0 && p2.x >= 20.0 && p2.y >= 20.0);
    }

    #[test]
    fn test_dilation_iterations() {
        assert_eq!(dilation_iterations(20, 4, 5), 4);
        assert_eq!(dilation_iterations(100, 50, 2), 2);
        assert_eq!(dilation_iterations(10, 0, 5), 0);
    }

    #[test]
    fn test_dilate_rect_even_size_is_asymmetric() {
        let mut mask = Array2::<u8>::zeros((5, 5));
        mask[[2, 2]] = 1;
        // size 2: a pixel spreads one step up and left
        let out = dilate_rect(&mask, 2);
        assert_eq!(out[[2, 2]], 1);
        assert_eq!(out[[1, 1]], 1);
        assert_eq!(out[[1, 2]], 1);
        assert_eq!(out[[2, 1]], 1);
        assert_eq!(out[[3, 3]], 0);
        assert_eq!(out.iter().filter(|v| **v == 1).count(), 4);
    }

    #[test]
    fn test_from_model_output_channels_last() {
        let mut output = Array4::<f32>::zeros((1, 3, 4, 2));
        output[[0, 1, 2, 0]] = 0.8;
        output[[0, 2, 3, 1]] = 0.5;

        let heatmap = DetectionHeatmap::from_model_output(output.view()).unwrap();
        assert_eq!((heatmap.width(), heatmap.height()), (4, 3));
        assert_eq!(heatmap.text.get(2, 1), 0.8);
        assert_eq!(heatmap.link.get(3, 2), 0.5);
    }

    #[test]
    fn test_from_model_output_channels_first() {
        let mut output = Array4::<f32>::zeros((1, 2, 3, 4));
        output[[0, 0, 1, 2]] = 0.8;
        output[[0, 1, 2, 3]] = 0.5;

        let heatmap = DetectionHeatmap::from_model_output(output.view()).unwrap();
        assert_eq!((heatmap.width(), heatmap.height()), (4, 3));
        assert_eq!(heatmap.text.get(2, 1), 0.8);
        assert_eq!(heatmap.link.get(3, 2), 0.5);
        assert_eq!(heatmap.text.get(3, 2), 0.0);
    }

    #[test]
    fn test_from_model_output_two_by_two_reads_channels_last() {
        let mut output = Array4::<f32>::zeros((1, 2, 5, 2));
        output[[0, 1, 4, 1]] = 0.9;

        let heatmap = DetectionHeatmap::from_model_output(output.view()).unwrap();
        assert_eq!((heatmap.width(), heatmap.height()), (5, 2));
        assert_eq!(heatmap.link.get(4, 1), 0.9);
    }

    #[test]
    fn test_from_model_output_rejects_bad_shape() {
        let output = Array4::<f32>::zeros((1, 3, 4, 5));
        assert!(DetectionHeatmap::from_model_output(output.view()).is_err());

        let output = Array4::<f32>::zeros((2, 3, 4, 2));
        assert!(DetectionHeatmap::from_model_output(output.view()).is_err());
    }
}
