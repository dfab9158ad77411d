// Copyright (C) 2023 Dheatly23
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Region gating: restricts a scramble to detected boxes or a mask.

use std::cmp::Ordering;

use ndarray::prelude::*;
use ndarray::Zip;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::buffer::Image;
use crate::error::Result;
use crate::options::{BackgroundMode, FaceDetectionOptions};

/// Overlap above which the weaker of two boxes is discarded.
pub const NMS_IOU_THRESHOLD: f32 = 0.5;

/// Axis-aligned box in pixel coordinates; `x2`/`y2` are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
    pub confidence: f32,
}

impl FaceBox {
    pub fn new(x1: u32, y1: u32, x2: u32, y2: u32, confidence: f32) -> Self {
        Self {
            x1,
            y1,
            x2,
            y2,
            confidence,
        }
    }

    pub fn width(&self) -> u32 {
        self.x2.saturating_sub(self.x1)
    }

    pub fn height(&self) -> u32 {
        self.y2.saturating_sub(self.y1)
    }

    pub fn area(&self) -> f32 {
        self.width() as f32 * self.height() as f32
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Clips the box to a `width`×`height` canvas.
    pub fn clip(&self, width: u32, height: u32) -> Self {
        Self {
            x1: self.x1.min(width),
            y1: self.y1.min(height),
            x2: self.x2.min(width),
            y2: self.y2.min(height),
            confidence: self.confidence,
        }
    }

    /// Grows every side by `size * (factor - 1) / 2`, clamped to the canvas.
    pub fn expand(&self, factor: f32, max_width: u32, max_height: u32) -> Self {
        let grow_x = (self.width() as f32 * (factor - 1.0) / 2.0) as u32;
        let grow_y = (self.height() as f32 * (factor - 1.0) / 2.0) as u32;
        Self {
            x1: self.x1.saturating_sub(grow_x),
            y1: self.y1.saturating_sub(grow_y),
            x2: self.x2.saturating_add(grow_x).min(max_width),
            y2: self.y2.saturating_add(grow_y).min(max_height),
            confidence: self.confidence,
        }
    }

    /// Intersection over union.
    pub fn iou(&self, other: &FaceBox) -> f32 {
        let left = self.x1.max(other.x1);
        let top = self.y1.max(other.y1);
        let right = self.x2.min(other.x2);
        let bottom = self.y2.min(other.y2);
        if right <= left || bottom <= top {
            return 0.0;
        }
        let inter = (right - left) as f32 * (bottom - top) as f32;
        inter / (self.area() + other.area() - inter)
    }
}

/// External face detector.
pub trait FaceDetector: Send + Sync {
    /// Returns raw candidate boxes for `img`, unfiltered.
    fn detect(&self, img: &Image) -> Result<Vec<FaceBox>>;
}

/// Detector that reports a fixed list of boxes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticBoxes(pub Vec<FaceBox>);

impl FaceDetector for StaticBoxes {
    fn detect(&self, _img: &Image) -> Result<Vec<FaceBox>> {
        Ok(self.0.clone())
    }
}

/// Thresholds, expands, and de-duplicates raw detections.
///
/// Result is ordered by descending confidence.
pub fn select_regions(
    boxes: &[FaceBox],
    opts: &FaceDetectionOptions,
    width: u32,
    height: u32,
) -> Vec<FaceBox> {
    let mut candidates: Vec<FaceBox> = boxes
        .iter()
        .filter(|b| b.confidence >= opts.confidence_threshold)
        .map(|b| b.clip(width, height).expand(opts.expansion_factor, width, height))
        .filter(|b| !b.is_empty())
        .collect();
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });

    let mut kept: Vec<FaceBox> = Vec::with_capacity(candidates.len());
    for b in candidates {
        if kept.iter().all(|k| k.iou(&b) <= NMS_IOU_THRESHOLD) {
            kept.push(b);
        }
    }
    trace!(raw = boxes.len(), kept = kept.len(), "face regions selected");
    kept
}

/// Per-pixel selection plus the rectangles that cover it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionMask {
    mask: Array2<bool>,
    /// `(x, y, w, h)` rectangles, processed independently.
    rects: Vec<(usize, usize, usize, usize)>,
}

impl RegionMask {
    /// Selects the whole canvas.
    pub fn full(width: usize, height: usize) -> Self {
        Self {
            mask: Array2::from_elem((height, width), true),
            rects: vec![(0, 0, width, height)],
        }
    }

    /// Union of `boxes`, each box one rectangle.
    pub fn from_boxes(width: usize, height: usize, boxes: &[FaceBox]) -> Self {
        let mut mask = Array2::from_elem((height, width), false);
        let mut rects = Vec::new();
        for b in boxes {
            let b = b.clip(width as u32, height as u32);
            if b.is_empty() {
                continue;
            }
            let (x, y, w, h) = (
                b.x1 as usize,
                b.y1 as usize,
                b.width() as usize,
                b.height() as usize,
            );
            mask.slice_mut(s![y..y + h, x..x + w]).fill(true);
            rects.push((x, y, w, h));
        }
        Self { mask, rects }
    }

    /// Anything darker than white is selected; pixels at 254 or above are left alone.
    pub fn from_image(img: &Image) -> Self {
        let colors = img.color_channels();
        let mask = img
            .view()
            .lanes(Axis(2))
            .into_iter()
            .map(|px| px.iter().take(colors).map(|&v| v as u32).sum::<u32>() < 254 * colors as u32)
            .collect::<Array1<bool>>()
            .into_shape((img.height(), img.width()))
            .expect("Mask has one entry per pixel");
        Self::from_array(mask)
    }

    /// Wraps an arbitrary boolean mask, covered by its bounding box.
    pub fn from_array(mask: Array2<bool>) -> Self {
        let mut bounds: Option<(usize, usize, usize, usize)> = None;
        for ((y, x), &v) in mask.indexed_iter() {
            if v {
                let (x0, y0, x1, y1) = bounds.unwrap_or((x, y, x, y));
                bounds = Some((x0.min(x), y0.min(y), x1.max(x), y1.max(y)));
            }
        }
        let rects = bounds
            .map(|(x0, y0, x1, y1)| vec![(x0, y0, x1 - x0 + 1, y1 - y0 + 1)])
            .unwrap_or_default();
        Self { mask, rects }
    }

    pub fn view(&self) -> ArrayView2<'_, bool> {
        self.mask.view()
    }

    pub fn width(&self) -> usize {
        self.mask.ncols()
    }

    pub fn height(&self) -> usize {
        self.mask.nrows()
    }

    pub fn rects(&self) -> &[(usize, usize, usize, usize)] {
        &self.rects
    }

    /// Number of selected pixels.
    pub fn count(&self) -> usize {
        self.mask.iter().filter(|&&v| v).count()
    }

    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    pub fn contains(&self, x: usize, y: usize) -> bool {
        self.mask.get((y, x)).copied().unwrap_or(false)
    }
}

/// Copies `src` into `dst` wherever `mask` is set.
pub fn composite(dst: &mut Image, src: &Image, mask: ArrayView2<'_, bool>) {
    Zip::from(dst.view_mut().lanes_mut(Axis(2)))
        .and(src.view().lanes(Axis(2)))
        .and(mask)
        .for_each(|mut d, s, &m| {
            if m {
                d.assign(&s);
            }
        });
}

/// Runs `scramble` on each rectangle of `region` and composites the
/// result inside the mask.
///
/// `Include` keeps the original background; `Exclude` starts from a
/// blank canvas so only the scrambled regions remain. The closure gets
/// the rectangle index, the cropped image, and the cropped mask.
pub fn apply_gated<F>(
    img: &Image,
    region: &RegionMask,
    mode: BackgroundMode,
    mut scramble: F,
) -> Result<Image>
where
    F: FnMut(usize, &Image, ArrayView2<'_, bool>) -> Result<Image>,
{
    let mut out = match mode {
        BackgroundMode::Include => img.clone(),
        BackgroundMode::Exclude => img.blank_like(),
    };
    debug!(regions = region.rects.len(), ?mode, "gated scramble");

    for (i, &(x, y, w, h)) in region.rects.iter().enumerate() {
        let crop = img.crop(x, y, w, h)?;
        let crop_mask = region.mask.slice(s![y..y + h, x..x + w]);
        let scrambled = scramble(i, &crop, crop_mask)?;

        let mut patch = out.crop(x, y, w, h)?;
        composite(&mut patch, &scrambled, crop_mask);
        out.paste(&patch, x, y);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn expand_clamps() {
        let b = FaceBox::new(10, 10, 30, 20, 0.9);
        let e = b.expand(2.0, 35, 100);
        assert_eq!((e.x1, e.y1, e.x2, e.y2), (0, 5, 35, 25));
        assert_eq!(b.expand(1.0, 100, 100), b);
    }

    #[test]
    fn iou_values() {
        let a = FaceBox::new(0, 0, 10, 10, 1.0);
        let b = FaceBox::new(5, 0, 15, 10, 1.0);
        let c = FaceBox::new(20, 20, 30, 30, 1.0);
        assert_relative_eq!(a.iou(&b), 50.0 / 150.0);
        assert_relative_eq!(a.iou(&a), 1.0);
        assert_eq!(a.iou(&c), 0.0);
    }

    #[test]
    fn selection_filters_and_suppresses() {
        let raw = [
            FaceBox::new(0, 0, 10, 10, 0.8),
            FaceBox::new(1, 1, 11, 11, 0.95),
            FaceBox::new(40, 40, 50, 50, 0.5),
            FaceBox::new(20, 20, 30, 30, 0.75),
        ];
        let opts = FaceDetectionOptions::default();
        let kept = select_regions(&raw, &opts, 64, 64);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.95);
        assert_eq!(kept[1].confidence, 0.75);
    }

    #[test]
    fn mask_from_image() {
        let mut img = Image::filled(4, 2, &[255, 255, 255]).unwrap();
        for c in 0..3 {
            img.set(1, 0, c, 0);
            img.set(2, 1, c, 200);
        }
        let m = RegionMask::from_image(&img);
        assert_eq!(m.count(), 2);
        assert!(m.contains(1, 0) && m.contains(2, 1));
        assert_eq!(m.rects(), &[(1, 0, 2, 2)]);
        assert!(RegionMask::from_image(&Image::filled(3, 3, &[254]).unwrap()).is_empty());
        assert_eq!(RegionMask::from_image(&Image::new(3, 3, 1).unwrap()).count(), 9);
    }

    #[test]
    fn gated_modes() {
        let img = Image::filled(8, 8, &[50]).unwrap();
        let region = RegionMask::from_boxes(8, 8, &[FaceBox::new(2, 2, 5, 6, 1.0)]);
        fn fill(_: usize, crop: &Image, _: ArrayView2<'_, bool>) -> Result<Image> {
            Image::filled(crop.width(), crop.height(), &[200])
        }

        let include = apply_gated(&img, &region, BackgroundMode::Include, fill).unwrap();
        let exclude = apply_gated(&img, &region, BackgroundMode::Exclude, fill).unwrap();
        for y in 0..8 {
            for x in 0..8 {
                let inside = (2..5).contains(&x) && (2..6).contains(&y);
                assert_eq!(include.get(x, y, 0), if inside { 200 } else { 50 });
                assert_eq!(exclude.get(x, y, 0), if inside { 200 } else { 0 });
            }
        }
    }
}
