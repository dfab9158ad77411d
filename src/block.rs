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

//! Fixed-grid block permutation.

use ndarray::prelude::*;
use ndarray::Zip;
use rand::prelude::*;
use tracing::debug;

use crate::buffer::Image;
use crate::error::Result;
use crate::options::{BlockOptions, PaddingMode};

/// Extends `src` to `width`×`height` to the right and bottom, filling per `mode`.
fn pad_canvas(src: ArrayView3<'_, u8>, width: usize, height: usize, mode: PaddingMode) -> Array3<u8> {
    let (h, w, c) = src.dim();
    let mut out = Array3::zeros((height, width, c));
    Zip::indexed(out.lanes_mut(Axis(2))).par_for_each(|(y, x), mut px| {
        let sy = mode.source_index(y as isize, h);
        let sx = mode.source_index(x as isize, w);
        if let (Some(sy), Some(sx)) = (sy, sx) {
            px.assign(&src.slice(s![sy, sx, ..]));
        }
    });
    out
}

/// Replaces a band around every seam along `axis` with a linear ramp
/// between the samples just outside the band.
fn blend_seams(canvas: &mut Array3<u8>, cell: usize, axis: Axis) {
    let len = canvas.len_of(axis);
    let band = (cell / 8).max(1);
    for seam in (cell..len).step_by(cell) {
        let lo = seam.saturating_sub(band + 1);
        let hi = (seam + band).min(len - 1);
        let a = canvas.index_axis(axis, lo).mapv(f32::from);
        let b = canvas.index_axis(axis, hi).mapv(f32::from);
        let span = (hi - lo) as f32;
        for p in lo + 1..hi {
            let t = (p - lo) as f32 / span;
            Zip::from(canvas.index_axis_mut(axis, p))
                .and(&a)
                .and(&b)
                .for_each(|d, &a, &b| *d = (a + (b - a) * t).round() as u8);
        }
    }
}

/// Permutes `block_size` cells of `img` uniformly at random.
///
/// Dimensions that do not divide evenly are padded per
/// `opts.padding_mode` before shuffling and cropped afterwards.
pub fn block_scramble<R: Rng>(img: &Image, opts: &BlockOptions, random: &mut R) -> Result<Image> {
    opts.validate()?;
    let (bw, bh) = (opts.block_size.0 as usize, opts.block_size.1 as usize);
    let (w, h, ch) = (img.width(), img.height(), img.channels());
    let (cols, rows) = (w.div_ceil(bw), h.div_ceil(bh));

    debug!(
        width = w,
        height = h,
        cols,
        rows,
        interpolate = opts.interpolate_edges,
        "block scramble"
    );

    let canvas = pad_canvas(img.view(), cols * bw, rows * bh, opts.padding_mode);

    let mut order: Vec<usize> = (0..cols * rows).collect();
    order.shuffle(random);

    let mut out = Array3::zeros(canvas.raw_dim());
    Zip::indexed(out.exact_chunks_mut((bh, bw, ch))).par_for_each(|(r, c, _), mut cell| {
        let src = order[r * cols + c];
        let (sr, sc) = (src / cols, src % cols);
        cell.assign(&canvas.slice(s![sr * bh..(sr + 1) * bh, sc * bw..(sc + 1) * bw, ..]));
    });

    if opts.interpolate_edges {
        blend_seams(&mut out, bw, Axis(1));
        blend_seams(&mut out, bh, Axis(0));
    }

    Image::from_array(out.slice(s![..h, ..w, ..]).to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_xoshiro::Xoshiro256StarStar;

    fn numbered(w: usize, h: usize) -> Image {
        let buf = (0..w * h)
            .flat_map(|i| [(i % 251) as u8, (i / 251) as u8, (i * 7 % 256) as u8])
            .collect();
        Image::from_raw(w, h, 3, buf).unwrap()
    }

    fn cells(img: &Image, bw: usize, bh: usize) -> Vec<Vec<u8>> {
        let mut v: Vec<Vec<u8>> = img
            .view()
            .exact_chunks((bh, bw, img.channels()))
            .into_iter()
            .map(|c| c.iter().copied().collect())
            .collect();
        v.sort();
        v
    }

    #[test]
    fn verbatim_without_interpolation() {
        let img = numbered(32, 24);
        let opts = BlockOptions {
            block_size: (8, 4),
            interpolate_edges: false,
            padding_mode: PaddingMode::Reflect,
        };
        let mut rng = Xoshiro256StarStar::seed_from_u64(0);
        let out = block_scramble(&img, &opts, &mut rng).unwrap();
        assert_ne!(out, img);
        assert_eq!(cells(&out, 8, 4), cells(&img, 8, 4));
    }

    #[test]
    fn ragged_sizes_keep_extent() {
        for mode in [PaddingMode::Zero, PaddingMode::Reflect, PaddingMode::Wrap] {
            let img = numbered(10, 13);
            let opts = BlockOptions {
                block_size: (4, 4),
                interpolate_edges: true,
                padding_mode: mode,
            };
            let mut rng = Xoshiro256StarStar::seed_from_u64(1);
            let out = block_scramble(&img, &opts, &mut rng).unwrap();
            assert_eq!((out.width(), out.height(), out.channels()), (10, 13, 3));
        }
    }

    #[test]
    fn blending_stays_near_seams() {
        let img = numbered(48, 48);
        let plain = BlockOptions {
            block_size: (16, 16),
            interpolate_edges: false,
            padding_mode: PaddingMode::Reflect,
        };
        let blended = BlockOptions {
            interpolate_edges: true,
            ..plain.clone()
        };
        let a = block_scramble(&img, &plain, &mut Xoshiro256StarStar::seed_from_u64(2)).unwrap();
        let b = block_scramble(&img, &blended, &mut Xoshiro256StarStar::seed_from_u64(2)).unwrap();
        assert_ne!(a, b);
        for y in 0..48 {
            for x in 0..48 {
                if (3..=13).contains(&(x % 16)) && (3..=13).contains(&(y % 16)) {
                    assert_eq!(a.pixel(x, y), b.pixel(x, y), "({}, {})", x, y);
                }
            }
        }
    }

    #[test]
    fn padding_fill() {
        let img = numbered(3, 1);
        let wrap = pad_canvas(img.view(), 5, 1, PaddingMode::Wrap);
        assert_eq!(wrap.slice(s![0, 3, ..]), img.pixel(0, 0));
        let zero = pad_canvas(img.view(), 5, 1, PaddingMode::Zero);
        assert!(zero.slice(s![0, 3.., ..]).iter().all(|&v| v == 0));
    }
}
