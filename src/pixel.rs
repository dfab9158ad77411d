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

//! Pixel-level and tile-level spatial scramblers.

use std::collections::BTreeMap;

use ndarray::prelude::*;
use ndarray::Zip;
use rand::prelude::*;
use tracing::debug;

use crate::buffer::Image;
use crate::error::Result;
use crate::options::{MosaicOptions, TileOptions};

/// Replaces each pixel's color with uniform noise with probability `intensity`.
///
/// Alpha is left alone.
pub fn noise<R: Rng>(img: &Image, intensity: f32, random: &mut R) -> Image {
    let colors = img.color_channels();
    let mut out = img.clone();
    let mut replaced = 0usize;
    for mut px in out.view_mut().lanes_mut(Axis(2)) {
        if random.gen_bool(intensity.clamp(0.0, 1.0) as f64) {
            for c in 0..colors {
                px[c] = random.gen();
            }
            replaced += 1;
        }
    }
    debug!(replaced, intensity, "pixel noise");
    out
}

/// Swaps each pixel with a uniformly chosen partner with probability `intensity`.
pub fn swap<R: Rng>(img: &Image, intensity: f32, random: &mut R) -> Image {
    let (w, h) = (img.width(), img.height());
    let total = w * h;
    let mut out = img.clone();
    let p = intensity.clamp(0.0, 1.0) as f64;
    let mut swapped = 0usize;
    {
        let mut flat = out
            .view_mut()
            .into_shape((total, img.channels()))
            .expect("Image is always standard-layout");
        for i in 0..total {
            if !random.gen_bool(p) {
                continue;
            }
            let j = random.gen_range(0..total);
            if i != j {
                let (mut a, mut b) = flat.multi_slice_mut((s![i, ..], s![j, ..]));
                Zip::from(&mut a).and(&mut b).for_each(std::mem::swap);
                swapped += 1;
            }
        }
    }
    debug!(swapped, intensity, "pixel swap");
    out
}

/// Splits `len` into at most `count` cells of equal size; the last cell
/// is truncated at the edge.
fn grid_edges(len: usize, count: usize) -> Vec<(usize, usize)> {
    let step = len.div_ceil(count.clamp(1, len));
    (0..len)
        .step_by(step)
        .map(|start| (start, (start + step).min(len)))
        .collect()
}

/// Legacy tile shuffle on a `ratio`×`ratio` grid.
///
/// Tiles are only exchanged with tiles of the same shape, so truncated
/// edge tiles stay on the edge and the multiset of tiles is preserved.
pub fn tile_shuffle<R: Rng>(img: &Image, opts: &TileOptions, random: &mut R) -> Result<Image> {
    opts.validate()?;
    let cols = grid_edges(img.width(), opts.ratio as usize);
    let rows = grid_edges(img.height(), opts.ratio as usize);

    let mut classes: BTreeMap<(usize, usize), Vec<(usize, usize)>> = BTreeMap::new();
    for &(y0, y1) in &rows {
        for &(x0, x1) in &cols {
            classes.entry((y1 - y0, x1 - x0)).or_default().push((y0, x0));
        }
    }

    let src = img.view();
    let mut out = img.clone();
    {
        let mut dst = out.view_mut();
        for ((th, tw), cells) in &classes {
            let mut order = cells.clone();
            order.shuffle(&mut *random);
            for (&(dy, dx), &(sy, sx)) in cells.iter().zip(&order) {
                dst.slice_mut(s![dy..dy + th, dx..dx + tw, ..])
                    .assign(&src.slice(s![sy..sy + th, sx..sx + tw, ..]));
            }
        }
    }
    debug!(
        tiles = rows.len() * cols.len(),
        classes = classes.len(),
        "tile shuffle"
    );
    Ok(out)
}

/// Floods each `cell_size` square with one pixel sampled from inside it.
pub fn mosaic<R: Rng>(img: &Image, opts: &MosaicOptions, random: &mut R) -> Result<Image> {
    opts.validate()?;
    let cell = opts.cell_size as usize;
    let mut out = img.clone();
    {
        let mut dst = out.view_mut();
        for y0 in (0..img.height()).step_by(cell) {
            for x0 in (0..img.width()).step_by(cell) {
                let y1 = (y0 + cell).min(img.height());
                let x1 = (x0 + cell).min(img.width());
                let sy = random.gen_range(y0..y1);
                let sx = random.gen_range(x0..x1);
                let px = img.pixel(sx, sy);
                for mut lane in dst.slice_mut(s![y0..y1, x0..x1, ..]).lanes_mut(Axis(2)) {
                    lane.assign(&px);
                }
            }
        }
    }
    Ok(out)
}
