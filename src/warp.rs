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

//! Smooth random warps and the bilinear resampling they share with flow
//! propagation.
//!
//! A diffeomorphic warp is a random low-frequency displacement field,
//! scaled to a target RMS and integrated in many small steps so that the
//! overall mapping stays close to invertible (Stojanoski & Cusack, 2014).

use std::f32::consts::PI;

use ndarray::prelude::*;
use ndarray::Zip;
use rand::prelude::*;
use tracing::debug;

use crate::buffer::Image;
use crate::error::{Error, Result};
use crate::options::DiffeomorphicOptions;

/// Bilinear sample of `plane` at `(x, y)`, clamped to the edges.
pub fn bilinear(plane: ArrayView2<'_, f32>, x: f32, y: f32) -> f32 {
    let (h, w) = plane.dim();
    let x = x.clamp(0.0, (w - 1) as f32);
    let y = y.clamp(0.0, (h - 1) as f32);
    let (x0, y0) = (x.floor() as usize, y.floor() as usize);
    let (x1, y1) = ((x0 + 1).min(w - 1), (y0 + 1).min(h - 1));
    let (fx, fy) = (x - x0 as f32, y - y0 as f32);

    let top = plane[[y0, x0]] * (1.0 - fx) + plane[[y0, x1]] * fx;
    let bottom = plane[[y1, x0]] * (1.0 - fx) + plane[[y1, x1]] * fx;
    top * (1.0 - fy) + bottom * fy
}

/// Writes the bilinear sample of every channel of `src` at `(x, y)` into `out`.
fn sample_pixel(src: ArrayView3<'_, u8>, x: f32, y: f32, mut out: ArrayViewMut1<'_, u8>) {
    let (h, w, _) = src.dim();
    let x = x.clamp(0.0, (w - 1) as f32);
    let y = y.clamp(0.0, (h - 1) as f32);
    let (x0, y0) = (x.floor() as usize, y.floor() as usize);
    let (x1, y1) = ((x0 + 1).min(w - 1), (y0 + 1).min(h - 1));
    let (fx, fy) = (x - x0 as f32, y - y0 as f32);

    for (c, o) in out.iter_mut().enumerate() {
        let p = |yy: usize, xx: usize| src[[yy, xx, c]] as f32;
        let top = p(y0, x0) * (1.0 - fx) + p(y0, x1) * fx;
        let bottom = p(y1, x0) * (1.0 - fx) + p(y1, x1) * fx;
        *o = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
}

/// Pull resampling: output pixel `(x, y)` takes the color of `img` at
/// `(map_x[[y, x]], map_y[[y, x]])`.
pub fn remap(img: &Image, map_x: ArrayView2<'_, f32>, map_y: ArrayView2<'_, f32>) -> Result<Image> {
    let dim = (img.height(), img.width());
    if map_x.dim() != dim || map_y.dim() != dim {
        return Err(Error::input(format!(
            "sampling map {:?}/{:?} does not match image {:?}",
            map_x.dim(),
            map_y.dim(),
            dim
        )));
    }
    let src = img.view();
    let mut out = img.blank_like();
    Zip::from(out.view_mut().lanes_mut(Axis(2)))
        .and(map_x)
        .and(map_y)
        .par_for_each(|px, &sx, &sy| sample_pixel(src, sx, sy, px));
    Ok(out)
}

/// Per-pixel displacement `(dx, dy)` in pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplacementField {
    dx: Array2<f32>,
    dy: Array2<f32>,
}

impl DisplacementField {
    pub fn new(dx: Array2<f32>, dy: Array2<f32>) -> Result<Self> {
        if dx.dim() != dy.dim() {
            return Err(Error::input(format!(
                "displacement components differ in shape: {:?} vs {:?}",
                dx.dim(),
                dy.dim()
            )));
        }
        Ok(Self { dx, dy })
    }

    pub fn zeros(width: usize, height: usize) -> Self {
        Self {
            dx: Array2::zeros((height, width)),
            dy: Array2::zeros((height, width)),
        }
    }

    /// Random smooth field from the lowest `n_comp`×`n_comp` cosine
    /// components, with random amplitudes and phases. Not normalized.
    pub fn random_smooth<R: Rng>(width: usize, height: usize, n_comp: usize, random: &mut R) -> Self {
        let mut field = Self::zeros(width, height);
        let two_pi = 2.0 * PI;
        for i in 1..=n_comp {
            for j in 1..=n_comp {
                for plane in [&mut field.dx, &mut field.dy] {
                    let amp: f32 = random.gen_range(-1.0..1.0);
                    let (px, py): (f32, f32) = (random.gen::<f32>() * two_pi, random.gen::<f32>() * two_pi);
                    let cx = Array1::from_shape_fn(width, |x| {
                        (i as f32 * x as f32 / width as f32 * two_pi + px).cos()
                    });
                    let cy = Array1::from_shape_fn(height, |y| {
                        (j as f32 * y as f32 / height as f32 * two_pi + py).cos()
                    });
                    Zip::from(plane)
                        .and_broadcast(cy.view().insert_axis(Axis(1)))
                        .and_broadcast(cx.view().insert_axis(Axis(0)))
                        .for_each(|v, &a, &b| *v += amp * a * b);
                }
            }
        }
        field
    }

    pub fn width(&self) -> usize {
        self.dx.ncols()
    }

    pub fn height(&self) -> usize {
        self.dx.nrows()
    }

    pub fn dx(&self) -> ArrayView2<'_, f32> {
        self.dx.view()
    }

    pub fn dy(&self) -> ArrayView2<'_, f32> {
        self.dy.view()
    }

    /// Root-mean-square displacement magnitude.
    pub fn rms(&self) -> f32 {
        let n = self.dx.len().max(1) as f64;
        let sum: f64 = Zip::from(&self.dx)
            .and(&self.dy)
            .fold(0.0, |acc, &x, &y| acc + (x * x + y * y) as f64);
        (sum / n).sqrt() as f32
    }

    pub fn scale(&mut self, factor: f32) {
        self.dx *= factor;
        self.dy *= factor;
    }

    /// Integrates this per-step field `n_steps` times into an absolute
    /// sampling map: `map_{k+1}(p) = map_k(p + d(p))`.
    pub fn compose(&self, n_steps: usize) -> (Array2<f32>, Array2<f32>) {
        let (h, w) = self.dx.dim();
        let mut map_x = Array2::from_shape_fn((h, w), |(_, x)| x as f32);
        let mut map_y = Array2::from_shape_fn((h, w), |(y, _)| y as f32);
        for _ in 0..n_steps {
            let mut next_x = Array2::zeros((h, w));
            let mut next_y = Array2::zeros((h, w));
            Zip::indexed(&mut next_x)
                .and(&mut next_y)
                .and(&self.dx)
                .and(&self.dy)
                .par_for_each(|(y, x), nx, ny, &dx, &dy| {
                    let (sx, sy) = (x as f32 + dx, y as f32 + dy);
                    *nx = bilinear(map_x.view(), sx, sy);
                    *ny = bilinear(map_y.view(), sx, sy);
                });
            map_x = next_x;
            map_y = next_y;
        }
        (map_x, map_y)
    }
}

/// Builds the per-step field of a diffeomorphic warp for a `width`×`height` image.
pub fn diffeomorphic_field<R: Rng>(
    width: usize,
    height: usize,
    opts: &DiffeomorphicOptions,
    random: &mut R,
) -> DisplacementField {
    let mut field = DisplacementField::random_smooth(width, height, opts.n_comp as usize, random);
    let rms = field.rms();
    if rms > 1e-8 {
        field.scale(opts.max_distortion / (rms * opts.n_steps as f32));
    }
    field
}

/// Applies a smooth random warp with RMS displacement `opts.max_distortion`.
pub fn diffeomorphic_warp<R: Rng>(img: &Image, opts: &DiffeomorphicOptions, random: &mut R) -> Result<Image> {
    opts.validate()?;
    let (w, h) = (img.width(), img.height());
    debug!(
        width = w,
        height = h,
        max_distortion = opts.max_distortion,
        n_steps = opts.n_steps,
        n_comp = opts.n_comp,
        "diffeomorphic warp"
    );
    let field = diffeomorphic_field(w, h, opts, random);
    let (map_x, map_y) = field.compose(opts.n_steps as usize);
    remap(img, map_x.view(), map_y.view())
}
