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

//! Separable Gaussian blur.

use ndarray::parallel::prelude::*;
use ndarray::prelude::*;
use ndarray::Zip;
use tracing::trace;

use crate::buffer::Image;
use crate::error::Result;
use crate::options::BlurOptions;

/// Normalized 1D Gaussian taps covering ±3σ.
pub fn gaussian_kernel(sigma: f32) -> Vec<f32> {
    let radius = (3.0 * sigma).ceil().max(1.0) as i32;
    let sigma2 = 2.0 * sigma * sigma;
    let mut taps: Vec<f32> = (-radius..=radius)
        .map(|x| (-((x * x) as f32) / sigma2).exp())
        .collect();
    let sum: f32 = taps.iter().sum();
    taps.iter_mut().for_each(|w| *w /= sum);
    taps
}

/// Convolves every lane along `axis` with `taps`, clamping at the edges.
fn convolve_axis(src: ArrayView3<'_, f32>, taps: &[f32], axis: Axis) -> Array3<f32> {
    let radius = (taps.len() / 2) as isize;
    let mut dst = Array3::zeros(src.raw_dim());
    Zip::from(dst.lanes_mut(axis))
        .and(src.lanes(axis))
        .par_for_each(|mut d, s| {
            let last = s.len() as isize - 1;
            for (i, out) in d.iter_mut().enumerate() {
                *out = taps
                    .iter()
                    .enumerate()
                    .map(|(k, &w)| {
                        let j = (i as isize + k as isize - radius).clamp(0, last);
                        w * s[j as usize]
                    })
                    .sum();
            }
        });
    dst
}

/// Blurs all channels of `img`.
pub fn gaussian_blur(img: &Image, opts: &BlurOptions) -> Result<Image> {
    opts.validate()?;
    let taps = gaussian_kernel(opts.sigma);
    trace!(
        width = img.width(),
        height = img.height(),
        sigma = opts.sigma,
        taps = taps.len(),
        "gaussian blur"
    );

    // Alpha is copied through untouched
    let colors = img.color_channels();
    let src = img.view().slice(s![.., .., ..colors]).mapv(f32::from);
    let horizontal = convolve_axis(src.view(), &taps, Axis(1));
    let both = convolve_axis(horizontal.view(), &taps, Axis(0));

    let mut out = img.clone();
    par_azip!((d in out.view_mut().slice_move(s![.., .., ..colors]), &v in &both) {
        *d = v.round().clamp(0.0, 255.0) as u8;
    });
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn kernel_is_normalized() {
        for sigma in [0.5, 1.0, 5.0, 25.0] {
            let k = gaussian_kernel(sigma);
            assert_eq!(k.len() % 2, 1);
            assert_relative_eq!(k.iter().sum::<f32>(), 1.0, epsilon = 1e-5);
            let mid = k.len() / 2;
            assert!(k[mid] >= k[0]);
            assert_relative_eq!(k[0], k[k.len() - 1]);
        }
    }

    #[test]
    fn flat_image_unchanged() {
        let img = Image::filled(12, 9, &[40, 120, 250, 255]).unwrap();
        let out = gaussian_blur(&img, &BlurOptions { sigma: 3.0 }).unwrap();
        assert_eq!(out, img);
    }

    #[test]
    fn spreads_impulse() {
        let mut img = Image::new(15, 15, 1).unwrap();
        img.set(7, 7, 0, 255);
        let out = gaussian_blur(&img, &BlurOptions { sigma: 1.0 }).unwrap();
        assert!(out.get(7, 7, 0) < 255);
        assert!(out.get(8, 7, 0) > 0);
        assert_eq!(out.get(8, 7, 0), out.get(7, 8, 0));
        assert_eq!(out.get(6, 7, 0), out.get(8, 7, 0));
    }

    #[test]
    fn alpha_is_not_blurred() {
        let mut img = Image::filled(9, 9, &[0, 0, 0, 255]).unwrap();
        img.set(4, 4, 0, 255);
        img.set(4, 4, 3, 0);
        let out = gaussian_blur(&img, &BlurOptions { sigma: 1.0 }).unwrap();
        assert!(out.get(5, 4, 0) > 0);
        assert_eq!(out.get(4, 4, 3), 0);
        assert_eq!(out.get(5, 4, 3), 255);
    }

    #[test]
    fn rejects_bad_sigma() {
        let img = Image::new(4, 4, 1).unwrap();
        assert!(gaussian_blur(&img, &BlurOptions { sigma: 30.0 }).is_err());
    }
}
