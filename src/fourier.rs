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

//! Frequency-domain scrambling.
//!
//! Each plane is padded to a power-of-two square, transformed, has the
//! phase and/or amplitude of selected bins perturbed, and is transformed
//! back. Perturbations are applied to one bin of every conjugate pair and
//! mirrored onto its partner, so the inverse stays real. The same random
//! perturbation is used for every color channel of an image.

use std::f64::consts::PI;

use ndarray::prelude::*;
use rand::prelude::*;
use rayon::prelude::*;
use tracing::{debug, trace};

use crate::buffer::Image;
use crate::error::Result;
use crate::fft::Fft;
use crate::options::{FourierOptions, PaddingMode};
use crate::seed::rng_from_seed;

/// Full 2D spectrum of a square real plane, interleaved and row-major.
#[derive(Debug, Clone)]
pub struct Spectrum {
    side: usize,
    data: Vec<f64>,
}

impl Spectrum {
    /// Forward 2D transform of a square plane whose side matches `fft`.
    pub fn forward(fft: &Fft, plane: ArrayView2<'_, f64>) -> Result<Self> {
        let n = fft.size();
        let mut data = vec![0.0; 2 * n * n];

        // Rows: real input, then rebuild the symmetric half
        let rows: Vec<Vec<f64>> = plane.outer_iter().map(|row| row.to_vec()).collect();
        data.par_chunks_mut(2 * n)
            .zip(rows.par_iter())
            .try_for_each(|(out, row)| -> Result<()> {
                fft.real_forward_transform(out, row)?;
                fft.complete_spectrum(out)
            })?;

        let mut spectrum = Self { side: n, data };
        spectrum.columns(fft, false)?;
        Ok(spectrum)
    }

    /// Inverse 2D transform, keeping the real part.
    pub fn inverse(mut self, fft: &Fft) -> Result<Array2<f64>> {
        let n = self.side;
        self.columns(fft, true)?;

        let rows = self
            .data
            .par_chunks(2 * n)
            .map(|row| {
                let mut out = fft.create_complex_array();
                fft.inverse_transform(&mut out, row)?;
                fft.from_complex_array(&out)
            })
            .collect::<Result<Vec<_>>>()?;

        let flat: Vec<f64> = rows.into_iter().flatten().collect();
        Ok(Array2::from_shape_vec((n, n), flat).expect("Spectrum is always square"))
    }

    fn columns(&mut self, fft: &Fft, inverse: bool) -> Result<()> {
        let n = self.side;
        let data = &self.data;
        let cols = (0..n)
            .into_par_iter()
            .map(|x| {
                let col: Vec<f64> = (0..n)
                    .flat_map(|y| [data[2 * (y * n + x)], data[2 * (y * n + x) + 1]])
                    .collect();
                let mut out = fft.create_complex_array();
                if inverse {
                    fft.inverse_transform(&mut out, &col)?;
                } else {
                    fft.forward_transform(&mut out, &col)?;
                }
                Ok(out)
            })
            .collect::<Result<Vec<_>>>()?;

        for (x, col) in cols.iter().enumerate() {
            for y in 0..n {
                let i = 2 * (y * n + x);
                self.data[i] = col[2 * y];
                self.data[i + 1] = col[2 * y + 1];
            }
        }
        Ok(())
    }

    pub fn side(&self) -> usize {
        self.side
    }

    /// Bin value at row `y`, column `x`.
    pub fn bin(&self, y: usize, x: usize) -> (f64, f64) {
        let i = 2 * (y * self.side + x);
        (self.data[i], self.data[i + 1])
    }

    pub fn amplitude(&self, y: usize, x: usize) -> f64 {
        let (re, im) = self.bin(y, x);
        re.hypot(im)
    }

    fn set_polar(&mut self, index: usize, amplitude: f64, phase: f64) {
        let (s, c) = phase.sin_cos();
        self.data[2 * index] = amplitude * c;
        self.data[2 * index + 1] = amplitude * s;
    }

    fn polar(&self, index: usize) -> (f64, f64) {
        let (re, im) = (self.data[2 * index], self.data[2 * index + 1]);
        (re.hypot(im), im.atan2(re))
    }
}

/// Index of the bin holding the complex conjugate of `(y, x)`.
fn partner(n: usize, y: usize, x: usize) -> usize {
    ((n - y) % n) * n + (n - x) % n
}

/// Radial frequency of bin `(y, x)` relative to Nyquist, in `[0, 1]`.
pub fn radial_frequency(n: usize, y: usize, x: usize) -> f64 {
    let half = (n / 2) as f64;
    let fy = y.min(n - y) as f64 / half;
    let fx = x.min(n - x) as f64 / half;
    fy.hypot(fx).min(1.0)
}

/// One bin perturbation: phase offset and amplitude gain.
#[derive(Debug, Clone, Copy)]
struct Perturbation {
    index: usize,
    partner: usize,
    dphase: f64,
    gain: f64,
}

fn draw_perturbations<R: Rng>(n: usize, opts: &FourierOptions, rng: &mut R) -> Vec<Perturbation> {
    let intensity = opts.intensity as f64;
    let mut out = Vec::new();
    for y in 0..n {
        for x in 0..n {
            let index = y * n + x;
            let partner = partner(n, y, x);
            // Self-conjugate bins are real; their partner is handled elsewhere
            if partner <= index {
                continue;
            }
            if !opts.frequency_range.passes(radial_frequency(n, y, x)) {
                continue;
            }
            let dphase = if opts.phase_scramble {
                rng.gen_range(-0.5..0.5) * intensity * 2.0 * PI
            } else {
                0.0
            };
            let gain = if opts.magnitude_scramble {
                (1.0 + intensity * rng.gen_range(-1.0..1.0)).max(0.0)
            } else {
                1.0
            };
            out.push(Perturbation {
                index,
                partner,
                dphase,
                gain,
            });
        }
    }
    out
}

fn apply_perturbations(spectrum: &mut Spectrum, perturbations: &[Perturbation]) {
    for p in perturbations {
        let (amplitude, phase) = spectrum.polar(p.index);
        let (amplitude, phase) = (amplitude * p.gain, phase + p.dphase);
        spectrum.set_polar(p.index, amplitude, phase);
        spectrum.set_polar(p.partner, amplitude, -phase);
    }
}

/// Smallest admissible transform side covering `width`×`height`.
pub fn padded_side(width: usize, height: usize) -> usize {
    width.max(height).next_power_of_two().max(2)
}

/// Places `plane` centered on an `n`×`n` canvas, filling the rest per `mode`.
pub fn pad_plane(plane: ArrayView2<'_, f64>, n: usize, mode: PaddingMode) -> Array2<f64> {
    let (h, w) = plane.dim();
    let (oy, ox) = (((n - h) / 2) as isize, ((n - w) / 2) as isize);
    Array2::from_shape_fn((n, n), |(y, x)| {
        let sy = mode.source_index(y as isize - oy, h);
        let sx = mode.source_index(x as isize - ox, w);
        match (sy, sx) {
            (Some(sy), Some(sx)) => plane[[sy, sx]],
            _ => 0.0,
        }
    })
}

/// Inverse of [`pad_plane`]'s placement.
pub fn crop_plane(padded: ArrayView2<'_, f64>, width: usize, height: usize) -> Array2<f64> {
    let n = padded.nrows();
    let (oy, ox) = ((n - height) / 2, (n - width) / 2);
    padded
        .slice(s![oy..oy + height, ox..ox + width])
        .to_owned()
}

/// Planes to process: one per color channel, or the channel mean.
fn extract_planes(img: &Image, grayscale: bool) -> Vec<Array2<f64>> {
    let view = img.view();
    let colors = img.color_channels();
    if grayscale {
        let mean = view
            .slice(s![.., .., ..colors])
            .mapv(|v| v as f64)
            .mean_axis(Axis(2))
            .expect("Image has at least one channel");
        vec![mean]
    } else {
        (0..colors)
            .map(|c| view.index_axis(Axis(2), c).mapv(|v| v as f64))
            .collect()
    }
}

/// Log amplitude `ln(1 + |F|)` of the image's gray plane, zero padded,
/// with the DC bin shifted to the center.
pub fn magnitude_spectrum(img: &Image) -> Result<Array2<f64>> {
    let n = padded_side(img.width(), img.height());
    let fft = Fft::new(n)?;
    let gray = extract_planes(img, true).swap_remove(0);
    let spectrum = Spectrum::forward(&fft, pad_plane(gray.view(), n, PaddingMode::Zero).view())?;
    let half = n / 2;
    Ok(Array2::from_shape_fn((n, n), |(y, x)| {
        spectrum.amplitude((y + half) % n, (x + half) % n).ln_1p()
    }))
}

/// Scrambles `img` in the frequency domain.
pub fn fourier_scramble(img: &Image, opts: &FourierOptions, seed: Option<u64>) -> Result<Image> {
    opts.validate()?;
    let (w, h) = (img.width(), img.height());
    let n = padded_side(w, h);
    let fft = Fft::new(n)?;
    let mut rng = rng_from_seed(seed);

    debug!(
        width = w,
        height = h,
        side = n,
        grayscale = opts.grayscale,
        "fourier scramble"
    );

    let perturbations = draw_perturbations(n, opts, &mut rng);
    trace!(bins = perturbations.len(), "perturbations drawn");

    let planes = extract_planes(img, opts.grayscale);
    let processed = planes
        .iter()
        .map(|plane| {
            let padded = pad_plane(plane.view(), n, opts.padding_mode);
            let mut spectrum = Spectrum::forward(&fft, padded.view())?;
            apply_perturbations(&mut spectrum, &perturbations);
            let back = spectrum.inverse(&fft)?;
            Ok(crop_plane(back.view(), w, h))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut out = img.clone();
    let colors = img.color_channels();
    {
        let mut view = out.view_mut();
        for c in 0..colors {
            let plane = &processed[if opts.grayscale { 0 } else { c }];
            azip!((d in view.index_axis_mut(Axis(2), c), &s in plane) {
                *d = s.round().clamp(0.0, 255.0) as u8;
            });
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::FrequencyRange;
    use approx::assert_abs_diff_eq;

    fn gradient(w: usize, h: usize, channels: usize) -> Image {
        let mut img = Image::new(w, h, channels).unwrap();
        for y in 0..h {
            for x in 0..w {
                for c in 0..channels {
                    img.set(x, y, c, ((x * 7 + y * 13 + c * 40) % 256) as u8);
                }
            }
        }
        img
    }

    #[test]
    fn spectrum_round_trip() {
        let fft = Fft::new(16).unwrap();
        let plane = Array2::from_shape_fn((16, 16), |(y, x)| ((x * 3 + y * 5) % 17) as f64);
        let back = Spectrum::forward(&fft, plane.view())
            .unwrap()
            .inverse(&fft)
            .unwrap();
        for (a, b) in back.iter().zip(plane.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-9);
        }
    }

    #[test]
    fn magnitude_spectrum_is_centered() {
        let img = Image::filled(6, 5, &[100]).unwrap();
        let mag = magnitude_spectrum(&img).unwrap();
        assert_eq!(mag.dim(), (8, 8));
        let peak = mag
            .indexed_iter()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, (4, 4));
        assert_abs_diff_eq!(mag[[4, 4]], (100.0f64 * 30.0).ln_1p(), epsilon = 1e-9);
    }

    #[test]
    fn no_perturbation_is_identity() {
        for mode in [PaddingMode::Zero, PaddingMode::Reflect, PaddingMode::Wrap] {
            let img = gradient(13, 7, 3);
            let opts = FourierOptions {
                phase_scramble: false,
                magnitude_scramble: false,
                padding_mode: mode,
                ..Default::default()
            };
            let out = fourier_scramble(&img, &opts, Some(1)).unwrap();
            assert_eq!(out, img);
        }
    }

    #[test]
    fn phase_scramble_keeps_amplitudes() {
        // 2x2 checks of 96/160: energy at DC and a few non-real bins
        let mut img = Image::new(8, 8, 1).unwrap();
        for y in 0..8 {
            for x in 0..8 {
                let v = if (x / 2 + y / 2) % 2 == 0 { 96 } else { 160 };
                img.set(x, y, 0, v);
            }
        }
        let opts = FourierOptions::default();
        let out = fourier_scramble(&img, &opts, Some(5)).unwrap();
        assert_ne!(out, img);

        let fft = Fft::new(8).unwrap();
        let plane = |i: &Image| i.view().index_axis(Axis(2), 0).mapv(|v| v as f64);
        let before = Spectrum::forward(&fft, plane(&img).view()).unwrap();
        let after = Spectrum::forward(&fft, plane(&out).view()).unwrap();
        for y in 0..8 {
            for x in 0..8 {
                assert_abs_diff_eq!(before.amplitude(y, x), after.amplitude(y, x), epsilon = 40.0);
            }
        }
    }

    #[test]
    fn seeded_runs_match() {
        let img = gradient(20, 12, 4);
        let opts = FourierOptions {
            magnitude_scramble: true,
            intensity: 0.6,
            ..Default::default()
        };
        let a = fourier_scramble(&img, &opts, Some(11)).unwrap();
        let b = fourier_scramble(&img, &opts, Some(11)).unwrap();
        assert_eq!(a, b);
        // Alpha is never scrambled
        assert_eq!(
            a.view().index_axis(Axis(2), 3),
            img.view().index_axis(Axis(2), 3)
        );
    }

    #[test]
    fn grayscale_writes_equal_channels() {
        let img = gradient(9, 9, 3);
        let opts = FourierOptions {
            grayscale: true,
            ..Default::default()
        };
        let out = fourier_scramble(&img, &opts, Some(2)).unwrap();
        for y in 0..9 {
            for x in 0..9 {
                let p = out.pixel(x, y);
                assert_eq!(p[0], p[1]);
                assert_eq!(p[1], p[2]);
            }
        }
    }

    #[test]
    fn band_selection() {
        let n = 16;
        let opts = FourierOptions {
            frequency_range: FrequencyRange::LowPass { cutoff: 0.25 },
            ..Default::default()
        };
        let mut rng = rng_from_seed(Some(0));
        let perturbations = draw_perturbations(n, &opts, &mut rng);
        assert!(!perturbations.is_empty());
        for p in &perturbations {
            let (y, x) = (p.index / n, p.index % n);
            assert!(radial_frequency(n, y, x) <= 0.25);
            assert!(p.partner > p.index);
        }
    }

    #[test]
    fn low_pass_leaves_high_bins_alone() {
        let n = 16;
        let plane = Array2::from_shape_fn((n, n), |(y, x)| ((x * 7 + y * 13) % 17) as f64);
        let fft = Fft::new(n).unwrap();
        let before = Spectrum::forward(&fft, plane.view()).unwrap();
        let opts = FourierOptions {
            frequency_range: FrequencyRange::LowPass { cutoff: 0.3 },
            ..Default::default()
        };
        let perturbations = draw_perturbations(n, &opts, &mut rng_from_seed(Some(3)));
        let mut after = before.clone();
        apply_perturbations(&mut after, &perturbations);

        let mut touched = vec![false; n * n];
        for p in &perturbations {
            touched[p.index] = true;
            touched[p.partner] = true;
            let (a0, ph0) = before.polar(p.index);
            let (a1, ph1) = after.polar(p.index);
            assert_abs_diff_eq!(a0, a1, epsilon = 1e-9);
            if a0 > 1e-6 {
                let d = (ph1 - ph0 - p.dphase).rem_euclid(2.0 * PI);
                assert!(d < 1e-6 || 2.0 * PI - d < 1e-6);
            }
        }
        for y in 0..n {
            for x in 0..n {
                if radial_frequency(n, y, x) > 0.3 {
                    assert!(!touched[y * n + x]);
                    assert_eq!(before.bin(y, x), after.bin(y, x));
                }
            }
        }

        // Through the whole pipeline, a component above the cutoff survives
        let img = Image::from_array(
            Array3::from_shape_fn((n, n, 1), |(y, x, _)| {
                let a = 2.0 * PI * x as f64 / n as f64;
                let b = 2.0 * PI * (6 * x + y) as f64 / n as f64;
                (128.0 + 50.0 * a.cos() + 50.0 * b.cos()).round() as u8
            }),
        )
        .unwrap();
        let out = fourier_scramble(&img, &opts, Some(8)).unwrap();
        let plane = |i: &Image| i.view().index_axis(Axis(2), 0).mapv(|v| v as f64);
        let s0 = Spectrum::forward(&fft, plane(&img).view()).unwrap();
        let s1 = Spectrum::forward(&fft, plane(&out).view()).unwrap();
        let ((r0, i0), (r1, i1)) = (s0.bin(1, 6), s1.bin(1, 6));
        assert!(s0.amplitude(1, 6) > 5000.0);
        assert_abs_diff_eq!(r0, r1, epsilon = 130.0);
        assert_abs_diff_eq!(i0, i1, epsilon = 130.0);
    }

    #[test]
    fn magnitude_scramble_changes_amplitudes_only() {
        let n = 16;
        let plane = Array2::from_shape_fn((n, n), |(y, x)| ((x * 7 + y * 13) % 17) as f64);
        let fft = Fft::new(n).unwrap();
        let before = Spectrum::forward(&fft, plane.view()).unwrap();
        let opts = FourierOptions {
            phase_scramble: false,
            magnitude_scramble: true,
            ..Default::default()
        };
        let perturbations = draw_perturbations(n, &opts, &mut rng_from_seed(Some(4)));
        assert!(perturbations.iter().any(|p| (p.gain - 1.0).abs() > 0.1));
        let mut after = before.clone();
        apply_perturbations(&mut after, &perturbations);

        let mut changed = 0;
        for p in &perturbations {
            assert_eq!(p.dphase, 0.0);
            let (y, x) = (p.index / n, p.index % n);
            let (r0, i0) = before.bin(y, x);
            let (r1, i1) = after.bin(y, x);
            // Scaling by a non-negative gain keeps the phase
            assert_abs_diff_eq!(r1, r0 * p.gain, epsilon = 1e-6);
            assert_abs_diff_eq!(i1, i0 * p.gain, epsilon = 1e-6);
            if (before.amplitude(y, x) - after.amplitude(y, x)).abs() > 1.0 {
                changed += 1;
            }
        }
        assert!(changed > 0);
    }

    #[test]
    fn padding_is_centered() {
        let plane = Array2::from_elem((2, 4), 1.0);
        let padded = pad_plane(plane.view(), 4, PaddingMode::Zero);
        assert_eq!(padded.row(0).sum(), 0.0);
        assert_eq!(padded.row(1).sum(), 4.0);
        assert_eq!(padded.row(2).sum(), 4.0);
        assert_eq!(padded.row(3).sum(), 0.0);
        assert_eq!(crop_plane(padded.view(), 4, 2), plane);
    }
}
