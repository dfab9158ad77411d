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

//! Fixed-size mixed radix-4/radix-2 FFT.
//!
//! Complex data is stored interleaved (`[re0, im0, re1, im1, ...]`), so a
//! transform of size `n` works on slices of length `2n`. A context is
//! immutable after construction and can be shared across threads; each
//! call takes its own output buffer. Input and output are distinct
//! borrows, so in-place (aliased) calls cannot be expressed.

use crate::error::{Error, Result};

/// Precomputed twiddle and digit-reversal tables for one transform size.
#[derive(Debug, Clone)]
pub struct Fft {
    size: usize,
    csize: usize,
    /// `cos(πi/n)` at even `i`, `-sin(πi/n)` at odd `i`.
    table: Vec<f64>,
    /// Width of the first pass in bits; always odd.
    width: u32,
    bitrev: Vec<usize>,
}

impl Fft {
    /// Creates a context for `size`-point transforms.
    ///
    /// `size` must be a power of two greater than 1.
    pub fn new(size: usize) -> Result<Self> {
        if size <= 1 || !size.is_power_of_two() {
            return Err(Error::config(format!(
                "FFT size must be a power of two and bigger than 1, got {}",
                size
            )));
        }
        let csize = size << 1;

        let table = (0..csize)
            .step_by(2)
            .flat_map(|i| {
                let angle = std::f64::consts::PI * i as f64 / size as f64;
                [angle.cos(), -angle.sin()]
            })
            .collect();

        let power = size.trailing_zeros();
        // Full radix-4 sizes start with a radix-4 pass (len 8), the rest
        // start with radix-2 (len 4).
        let width = if power % 2 == 0 { power - 1 } else { power };

        // Only the first 2^(width-1) entries are ever read by the initial
        // pass, one per output group.
        let bitrev = (0..1usize << (width - 1))
            .map(|j| {
                (0..width.saturating_sub(1))
                    .step_by(2)
                    .fold(0, |acc, shift| {
                        let rev_shift = width - shift - 2;
                        acc | ((j >> shift) & 3) << rev_shift
                    })
            })
            .collect();

        Ok(Self {
            size,
            csize,
            table,
            width,
            bitrev,
        })
    }

    /// Number of complex points.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Zeroed interleaved buffer of the right length.
    pub fn create_complex_array(&self) -> Vec<f64> {
        vec![0.0; self.csize]
    }

    /// Widens real samples into an interleaved buffer with zero imaginary parts.
    pub fn to_complex_array(&self, input: &[f64]) -> Result<Vec<f64>> {
        self.check_len("real input", input.len(), self.size)?;
        Ok(input.iter().flat_map(|&v| [v, 0.0]).collect())
    }

    /// Real parts of an interleaved buffer.
    pub fn from_complex_array(&self, complex: &[f64]) -> Result<Vec<f64>> {
        self.check_len("complex input", complex.len(), self.csize)?;
        Ok(complex.iter().step_by(2).copied().collect())
    }

    /// Complex DFT of `data` into `out`.
    pub fn forward_transform(&self, out: &mut [f64], data: &[f64]) -> Result<()> {
        self.check_len("output", out.len(), self.csize)?;
        self.check_len("input", data.len(), self.csize)?;
        self.transform4(out, data, 1.0);
        Ok(())
    }

    /// Inverse DFT of `data` into `out`, scaled by `1/n`.
    pub fn inverse_transform(&self, out: &mut [f64], data: &[f64]) -> Result<()> {
        self.check_len("output", out.len(), self.csize)?;
        self.check_len("input", data.len(), self.csize)?;
        self.transform4(out, data, -1.0);
        let scale = 1.0 / self.size as f64;
        out.iter_mut().for_each(|v| *v *= scale);
        Ok(())
    }

    /// DFT of `n` real samples.
    ///
    /// Only bins `0..=n/2` are written; call [`Fft::complete_spectrum`]
    /// to fill the conjugate-symmetric upper half.
    pub fn real_forward_transform(&self, out: &mut [f64], data: &[f64]) -> Result<()> {
        self.check_len("output", out.len(), self.csize)?;
        self.check_len("real input", data.len(), self.size)?;
        self.real_transform4(out, data);
        Ok(())
    }

    /// Mirrors bins `1..n/2` into `n/2+1..n` as complex conjugates.
    pub fn complete_spectrum(&self, spectrum: &mut [f64]) -> Result<()> {
        self.check_len("spectrum", spectrum.len(), self.csize)?;
        let size = self.csize;
        for i in (2..size >> 1).step_by(2) {
            spectrum[size - i] = spectrum[i];
            spectrum[size - i + 1] = -spectrum[i + 1];
        }
        Ok(())
    }

    fn check_len(&self, what: &str, got: usize, want: usize) -> Result<()> {
        if got != want {
            return Err(Error::config(format!(
                "FFT {} length {} does not match {} for size {}",
                what, got, want, self.size
            )));
        }
        Ok(())
    }

    fn transform4(&self, out: &mut [f64], data: &[f64], inv: f64) {
        let size = self.csize;

        // Initial pass: permute and transform
        let mut step = 1usize << self.width;
        let len = (size / step) << 1;
        for (t, out_off) in (0..size).step_by(len).enumerate() {
            let off = self.bitrev[t];
            if len == 4 {
                single_transform2(&mut out[out_off..out_off + 4], data, off, step);
            } else {
                single_transform4(&mut out[out_off..out_off + 8], data, off, step, inv);
            }
        }

        step >>= 2;
        while step >= 2 {
            let len = (size / step) << 1;
            let quarter = len >> 2;
            for out_off in (0..size).step_by(len) {
                for (n, a) in (out_off..out_off + quarter).step_by(2).enumerate() {
                    let [t0, t1, t2, t3] = radix4(out, a, quarter, &self.table, n * step, inv);
                    let (b, c, d) = (a + quarter, a + 2 * quarter, a + 3 * quarter);

                    out[a] = t0.0 + t2.0;
                    out[a + 1] = t0.1 + t2.1;
                    out[b] = t1.0 + t3.1;
                    out[b + 1] = t1.1 - t3.0;
                    out[c] = t0.0 - t2.0;
                    out[c + 1] = t0.1 - t2.1;
                    out[d] = t1.0 - t3.1;
                    out[d + 1] = t1.1 + t3.0;
                }
            }
            step >>= 2;
        }
    }

    fn real_transform4(&self, out: &mut [f64], data: &[f64]) {
        let size = self.csize;

        let mut step = 1usize << self.width;
        let len = (size / step) << 1;
        for (t, out_off) in (0..size).step_by(len).enumerate() {
            let off = self.bitrev[t] >> 1;
            if len == 4 {
                single_real_transform2(&mut out[out_off..out_off + 4], data, off, step >> 1);
            } else {
                single_real_transform4(&mut out[out_off..out_off + 8], data, off, step >> 1);
            }
        }

        step >>= 2;
        while step >= 2 {
            let len = (size / step) << 1;
            let half = len >> 1;
            let quarter = half >> 1;
            let hquarter = quarter >> 1;
            for out_off in (0..size).step_by(len) {
                for (n, i) in (0..=hquarter).step_by(2).enumerate() {
                    let a = out_off + i;
                    let [t0, t1, t2, t3] = radix4(out, a, quarter, &self.table, n * step, 1.0);
                    let (b, c) = (a + quarter, a + 2 * quarter);

                    out[a] = t0.0 + t2.0;
                    out[a + 1] = t0.1 + t2.1;
                    out[b] = t1.0 + t3.1;
                    out[b + 1] = t1.1 - t3.0;

                    // Middle point only exists once per group
                    if i == 0 {
                        out[c] = t0.0 - t2.0;
                        out[c + 1] = t0.1 - t2.1;
                        continue;
                    }
                    if i == hquarter {
                        continue;
                    }

                    // Mirrored outputs, derived from conjugate symmetry of
                    // the real-input sub-transforms.
                    let st0 = (t1.0, -t1.1);
                    let st1 = (t0.0, -t0.1);
                    let st2 = (-t3.1, -t3.0);
                    let st3 = (-t2.1, -t2.0);

                    let sa = out_off + quarter - i;
                    let sb = out_off + half - i;
                    out[sa] = st0.0 + st2.0;
                    out[sa + 1] = st0.1 + st2.1;
                    out[sb] = st1.0 + st3.1;
                    out[sb + 1] = st1.1 - st3.0;
                }
            }
            step >>= 2;
        }
    }
}

#[inline]
fn twiddle(table: &[f64], k: usize, inv: f64, re: f64, im: f64) -> (f64, f64) {
    let tr = table[k];
    let ti = inv * table[k + 1];
    (re * tr - im * ti, re * ti + im * tr)
}

/// Pre-final values `T0..T3` of the radix-4 butterfly rooted at `a`.
#[inline]
fn radix4(
    out: &[f64],
    a: usize,
    quarter: usize,
    table: &[f64],
    k: usize,
    inv: f64,
) -> [(f64, f64); 4] {
    let (b, c, d) = (a + quarter, a + 2 * quarter, a + 3 * quarter);
    let (ar, ai) = (out[a], out[a + 1]);
    let (br, bi) = twiddle(table, k, inv, out[b], out[b + 1]);
    let (cr, ci) = twiddle(table, 2 * k, inv, out[c], out[c + 1]);
    let (dr, di) = twiddle(table, 3 * k, inv, out[d], out[d + 1]);
    [
        (ar + cr, ai + ci),
        (ar - cr, ai - ci),
        (br + dr, bi + di),
        (inv * (br - dr), inv * (bi - di)),
    ]
}

fn single_transform2(out: &mut [f64], data: &[f64], off: usize, step: usize) {
    let (er, ei) = (data[off], data[off + 1]);
    let (or, oi) = (data[off + step], data[off + step + 1]);
    out.copy_from_slice(&[er + or, ei + oi, er - or, ei - oi]);
}

fn single_transform4(out: &mut [f64], data: &[f64], off: usize, step: usize, inv: f64) {
    let (ar, ai) = (data[off], data[off + 1]);
    let (br, bi) = (data[off + step], data[off + step + 1]);
    let (cr, ci) = (data[off + 2 * step], data[off + 2 * step + 1]);
    let (dr, di) = (data[off + 3 * step], data[off + 3 * step + 1]);

    let (t0r, t0i) = (ar + cr, ai + ci);
    let (t1r, t1i) = (ar - cr, ai - ci);
    let (t2r, t2i) = (br + dr, bi + di);
    let (t3r, t3i) = (inv * (br - dr), inv * (bi - di));

    out.copy_from_slice(&[
        t0r + t2r,
        t0i + t2i,
        t1r + t3i,
        t1i - t3r,
        t0r - t2r,
        t0i - t2i,
        t1r - t3i,
        t1i + t3r,
    ]);
}

fn single_real_transform2(out: &mut [f64], data: &[f64], off: usize, step: usize) {
    let (e, o) = (data[off], data[off + step]);
    out.copy_from_slice(&[e + o, 0.0, e - o, 0.0]);
}

fn single_real_transform4(out: &mut [f64], data: &[f64], off: usize, step: usize) {
    let (a, b) = (data[off], data[off + step]);
    let (c, d) = (data[off + 2 * step], data[off + 3 * step]);

    let t0 = a + c;
    let t1 = a - c;
    let t2 = b + d;
    let t3 = b - d;

    out.copy_from_slice(&[t0 + t2, 0.0, t1, -t3, t0 - t2, 0.0, t1, t3]);
}
