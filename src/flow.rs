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

//! Dense optical flow fields and the Middlebury `.flo` format.
//!
//! Flow here is backward: `(u, v)` at pixel `p` of frame `f` points to
//! where that content sat in frame `f - 1`, so `frame_f(p) ≈ frame_{f-1}(p + (u, v))`.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use ndarray::prelude::*;
use tracing::trace;

use crate::buffer::Image;
use crate::error::{Error, Result};
use crate::warp::remap;

/// Tag at the start of every `.flo` file ("PIEH" read as a float).
pub const FLO_MAGIC: f32 = 202021.25;

/// Dense per-pixel motion.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowField {
    u: Array2<f32>,
    v: Array2<f32>,
}

impl FlowField {
    pub fn zeros(width: usize, height: usize) -> Self {
        Self {
            u: Array2::zeros((height, width)),
            v: Array2::zeros((height, width)),
        }
    }

    pub fn from_components(u: Array2<f32>, v: Array2<f32>) -> Result<Self> {
        if u.dim() != v.dim() || u.is_empty() {
            return Err(Error::input(format!(
                "flow components must be equal and non-empty, got {:?} and {:?}",
                u.dim(),
                v.dim()
            )));
        }
        Ok(Self { u, v })
    }

    /// Builds a field from channel-first data: all `u`, then all `v`.
    pub fn from_planar(width: usize, height: usize, data: Vec<f32>) -> Result<Self> {
        let n = width * height;
        if n == 0 || data.len() != 2 * n {
            return Err(Error::input(format!(
                "flow data holds {} values, expected 2x{}x{}",
                data.len(),
                width,
                height
            )));
        }
        let planes = Array3::from_shape_vec((2, height, width), data)
            .map_err(|e| Error::input(e.to_string()))?;
        Self::from_components(
            planes.index_axis(Axis(0), 0).to_owned(),
            planes.index_axis(Axis(0), 1).to_owned(),
        )
    }

    /// Uniform translation.
    pub fn constant(width: usize, height: usize, u: f32, v: f32) -> Self {
        Self {
            u: Array2::from_elem((height, width), u),
            v: Array2::from_elem((height, width), v),
        }
    }

    pub fn width(&self) -> usize {
        self.u.ncols()
    }

    pub fn height(&self) -> usize {
        self.u.nrows()
    }

    pub fn get(&self, x: usize, y: usize) -> (f32, f32) {
        (self.u[[y, x]], self.v[[y, x]])
    }

    pub fn u(&self) -> ArrayView2<'_, f32> {
        self.u.view()
    }

    pub fn v(&self) -> ArrayView2<'_, f32> {
        self.v.view()
    }

    /// Serializes in `.flo` layout: magic, width, height (little-endian),
    /// then interleaved `(u, v)` pairs row by row.
    pub fn write_flo<W: Write>(&self, mut w: W) -> Result<()> {
        w.write_all(&FLO_MAGIC.to_le_bytes())?;
        w.write_all(&(self.width() as i32).to_le_bytes())?;
        w.write_all(&(self.height() as i32).to_le_bytes())?;
        for (&u, &v) in self.u.iter().zip(self.v.iter()) {
            w.write_all(&u.to_le_bytes())?;
            w.write_all(&v.to_le_bytes())?;
        }
        w.flush()?;
        Ok(())
    }

    pub fn read_flo<R: Read>(mut r: R) -> Result<Self> {
        let mut word = [0u8; 4];
        r.read_exact(&mut word)?;
        let magic = f32::from_le_bytes(word);
        if magic != FLO_MAGIC {
            return Err(Error::input(format!("bad .flo magic {}", magic)));
        }
        r.read_exact(&mut word)?;
        let width = i32::from_le_bytes(word);
        r.read_exact(&mut word)?;
        let height = i32::from_le_bytes(word);
        if width <= 0 || height <= 0 {
            return Err(Error::input(format!(
                "bad .flo dimensions {}x{}",
                width, height
            )));
        }
        let (width, height) = (width as usize, height as usize);

        let mut raw = Vec::new();
        r.read_to_end(&mut raw)?;
        if raw.len() != width * height * 8 {
            return Err(Error::input(format!(
                ".flo payload is {} bytes, expected {}",
                raw.len(),
                width * height * 8
            )));
        }
        let mut values = raw
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]));
        let mut u = Array2::zeros((height, width));
        let mut v = Array2::zeros((height, width));
        for (pu, pv) in u.iter_mut().zip(v.iter_mut()) {
            *pu = values.next().unwrap_or_default();
            *pv = values.next().unwrap_or_default();
        }
        Ok(Self { u, v })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.write_flo(BufWriter::new(File::create(path)?))
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::read_flo(BufReader::new(File::open(path)?))
    }
}

/// File name used for the flow between frames `frame - 1` and `frame`.
pub fn flo_file_name(frame: usize) -> String {
    format!("flow_{:06}_{:06}.flo", frame.saturating_sub(1), frame)
}

/// Moves `previous` along `flow`: output pixel `p` samples `previous`
/// at `p + flow(p)`.
pub fn warp_by_flow(previous: &Image, flow: &FlowField) -> Result<Image> {
    if (flow.width(), flow.height()) != (previous.width(), previous.height()) {
        return Err(Error::input(format!(
            "flow {}x{} does not match frame {}x{}",
            flow.width(),
            flow.height(),
            previous.width(),
            previous.height()
        )));
    }
    let map_x = Array2::from_shape_fn(flow.u.raw_dim(), |(y, x)| x as f32 + flow.u[[y, x]]);
    let map_y = Array2::from_shape_fn(flow.v.raw_dim(), |(y, x)| y as f32 + flow.v[[y, x]]);
    remap(previous, map_x.view(), map_y.view())
}

/// External optical flow estimator.
pub trait FlowEstimator: Send + Sync {
    /// Backward flow from `current` (frame `frame`) to `previous` (frame `frame - 1`).
    fn estimate(&self, frame: usize, previous: &Image, current: &Image) -> Result<FlowField>;
}

/// Reads precomputed flow from `flow_XXXXXX_YYYYYY.flo` files.
#[derive(Debug, Clone)]
pub struct FloDirectoryEstimator {
    dir: PathBuf,
}

impl FloDirectoryEstimator {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl FlowEstimator for FloDirectoryEstimator {
    fn estimate(&self, frame: usize, _previous: &Image, current: &Image) -> Result<FlowField> {
        let path = self.dir.join(flo_file_name(frame));
        trace!(path = %path.display(), "loading flow");
        let flow = FlowField::load(&path).map_err(|e| {
            Error::Computation(format!("no usable flow at {}: {}", path.display(), e))
        })?;
        if (flow.width(), flow.height()) != (current.width(), current.height()) {
            return Err(Error::Computation(format!(
                "flow at {} is {}x{}, frame is {}x{}",
                path.display(),
                flow.width(),
                flow.height(),
                current.width(),
                current.height()
            )));
        }
        Ok(flow)
    }
}
