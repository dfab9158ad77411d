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

//! Owned 8-bit image buffer.
//!
//! [`Image`] wraps an `Array3<u8>` shaped `(height, width, channels)` in
//! standard (row-major) layout, so the raw buffer is always
//! `width * height * channels` bytes long.

use std::fs::File;
use std::io::{BufReader, Cursor};
use std::path::Path;

use image::codecs::png::PngEncoder;
use image::io::Reader as ImageReader;
use image::{save_buffer, ColorType, DynamicImage, ImageEncoder};
use ndarray::parallel::prelude::*;
use ndarray::prelude::*;

use crate::error::{Error, Result};

/// An owned image with 1 to 4 interleaved 8-bit channels.
///
/// Channel layouts: 1 = luma, 2 = luma + alpha, 3 = RGB, 4 = RGBA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    data: Array3<u8>,
}

impl Image {
    /// Creates a zero-filled image.
    pub fn new(width: usize, height: usize, channels: usize) -> Result<Self> {
        check_shape(width, height, channels)?;
        Ok(Self {
            data: Array3::zeros((height, width, channels)),
        })
    }

    /// Creates an image from a row-major interleaved buffer.
    pub fn from_raw(width: usize, height: usize, channels: usize, buf: Vec<u8>) -> Result<Self> {
        check_shape(width, height, channels)?;
        if buf.len() != width * height * channels {
            return Err(Error::input(format!(
                "buffer holds {} bytes, expected {}x{}x{}",
                buf.len(),
                width,
                height,
                channels
            )));
        }
        let data = Array3::from_shape_vec((height, width, channels), buf)
            .map_err(|e| Error::input(e.to_string()))?;
        Ok(Self { data })
    }

    /// Wraps an existing `(height, width, channels)` array.
    pub fn from_array(data: Array3<u8>) -> Result<Self> {
        let (h, w, c) = data.dim();
        check_shape(w, h, c)?;
        let data = if data.is_standard_layout() {
            data
        } else {
            data.as_standard_layout().into_owned()
        };
        Ok(Self { data })
    }

    /// Creates a solid image where every pixel equals `pixel`.
    pub fn filled(width: usize, height: usize, pixel: &[u8]) -> Result<Self> {
        let mut out = Self::new(width, height, pixel.len())?;
        for mut px in out.data.lanes_mut(Axis(2)) {
            px.assign(&ArrayView1::from(pixel));
        }
        Ok(out)
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.data.dim().1
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.data.dim().0
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.data.dim().2
    }

    /// Number of non-alpha channels.
    #[inline]
    pub fn color_channels(&self) -> usize {
        match self.channels() {
            2 => 1,
            4 => 3,
            c => c,
        }
    }

    #[inline]
    pub fn has_alpha(&self) -> bool {
        self.channels() != self.color_channels()
    }

    /// Sample at `(x, y, channel)`.
    #[inline]
    pub fn get(&self, x: usize, y: usize, c: usize) -> u8 {
        self.data[[y, x, c]]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, c: usize, v: u8) {
        self.data[[y, x, c]] = v;
    }

    /// All channels of one pixel.
    pub fn pixel(&self, x: usize, y: usize) -> ArrayView1<'_, u8> {
        self.data.slice(s![y, x, ..])
    }

    pub fn view(&self) -> ArrayView3<'_, u8> {
        self.data.view()
    }

    pub fn view_mut(&mut self) -> ArrayViewMut3<'_, u8> {
        self.data.view_mut()
    }

    pub fn into_array(self) -> Array3<u8> {
        self.data
    }

    /// Raw row-major buffer.
    pub fn as_raw(&self) -> &[u8] {
        self.data
            .as_slice()
            .expect("Image is always standard-layout")
    }

    pub fn into_raw(self) -> Vec<u8> {
        self.data.into_raw_vec()
    }

    /// Zero-filled image with the same shape.
    pub fn blank_like(&self) -> Self {
        Self {
            data: Array3::zeros(self.data.raw_dim()),
        }
    }

    /// Copies out the `w`×`h` rectangle at `(x, y)`, clipped to the image.
    pub fn crop(&self, x: usize, y: usize, w: usize, h: usize) -> Result<Self> {
        let x2 = (x + w).min(self.width());
        let y2 = (y + h).min(self.height());
        if x >= x2 || y >= y2 {
            return Err(Error::input(format!(
                "crop {}x{}+{}+{} is outside a {}x{} image",
                w,
                h,
                x,
                y,
                self.width(),
                self.height()
            )));
        }
        Ok(Self {
            data: self.data.slice(s![y..y2, x..x2, ..]).to_owned(),
        })
    }

    /// Writes `src` with its top-left corner at `(x, y)`, clipped to the image.
    pub fn paste(&mut self, src: &Image, x: usize, y: usize) {
        let x2 = (x + src.width()).min(self.width());
        let y2 = (y + src.height()).min(self.height());
        if x >= x2 || y >= y2 {
            return;
        }
        self.data
            .slice_mut(s![y..y2, x..x2, ..])
            .assign(&src.data.slice(s![..y2 - y, ..x2 - x, ..]));
    }

    /// Linear crossfade: `t = 0` yields `a`, `t = 1` yields `b`.
    pub fn blend(a: &Image, b: &Image, t: f32) -> Result<Image> {
        if a.data.dim() != b.data.dim() {
            return Err(Error::input(format!(
                "cannot blend {:?} with {:?}",
                a.data.dim(),
                b.data.dim()
            )));
        }
        let t = t.clamp(0.0, 1.0);
        let mut out = a.blank_like();
        par_azip!((o in &mut out.data, &p in &a.data, &q in &b.data) {
            *o = (p as f32 * (1.0 - t) + q as f32 * t).round().clamp(0.0, 255.0) as u8;
        });
        Ok(out)
    }

    /// Converts a decoded image, narrowing wide formats to 8 bits.
    pub fn from_dynamic(im: DynamicImage) -> Result<Self> {
        let (w, h) = (im.width() as usize, im.height() as usize);
        let (channels, raw) = match im {
            DynamicImage::ImageLuma8(b) => (1, b.into_raw()),
            DynamicImage::ImageLumaA8(b) => (2, b.into_raw()),
            DynamicImage::ImageRgb8(b) => (3, b.into_raw()),
            DynamicImage::ImageRgba8(b) => (4, b.into_raw()),
            im @ DynamicImage::ImageLuma16(_) => (1, im.into_luma8().into_raw()),
            im @ DynamicImage::ImageLumaA16(_) => (2, im.into_luma_alpha8().into_raw()),
            im @ (DynamicImage::ImageRgb16(_) | DynamicImage::ImageRgb32F(_)) => {
                (3, im.into_rgb8().into_raw())
            }
            im => (4, im.into_rgba8().into_raw()),
        };
        Self::from_raw(w, h, channels, raw)
    }

    /// Converts into a `DynamicImage` of the matching 8-bit layout.
    pub fn to_dynamic(&self) -> Result<DynamicImage> {
        let (w, h) = (self.width() as u32, self.height() as u32);
        let raw = self.as_raw().to_vec();
        let bad = || Error::input("buffer does not match image dimensions");
        Ok(match self.channels() {
            1 => DynamicImage::ImageLuma8(image::GrayImage::from_raw(w, h, raw).ok_or_else(bad)?),
            2 => DynamicImage::ImageLumaA8(
                image::GrayAlphaImage::from_raw(w, h, raw).ok_or_else(bad)?,
            ),
            3 => DynamicImage::ImageRgb8(image::RgbImage::from_raw(w, h, raw).ok_or_else(bad)?),
            _ => DynamicImage::ImageRgba8(image::RgbaImage::from_raw(w, h, raw).ok_or_else(bad)?),
        })
    }

    /// Decodes an encoded image (any format `image` recognises).
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Self::from_dynamic(image::load_from_memory(bytes)?)
    }

    /// Encodes as PNG.
    pub fn encode_png(&self) -> Result<Vec<u8>> {
        let mut buf = Cursor::new(Vec::new());
        PngEncoder::new(&mut buf).write_image(
            self.as_raw(),
            self.width() as u32,
            self.height() as u32,
            self.color_type(),
        )?;
        Ok(buf.into_inner())
    }

    /// Reads and decodes an image file, guessing the format from content.
    pub fn open(path: &Path) -> Result<Self> {
        let im = ImageReader::new(BufReader::new(File::open(path)?))
            .with_guessed_format()?
            .decode()?;
        Self::from_dynamic(im)
    }

    /// Saves to `path`, format chosen by extension.
    pub fn save(&self, path: &Path) -> Result<()> {
        save_buffer(
            path,
            self.as_raw(),
            self.width() as u32,
            self.height() as u32,
            self.color_type(),
        )?;
        Ok(())
    }

    fn color_type(&self) -> ColorType {
        match self.channels() {
            1 => ColorType::L8,
            2 => ColorType::La8,
            3 => ColorType::Rgb8,
            _ => ColorType::Rgba8,
        }
    }
}

fn check_shape(width: usize, height: usize, channels: usize) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(Error::input(format!(
            "image must not be empty ({}x{})",
            width, height
        )));
    }
    if !(1..=4).contains(&channels) {
        return Err(Error::input(format!(
            "unsupported channel count {}",
            channels
        )));
    }
    Ok(())
}
