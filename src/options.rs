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

//! Options schema.
//!
//! These structs are the wire contract with whatever drives the engine
//! (CLI, UI, JSON files). Field names and variant tags serialize with
//! serde's default externally-tagged representation, e.g.
//!
//! ```json
//! { "variant": { "Block": { "block_size": [16, 16],
//!                           "interpolate_edges": false,
//!                           "padding_mode": "Reflect" } },
//!   "intensity": 0.5, "seed": 7, "face_detection": null }
//! ```
//!
//! Every struct has a `validate` method; transforms call it before
//! touching any pixel, so a bad option is never partially applied.

use std::ops::RangeInclusive;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Allowed block side length, in pixels.
pub const BLOCK_SIZE_RANGE: RangeInclusive<u32> = 4..=128;
/// Allowed Gaussian sigma.
pub const BLUR_SIGMA_RANGE: RangeInclusive<f32> = 0.5..=25.0;
/// Allowed RMS displacement for diffeomorphic warps (lower bound exclusive).
pub const MAX_DISTORTION_LIMIT: f32 = 100.0;
/// Allowed integration step count.
pub const N_STEPS_RANGE: RangeInclusive<u32> = 1..=100;
/// Allowed basis components per axis.
pub const N_COMP_RANGE: RangeInclusive<u32> = 1..=32;
/// Allowed jigsaw tile side (power of two).
pub const JIGSAW_TILE_RANGE: RangeInclusive<u32> = 1..=1024;

/// Top-level options for one scramble invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrambleOptions {
    #[serde(alias = "scramble_type")]
    pub variant: ScrambleVariant,
    /// Strength in `[0, 1]`; used by the pixel-level variants.
    #[serde(default = "default_intensity")]
    pub intensity: f32,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub face_detection: Option<FaceDetectionOptions>,
}

fn default_intensity() -> f32 {
    0.5
}

impl Default for ScrambleOptions {
    fn default() -> Self {
        Self {
            variant: ScrambleVariant::Pixel,
            intensity: default_intensity(),
            seed: None,
            face_detection: None,
        }
    }
}

impl ScrambleOptions {
    pub fn new(variant: ScrambleVariant) -> Self {
        Self {
            variant,
            ..Default::default()
        }
    }

    pub fn with_intensity(mut self, intensity: f32) -> Self {
        self.intensity = intensity;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_face_detection(mut self, face: FaceDetectionOptions) -> Self {
        self.face_detection = Some(face);
        self
    }

    pub fn validate(&self) -> Result<()> {
        check_unit("intensity", self.intensity)?;
        self.variant.validate()?;
        if let Some(face) = &self.face_detection {
            face.validate()?;
        }
        Ok(())
    }
}

/// Which transform to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScrambleVariant {
    /// Each pixel is replaced by uniform noise with probability `intensity`.
    Pixel,
    /// Each pixel is swapped with a random partner with probability `intensity`.
    Swap,
    /// Legacy tile shuffle on a `ratio`×`ratio` grid.
    Tile(TileOptions),
    /// Each cell is flooded with one randomly chosen pixel of that cell.
    Mosaic(MosaicOptions),
    /// Mask-aware power-of-two block shuffle.
    Jigsaw(JigsawOptions),
    Fourier(FourierOptions),
    Block(BlockOptions),
    Blur(BlurOptions),
    Diffeomorphic(DiffeomorphicOptions),
}

impl ScrambleVariant {
    /// Short lowercase tag, used in logs and output names.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pixel => "pixel",
            Self::Swap => "swap",
            Self::Tile(_) => "tile",
            Self::Mosaic(_) => "mosaic",
            Self::Jigsaw(_) => "jigsaw",
            Self::Fourier(_) => "fourier",
            Self::Block(_) => "block",
            Self::Blur(_) => "blur",
            Self::Diffeomorphic(_) => "diffeomorphic",
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Pixel | Self::Swap => Ok(()),
            Self::Tile(o) => o.validate(),
            Self::Mosaic(o) => o.validate(),
            Self::Jigsaw(o) => o.validate(),
            Self::Fourier(o) => o.validate(),
            Self::Block(o) => o.validate(),
            Self::Blur(o) => o.validate(),
            Self::Diffeomorphic(o) => o.validate(),
        }
    }
}

/// Boundary handling when a canvas is enlarged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaddingMode {
    /// Constant zero.
    Zero,
    /// Mirror about the edge samples (edge not repeated).
    Reflect,
    /// Periodic tiling.
    Wrap,
}

impl PaddingMode {
    /// Maps a possibly out-of-range index into `0..len`, or `None` for
    /// zero padding.
    pub fn source_index(self, i: isize, len: usize) -> Option<usize> {
        let n = len as isize;
        if (0..n).contains(&i) {
            return Some(i as usize);
        }
        match self {
            Self::Zero => None,
            Self::Wrap => Some(i.rem_euclid(n) as usize),
            Self::Reflect => {
                if len == 1 {
                    return Some(0);
                }
                let period = 2 * n - 2;
                let m = i.rem_euclid(period);
                Some(if m < n { m } else { period - m } as usize)
            }
        }
    }
}

/// Frequency band selected for scrambling. Cutoffs are fractions of the
/// Nyquist frequency.
///
/// Besides `{"HighPass": {"cutoff": 0.3}}`, the bare legacy form
/// `{"HighPass": 0.3}` is accepted when reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "FrequencyRangeRepr")]
pub enum FrequencyRange {
    All,
    HighPass { cutoff: f32 },
    LowPass { cutoff: f32 },
    BandPass { low: f32, high: f32 },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Cutoff {
    Bare(f32),
    Named { cutoff: f32 },
}

impl Cutoff {
    fn value(self) -> f32 {
        match self {
            Self::Bare(v) | Self::Named { cutoff: v } => v,
        }
    }
}

#[derive(Deserialize)]
enum FrequencyRangeRepr {
    All,
    HighPass(Cutoff),
    LowPass(Cutoff),
    BandPass { low: f32, high: f32 },
}

impl From<FrequencyRangeRepr> for FrequencyRange {
    fn from(repr: FrequencyRangeRepr) -> Self {
        match repr {
            FrequencyRangeRepr::All => Self::All,
            FrequencyRangeRepr::HighPass(c) => Self::HighPass { cutoff: c.value() },
            FrequencyRangeRepr::LowPass(c) => Self::LowPass { cutoff: c.value() },
            FrequencyRangeRepr::BandPass { low, high } => Self::BandPass { low, high },
        }
    }
}

impl FrequencyRange {
    /// Whether a normalized radial frequency `r` in `[0, 1]` is selected.
    pub fn passes(&self, r: f64) -> bool {
        match *self {
            Self::All => true,
            Self::HighPass { cutoff } => r >= cutoff as f64,
            Self::LowPass { cutoff } => r <= cutoff as f64,
            Self::BandPass { low, high } => r >= low as f64 && r <= high as f64,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match *self {
            Self::All => Ok(()),
            Self::HighPass { cutoff } | Self::LowPass { cutoff } => check_unit("cutoff", cutoff),
            Self::BandPass { low, high } => {
                check_unit("low cutoff", low)?;
                check_unit("high cutoff", high)?;
                if low >= high {
                    return Err(Error::config(format!(
                        "band-pass low cutoff {} must be below high cutoff {}",
                        low, high
                    )));
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FourierOptions {
    pub frequency_range: FrequencyRange,
    pub phase_scramble: bool,
    /// Perturbs each selected amplitude `a` to `a * max(0, 1 + intensity * u)`,
    /// `u` uniform in `[-1, 1)`.
    pub magnitude_scramble: bool,
    pub padding_mode: PaddingMode,
    pub intensity: f32,
    /// Process the mean of the color channels and write it back to all of them.
    pub grayscale: bool,
}

impl Default for FourierOptions {
    fn default() -> Self {
        Self {
            frequency_range: FrequencyRange::All,
            phase_scramble: true,
            magnitude_scramble: false,
            padding_mode: PaddingMode::Reflect,
            intensity: 1.0,
            grayscale: false,
        }
    }
}

impl FourierOptions {
    pub fn validate(&self) -> Result<()> {
        self.frequency_range.validate()?;
        check_unit("fourier intensity", self.intensity)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockOptions {
    /// Block width and height in pixels.
    pub block_size: (u32, u32),
    /// Blend a narrow band across each block seam.
    pub interpolate_edges: bool,
    pub padding_mode: PaddingMode,
}

impl Default for BlockOptions {
    fn default() -> Self {
        Self {
            block_size: (32, 32),
            interpolate_edges: true,
            padding_mode: PaddingMode::Reflect,
        }
    }
}

impl BlockOptions {
    pub fn validate(&self) -> Result<()> {
        let (w, h) = self.block_size;
        if !BLOCK_SIZE_RANGE.contains(&w) || !BLOCK_SIZE_RANGE.contains(&h) {
            return Err(Error::config(format!(
                "block size {}x{} outside {:?}",
                w, h, BLOCK_SIZE_RANGE
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlurOptions {
    pub sigma: f32,
}

impl Default for BlurOptions {
    fn default() -> Self {
        Self { sigma: 5.0 }
    }
}

impl BlurOptions {
    pub fn validate(&self) -> Result<()> {
        if !BLUR_SIGMA_RANGE.contains(&self.sigma) {
            return Err(Error::config(format!(
                "blur sigma {} outside {:?}",
                self.sigma, BLUR_SIGMA_RANGE
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffeomorphicOptions {
    /// RMS pixel displacement of the whole warp.
    pub max_distortion: f32,
    /// Number of composed sub-warps.
    pub n_steps: u32,
    /// Basis components per axis.
    pub n_comp: u32,
}

impl Default for DiffeomorphicOptions {
    fn default() -> Self {
        Self {
            max_distortion: 10.0,
            n_steps: 20,
            n_comp: 6,
        }
    }
}

impl DiffeomorphicOptions {
    pub fn validate(&self) -> Result<()> {
        if !(self.max_distortion > 0.0 && self.max_distortion <= MAX_DISTORTION_LIMIT) {
            return Err(Error::config(format!(
                "max_distortion {} outside (0, {}]",
                self.max_distortion, MAX_DISTORTION_LIMIT
            )));
        }
        if !N_STEPS_RANGE.contains(&self.n_steps) {
            return Err(Error::config(format!(
                "n_steps {} outside {:?}",
                self.n_steps, N_STEPS_RANGE
            )));
        }
        if !N_COMP_RANGE.contains(&self.n_comp) {
            return Err(Error::config(format!(
                "n_comp {} outside {:?}",
                self.n_comp, N_COMP_RANGE
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileOptions {
    /// Tiles per axis.
    pub ratio: u32,
}

impl Default for TileOptions {
    fn default() -> Self {
        Self { ratio: 8 }
    }
}

impl TileOptions {
    pub fn validate(&self) -> Result<()> {
        if self.ratio == 0 {
            return Err(Error::config("tile ratio must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MosaicOptions {
    pub cell_size: u32,
}

impl Default for MosaicOptions {
    fn default() -> Self {
        Self { cell_size: 8 }
    }
}

impl MosaicOptions {
    pub fn validate(&self) -> Result<()> {
        if self.cell_size == 0 {
            return Err(Error::config("mosaic cell size must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JigsawOptions {
    /// Largest block side, must be a power of two.
    pub tile_size: u32,
    /// Rotate square blocks by a random multiple of 90°.
    #[serde(default)]
    pub rotate: bool,
    /// Mirror blocks randomly.
    #[serde(default)]
    pub flip: bool,
}

impl Default for JigsawOptions {
    fn default() -> Self {
        Self {
            tile_size: 16,
            rotate: false,
            flip: false,
        }
    }
}

impl JigsawOptions {
    /// Tile size as a power-of-two exponent.
    pub fn chunk_po2(&self) -> usize {
        self.tile_size.max(1).ilog2() as usize
    }

    pub fn validate(&self) -> Result<()> {
        if !JIGSAW_TILE_RANGE.contains(&self.tile_size) || !self.tile_size.is_power_of_two() {
            return Err(Error::config(format!(
                "jigsaw tile size {} must be a power of two in {:?}",
                self.tile_size, JIGSAW_TILE_RANGE
            )));
        }
        Ok(())
    }
}

/// Which part of the frame survives when a region gate is active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackgroundMode {
    /// Keep the background untouched, scramble only inside the regions.
    #[default]
    Include,
    /// Drop the background: output holds only the scrambled regions.
    Exclude,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceDetectionOptions {
    pub confidence_threshold: f32,
    /// Box dilation factor, 1.0 leaves boxes as detected.
    pub expansion_factor: f32,
    pub background_mode: BackgroundMode,
}

impl Default for FaceDetectionOptions {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
            expansion_factor: 1.0,
            background_mode: BackgroundMode::Include,
        }
    }
}

impl FaceDetectionOptions {
    pub fn validate(&self) -> Result<()> {
        check_unit("confidence_threshold", self.confidence_threshold)?;
        if !(1.0..=10.0).contains(&self.expansion_factor) {
            return Err(Error::config(format!(
                "expansion_factor {} outside [1, 10]",
                self.expansion_factor
            )));
        }
        Ok(())
    }
}

/// Settings for flow-propagated video scrambling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalCoherenceOptions {
    #[serde(default)]
    pub export_flow: bool,
    #[serde(default)]
    pub flow_output_dir: Option<PathBuf>,
    /// Frames between fresh scrambles; 0 scrambles every frame afresh.
    pub keyframe_interval: u32,
    /// Crossfade length at each keyframe. Ignored when `keyframe_interval` is 0.
    #[serde(default)]
    pub blend_frames: u32,
}

impl Default for TemporalCoherenceOptions {
    fn default() -> Self {
        Self {
            export_flow: false,
            flow_output_dir: None,
            keyframe_interval: 30,
            blend_frames: 0,
        }
    }
}

impl TemporalCoherenceOptions {
    pub fn validate(&self) -> Result<()> {
        if self.export_flow && self.flow_output_dir.is_none() {
            return Err(Error::config("export_flow requires flow_output_dir"));
        }
        if self.keyframe_interval > 0 && self.blend_frames >= self.keyframe_interval {
            return Err(Error::config(format!(
                "blend_frames {} must be shorter than keyframe_interval {}",
                self.blend_frames, self.keyframe_interval
            )));
        }
        Ok(())
    }

    pub fn is_keyframe(&self, frame: usize) -> bool {
        self.keyframe_interval == 0 || frame % self.keyframe_interval as usize == 0
    }
}

fn check_unit(name: &str, v: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&v) {
        return Err(Error::config(format!("{} {} outside [0, 1]", name, v)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        ScrambleOptions::default().validate().unwrap();
        for variant in [
            ScrambleVariant::Pixel,
            ScrambleVariant::Swap,
            ScrambleVariant::Tile(Default::default()),
            ScrambleVariant::Mosaic(Default::default()),
            ScrambleVariant::Jigsaw(Default::default()),
            ScrambleVariant::Fourier(Default::default()),
            ScrambleVariant::Block(Default::default()),
            ScrambleVariant::Blur(Default::default()),
            ScrambleVariant::Diffeomorphic(Default::default()),
        ] {
            ScrambleOptions::new(variant).validate().unwrap();
        }
        TemporalCoherenceOptions::default().validate().unwrap();
        FaceDetectionOptions::default().validate().unwrap();
    }

    #[test]
    fn out_of_range_rejected() {
        let bad = ScrambleOptions::default().with_intensity(1.5);
        assert!(matches!(bad.validate(), Err(Error::Configuration(_))));

        let block = BlockOptions {
            block_size: (2, 32),
            ..Default::default()
        };
        assert!(block.validate().is_err());

        let band = FrequencyRange::BandPass { low: 0.6, high: 0.2 };
        assert!(band.validate().is_err());

        let blur = BlurOptions { sigma: 0.0 };
        assert!(blur.validate().is_err());

        let diffeo = DiffeomorphicOptions {
            n_steps: 0,
            ..Default::default()
        };
        assert!(diffeo.validate().is_err());

        let jig = JigsawOptions {
            tile_size: 12,
            ..Default::default()
        };
        assert!(jig.validate().is_err());

        let temporal = TemporalCoherenceOptions {
            export_flow: true,
            flow_output_dir: None,
            ..Default::default()
        };
        assert!(temporal.validate().is_err());
    }

    #[test]
    fn wire_format_round_trips() {
        let opts = ScrambleOptions::new(ScrambleVariant::Fourier(FourierOptions {
            frequency_range: FrequencyRange::BandPass { low: 0.1, high: 0.4 },
            ..Default::default()
        }))
        .with_seed(3)
        .with_face_detection(FaceDetectionOptions::default());
        let json = serde_json::to_string(&opts).unwrap();
        assert!(json.contains("\"Fourier\""));
        assert!(json.contains("\"BandPass\""));
        let back: ScrambleOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(back, opts);
    }

    #[test]
    fn legacy_field_name_accepted() {
        let json = r#"{
            "scramble_type": { "Block": { "block_size": [16, 8],
                "interpolate_edges": false, "padding_mode": "Wrap" } },
            "intensity": 0.25,
            "seed": null,
            "face_detection": null
        }"#;
        let opts: ScrambleOptions = serde_json::from_str(json).unwrap();
        assert_eq!(opts.intensity, 0.25);
        match opts.variant {
            ScrambleVariant::Block(b) => assert_eq!(b.block_size, (16, 8)),
            other => panic!("unexpected variant {:?}", other),
        }
        let pixel: ScrambleOptions = serde_json::from_str(r#"{"variant": "Pixel"}"#).unwrap();
        assert_eq!(pixel.variant, ScrambleVariant::Pixel);
        assert_eq!(pixel.intensity, 0.5);
    }

    #[test]
    fn bare_cutoffs_accepted() {
        let parse = |s: &str| serde_json::from_str::<FrequencyRange>(s).unwrap();
        assert_eq!(parse(r#"{"HighPass": 0.3}"#), FrequencyRange::HighPass { cutoff: 0.3 });
        assert_eq!(
            parse(r#"{"LowPass": {"cutoff": 0.6}}"#),
            FrequencyRange::LowPass { cutoff: 0.6 }
        );
        assert_eq!(parse(r#""All""#), FrequencyRange::All);
        assert_eq!(
            parse(r#"{"BandPass": {"low": 0.1, "high": 0.2}}"#),
            FrequencyRange::BandPass { low: 0.1, high: 0.2 }
        );
        let written = serde_json::to_string(&FrequencyRange::HighPass { cutoff: 0.5 }).unwrap();
        assert_eq!(parse(&written), FrequencyRange::HighPass { cutoff: 0.5 });
    }

    #[test]
    fn padding_indices() {
        assert_eq!(PaddingMode::Zero.source_index(-1, 4), None);
        assert_eq!(PaddingMode::Wrap.source_index(-1, 4), Some(3));
        assert_eq!(PaddingMode::Wrap.source_index(5, 4), Some(1));
        assert_eq!(PaddingMode::Reflect.source_index(-1, 4), Some(1));
        assert_eq!(PaddingMode::Reflect.source_index(4, 4), Some(2));
        assert_eq!(PaddingMode::Reflect.source_index(6, 4), Some(0));
        assert_eq!(PaddingMode::Reflect.source_index(9, 1), Some(0));
    }

    #[test]
    fn keyframe_schedule() {
        let every = TemporalCoherenceOptions {
            keyframe_interval: 0,
            ..Default::default()
        };
        assert!((0..10).all(|f| every.is_keyframe(f)));

        let five = TemporalCoherenceOptions {
            keyframe_interval: 5,
            ..Default::default()
        };
        let keys: Vec<_> = (0..12).filter(|&f| five.is_keyframe(f)).collect();
        assert_eq!(keys, vec![0, 5, 10]);
    }
}
