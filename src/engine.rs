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

//! Option-driven dispatch to the individual transforms.

use ndarray::prelude::*;
use tracing::{debug, warn};

use crate::block::block_scramble;
use crate::blur::gaussian_blur;
use crate::buffer::Image;
use crate::error::Result;
use crate::fourier::fourier_scramble;
use crate::options::{BackgroundMode, ScrambleOptions, ScrambleVariant};
use crate::pixel::{mosaic, noise, swap, tile_shuffle};
use crate::region::{apply_gated, select_regions, FaceDetector, RegionMask};
use crate::seed::{derive_optional, rng_from_seed};
use crate::shuffle::jigsaw_image;
use crate::warp::diffeomorphic_warp;

/// Runs the configured variant over the whole of `img`.
///
/// `movable` restricts variants that can honor a mask natively (jigsaw);
/// callers composite the rest.
fn apply_variant(
    img: &Image,
    opts: &ScrambleOptions,
    movable: Option<ArrayView2<'_, bool>>,
    seed: Option<u64>,
) -> Result<Image> {
    let mut random = rng_from_seed(seed);
    match &opts.variant {
        ScrambleVariant::Pixel => Ok(noise(img, opts.intensity, &mut random)),
        ScrambleVariant::Swap => Ok(swap(img, opts.intensity, &mut random)),
        ScrambleVariant::Tile(o) => tile_shuffle(img, o, &mut random),
        ScrambleVariant::Mosaic(o) => mosaic(img, o, &mut random),
        ScrambleVariant::Jigsaw(o) => jigsaw_image(img, movable, o, &mut random),
        ScrambleVariant::Fourier(o) => fourier_scramble(img, o, seed),
        ScrambleVariant::Block(o) => block_scramble(img, o, &mut random),
        ScrambleVariant::Blur(o) => gaussian_blur(img, o),
        ScrambleVariant::Diffeomorphic(o) => diffeomorphic_warp(img, o, &mut random),
    }
}

/// Scrambles all of `img`, ignoring any face detection settings.
pub fn scramble(img: &Image, opts: &ScrambleOptions) -> Result<Image> {
    opts.validate()?;
    debug!(
        variant = opts.variant.name(),
        width = img.width(),
        height = img.height(),
        "scramble"
    );
    apply_variant(img, opts, None, opts.seed)
}

/// Scrambles only inside `region`; see [`apply_gated`] for `mode`.
pub fn scramble_region(
    img: &Image,
    opts: &ScrambleOptions,
    region: &RegionMask,
    mode: BackgroundMode,
) -> Result<Image> {
    opts.validate()?;
    apply_gated(img, region, mode, |i, crop, mask| {
        apply_variant(crop, opts, Some(mask), derive_optional(opts.seed, i as u64))
    })
}

/// Detected face regions for `img`, or `None` when the whole frame
/// should be scrambled (no face settings, no detector, or detector failure).
pub fn resolve_region(
    img: &Image,
    opts: &ScrambleOptions,
    detector: Option<&dyn FaceDetector>,
) -> Option<RegionMask> {
    let face = opts.face_detection.as_ref()?;
    let Some(detector) = detector else {
        warn!("face detection requested without a detector, scrambling whole frame");
        return None;
    };
    match detector.detect(img) {
        Ok(raw) => {
            let boxes = select_regions(&raw, face, img.width() as u32, img.height() as u32);
            debug!(faces = boxes.len(), "faces detected");
            Some(RegionMask::from_boxes(img.width(), img.height(), &boxes))
        }
        Err(e) => {
            warn!(error = %e, "face detection failed, scrambling whole frame");
            None
        }
    }
}

/// Scrambles one frame, honoring face detection when configured.
pub fn scramble_frame(
    img: &Image,
    opts: &ScrambleOptions,
    detector: Option<&dyn FaceDetector>,
) -> Result<Image> {
    opts.validate()?;
    match (resolve_region(img, opts, detector), &opts.face_detection) {
        (Some(region), Some(face)) => scramble_region(img, opts, &region, face.background_mode),
        _ => scramble(img, opts),
    }
}

/// Decodes an encoded image, scrambles it, and re-encodes it as PNG.
pub fn scramble_image(
    bytes: &[u8],
    opts: &ScrambleOptions,
    detector: Option<&dyn FaceDetector>,
) -> Result<Vec<u8>> {
    opts.validate()?;
    let img = Image::decode(bytes)?;
    scramble_frame(&img, opts, detector)?.encode_png()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::options::{
        BlockOptions, BlurOptions, DiffeomorphicOptions, FaceDetectionOptions, FourierOptions,
        JigsawOptions, MosaicOptions, TileOptions,
    };
    use crate::region::{FaceBox, StaticBoxes};

    struct Broken;

    impl FaceDetector for Broken {
        fn detect(&self, _img: &Image) -> Result<Vec<FaceBox>> {
            Err(Error::Computation("model missing".into()))
        }
    }

    fn sample() -> Image {
        let buf = (0..24 * 16 * 3).map(|i| (i * 37 % 256) as u8).collect();
        Image::from_raw(24, 16, 3, buf).unwrap()
    }

    #[test]
    fn every_variant_keeps_shape() {
        let img = sample();
        for variant in [
            ScrambleVariant::Pixel,
            ScrambleVariant::Swap,
            ScrambleVariant::Tile(TileOptions { ratio: 4 }),
            ScrambleVariant::Mosaic(MosaicOptions { cell_size: 4 }),
            ScrambleVariant::Jigsaw(JigsawOptions {
                tile_size: 4,
                rotate: true,
                flip: true,
            }),
            ScrambleVariant::Fourier(FourierOptions::default()),
            ScrambleVariant::Block(BlockOptions {
                block_size: (8, 8),
                ..Default::default()
            }),
            ScrambleVariant::Blur(BlurOptions { sigma: 1.0 }),
            ScrambleVariant::Diffeomorphic(DiffeomorphicOptions {
                max_distortion: 3.0,
                n_steps: 5,
                n_comp: 3,
            }),
        ] {
            let opts = ScrambleOptions::new(variant).with_seed(1);
            let a = scramble(&img, &opts).unwrap();
            let b = scramble(&img, &opts).unwrap();
            assert_eq!((a.width(), a.height(), a.channels()), (24, 16, 3));
            assert_eq!(a, b, "{} is not reproducible", opts.variant.name());
        }
    }

    #[test]
    fn invalid_options_rejected_before_work() {
        let opts = ScrambleOptions::new(ScrambleVariant::Block(BlockOptions {
            block_size: (200, 8),
            ..Default::default()
        }));
        assert!(matches!(
            scramble_image(b"not an image", &opts, None),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn undecodable_bytes() {
        let opts = ScrambleOptions::default();
        assert!(matches!(
            scramble_image(b"not an image", &opts, None),
            Err(Error::Decode(_))
        ));
    }

    #[test]
    fn png_round_trip_through_engine() {
        let img = Image::filled(4, 4, &[9, 99, 199]).unwrap();
        let bytes = img.encode_png().unwrap();
        let opts = ScrambleOptions::default().with_intensity(0.0);
        let out = scramble_image(&bytes, &opts, None).unwrap();
        assert_eq!(Image::decode(&out).unwrap(), img);
    }

    #[test]
    fn detector_failure_scrambles_everything() {
        let img = Image::filled(8, 8, &[10, 10, 10]).unwrap();
        let opts = ScrambleOptions::default()
            .with_intensity(1.0)
            .with_seed(3)
            .with_face_detection(FaceDetectionOptions::default());
        let out = scramble_frame(&img, &opts, Some(&Broken)).unwrap();
        let untouched = (0..8)
            .flat_map(|y| (0..8).map(move |x| (x, y)))
            .filter(|&(x, y)| out.pixel(x, y) == img.pixel(x, y))
            .count();
        assert_eq!(untouched, 0);
    }

    #[test]
    fn faces_gate_the_scramble() {
        let img = Image::filled(16, 16, &[10, 10, 10]).unwrap();
        let faces = StaticBoxes(vec![
            FaceBox::new(2, 2, 6, 6, 0.9),
            FaceBox::new(10, 10, 14, 14, 0.2),
        ]);
        let opts = ScrambleOptions::default()
            .with_intensity(1.0)
            .with_seed(4)
            .with_face_detection(FaceDetectionOptions::default());
        let out = scramble_frame(&img, &opts, Some(&faces)).unwrap();
        for y in 0..16 {
            for x in 0..16 {
                let inside = (2..6).contains(&x) && (2..6).contains(&y);
                assert_eq!(out.pixel(x, y) == img.pixel(x, y), !inside, "({}, {})", x, y);
            }
        }
    }
}
