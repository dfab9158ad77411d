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

//! Temporally coherent scrambling across video frames.
//!
//! Keyframes are scrambled afresh. Every other frame reuses the previous
//! scrambled output, moved along the optical flow between the two source
//! frames, so the scramble follows the motion instead of flickering.
//! Around keyframes the old and new chains can be crossfaded.

use std::fs;

use tracing::{debug, warn};

use crate::buffer::Image;
use crate::engine::{resolve_region, scramble_frame};
use crate::error::Result;
use crate::flow::{flo_file_name, warp_by_flow, FlowEstimator, FlowField};
use crate::options::{BackgroundMode, ScrambleOptions, TemporalCoherenceOptions};
use crate::region::{composite, FaceDetector};
use crate::seed::derive_optional;

/// How a frame's output was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Fresh scramble on the keyframe schedule.
    Keyframe,
    /// Previous output moved along the flow.
    Propagated,
    /// Crossfade between the outgoing and incoming chains; `step` of `of`.
    Blended { step: u32, of: u32 },
    /// Fresh scramble because flow was unavailable.
    Fallback,
}

#[derive(Debug, Clone)]
pub struct FrameOutput {
    pub image: Image,
    pub kind: FrameKind,
    /// Flow computed for this frame, if any.
    pub flow: Option<FlowField>,
}

#[derive(Debug)]
struct Fade {
    outgoing: Image,
    step: u32,
}

#[derive(Debug)]
struct Chain {
    source: Image,
    scrambled: Image,
    fade: Option<Fade>,
}

/// Per-video state machine. Feed frames in order with [`TemporalScrambler::push`].
pub struct TemporalScrambler<'a> {
    scramble: ScrambleOptions,
    temporal: TemporalCoherenceOptions,
    estimator: Option<&'a dyn FlowEstimator>,
    detector: Option<&'a dyn FaceDetector>,
    chain: Option<Chain>,
    next_frame: usize,
}

impl<'a> TemporalScrambler<'a> {
    pub fn new(
        scramble: ScrambleOptions,
        temporal: TemporalCoherenceOptions,
        estimator: Option<&'a dyn FlowEstimator>,
    ) -> Result<Self> {
        scramble.validate()?;
        temporal.validate()?;
        if let Some(dir) = temporal.flow_output_dir.as_ref().filter(|_| temporal.export_flow) {
            fs::create_dir_all(dir)?;
        }
        Ok(Self {
            scramble,
            temporal,
            estimator,
            detector: None,
            chain: None,
            next_frame: 0,
        })
    }

    pub fn with_detector(mut self, detector: Option<&'a dyn FaceDetector>) -> Self {
        self.detector = detector;
        self
    }

    /// Index the next pushed frame will get.
    pub fn next_frame(&self) -> usize {
        self.next_frame
    }

    /// Accounts for a frame that could not be read. The chain restarts,
    /// so the frame after it becomes a keyframe.
    pub fn skip(&mut self) {
        debug!(frame = self.next_frame, "frame skipped");
        self.next_frame += 1;
        self.chain = None;
    }

    fn fresh(&self, frame: usize, img: &Image) -> Result<Image> {
        let opts = ScrambleOptions {
            seed: derive_optional(self.scramble.seed, frame as u64),
            ..self.scramble.clone()
        };
        scramble_frame(img, &opts, self.detector)
    }

    fn estimate(&self, frame: usize, previous: &Image, current: &Image) -> Option<FlowField> {
        let estimator = self.estimator?;
        match estimator.estimate(frame, previous, current) {
            Ok(flow) => {
                if self.temporal.export_flow {
                    if let Some(dir) = &self.temporal.flow_output_dir {
                        let path = dir.join(flo_file_name(frame));
                        if let Err(e) = flow.save(&path) {
                            warn!(frame, error = %e, "could not export flow");
                        }
                    }
                }
                Some(flow)
            }
            Err(e) => {
                warn!(frame, error = %e, "flow estimation failed, falling back to keyframe");
                None
            }
        }
    }

    /// Warps the previous output and restricts it to the current face regions.
    fn propagate(&self, img: &Image, previous: &Image, flow: &FlowField) -> Result<Image> {
        let warped = warp_by_flow(previous, flow)?;
        let (Some(region), Some(face)) = (
            resolve_region(img, &self.scramble, self.detector),
            &self.scramble.face_detection,
        ) else {
            return Ok(warped);
        };
        let mut out = match face.background_mode {
            BackgroundMode::Include => img.clone(),
            BackgroundMode::Exclude => img.blank_like(),
        };
        composite(&mut out, &warped, region.view());
        Ok(out)
    }

    /// Scrambles the next frame of the sequence.
    pub fn push(&mut self, img: &Image) -> Result<FrameOutput> {
        let frame = self.next_frame;
        self.next_frame += 1;

        let scheduled = self.temporal.is_keyframe(frame);
        // Without a schedule there is nothing to fade between
        let blend = match self.temporal.keyframe_interval {
            0 => 0,
            _ => self.temporal.blend_frames,
        };

        let chain = match self.chain.take() {
            Some(c) if (c.source.width(), c.source.height()) == (img.width(), img.height()) => Some(c),
            Some(_) => {
                warn!(frame, "frame size changed, restarting chain");
                None
            }
            None => None,
        };

        let wants_flow = match &chain {
            Some(c) => {
                !scheduled || c.fade.is_some() || blend > 0 || self.temporal.export_flow
            }
            None => false,
        };
        let flow = match &chain {
            Some(c) if wants_flow => self.estimate(frame, &c.source, img),
            _ => None,
        };

        let (scrambled, mut kind, fade) = match (chain, &flow) {
            (Some(c), Some(flow)) if !scheduled => {
                let scrambled = self.propagate(img, &c.scrambled, flow)?;
                let fade = match c.fade {
                    Some(f) => Some(Fade {
                        outgoing: self.propagate(img, &f.outgoing, flow)?,
                        step: f.step + 1,
                    }),
                    None => None,
                };
                (scrambled, FrameKind::Propagated, fade)
            }
            (Some(c), Some(flow)) if blend > 0 => {
                let outgoing = self.propagate(img, &c.scrambled, flow)?;
                let scrambled = self.fresh(frame, img)?;
                (scrambled, FrameKind::Keyframe, Some(Fade { outgoing, step: 1 }))
            }
            (Some(_), None) if !scheduled => (self.fresh(frame, img)?, FrameKind::Fallback, None),
            _ => (self.fresh(frame, img)?, FrameKind::Keyframe, None),
        };

        let fade = fade.filter(|f| f.step <= blend);
        let image = match &fade {
            Some(f) => {
                kind = FrameKind::Blended {
                    step: f.step,
                    of: blend,
                };
                let t = f.step as f32 / (blend + 1) as f32;
                Image::blend(&f.outgoing, &scrambled, t)?
            }
            None => scrambled.clone(),
        };

        debug!(frame, ?kind, "frame scrambled");
        self.chain = Some(Chain {
            source: img.clone(),
            scrambled,
            fade,
        });
        Ok(FrameOutput { image, kind, flow })
    }
}
