//! Library to scramble images and video frames in controlled ways.
//!
//! Every transform takes an [`Image`] plus an options value and returns a
//! new image of the same shape. Randomized transforms accept an optional
//! seed, so a run can be reproduced exactly. The main entry points are:
//!
//! * [`scramble_image`] for encoded bytes in, PNG bytes out.
//! * [`scramble_frame`] for a decoded frame, with optional face gating.
//! * [`process_directory`] for a folder of images, in parallel.
//! * [`process_video`] for a frame sequence, optionally kept coherent
//!   across frames by following optical flow.
//!
//! Face detection and optical flow estimation are not built in. Plug them
//! in through [`FaceDetector`] and [`FlowEstimator`].

// Copyright (C) 2023 Dheatly23
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Lesser General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.
//

pub mod batch;
pub mod block;
pub mod blur;
pub mod buffer;
pub mod engine;
pub mod error;
pub mod fft;
pub mod flow;
pub mod fourier;
pub mod options;
pub mod pixel;
pub mod region;
pub mod seed;
pub mod shuffle;
pub mod temporal;
pub mod video;
pub mod warp;

#[doc(inline)]
pub use crate::batch::{
    process_directory, process_directory_with_progress, BatchProcessingOptions, BatchProgress,
    CancelToken, ProcessingResult,
};
#[doc(inline)]
pub use crate::buffer::Image;
#[doc(inline)]
pub use crate::engine::{scramble, scramble_frame, scramble_image, scramble_region};
#[doc(inline)]
pub use crate::error::{Error, Result};
#[doc(inline)]
pub use crate::fft::Fft;
#[doc(inline)]
pub use crate::flow::{FloDirectoryEstimator, FlowEstimator, FlowField};
#[doc(inline)]
pub use crate::options::*;
#[doc(inline)]
pub use crate::region::{FaceBox, FaceDetector, RegionMask, StaticBoxes};
#[doc(inline)]
pub use crate::temporal::{FrameKind, FrameOutput, TemporalScrambler};
#[doc(inline)]
pub use crate::video::{process_video, FrameSink, FrameSource, ImageSequence, SequenceWriter, VideoReport};
