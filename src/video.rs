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

//! Frame-sequence driver.
//!
//! Decoding and encoding containers is left to whoever implements
//! [`FrameSource`] and [`FrameSink`]. The bundled implementations work on
//! directories of numbered still images.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::batch::list_images;
use crate::buffer::Image;
use crate::error::Result;
use crate::flow::FlowEstimator;
use crate::options::{ScrambleOptions, TemporalCoherenceOptions};
use crate::region::FaceDetector;
use crate::temporal::{FrameKind, TemporalScrambler};

/// Decoded frames in presentation order.
pub trait FrameSource {
    /// Total number of frames, when known up front.
    fn frame_count(&self) -> Option<usize>;

    /// The next frame, or `None` at the end. A frame that fails to decode
    /// yields `Some(Err(..))` and the source moves on.
    fn read_frame(&mut self) -> Option<Result<Image>>;
}

pub trait FrameSink {
    fn write_frame(&mut self, index: usize, frame: &Image) -> Result<()>;

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Frames stored as image files in one directory, read in name order.
#[derive(Debug, Clone)]
pub struct ImageSequence {
    files: Vec<PathBuf>,
    next: usize,
}

impl ImageSequence {
    pub fn open(dir: &Path) -> Result<Self> {
        Ok(Self {
            files: list_images(dir)?,
            next: 0,
        })
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }
}

impl FrameSource for ImageSequence {
    fn frame_count(&self) -> Option<usize> {
        Some(self.files.len())
    }

    fn read_frame(&mut self) -> Option<Result<Image>> {
        let path = self.files.get(self.next)?;
        self.next += 1;
        Some(Image::open(path))
    }
}

/// Writes `frame_000000.png`, `frame_000001.png`, ... into a directory.
#[derive(Debug, Clone)]
pub struct SequenceWriter {
    dir: PathBuf,
}

impl SequenceWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn frame_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("frame_{:06}.png", index))
    }
}

impl FrameSink for SequenceWriter {
    fn write_frame(&mut self, index: usize, frame: &Image) -> Result<()> {
        frame.save(&self.frame_path(index))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedFrame {
    pub frame: usize,
    pub error: String,
}

/// Summary of one [`process_video`] run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoReport {
    pub frames_read: usize,
    pub frames_written: usize,
    pub keyframes: usize,
    pub propagated: usize,
    pub blended: usize,
    pub fallbacks: usize,
    pub failed: Vec<FailedFrame>,
}

impl VideoReport {
    fn count(&mut self, kind: FrameKind) {
        match kind {
            FrameKind::Keyframe => self.keyframes += 1,
            FrameKind::Propagated => self.propagated += 1,
            FrameKind::Blended { .. } => self.blended += 1,
            FrameKind::Fallback => self.fallbacks += 1,
        }
    }
}

/// Scrambles every frame of `source` into `sink`.
///
/// Without `temporal` every frame is scrambled on its own, with a seed
/// derived from the frame index. A frame that cannot be read, scrambled
/// or written is recorded in the report and the run continues. `progress`
/// receives the percentage done after each frame when the length is known,
/// and `100.0` at the end.
pub fn process_video<S, K, P>(
    source: &mut S,
    sink: &mut K,
    opts: &ScrambleOptions,
    temporal: Option<TemporalCoherenceOptions>,
    estimator: Option<&dyn FlowEstimator>,
    detector: Option<&dyn FaceDetector>,
    mut progress: P,
) -> Result<VideoReport>
where
    S: FrameSource + ?Sized,
    K: FrameSink + ?Sized,
    P: FnMut(f32),
{
    let temporal = temporal.unwrap_or(TemporalCoherenceOptions {
        keyframe_interval: 0,
        ..Default::default()
    });
    let mut scrambler =
        TemporalScrambler::new(opts.clone(), temporal, estimator)?.with_detector(detector);
    let total = source.frame_count();
    let mut report = VideoReport::default();

    while let Some(read) = source.read_frame() {
        let index = scrambler.next_frame();
        report.frames_read += 1;

        let written = match read {
            Ok(img) => scrambler.push(&img).and_then(|out| {
                sink.write_frame(index, &out.image)?;
                Ok(out.kind)
            }),
            Err(e) => {
                scrambler.skip();
                Err(e)
            }
        };
        match written {
            Ok(kind) => {
                report.frames_written += 1;
                report.count(kind);
            }
            Err(e) => {
                warn!(frame = index, error = %e, "frame failed");
                report.failed.push(FailedFrame {
                    frame: index,
                    error: e.to_string(),
                });
            }
        }

        if let Some(total) = total.filter(|&t| t > 0) {
            progress((report.frames_read as f32 / total as f32 * 100.0).min(100.0));
        }
    }

    sink.finish()?;
    progress(100.0);
    info!(
        frames = report.frames_read,
        written = report.frames_written,
        keyframes = report.keyframes,
        propagated = report.propagated,
        failed = report.failed.len(),
        "video finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::options::ScrambleVariant;

    /// In-memory source; `None` entries fail to decode.
    struct Frames(std::vec::IntoIter<Option<Image>>, usize);

    impl Frames {
        fn new(frames: Vec<Option<Image>>) -> Self {
            let n = frames.len();
            Self(frames.into_iter(), n)
        }
    }

    impl FrameSource for Frames {
        fn frame_count(&self) -> Option<usize> {
            Some(self.1)
        }

        fn read_frame(&mut self) -> Option<Result<Image>> {
            self.0
                .next()
                .map(|f| f.ok_or_else(|| Error::Input("corrupt frame".into())))
        }
    }

    #[derive(Default)]
    struct Collect(Vec<(usize, Image)>);

    impl FrameSink for Collect {
        fn write_frame(&mut self, index: usize, frame: &Image) -> Result<()> {
            self.0.push((index, frame.clone()));
            Ok(())
        }
    }

    fn opts() -> ScrambleOptions {
        ScrambleOptions::new(ScrambleVariant::Swap)
            .with_intensity(1.0)
            .with_seed(21)
    }

    #[test]
    fn bad_frames_are_isolated() {
        let f = || Some(Image::filled(6, 4, &[1, 2, 3]).unwrap());
        let mut source = Frames::new(vec![f(), None, f(), f()]);
        let mut sink = Collect::default();
        let mut events = Vec::new();
        let report = process_video(&mut source, &mut sink, &opts(), None, None, None, |p| {
            events.push(p)
        })
        .unwrap();

        assert_eq!(report.frames_read, 4);
        assert_eq!(report.frames_written, 3);
        assert_eq!(report.keyframes, 3);
        assert_eq!(
            report.failed,
            vec![FailedFrame {
                frame: 1,
                error: "invalid input: corrupt frame".into()
            }]
        );
        let indices: Vec<_> = sink.0.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, vec![0, 2, 3]);
        assert_eq!(events, vec![25.0, 50.0, 75.0, 100.0, 100.0]);
    }

    #[test]
    fn invalid_temporal_options_abort() {
        let mut source = Frames::new(vec![]);
        let temporal = TemporalCoherenceOptions {
            export_flow: true,
            flow_output_dir: None,
            ..Default::default()
        };
        let result = process_video(
            &mut source,
            &mut Collect::default(),
            &opts(),
            Some(temporal),
            None,
            None,
            |_| {},
        );
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn directory_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in");
        fs::create_dir(&input).unwrap();
        for i in 0..3u8 {
            Image::filled(5, 5, &[i * 40, 0, 0])
                .unwrap()
                .save(&input.join(format!("{:03}.png", i)))
                .unwrap();
        }
        fs::write(input.join("readme.txt"), "not a frame").unwrap();

        let mut source = ImageSequence::open(&input).unwrap();
        assert_eq!(source.frame_count(), Some(3));
        let mut sink = SequenceWriter::new(dir.path().join("out")).unwrap();
        let report =
            process_video(&mut source, &mut sink, &opts(), None, None, None, |_| {}).unwrap();
        assert_eq!(report.frames_written, 3);
        for i in 0..3 {
            let frame = Image::open(&sink.frame_path(i)).unwrap();
            assert_eq!((frame.width(), frame.height()), (5, 5));
        }
    }
}
