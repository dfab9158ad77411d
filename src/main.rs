//! Main Program for Scramblery
//! Run with `--help` for more instruction

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

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Error};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use scramblery::region::FaceBox;
use scramblery::seed::seed_from_phrase;
use scramblery::{
    process_directory_with_progress, process_video, scramble_frame, scramble_region,
    BatchProcessingOptions, BlockOptions, BlurOptions, CancelToken, DiffeomorphicOptions,
    FaceDetectionOptions, FaceDetector, FloDirectoryEstimator, FlowEstimator, FourierOptions,
    Image, ImageSequence, JigsawOptions, MosaicOptions, RegionMask, ScrambleOptions,
    ScrambleVariant, SequenceWriter, StaticBoxes, TemporalCoherenceOptions, TileOptions,
};

#[derive(Parser, Debug)]
#[command(author, version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Number of threads (0 = auto)
    #[arg(short = 'j', long, global = true, default_value = "0")]
    threads: usize,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scramble a single image
    Image {
        /// Input file
        input: PathBuf,

        /// Output file
        #[arg(short = 'o', long)]
        output: PathBuf,

        /// Mask file (pixels darker than white are scrambled)
        #[arg(short = 'm', long)]
        mask: Option<PathBuf>,

        #[command(flatten)]
        common: Common,
    },

    /// Scramble every image in a directory
    Batch {
        /// Input directory
        input: PathBuf,

        /// Output directory
        #[arg(short = 'o', long)]
        output: PathBuf,

        #[command(flatten)]
        common: Common,
    },

    /// Scramble a directory of numbered frames
    Video {
        /// Directory of input frames
        input: PathBuf,

        /// Directory for output frames
        #[arg(short = 'o', long)]
        output: PathBuf,

        /// Directory of precomputed flow_XXXXXX_YYYYYY.flo files
        #[arg(long)]
        flow_dir: Option<PathBuf>,

        /// Frames between fresh scrambles (0 = every frame)
        #[arg(long)]
        keyframe_interval: Option<u32>,

        /// Crossfade length at keyframes
        #[arg(long, default_value = "0")]
        blend_frames: u32,

        /// Write every computed flow field into this directory
        #[arg(long)]
        export_flow: Option<PathBuf>,

        #[command(flatten)]
        common: Common,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Variant {
    Pixel,
    Swap,
    Tile,
    Mosaic,
    Jigsaw,
    Fourier,
    Block,
    Blur,
    Diffeomorphic,
}

#[derive(Args, Debug)]
struct Common {
    /// JSON options file; flags below override it
    #[arg(long)]
    options: Option<PathBuf>,

    /// Transform to apply
    #[arg(long, value_enum)]
    variant: Option<Variant>,

    /// Strength in [0, 1]
    #[arg(long)]
    intensity: Option<f32>,

    /// Random seed
    #[arg(long)]
    seed: Option<String>,

    /// Tile size for jigsaw (must be power of 2)
    #[arg(short = 't', long, default_value = "16")]
    tile_size: u32,

    /// Rotate jigsaw blocks randomly
    #[arg(long)]
    rotate: bool,

    /// Flip jigsaw blocks randomly
    #[arg(long)]
    flip: bool,

    /// Block side for block scrambling
    #[arg(long, default_value = "32")]
    block_size: u32,

    /// Gaussian sigma for blur
    #[arg(long, default_value = "5.0")]
    sigma: f32,

    /// JSON list of face boxes used as detector output
    #[arg(long)]
    faces: Option<PathBuf>,
}

impl Common {
    fn variant(&self, v: Variant) -> ScrambleVariant {
        match v {
            Variant::Pixel => ScrambleVariant::Pixel,
            Variant::Swap => ScrambleVariant::Swap,
            Variant::Tile => ScrambleVariant::Tile(TileOptions::default()),
            Variant::Mosaic => ScrambleVariant::Mosaic(MosaicOptions::default()),
            Variant::Jigsaw => {
                let po2 = self.tile_size.max(1).ilog2();
                if (1u32 << po2) != self.tile_size {
                    warn!(
                        "tile size is not power of 2, using {}",
                        1u32 << po2
                    );
                }
                ScrambleVariant::Jigsaw(JigsawOptions {
                    tile_size: 1 << po2,
                    rotate: self.rotate,
                    flip: self.flip,
                })
            }
            Variant::Fourier => ScrambleVariant::Fourier(FourierOptions::default()),
            Variant::Block => ScrambleVariant::Block(BlockOptions {
                block_size: (self.block_size, self.block_size),
                ..Default::default()
            }),
            Variant::Blur => ScrambleVariant::Blur(BlurOptions { sigma: self.sigma }),
            Variant::Diffeomorphic => {
                ScrambleVariant::Diffeomorphic(DiffeomorphicOptions::default())
            }
        }
    }

    fn scramble_options(&self) -> Result<ScrambleOptions, Error> {
        let mut opts = match &self.options {
            Some(p) => serde_json::from_str(
                &fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?,
            )
            .with_context(|| format!("parsing {}", p.display()))?,
            None => ScrambleOptions::default(),
        };
        if let Some(v) = self.variant {
            opts.variant = self.variant(v);
        }
        if let Some(i) = self.intensity {
            opts.intensity = i;
        }
        if let Some(seed) = &self.seed {
            opts.seed = Some(seed_from_phrase(seed));
        }
        if self.faces.is_some() && opts.face_detection.is_none() {
            opts.face_detection = Some(FaceDetectionOptions::default());
        }
        opts.validate()?;
        Ok(opts)
    }

    fn detector(&self) -> Result<Option<StaticBoxes>, Error> {
        let Some(p) = &self.faces else {
            return Ok(None);
        };
        let boxes: Vec<FaceBox> = serde_json::from_str(
            &fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?,
        )
        .with_context(|| format!("parsing {}", p.display()))?;
        Ok(Some(StaticBoxes(boxes)))
    }
}

fn run_image(input: &Path, output: &Path, mask: Option<&Path>, common: &Common) -> Result<(), Error> {
    let opts = common.scramble_options()?;
    let detector = common.detector()?;
    let im = Image::open(input)?;

    let out = if let Some(p) = mask {
        let region = RegionMask::from_image(&Image::open(p)?);
        if (region.width(), region.height()) != (im.width(), im.height()) {
            bail!(
                "mask is {}x{}, image is {}x{}",
                region.width(),
                region.height(),
                im.width(),
                im.height()
            );
        }
        let mode = opts
            .face_detection
            .as_ref()
            .map(|f| f.background_mode)
            .unwrap_or_default();
        scramble_region(&im, &opts, &region, mode)?
    } else {
        scramble_frame(&im, &opts, detector.as_ref().map(|d| d as &dyn FaceDetector))?
    };

    out.save(output)?;
    Ok(())
}

fn run_batch(input: &Path, output: &Path, common: &Common) -> Result<(), Error> {
    let options = BatchProcessingOptions {
        input_dir: input.to_owned(),
        output_dir: output.to_owned(),
        scramble_options: common.scramble_options()?,
    };
    let detector = common.detector()?;
    let results = process_directory_with_progress(
        &options,
        detector.as_ref().map(|d| d as &dyn FaceDetector),
        &CancelToken::new(),
        |p| {
            if let Some(f) = &p.current_file {
                info!(
                    "[{}/{}] {}",
                    p.processed_files,
                    p.total_files,
                    f.display()
                );
            }
        },
    )?;

    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_video(
    input: &Path,
    output: &Path,
    flow_dir: Option<&Path>,
    keyframe_interval: Option<u32>,
    blend_frames: u32,
    export_flow: Option<&Path>,
    common: &Common,
) -> Result<(), Error> {
    let opts = common.scramble_options()?;
    let detector = common.detector()?;
    let estimator = flow_dir.map(FloDirectoryEstimator::new);

    let temporal = if flow_dir.is_some() || keyframe_interval.is_some() || export_flow.is_some() {
        Some(TemporalCoherenceOptions {
            export_flow: export_flow.is_some(),
            flow_output_dir: export_flow.map(Path::to_owned),
            keyframe_interval: keyframe_interval.unwrap_or(30),
            blend_frames,
        })
    } else {
        None
    };

    let mut source = ImageSequence::open(input)?;
    let mut sink = SequenceWriter::new(output)?;
    let report = process_video(
        &mut source,
        &mut sink,
        &opts,
        temporal,
        estimator.as_ref().map(|e| e as &dyn FlowEstimator),
        detector.as_ref().map(|d| d as &dyn FaceDetector),
        |pct| info!("{:.1}%", pct),
    )?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn main() -> Result<(), Error> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "debug" } else { "info" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if cli.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(cli.threads)
            .build_global()
            .context("Failed to configure thread pool")?;
    }

    match &cli.command {
        Command::Image {
            input,
            output,
            mask,
            common,
        } => run_image(input, output, mask.as_deref(), common),
        Command::Batch {
            input,
            output,
            common,
        } => run_batch(input, output, common),
        Command::Video {
            input,
            output,
            flow_dir,
            keyframe_interval,
            blend_frames,
            export_flow,
            common,
        } => run_video(
            input,
            output,
            flow_dir.as_deref(),
            *keyframe_interval,
            *blend_frames,
            export_flow.as_deref(),
            common,
        ),
    }
}
