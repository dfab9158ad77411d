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

//! Directory batch processing.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::buffer::Image;
use crate::engine::scramble_frame;
use crate::error::{Error, Result};
use crate::options::ScrambleOptions;
use crate::region::FaceDetector;

/// Extensions picked up from the input directory, compared case-insensitively.
pub const IMAGE_EXTENSIONS: [&str; 8] = [
    "jpg", "jpeg", "png", "gif", "webp", "bmp", "tif", "tiff",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchProcessingOptions {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub scramble_options: ScrambleOptions,
}

/// Outcome for one input file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchProgress {
    pub total_files: usize,
    pub processed_files: usize,
    /// File just finished, or `None` for the final report.
    pub current_file: Option<PathBuf>,
}

/// Shared flag checked between items.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Image files directly inside `dir`, sorted by name.
pub fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.is_file() && is_image(p))
        .collect();
    files.sort();
    Ok(files)
}

/// Destination for `input`: same file name, except formats without an
/// encoder get `.png` appended, so `a.webp` never lands on `a.png`.
pub fn output_path_for(input: &Path, output_dir: &Path) -> PathBuf {
    let name = input.file_name().map(PathBuf::from).unwrap_or_default();
    let webp = name
        .extension()
        .map(|e| e.eq_ignore_ascii_case("webp"))
        .unwrap_or(false);
    let out = output_dir.join(name);
    if webp {
        let mut os = out.into_os_string();
        os.push(".png");
        PathBuf::from(os)
    } else {
        out
    }
}

fn process_single_image(
    input: &Path,
    output: &Path,
    opts: &ScrambleOptions,
    detector: Option<&dyn FaceDetector>,
) -> Result<()> {
    let img = Image::open(input)?;
    let scrambled = scramble_frame(&img, opts, detector)?;
    scrambled.save(output)
}

/// Scrambles every image in `options.input_dir` into `options.output_dir`.
pub fn process_directory(options: &BatchProcessingOptions) -> Result<Vec<ProcessingResult>> {
    process_directory_with_progress(options, None, &CancelToken::new(), |_| {})
}

/// [`process_directory`] with a detector, cancellation, and progress reports.
///
/// Items run in parallel; results come back in input order, one per file.
/// `progress` is called after every finished item and once at the end.
/// Items not started before cancellation are reported as failed.
pub fn process_directory_with_progress<F>(
    options: &BatchProcessingOptions,
    detector: Option<&dyn FaceDetector>,
    cancel: &CancelToken,
    progress: F,
) -> Result<Vec<ProcessingResult>>
where
    F: Fn(BatchProgress) + Send + Sync,
{
    options.scramble_options.validate()?;
    fs::create_dir_all(&options.output_dir)?;
    let files = list_images(&options.input_dir)?;
    let total_files = files.len();
    info!(
        total_files,
        input = %options.input_dir.display(),
        output = %options.output_dir.display(),
        "batch started"
    );

    let processed = AtomicUsize::new(0);
    let results: Vec<ProcessingResult> = files
        .par_iter()
        .map(|input| {
            let output_path = output_path_for(input, &options.output_dir);
            let outcome = if cancel.is_cancelled() {
                Err(Error::Cancelled)
            } else {
                process_single_image(input, &output_path, &options.scramble_options, detector)
            };
            if let Err(e) = &outcome {
                warn!(file = %input.display(), error = %e, "item failed");
            }

            let done = processed.fetch_add(1, Ordering::Relaxed) + 1;
            progress(BatchProgress {
                total_files,
                processed_files: done,
                current_file: Some(input.clone()),
            });

            ProcessingResult {
                input_path: input.clone(),
                output_path,
                success: outcome.is_ok(),
                error: outcome.err().map(|e| e.to_string()),
            }
        })
        .collect();

    progress(BatchProgress {
        total_files,
        processed_files: total_files,
        current_file: None,
    });
    let failed = results.iter().filter(|r| !r.success).count();
    info!(total_files, failed, "batch finished");
    Ok(results)
}
