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

//! Error types shared by every transform.

use thiserror::Error;

/// Error type for scrambling operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid option value or size, rejected before any processing.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Input data is malformed (bad buffer length, unreadable frame).
    #[error("invalid input: {0}")]
    Input(String),

    /// Image could not be decoded or encoded.
    #[error("image codec error: {0}")]
    Decode(#[from] image::ImageError),

    /// An external collaborator (detector, flow estimator) failed.
    #[error("computation failed: {0}")]
    Computation(String),

    /// Filesystem failure while reading or writing.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The run was cancelled between items.
    #[error("cancelled")]
    Cancelled,
}

impl Error {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub(crate) fn input(msg: impl Into<String>) -> Self {
        Self::Input(msg.into())
    }
}

/// Result type for scrambling operations.
pub type Result<T> = std::result::Result<T, Error>;
