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

//! Random number generator construction.
//!
//! Every randomized transform draws from [`ScrambleRng`]. A fixed seed
//! makes a run reproducible; without one the generator is seeded from
//! OS entropy.

use rand::SeedableRng;
use rand_xoshiro::Xoshiro256StarStar;
use sha2::{Digest, Sha256};

/// Generator used by all transforms.
pub type ScrambleRng = Xoshiro256StarStar;

/// Builds a generator from an optional seed.
pub fn rng_from_seed(seed: Option<u64>) -> ScrambleRng {
    match seed {
        Some(seed) => ScrambleRng::seed_from_u64(seed),
        None => ScrambleRng::from_entropy(),
    }
}

/// Hashes an arbitrary phrase into a 64-bit seed.
///
/// Phrases that parse as an unsigned integer are used verbatim, so
/// `--seed 42` and `"seed": 42` in an options file agree.
pub fn seed_from_phrase(phrase: &str) -> u64 {
    if let Ok(v) = phrase.trim().parse::<u64>() {
        return v;
    }

    let mut hasher = Sha256::new();
    hasher.update(phrase);
    fold(&hasher.finalize())
}

/// Derives an independent child seed for a numbered stream
/// (a video frame, a region, a batch item).
pub fn derive_seed(seed: u64, stream: u64) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(seed.to_le_bytes());
    hasher.update(stream.to_le_bytes());
    fold(&hasher.finalize())
}

/// Optional-seed flavour of [`derive_seed`].
pub fn derive_optional(seed: Option<u64>, stream: u64) -> Option<u64> {
    seed.map(|s| derive_seed(s, stream))
}

fn fold(digest: &[u8]) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}
