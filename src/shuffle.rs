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

//! Mask-aware power-of-two block shuffle ("jigsaw").

use ndarray::parallel::prelude::*;
use ndarray::prelude::*;
use ndarray::{Slice, Zip};
use rand::prelude::*;
use tracing::trace;

use crate::buffer::Image;
use crate::error::{Error, Result};
use crate::options::JigsawOptions;

/// Merges fully movable 2x2 groups of blocks into one block of the next
/// size, level by level. After this, `mask[[r, c]]` holds the side length
/// of the block rooted at `(r, c)`, or 0 if it was absorbed.
fn mask_expand(mut mask: ArrayViewMut2<u64>, chunk_po2: usize) {
    for s in 0..chunk_po2 {
        let m = 1u64 << s;
        let m_ = m << 1;
        let i = m as usize;

        par_azip!((mut a in mask.exact_chunks_mut((m_ as usize, m_ as usize))) {
            if m & a[[0, 0]] & a[[0, i]] & a[[i, 0]] & a[[i, i]] == m {
                a[[0, 0]] = m_;
                a[[0, i]] = 0;
                a[[i, 0]] = 0;
                a[[i, i]] = 0;
            }
        });
    }
}

/// Random dihedral transform applied to one square block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Orientation {
    flip: bool,
    quarter_turns: u8,
}

impl Orientation {
    fn draw<R: Rng>(opts: &JigsawOptions, random: &mut R) -> Self {
        Self {
            flip: opts.flip && random.gen(),
            quarter_turns: if opts.rotate { random.gen_range(0..4) } else { 0 },
        }
    }

    fn apply<A, D: Dimension>(self, view: &mut ArrayView<'_, A, D>) {
        if self.flip {
            view.invert_axis(Axis(1));
        }
        for _ in 0..self.quarter_turns {
            view.swap_axes(0, 1);
            view.invert_axis(Axis(1));
        }
    }
}

/// Shuffles the movable part of `arr` in square blocks.
///
/// Only the first two axes are shuffled; any further axes (channels) move
/// along. `movable` must match the first two axes of `arr`. Pixels where
/// it is `false` stay in place. Blocks start at `opts.tile_size` and
/// shrink by halves wherever the movable area is too ragged to hold a
/// full block; each size class is permuted independently.
pub fn jigsaw<A, D, R>(
    arr: ArrayView<'_, A, D>,
    movable: ArrayView2<'_, bool>,
    opts: &JigsawOptions,
    random: &mut R,
) -> Result<Array<A, D>>
where
    A: Clone + Send + Sync,
    D: Dimension,
    R: Rng,
{
    opts.validate()?;
    if arr.ndim() < 2 || arr.shape()[..2] != *movable.shape() {
        return Err(Error::input(format!(
            "array shape {:?} does not match mask shape {:?}",
            arr.shape(),
            movable.shape(),
        )));
    }
    let chunk_po2 = opts.chunk_po2();

    let mut mask: Array2<u64> = movable.mapv(|v| if v { 1 } else { 0 });

    mask_expand(mask.view_mut(), chunk_po2);

    let mut out = arr.to_owned();

    for s in (0..=chunk_po2).rev() {
        let m = 1u64 << s;
        let m_ = m as usize;

        let mut blocks: Vec<_> = Zip::indexed(mask.slice(s![..;m_, ..;m_]))
            .into_par_iter()
            .filter_map(|((r, c), v)| {
                if *v & m == m {
                    Some((r * m_, c * m_))
                } else {
                    None
                }
            })
            .collect();
        blocks.sort_unstable();

        #[cfg(debug_assertions)]
        for s in blocks.windows(2) {
            debug_assert_ne!(s[0], s[1]);
        }

        let mut indices: Vec<_> = (0..blocks.len()).collect();
        indices.shuffle(&mut *random);
        let orientations: Vec<_> = (0..blocks.len())
            .map(|_| Orientation::draw(opts, &mut *random))
            .collect();

        trace!(size = m_, blocks = blocks.len(), "jigsaw level");

        let arr = arr.view();
        let out = out.view_mut();
        let blocks = &blocks[..];
        let indices = &indices[..];
        let orientations = &orientations[..];

        blocks
            .par_iter()
            .enumerate()
            .for_each(move |(i, &(mut r, mut c))| {
                let mut arr = arr.view();
                arr.slice_axis_inplace(Axis(0), Slice::from(r..r + m_));
                arr.slice_axis_inplace(Axis(1), Slice::from(c..c + m_));
                orientations[i].apply(&mut arr);

                let mut out = out.raw_view();
                (r, c) = blocks[indices[i]];
                out.slice_axis_inplace(Axis(0), Slice::from(r..r + m_));
                out.slice_axis_inplace(Axis(1), Slice::from(c..c + m_));

                // SAFETY: Output slices is guaranteed to be non-overlapping
                azip!((d in out, s in arr) unsafe {
                    (*(d as *mut A)).clone_from(s)
                });
            });
    }

    Ok(out)
}

/// [`jigsaw`] over an [`Image`]. Without a mask every pixel is movable.
pub fn jigsaw_image<R: Rng>(
    img: &Image,
    movable: Option<ArrayView2<'_, bool>>,
    opts: &JigsawOptions,
    random: &mut R,
) -> Result<Image> {
    let everything;
    let movable = match &movable {
        Some(m) => m.view(),
        None => {
            everything = Array2::from_elem((img.height(), img.width()), true);
            everything.view()
        }
    };
    Image::from_array(jigsaw(img.view(), movable, opts, random)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_xoshiro::Xoshiro256StarStar;

    fn numbered(w: usize, h: usize) -> Image {
        let buf = (0..w * h).flat_map(|i| [(i % 256) as u8, (i / 256) as u8]).collect();
        Image::from_raw(w, h, 2, buf).unwrap()
    }

    fn sorted_pixels(img: &Image) -> Vec<Vec<u8>> {
        let mut v: Vec<Vec<u8>> = img.view().lanes(Axis(2)).into_iter().map(|l| l.to_vec()).collect();
        v.sort();
        v
    }

    #[test]
    fn expand_merges_full_groups() {
        let mut mask = Array2::from_elem((4, 4), 1u64);
        mask[[3, 3]] = 0;
        mask_expand(mask.view_mut(), 2);
        // Top-left quadrant merges to 2, the ragged corner cannot reach 4
        assert_eq!(mask[[0, 0]], 2);
        assert_eq!(mask[[0, 1]], 0);
        assert_eq!(mask[[2, 2]], 1);
        assert_eq!(mask[[3, 3]], 0);
    }

    #[test]
    fn preserves_pixels() {
        let img = numbered(16, 12);
        let mut rng = Xoshiro256StarStar::seed_from_u64(0);
        let opts = JigsawOptions {
            tile_size: 4,
            rotate: true,
            flip: true,
        };
        let out = jigsaw_image(&img, None, &opts, &mut rng).unwrap();
        assert_ne!(out, img);
        assert_eq!(sorted_pixels(&out), sorted_pixels(&img));
    }

    #[test]
    fn fixed_pixels_stay() {
        let img = numbered(8, 8);
        let movable = Array2::from_shape_fn((8, 8), |(r, _)| r < 4);
        let mut rng = Xoshiro256StarStar::seed_from_u64(1);
        let opts = JigsawOptions {
            tile_size: 2,
            ..Default::default()
        };
        let out = jigsaw_image(&img, Some(movable.view()), &opts, &mut rng).unwrap();
        assert_eq!(
            out.view().slice(s![4.., .., ..]),
            img.view().slice(s![4.., .., ..])
        );
        assert_eq!(sorted_pixels(&out), sorted_pixels(&img));
    }

    #[test]
    fn blocks_move_whole() {
        let img = numbered(8, 8);
        let mut rng = Xoshiro256StarStar::seed_from_u64(2);
        let opts = JigsawOptions {
            tile_size: 4,
            ..Default::default()
        };
        let out = jigsaw_image(&img, None, &opts, &mut rng).unwrap();
        let quads = |im: &Image| {
            let mut v: Vec<Vec<u8>> = [(0, 0), (0, 4), (4, 0), (4, 4)]
                .iter()
                .map(|&(r, c)| {
                    im.view()
                        .slice(s![r..r + 4, c..c + 4, ..])
                        .iter()
                        .copied()
                        .collect()
                })
                .collect();
            v.sort();
            v
        };
        assert_eq!(quads(&out), quads(&img));
    }

    #[test]
    fn shape_mismatch_rejected() {
        let img = numbered(4, 4);
        let movable = Array2::from_elem((3, 4), true);
        let mut rng = Xoshiro256StarStar::seed_from_u64(3);
        let res = jigsaw_image(&img, Some(movable.view()), &JigsawOptions::default(), &mut rng);
        assert!(matches!(res, Err(Error::Input(_))));
    }
}
