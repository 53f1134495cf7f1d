// Copyright (c) 2023, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

//! Temporal denoising of alt-ref sources.
//!
//! Every pixel of the composite is a weighted average of the co-located
//! pixels of a window of frames around the source, each weighted by how
//! close it is to the source pixel.

use arrayvec::ArrayVec;
use rayon::prelude::*;

use crate::api::{ArnrType, MAX_ARNR_FRAMES};
use crate::cpu_features::CpuFeatureLevel;
use crate::frame::{Frame, Plane};

// Applied to every non-zero modifier.
const FILTER_WEIGHT: u32 = 2;
const LANES: usize = 16;

/// Frames blended before and after the source.
///
/// `backward` and `forward` are the frames available on either side.
pub fn window_extent(
  arnr_type: ArnrType, max_frames: usize, backward: usize, forward: usize,
) -> (usize, usize) {
  if max_frames == 0 {
    return (0, 0);
  }
  let max_frames = max_frames.min(MAX_ARNR_FRAMES);
  match arnr_type {
    ArnrType::Backward => (backward.min(max_frames - 1), 0),
    ArnrType::Forward => (0, forward.min(max_frames - 1)),
    ArnrType::Centered => {
      let both = backward.min(forward);
      // An even window takes the extra frame from the past.
      (both.min(max_frames / 2), both.min((max_frames - 1) / 2))
    }
  }
}

type RowKernel = fn(&mut [u8], &[u8], &[&[u8]], u8);

#[inline(always)]
fn modifier(src: u8, other: u8, strength: u8) -> u32 {
  let diff = src as i32 - other as i32;
  let rounding = (1u32 << strength) >> 1;
  let m = ((3 * (diff * diff) as u32 + rounding) >> strength).min(16);
  (16 - m) * FILTER_WEIGHT
}

fn filter_row_scalar(
  dst: &mut [u8], center: &[u8], others: &[&[u8]], strength: u8,
) {
  for (x, out) in dst.iter_mut().enumerate() {
    let src = center[x];
    // The source matches itself exactly.
    let mut count = 16 * FILTER_WEIGHT;
    let mut acc = count * src as u32;
    for row in others {
      let w = modifier(src, row[x], strength);
      count += w;
      acc += w * row[x] as u32;
    }
    *out = ((acc + (count >> 1)) / count) as u8;
  }
}

fn filter_row_lanes(
  dst: &mut [u8], center: &[u8], others: &[&[u8]], strength: u8,
) {
  let full = dst.len() / LANES * LANES;
  let (body, tail) = dst.split_at_mut(full);

  for (chunk_idx, out) in body.chunks_exact_mut(LANES).enumerate() {
    let base = chunk_idx * LANES;
    let src = &center[base..base + LANES];
    let mut count = [16 * FILTER_WEIGHT; LANES];
    let mut acc = [0u32; LANES];
    for i in 0..LANES {
      acc[i] = count[i] * src[i] as u32;
    }
    for row in others {
      let px = &row[base..base + LANES];
      for i in 0..LANES {
        let w = modifier(src[i], px[i], strength);
        count[i] += w;
        acc[i] += w * px[i] as u32;
      }
    }
    for i in 0..LANES {
      out[i] = ((acc[i] + (count[i] >> 1)) / count[i]) as u8;
    }
  }

  if !tail.is_empty() {
    let others: ArrayVec<&[u8], MAX_ARNR_FRAMES> =
      others.iter().map(|row| &row[full..]).collect();
    filter_row_scalar(tail, &center[full..], &others, strength);
  }
}

fn select_kernel(cpu: CpuFeatureLevel) -> RowKernel {
  if cpu.has_wide_lanes() {
    filter_row_lanes
  } else {
    filter_row_scalar
  }
}

fn filter_plane(
  dst: &mut Plane, planes: &[&Plane], center: usize, strength: u8,
  kernel: RowKernel,
) {
  let stride = dst.cfg.stride;
  let width = dst.cfg.width;
  let height = dst.cfg.height;
  let xorigin = dst.cfg.xorigin;
  let start = dst.cfg.yorigin * stride;

  dst.data[start..start + height * stride]
    .par_chunks_mut(stride)
    .enumerate()
    .for_each(|(y, row)| {
      let others: ArrayVec<&[u8], MAX_ARNR_FRAMES> = planes
        .iter()
        .enumerate()
        .filter(|&(i, _)| i != center)
        .map(|(_, p)| p.row(y))
        .collect();
      kernel(
        &mut row[xorigin..xorigin + width],
        planes[center].row(y),
        &others,
        strength,
      );
    });
}

/// Blends `window` into `dst`, `window[center]` being the alt-ref source.
///
/// The window holds at most `MAX_ARNR_FRAMES` frames of the same geometry
/// as `dst`.
pub fn filter_composite(
  dst: &mut Frame, window: &[&Frame], center: usize, strength: u8,
  cpu: CpuFeatureLevel,
) {
  debug_assert!(center < window.len());
  debug_assert!(window.len() <= MAX_ARNR_FRAMES);
  let kernel = select_kernel(cpu);

  for (pli, plane) in dst.planes.iter_mut().enumerate() {
    let planes: ArrayVec<&Plane, MAX_ARNR_FRAMES> =
      window.iter().map(|f| &f.planes[pli]).collect();
    filter_plane(plane, &planes, center, strength, kernel);
  }
  dst.pad();
}

#[cfg(test)]
mod test {
  use super::*;
  use rand::{Rng, SeedableRng};
  use rand_chacha::ChaCha8Rng;

  fn random_frame(rng: &mut ChaCha8Rng, w: usize, h: usize) -> Frame {
    let mut f = Frame::new(w, h);
    for p in f.planes.iter_mut() {
      p.data.iter_mut().for_each(|v| *v = rng.gen());
    }
    f
  }

  #[test]
  fn extent_by_type() {
    assert_eq!(window_extent(ArnrType::Backward, 5, 7, 2), (4, 0));
    assert_eq!(window_extent(ArnrType::Forward, 5, 7, 2), (0, 2));
    assert_eq!(window_extent(ArnrType::Centered, 5, 7, 9), (2, 2));
    assert_eq!(window_extent(ArnrType::Centered, 4, 7, 9), (2, 1));
    assert_eq!(window_extent(ArnrType::Centered, 7, 1, 9), (1, 1));
    assert_eq!(window_extent(ArnrType::Centered, 0, 3, 3), (0, 0));
  }

  #[test]
  fn identical_frames_are_unchanged() {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let src = random_frame(&mut rng, 48, 32);
    let mut dst = Frame::new(48, 32);
    filter_composite(&mut dst, &[&src, &src, &src], 1, 3, Default::default());
    for (a, b) in dst.planes.iter().zip(src.planes.iter()) {
      assert!(a.rows_iter().eq(b.rows_iter()));
    }
  }

  #[test]
  fn distant_pixels_do_not_contribute() {
    let mut src = Frame::new(16, 16);
    let mut far = Frame::new(16, 16);
    src.planes[0].data.iter_mut().for_each(|v| *v = 20);
    far.planes[0].data.iter_mut().for_each(|v| *v = 220);
    let mut dst = Frame::new(16, 16);
    filter_composite(&mut dst, &[&far, &src], 1, 6, CpuFeatureLevel::RUST);
    assert!(dst.planes[0].rows_iter().all(|row| row.iter().all(|&v| v == 20)));
  }

  #[test]
  fn kernels_agree() {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    // Width not a multiple of the lane count exercises the tail.
    let frames: Vec<Frame> =
      (0..5).map(|_| random_frame(&mut rng, 40, 24)).collect();
    let window: Vec<&Frame> = frames.iter().collect();

    for strength in 0..=6 {
      let mut reference = Frame::new(40, 24);
      filter_composite(
        &mut reference,
        &window,
        2,
        strength,
        CpuFeatureLevel::RUST,
      );
      for &cpu in CpuFeatureLevel::all() {
        let mut out = Frame::new(40, 24);
        filter_composite(&mut out, &window, 2, strength, cpu);
        assert_eq!(out, reference, "cpu {:?} strength {}", cpu, strength);
      }
    }
  }
}
