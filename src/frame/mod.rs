// Copyright (c) 2018-2023, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

//! Frame buffers and the pool the encoder binds its references to.

use thiserror::Error;

use crate::util::*;

mod plane;
pub use plane::*;

mod store;
pub use store::*;

/// Border, in luma pixels, kept around every frame for motion search.
pub const FRAME_BORDER: usize = 32;

/// Frame storage could not be allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unable to allocate {bytes} bytes of frame storage")]
pub struct AllocationError {
  /// Size of the failed request.
  pub bytes: usize,
}

/// One 8-bit 4:2:0 video frame.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Frame {
  /// Planes constituting the frame.
  pub planes: [Plane; 3],
}

impl Frame {
  fn plane_geometry(width: usize, height: usize) -> [(usize, usize); 2] {
    let luma_width = width.align_power_of_two(4);
    let luma_height = height.align_power_of_two(4);
    [(luma_width, luma_height), (luma_width >> 1, luma_height >> 1)]
  }

  /// Creates a new frame with the given dimensions.
  ///
  /// The luma dimensions are rounded up to whole macroblocks.
  pub fn new(width: usize, height: usize) -> Self {
    let [(lw, lh), (cw, ch)] = Self::plane_geometry(width, height);
    let cpad = FRAME_BORDER >> 1;

    Frame {
      planes: [
        Plane::new(lw, lh, 0, 0, FRAME_BORDER, FRAME_BORDER),
        Plane::new(cw, ch, 1, 1, cpad, cpad),
        Plane::new(cw, ch, 1, 1, cpad, cpad),
      ],
    }
  }

  /// Creates a new frame, reporting allocation failure instead of aborting.
  ///
  /// # Errors
  ///
  /// Returns `AllocationError` if any plane cannot be allocated.
  pub fn try_new(width: usize, height: usize) -> Result<Self, AllocationError> {
    let [(lw, lh), (cw, ch)] = Self::plane_geometry(width, height);
    let cpad = FRAME_BORDER >> 1;

    Ok(Frame {
      planes: [
        Plane::try_new(lw, lh, 0, 0, FRAME_BORDER, FRAME_BORDER)?,
        Plane::try_new(cw, ch, 1, 1, cpad, cpad)?,
        Plane::try_new(cw, ch, 1, 1, cpad, cpad)?,
      ],
    })
  }

  /// Luma width in pixels, a multiple of 16.
  #[inline]
  pub fn width(&self) -> usize {
    self.planes[0].cfg.width
  }

  /// Luma height in pixels, a multiple of 16.
  #[inline]
  pub fn height(&self) -> usize {
    self.planes[0].cfg.height
  }

  /// Number of 16x16 macroblocks.
  #[inline]
  pub fn mb_count(&self) -> usize {
    (self.width() >> 4) * (self.height() >> 4)
  }

  /// Extends the borders of all planes from their visible area.
  pub fn pad(&mut self) {
    let (w, h) = (self.width(), self.height());
    for p in self.planes.iter_mut() {
      p.pad(w, h);
    }
  }

  /// Copies pixels and borders from a frame of the same dimensions.
  pub fn copy_from(&mut self, other: &Frame) {
    for (dst, src) in self.planes.iter_mut().zip(other.planes.iter()) {
      dst.copy_from(src);
    }
  }

  /// Whether `other` has the same plane geometry.
  pub fn same_geometry(&self, other: &Frame) -> bool {
    self.planes.iter().zip(other.planes.iter()).all(|(a, b)| a.cfg == b.cfg)
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn frame_geometry_is_macroblock_aligned() {
    let f = Frame::new(176, 144);
    assert_eq!(f.width(), 176);
    assert_eq!(f.height(), 144);
    assert_eq!(f.mb_count(), 99);
    assert_eq!(f.planes[1].cfg.width, 88);
    assert_eq!(f.planes[1].cfg.xpad, FRAME_BORDER >> 1);

    let g = Frame::new(170, 130);
    assert_eq!((g.width(), g.height()), (176, 144));
    assert!(f.same_geometry(&g));
  }

  #[test]
  fn pad_extends_all_planes() {
    let mut f = Frame::new(32, 32);
    for p in f.planes.iter_mut() {
      let (w, h) = (p.cfg.width, p.cfg.height);
      for y in 0..h {
        p.row_mut(y).iter_mut().for_each(|v| *v = y as u8);
      }
      p.row_mut(h - 1)[w - 1] = 200;
    }
    f.pad();
    for p in f.planes.iter() {
      assert!(p.probe_padding(32, 32));
    }
  }
}
