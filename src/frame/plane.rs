// Copyright (c) 2017-2023, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use std::fmt::{Debug, Formatter};

use crate::frame::AllocationError;
use crate::serialize::{Deserialize, Serialize};
use crate::util::Fixed;

/// Geometry of a plane inside its padded allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaneConfig {
  pub stride: usize,
  pub alloc_height: usize,
  pub width: usize,
  pub height: usize,
  pub xdec: usize,
  pub ydec: usize,
  pub xpad: usize,
  pub ypad: usize,
  pub xorigin: usize,
  pub yorigin: usize,
}

impl PlaneConfig {
  const STRIDE_ALIGNMENT_LOG2: usize = 5;

  #[inline]
  pub fn new(
    width: usize, height: usize, xdec: usize, ydec: usize, xpad: usize,
    ypad: usize,
  ) -> Self {
    let xorigin = xpad.align_power_of_two(Self::STRIDE_ALIGNMENT_LOG2);
    let yorigin = ypad;
    let stride = (xorigin + width + xpad)
      .align_power_of_two(Self::STRIDE_ALIGNMENT_LOG2);
    let alloc_height = yorigin + height + ypad;

    PlaneConfig {
      stride,
      alloc_height,
      width,
      height,
      xdec,
      ydec,
      xpad,
      ypad,
      xorigin,
      yorigin,
    }
  }

  #[inline]
  pub const fn len(&self) -> usize {
    self.stride * self.alloc_height
  }
}

/// One 8-bit plane with a replicated border around the visible area.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plane {
  pub data: Vec<u8>,
  pub cfg: PlaneConfig,
}

impl Debug for Plane {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    write!(
      f,
      "Plane {{ data: [{}, ...], cfg: {:?} }}",
      self.data.first().copied().unwrap_or_default(),
      self.cfg
    )
  }
}

impl Plane {
  /// Allocates a mid-grey plane, aborting on allocation failure.
  pub fn new(
    width: usize, height: usize, xdec: usize, ydec: usize, xpad: usize,
    ypad: usize,
  ) -> Self {
    let cfg = PlaneConfig::new(width, height, xdec, ydec, xpad, ypad);
    Plane { data: vec![128; cfg.len()], cfg }
  }

  /// Allocates a mid-grey plane, reporting allocation failure.
  pub fn try_new(
    width: usize, height: usize, xdec: usize, ydec: usize, xpad: usize,
    ypad: usize,
  ) -> Result<Self, AllocationError> {
    let cfg = PlaneConfig::new(width, height, xdec, ydec, xpad, ypad);
    let len = cfg.len();
    let mut data = Vec::new();
    data
      .try_reserve_exact(len)
      .map_err(|_| AllocationError { bytes: len })?;
    data.resize(len, 128);

    Ok(Plane { data, cfg })
  }

  #[inline]
  fn origin(&self) -> usize {
    self.cfg.yorigin * self.cfg.stride + self.cfg.xorigin
  }

  /// The visible area, starting at the top-left visible pixel.
  pub fn data_origin(&self) -> &[u8] {
    &self.data[self.origin()..]
  }

  pub fn data_origin_mut(&mut self) -> &mut [u8] {
    let origin = self.origin();
    &mut self.data[origin..]
  }

  /// Visible pixels of row `y`.
  #[inline]
  pub fn row(&self, y: usize) -> &[u8] {
    let base = self.origin() + y * self.cfg.stride;
    &self.data[base..base + self.cfg.width]
  }

  #[inline]
  pub fn row_mut(&mut self, y: usize) -> &mut [u8] {
    let base = self.origin() + y * self.cfg.stride;
    let width = self.cfg.width;
    &mut self.data[base..base + width]
  }

  /// Iterates over the visible rows.
  pub fn rows_iter(&self) -> impl Iterator<Item = &[u8]> + '_ {
    (0..self.cfg.height).map(move |y| self.row(y))
  }

  /// Copies a raw, tightly or loosely strided plane into the visible area.
  ///
  /// Rows or columns missing from `source` are left untouched; call
  /// [`pad`] afterwards to extend the edges.
  ///
  /// [`pad`]: #method.pad
  pub fn copy_from_raw_u8(&mut self, source: &[u8], source_stride: usize) {
    let width = self.cfg.width.min(source_stride);
    for (y, src) in
      source.chunks(source_stride).take(self.cfg.height).enumerate()
    {
      let w = width.min(src.len());
      self.row_mut(y)[..w].copy_from_slice(&src[..w]);
    }
  }

  /// Replaces the whole allocation, border included, with `other`'s.
  ///
  /// Both planes must share the same geometry.
  pub fn copy_from(&mut self, other: &Plane) {
    debug_assert_eq!(self.cfg, other.cfg);
    self.data.copy_from_slice(&other.data);
  }

  /// Extends the edge pixels of a `w`x`h` visible area into the border.
  pub fn pad(&mut self, w: usize, h: usize) {
    let xorigin = self.cfg.xorigin;
    let yorigin = self.cfg.yorigin;
    let stride = self.cfg.stride;
    let alloc_height = self.cfg.alloc_height;
    let width = ((w + self.cfg.xdec) >> self.cfg.xdec).min(self.cfg.width);
    let height = ((h + self.cfg.ydec) >> self.cfg.ydec).min(self.cfg.height);

    if width == 0 || height == 0 {
      return;
    }

    if xorigin > 0 {
      for y in 0..height {
        let base = (yorigin + y) * stride;
        let fill_val = self.data[base + xorigin];
        self.data[base..base + xorigin].fill(fill_val);
      }
    }

    if xorigin + width < stride {
      for y in 0..height {
        let base = (yorigin + y) * stride + xorigin + width;
        let fill_val = self.data[base - 1];
        self.data[base..base + stride - (xorigin + width)].fill(fill_val);
      }
    }

    if yorigin > 0 {
      let (top, bottom) = self.data.split_at_mut(yorigin * stride);
      let src = &bottom[..stride];
      for dst in top.chunks_exact_mut(stride) {
        dst.copy_from_slice(src);
      }
    }

    if yorigin + height < alloc_height {
      let (top, bottom) = self.data.split_at_mut((yorigin + height) * stride);
      let src = &top[(yorigin + height - 1) * stride..];
      for dst in bottom.chunks_exact_mut(stride) {
        dst.copy_from_slice(src);
      }
    }
  }

  /// Minimally test that the plane has been padded.
  pub fn probe_padding(&self, w: usize, h: usize) -> bool {
    let PlaneConfig {
      xorigin, yorigin, stride, alloc_height, xdec, ydec, ..
    } = self.cfg;
    let width = (w + xdec) >> xdec;
    let height = (h + ydec) >> ydec;
    let corner = (yorigin + height - 1) * stride + xorigin + width - 1;
    let corner_value = self.data[corner];

    self.data[(yorigin + height) * stride - 1] == corner_value
      && self.data[(alloc_height - 1) * stride + xorigin + width - 1]
        == corner_value
      && self.data[alloc_height * stride - 1] == corner_value
  }
}
