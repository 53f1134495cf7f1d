// Copyright (c) 2017-2023, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

pub trait Fixed {
  fn floor_log2(&self, n: usize) -> usize;
  fn ceil_log2(&self, n: usize) -> usize;
  fn align_power_of_two(&self, n: usize) -> usize;
  fn align_power_of_two_and_shift(&self, n: usize) -> usize;
}

impl Fixed for usize {
  #[inline]
  fn floor_log2(&self, n: usize) -> usize {
    self & !((1 << n) - 1)
  }
  #[inline]
  fn ceil_log2(&self, n: usize) -> usize {
    (self + (1 << n) - 1).floor_log2(n)
  }
  #[inline]
  fn align_power_of_two(&self, n: usize) -> usize {
    self.ceil_log2(n)
  }
  #[inline]
  fn align_power_of_two_and_shift(&self, n: usize) -> usize {
    (self + (1 << n) - 1) >> n
  }
}

pub fn clamp<T: PartialOrd>(input: T, min: T, max: T) -> T {
  if input < min {
    min
  } else if input > max {
    max
  } else {
    input
  }
}

// Rolling average with a window of 2^shift samples, rounding to nearest.
#[inline(always)]
pub const fn rolling_average(prev: i64, sample: i64, shift: u32) -> i64 {
  let n = 1i64 << shift;
  (prev * (n - 1) + sample + (n >> 1)) >> shift
}

// Scales `val` by `num / denom` in 64-bit precision.
#[inline(always)]
pub const fn rescale(val: i64, num: i64, denom: i64) -> i64 {
  val * num / denom
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn align_to_macroblocks() {
    assert_eq!(176usize.align_power_of_two(4), 176);
    assert_eq!(177usize.align_power_of_two(4), 192);
    assert_eq!(177usize.align_power_of_two_and_shift(4), 12);
    assert_eq!(8usize.align_power_of_two_and_shift(4), 1);
  }

  #[test]
  fn rolling_windows() {
    assert_eq!(rolling_average(100, 100, 2), 100);
    // (3 * 100 + 0 + 2) / 4
    assert_eq!(rolling_average(100, 0, 2), 75);
    // (31 * 64 + 0 + 16) / 32
    assert_eq!(rolling_average(64, 0, 5), 62);
  }

  #[test]
  fn clamp_is_total() {
    assert_eq!(clamp(5, 0, 3), 3);
    assert_eq!(clamp(-5, 0, 3), 0);
    assert_eq!(clamp(2, 0, 3), 2);
  }
}
