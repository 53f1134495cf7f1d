// Copyright (c) 2020-2023, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use num_derive::*;

use crate::serialize::{Deserialize, Serialize};

use std::fmt;

/// Range of `cpu_used` accepted in good quality mode.
pub const GOOD_QUALITY_CPU_USED: (i32, i32) = (-5, 5);
/// Range of `cpu_used` accepted in realtime mode.
pub const REALTIME_CPU_USED: (i32, i32) = (-16, 16);

/// Encoding deadline.
#[derive(
  Clone,
  Copy,
  Debug,
  PartialOrd,
  PartialEq,
  Eq,
  FromPrimitive,
  Serialize,
  Deserialize,
)]
pub enum EncoderMode {
  /// Slowest, always recodes and searches modes by rate distortion.
  BestQuality,
  /// Speed selected by `cpu_used`.
  GoodQuality,
  /// Speed selected by `cpu_used`, never recodes.
  Realtime,
}

impl EncoderMode {
  /// Accepted `cpu_used` range for the mode.
  pub const fn cpu_used_range(self) -> (i32, i32) {
    match self {
      EncoderMode::BestQuality => (0, 0),
      EncoderMode::GoodQuality => GOOD_QUALITY_CPU_USED,
      EncoderMode::Realtime => REALTIME_CPU_USED,
    }
  }
}

impl fmt::Display for EncoderMode {
  fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
    write!(
      f,
      "{}",
      match self {
        EncoderMode::BestQuality => "Best",
        EncoderMode::GoodQuality => "Good",
        EncoderMode::Realtime => "Realtime",
      }
    )
  }
}

/// When a frame may be coded more than once to hit its size target.
#[derive(
  Clone,
  Copy,
  Debug,
  PartialOrd,
  PartialEq,
  Eq,
  FromPrimitive,
  Serialize,
  Deserialize,
)]
pub enum RecodeLoop {
  /// Every frame is coded once.
  Off,
  /// Any frame may be recoded.
  Always,
  /// Only key frames and golden refreshes are recoded.
  KeyAndGolden,
}

impl RecodeLoop {
  /// Some frames may be recoded.
  pub const fn is_enabled(self) -> bool {
    !matches!(self, RecodeLoop::Off)
  }
}

impl fmt::Display for RecodeLoop {
  fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
    write!(
      f,
      "{}",
      match self {
        RecodeLoop::Off => "Off",
        RecodeLoop::Always => "Always",
        RecodeLoop::KeyAndGolden => "Key+Golden",
      }
    )
  }
}

/// Contains the speed settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeedSettings {
  /// 0 for best quality, 1 for good quality, 2 for realtime.
  pub compressor_speed: u8,

  /// Magnitude of `cpu_used`.
  ///
  /// Higher is faster.
  pub speed: u32,

  /// Which frames the quantizer search may recode.
  pub recode_loop: RecodeLoop,

  /// Enables rate distortion mode search.
  ///
  /// Enabled is slower.
  pub rd: bool,
}

impl Default for SpeedSettings {
  /// The default settings are good quality at `cpu_used` 0.
  fn default() -> Self {
    SpeedSettings::from_mode(EncoderMode::GoodQuality, 0)
  }
}

impl SpeedSettings {
  /// Set the speed settings according to a mode and a `cpu_used` value.
  ///
  /// Out of range values are clamped to the mode's range.
  pub fn from_mode(mode: EncoderMode, cpu_used: i32) -> Self {
    let (min, max) = mode.cpu_used_range();
    let speed = cpu_used.clamp(min, max).unsigned_abs();

    match mode {
      EncoderMode::BestQuality => SpeedSettings {
        compressor_speed: 0,
        speed: 0,
        recode_loop: RecodeLoop::Always,
        rd: true,
      },
      EncoderMode::GoodQuality => {
        let recode_loop = match speed {
          0..=1 => RecodeLoop::Always,
          2..=3 => RecodeLoop::KeyAndGolden,
          _ => RecodeLoop::Off,
        };
        SpeedSettings { compressor_speed: 1, speed, recode_loop, rd: speed < 4 }
      }
      EncoderMode::Realtime => SpeedSettings {
        compressor_speed: 2,
        speed,
        recode_loop: RecodeLoop::Off,
        rd: speed <= 3,
      },
    }
  }
}
