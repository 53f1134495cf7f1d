// Copyright (c) 2020-2023, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use crate::serialize::{Deserialize, Serialize};

use std::fmt;

/// How the bit budget is paced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RateControlMode {
  /// Variable bitrate for local playback, with a very deep buffer.
  Vbr,
  /// Constant bitrate for streaming, paced by the configured buffer model.
  Cbr,
}

impl fmt::Display for RateControlMode {
  fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
    write!(
      f,
      "{}",
      match self {
        RateControlMode::Vbr => "VBR",
        RateControlMode::Cbr => "CBR",
      }
    )
  }
}

/// Rate control configuration
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RateControlConfig {
  pub(crate) mode: RateControlMode,
  /// Target bitrate in kbit/s.
  pub(crate) target_bitrate: u32,
  pub(crate) min_quantizer: u8,
  pub(crate) max_quantizer: u8,
  pub(crate) fixed_quantizer: Option<u8>,
  pub(crate) key_quantizer: Option<u8>,
  pub(crate) gold_quantizer: Option<u8>,
  pub(crate) alt_quantizer: Option<u8>,
  pub(crate) under_shoot_pct: u32,
  pub(crate) over_shoot_pct: u32,
  pub(crate) starting_buffer_ms: i64,
  pub(crate) optimal_buffer_ms: i64,
  pub(crate) maximum_buffer_ms: i64,
  pub(crate) allow_drop_frames: bool,
  pub(crate) drop_frames_water_mark: u32,
  pub(crate) min_section_pct: u32,
}

impl Default for RateControlConfig {
  fn default() -> Self {
    RateControlConfig {
      mode: RateControlMode::Vbr,
      target_bitrate: 256,
      min_quantizer: 4,
      max_quantizer: 63,
      fixed_quantizer: None,
      key_quantizer: None,
      gold_quantizer: None,
      alt_quantizer: None,
      under_shoot_pct: 95,
      over_shoot_pct: 100,
      starting_buffer_ms: 4000,
      optimal_buffer_ms: 5000,
      maximum_buffer_ms: 6000,
      allow_drop_frames: false,
      drop_frames_water_mark: 0,
      min_section_pct: 0,
    }
  }
}

impl RateControlConfig {
  /// Create a default rate control configuration
  ///
  /// By default the encoder targets 256 kbit/s in VBR mode.
  pub fn new() -> Self {
    Default::default()
  }

  /// Set the pacing mode
  pub const fn with_mode(mut self, mode: RateControlMode) -> Self {
    self.mode = mode;
    self
  }

  /// Set the target bitrate in kbit/s
  pub const fn with_bitrate(mut self, kbps: u32) -> Self {
    self.target_bitrate = kbps;
    self
  }

  /// Restrict the quantizer to `min..=max`, both on the 0 to 63 scale
  pub const fn with_quantizer_range(mut self, min: u8, max: u8) -> Self {
    self.min_quantizer = min;
    self.max_quantizer = max;
    self
  }

  /// Code every frame at a fixed quantizer, on the 0 to 63 scale
  ///
  /// Rate targeting is disabled.
  pub const fn with_fixed_quantizer(mut self, q: u8) -> Self {
    self.fixed_quantizer = Some(q);
    self
  }

  /// Fixed quantizer for key frames, defaults to the fixed quantizer
  pub const fn with_key_quantizer(mut self, q: u8) -> Self {
    self.key_quantizer = Some(q);
    self
  }

  /// Fixed quantizer for golden refreshes, defaults to the fixed quantizer
  pub const fn with_gold_quantizer(mut self, q: u8) -> Self {
    self.gold_quantizer = Some(q);
    self
  }

  /// Fixed quantizer for alt-ref frames, defaults to the fixed quantizer
  pub const fn with_alt_quantizer(mut self, q: u8) -> Self {
    self.alt_quantizer = Some(q);
    self
  }

  /// Scale inter frame targets to `pct` percent and bound how far a low
  /// buffer may cut them
  pub const fn with_undershoot(mut self, pct: u32) -> Self {
    self.under_shoot_pct = pct;
    self
  }

  /// Bound how far a full buffer may raise inter frame targets
  pub const fn with_overshoot(mut self, pct: u32) -> Self {
    self.over_shoot_pct = pct;
    self
  }

  /// Set the CBR buffer model, in milliseconds of the target bitrate
  ///
  /// Zero optimal or maximum levels fall back to an eighth of a second.
  pub const fn with_buffer(
    mut self, starting_ms: i64, optimal_ms: i64, maximum_ms: i64,
  ) -> Self {
    self.starting_buffer_ms = starting_ms;
    self.optimal_buffer_ms = optimal_ms;
    self.maximum_buffer_ms = maximum_ms;
    self
  }

  /// Allow dropping frames when the buffer falls below `water_mark` percent
  /// of its optimal level
  pub const fn with_frame_dropping(mut self, water_mark: u32) -> Self {
    self.allow_drop_frames = true;
    self.drop_frames_water_mark = water_mark;
    self
  }

  /// Minimum inter frame budget as a percentage of the average
  pub const fn with_min_section_pct(mut self, pct: u32) -> Self {
    self.min_section_pct = pct;
    self
  }

  /// Rate targeting is bypassed by a fixed quantizer.
  pub const fn is_fixed_quantizer(&self) -> bool {
    self.fixed_quantizer.is_some()
  }
}
