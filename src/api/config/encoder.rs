// Copyright (c) 2020-2023, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use itertools::*;
use num_derive::*;

use crate::api::{EncoderMode, Rational, SpeedSettings};
use crate::serialize::{Deserialize, Serialize};

use std::fmt;

/// Largest accepted `arnr_max_frames`.
pub const MAX_ARNR_FRAMES: usize = 15;
/// Largest accepted `arnr_strength`.
pub const MAX_ARNR_STRENGTH: u8 = 6;

/// Which neighbours of the alt-ref source the temporal filter blends.
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
pub enum ArnrType {
  /// Frames before the source.
  Backward = 1,
  /// Frames after the source.
  Forward = 2,
  /// Frames on both sides of the source.
  Centered = 3,
}

impl fmt::Display for ArnrType {
  fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
    write!(
      f,
      "{}",
      match self {
        ArnrType::Backward => "Backward",
        ArnrType::Forward => "Forward",
        ArnrType::Centered => "Centered",
      }
    )
  }
}

/// Encoder settings which impact the produced bitstream.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct EncoderConfig {
  // output size
  /// Width of the frames in pixels.
  pub width: usize,
  /// Height of the frames in pixels.
  pub height: usize,
  /// Video time base.
  pub time_base: Rational,

  /// Encoding deadline.
  pub mode: EncoderMode,
  /// Speed within the mode, see [`SpeedSettings::from_mode`].
  ///
  /// [`SpeedSettings::from_mode`]: struct.SpeedSettings.html#method.from_mode
  pub cpu_used: i32,

  /// Flag to force all frames to be error resilient.
  ///
  /// References are refreshed by copy and entropy state is not carried
  /// between frames.
  pub error_resilient: bool,
  /// Loop filter sharpness, 0 to 7.
  pub sharpness: u8,

  // key frame placement
  /// Place key frames automatically.
  pub auto_key: bool,
  /// Interval between two automatic key frames.
  pub key_frame_frequency: u64,

  // golden and alt-ref pacing
  /// Pick golden refreshes from coding statistics rather than a fixed
  /// interval.
  pub auto_gold: bool,
  /// Golden group length used as a baseline, 0 for the default.
  pub alt_freq: u32,
  /// Number of frames held back before coding.
  pub lag_in_frames: usize,
  /// Code hidden alt-ref frames from the lookahead.
  pub play_alternate: bool,

  // alt-ref temporal filter
  /// Frames blended into an alt-ref, 0 to disable filtering.
  pub arnr_max_frames: usize,
  /// Filter strength, 0 to 6.
  pub arnr_strength: u8,
  /// Filter window placement.
  pub arnr_type: ArnrType,

  /// Settings which affect the enconding speed vs. quality trade-off.
  pub speed_settings: SpeedSettings,
}

/// Default preset for EncoderConfig: good quality at `cpu_used` 0. See
/// [`with_speed_preset()`].
///
/// [`with_speed_preset()`]: struct.EncoderConfig.html#method.with_speed_preset
impl Default for EncoderConfig {
  fn default() -> Self {
    Self::with_speed_preset(EncoderMode::GoodQuality, 0)
  }
}

impl EncoderConfig {
  /// This is a preset which provides default settings according to a mode
  /// and a `cpu_used` value. See [`from_mode()`].
  ///
  /// [`from_mode()`]: struct.SpeedSettings.html#method.from_mode
  pub fn with_speed_preset(mode: EncoderMode, cpu_used: i32) -> Self {
    EncoderConfig {
      width: 640,
      height: 480,
      time_base: Rational { num: 1, den: 30 },

      mode,
      cpu_used,

      error_resilient: false,
      sharpness: 0,

      auto_key: true,
      key_frame_frequency: 128,

      auto_gold: true,
      alt_freq: 0,
      lag_in_frames: 0,
      play_alternate: false,

      arnr_max_frames: 0,
      arnr_strength: 3,
      arnr_type: ArnrType::Centered,

      speed_settings: SpeedSettings::from_mode(mode, cpu_used),
    }
  }

  /// Returns the video frame rate computed from [`time_base`].
  ///
  /// [`time_base`]: #structfield.time_base
  pub fn frame_rate(&self) -> f64 {
    Rational::from_reciprocal(self.time_base).as_f64()
  }

  /// Number of 16x16 macroblocks in a frame.
  pub const fn mb_count(&self) -> usize {
    ((self.width + 15) >> 4) * ((self.height + 15) >> 4)
  }

  /// Hidden alt-ref frames can be built from the lookahead.
  #[inline]
  pub const fn alt_ref_enabled(&self) -> bool {
    self.play_alternate && self.lag_in_frames > 0 && !self.error_resilient
  }
}

impl fmt::Display for EncoderConfig {
  fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
    let pairs = [
      ("width", self.width.to_string()),
      ("height", self.height.to_string()),
      ("fps", format!("{:.3}", self.frame_rate())),
      ("mode", self.mode.to_string()),
      ("cpu_used", self.cpu_used.to_string()),
      ("speed", self.speed_settings.speed.to_string()),
      ("recode_loop", self.speed_settings.recode_loop.to_string()),
      ("rd", self.speed_settings.rd.to_string()),
      ("error_resilient", self.error_resilient.to_string()),
      ("sharpness", self.sharpness.to_string()),
      ("auto_key", self.auto_key.to_string()),
      ("kf_freq", self.key_frame_frequency.to_string()),
      ("auto_gold", self.auto_gold.to_string()),
      ("alt_freq", self.alt_freq.to_string()),
      ("lag_in_frames", self.lag_in_frames.to_string()),
      ("play_alternate", self.play_alternate.to_string()),
      ("arnr_max_frames", self.arnr_max_frames.to_string()),
      ("arnr_strength", self.arnr_strength.to_string()),
      ("arnr_type", self.arnr_type.to_string()),
    ];
    write!(
      f,
      "{}",
      pairs.iter().map(|pair| format!("{}={}", pair.0, pair.1)).join(" ")
    )
  }
}
