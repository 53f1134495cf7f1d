// Copyright (c) 2023, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use crate::api::SpeedSettings;
use crate::encoder::EncodeStats;

/// Whether the frame about to be coded starts as a key frame.
///
/// The first frame, a forced key frame and the automatic key interval
/// all qualify.
pub fn key_frame_due(
  frame_number: u64, forced: bool, auto_key: bool, frames_since_key: u64,
  key_frame_frequency: u64,
) -> bool {
  frame_number == 0
    || forced
    || (auto_key
      && key_frame_frequency > 0
      && frames_since_key % key_frame_frequency == 0)
}

/// Evidence carried between frames to spot a scene cut after coding.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyFrameHistory {
  last_intra_error: i64,
  last_prediction_error: i64,
  /// Intra share of the previous frame, 100 after a key frame.
  pub last_frame_percent_intra: u32,
}

impl KeyFrameHistory {
  /// Decides whether a just coded inter frame should be redone as a key
  /// frame.
  ///
  /// `this_frame_percent_intra` is the intra share of the attempt that was
  /// just coded.
  pub fn decide_key_frame(
    &mut self, stats: &EncodeStats, this_frame_percent_intra: u32,
    mb_count: usize, speed: &SpeedSettings, refresh_golden: bool,
  ) -> bool {
    if speed.speed > 11 {
      return false;
    }

    if speed.compressor_speed == 2 && speed.speed >= 5 && !speed.rd {
      let change = (stats.intra_error - self.last_intra_error).abs() as f64
        / (1 + self.last_intra_error) as f64;
      let change2 = (stats.prediction_error - self.last_prediction_error)
        .abs() as f64
        / (1 + self.last_prediction_error) as f64;
      let min_error = (mb_count * 256) as i64;

      self.last_intra_error = stats.intra_error;
      self.last_prediction_error = stats.prediction_error;

      return 10 * stats.intra_error / (1 + stats.prediction_error) < 15
        && stats.prediction_error > min_error
        && (change > 0.25 || change2 > 0.25);
    }

    let this = this_frame_percent_intra;
    let last = self.last_frame_percent_intra;

    if (this == 100 && this > last + 2) || (this > 95 && this >= last + 5) {
      return true;
    }

    // Golden refreshes often show an intra spike of their own.
    !refresh_golden
      && ((this > 60 && this > last * 2)
        || (this > 75 && this > last * 3 / 2)
        || (this > 90 && this > last + 10))
  }

  /// Records the intra share of a coded frame for the next decision.
  pub fn frame_coded(&mut self, key_frame: bool, percent_intra: u32) {
    self.last_frame_percent_intra = if key_frame { 100 } else { percent_intra };
  }
}
