// Copyright (c) 2023, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use crate::encoder::{EncodeStats, ALTREF_FRAME, GOLDEN_FRAME, MAX_REF_FRAMES};
use crate::rate::RCState;

pub const DEFAULT_GF_INTERVAL: u32 = 7;
pub const MIN_GF_INTERVAL: u32 = 4;

/// Golden and alt-ref pacing state carried from frame to frame.
#[derive(Debug, Clone)]
pub struct GoldenFrameState {
  /// Inter frames left before the next golden refresh is proposed.
  pub frames_till_gf_update_due: u32,
  /// Length of the current golden group.
  pub current_gf_interval: u32,
  pub baseline_gf_interval: u32,
  pub frames_since_golden: u32,
  /// Fixed golden interval used when `auto_gold` is off.
  pub gold_freq: u32,
  pub auto_gold: bool,
  pub source_alt_ref_pending: bool,
  pub source_alt_ref_active: bool,
  /// Per-reference macroblock usage accumulated since the last golden.
  pub recent_ref_frame_usage: [u32; MAX_REF_FRAMES],
  /// Macroblocks whose content still derives from the golden frame.
  pub gf_active_count: u32,
  pub gf_update_recommended: bool,
  gf_bad_count: u32,
  mb_count: u32,
}

impl GoldenFrameState {
  pub fn new(mb_count: usize, alt_freq: u32, auto_gold: bool) -> Self {
    let baseline =
      if alt_freq > 0 { alt_freq } else { DEFAULT_GF_INTERVAL };
    GoldenFrameState {
      frames_till_gf_update_due: 0,
      current_gf_interval: 0,
      baseline_gf_interval: baseline,
      frames_since_golden: 0,
      gold_freq: DEFAULT_GF_INTERVAL,
      auto_gold,
      source_alt_ref_pending: false,
      source_alt_ref_active: false,
      recent_ref_frame_usage: [1; MAX_REF_FRAMES],
      gf_active_count: mb_count as u32,
      gf_update_recommended: false,
      gf_bad_count: 0,
      mb_count: mb_count as u32,
    }
  }

  /// Interval before the next golden refresh right after a key frame.
  pub fn reset_for_key_frame(&mut self) {
    self.frames_till_gf_update_due =
      if self.auto_gold { self.baseline_gf_interval } else { self.gold_freq };
  }

  /// Percentage of macroblocks still tracking the golden frame.
  pub fn active_pct(&self) -> u32 {
    100 * self.gf_active_count / self.mb_count.max(1)
  }

  /// Share of recent inter prediction drawn from golden or alt-ref,
  /// floored by the active percentage.
  pub fn usage_pct(&self) -> u32 {
    let usage = &self.recent_ref_frame_usage;
    let total: u32 = usage.iter().sum();
    let mut pct = 0;
    if total > 0 {
      pct = (usage[GOLDEN_FRAME] + usage[ALTREF_FRAME]) * 100 / total;
    }
    pct.max(self.active_pct()).min(100)
  }

  fn reset_active_map(&mut self) {
    self.gf_active_count = self.mb_count;
    self.frames_since_golden = 0;
  }

  /// Bookkeeping after an alt-ref frame was coded.
  pub fn update_alt_ref_frame_and_stats(&mut self, rc: &mut RCState) {
    if !self.auto_gold {
      self.frames_till_gf_update_due = self.gold_freq;
    }
    if self.frames_till_gf_update_due > 0 {
      self.current_gf_interval = self.frames_till_gf_update_due;
      rc.gf_overspend_bits += rc.projected_frame_size;
      rc.non_gf_bitrate_adjustment =
        rc.gf_overspend_bits / self.frames_till_gf_update_due as i64;
    }

    self.reset_active_map();
    self.source_alt_ref_pending = false;
    self.source_alt_ref_active = true;
  }

  /// Bookkeeping after any other coded frame.
  ///
  /// `fixed_q_alt_ref` requests an alt-ref for the group that a golden
  /// refresh opens.
  pub fn update_golden_frame_and_stats(
    &mut self, rc: &mut RCState, key_frame: bool, refresh_golden: bool,
    refresh_altref: bool, frame_usage: &[u32; MAX_REF_FRAMES],
    fixed_q_alt_ref: bool,
  ) {
    if refresh_golden {
      if !self.auto_gold {
        self.frames_till_gf_update_due = self.gold_freq;
      }
      if self.frames_till_gf_update_due > 0 {
        self.current_gf_interval = self.frames_till_gf_update_due;
        // Key frame overspend is recovered separately.
        if !key_frame && !self.source_alt_ref_active {
          rc.gf_overspend_bits +=
            rc.projected_frame_size - rc.inter_frame_target;
        }
        rc.non_gf_bitrate_adjustment =
          rc.gf_overspend_bits / self.frames_till_gf_update_due as i64;
      }

      self.reset_active_map();
      self.recent_ref_frame_usage = [1; MAX_REF_FRAMES];

      if fixed_q_alt_ref && !refresh_altref {
        self.source_alt_ref_pending = true;
        self.frames_till_gf_update_due = self.baseline_gf_interval;
      }
      if !self.source_alt_ref_pending {
        self.source_alt_ref_active = false;
      }
      self.frames_till_gf_update_due =
        self.frames_till_gf_update_due.saturating_sub(1);
    } else if !refresh_altref {
      self.frames_till_gf_update_due =
        self.frames_till_gf_update_due.saturating_sub(1);
      self.frames_since_golden += 1;
      if self.frames_since_golden > 1 {
        for (acc, n) in
          self.recent_ref_frame_usage.iter_mut().zip(frame_usage.iter())
        {
          *acc += n;
        }
      }
    }
  }

  /// Watches for a stale golden frame in realtime mode.
  ///
  /// Recommends a refresh after eight consecutive frames in which the
  /// golden frame is barely used while the background stays static.
  pub fn check_gf_quality(&mut self, last: &EncodeStats) {
    let mbs = self.mb_count.max(1);
    let gf_active_pct = self.active_pct();
    let gf_ref_usage_pct = last.ref_frame_usage[GOLDEN_FRAME] * 100 / mbs;
    let zz_pct = last.zero_motion_mbs * 100 / mbs;

    if !self.gf_update_recommended {
      if self.frames_since_golden > 7 {
        if gf_active_pct < 10 || gf_active_pct + gf_ref_usage_pct < 15 {
          if zz_pct >= 25 {
            self.gf_bad_count += 1;
            if self.gf_bad_count >= 8 {
              self.gf_update_recommended = true;
              self.gf_bad_count = 0;
            }
          } else {
            self.gf_bad_count = 0;
          }
        } else {
          self.gf_bad_count = 0;
        }
      }
    } else if zz_pct < 15 {
      self.gf_update_recommended = false;
      self.gf_bad_count = 0;
    }
  }

  /// Returns and clears the realtime golden refresh recommendation.
  pub fn take_update_recommendation(&mut self) -> bool {
    std::mem::take(&mut self.gf_update_recommended)
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::api::{EncoderConfig, RateControlConfig};

  fn rc() -> RCState {
    RCState::new(&EncoderConfig::default(), &RateControlConfig::new(), 99)
  }

  #[test]
  fn inter_frames_count_down_and_accumulate() {
    let mut g = GoldenFrameState::new(100, 0, true);
    let mut rc = rc();
    g.frames_till_gf_update_due = 3;
    let usage = [1, 90, 9, 0];
    g.update_golden_frame_and_stats(
      &mut rc, false, false, false, &usage, false,
    );
    assert_eq!(g.frames_till_gf_update_due, 2);
    assert_eq!(g.frames_since_golden, 1);
    // The first frame after a golden refresh is not accumulated.
    assert_eq!(g.recent_ref_frame_usage, [1; 4]);
    g.update_golden_frame_and_stats(
      &mut rc, false, false, false, &usage, false,
    );
    assert_eq!(g.recent_ref_frame_usage, [2, 91, 10, 1]);
  }

  #[test]
  fn golden_refresh_resets_group() {
    let mut g = GoldenFrameState::new(100, 0, true);
    let mut rc = rc();
    g.frames_till_gf_update_due = 8;
    g.frames_since_golden = 8;
    g.gf_active_count = 3;
    rc.projected_frame_size = 30_000;
    rc.inter_frame_target = 10_000;
    g.update_golden_frame_and_stats(
      &mut rc, false, true, false, &[0; 4], false,
    );
    assert_eq!(g.current_gf_interval, 8);
    assert_eq!(g.frames_till_gf_update_due, 7);
    assert_eq!(g.frames_since_golden, 0);
    assert_eq!(g.gf_active_count, 100);
    assert_eq!(rc.gf_overspend_bits, 20_000);
    assert_eq!(rc.non_gf_bitrate_adjustment, 2_500);
  }

  #[test]
  fn fixed_q_golden_schedules_alt_ref() {
    let mut g = GoldenFrameState::new(100, 0, true);
    let mut rc = rc();
    g.frames_till_gf_update_due = 12;
    g.update_golden_frame_and_stats(
      &mut rc, false, true, false, &[0; 4], true,
    );
    assert!(g.source_alt_ref_pending);
    assert_eq!(g.frames_till_gf_update_due, DEFAULT_GF_INTERVAL - 1);

    g.update_alt_ref_frame_and_stats(&mut rc);
    assert!(!g.source_alt_ref_pending);
    assert!(g.source_alt_ref_active);
  }

  #[test]
  fn stale_golden_is_flagged_after_eight_frames() {
    let mut g = GoldenFrameState::new(100, 0, true);
    g.frames_since_golden = 10;
    g.gf_active_count = 5;
    let stats = EncodeStats { zero_motion_mbs: 40, ..Default::default() };
    for _ in 0..7 {
      g.check_gf_quality(&stats);
      assert!(!g.gf_update_recommended);
    }
    g.check_gf_quality(&stats);
    assert!(g.gf_update_recommended);

    // Motion resumes before the caller reads the flag.
    let moving = EncodeStats { zero_motion_mbs: 5, ..Default::default() };
    g.check_gf_quality(&moving);
    assert!(!g.take_update_recommendation());
  }
}
