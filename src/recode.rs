// Copyright (c) 2019-2023, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

//! Per-frame quantizer search.
//!
//! The search owns the bounds of one frame's recode loop. The driver encodes
//! at [`QuantizerSearch::q`], stores the resulting size in
//! `RCState::projected_frame_size` and asks [`QuantizerSearch::evaluate`]
//! whether to try again.

use crate::api::RecodeLoop;
use crate::encoder::FrameInvariants;
use crate::quantize::MAXQ;
use crate::rate::{zbin_oq_max, Damping, RCState};

// Re-estimates allowed per recode when the model disagrees with the bounds.
const MAX_RETRIES: u32 = 10;

/// Outcome of one search step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStep {
  /// Keep the attempt that was just coded.
  Accept,
  /// Restore the coding context and encode again at the new quantizer.
  Recode,
}

/// Whether the speed settings let `fi` be coded more than once.
pub fn recode_allowed(fi: &FrameInvariants) -> bool {
  if fi.is_src_frame_alt_ref {
    return false;
  }
  match fi.speed.recode_loop {
    RecodeLoop::Always => true,
    RecodeLoop::KeyAndGolden => fi.is_key_frame() || fi.refresh.golden,
    RecodeLoop::Off => false,
  }
}

#[derive(Debug, Clone)]
pub struct QuantizerSearch {
  q: i32,
  zbin_over_quant: u32,
  q_low: i32,
  q_high: i32,
  zbin_oq_low: u32,
  zbin_oq_high: u32,
  bottom_index: i32,
  top_index: i32,
  under_shoot_limit: i64,
  over_shoot_limit: i64,
  overshoot_seen: bool,
  undershoot_seen: bool,
  active_worst_qchanged: bool,
  attempts: u32,
  max_attempts: u32,
}

impl QuantizerSearch {
  /// Opens the search at the quantizer the model expects to hit
  /// `this_frame_target`.
  pub fn new(rc: &RCState, fi: &FrameInvariants, alt_ref_active: bool) -> Self {
    let (q, zbin_over_quant) =
      rc.regulate_q(fi, alt_ref_active, rc.this_frame_target);
    let (under_shoot_limit, over_shoot_limit) =
      rc.compute_frame_size_bounds(fi);
    QuantizerSearch {
      q,
      zbin_over_quant,
      q_low: rc.best_quality,
      q_high: rc.worst_quality,
      zbin_oq_low: 0,
      zbin_oq_high: zbin_oq_max(fi, alt_ref_active),
      bottom_index: rc.active_best_quality,
      top_index: rc.active_worst_quality,
      under_shoot_limit,
      over_shoot_limit,
      overshoot_seen: false,
      undershoot_seen: false,
      active_worst_qchanged: false,
      attempts: 0,
      max_attempts: (2 * (rc.worst_quality - rc.best_quality) + 20).max(1)
        as u32,
    }
  }

  #[inline]
  pub fn q(&self) -> u8 {
    self.q as u8
  }

  #[inline]
  pub fn zbin_over_quant(&self) -> u32 {
    self.zbin_over_quant
  }

  /// Number of frames coded so far, redos included.
  #[inline]
  pub fn attempts(&self) -> u32 {
    self.attempts
  }

  /// The active worst quality was raised while searching this frame.
  #[inline]
  pub fn active_worst_qchanged(&self) -> bool {
    self.active_worst_qchanged
  }


  /// Starts over once the frame was turned into a key frame.
  ///
  /// The caller has already restored the coding context and computed the
  /// key frame target.
  pub fn restart_as_key(&mut self, rc: &RCState, fi: &FrameInvariants) {
    debug_assert!(fi.is_key_frame());
    let (q, zbin_over_quant) = rc.regulate_q(fi, false, rc.this_frame_target);
    let (under, over) = rc.compute_frame_size_bounds(fi);
    self.q = q;
    self.zbin_over_quant = zbin_over_quant;
    self.q_low = rc.best_quality;
    self.q_high = rc.worst_quality;
    self.zbin_oq_low = 0;
    self.zbin_oq_high = zbin_oq_max(fi, false);
    self.bottom_index = rc.active_best_quality;
    self.top_index = rc.active_worst_quality;
    self.under_shoot_limit = under;
    self.over_shoot_limit = over;
    self.overshoot_seen = false;
    self.undershoot_seen = false;
    self.attempts += 1;
  }

  // Sustained overshoot at the ceiling: raise the ceiling itself, one step
  // per ~4% of excess.
  fn relax_active_worst(&mut self, rc: &mut RCState, size: i64, over: i64) {
    if self.q == rc.active_worst_quality
      && rc.active_worst_quality < rc.worst_quality
      && size > over
    {
      let mut over_size_percent = (size - over) * 100 / over;
      while rc.active_worst_quality < rc.worst_quality
        && over_size_percent > 0
      {
        rc.active_worst_quality += 1;
        self.top_index = rc.active_worst_quality;
        over_size_percent = (over_size_percent as f64 * 0.96) as i64;
      }
      self.active_worst_qchanged = true;
    }
  }

  fn update_factors(&self, rc: &mut RCState, fi: &FrameInvariants, d: Damping) {
    if !self.active_worst_qchanged {
      rc.update_rate_correction_factors(fi, d);
    }
  }

  /// Judges the attempt coded at `fi.qindex` whose size is in
  /// `rc.projected_frame_size`.
  pub fn evaluate(
    &mut self, rc: &mut RCState, fi: &FrameInvariants, recode_allowed: bool,
    alt_ref_active: bool,
  ) -> SearchStep {
    self.attempts += 1;
    self.active_worst_qchanged = false;
    let size = rc.projected_frame_size;
    let over = self.over_shoot_limit.max(1);
    let under = self.under_shoot_limit;

    self.relax_active_worst(rc, size, over);

    log::trace!(
      "attempt {} q={} zbin={} size={} limits=[{}, {}] range=[{}, {}]",
      self.attempts,
      self.q,
      self.zbin_over_quant,
      size,
      under,
      over,
      self.q_low,
      self.q_high
    );

    if !recode_allowed || self.attempts >= self.max_attempts {
      return SearchStep::Accept;
    }

    let overshoot = size > over && self.q < self.top_index;
    let undershoot = size < under && self.q > self.bottom_index;
    if !overshoot && !undershoot {
      return SearchStep::Accept;
    }

    let last_q = self.q;
    let last_zbin = self.zbin_over_quant;
    let target = rc.this_frame_target;

    if size > over {
      self.q_low = if self.q < self.q_high { self.q + 1 } else { self.q_high };
      if self.zbin_over_quant > 0 {
        self.zbin_oq_low = (self.zbin_over_quant + 1).min(self.zbin_oq_high);
      }

      if self.undershoot_seen {
        self.update_factors(rc, fi, Damping::High);
        self.q = (self.q_high + self.q_low + 1) / 2;
        if self.q < MAXQ as i32 {
          self.zbin_over_quant = 0;
        } else {
          self.zbin_oq_low = (self.zbin_over_quant + 1).min(self.zbin_oq_high);
          self.zbin_over_quant = (self.zbin_oq_high + self.zbin_oq_low) / 2;
        }
      } else {
        self.update_factors(rc, fi, Damping::Low);
        (self.q, self.zbin_over_quant) =
          rc.regulate_q(fi, alt_ref_active, target);
        let mut retries = 0;
        while (self.q < self.q_low || self.zbin_over_quant < self.zbin_oq_low)
          && retries < MAX_RETRIES
        {
          rc.update_rate_correction_factors(fi, Damping::Low);
          (self.q, self.zbin_over_quant) =
            rc.regulate_q(fi, alt_ref_active, target);
          retries += 1;
        }
      }

      self.overshoot_seen = true;
    } else {
      if self.zbin_over_quant == 0 {
        self.q_high = if self.q > self.q_low { self.q - 1 } else { self.q_low };
      } else {
        self.zbin_oq_high =
          (self.zbin_over_quant - 1).max(self.zbin_oq_low);
      }

      if self.overshoot_seen {
        self.update_factors(rc, fi, Damping::High);
        self.q = (self.q_high + self.q_low) / 2;
        if self.q < MAXQ as i32 {
          self.zbin_over_quant = 0;
        } else {
          self.zbin_over_quant = (self.zbin_oq_high + self.zbin_oq_low) / 2;
        }
      } else {
        self.update_factors(rc, fi, Damping::Low);
        (self.q, self.zbin_over_quant) =
          rc.regulate_q(fi, alt_ref_active, target);
        let mut retries = 0;
        while (self.q > self.q_high
          || self.zbin_over_quant > self.zbin_oq_high)
          && retries < MAX_RETRIES
        {
          rc.update_rate_correction_factors(fi, Damping::Low);
          (self.q, self.zbin_over_quant) =
            rc.regulate_q(fi, alt_ref_active, target);
          retries += 1;
        }
      }

      self.undershoot_seen = true;
    }

    self.q = self.q.clamp(self.q_low, self.q_high.max(self.q_low));
    self.zbin_over_quant = self
      .zbin_over_quant
      .clamp(self.zbin_oq_low, self.zbin_oq_high.max(self.zbin_oq_low));

    if self.q != last_q || self.zbin_over_quant != last_zbin {
      SearchStep::Recode
    } else {
      SearchStep::Accept
    }
  }
}
