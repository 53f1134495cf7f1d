// Copyright (c) 2019-2023, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

//! One-pass rate control.
//!
//! Sizes are tracked in bits and modelled per macroblock through
//! [`bits_per_mb`], scaled by a correction factor learned per frame class.
//! The leaky bucket is `bits_off_target`; `buffer_level` mirrors it after
//! every frame.

use crate::api::{
  EncoderConfig, RateControlConfig, RateControlMode, SpeedSettings,
};
use crate::encoder::{FrameInvariants, GoldenFrameState, MIN_GF_INTERVAL};
use crate::quantize::{
  bits_per_mb, q_to_qindex, BPER_MB_NORMBITS, MAXQ, QINDEX_RANGE,
};
use crate::serialize::{Deserialize, Serialize};
use crate::util::{clamp, rescale, rolling_average};

pub const MIN_BPB_FACTOR: f64 = 0.01;
pub const MAX_BPB_FACTOR: f64 = 50.0;

/// Ceiling of the zero bin widening applied beyond `MAXQ`.
pub const ZBIN_OQ_MAX: u32 = 192;

pub const KEY_FRAME_CONTEXT: usize = 5;
const PRIOR_KEY_FRAME_WEIGHT: [i64; KEY_FRAME_CONTEXT] = [1, 2, 3, 4, 5];

pub const MAX_CONSEC_DROPPED_FRAMES: i64 = 4;

// Each zero bin step removes about 1% of the remaining bits, a little less
// with every step.
const ZBIN_FACTOR_START: f64 = 0.99;
const ZBIN_FACTOR_STEP: f64 = 0.01 / 256.0;
const ZBIN_FACTOR_MAX: f64 = 0.999;

const FRAME_INTER: usize = 1;
const FRAME_KEY: usize = 0;

#[rustfmt::skip]
const KF_LOW_MOTION_MINQ: [u8; QINDEX_RANGE] = [
  0,  0,  0,  0,  0,  0,  0,  0,  0,  0,  0,  0,  0,  0,  0,  0,
  0,  0,  0,  0,  0,  0,  0,  0,  0,  0,  0,  0,  0,  0,  0,  0,
  0,  0,  0,  0,  0,  0,  0,  0,  0,  0,  0,  0,  0,  0,  0,  0,
  1,  1,  1,  1,  2,  2,  2,  2,  3,  3,  3,  3,  4,  4,  4,  4,
  5,  5,  5,  6,  6,  6,  7,  7,  7,  8,  8,  8,  9,  9,  10, 10,
  11, 11, 12, 12, 13, 13, 14, 14, 15, 15, 16, 16, 17, 17, 18, 18,
  19, 19, 20, 20, 21, 21, 22, 22, 23, 23, 24, 24, 25, 25, 26, 26,
  27, 27, 28, 28, 29, 29, 30, 30, 31, 32, 33, 34, 35, 36, 37, 38,
];

#[rustfmt::skip]
const KF_HIGH_MOTION_MINQ: [u8; QINDEX_RANGE] = [
  0,  0,  0,  0,  0,  0,  0,  0,  0,  0,  0,  0,  0,  0,  0,  0,
  0,  0,  0,  0,  0,  0,  0,  0,  0,  0,  0,  0,  1,  1,  1,  1,
  2,  2,  2,  2,  3,  3,  3,  3,  4,  4,  4,  4,  5,  5,  5,  5,
  6,  6,  6,  6,  7,  7,  7,  7,  8,  8,  8,  9,  9,  9,  10, 10,
  11, 11, 12, 12, 13, 13, 14, 14, 15, 15, 16, 16, 17, 17, 18, 18,
  19, 19, 20, 20, 21, 21, 22, 22, 23, 23, 24, 24, 25, 25, 26, 26,
  27, 27, 28, 28, 29, 29, 30, 30, 31, 31, 32, 32, 33, 33, 34, 34,
  35, 35, 36, 36, 37, 38, 39, 40, 41, 42, 43, 44, 45, 46, 47, 48,
];

#[rustfmt::skip]
const GF_LOW_MOTION_MINQ: [u8; QINDEX_RANGE] = [
  0,  0,  0,  0,  1,  1,  1,  1,  1,  1,  1,  1,  2,  2,  2,  2,
  3,  3,  3,  3,  4,  4,  4,  4,  5,  5,  5,  5,  6,  6,  6,  6,
  7,  7,  7,  7,  8,  8,  8,  8,  9,  9,  9,  9,  10, 10, 10, 10,
  11, 11, 12, 12, 13, 13, 14, 14, 15, 15, 16, 16, 17, 17, 18, 18,
  19, 19, 20, 20, 21, 21, 22, 22, 23, 23, 24, 24, 25, 25, 26, 26,
  27, 27, 28, 28, 29, 29, 30, 30, 31, 31, 32, 32, 33, 33, 34, 34,
  35, 35, 36, 36, 37, 37, 38, 38, 39, 39, 40, 40, 41, 41, 42, 42,
  43, 44, 45, 46, 47, 48, 49, 50, 51, 52, 53, 54, 55, 56, 57, 58,
];

#[rustfmt::skip]
const GF_MID_MOTION_MINQ: [u8; QINDEX_RANGE] = [
  0,  0,  0,  0,  1,  1,  1,  1,  1,  1,  2,  2,  3,  3,  3,  4,
  4,  4,  5,  5,  5,  6,  6,  6,  7,  7,  7,  8,  8,  8,  9,  9,
  9,  10, 10, 10, 10, 11, 11, 11, 12, 12, 12, 12, 13, 13, 13, 14,
  14, 14, 15, 15, 16, 16, 17, 17, 18, 18, 19, 19, 20, 20, 21, 21,
  22, 22, 23, 23, 24, 24, 25, 25, 26, 26, 27, 27, 28, 28, 29, 29,
  30, 30, 31, 31, 32, 32, 33, 33, 34, 34, 35, 35, 36, 36, 37, 37,
  38, 39, 39, 40, 40, 41, 41, 42, 42, 43, 43, 44, 45, 46, 47, 48,
  49, 50, 51, 52, 53, 54, 55, 56, 57, 58, 59, 60, 61, 62, 63, 64,
];

#[rustfmt::skip]
const GF_HIGH_MOTION_MINQ: [u8; QINDEX_RANGE] = [
  0,  0,  0,  0,  1,  1,  1,  1,  1,  2,  2,  2,  3,  3,  3,  4,
  4,  4,  5,  5,  5,  6,  6,  6,  7,  7,  7,  8,  8,  8,  9,  9,
  9,  10, 10, 10, 11, 11, 12, 12, 13, 13, 14, 14, 15, 15, 16, 16,
  17, 17, 18, 18, 19, 19, 20, 20, 21, 21, 22, 22, 23, 23, 24, 24,
  25, 25, 26, 26, 27, 27, 28, 28, 29, 29, 30, 30, 31, 31, 32, 32,
  33, 33, 34, 34, 35, 35, 36, 36, 37, 37, 38, 38, 39, 39, 40, 40,
  41, 41, 42, 42, 43, 44, 45, 46, 47, 48, 49, 50, 51, 52, 53, 54,
  55, 56, 57, 58, 59, 60, 62, 64, 66, 68, 70, 72, 74, 76, 78, 80,
];

#[rustfmt::skip]
const INTER_MINQ: [u8; QINDEX_RANGE] = [
  0,  0,  0,  0,  1,  1,  2,  3,  3,  4,  4,  5,  6,  6,  7,  7,
  8,  8,  9,  9,  10, 11, 11, 12, 12, 13, 13, 14, 14, 15, 15, 16,
  16, 17, 17, 17, 18, 18, 19, 19, 20, 20, 21, 21, 22, 22, 22, 23,
  23, 24, 24, 24, 25, 25, 26, 27, 28, 28, 29, 30, 31, 32, 33, 34,
  35, 35, 36, 37, 38, 39, 39, 40, 41, 42, 43, 43, 44, 45, 46, 47,
  47, 48, 49, 49, 51, 52, 53, 54, 54, 55, 56, 56, 57, 57, 58, 58,
  59, 59, 60, 61, 61, 62, 62, 63, 64, 64, 65, 66, 67, 67, 68, 69,
  69, 70, 71, 71, 72, 73, 74, 75, 76, 76, 77, 78, 79, 80, 81, 81,
];

// Golden frame boost by ambient Q.
#[rustfmt::skip]
const GF_BOOST_QADJUSTMENT: [i64; QINDEX_RANGE] = [
  80,  82,  84,  86,  88,  90,  92,  94,  96,  97,  98,  99,  100, 101, 102, 103,
  104, 105, 106, 107, 108, 109, 110, 111, 112, 113, 114, 115, 116, 117, 118, 119,
  120, 121, 122, 123, 124, 125, 126, 127, 128, 129, 130, 131, 132, 133, 134, 135,
  136, 137, 138, 139, 140, 141, 142, 143, 144, 145, 146, 147, 148, 149, 150, 151,
  152, 153, 154, 155, 156, 157, 158, 159, 160, 161, 162, 163, 164, 165, 166, 167,
  168, 169, 170, 171, 172, 173, 174, 175, 176, 177, 178, 179, 180, 181, 182, 183,
  184, 184, 185, 185, 186, 186, 187, 187, 188, 188, 189, 189, 190, 190, 191, 191,
  192, 192, 193, 193, 194, 194, 195, 195, 196, 196, 197, 197, 198, 198, 198, 198,
];

// Key frame boost by ambient Q.
#[rustfmt::skip]
const KF_BOOST_QADJUSTMENT: [i64; QINDEX_RANGE] = [
  128, 129, 130, 131, 132, 133, 134, 135, 136, 137, 138, 139, 140, 141, 142, 143,
  144, 145, 146, 147, 148, 149, 150, 151, 152, 153, 154, 155, 156, 157, 158, 159,
  160, 161, 162, 163, 164, 165, 166, 167, 168, 169, 170, 171, 172, 173, 174, 175,
  176, 177, 178, 179, 180, 181, 182, 183, 184, 185, 186, 187, 188, 189, 190, 191,
  192, 193, 194, 195, 196, 197, 198, 199, 200, 200, 201, 201, 202, 202, 203, 203,
  204, 204, 205, 205, 206, 206, 207, 207, 208, 208, 209, 209, 210, 210, 211, 211,
  212, 212, 213, 213, 214, 214, 215, 215, 216, 216, 217, 217, 218, 218, 219, 219,
  220, 220, 220, 220, 220, 220, 220, 220, 220, 220, 220, 220, 220, 220, 220, 220,
];

// Upper bound on key and golden boosts by Q.
#[rustfmt::skip]
const KF_GF_BOOST_QLIMITS: [i64; QINDEX_RANGE] = [
  150, 155, 160, 165, 170, 175, 180, 185, 190, 195, 200, 205, 210, 215, 220, 225,
  230, 235, 240, 245, 250, 255, 260, 265, 270, 275, 280, 285, 290, 295, 300, 305,
  310, 320, 330, 340, 350, 360, 370, 380, 390, 400, 410, 420, 430, 440, 450, 460,
  470, 480, 490, 500, 510, 520, 530, 540, 550, 560, 570, 580, 590, 600, 600, 600,
  600, 600, 600, 600, 600, 600, 600, 600, 600, 600, 600, 600, 600, 600, 600, 600,
  600, 600, 600, 600, 600, 600, 600, 600, 600, 600, 600, 600, 600, 600, 600, 600,
  600, 600, 600, 600, 600, 600, 600, 600, 600, 600, 600, 600, 600, 600, 600, 600,
  600, 600, 600, 600, 600, 600, 600, 600, 600, 600, 600, 600, 600, 600, 600, 600,
];

// Golden boost by percentage of golden usage since the last refresh.
#[rustfmt::skip]
const GF_ADJUST_TABLE: [i64; 101] = [
  100, 115, 130, 145, 160, 175, 190, 200, 210, 220, 230, 240, 260, 270, 280, 290,
  300, 310, 320, 330, 340, 350, 360, 370, 380, 390, 400, 400, 400, 400, 400, 400,
  400, 400, 400, 400, 400, 400, 400, 400, 400, 400, 400, 400, 400, 400, 400, 400,
  400, 400, 400, 400, 400, 400, 400, 400, 400, 400, 400, 400, 400, 400, 400, 400,
  400, 400, 400, 400, 400, 400, 400, 400, 400, 400, 400, 400, 400, 400, 400, 400,
  400, 400, 400, 400, 400, 400, 400, 400, 400, 400, 400, 400, 400, 400, 400, 400,
  400, 400, 400, 400, 400,
];

// Golden boost by intra percentage of the previous frame.
#[rustfmt::skip]
const GF_INTRA_USAGE_ADJUSTMENT: [i64; 20] = [
  125, 120, 115, 110, 105, 100, 95,  85,  80,  75,
  70,  65,  60,  55,  50,  50,  50,  50,  50,  50,
];

// Key frame boost by distance from the previous key frame.
#[rustfmt::skip]
const KF_BOOST_SEPERATION_ADJUSTMENT: [i64; 16] = [
  30,  40,  50,  55,  60,  65,  70,  75,  80,  85,  90,  95,  100, 100, 100, 100,
];

// Minimum golden interval by percentage of golden usage.
#[rustfmt::skip]
const GF_INTERVAL_TABLE: [u32; 101] = [
  7,  7,  7,  7,  7,  7,  7,  7,  7,  7,  7,  7,  7,  7,  7,  7,  7,  7,  7,  7,  7,
  8,  8,  8,  8,  8,  8,  8,  8,  8,  8,  8,  8,  8,  8,  8,  8,  8,  8,  8,  8,  9,
  9,  9,  9,  9,  9,  9,  9,  9,  9,  9,  9,  9,  9,  9,  9,  9,  9,  9,  9,  10, 10,
  10, 10, 10, 10, 10, 10, 10, 10, 10, 10, 10, 10, 10, 10, 10, 10, 10, 10, 11, 11, 11,
  11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11,
];

/// How hard a single observation may move a correction factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Damping {
  /// First overshoots inside the quantizer search.
  Low,
  /// The search has started to oscillate.
  High,
  /// Final update once the frame is committed.
  Full,
}

impl Damping {
  const fn adjustment_limit(self) -> f64 {
    match self {
      Damping::Low => 0.75,
      Damping::High => 0.375,
      Damping::Full => 0.25,
    }
  }
}

// Frame classes with their own correction factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RateKind {
  Key,
  Golden,
  Inter,
}

impl RateKind {
  fn of(fi: &FrameInvariants) -> Self {
    if fi.is_key_frame() {
      RateKind::Key
    } else if fi.refresh.golden || fi.refresh.altref {
      RateKind::Golden
    } else {
      RateKind::Inter
    }
  }
}

/// Bits a whole frame costs at `qindex` with the given correction factor.
pub fn estimate_bits_at_q(
  key_frame: bool, qindex: i32, mb_count: i64, correction_factor: f64,
) -> i64 {
  let bpm =
    (correction_factor * bits_per_mb(key_frame, qindex as u8) as f64) as i64;
  // Keep the product in range on very large frames.
  if mb_count > (1 << 11) {
    (bpm >> BPER_MB_NORMBITS) * mb_count
  } else {
    (bpm * mb_count) >> BPER_MB_NORMBITS
  }
}

/// Zero bin ceiling for a frame class.
pub fn zbin_oq_max(fi: &FrameInvariants, alt_ref_active: bool) -> u32 {
  if fi.is_key_frame() {
    0
  } else if fi.refresh.altref || (fi.refresh.golden && !alt_ref_active) {
    16
  } else {
    ZBIN_OQ_MAX
  }
}

// Shrinks a bit estimate by `steps` zero bin widening steps.
fn apply_zbin_steps(bits: i64, steps: u32) -> i64 {
  let mut factor = ZBIN_FACTOR_START;
  let mut bits = bits;
  for _ in 0..steps {
    bits = (factor * bits as f64) as i64;
    factor = (factor + ZBIN_FACTOR_STEP).min(ZBIN_FACTOR_MAX);
  }
  bits
}

#[inline]
fn q_idx(q: i32) -> usize {
  (q.max(0) as usize).min(MAXQ)
}

/// Snapshot of the rate state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RCSummary {
  pub buffer_level: i64,
  pub bits_off_target: i64,
  pub optimal_buffer_level: i64,
  pub maximum_buffer_size: i64,
  pub rolling_target_bits: i64,
  pub rolling_actual_bits: i64,
  pub long_rolling_target_bits: i64,
  pub long_rolling_actual_bits: i64,
  pub total_actual_bits: i64,
  pub total_byte_count: i64,
  pub per_frame_bandwidth: i64,
  pub av_per_frame_bandwidth: i64,
  pub this_frame_target: i64,
  pub rate_correction_factor: f64,
  pub key_frame_rate_correction_factor: f64,
  pub gf_rate_correction_factor: f64,
  pub active_best_quality: i32,
  pub active_worst_quality: i32,
  pub avg_frame_qindex: i32,
  pub ni_av_qi: i32,
  pub last_q: [i32; 2],
  pub frame_rate: f64,
  pub drop_count: i64,
  pub decimation_factor: i32,
}

/// Rate control state of one stream.
#[derive(Debug, Clone)]
pub struct RCState {
  mode: RateControlMode,
  speed: SpeedSettings,
  error_resilient: bool,
  play_alternate: bool,
  lag_in_frames: usize,
  mb_count: i64,
  target_bandwidth: i64,
  pub(crate) output_frame_rate: f64,
  pub(crate) optimal_buffer_level: i64,
  pub(crate) maximum_buffer_size: i64,
  pub(crate) buffered_mode: bool,
  pub(crate) drop_frames_allowed: bool,
  drop_frames_water_mark: i64,
  under_shoot_pct: i64,
  over_shoot_pct: i64,
  min_section_pct: i64,
  auto_worst_q: bool,
  pub(crate) fixed_q: Option<i32>,
  key_q: i32,
  gold_q: i32,
  alt_q: i32,
  pub(crate) max_gf_interval: u32,

  pub(crate) best_quality: i32,
  pub(crate) worst_quality: i32,
  pub(crate) active_best_quality: i32,
  pub(crate) active_worst_quality: i32,

  pub(crate) buffer_level: i64,
  pub(crate) bits_off_target: i64,
  pub(crate) rolling_target_bits: i64,
  pub(crate) rolling_actual_bits: i64,
  pub(crate) long_rolling_target_bits: i64,
  pub(crate) long_rolling_actual_bits: i64,
  pub(crate) total_actual_bits: i64,
  pub(crate) total_byte_count: i64,

  pub(crate) rate_correction_factor: f64,
  pub(crate) key_frame_rate_correction_factor: f64,
  pub(crate) gf_rate_correction_factor: f64,

  pub(crate) avg_frame_qindex: i32,
  pub(crate) ni_av_qi: i32,
  pub(crate) ni_tot_qi: i64,
  pub(crate) ni_frames: i64,
  pub(crate) last_q: [i32; 2],

  pub(crate) per_frame_bandwidth: i64,
  pub(crate) av_per_frame_bandwidth: i64,
  pub(crate) min_frame_bandwidth: i64,
  pub(crate) inter_frame_target: i64,
  pub(crate) this_frame_target: i64,
  pub(crate) projected_frame_size: i64,

  pub(crate) kf_overspend_bits: i64,
  pub(crate) gf_overspend_bits: i64,
  pub(crate) kf_bitrate_adjustment: i64,
  pub(crate) non_gf_bitrate_adjustment: i64,
  pub(crate) key_frame_count: i64,
  pub(crate) tot_key_frame_bits: i64,
  pub(crate) last_key_frame_size: i64,
  prior_key_frame_size: [i64; KEY_FRAME_CONTEXT],
  prior_key_frame_distance: [i64; KEY_FRAME_CONTEXT],
  pub(crate) intra_frame_target: i64,

  pub(crate) last_boost: i64,
  pub(crate) gfu_boost: i64,

  pub(crate) drop_frame: bool,
  pub(crate) drop_count: i64,
  pub(crate) max_drop_count: i64,
  pub(crate) decimation_factor: i32,
  pub(crate) decimation_count: i32,
}

impl RCState {
  pub fn new(
    enc: &EncoderConfig, rc: &RateControlConfig, mb_count: usize,
  ) -> RCState {
    let target_bandwidth = rc.target_bitrate as i64 * 1000;
    let (starting_ms, optimal_ms, maximum_ms) = match rc.mode {
      RateControlMode::Cbr => (
        rc.starting_buffer_ms,
        rc.optimal_buffer_ms,
        rc.maximum_buffer_ms,
      ),
      // Local file playback is allowed a very deep buffer.
      RateControlMode::Vbr => (60_000, 60_000, 240_000),
    };
    let starting_buffer_level = rescale(starting_ms, target_bandwidth, 1000);
    let mut optimal_buffer_level = rescale(optimal_ms, target_bandwidth, 1000);
    if optimal_buffer_level == 0 {
      optimal_buffer_level = target_bandwidth / 8;
    }
    let mut maximum_buffer_size = rescale(maximum_ms, target_bandwidth, 1000);
    if maximum_buffer_size == 0 {
      maximum_buffer_size = target_bandwidth / 8;
    }
    let buffered_mode = optimal_buffer_level > 0;

    let best_quality = q_to_qindex(rc.min_quantizer) as i32;
    let worst_quality = q_to_qindex(rc.max_quantizer) as i32;
    let fixed_q = rc.fixed_quantizer.map(|q| q_to_qindex(q) as i32);
    let override_q = |q: Option<u8>| {
      q.map(|q| q_to_qindex(q) as i32).or(fixed_q).unwrap_or(worst_quality)
    };

    let intra_frame_target = (((4 * (enc.width + enc.height) / 15) * 1000)
      as i64)
      .min(target_bandwidth >> 2);

    let mut state = RCState {
      mode: rc.mode,
      speed: enc.speed_settings,
      error_resilient: enc.error_resilient,
      play_alternate: enc.play_alternate,
      lag_in_frames: enc.lag_in_frames,
      mb_count: mb_count as i64,
      target_bandwidth,
      output_frame_rate: 0.0,
      optimal_buffer_level,
      maximum_buffer_size,
      buffered_mode,
      drop_frames_allowed: rc.allow_drop_frames && buffered_mode,
      drop_frames_water_mark: rc.drop_frames_water_mark as i64,
      under_shoot_pct: rc.under_shoot_pct as i64,
      over_shoot_pct: rc.over_shoot_pct as i64,
      min_section_pct: rc.min_section_pct as i64,
      auto_worst_q: true,
      fixed_q,
      key_q: override_q(rc.key_quantizer),
      gold_q: override_q(rc.gold_quantizer),
      alt_q: override_q(rc.alt_quantizer),
      max_gf_interval: 0,
      best_quality,
      worst_quality,
      active_best_quality: best_quality,
      active_worst_quality: worst_quality,
      buffer_level: starting_buffer_level,
      bits_off_target: starting_buffer_level,
      rolling_target_bits: 0,
      rolling_actual_bits: 0,
      long_rolling_target_bits: 0,
      long_rolling_actual_bits: 0,
      total_actual_bits: 0,
      total_byte_count: 0,
      rate_correction_factor: 1.0,
      key_frame_rate_correction_factor: 1.0,
      gf_rate_correction_factor: 1.0,
      avg_frame_qindex: worst_quality,
      ni_av_qi: worst_quality,
      ni_tot_qi: 0,
      ni_frames: 0,
      last_q: [fixed_q.unwrap_or(worst_quality); 2],
      per_frame_bandwidth: 0,
      av_per_frame_bandwidth: 0,
      min_frame_bandwidth: 0,
      inter_frame_target: 0,
      this_frame_target: 0,
      projected_frame_size: 0,
      kf_overspend_bits: 0,
      gf_overspend_bits: 0,
      kf_bitrate_adjustment: 0,
      non_gf_bitrate_adjustment: 0,
      key_frame_count: 1,
      tot_key_frame_bits: 0,
      last_key_frame_size: 0,
      prior_key_frame_size: [intra_frame_target; KEY_FRAME_CONTEXT],
      prior_key_frame_distance: [0; KEY_FRAME_CONTEXT],
      intra_frame_target,
      last_boost: 0,
      gfu_boost: 0,
      drop_frame: false,
      drop_count: 0,
      max_drop_count: 0,
      decimation_factor: 0,
      decimation_count: 0,
    };

    state.new_frame_rate(enc.frame_rate());
    state.prior_key_frame_distance =
      [state.output_frame_rate as i64; KEY_FRAME_CONTEXT];
    state.rolling_target_bits = state.av_per_frame_bandwidth;
    state.rolling_actual_bits = state.av_per_frame_bandwidth;
    state.long_rolling_target_bits = state.av_per_frame_bandwidth;
    state.long_rolling_actual_bits = state.av_per_frame_bandwidth;
    state
  }

  pub fn is_cbr(&self) -> bool {
    self.mode == RateControlMode::Cbr
  }

  pub fn frame_rate(&self) -> f64 {
    self.output_frame_rate
  }

  /// Re-derives the per-frame budgets for a new frame rate.
  pub fn new_frame_rate(&mut self, frame_rate: f64) {
    let frame_rate = if frame_rate < 0.1 { 30.0 } else { frame_rate };
    self.output_frame_rate = frame_rate;
    self.per_frame_bandwidth =
      (self.target_bandwidth as f64 / frame_rate) as i64;
    self.av_per_frame_bandwidth = self.per_frame_bandwidth;
    self.min_frame_bandwidth =
      self.av_per_frame_bandwidth * self.min_section_pct / 100;

    self.max_gf_interval = ((frame_rate / 2.0) as u32 + 2).max(12);
    if self.play_alternate && self.lag_in_frames > 0 {
      let horizon = (self.lag_in_frames as u32 - 1).max(1);
      self.max_gf_interval = self.max_gf_interval.min(horizon);
    }
  }

  /// Resets the per-frame budget ahead of frame selection.
  pub fn begin_frame(&mut self) {
    self.per_frame_bandwidth =
      (self.target_bandwidth as f64 / self.output_frame_rate) as i64;
  }

  fn correction_factor(&self, kind: RateKind) -> f64 {
    match kind {
      RateKind::Key => self.key_frame_rate_correction_factor,
      RateKind::Golden => self.gf_rate_correction_factor,
      RateKind::Inter => self.rate_correction_factor,
    }
  }

  fn set_correction_factor(&mut self, kind: RateKind, factor: f64) {
    match kind {
      RateKind::Key => self.key_frame_rate_correction_factor = factor,
      RateKind::Golden => self.gf_rate_correction_factor = factor,
      RateKind::Inter => self.rate_correction_factor = factor,
    }
  }

  /// Picks the quantizer expected to land closest to `target_bits`.
  ///
  /// Returns the qindex and the zero bin widening to apply with it.
  pub fn regulate_q(
    &self, fi: &FrameInvariants, alt_ref_active: bool, target_bits: i64,
  ) -> (i32, u32) {
    if let Some(fixed_q) = self.fixed_q {
      let q = if fi.is_key_frame() {
        self.key_q
      } else if fi.refresh.altref {
        self.alt_q
      } else if fi.refresh.golden {
        self.gold_q
      } else {
        fixed_q
      };
      return (q, 0);
    }

    let key = fi.is_key_frame();
    let factor = self.correction_factor(RateKind::of(fi));
    let target_bits_per_mb =
      (target_bits.max(0) << BPER_MB_NORMBITS) / self.mb_count.max(1);

    let mut q = self.active_worst_quality;
    let mut last_error = i64::MAX;
    let mut bits_per_mb_at_this_q = 0;
    let mut i = self.active_best_quality;
    loop {
      bits_per_mb_at_this_q =
        (0.5 + factor * bits_per_mb(key, i as u8) as f64) as i64;
      if bits_per_mb_at_this_q <= target_bits_per_mb {
        q = if target_bits_per_mb - bits_per_mb_at_this_q <= last_error {
          i
        } else {
          i - 1
        };
        break;
      }
      last_error = bits_per_mb_at_this_q - target_bits_per_mb;
      i += 1;
      if i > self.active_worst_quality {
        break;
      }
    }

    let mut zbin_over_quant = 0;
    if q >= MAXQ as i32 {
      let max = zbin_oq_max(fi, alt_ref_active);
      let mut factor = ZBIN_FACTOR_START;
      while zbin_over_quant < max {
        zbin_over_quant += 1;
        bits_per_mb_at_this_q =
          (factor * bits_per_mb_at_this_q as f64) as i64;
        factor = (factor + ZBIN_FACTOR_STEP).min(ZBIN_FACTOR_MAX);
        if bits_per_mb_at_this_q <= target_bits_per_mb {
          break;
        }
      }
    }

    (q, zbin_over_quant)
  }

  /// Moves the correction factor of the frame's class toward the ratio of
  /// `projected_frame_size` to the model's prediction at the frame's Q.
  pub fn update_rate_correction_factors(
    &mut self, fi: &FrameInvariants, damping: Damping,
  ) {
    let kind = RateKind::of(fi);
    let mut factor = self.correction_factor(kind);

    let bpm = bits_per_mb(fi.is_key_frame(), fi.qindex);
    let mut projected_size_based_on_q = ((0.5 + factor * bpm as f64)
      * self.mb_count as f64
      / (1 << BPER_MB_NORMBITS) as f64)
      as i64;
    projected_size_based_on_q =
      apply_zbin_steps(projected_size_based_on_q, fi.zbin_over_quant);

    let mut correction = 100;
    if projected_size_based_on_q > 0 {
      correction = 100 * self.projected_frame_size / projected_size_based_on_q;
    }
    let limit = damping.adjustment_limit();

    if correction > 102 {
      let adj = (100.5 + (correction - 100) as f64 * limit) as i64;
      factor = (factor * adj as f64 / 100.0).min(MAX_BPB_FACTOR);
    } else if correction < 99 {
      let adj = (100.5 - (100 - correction) as f64 * limit) as i64;
      factor = (factor * adj as f64 / 100.0).max(MIN_BPB_FACTOR);
    }

    self.set_correction_factor(kind, factor);
  }

  /// Size window `(under, over)` that needs no recode.
  pub fn compute_frame_size_bounds(
    &self, fi: &FrameInvariants,
  ) -> (i64, i64) {
    if self.fixed_q.is_some() {
      return (0, i64::MAX);
    }
    let target = self.this_frame_target;
    if fi.is_key_frame() || fi.refresh.golden || fi.refresh.altref {
      return (target * 7 / 8, target * 9 / 8);
    }
    if self.is_cbr() {
      if self.buffer_level
        >= (self.optimal_buffer_level + self.maximum_buffer_size) / 2
      {
        // Comfortably full: lean toward undershoot.
        (target * 6 / 8, target * 12 / 8)
      } else if self.buffer_level <= self.optimal_buffer_level / 2 {
        (target * 4 / 8, target * 10 / 8)
      } else {
        (target * 5 / 8, target * 11 / 8)
      }
    } else {
      (target * 5 / 8, target * 11 / 8)
    }
  }

  /// Boosted target of a forced key frame.
  pub fn calc_iframe_target_size(&mut self, frames_since_key: u64) {
    let q = self.fixed_q.unwrap_or(self.avg_frame_qindex);
    let qi = q_idx(q);

    let mut boost = KF_BOOST_QADJUSTMENT[qi];
    boost = boost
      * KF_BOOST_SEPERATION_ADJUSTMENT[(frames_since_key as usize).min(15)]
      / 100;
    if boost > KF_GF_BOOST_QLIMITS[qi] {
      boost = KF_GF_BOOST_QLIMITS[qi];
    } else if boost < 120 {
      boost = 120;
    }
    self.last_boost = boost;
    self.gfu_boost = boost;

    if self.fixed_q.is_some() {
      self.this_frame_target =
        estimate_bits_at_q(true, q, self.mb_count, 1.0) * boost / 100;
    } else if self.error_resilient {
      self.this_frame_target = 2 * self.av_per_frame_bandwidth;
    } else {
      let bpm = (0.5
        + self.key_frame_rate_correction_factor
          * bits_per_mb(true, qi as u8) as f64) as i64;
      self.this_frame_target =
        ((bpm * self.mb_count) >> BPER_MB_NORMBITS) * boost / 100;
      self.active_worst_quality = self.worst_quality;
    }
  }

  /// Target of a key frame placed by the automatic key interval.
  pub fn calc_auto_iframe_target_size(&mut self, frames_since_key: u64) {
    if self.fixed_q.is_some() {
      self.calc_iframe_target_size(frames_since_key);
      return;
    }

    let fps = self.output_frame_rate;
    let mut kf_boost = (2.0 * fps - 16.0) as i64;
    kf_boost = kf_boost * KF_BOOST_QADJUSTMENT[q_idx(self.ni_av_qi)] / 100;
    // Close key frames get less.
    if (frames_since_key as f64) < fps / 2.0 {
      kf_boost =
        (kf_boost as f64 * frames_since_key as f64 / (fps / 2.0)) as i64;
    }
    kf_boost = kf_boost.max(16);

    self.active_worst_quality = self.worst_quality;
    self.this_frame_target =
      ((16 + kf_boost) * self.per_frame_bandwidth) >> 4;
  }

  // Target of a golden or alt-ref frame carrying `boost` percent over a
  // section of `frames_in_section` frames.
  fn gf_boost_target(&self, boost: i64, frames_in_section: i64) -> i64 {
    let mut boost = boost;
    let mut allocation_chunks = frames_in_section * 100 + (boost - 100);
    let bits_in_section = self.inter_frame_target * frames_in_section;

    while boost > 1000 {
      boost /= 2;
      allocation_chunks /= 2;
    }
    if allocation_chunks <= 0 {
      return self.inter_frame_target;
    }

    if (bits_in_section >> 7) > allocation_chunks {
      boost * (bits_in_section / allocation_chunks)
    } else {
      boost * bits_in_section / allocation_chunks
    }
  }

  /// Golden boost and interval for the group a golden refresh opens.
  pub fn calc_gf_params(
    &mut self, g: &mut GoldenFrameState, last_frame_percent_intra: u32,
  ) {
    let q = self.fixed_q.unwrap_or(self.last_q[FRAME_INTER]);
    let qi = q_idx(q);
    let usage = g.usage_pct() as usize;

    let mut boost = GF_BOOST_QADJUSTMENT[qi];
    boost = boost
      * GF_INTRA_USAGE_ADJUSTMENT
        [(last_frame_percent_intra as usize).min(14)]
      / 100;
    boost = boost * GF_ADJUST_TABLE[usage] / 100;

    // Without a recode loop the boost cannot be corrected afterwards.
    if !self.speed.recode_loop.is_enabled() && self.speed.compressor_speed == 2
    {
      boost /= 2;
    }

    if boost > KF_GF_BOOST_QLIMITS[qi] {
      boost = KF_GF_BOOST_QLIMITS[qi];
    } else if boost < 110 {
      boost = 110;
    }
    self.last_boost = boost;
    self.gfu_boost = boost;

    if self.fixed_q.is_none() {
      let mut due = g.baseline_gf_interval;
      due += (boost > 750) as u32;
      due += (boost > 1000) as u32;
      due += (boost > 1250) as u32;
      due += (boost >= 1500) as u32;
      due = due.max(GF_INTERVAL_TABLE[usage]).min(self.max_gf_interval);
      g.frames_till_gf_update_due = due;
    } else {
      g.frames_till_gf_update_due = g.baseline_gf_interval;
    }

    g.source_alt_ref_pending = false;
  }

  /// Target of an inter frame, including the drop decision and golden
  /// refresh selection.
  pub fn calc_pframe_target_size(
    &mut self, fi: &mut FrameInvariants, g: &mut GoldenFrameState,
    last_frame_percent_intra: u32,
  ) {
    let min_frame_target = (self.per_frame_bandwidth / 4).max(0);

    if fi.refresh.altref {
      self.this_frame_target = self.gf_boost_target(
        self.last_boost.max(100),
        g.frames_till_gf_update_due as i64 + 1,
      );
    } else {
      if self.kf_overspend_bits > 0 {
        let adjustment = self
          .kf_bitrate_adjustment
          .min(self.kf_overspend_bits)
          .min(self.per_frame_bandwidth - min_frame_target)
          .max(0);
        self.kf_overspend_bits -= adjustment;
        self.inter_frame_target =
          (self.per_frame_bandwidth - adjustment).max(min_frame_target);
      } else {
        self.inter_frame_target = self.per_frame_bandwidth;
      }

      if self.gf_overspend_bits > 0
        && self.inter_frame_target > min_frame_target
      {
        let adjustment = self
          .non_gf_bitrate_adjustment
          .min(self.gf_overspend_bits)
          .min(self.inter_frame_target - min_frame_target)
          .max(0);
        self.gf_overspend_bits -= adjustment;
        self.inter_frame_target -= adjustment;
      }

      // Spend a little more on the frame halfway through a boosted group.
      if self.last_boost > 150
        && g.frames_till_gf_update_due > 0
        && g.current_gf_interval >= MIN_GF_INTERVAL * 2
      {
        let pct = ((self.last_boost - 100) >> 5).clamp(1, 10);
        let adjustment = (self.inter_frame_target * pct / 100)
          .min(self.inter_frame_target - min_frame_target)
          .max(0);
        if g.frames_since_golden == g.current_gf_interval >> 1 {
          self.this_frame_target = self.inter_frame_target
            + (g.current_gf_interval as i64 - 1) * adjustment;
        } else {
          self.this_frame_target = self.inter_frame_target - adjustment;
        }
      } else {
        self.this_frame_target = self.inter_frame_target;
      }
    }

    if self.under_shoot_pct > 0 && self.under_shoot_pct <= 100 {
      self.this_frame_target =
        self.this_frame_target * self.under_shoot_pct / 100;
    }
    self.this_frame_target = self.this_frame_target.max(min_frame_target);
    if !fi.refresh.altref {
      self.inter_frame_target = self.this_frame_target;
    }

    if self.buffered_mode {
      self.adjust_for_buffer_level();
    } else {
      self.active_worst_quality = self.worst_quality;
    }

    self.drop_frame = false;
    if self.drop_frames_allowed
      && self.is_cbr()
      && !fi.is_key_frame()
      && !fi.refresh.altref
    {
      if self.buffer_level < 0 {
        self.drop_frame = true;
      } else if self.buffer_level
        < self.drop_frames_water_mark * self.optimal_buffer_level / 100
        && self.drop_count < self.max_drop_count
      {
        self.drop_frame = true;
      }

      if self.drop_frame {
        self.bits_off_target += self.av_per_frame_bandwidth;
        self.buffer_level = self.bits_off_target;
      } else {
        self.drop_count = 0;
      }
    }

    if !self.error_resilient
      && g.frames_till_gf_update_due == 0
      && !self.drop_frame
    {
      self.select_golden_target(fi, g, last_frame_percent_intra);
    }
  }

  fn adjust_for_buffer_level(&mut self) {
    let optimal = self.optimal_buffer_level;

    if self.buffer_level < optimal {
      let mut percent_low = 0;
      if self.is_cbr() {
        percent_low = (optimal - self.buffer_level) / (optimal / 100).max(1);
      } else if self.bits_off_target < 0 {
        let total_bits = (self.total_byte_count * 8).max(1);
        percent_low = 100 * -self.bits_off_target / total_bits;
      }
      let percent_low = percent_low.clamp(0, self.under_shoot_pct.max(0));

      self.this_frame_target =
        self.this_frame_target * (100 - percent_low / 2) / 100;

      if self.auto_worst_q {
        let critical = if self.is_cbr() {
          self.buffer_level.min(self.bits_off_target)
        } else {
          self.bits_off_target
        };
        if critical < optimal {
          if critical > optimal / 4 {
            let range = (self.worst_quality - self.ni_av_qi) as i64;
            let above = critical - optimal / 4;
            let span = (optimal * 3 / 4).max(1);
            self.active_worst_quality =
              self.worst_quality - (range * above / span) as i32;
          } else {
            self.active_worst_quality = self.worst_quality;
          }
        } else {
          self.active_worst_quality = self.ni_av_qi;
        }
      } else {
        self.active_worst_quality = self.worst_quality;
      }
    } else {
      let mut percent_high = 0;
      if self.is_cbr() && self.buffer_level > optimal {
        percent_high = (self.buffer_level - optimal) / (optimal / 100).max(1);
      } else if self.bits_off_target > optimal {
        let total_bits = (self.total_byte_count * 8).max(1);
        percent_high = 100 * (self.bits_off_target - optimal) / total_bits;
      }
      let percent_high = percent_high.clamp(0, self.over_shoot_pct.max(0));

      self.this_frame_target =
        self.this_frame_target * (100 + percent_high) / 100;

      self.active_worst_quality =
        if self.auto_worst_q { self.ni_av_qi } else { self.worst_quality };
    }

    self.active_best_quality = self.best_quality;
    if self.active_worst_quality <= self.active_best_quality {
      self.active_worst_quality = self.active_best_quality + 1;
    }
  }

  fn select_golden_target(
    &mut self, fi: &mut FrameInvariants, g: &mut GoldenFrameState,
    last_frame_percent_intra: u32,
  ) {
    if g.auto_gold {
      // Refresh when the previous frame was mostly predicted or the current
      // golden frame is still earning its keep.
      if last_frame_percent_intra < 15 || g.usage_pct() >= 5 {
        fi.refresh.golden = true;
      }
    } else {
      fi.refresh.golden = true;
    }

    if fi.refresh.golden {
      self.calc_gf_params(g, last_frame_percent_intra);

      if !g.source_alt_ref_active {
        if let Some(q) = self.fixed_q {
          self.this_frame_target =
            estimate_bits_at_q(false, q, self.mb_count, 1.0) * self.last_boost
              / 100;
        } else {
          self.this_frame_target = self.gf_boost_target(
            self.last_boost,
            g.frames_till_gf_update_due as i64 + 1,
          );
        }
      } else {
        // The alt-ref already carries the group.
        self.this_frame_target = 0;
      }

      g.current_gf_interval = g.frames_till_gf_update_due;
    }
  }

  /// Sets the frame target. Returns false when the frame is dropped.
  pub fn pick_frame_size(
    &mut self, fi: &mut FrameInvariants, g: &mut GoldenFrameState,
    last_frame_percent_intra: u32, forced_key: bool, frames_since_key: u64,
  ) -> bool {
    if fi.frame_number == 0 {
      self.this_frame_target = self.target_bandwidth / 2;
      if self.error_resilient || self.speed.compressor_speed == 2 {
        self.this_frame_target *= 3;
      }
    } else if fi.is_key_frame() {
      if forced_key {
        self.calc_iframe_target_size(frames_since_key);
      } else {
        self.calc_auto_iframe_target_size(frames_since_key);
      }
    } else {
      self.calc_pframe_target_size(fi, g, last_frame_percent_intra);
      if self.drop_frame {
        self.drop_frame = false;
        self.drop_count += 1;
        return false;
      }
    }
    true
  }

  /// Updates the decimation factor from the buffer level.
  ///
  /// Returns true when the frame is skipped entirely.
  pub fn decimate(&mut self, key_frame: bool) -> bool {
    if self.drop_frames_allowed {
      let drop_mark =
        self.drop_frames_water_mark * self.optimal_buffer_level / 100;
      let drop_mark75 = drop_mark * 2 / 3;
      let drop_mark50 = drop_mark / 4;
      let drop_mark25 = drop_mark / 8;

      if self.buffer_level > drop_mark && self.decimation_factor > 0 {
        self.decimation_factor -= 1;
      }

      if self.buffer_level > drop_mark75 && self.decimation_factor > 0 {
        self.decimation_factor = 1;
      } else if self.buffer_level < drop_mark25
        && (self.decimation_factor == 2 || self.decimation_factor == 3)
      {
        self.decimation_factor = 3;
      } else if self.buffer_level < drop_mark50
        && (self.decimation_factor == 1 || self.decimation_factor == 2)
      {
        self.decimation_factor = 2;
      } else if self.buffer_level < drop_mark75
        && (self.decimation_factor == 0 || self.decimation_factor == 1)
      {
        self.decimation_factor = 1;
      }
    }

    if self.decimation_factor > 0 {
      // Frames that survive decimation get the bits of the skipped ones.
      self.per_frame_bandwidth = if self.decimation_factor == 1 {
        self.per_frame_bandwidth * 3 / 2
      } else {
        self.per_frame_bandwidth * 5 / 4
      };

      if key_frame {
        self.decimation_count = self.decimation_factor;
      } else if self.decimation_count > 0 {
        self.decimation_count -= 1;
        self.bits_off_target += self.av_per_frame_bandwidth;
        self.buffer_level = self.bits_off_target;
        return true;
      } else {
        self.decimation_count = self.decimation_factor;
      }
    }
    false
  }

  /// Relaxes `active_worst_quality` on a full CBR buffer, then derives
  /// `active_best_quality` for the frame.
  pub fn set_active_quality(&mut self, fi: &FrameInvariants) {
    if self.is_cbr()
      && self.buffered_mode
      && self.buffer_level >= self.optimal_buffer_level
    {
      let mut adjustment = self.active_worst_quality / 4;
      if adjustment > 0 {
        if self.buffer_level < self.maximum_buffer_size {
          let step = (self.maximum_buffer_size - self.optimal_buffer_level)
            / adjustment as i64;
          if step > 0 {
            adjustment =
              ((self.buffer_level - self.optimal_buffer_level) / step) as i32;
          } else {
            adjustment = 0;
          }
        }
        self.active_worst_quality -= adjustment;
      }
    }

    if fi.frame_number > 150 {
      let mut q = self.active_worst_quality;
      if fi.is_key_frame() {
        self.active_best_quality = if self.gfu_boost > 600 {
          KF_LOW_MOTION_MINQ[q_idx(q)] as i32
        } else {
          KF_HIGH_MOTION_MINQ[q_idx(q)] as i32
        };
      } else if fi.refresh.golden || fi.refresh.altref {
        if self.avg_frame_qindex < self.active_worst_quality {
          q = self.avg_frame_qindex;
        }
        self.active_best_quality = if self.gfu_boost > 1000 {
          GF_LOW_MOTION_MINQ[q_idx(q)] as i32
        } else if self.gfu_boost < 400 {
          GF_HIGH_MOTION_MINQ[q_idx(q)] as i32
        } else {
          GF_MID_MOTION_MINQ[q_idx(q)] as i32
        };
      } else {
        self.active_best_quality = INTER_MINQ[q_idx(q)] as i32;
      }

      if self.is_cbr() {
        if self.buffer_level >= self.maximum_buffer_size {
          self.active_best_quality = self.best_quality;
        } else if self.buffer_level > self.optimal_buffer_level {
          let span =
            (self.maximum_buffer_size - self.optimal_buffer_level).max(1);
          let fraction =
            (self.buffer_level - self.optimal_buffer_level) * 128 / span;
          let min_qadjustment = ((self.active_best_quality
            - self.best_quality) as i64
            * fraction
            / 128) as i32;
          self.active_best_quality -= min_qadjustment;
        }
      }
    }

    // The user range bounds both active limits.
    self.active_worst_quality =
      clamp(self.active_worst_quality, self.best_quality, self.worst_quality);
    self.active_best_quality = clamp(
      self.active_best_quality,
      self.best_quality,
      self.active_worst_quality,
    );
  }

  fn adjust_key_frame_context(&mut self, frames_since_key: u64) {
    self.tot_key_frame_bits += self.projected_frame_size;

    let mut av_key_frame_frequency;
    if self.key_frame_count == 1 {
      // No history yet: assume a key frame every two seconds.
      av_key_frame_frequency = (self.output_frame_rate * 2.0) as i64;
    } else {
      let mut total_weight = 0;
      let mut distance_sum = 0;
      for i in 0..KEY_FRAME_CONTEXT {
        if i + 1 < KEY_FRAME_CONTEXT {
          self.prior_key_frame_size[i] = self.prior_key_frame_size[i + 1];
          self.prior_key_frame_distance[i] =
            self.prior_key_frame_distance[i + 1];
        } else {
          self.prior_key_frame_size[i] = self.projected_frame_size;
          self.prior_key_frame_distance[i] = (frames_since_key as i64).max(1);
        }
        distance_sum +=
          self.prior_key_frame_distance[i] * PRIOR_KEY_FRAME_WEIGHT[i];
        total_weight += PRIOR_KEY_FRAME_WEIGHT[i];
      }
      av_key_frame_frequency = distance_sum / total_weight;
    }

    if self.projected_frame_size > self.per_frame_bandwidth {
      let overspend = self.projected_frame_size - self.per_frame_bandwidth;
      self.kf_overspend_bits += overspend * 7 / 8;
      self.gf_overspend_bits += overspend / 8;

      if av_key_frame_frequency == 0 {
        av_key_frame_frequency = 60;
      }
      self.kf_bitrate_adjustment =
        self.kf_overspend_bits / av_key_frame_frequency;
    }

    self.last_key_frame_size = self.projected_frame_size;
    self.key_frame_count += 1;
  }

  /// Bookkeeping once a frame is committed at `fi.qindex`.
  ///
  /// `active_worst_qchanged` skips the correction update when the search
  /// already relaxed the quality range for this frame.
  pub fn update_after_encode(
    &mut self, fi: &FrameInvariants, size_bytes: usize,
    active_worst_qchanged: bool, frames_since_key: u64,
  ) {
    self.total_byte_count += size_bytes as i64;
    self.projected_frame_size = (size_bytes as i64) << 3;

    if !active_worst_qchanged {
      self.update_rate_correction_factors(fi, Damping::Full);
    }

    let q = fi.qindex as i32;
    let key = fi.is_key_frame();
    self.last_q[if key { FRAME_KEY } else { FRAME_INTER }] = q;

    if key {
      self.adjust_key_frame_context(frames_since_key);
      self.avg_frame_qindex = q;
    } else {
      self.avg_frame_qindex = (2 + 3 * self.avg_frame_qindex + q) >> 2;
    }

    if !key && !fi.refresh.golden && !fi.refresh.altref {
      self.ni_frames += 1;
      self.ni_tot_qi += q as i64;
      let av = (self.ni_tot_qi / self.ni_frames) as i32;
      self.ni_av_qi = if self.ni_frames > 150 {
        av
      } else {
        // Early on, lean toward the worst quality.
        (av + self.worst_quality + 1) / 2
      };
      if q > self.ni_av_qi {
        self.ni_av_qi = q - 1;
      }
    }

    if self.drop_frames_allowed && self.av_per_frame_bandwidth > 0 {
      self.max_drop_count = (self.projected_frame_size
        / self.av_per_frame_bandwidth)
        .min(MAX_CONSEC_DROPPED_FRAMES);
    }

    // An alt-ref is paid for by the frames it replaces.
    if fi.refresh.altref && !key {
      self.bits_off_target -= self.projected_frame_size;
    } else {
      self.bits_off_target +=
        self.av_per_frame_bandwidth - self.projected_frame_size;
    }

    self.rolling_target_bits =
      rolling_average(self.rolling_target_bits, self.this_frame_target, 2);
    self.rolling_actual_bits =
      rolling_average(self.rolling_actual_bits, self.projected_frame_size, 2);
    self.long_rolling_target_bits = rolling_average(
      self.long_rolling_target_bits,
      self.this_frame_target,
      5,
    );
    self.long_rolling_actual_bits = rolling_average(
      self.long_rolling_actual_bits,
      self.projected_frame_size,
      5,
    );

    self.total_actual_bits += self.projected_frame_size;
    self.buffer_level = self.bits_off_target;
  }

  pub fn summary(&self) -> RCSummary {
    RCSummary {
      buffer_level: self.buffer_level,
      bits_off_target: self.bits_off_target,
      optimal_buffer_level: self.optimal_buffer_level,
      maximum_buffer_size: self.maximum_buffer_size,
      rolling_target_bits: self.rolling_target_bits,
      rolling_actual_bits: self.rolling_actual_bits,
      long_rolling_target_bits: self.long_rolling_target_bits,
      long_rolling_actual_bits: self.long_rolling_actual_bits,
      total_actual_bits: self.total_actual_bits,
      total_byte_count: self.total_byte_count,
      per_frame_bandwidth: self.per_frame_bandwidth,
      av_per_frame_bandwidth: self.av_per_frame_bandwidth,
      this_frame_target: self.this_frame_target,
      rate_correction_factor: self.rate_correction_factor,
      key_frame_rate_correction_factor: self.key_frame_rate_correction_factor,
      gf_rate_correction_factor: self.gf_rate_correction_factor,
      active_best_quality: self.active_best_quality,
      active_worst_quality: self.active_worst_quality,
      avg_frame_qindex: self.avg_frame_qindex,
      ni_av_qi: self.ni_av_qi,
      last_q: self.last_q,
      frame_rate: self.output_frame_rate,
      drop_count: self.drop_count,
      decimation_factor: self.decimation_factor,
    }
  }
}
