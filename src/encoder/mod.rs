// Copyright (c) 2018-2023, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

//! The contract with the pixel pipeline and the per-frame reference
//! bookkeeping built around it.

mod decision;
mod golden;
mod reference;

pub use decision::*;
pub use golden::*;
pub use reference::*;

use crate::api::{EncoderConfig, EncoderStatus, FrameType, SpeedSettings};
use crate::frame::Frame;
use crate::serialize::{Deserialize, Serialize};

/// Everything the pixel pipeline needs to know to code one frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameInvariants {
  pub width: usize,
  pub height: usize,
  pub mb_count: usize,
  /// Index of the frame in display order.
  pub frame_number: u64,
  pub frame_type: FrameType,
  /// Alt-ref frames are coded but not displayed.
  pub show_frame: bool,
  pub qindex: u8,
  /// Zero bin widening applied on top of `MAXQ`.
  pub zbin_over_quant: u32,
  pub refresh: RefreshFlags,
  pub copy_to_golden: CopyPolicy,
  pub copy_to_altref: CopyPolicy,
  /// References the frame may predict from.
  pub ref_frame_flags: RefFrameFlags,
  pub probs: RefProbs,
  pub altref_sign_bias: bool,
  /// The source is the one an earlier alt-ref frame was built from.
  pub is_src_frame_alt_ref: bool,
  pub is_next_src_alt_ref: bool,
  /// Mode search thresholds go back to their defaults.
  pub reset_rd_thresholds: bool,
  /// Entropy adaptations of this frame persist into the next one.
  pub refresh_entropy_probs: bool,
  pub error_resilient: bool,
  pub sharpness: u8,
  /// Loop filter strength, a suggestion until the frame is committed.
  pub loop_filter_level: u8,
  pub speed: SpeedSettings,
}

impl FrameInvariants {
  /// A shown inter frame refreshing LAST only.
  pub fn new(
    config: &EncoderConfig, mb_count: usize, frame_number: u64,
  ) -> Self {
    FrameInvariants {
      width: config.width,
      height: config.height,
      mb_count,
      frame_number,
      frame_type: FrameType::INTER,
      show_frame: true,
      qindex: 0,
      zbin_over_quant: 0,
      refresh: RefreshFlags::LAST_ONLY,
      copy_to_golden: CopyPolicy::None,
      copy_to_altref: CopyPolicy::None,
      ref_frame_flags: RefFrameFlags::ALL,
      probs: RefProbs::DEFAULT_INTER,
      altref_sign_bias: false,
      is_src_frame_alt_ref: false,
      is_next_src_alt_ref: false,
      reset_rd_thresholds: false,
      refresh_entropy_probs: true,
      error_resilient: config.error_resilient,
      sharpness: config.sharpness,
      loop_filter_level: 0,
      speed: config.speed_settings,
    }
  }

  /// Turns the frame into a key frame refreshing every reference.
  pub fn set_key_frame(&mut self) {
    self.frame_type = FrameType::KEY;
    self.refresh = RefreshFlags::ALL;
    self.copy_to_golden = CopyPolicy::None;
    self.copy_to_altref = CopyPolicy::None;
    self.probs = RefProbs::KEY;
    self.altref_sign_bias = false;
    self.reset_rd_thresholds = true;
  }

  #[inline]
  pub fn is_key_frame(&self) -> bool {
    self.frame_type == FrameType::KEY
  }

  /// Golden or alt-ref refresh outside of a key frame.
  #[inline]
  pub fn is_golden_update(&self) -> bool {
    !self.is_key_frame() && (self.refresh.golden || self.refresh.altref)
  }
}

/// Frames lent to one encode attempt.
///
/// `recon` is the only writable buffer and no reference slot can observe
/// it while the attempt runs.
#[derive(Debug)]
pub struct EncodeBuffers<'a> {
  pub source: &'a Frame,
  pub last: &'a Frame,
  pub golden: &'a Frame,
  pub altref: &'a Frame,
  pub recon: &'a mut Frame,
}

/// What an encode attempt reports back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodeStats {
  /// Estimated size of the coded frame, in bits.
  pub size_bits: i64,
  /// Macroblocks per reference, indexed by `INTRA_FRAME` .. `ALTREF_FRAME`.
  pub ref_frame_usage: [u32; MAX_REF_FRAMES],
  pub intra_error: i64,
  pub prediction_error: i64,
  /// Inter macroblocks predicted from LAST with a zero motion vector.
  pub zero_motion_mbs: u32,
  /// Macroblocks still tracking the golden frame after this one.
  pub gf_active_mbs: u32,
}

impl EncodeStats {
  pub fn percent_intra(&self, mb_count: usize) -> u32 {
    let mbs = mb_count.max(1) as u32;
    (self.ref_frame_usage[INTRA_FRAME] * 100 / mbs).min(100)
  }
}

/// The pixel pipeline driven by the control plane.
///
/// Implementations own their entropy and mode state; the control plane
/// snapshots it with [`save_context`] before a frame and rolls back with
/// [`restore_context`] between quantizer attempts.
///
/// [`save_context`]: #tymethod.save_context
/// [`restore_context`]: #tymethod.restore_context
pub trait FrameEncoder: Send + Sync {
  /// Snapshot of the state a recode must roll back.
  type CodingContext: Clone + Send;

  fn save_context(&self) -> Self::CodingContext;

  fn restore_context(&mut self, ctx: &Self::CodingContext);

  /// Codes `bufs.source` into `bufs.recon` at `fi.qindex`.
  fn encode_at(
    &mut self, fi: &FrameInvariants, bufs: EncodeBuffers<'_>,
  ) -> EncodeStats;

  /// Bits saved by updating coefficient probabilities, subtracted from
  /// the size estimate before it is judged.
  fn estimate_entropy_savings(&self, fi: &FrameInvariants) -> i64;

  fn pick_loop_filter_level(
    &self, fi: &FrameInvariants, source: &Frame, recon: &Frame,
  ) -> u8;

  /// Filters the reconstruction in place.
  fn apply_loop_filter(
    &self, _fi: &FrameInvariants, _recon: &mut Frame, _level: u8,
  ) {
  }

  /// Writes the coded frame to `out` and returns its size in bytes.
  ///
  /// # Errors
  ///
  /// Returns `EncoderStatus::Failure` when the frame cannot be packed.
  fn pack_bitstream(
    &self, fi: &FrameInvariants, out: &mut Vec<u8>,
  ) -> Result<usize, EncoderStatus>;
}
