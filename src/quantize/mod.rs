// Copyright (c) 2017-2023, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

#![allow(non_upper_case_globals)]

mod tables;

pub use tables::*;

// The bits-per-macroblock estimates are kept in units of 1/512 bit.
pub const BPER_MB_NORMBITS: u32 = 9;

// Per-type scale of the bits-per-macroblock model.
const KEY_BPM_SCALE: i64 = 2_700_000;
const INTER_BPM_SCALE: i64 = 1_990_000;

pub fn dc_q(qindex: u8) -> u16 {
  dc_qlookup[(qindex as usize).min(MAXQ)]
}

pub fn ac_q(qindex: u8) -> u16 {
  ac_qlookup[(qindex as usize).min(MAXQ)]
}

/// Converts a user quantizer in `0..=63` to a qindex.
pub fn q_to_qindex(q: u8) -> u8 {
  q_trans[(q as usize).min(q_trans.len() - 1)]
}

/// Converts a qindex back to the smallest user quantizer that reaches it.
pub fn qindex_to_q(qindex: u8) -> u8 {
  q_trans
    .iter()
    .position(|&t| t >= qindex)
    .map_or((q_trans.len() - 1) as u8, |i| i as u8)
}

/// Estimated cost, in 1/512 bit units, of one macroblock coded at `qindex`.
///
/// Monotone non-increasing in `qindex`.
pub fn bits_per_mb(key_frame: bool, qindex: u8) -> i64 {
  let scale = if key_frame { KEY_BPM_SCALE } else { INTER_BPM_SCALE };
  scale / ac_q(qindex) as i64
}
