// Copyright (c) 2018-2023, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.
#![deny(missing_docs)]

use crate::encoder::EncodeStats;
use crate::serialize::{Deserialize, Serialize};

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use thiserror::*;

/// A rational number.
#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub struct Rational {
  /// Numerator.
  pub num: u64,
  /// Denominator.
  pub den: u64,
}

impl Rational {
  /// Creates a rational number from the given numerator and denominator.
  pub const fn new(num: u64, den: u64) -> Self {
    Rational { num, den }
  }

  /// Returns a rational number that is the reciprocal of the given one.
  pub const fn from_reciprocal(reciprocal: Self) -> Self {
    Rational { num: reciprocal.den, den: reciprocal.num }
  }

  /// Returns the rational number as a floating-point number.
  pub fn as_f64(self) -> f64 {
    self.num as f64 / self.den as f64
  }
}

#[cfg(feature = "serialize")]
impl serde::Serialize for Rational {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: serde::Serializer,
  {
    (self.num, self.den).serialize(serializer)
  }
}

#[cfg(feature = "serialize")]
impl<'a> serde::Deserialize<'a> for Rational {
  fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
  where
    D: serde::Deserializer<'a>,
  {
    let (num, den) = serde::Deserialize::deserialize(deserializer)?;

    Ok(Rational::new(num, den))
  }
}

/// Possible types of a frame.
#[allow(non_camel_case_types)]
#[derive(Debug, Eq, PartialEq, Clone, Copy, Serialize, Deserialize)]
#[repr(C)]
pub enum FrameType {
  /// Key frame.
  KEY,
  /// Inter-frame.
  INTER,
}

impl fmt::Display for FrameType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    use self::FrameType::*;
    match self {
      KEY => write!(f, "Key frame"),
      INTER => write!(f, "Inter frame"),
    }
  }
}

/// Status that can be returned by [`Context`] functions.
///
/// [`Context`]: struct.Context.html
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum EncoderStatus {
  /// The encoder needs more data to produce an output frame.
  ///
  /// Emitted by [`Context::get_compressed_data()`] while the lookahead is
  /// filling and no flush was requested.
  ///
  /// [`Context::get_compressed_data()`]: struct.Context.html#method.get_compressed_data
  #[error("need more data")]
  NeedMoreData,
  /// There are enough frames in the queue.
  ///
  /// Emitted by [`Context::receive_raw_frame()`] when the lookahead is full.
  ///
  /// [`Context::receive_raw_frame()`]: struct.Context.html#method.receive_raw_frame
  #[error("enough data")]
  EnoughData,
  /// A reference operation was given a mismatched frame or an invalid
  /// flag mask.
  #[error("invalid reference")]
  InvalidReference,
  /// Generic fatal error.
  #[error("failure")]
  Failure,
}

/// Properties of an [`EncodedFrame`].
///
/// [`EncodedFrame`]: struct.EncodedFrame.html
#[derive(Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameFlags(u8);

impl FrameFlags {
  /// No flag set.
  pub const NONE: FrameFlags = FrameFlags(0);
  /// The frame is a key frame.
  pub const KEY: FrameFlags = FrameFlags(1);
  /// The frame refreshed the golden reference.
  pub const GOLDEN: FrameFlags = FrameFlags(2);
  /// The frame refreshed the alt-ref reference.
  pub const ALTREF: FrameFlags = FrameFlags(4);
  /// The frame is coded but not displayed.
  pub const INVISIBLE: FrameFlags = FrameFlags(8);
  /// The frame was dropped by the rate control and carries no data.
  pub const DROPPED: FrameFlags = FrameFlags(16);

  /// Whether every flag of `other` is set.
  #[inline]
  pub const fn contains(self, other: FrameFlags) -> bool {
    self.0 & other.0 == other.0
  }
}

impl BitOr for FrameFlags {
  type Output = FrameFlags;

  fn bitor(self, rhs: FrameFlags) -> FrameFlags {
    FrameFlags(self.0 | rhs.0)
  }
}

impl BitOrAssign for FrameFlags {
  fn bitor_assign(&mut self, rhs: FrameFlags) {
    self.0 |= rhs.0;
  }
}

impl fmt::Debug for FrameFlags {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    const NAMES: [(FrameFlags, &str); 5] = [
      (FrameFlags::KEY, "KEY"),
      (FrameFlags::GOLDEN, "GOLDEN"),
      (FrameFlags::ALTREF, "ALTREF"),
      (FrameFlags::INVISIBLE, "INVISIBLE"),
      (FrameFlags::DROPPED, "DROPPED"),
    ];
    let names: Vec<&str> = NAMES
      .iter()
      .filter(|(flag, _)| self.contains(*flag))
      .map(|&(_, name)| name)
      .collect();
    if names.is_empty() {
      f.write_str("NONE")
    } else {
      f.write_str(&names.join("|"))
    }
  }
}

/// Per-frame flags given along with a raw frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawFrameFlags {
  /// Code the frame as a key frame.
  pub force_key_frame: bool,
}

/// One compressed frame returned by [`Context::get_compressed_data()`].
///
/// [`Context::get_compressed_data()`]: struct.Context.html#method.get_compressed_data
#[derive(Debug, Serialize, Deserialize)]
pub struct EncodedFrame {
  /// The compressed data, empty for a dropped frame.
  pub data: Vec<u8>,
  /// Presentation timestamp, in 1/10 000 000 s.
  pub time_stamp: i64,
  /// End of the presentation interval, in 1/10 000 000 s.
  pub end_time_stamp: i64,
  /// Type of the frame.
  pub frame_type: FrameType,
  /// Properties of the frame.
  pub flags: FrameFlags,
  /// Index of the quantizer the frame was coded at, 0 to 127.
  pub qindex: u8,
  /// What the pixel pipeline reported for the committed attempt.
  pub stats: EncodeStats,
}

impl EncodedFrame {
  /// The frame was dropped by the rate control.
  #[inline]
  pub fn is_dropped(&self) -> bool {
    self.flags.contains(FrameFlags::DROPPED)
  }

  /// The frame is meant to be displayed.
  #[inline]
  pub fn is_shown(&self) -> bool {
    !self.flags.contains(FrameFlags::INVISIBLE)
  }
}

impl fmt::Display for EncodedFrame {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "Frame {} - {} - {} bytes - q {} - {:?}",
      self.time_stamp,
      self.frame_type,
      self.data.len(),
      self.qindex,
      self.flags
    )
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn frame_flags_display() {
    let flags = FrameFlags::KEY | FrameFlags::GOLDEN;
    assert!(flags.contains(FrameFlags::GOLDEN));
    assert!(!flags.contains(FrameFlags::DROPPED));
    assert_eq!(format!("{:?}", flags), "KEY|GOLDEN");
    assert_eq!(format!("{:?}", FrameFlags::NONE), "NONE");
  }
}
