// Copyright (c) 2018-2023, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.
#![deny(missing_docs)]

use crate::api::config::*;
use crate::api::internal::*;
use crate::api::util::*;

use crate::encoder::{FrameEncoder, RefFrameFlags};
use crate::frame::*;
use crate::rate::RCSummary;

use rayon::ThreadPool;
use std::sync::Arc;

/// The encoder context.
///
/// Contains the encoding state.
pub struct Context<E: FrameEncoder> {
  pub(crate) inner: ContextInner<E>,
  pub(crate) config: EncoderConfig,
  pub(crate) pool: Option<Arc<ThreadPool>>,
  pub(crate) is_flushing: bool,
}

impl<E: FrameEncoder> Context<E> {
  /// Allocates and returns a new frame.
  ///
  /// # Examples
  ///
  /// ```ignore
  /// use vp8rc::prelude::*;
  ///
  /// # fn main() -> Result<(), ContextError> {
  /// let cfg = Config::default();
  /// let ctx = cfg.new_context(MyEncoder::default())?;
  /// let frame = ctx.new_frame();
  /// # Ok(())
  /// # }
  /// ```
  #[inline]
  pub fn new_frame(&self) -> Frame {
    Frame::new(self.config.width, self.config.height)
  }

  /// Queues a raw frame for encoding.
  ///
  /// The pixels are copied into the lookahead, so `frame` can be reused
  /// right away. Timestamps are in units of 1/10 000 000 s.
  ///
  /// # Errors
  ///
  /// Returns [`EncoderStatus::EnoughData`] when the lookahead is full or
  /// the encoder has been flushed, and [`EncoderStatus::Failure`] when the
  /// frame does not match the configured dimensions.
  ///
  /// [`EncoderStatus::EnoughData`]: enum.EncoderStatus.html#variant.EnoughData
  /// [`EncoderStatus::Failure`]: enum.EncoderStatus.html#variant.Failure
  #[inline]
  pub fn receive_raw_frame(
    &mut self, frame: &Frame, flags: RawFrameFlags, time_stamp: i64,
    end_time_stamp: i64,
  ) -> Result<(), EncoderStatus> {
    if self.is_flushing {
      return Err(EncoderStatus::EnoughData);
    }
    let inner = &mut self.inner;
    match self.pool {
      Some(ref pool) => pool.install(|| {
        inner.receive_raw_frame(frame, flags, time_stamp, end_time_stamp)
      }),
      None => inner.receive_raw_frame(frame, flags, time_stamp, end_time_stamp),
    }
  }

  /// Encodes the next frame and returns the encoded data.
  ///
  /// This method is where the main encoding work is done. With `flush`
  /// set, frames still queued are coded even though the lookahead is not
  /// full, and no further raw frames are accepted.
  ///
  /// A frame dropped by the rate control is returned with empty data and
  /// the [`FrameFlags::DROPPED`] flag. Hidden alt-ref frames carry
  /// [`FrameFlags::INVISIBLE`].
  ///
  /// # Errors
  ///
  /// Returns [`EncoderStatus::NeedMoreData`] when no frame is ready and
  /// [`EncoderStatus::Failure`] when the frame could not be packed. The
  /// frame then stays queued and the references are left untouched.
  ///
  /// # Examples
  ///
  /// ```ignore
  /// use vp8rc::prelude::*;
  ///
  /// fn drain<E: FrameEncoder>(
  ///     ctx: &mut Context<E>,
  /// ) -> Result<Vec<EncodedFrame>, EncoderStatus> {
  ///     let mut out = Vec::new();
  ///     loop {
  ///         match ctx.get_compressed_data(true) {
  ///             Ok(frame) => out.push(frame),
  ///             Err(EncoderStatus::NeedMoreData) => break,
  ///             Err(e) => return Err(e),
  ///         }
  ///     }
  ///     Ok(out)
  /// }
  /// ```
  ///
  /// [`FrameFlags::DROPPED`]: struct.FrameFlags.html#associatedconstant.DROPPED
  /// [`FrameFlags::INVISIBLE`]: struct.FrameFlags.html#associatedconstant.INVISIBLE
  /// [`EncoderStatus::NeedMoreData`]: enum.EncoderStatus.html#variant.NeedMoreData
  /// [`EncoderStatus::Failure`]: enum.EncoderStatus.html#variant.Failure
  #[inline]
  pub fn get_compressed_data(
    &mut self, flush: bool,
  ) -> Result<EncodedFrame, EncoderStatus> {
    if flush && !self.is_flushing {
      debug!("flushing {} queued frames", self.inner.lookahead.len());
      self.is_flushing = true;
    }
    let flush = self.is_flushing;
    let inner = &mut self.inner;
    match self.pool {
      Some(ref pool) => pool.install(|| inner.get_compressed_data(flush)),
      None => inner.get_compressed_data(flush),
    }
  }

  /// Codes the next frame as a key frame.
  ///
  /// Requesting it more than once before that frame is coded has no
  /// further effect.
  #[inline]
  pub fn force_key_frame(&mut self) {
    self.inner.force_key_frame();
  }

  /// Restricts the references the next frame may predict from.
  ///
  /// `mask` is a combination of [`RefFrameFlags`] bits. References that
  /// share a buffer with LAST stay excluded whatever the mask.
  ///
  /// # Errors
  ///
  /// Returns [`EncoderStatus::InvalidReference`] when `mask` exceeds 7.
  ///
  /// [`RefFrameFlags`]: encoder/struct.RefFrameFlags.html
  /// [`EncoderStatus::InvalidReference`]: enum.EncoderStatus.html#variant.InvalidReference
  #[inline]
  pub fn set_reference_usage_mask(
    &mut self, mask: u32,
  ) -> Result<(), EncoderStatus> {
    self.inner.set_reference_usage_mask(mask)
  }

  /// Sets which references the next coded frame refreshes.
  ///
  /// # Errors
  ///
  /// Returns [`EncoderStatus::InvalidReference`] when `mask` exceeds 7.
  ///
  /// [`EncoderStatus::InvalidReference`]: enum.EncoderStatus.html#variant.InvalidReference
  #[inline]
  pub fn update_reference(&mut self, mask: u32) -> Result<(), EncoderStatus> {
    self.inner.update_reference(mask)
  }

  /// Whether the entropy adaptations of the next coded frame carry over to
  /// the frames after it.
  #[inline]
  pub fn update_entropy_persistence(&mut self, persist: bool) {
    self.inner.update_entropy_persistence(persist);
  }

  /// Copies one reference frame into `dst`.
  ///
  /// # Errors
  ///
  /// Returns [`EncoderStatus::InvalidReference`] when `which` is not a
  /// single reference or `dst` does not match the configured dimensions.
  ///
  /// [`EncoderStatus::InvalidReference`]: enum.EncoderStatus.html#variant.InvalidReference
  #[inline]
  pub fn get_reference(
    &self, which: RefFrameFlags, dst: &mut Frame,
  ) -> Result<(), EncoderStatus> {
    self.inner.get_reference(which, dst)
  }

  /// Overwrites one reference frame with `src`.
  ///
  /// # Errors
  ///
  /// Returns [`EncoderStatus::InvalidReference`] when `which` is not a
  /// single reference or `src` does not match the configured dimensions.
  ///
  /// [`EncoderStatus::InvalidReference`]: enum.EncoderStatus.html#variant.InvalidReference
  #[inline]
  pub fn set_reference(
    &mut self, which: RefFrameFlags, src: &Frame,
  ) -> Result<(), EncoderStatus> {
    self.inner.set_reference(which, src)
  }

  /// Asks for a hidden alt-ref frame to be built from the lookahead.
  ///
  /// Returns false when alt-ref frames are disabled by the configuration.
  #[inline]
  pub fn request_alt_ref(&mut self) -> bool {
    self.inner.request_alt_ref()
  }

  /// Whether the realtime golden quality check recommends a golden
  /// refresh. Reading the recommendation clears it.
  #[inline]
  pub fn is_gf_update_needed(&mut self) -> bool {
    self.inner.is_gf_update_needed()
  }

  /// Snapshot of the rate control state.
  #[inline]
  pub fn rc_summary(&self) -> RCSummary {
    self.inner.rc_summary()
  }

  /// The configuration the session runs with.
  #[inline]
  pub fn config(&self) -> &EncoderConfig {
    &self.config
  }

  /// Number of raw frames waiting in the lookahead.
  #[inline]
  pub fn queued_frames(&self) -> usize {
    self.inner.lookahead.len()
  }
}
