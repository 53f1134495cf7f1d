// Copyright (c) 2019-2023, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use std::collections::VecDeque;

use crate::api::{EncoderStatus, RawFrameFlags};
use crate::frame::{BufferId, FrameStore};

/// Deepest lookahead the frame store can back.
pub const MAX_LAG_BUFFERS: usize = 25;

/// A queued raw frame. Its pixels live in `buffer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawFrameSample {
  pub buffer: BufferId,
  pub time_stamp: i64,
  pub end_time_stamp: i64,
  pub flags: RawFrameFlags,
}

/// What [`Lookahead::pop_next`] selected.
///
/// [`Lookahead::pop_next`]: struct.Lookahead.html#method.pop_next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Popped {
  pub sample: RawFrameSample,
  /// The sample was left queued and is to be coded as a hidden alt-ref.
  pub alt_ref: bool,
  /// The sample is the one an earlier alt-ref was built from.
  pub is_src_frame_alt_ref: bool,
  /// The next pop will return the alt-ref source.
  pub is_next_src_alt_ref: bool,
}

/// Bounded FIFO of raw frames, backed by the lag slots of a `FrameStore`.
#[derive(Debug)]
pub struct Lookahead {
  lag: usize,
  capacity: usize,
  queue: VecDeque<RawFrameSample>,
  free: Vec<BufferId>,
  alt_ref_source: Option<BufferId>,
}

impl Lookahead {
  /// Builds a queue over the lag slots of `store`.
  ///
  /// Without lag the queue holds one frame and a push overwrites it.
  pub fn new(lag_in_frames: usize, store: &FrameStore) -> Self {
    let lag = lag_in_frames.min(MAX_LAG_BUFFERS).min(store.lag_slots());
    let capacity = lag.max(1);
    Lookahead {
      lag,
      capacity,
      queue: VecDeque::with_capacity(capacity),
      free: (0..capacity).rev().map(|i| store.lag_slot(i)).collect(),
      alt_ref_source: None,
    }
  }

  /// Reserves a slot for a new frame and returns the buffer to fill.
  ///
  /// # Errors
  ///
  /// Returns `EncoderStatus::EnoughData` when lagging and full.
  pub fn push(
    &mut self, time_stamp: i64, end_time_stamp: i64, flags: RawFrameFlags,
  ) -> Result<BufferId, EncoderStatus> {
    if self.is_full() {
      if self.lag > 0 {
        return Err(EncoderStatus::EnoughData);
      }
      if let Some(old) = self.queue.pop_front() {
        self.free.push(old.buffer);
      }
    }
    let buffer = self.free.pop().ok_or(EncoderStatus::EnoughData)?;
    self.queue.push_back(RawFrameSample {
      buffer,
      time_stamp,
      end_time_stamp,
      flags,
    });
    Ok(buffer)
  }

  /// A frame can be coded.
  pub fn ready(&self, flush: bool) -> bool {
    let count = self.queue.len();
    (count == self.lag && self.lag > 0)
      || (self.lag == 0 && count > 0)
      || (flush && count > 0)
  }

  /// Selects the next frame to code.
  ///
  /// With `alt_ref_due` set to `Some(d)` and more than `d` frames queued,
  /// the sample `d` frames ahead is designated as the alt-ref source and
  /// returned without being consumed. Otherwise the oldest sample is
  /// popped; its buffer stays valid until the next `push`.
  pub fn pop_next(&mut self, alt_ref_due: Option<usize>) -> Option<Popped> {
    if let Some(due) = alt_ref_due {
      if self.alt_ref_source.is_none() && due < self.queue.len() {
        let sample = self.queue[due];
        self.alt_ref_source = Some(sample.buffer);
        return Some(Popped {
          sample,
          alt_ref: true,
          is_src_frame_alt_ref: false,
          is_next_src_alt_ref: false,
        });
      }
    }

    let sample = self.queue.pop_front()?;
    self.free.push(sample.buffer);

    let is_src_frame_alt_ref = self.alt_ref_source == Some(sample.buffer);
    if is_src_frame_alt_ref {
      self.alt_ref_source = None;
    }
    let is_next_src_alt_ref = self.alt_ref_source.is_some()
      && self.queue.front().map(|s| s.buffer) == self.alt_ref_source;

    Some(Popped {
      sample,
      alt_ref: false,
      is_src_frame_alt_ref,
      is_next_src_alt_ref,
    })
  }

  /// Puts back what the last [`pop_next`] returned.
  ///
  /// Valid only while no frame has been pushed since that pop.
  ///
  /// [`pop_next`]: #method.pop_next
  pub fn unpop(&mut self, popped: &Popped) {
    let sample = popped.sample;
    if popped.alt_ref {
      self.alt_ref_source = None;
      return;
    }
    if let Some(pos) = self.free.iter().rposition(|&b| b == sample.buffer) {
      self.free.remove(pos);
    }
    self.queue.push_front(sample);
    if popped.is_src_frame_alt_ref {
      self.alt_ref_source = Some(sample.buffer);
    }
  }

  /// Buffers of up to `before` samples preceding `center` and `after`
  /// samples following it, clamped to the queue, in display order.
  ///
  /// Also returns the position of `center` within the window.
  pub fn window(
    &self, center: usize, before: usize, after: usize,
  ) -> (Vec<BufferId>, usize) {
    if center >= self.queue.len() {
      return (Vec::new(), 0);
    }
    let start = center.saturating_sub(before);
    let end = (center + after + 1).min(self.queue.len());
    let window =
      self.queue.range(start..end).map(|sample| sample.buffer).collect();
    (window, center - start)
  }

  #[inline]
  pub fn len(&self) -> usize {
    self.queue.len()
  }

  #[inline]
  pub fn is_empty(&self) -> bool {
    self.queue.is_empty()
  }

  #[inline]
  pub fn capacity(&self) -> usize {
    self.capacity
  }

  #[inline]
  pub fn is_full(&self) -> bool {
    self.queue.len() >= self.capacity
  }
}

#[cfg(test)]
mod test {
  use super::*;

  fn queue(lag: usize) -> Lookahead {
    let store = FrameStore::allocate(16, 16, lag).unwrap();
    Lookahead::new(lag, &store)
  }

  fn push(q: &mut Lookahead, ts: i64) -> Result<BufferId, EncoderStatus> {
    q.push(ts, ts + 1, RawFrameFlags::default())
  }

  #[test]
  fn full_queue_rejects() {
    let mut q = queue(3);
    for ts in 0..3 {
      assert!(!q.ready(false));
      push(&mut q, ts).unwrap();
    }
    assert!(q.ready(false));
    assert_eq!(push(&mut q, 3), Err(EncoderStatus::EnoughData));
    assert_eq!(q.len(), 3);
  }

  #[test]
  fn no_lag_overwrites() {
    let mut q = queue(0);
    assert_eq!(q.capacity(), 1);
    push(&mut q, 0).unwrap();
    assert!(q.ready(false));
    push(&mut q, 1).unwrap();
    assert_eq!(q.len(), 1);
    assert_eq!(q.pop_next(None).unwrap().sample.time_stamp, 1);
    assert!(q.pop_next(None).is_none());
  }

  #[test]
  fn flush_drains_partial_queue() {
    let mut q = queue(4);
    push(&mut q, 0).unwrap();
    assert!(!q.ready(false));
    assert!(q.ready(true));
  }

  #[test]
  fn fifo_with_one_alt_ref_pick() {
    let mut q = queue(5);
    for ts in 0..5 {
      push(&mut q, ts).unwrap();
    }

    let alt = q.pop_next(Some(3)).unwrap();
    assert!(alt.alt_ref);
    assert_eq!(alt.sample.time_stamp, 3);
    assert_eq!(q.len(), 5);

    // Only one designation at a time.
    let first = q.pop_next(Some(1)).unwrap();
    assert!(!first.alt_ref);
    assert_eq!(first.sample.time_stamp, 0);

    let mut order = vec![first.sample.time_stamp];
    let mut flagged = Vec::new();
    while let Some(p) = q.pop_next(None) {
      order.push(p.sample.time_stamp);
      if p.is_src_frame_alt_ref {
        flagged.push(p.sample.time_stamp);
      }
      if p.is_next_src_alt_ref {
        assert_eq!(p.sample.time_stamp, 2);
      }
    }
    assert_eq!(order, vec![0, 1, 2, 3, 4]);
    assert_eq!(flagged, vec![3]);
  }

  #[test]
  fn unpop_restores_order_and_designation() {
    let mut q = queue(4);
    let ids: Vec<_> = (0..4).map(|ts| push(&mut q, ts).unwrap()).collect();

    let alt = q.pop_next(Some(1)).unwrap();
    q.unpop(&alt);
    let again = q.pop_next(Some(2)).unwrap();
    assert!(again.alt_ref);
    assert_eq!(again.sample.buffer, ids[2]);

    let first = q.pop_next(None).unwrap();
    q.unpop(&first);
    assert_eq!(q.len(), 4);
    assert_eq!(push(&mut q, 9), Err(EncoderStatus::EnoughData));
    assert_eq!(q.pop_next(None).unwrap().sample.buffer, ids[0]);
    assert_eq!(q.pop_next(None).unwrap().sample.buffer, ids[1]);

    let src = q.pop_next(None).unwrap();
    assert!(src.is_src_frame_alt_ref);
    q.unpop(&src);
    assert!(q.pop_next(None).unwrap().is_src_frame_alt_ref);
  }

  #[test]
  fn buffers_are_recycled() {
    let mut q = queue(2);
    let a = push(&mut q, 0).unwrap();
    let b = push(&mut q, 1).unwrap();
    assert_ne!(a, b);
    q.pop_next(None).unwrap();
    let c = push(&mut q, 2).unwrap();
    assert_eq!(c, a);
  }

  #[test]
  fn window_is_clamped() {
    let mut q = queue(6);
    let ids: Vec<_> = (0..6).map(|ts| push(&mut q, ts).unwrap()).collect();
    let (w, center) = q.window(4, 3, 3);
    assert_eq!(w, ids[1..6].to_vec());
    assert_eq!(center, 3);
    let (w, center) = q.window(0, 2, 0);
    assert_eq!(w, vec![ids[0]]);
    assert_eq!(center, 0);
    assert!(q.window(9, 1, 1).0.is_empty());
  }
}
