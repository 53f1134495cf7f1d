// Copyright (c) 2023, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use std::fmt;

use crate::encoder::EncodeBuffers;
use crate::frame::{AllocationError, Frame};

/// Logical reference identities bound to physical buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefSlot {
  /// The previous reconstructed frame.
  Last,
  /// The golden reference.
  Golden,
  /// The alternate reference.
  AltRef,
  /// The frame currently being reconstructed.
  New,
}

impl RefSlot {
  pub const ALL: [RefSlot; 4] =
    [RefSlot::Last, RefSlot::Golden, RefSlot::AltRef, RefSlot::New];

  #[inline(always)]
  const fn index(self) -> usize {
    self as usize
  }
}

impl fmt::Display for RefSlot {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      RefSlot::Last => "LAST",
      RefSlot::Golden => "GOLDEN",
      RefSlot::AltRef => "ALTREF",
      RefSlot::New => "NEW",
    })
  }
}

/// Identity of one physical buffer of a [`FrameStore`].
///
/// [`FrameStore`]: struct.FrameStore.html
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BufferId(pub(crate) usize);

impl BufferId {
  #[inline(always)]
  pub const fn index(self) -> usize {
    self.0
  }
}

// Buffers the reference slots may be bound to: one per slot plus a spare,
// so a slot can always be detached from its aliases.
pub const REF_BUFFERS: usize = 5;

/// Fixed pool of frames shared by the reference slots and the lookahead.
///
/// Layout: `REF_BUFFERS` reference buffers, then the lookahead slots, then
/// one buffer receiving the temporally filtered alt-ref composite.
pub struct FrameStore {
  frames: Vec<Frame>,
  bindings: [BufferId; 4],
  lag_slots: usize,
}

impl fmt::Debug for FrameStore {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("FrameStore")
      .field("buffers", &self.frames.len())
      .field("bindings", &self.bindings)
      .field("lag_slots", &self.lag_slots)
      .finish()
  }
}

impl FrameStore {
  /// Allocates the whole pool up front.
  ///
  /// # Errors
  ///
  /// Returns `AllocationError` if any buffer cannot be allocated; no
  /// partially built store is returned.
  pub fn allocate(
    width: usize, height: usize, lag_slots: usize,
  ) -> Result<Self, AllocationError> {
    let lag_slots = lag_slots.max(1);
    let count = REF_BUFFERS + lag_slots + 1;
    let mut frames = Vec::new();
    frames.try_reserve_exact(count).map_err(|_| AllocationError {
      bytes: count * std::mem::size_of::<Frame>(),
    })?;
    for _ in 0..count {
      frames.push(Frame::try_new(width, height)?);
    }

    Ok(FrameStore {
      frames,
      bindings: [BufferId(0), BufferId(1), BufferId(2), BufferId(3)],
      lag_slots,
    })
  }

  /// Total number of physical buffers.
  pub fn len(&self) -> usize {
    self.frames.len()
  }

  pub fn lag_slots(&self) -> usize {
    self.lag_slots
  }

  /// Buffer backing lookahead slot `i`.
  pub fn lag_slot(&self, i: usize) -> BufferId {
    debug_assert!(i < self.lag_slots);
    BufferId(REF_BUFFERS + i)
  }

  /// Buffer receiving the alt-ref composite.
  pub fn composite(&self) -> BufferId {
    BufferId(self.frames.len() - 1)
  }

  #[inline]
  pub fn id(&self, slot: RefSlot) -> BufferId {
    self.bindings[slot.index()]
  }

  /// Rebinds `slot`; no pixels move.
  #[inline]
  pub fn bind(&mut self, slot: RefSlot, id: BufferId) {
    debug_assert!(id.0 < REF_BUFFERS);
    self.bindings[slot.index()] = id;
  }

  /// Exchanges the buffers bound to `a` and `b`.
  #[inline]
  pub fn swap(&mut self, a: RefSlot, b: RefSlot) {
    self.bindings.swap(a.index(), b.index());
  }

  /// Whether `a` and `b` are bound to the same physical buffer.
  #[inline]
  pub fn aliases(&self, a: RefSlot, b: RefSlot) -> bool {
    self.id(a) == self.id(b)
  }

  fn shared(&self, slot: RefSlot) -> bool {
    RefSlot::ALL.iter().any(|&other| other != slot && self.aliases(slot, other))
  }

  fn is_visible(&self, id: BufferId) -> bool {
    [RefSlot::Last, RefSlot::Golden, RefSlot::AltRef]
      .iter()
      .any(|&s| self.id(s) == id)
  }

  // A reference buffer bound to no slot at all.
  fn private_buffer(&self) -> Option<BufferId> {
    (0..REF_BUFFERS).map(BufferId).find(|id| !self.bindings.contains(id))
  }

  /// Binds NEW to a buffer no reference slot can observe.
  pub fn acquire_new(&mut self) {
    let current = self.id(RefSlot::New);
    if !self.is_visible(current) {
      return;
    }
    if let Some(id) =
      (0..REF_BUFFERS).map(BufferId).find(|&id| !self.is_visible(id))
    {
      self.bind(RefSlot::New, id);
    }
  }

  // Gives `slot` a buffer of its own if it currently shares one.
  fn detach(&mut self, slot: RefSlot) {
    if self.shared(slot) {
      if let Some(id) = self.private_buffer() {
        self.bind(slot, id);
      }
    }
  }

  /// Copies pixels, border included, from `src`'s buffer into `dst`'s.
  ///
  /// When `dst` aliases another slot it is first rebound to a private
  /// buffer, so the copy is never observed through another slot.
  pub fn copy(&mut self, src: RefSlot, dst: RefSlot) {
    if src == dst {
      return;
    }
    let s = self.id(src);
    self.detach(dst);
    let d = self.id(dst);
    if s == d {
      return;
    }
    let (src, dst) = self.pair_mut(s, d);
    dst.copy_from(src);
  }

  /// Overwrites `dst` with an external frame of the same geometry.
  pub fn import(&mut self, dst: RefSlot, frame: &Frame) {
    self.detach(dst);
    let id = self.id(dst);
    let buf = &mut self.frames[id.0];
    debug_assert!(buf.same_geometry(frame));
    buf.copy_from(frame);
  }

  #[inline]
  pub fn frame(&self, slot: RefSlot) -> &Frame {
    &self.frames[self.id(slot).0]
  }

  #[inline]
  pub fn frame_mut(&mut self, slot: RefSlot) -> &mut Frame {
    let id = self.id(slot);
    &mut self.frames[id.0]
  }

  #[inline]
  pub fn buffer(&self, id: BufferId) -> &Frame {
    &self.frames[id.0]
  }

  #[inline]
  pub fn buffer_mut(&mut self, id: BufferId) -> &mut Frame {
    &mut self.frames[id.0]
  }

  fn pair_mut(&mut self, src: BufferId, dst: BufferId) -> (&Frame, &mut Frame) {
    debug_assert_ne!(src, dst);
    if src.0 < dst.0 {
      let (lo, hi) = self.frames.split_at_mut(dst.0);
      (&lo[src.0], &mut hi[0])
    } else {
      let (lo, hi) = self.frames.split_at_mut(src.0);
      (&hi[0], &mut lo[dst.0])
    }
  }

  /// Splits the pool into the reconstruction target and the read-only
  /// inputs of one encode attempt.
  pub fn encode_buffers(&mut self, source: BufferId) -> EncodeBuffers<'_> {
    let new = self.id(RefSlot::New);
    let [last, golden, altref, _] = self.bindings;
    debug_assert!(!self.is_visible(new));
    debug_assert_ne!(source, new);

    let (lo, hi) = self.frames.split_at_mut(new.0);
    let (recon, hi) = hi.split_at_mut(1);
    let (lo, hi) = (&*lo, &*hi);

    EncodeBuffers {
      source: around(lo, hi, new, source),
      last: around(lo, hi, new, last),
      golden: around(lo, hi, new, golden),
      altref: around(lo, hi, new, altref),
      recon: &mut recon[0],
    }
  }

  /// Splits the pool into the composite buffer and the frames of `window`.
  pub fn composite_inputs(
    &mut self, window: &[BufferId],
  ) -> (&mut Frame, Vec<&Frame>) {
    let last = self.frames.len() - 1;
    let (rest, composite) = self.frames.split_at_mut(last);
    let rest = &*rest;
    (&mut composite[0], window.iter().map(|id| &rest[id.0]).collect())
  }
}

// Looks up `id` in a pool split around the `pivot` buffer.
fn around<'a>(
  lo: &'a [Frame], hi: &'a [Frame], pivot: BufferId, id: BufferId,
) -> &'a Frame {
  if id.0 < pivot.0 {
    &lo[id.0]
  } else {
    &hi[id.0 - pivot.0 - 1]
  }
}

#[cfg(test)]
mod test {
  use super::*;

  fn fill(frame: &mut Frame, v: u8) {
    for p in frame.planes.iter_mut() {
      p.data.iter_mut().for_each(|x| *x = v);
    }
  }

  #[test]
  fn pool_layout() {
    let store = FrameStore::allocate(32, 32, 3).unwrap();
    assert_eq!(store.len(), REF_BUFFERS + 3 + 1);
    assert_eq!(store.lag_slot(0), BufferId(REF_BUFFERS));
    assert_eq!(store.composite(), BufferId(REF_BUFFERS + 3));

    // Without lag a single slot still backs the queue.
    let store = FrameStore::allocate(32, 32, 0).unwrap();
    assert_eq!(store.lag_slots(), 1);
  }

  #[test]
  fn bind_swap_and_aliases() {
    let mut store = FrameStore::allocate(16, 16, 1).unwrap();
    assert!(!store.aliases(RefSlot::Last, RefSlot::Golden));

    let last = store.id(RefSlot::Last);
    store.bind(RefSlot::Golden, last);
    assert!(store.aliases(RefSlot::Last, RefSlot::Golden));

    let new = store.id(RefSlot::New);
    store.swap(RefSlot::Last, RefSlot::New);
    assert_eq!(store.id(RefSlot::Last), new);
    assert_eq!(store.id(RefSlot::New), last);
    assert!(!store.aliases(RefSlot::Last, RefSlot::Golden));
  }

  #[test]
  fn acquire_new_never_targets_a_visible_buffer() {
    let mut store = FrameStore::allocate(16, 16, 1).unwrap();
    let new = store.id(RefSlot::New);
    // Swap then alias golden to the old NEW buffer.
    store.swap(RefSlot::Last, RefSlot::New);
    store.bind(RefSlot::Golden, new);
    store.bind(RefSlot::AltRef, store.id(RefSlot::New));
    store.acquire_new();
    let target = store.id(RefSlot::New);
    for slot in [RefSlot::Last, RefSlot::Golden, RefSlot::AltRef] {
      assert_ne!(store.id(slot), target);
    }
  }

  #[test]
  fn copy_detaches_aliased_destination() {
    let mut store = FrameStore::allocate(16, 16, 1).unwrap();
    let last = store.id(RefSlot::Last);
    store.bind(RefSlot::Golden, last);
    store.bind(RefSlot::AltRef, last);
    fill(store.frame_mut(RefSlot::Last), 10);
    fill(store.frame_mut(RefSlot::New), 99);

    store.copy(RefSlot::New, RefSlot::Golden);

    assert!(!store.aliases(RefSlot::Golden, RefSlot::Last));
    assert!(!store.aliases(RefSlot::Golden, RefSlot::New));
    assert_eq!(store.frame(RefSlot::Golden).planes[0].data[0], 99);
    // Buffers still visible through other slots are untouched.
    assert_eq!(store.frame(RefSlot::Last).planes[0].data[0], 10);
    assert_eq!(store.frame(RefSlot::AltRef).planes[0].data[0], 10);
  }

  #[test]
  fn encode_buffers_split_the_pool() {
    let mut store = FrameStore::allocate(16, 16, 2).unwrap();
    let source = store.lag_slot(1);
    fill(store.buffer_mut(source), 42);
    fill(store.frame_mut(RefSlot::Golden), 7);

    let bufs = store.encode_buffers(source);
    assert_eq!(bufs.source.planes[0].data[0], 42);
    assert_eq!(bufs.golden.planes[0].data[0], 7);
    bufs.recon.planes[0].data[0] = 1;
    assert_eq!(store.frame(RefSlot::New).planes[0].data[0], 1);
  }
}
