// Copyright (c) 2023, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use std::fmt;
use std::ops::{BitAnd, BitOr};

use crate::api::FrameType;
use crate::frame::{FrameStore, RefSlot};
use crate::serialize::{Deserialize, Serialize};

// Indices into per-reference macroblock usage counters.
pub const INTRA_FRAME: usize = 0;
pub const LAST_FRAME: usize = 1;
pub const GOLDEN_FRAME: usize = 2;
pub const ALTREF_FRAME: usize = 3;
pub const MAX_REF_FRAMES: usize = 4;

/// Set of reference slots a frame may predict from.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RefFrameFlags(u8);

impl RefFrameFlags {
  pub const NONE: RefFrameFlags = RefFrameFlags(0);
  pub const LAST: RefFrameFlags = RefFrameFlags(1);
  pub const GOLD: RefFrameFlags = RefFrameFlags(2);
  pub const ALT: RefFrameFlags = RefFrameFlags(4);
  pub const ALL: RefFrameFlags = RefFrameFlags(7);

  /// Builds a mask from raw bits, rejecting anything above `ALL`.
  pub const fn from_bits(bits: u32) -> Option<Self> {
    if bits > Self::ALL.0 as u32 {
      None
    } else {
      Some(RefFrameFlags(bits as u8))
    }
  }

  #[inline]
  pub const fn bits(self) -> u8 {
    self.0
  }

  #[inline]
  pub const fn contains(self, other: RefFrameFlags) -> bool {
    self.0 & other.0 == other.0
  }

  #[inline]
  pub const fn without(self, other: RefFrameFlags) -> RefFrameFlags {
    RefFrameFlags(self.0 & !other.0)
  }
}

impl Default for RefFrameFlags {
  fn default() -> Self {
    RefFrameFlags::ALL
  }
}

impl BitOr for RefFrameFlags {
  type Output = RefFrameFlags;

  fn bitor(self, rhs: RefFrameFlags) -> RefFrameFlags {
    RefFrameFlags(self.0 | rhs.0)
  }
}

impl BitAnd for RefFrameFlags {
  type Output = RefFrameFlags;

  fn bitand(self, rhs: RefFrameFlags) -> RefFrameFlags {
    RefFrameFlags(self.0 & rhs.0)
  }
}

impl fmt::Debug for RefFrameFlags {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let names = [
      (RefFrameFlags::LAST, "LAST"),
      (RefFrameFlags::GOLD, "GOLD"),
      (RefFrameFlags::ALT, "ALT"),
    ];
    let set: Vec<&str> = names
      .iter()
      .filter(|(flag, _)| self.contains(*flag))
      .map(|(_, name)| *name)
      .collect();
    if set.is_empty() {
      f.write_str("NONE")
    } else {
      f.write_str(&set.join("|"))
    }
  }
}

/// Which reference slots the current frame overwrites once coded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshFlags {
  pub last: bool,
  pub golden: bool,
  pub altref: bool,
}

impl RefreshFlags {
  pub const ALL: RefreshFlags =
    RefreshFlags { last: true, golden: true, altref: true };
  /// The state every frame starts from.
  pub const LAST_ONLY: RefreshFlags =
    RefreshFlags { last: true, golden: false, altref: false };
  pub const ALTREF_ONLY: RefreshFlags =
    RefreshFlags { last: false, golden: false, altref: true };

  pub const fn from_mask(mask: RefFrameFlags) -> Self {
    RefreshFlags {
      last: mask.contains(RefFrameFlags::LAST),
      golden: mask.contains(RefFrameFlags::GOLD),
      altref: mask.contains(RefFrameFlags::ALT),
    }
  }
}

/// Reference rebinding applied to GOLDEN or ALTREF when it is not
/// refreshed from the shown frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CopyPolicy {
  None,
  /// Take the LAST reference as it was before this frame.
  FromLast,
  /// Take the other one of GOLDEN/ALTREF as it was before this frame.
  FromOther,
}

impl Default for CopyPolicy {
  fn default() -> Self {
    CopyPolicy::None
  }
}

/// Probabilities, out of 256, signalled for the reference of inter
/// macroblocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefProbs {
  pub intra: u8,
  pub last: u8,
  pub gf: u8,
}

impl RefProbs {
  pub const KEY: RefProbs = RefProbs { intra: 255, last: 128, gf: 128 };
  /// Used when the previous frame left no usage counts behind.
  pub const DEFAULT_INTER: RefProbs =
    RefProbs { intra: 63, last: 128, gf: 128 };

  /// Derives the probabilities of the next frame from the previous frame's
  /// per-reference macroblock counts and the refresh decision.
  pub fn new(
    frame_type: FrameType, refresh: RefreshFlags,
    usage: &[u32; MAX_REF_FRAMES], frames_since_golden: u32,
    alt_ref_active: bool,
  ) -> Self {
    if frame_type == FrameType::KEY {
      return RefProbs::KEY;
    }

    let intra = usage[INTRA_FRAME] as i32;
    let last = usage[LAST_FRAME] as i32;
    let golden = usage[GOLDEN_FRAME] as i32;
    let altref = usage[ALTREF_FRAME] as i32;
    let inter = last + golden + altref;
    if intra + inter == 0 {
      return RefProbs::DEFAULT_INTER;
    }

    let mut prob_intra = (intra * 255 / (intra + inter)).max(1);
    let mut prob_last =
      if inter > 0 { (last * 255 / inter).max(1) } else { 128 };
    let mut prob_gf = if golden + altref > 0 {
      (golden * 255 / (golden + altref)).max(1)
    } else {
      128
    };

    if refresh.altref {
      prob_intra += 40;
      prob_last = 200;
      prob_gf = 1;
    } else if frames_since_golden == 0 {
      prob_last = 214;
      prob_gf = 1;
    } else if frames_since_golden == 1 {
      prob_last = 192;
      prob_gf = 220;
    } else if alt_ref_active {
      prob_gf = (prob_gf - 20).max(10);
    }

    RefProbs {
      intra: prob_intra.clamp(1, 255) as u8,
      last: prob_last.clamp(1, 255) as u8,
      gf: prob_gf.clamp(1, 255) as u8,
    }
  }
}

/// Buffer sharing between the three visible references.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Aliasing {
  pub gold_is_last: bool,
  pub alt_is_last: bool,
  pub gold_is_alt: bool,
}

impl Aliasing {
  pub fn from_store(store: &FrameStore) -> Self {
    Aliasing {
      gold_is_last: store.aliases(RefSlot::Golden, RefSlot::Last),
      alt_is_last: store.aliases(RefSlot::AltRef, RefSlot::Last),
      gold_is_alt: store.aliases(RefSlot::Golden, RefSlot::AltRef),
    }
  }

  /// References worth searching: a slot sharing its buffer with an
  /// earlier one is dropped.
  pub fn ref_frame_flags(self) -> RefFrameFlags {
    let mut flags = RefFrameFlags::ALL;
    if self.gold_is_last {
      flags = flags.without(RefFrameFlags::GOLD);
    }
    if self.alt_is_last || self.gold_is_alt {
      flags = flags.without(RefFrameFlags::ALT);
    }
    flags
  }
}

/// Applies the copy policies and refreshes of a coded frame.
///
/// `shown` is the slot holding the reconstruction after the LAST/NEW swap.
/// With `error_resilient` set, refreshed GOLDEN/ALTREF slots receive a
/// private copy of the pixels instead of sharing the shown buffer.
pub fn update_references(
  store: &mut FrameStore, frame_type: FrameType, refresh: RefreshFlags,
  copy_to_golden: CopyPolicy, copy_to_altref: CopyPolicy, shown: RefSlot,
  error_resilient: bool,
) {
  let shown_id = store.id(shown);

  if frame_type == FrameType::KEY {
    store.bind(RefSlot::Golden, shown_id);
    store.bind(RefSlot::AltRef, shown_id);
    return;
  }

  // After the swap NEW holds what LAST was before this frame.
  let previous_last =
    if refresh.last { store.id(RefSlot::New) } else { store.id(RefSlot::Last) };

  match copy_to_altref {
    CopyPolicy::None => {}
    CopyPolicy::FromLast => store.bind(RefSlot::AltRef, previous_last),
    CopyPolicy::FromOther => {
      let golden = store.id(RefSlot::Golden);
      store.bind(RefSlot::AltRef, golden);
    }
  }
  match copy_to_golden {
    CopyPolicy::None => {}
    CopyPolicy::FromLast => store.bind(RefSlot::Golden, previous_last),
    CopyPolicy::FromOther => {
      let altref = store.id(RefSlot::AltRef);
      store.bind(RefSlot::Golden, altref);
    }
  }

  for (refreshed, slot) in
    [(refresh.altref, RefSlot::AltRef), (refresh.golden, RefSlot::Golden)]
  {
    if !refreshed {
      continue;
    }
    if error_resilient {
      store.copy(shown, slot);
    } else {
      store.bind(slot, shown_id);
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;

  fn shown_after_swap(
    store: &mut FrameStore, refresh: RefreshFlags,
  ) -> RefSlot {
    store.acquire_new();
    if refresh.last {
      store.swap(RefSlot::Last, RefSlot::New);
      RefSlot::Last
    } else {
      RefSlot::New
    }
  }

  #[test]
  fn mask_bits() {
    assert_eq!(RefFrameFlags::from_bits(7), Some(RefFrameFlags::ALL));
    assert_eq!(RefFrameFlags::from_bits(8), None);
    let m = RefFrameFlags::LAST | RefFrameFlags::ALT;
    assert!(m.contains(RefFrameFlags::ALT));
    assert!(!m.contains(RefFrameFlags::GOLD));
    assert_eq!(format!("{:?}", m), "LAST|ALT");
    assert_eq!(format!("{:?}", RefFrameFlags::NONE), "NONE");
  }

  #[test]
  fn key_frame_aliases_everything() {
    let mut store = FrameStore::allocate(16, 16, 1).unwrap();
    let refresh = RefreshFlags::ALL;
    let shown = shown_after_swap(&mut store, refresh);
    update_references(
      &mut store,
      FrameType::KEY,
      refresh,
      CopyPolicy::None,
      CopyPolicy::None,
      shown,
      false,
    );
    let a = Aliasing::from_store(&store);
    assert!(a.gold_is_last && a.alt_is_last && a.gold_is_alt);
    assert_eq!(a.ref_frame_flags(), RefFrameFlags::LAST);
  }

  #[test]
  fn inter_frame_splits_last_from_golden() {
    let mut store = FrameStore::allocate(16, 16, 1).unwrap();
    let shown = shown_after_swap(&mut store, RefreshFlags::ALL);
    update_references(
      &mut store,
      FrameType::KEY,
      RefreshFlags::ALL,
      CopyPolicy::None,
      CopyPolicy::None,
      shown,
      false,
    );

    let refresh = RefreshFlags::LAST_ONLY;
    let shown = shown_after_swap(&mut store, refresh);
    update_references(
      &mut store,
      FrameType::INTER,
      refresh,
      CopyPolicy::None,
      CopyPolicy::None,
      shown,
      false,
    );
    let a = Aliasing::from_store(&store);
    assert!(!a.gold_is_last && !a.alt_is_last && a.gold_is_alt);
    assert_eq!(a.ref_frame_flags(), RefFrameFlags::LAST | RefFrameFlags::GOLD);
  }

  #[test]
  fn golden_refresh_moves_old_golden_to_altref() {
    let mut store = FrameStore::allocate(16, 16, 1).unwrap();
    let shown = shown_after_swap(&mut store, RefreshFlags::ALL);
    update_references(
      &mut store,
      FrameType::KEY,
      RefreshFlags::ALL,
      CopyPolicy::None,
      CopyPolicy::None,
      shown,
      false,
    );
    let shown = shown_after_swap(&mut store, RefreshFlags::LAST_ONLY);
    update_references(
      &mut store,
      FrameType::INTER,
      RefreshFlags::LAST_ONLY,
      CopyPolicy::None,
      CopyPolicy::None,
      shown,
      false,
    );
    let old_golden = store.id(RefSlot::Golden);

    let refresh = RefreshFlags { last: true, golden: true, altref: false };
    let shown = shown_after_swap(&mut store, refresh);
    update_references(
      &mut store,
      FrameType::INTER,
      refresh,
      CopyPolicy::None,
      CopyPolicy::FromOther,
      shown,
      false,
    );
    assert_eq!(store.id(RefSlot::AltRef), old_golden);
    let a = Aliasing::from_store(&store);
    assert!(a.gold_is_last);
    assert!(!a.gold_is_alt);
    assert_eq!(a.ref_frame_flags(), RefFrameFlags::LAST | RefFrameFlags::ALT);
  }

  #[test]
  fn error_resilient_refresh_copies() {
    let mut store = FrameStore::allocate(16, 16, 1).unwrap();
    let refresh = RefreshFlags { last: true, golden: true, altref: false };
    let shown = shown_after_swap(&mut store, refresh);
    store.frame_mut(shown).planes[0].data[0] = 77;
    update_references(
      &mut store,
      FrameType::INTER,
      refresh,
      CopyPolicy::None,
      CopyPolicy::None,
      shown,
      true,
    );
    assert!(!store.aliases(RefSlot::Golden, RefSlot::Last));
    assert_eq!(store.frame(RefSlot::Golden).planes[0].data[0], 77);
  }

  #[test]
  fn probabilities_follow_usage_and_overrides() {
    let usage = [10, 60, 20, 10];
    let p = RefProbs::new(FrameType::KEY, RefreshFlags::ALL, &usage, 5, false);
    assert_eq!(p, RefProbs::KEY);

    let p = RefProbs::new(
      FrameType::INTER,
      RefreshFlags::LAST_ONLY,
      &[0; 4],
      5,
      false,
    );
    assert_eq!(p, RefProbs::DEFAULT_INTER);

    let p = RefProbs::new(
      FrameType::INTER,
      RefreshFlags::LAST_ONLY,
      &usage,
      5,
      false,
    );
    assert_eq!(p, RefProbs { intra: 25, last: 170, gf: 170 });

    let p = RefProbs::new(
      FrameType::INTER,
      RefreshFlags::LAST_ONLY,
      &usage,
      5,
      true,
    );
    assert_eq!(p.gf, 150);

    let p = RefProbs::new(
      FrameType::INTER,
      RefreshFlags::ALTREF_ONLY,
      &usage,
      5,
      true,
    );
    assert_eq!(p, RefProbs { intra: 65, last: 200, gf: 1 });

    let p = RefProbs::new(
      FrameType::INTER,
      RefreshFlags::LAST_ONLY,
      &usage,
      1,
      false,
    );
    assert_eq!((p.last, p.gf), (192, 220));

    // Saturates instead of wrapping.
    let p = RefProbs::new(
      FrameType::INTER,
      RefreshFlags::ALTREF_ONLY,
      &[100, 0, 0, 0],
      3,
      false,
    );
    assert_eq!(p.intra, 255);
  }
}
