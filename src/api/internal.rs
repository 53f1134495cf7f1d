// Copyright (c) 2018-2023, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.
#![deny(missing_docs)]

use crate::api::lookahead::{Lookahead, RawFrameSample, MAX_LAG_BUFFERS};
use crate::api::{
  EncodedFrame, EncoderConfig, EncoderStatus, FrameFlags, RateControlConfig,
  RawFrameFlags,
};
use crate::cpu_features::CpuFeatureLevel;
use crate::encoder::*;
use crate::frame::{AllocationError, BufferId, Frame, FrameStore, RefSlot};
use crate::rate::{RCState, RCSummary};
use crate::recode::{recode_allowed, QuantizerSearch, SearchStep};
use crate::temporal_filter::{filter_composite, window_extent};

// Timestamps count units of 1/10 000 000 s.
const TIME_STAMP_RATE: f64 = 10_000_000.0;

/// The whole state of one encoding session.
pub(crate) struct ContextInner<E: FrameEncoder> {
  pub(crate) config: EncoderConfig,
  pub(crate) encoder: E,
  pub(crate) store: FrameStore,
  pub(crate) lookahead: Lookahead,
  pub(crate) rc_state: RCState,
  pub(crate) golden: GoldenFrameState,
  kf_history: KeyFrameHistory,
  cpu_feature_level: CpuFeatureLevel,
  mb_count: usize,
  /// Shown frames so far, dropped ones included.
  pub(crate) current_video_frame: u64,
  pub(crate) frames_since_key: u64,
  // Controls waiting for the next coded frame.
  force_key_frame: bool,
  ref_frame_mask: Option<RefFrameFlags>,
  refresh_override: Option<RefreshFlags>,
  entropy_persistence: Option<bool>,
  /// Statistics of the previous coded frame.
  last_stats: EncodeStats,
  last_time_stamp_seen: Option<i64>,
  fixed_q_alt_ref: bool,
}

impl<E: FrameEncoder> ContextInner<E> {
  pub fn new(
    config: &EncoderConfig, rc: &RateControlConfig, encoder: E,
  ) -> Result<Self, AllocationError> {
    let store = FrameStore::allocate(
      config.width,
      config.height,
      config.lag_in_frames.min(MAX_LAG_BUFFERS),
    )?;
    let lookahead = Lookahead::new(config.lag_in_frames, &store);
    let mb_count = config.mb_count();
    let cpu_feature_level = CpuFeatureLevel::default();
    debug!("cpu feature level {:?}", cpu_feature_level);

    Ok(ContextInner {
      config: *config,
      encoder,
      store,
      lookahead,
      rc_state: RCState::new(config, rc, mb_count),
      golden: GoldenFrameState::new(
        mb_count,
        config.alt_freq,
        config.auto_gold,
      ),
      kf_history: KeyFrameHistory::default(),
      cpu_feature_level,
      mb_count,
      current_video_frame: 0,
      frames_since_key: 0,
      force_key_frame: false,
      ref_frame_mask: None,
      refresh_override: None,
      entropy_persistence: None,
      last_stats: EncodeStats::default(),
      last_time_stamp_seen: None,
      fixed_q_alt_ref: rc.is_fixed_quantizer() && config.alt_ref_enabled(),
    })
  }

  pub fn receive_raw_frame(
    &mut self, frame: &Frame, flags: RawFrameFlags, time_stamp: i64,
    end_time_stamp: i64,
  ) -> Result<(), EncoderStatus> {
    if !self.store.frame(RefSlot::Last).same_geometry(frame) {
      return Err(EncoderStatus::Failure);
    }
    let id = self.lookahead.push(time_stamp, end_time_stamp, flags)?;
    let buf = self.store.buffer_mut(id);
    buf.copy_from(frame);
    buf.pad();
    Ok(())
  }

  pub fn get_compressed_data(
    &mut self, flush: bool,
  ) -> Result<EncodedFrame, EncoderStatus> {
    if !self.lookahead.ready(flush) {
      return Err(EncoderStatus::NeedMoreData);
    }

    let alt_ref_due =
      if self.config.alt_ref_enabled() && self.golden.source_alt_ref_pending {
        Some(self.golden.frames_till_gf_update_due as usize)
      } else {
        None
      };
    // State rolled back when the frame cannot be packed.
    let rc_saved = self.rc_state.clone();
    let golden_saved = self.golden.clone();
    let kf_saved = self.kf_history;
    let last_time_stamp_saved = self.last_time_stamp_seen;

    let popped = self
      .lookahead
      .pop_next(alt_ref_due)
      .ok_or(EncoderStatus::NeedMoreData)?;

    let mut fi = FrameInvariants::new(
      &self.config,
      self.mb_count,
      self.current_video_frame,
    );
    let source = match (popped.alt_ref, alt_ref_due) {
      (true, Some(due)) => {
        fi.refresh = RefreshFlags::ALTREF_ONLY;
        fi.show_frame = false;
        self.golden.source_alt_ref_pending = false;
        self.build_alt_ref_source(due, popped.sample.buffer)
      }
      _ => {
        self.update_frame_rate(&popped.sample);
        fi.is_src_frame_alt_ref = popped.is_src_frame_alt_ref;
        fi.is_next_src_alt_ref = popped.is_next_src_alt_ref;
        popped.sample.buffer
      }
    };

    if self.config.speed_settings.compressor_speed == 2 {
      self.golden.check_gf_quality(&self.last_stats);
    }

    let frame_number = fi.frame_number;
    let res = self.encode_frame(fi, source, &popped.sample);
    if let Err(e) = &res {
      warn!("frame {} not packed ({}), state rolled back", frame_number, e);
      self.rc_state = rc_saved;
      self.golden = golden_saved;
      self.kf_history = kf_saved;
      self.last_time_stamp_seen = last_time_stamp_saved;
      self.lookahead.unpop(&popped);
    }
    res
  }

  // The sample `due` frames ahead, or its temporally filtered composite.
  fn build_alt_ref_source(&mut self, due: usize, sample: BufferId) -> BufferId {
    if self.config.arnr_max_frames == 0 {
      return sample;
    }
    let backward = due;
    let forward = self.lookahead.len().saturating_sub(due + 1);
    let (before, after) = window_extent(
      self.config.arnr_type,
      self.config.arnr_max_frames,
      backward,
      forward,
    );
    let (window, center) = self.lookahead.window(due, before, after);
    if window.len() < 2 {
      return sample;
    }

    trace!(
      "alt-ref composite of {} frames, source at {}, strength {}",
      window.len(),
      center,
      self.config.arnr_strength
    );
    let (dst, frames) = self.store.composite_inputs(&window);
    filter_composite(
      dst,
      &frames,
      center,
      self.config.arnr_strength,
      self.cpu_feature_level,
    );
    self.store.composite()
  }

  fn update_frame_rate(&mut self, sample: &RawFrameSample) {
    let frame_rate = match self.last_time_stamp_seen {
      None => {
        let duration = sample.end_time_stamp - sample.time_stamp;
        (duration > 0).then(|| TIME_STAMP_RATE / duration as f64)
      }
      Some(last) => {
        let interval = sample.time_stamp - last;
        (interval > 0).then(|| {
          let this_fps = TIME_STAMP_RATE / interval as f64;
          (7.0 * self.rc_state.frame_rate() + this_fps) / 8.0
        })
      }
    };
    if let Some(frame_rate) = frame_rate {
      self.rc_state.new_frame_rate(frame_rate);
    }
    self.last_time_stamp_seen = Some(sample.time_stamp);
  }

  fn start_key_frame(&mut self, fi: &mut FrameInvariants) {
    fi.set_key_frame();
    self.golden.source_alt_ref_active = false;
    self.golden.reset_for_key_frame();
  }

  // A frame skipped by decimation or dropped by the rate control.
  fn drop_frame(
    &mut self, fi: &FrameInvariants, sample: &RawFrameSample,
  ) -> EncodedFrame {
    self.current_video_frame += 1;
    self.frames_since_key += 1;
    EncodedFrame {
      data: Vec::new(),
      time_stamp: sample.time_stamp,
      end_time_stamp: sample.end_time_stamp,
      frame_type: fi.frame_type,
      flags: FrameFlags::DROPPED,
      qindex: 0,
      stats: EncodeStats::default(),
    }
  }

  fn encode_frame(
    &mut self, mut fi: FrameInvariants, source: BufferId,
    sample: &RawFrameSample,
  ) -> Result<EncodedFrame, EncoderStatus> {
    let alt_ref_frame = !fi.show_frame;

    self.rc_state.begin_frame();
    fi.altref_sign_bias = self.golden.source_alt_ref_active;

    let forced_key = self.force_key_frame || sample.flags.force_key_frame;
    if !alt_ref_frame
      && key_frame_due(
        self.current_video_frame,
        forced_key,
        self.config.auto_key,
        self.frames_since_key,
        self.config.key_frame_frequency,
      )
    {
      self.start_key_frame(&mut fi);
    }

    let mut ref_frame_flags =
      Aliasing::from_store(&self.store).ref_frame_flags();
    if !alt_ref_frame {
      if let Some(refresh) = self.refresh_override {
        if !fi.is_key_frame() {
          fi.refresh = refresh;
        }
      }
      if let Some(mask) = self.ref_frame_mask {
        ref_frame_flags = ref_frame_flags & mask;
      }
      fi.refresh_entropy_probs = self.entropy_persistence.unwrap_or(true);
    }
    fi.ref_frame_flags = ref_frame_flags;
    if fi.error_resilient {
      fi.refresh_entropy_probs = false;
    }
    fi.probs = RefProbs::new(
      fi.frame_type,
      fi.refresh,
      &self.last_stats.ref_frame_usage,
      self.golden.frames_since_golden,
      self.golden.source_alt_ref_active,
    );

    if !alt_ref_frame && self.rc_state.decimate(fi.is_key_frame()) {
      trace!(
        "frame {} skipped, decimation factor {}, buffer {}",
        fi.frame_number,
        self.rc_state.decimation_factor,
        self.rc_state.buffer_level
      );
      return Ok(self.drop_frame(&fi, sample));
    }

    let last_pct = self.kf_history.last_frame_percent_intra;
    if !self.rc_state.pick_frame_size(
      &mut fi,
      &mut self.golden,
      last_pct,
      forced_key,
      self.frames_since_key,
    ) {
      debug!(
        "frame {} dropped, buffer {} of {}",
        fi.frame_number,
        self.rc_state.buffer_level,
        self.rc_state.optimal_buffer_level
      );
      return Ok(self.drop_frame(&fi, sample));
    }
    self.rc_state.set_active_quality(&fi);

    let saved = self.encoder.save_context();
    let mut search = QuantizerSearch::new(
      &self.rc_state,
      &fi,
      self.golden.source_alt_ref_active,
    );
    self.store.acquire_new();

    let stats = loop {
      fi.qindex = search.q();
      fi.zbin_over_quant = search.zbin_over_quant();
      let stats =
        self.encoder.encode_at(&fi, self.store.encode_buffers(source));
      let savings = self.encoder.estimate_entropy_savings(&fi);
      self.rc_state.projected_frame_size = (stats.size_bits - savings).max(0);

      if self.config.auto_key && !fi.is_key_frame() && !alt_ref_frame {
        let pct = stats.percent_intra(self.mb_count);
        if self.kf_history.decide_key_frame(
          &stats,
          pct,
          self.mb_count,
          &fi.speed,
          fi.refresh.golden,
        ) {
          debug!(
            "frame {} redone as a key frame, {}% intra",
            fi.frame_number, pct
          );
          self.rc_state.calc_auto_iframe_target_size(self.frames_since_key);
          self.start_key_frame(&mut fi);
          fi.ref_frame_flags = RefFrameFlags::NONE;
          self.encoder.restore_context(&saved);
          search.restart_as_key(&self.rc_state, &fi);
          continue;
        }
      }

      let allowed = recode_allowed(&fi);
      match search.evaluate(
        &mut self.rc_state,
        &fi,
        allowed,
        self.golden.source_alt_ref_active,
      ) {
        SearchStep::Accept => break stats,
        SearchStep::Recode => self.encoder.restore_context(&saved),
      }
    };

    let key = fi.is_key_frame();
    self.golden.gf_active_count = if key || fi.refresh.golden {
      self.mb_count as u32
    } else {
      stats.gf_active_mbs.min(self.mb_count as u32)
    };
    if !fi.error_resilient && fi.refresh.golden && !key {
      fi.copy_to_altref = CopyPolicy::FromOther;
    }

    // The reconstruction stays in NEW until the frame is packed.
    fi.loop_filter_level = self.encoder.pick_loop_filter_level(
      &fi,
      self.store.buffer(source),
      self.store.frame(RefSlot::New),
    );

    let mut data = Vec::new();
    let packed = {
      let level = fi.loop_filter_level;
      let fi = &fi;
      let encoder = &self.encoder;
      let recon = self.store.frame_mut(RefSlot::New);
      let data = &mut data;
      let ((), packed) = rayon::join(
        move || {
          if level > 0 {
            encoder.apply_loop_filter(fi, recon, level);
          }
          recon.pad();
        },
        move || encoder.pack_bitstream(fi, data),
      );
      packed
    };
    let size = match packed {
      Ok(size) => size,
      Err(e) => {
        self.encoder.restore_context(&saved);
        return Err(e);
      }
    };

    let shown = if fi.refresh.last {
      self.store.swap(RefSlot::Last, RefSlot::New);
      RefSlot::Last
    } else {
      RefSlot::New
    };
    update_references(
      &mut self.store,
      fi.frame_type,
      fi.refresh,
      fi.copy_to_golden,
      fi.copy_to_altref,
      shown,
      fi.error_resilient,
    );

    self.rc_state.update_after_encode(
      &fi,
      size,
      search.active_worst_qchanged(),
      self.frames_since_key,
    );

    if !fi.error_resilient {
      if self.config.play_alternate && fi.refresh.altref && !key {
        self.golden.update_alt_ref_frame_and_stats(&mut self.rc_state);
      } else {
        self.golden.update_golden_frame_and_stats(
          &mut self.rc_state,
          key,
          fi.refresh.golden,
          fi.refresh.altref,
          &stats.ref_frame_usage,
          self.fixed_q_alt_ref,
        );
      }
    }

    self.kf_history.frame_coded(key, stats.percent_intra(self.mb_count));
    if !fi.refresh_entropy_probs {
      self.encoder.restore_context(&saved);
    }

    if key {
      self.frames_since_key = 0;
      self.force_key_frame = false;
    }
    if fi.show_frame {
      self.current_video_frame += 1;
      self.frames_since_key += 1;
      self.refresh_override = None;
      self.ref_frame_mask = None;
      self.entropy_persistence = None;
    }
    self.last_stats = stats.clone();

    let mut flags = FrameFlags::NONE;
    if key {
      flags |= FrameFlags::KEY;
    }
    if fi.refresh.golden {
      flags |= FrameFlags::GOLDEN;
    }
    if fi.refresh.altref {
      flags |= FrameFlags::ALTREF;
    }
    if !fi.show_frame {
      flags |= FrameFlags::INVISIBLE;
    }

    let frame = EncodedFrame {
      data,
      time_stamp: sample.time_stamp,
      end_time_stamp: sample.end_time_stamp,
      frame_type: fi.frame_type,
      flags,
      qindex: fi.qindex,
      stats,
    };
    debug!(
      "{} - target {} - {} attempts",
      frame,
      self.rc_state.this_frame_target,
      search.attempts()
    );
    Ok(frame)
  }

  pub fn force_key_frame(&mut self) {
    self.force_key_frame = true;
  }

  pub fn set_reference_usage_mask(
    &mut self, mask: u32,
  ) -> Result<(), EncoderStatus> {
    let flags =
      RefFrameFlags::from_bits(mask).ok_or(EncoderStatus::InvalidReference)?;
    self.ref_frame_mask = Some(flags);
    Ok(())
  }

  pub fn update_reference(&mut self, mask: u32) -> Result<(), EncoderStatus> {
    let flags =
      RefFrameFlags::from_bits(mask).ok_or(EncoderStatus::InvalidReference)?;
    self.refresh_override = Some(RefreshFlags::from_mask(flags));
    Ok(())
  }

  pub fn update_entropy_persistence(&mut self, persist: bool) {
    self.entropy_persistence = Some(persist);
  }

  pub fn get_reference(
    &self, which: RefFrameFlags, dst: &mut Frame,
  ) -> Result<(), EncoderStatus> {
    let src = self.store.frame(slot_of(which)?);
    if !src.same_geometry(dst) {
      return Err(EncoderStatus::InvalidReference);
    }
    dst.copy_from(src);
    Ok(())
  }

  pub fn set_reference(
    &mut self, which: RefFrameFlags, src: &Frame,
  ) -> Result<(), EncoderStatus> {
    let slot = slot_of(which)?;
    if !self.store.frame(slot).same_geometry(src) {
      return Err(EncoderStatus::InvalidReference);
    }
    self.store.import(slot, src);
    Ok(())
  }

  pub fn request_alt_ref(&mut self) -> bool {
    if self.config.alt_ref_enabled() {
      self.golden.source_alt_ref_pending = true;
    }
    self.golden.source_alt_ref_pending
  }

  pub fn is_gf_update_needed(&mut self) -> bool {
    self.golden.take_update_recommendation()
  }

  pub fn rc_summary(&self) -> RCSummary {
    self.rc_state.summary()
  }
}

fn slot_of(which: RefFrameFlags) -> Result<RefSlot, EncoderStatus> {
  match which {
    RefFrameFlags::LAST => Ok(RefSlot::Last),
    RefFrameFlags::GOLD => Ok(RefSlot::Golden),
    RefFrameFlags::ALT => Ok(RefSlot::AltRef),
    _ => Err(EncoderStatus::InvalidReference),
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn single_reference_slots() {
    assert_eq!(slot_of(RefFrameFlags::GOLD), Ok(RefSlot::Golden));
    assert_eq!(
      slot_of(RefFrameFlags::LAST | RefFrameFlags::ALT),
      Err(EncoderStatus::InvalidReference)
    );
    assert_eq!(
      slot_of(RefFrameFlags::NONE),
      Err(EncoderStatus::InvalidReference)
    );
  }
}
