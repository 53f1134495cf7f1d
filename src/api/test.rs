// Copyright (c) 2018-2023, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use crate::api::*;
use crate::encoder::*;
use crate::frame::{Frame, RefSlot};
use crate::rate::estimate_bits_at_q;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use interpolate_name::interpolate_test;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

// 1/30 s in timestamp units.
const FRAME_DURATION: i64 = 333_333;

#[derive(Debug, Clone, Copy)]
enum SizeModel {
  /// What the rate model predicts, scaled by the frame complexity.
  Modelled,
  /// The same size whatever the quantizer.
  Constant(i64),
}

#[derive(Debug, Clone)]
struct Coded {
  fi: FrameInvariants,
  /// `encode_at` calls spent on the frame.
  attempts: u32,
}

type CodedLog = Arc<Mutex<Vec<Coded>>>;

struct MockEncoder {
  model: SizeModel,
  complexity: f64,
  /// Stands in for the entropy state: one step per encode attempt.
  context: u64,
  size_bits: i64,
  calls: AtomicU32,
  fail_pack: bool,
  log: CodedLog,
}

impl MockEncoder {
  fn new(model: SizeModel, log: CodedLog) -> Self {
    MockEncoder {
      model,
      complexity: 1.0,
      context: 0,
      size_bits: 0,
      calls: AtomicU32::new(0),
      fail_pack: false,
      log,
    }
  }
}

impl FrameEncoder for MockEncoder {
  type CodingContext = u64;

  fn save_context(&self) -> u64 {
    self.context
  }

  fn restore_context(&mut self, ctx: &u64) {
    self.context = *ctx;
  }

  fn encode_at(
    &mut self, fi: &FrameInvariants, bufs: EncodeBuffers<'_>,
  ) -> EncodeStats {
    *self.calls.get_mut() += 1;
    self.context += 1;
    bufs.recon.copy_from(bufs.source);

    let key = fi.is_key_frame();
    self.size_bits = match self.model {
      SizeModel::Modelled => {
        let bits = estimate_bits_at_q(
          key,
          fi.qindex as i32,
          fi.mb_count as i64,
          self.complexity,
        );
        bits * 256 / (256 + fi.zbin_over_quant as i64)
      }
      SizeModel::Constant(bits) => bits,
    };

    let mbs = fi.mb_count as u32;
    let mut ref_frame_usage = [0; MAX_REF_FRAMES];
    ref_frame_usage[if key { INTRA_FRAME } else { LAST_FRAME }] = mbs;
    EncodeStats {
      size_bits: self.size_bits,
      ref_frame_usage,
      zero_motion_mbs: mbs / 2,
      gf_active_mbs: mbs,
      ..Default::default()
    }
  }

  fn estimate_entropy_savings(&self, _fi: &FrameInvariants) -> i64 {
    0
  }

  fn pick_loop_filter_level(
    &self, fi: &FrameInvariants, _source: &Frame, _recon: &Frame,
  ) -> u8 {
    fi.qindex / 8
  }

  fn pack_bitstream(
    &self, fi: &FrameInvariants, out: &mut Vec<u8>,
  ) -> Result<usize, EncoderStatus> {
    if self.fail_pack {
      return Err(EncoderStatus::Failure);
    }
    let attempts = self.calls.swap(0, Ordering::Relaxed);
    out.resize(((self.size_bits + 7) / 8).max(1) as usize, 0);
    out[0] = fi.qindex;
    self.log.lock().unwrap().push(Coded { fi: fi.clone(), attempts });
    Ok(out.len())
  }
}

fn qcif() -> EncoderConfig {
  EncoderConfig { width: 176, height: 144, ..Default::default() }
}

fn setup(
  enc: EncoderConfig, rc: RateControlConfig, model: SizeModel,
) -> (Context<MockEncoder>, CodedLog) {
  let _ = pretty_env_logger::try_init();
  let log = CodedLog::default();
  let cfg = Config::new()
    .with_encoder_config(enc)
    .with_rate_control(rc)
    .with_threads(1);
  let ctx = cfg.new_context(MockEncoder::new(model, log.clone())).unwrap();
  (ctx, log)
}

fn fill_frame(ra: &mut ChaCha8Rng, frame: &mut Frame) {
  for plane in frame.planes.iter_mut() {
    let stride = plane.cfg.stride;
    for row in plane.data.chunks_mut(stride) {
      for pixel in row {
        *pixel = ra.gen();
      }
    }
  }
}

fn fill_frame_const(frame: &mut Frame, value: u8) {
  for plane in frame.planes.iter_mut() {
    plane.data.iter_mut().for_each(|v| *v = value);
  }
}

fn send(
  ctx: &mut Context<MockEncoder>, frame: &Frame, index: i64,
) -> Result<(), EncoderStatus> {
  ctx.receive_raw_frame(
    frame,
    RawFrameFlags::default(),
    index * FRAME_DURATION,
    (index + 1) * FRAME_DURATION,
  )
}

fn drain<F>(ctx: &mut Context<MockEncoder>, flush: bool, on_frame: &mut F)
where
  F: FnMut(&mut Context<MockEncoder>, EncodedFrame),
{
  loop {
    match ctx.get_compressed_data(flush) {
      Ok(pkt) => on_frame(ctx, pkt),
      Err(EncoderStatus::NeedMoreData) => break,
      Err(e) => panic!("unexpected status {:?}", e),
    }
  }
}

// Feeds `count` random frames, then flushes.
fn encode_stream<F>(
  ctx: &mut Context<MockEncoder>, count: i64, seed: u64, mut on_frame: F,
) where
  F: FnMut(&mut Context<MockEncoder>, EncodedFrame),
{
  let mut ra = ChaCha8Rng::seed_from_u64(seed);
  let mut frame = ctx.new_frame();
  for i in 0..count {
    fill_frame(&mut ra, &mut frame);
    send(ctx, &frame, i).unwrap();
    drain(ctx, false, &mut on_frame);
  }
  drain(ctx, true, &mut on_frame);
}

const FULL_RANGE: (u8, u8) = (4, 63);

#[interpolate_test(
  vbr_modelled,
  RateControlMode::Vbr,
  SizeModel::Modelled,
  FULL_RANGE,
  false
)]
#[interpolate_test(
  cbr_modelled,
  RateControlMode::Cbr,
  SizeModel::Modelled,
  FULL_RANGE,
  false
)]
#[interpolate_test(
  vbr_oversized,
  RateControlMode::Vbr,
  SizeModel::Constant(1 << 22),
  FULL_RANGE,
  false
)]
#[interpolate_test(
  cbr_undersized,
  RateControlMode::Cbr,
  SizeModel::Constant(64),
  FULL_RANGE,
  false
)]
#[interpolate_test(
  vbr_narrow,
  RateControlMode::Vbr,
  SizeModel::Modelled,
  (50, 55),
  false
)]
#[interpolate_test(
  cbr_narrow_full_buffer,
  RateControlMode::Cbr,
  SizeModel::Modelled,
  (58, 63),
  true
)]
#[interpolate_test(
  cbr_high_min_undersized,
  RateControlMode::Cbr,
  SizeModel::Constant(64),
  (40, 63),
  true
)]
#[interpolate_test(
  cbr_single_q_full_buffer,
  RateControlMode::Cbr,
  SizeModel::Modelled,
  (63, 63),
  true
)]
fn quality_bounds_and_attempts(
  mode: RateControlMode, model: SizeModel, range: (u8, u8),
  full_buffer: bool,
) {
  let mut rc = RateControlConfig::new()
    .with_mode(mode)
    .with_bitrate(300)
    .with_quantizer_range(range.0, range.1);
  if full_buffer {
    rc = rc.with_buffer(6000, 5000, 6000);
  }
  let (mut ctx, log) = setup(qcif(), rc, model);
  let best = ctx.inner.rc_state.best_quality;
  let worst = ctx.inner.rc_state.worst_quality;
  let mut ra = ChaCha8Rng::seed_from_u64(11);

  encode_stream(&mut ctx, 200, 1, |ctx, pkt| {
    ctx.inner.encoder.complexity = ra.gen_range(0.25..4.0);
    if pkt.is_dropped() {
      return;
    }
    let s = ctx.rc_summary();
    assert!(
      best <= s.active_best_quality
        && s.active_best_quality <= s.active_worst_quality
        && s.active_worst_quality <= worst,
      "{}: {} <= {} <= {} <= {}",
      pkt,
      best,
      s.active_best_quality,
      s.active_worst_quality,
      worst
    );
  });

  // One extra attempt covers a redo as a key frame.
  let cap = (2 * (worst - best) + 20) as u32 + 1;
  let log = log.lock().unwrap();
  assert_eq!(log.len(), 200);
  for coded in log.iter() {
    assert!(coded.attempts >= 1);
    let q = coded.fi.qindex as i32;
    assert!(
      best <= q && q <= worst,
      "frame {} coded at {} outside {}..={}",
      coded.fi.frame_number,
      q,
      best,
      worst
    );
    assert!(
      coded.attempts <= cap,
      "frame {} took {} attempts",
      coded.fi.frame_number,
      coded.attempts
    );
  }
}

#[test]
fn recodes_roll_back_the_coding_context() {
  let rc = RateControlConfig::new().with_bitrate(300);
  let (mut ctx, log) = setup(qcif(), rc, SizeModel::Modelled);
  let mut coded = 0;
  encode_stream(&mut ctx, 30, 2, |ctx, pkt| {
    ctx.inner.encoder.complexity =
      if pkt.time_stamp % 2 == 0 { 3.0 } else { 0.3 };
    coded += 1;
    // Each committed frame advances the state exactly once.
    assert_eq!(ctx.inner.encoder.context, coded);
  });
  let attempts: u32 = log.lock().unwrap().iter().map(|c| c.attempts).sum();
  assert!(attempts > 30, "the stream was never recoded");
}

#[interpolate_test(vbr, RateControlMode::Vbr)]
#[interpolate_test(cbr, RateControlMode::Cbr)]
fn buffer_level_matches_running_sum(mode: RateControlMode) {
  let enc =
    EncoderConfig { lag_in_frames: 5, play_alternate: true, ..qcif() };
  let rc = RateControlConfig::new().with_mode(mode).with_bitrate(300);
  let (mut ctx, _) = setup(enc, rc, SizeModel::Modelled);
  let mut expected = ctx.rc_summary().buffer_level;
  let mut hidden = 0;

  encode_stream(&mut ctx, 60, 3, |ctx, pkt| {
    let s = ctx.rc_summary();
    let bits = pkt.data.len() as i64 * 8;
    if pkt.is_dropped() {
      expected += s.av_per_frame_bandwidth;
    } else if !pkt.is_shown() {
      hidden += 1;
      expected -= bits;
    } else {
      expected += s.av_per_frame_bandwidth - bits;
    }
    assert_eq!(s.buffer_level, expected, "after {}", pkt);
    if pkt.frame_type == FrameType::KEY {
      assert!(ctx.request_alt_ref());
    }
  });
  assert_eq!(hidden, 1);
}

#[test]
fn buffer_level_counts_dropped_frames() {
  let enc = EncoderConfig { auto_key: false, ..qcif() };
  let rc = RateControlConfig::new()
    .with_mode(RateControlMode::Cbr)
    .with_bitrate(300)
    .with_frame_dropping(50);
  let (mut ctx, _) = setup(enc, rc, SizeModel::Modelled);
  let av = ctx.rc_summary().av_per_frame_bandwidth;
  ctx.inner.encoder.model = SizeModel::Constant(4 * av);
  let mut expected = ctx.rc_summary().buffer_level;
  let mut dropped = 0;

  encode_stream(&mut ctx, 120, 4, |ctx, pkt| {
    let s = ctx.rc_summary();
    if pkt.is_dropped() {
      dropped += 1;
      expected += s.av_per_frame_bandwidth;
    } else {
      expected += s.av_per_frame_bandwidth - pkt.data.len() as i64 * 8;
    }
    assert_eq!(s.buffer_level, expected, "after {}", pkt);
  });
  assert!(dropped > 0);
}

#[test]
fn lookahead_full() {
  let enc = EncoderConfig { lag_in_frames: 3, ..qcif() };
  let (mut ctx, _) =
    setup(enc, RateControlConfig::new(), SizeModel::Modelled);
  let frame = ctx.new_frame();

  assert_eq!(
    ctx.get_compressed_data(false).err(),
    Some(EncoderStatus::NeedMoreData)
  );
  for i in 0..3 {
    send(&mut ctx, &frame, i).unwrap();
  }
  assert_eq!(send(&mut ctx, &frame, 3), Err(EncoderStatus::EnoughData));
  assert_eq!(ctx.queued_frames(), 3);

  let pkt = ctx.get_compressed_data(false).unwrap();
  assert_eq!(pkt.time_stamp, 0);
  assert_eq!(
    ctx.get_compressed_data(false).err(),
    Some(EncoderStatus::NeedMoreData)
  );
  send(&mut ctx, &frame, 3).unwrap();
}

#[test]
fn display_order_with_one_alt_ref() {
  let enc = EncoderConfig {
    lag_in_frames: 5,
    play_alternate: true,
    alt_freq: 3,
    arnr_max_frames: 3,
    ..qcif()
  };
  let (mut ctx, log) =
    setup(enc, RateControlConfig::new(), SizeModel::Modelled);
  let mut shown = Vec::new();
  let mut hidden = Vec::new();

  encode_stream(&mut ctx, 20, 5, |ctx, pkt| {
    if pkt.is_shown() {
      shown.push(pkt.time_stamp / FRAME_DURATION);
    } else {
      assert!(pkt.flags.contains(FrameFlags::ALTREF));
      hidden.push(pkt.time_stamp / FRAME_DURATION);
    }
    if pkt.frame_type == FrameType::KEY {
      ctx.request_alt_ref();
    }
  });

  assert_eq!(shown, (0..20).collect::<Vec<_>>());
  // Two frames are left before the golden refresh when it is built.
  assert_eq!(hidden, vec![3]);

  let log = log.lock().unwrap();
  let src: Vec<u64> = log
    .iter()
    .filter(|c| c.fi.is_src_frame_alt_ref)
    .map(|c| c.fi.frame_number)
    .collect();
  assert_eq!(src, vec![3]);
  let next: Vec<u64> = log
    .iter()
    .filter(|c| c.fi.is_next_src_alt_ref)
    .map(|c| c.fi.frame_number)
    .collect();
  assert_eq!(next, vec![2]);
}

#[test]
fn force_key_frame_is_idempotent() {
  fn run(requests: usize) -> Vec<(FrameType, u8, usize)> {
    let (mut ctx, _) =
      setup(qcif(), RateControlConfig::new(), SizeModel::Modelled);
    let mut out = Vec::new();
    let mut index = 0;
    encode_stream(&mut ctx, 12, 6, |ctx, pkt| {
      out.push((pkt.frame_type, pkt.qindex, pkt.data.len()));
      index += 1;
      if index == 5 {
        for _ in 0..requests {
          ctx.force_key_frame();
        }
      }
    });
    out
  }

  let once = run(1);
  assert_eq!(once, run(2));
  let keys: Vec<usize> = once
    .iter()
    .enumerate()
    .filter(|(_, f)| f.0 == FrameType::KEY)
    .map(|(i, _)| i)
    .collect();
  assert_eq!(keys, vec![0, 5]);
}

#[test]
fn raw_frame_key_flag() {
  let (mut ctx, _) =
    setup(qcif(), RateControlConfig::new(), SizeModel::Modelled);
  let frame = ctx.new_frame();
  let key = RawFrameFlags { force_key_frame: true };
  let mut types = Vec::new();
  for i in 0..4 {
    let flags = if i == 2 { key } else { RawFrameFlags::default() };
    let ts = i * FRAME_DURATION;
    ctx.receive_raw_frame(&frame, flags, ts, ts + FRAME_DURATION).unwrap();
    types.push(ctx.get_compressed_data(false).unwrap().frame_type);
  }
  use FrameType::*;
  assert_eq!(types, vec![KEY, INTER, KEY, INTER]);
}

#[test]
fn first_frames_at_1200_kbps() {
  let enc = EncoderConfig {
    width: 352,
    height: 288,
    time_base: Rational::new(1, 30),
    ..Default::default()
  };
  let rc = RateControlConfig::new().with_bitrate(1200);
  let (mut ctx, _) = setup(enc, rc, SizeModel::Modelled);
  let mut ra = ChaCha8Rng::seed_from_u64(7);
  let mut frame = ctx.new_frame();

  for i in 0..3 {
    fill_frame(&mut ra, &mut frame);
    send(&mut ctx, &frame, i).unwrap();
    let pkt = ctx.get_compressed_data(false).unwrap();
    let s = ctx.rc_summary();
    if i == 0 {
      assert_eq!(pkt.frame_type, FrameType::KEY);
      assert_eq!(s.this_frame_target, 600_000);
      continue;
    }
    assert_eq!(pkt.frame_type, FrameType::INTER);
    assert!(!pkt.is_dropped());
    let target = s.this_frame_target;
    let bits = pkt.data.len() as i64 * 8;
    let q = pkt.qindex as i32;
    assert!(
      (target * 5 / 8..=target * 11 / 8).contains(&bits)
        || q == s.active_best_quality
        || q == s.active_worst_quality,
      "{} bits for a target of {} at q {}",
      bits,
      target,
      q
    );
  }
}

#[test]
fn frame_rate_from_time_stamps() {
  let (mut ctx, _) =
    setup(qcif(), RateControlConfig::new(), SizeModel::Modelled);
  let frame = ctx.new_frame();
  for i in 0..10 {
    let ts = i * 2 * FRAME_DURATION;
    ctx
      .receive_raw_frame(
        &frame,
        RawFrameFlags::default(),
        ts,
        ts + 2 * FRAME_DURATION,
      )
      .unwrap();
    ctx.get_compressed_data(false).unwrap();
  }
  let s = ctx.rc_summary();
  assert!((s.frame_rate - 15.0).abs() < 0.01, "{}", s.frame_rate);
  assert_eq!(s.av_per_frame_bandwidth, (256_000.0 / s.frame_rate) as i64);
}

#[test]
fn golden_refresh_then_alt_ref() {
  let enc = EncoderConfig {
    lag_in_frames: 4,
    play_alternate: true,
    alt_freq: 3,
    arnr_max_frames: 3,
    ..qcif()
  };
  let rc = RateControlConfig::new().with_fixed_quantizer(20);
  let (mut ctx, log) = setup(enc, rc, SizeModel::Modelled);
  let mut ra = ChaCha8Rng::seed_from_u64(8);
  let mut frame = ctx.new_frame();
  let mut push = |ctx: &mut Context<MockEncoder>, i| {
    fill_frame(&mut ra, &mut frame);
    send(ctx, &frame, i)
  };
  let aliasing =
    |ctx: &Context<MockEncoder>| Aliasing::from_store(&ctx.inner.store);

  for i in 0..4 {
    push(&mut ctx, i).unwrap();
  }
  assert_eq!(push(&mut ctx, 4), Err(EncoderStatus::EnoughData));

  let key = ctx.get_compressed_data(false).unwrap();
  assert_eq!(
    key.flags,
    FrameFlags::KEY | FrameFlags::GOLDEN | FrameFlags::ALTREF
  );
  let a = aliasing(&ctx);
  assert!(a.gold_is_last && a.alt_is_last && a.gold_is_alt);

  // A golden refresh on its own moves GOLDEN away from ALTREF.
  push(&mut ctx, 4).unwrap();
  ctx.update_reference(3).unwrap();
  let golden = ctx.get_compressed_data(false).unwrap();
  assert_eq!(golden.flags, FrameFlags::GOLDEN);
  let a = aliasing(&ctx);
  assert!(a.gold_is_last);
  assert!(!a.gold_is_alt);
  assert!(!a.alt_is_last);

  // The golden refresh of a fixed quantizer stream queues an alt-ref.
  push(&mut ctx, 5).unwrap();
  let alt = ctx.get_compressed_data(false).unwrap();
  assert_eq!(alt.flags, FrameFlags::ALTREF | FrameFlags::INVISIBLE);
  assert_eq!(alt.time_stamp, 4 * FRAME_DURATION);
  assert!(!aliasing(&ctx).gold_is_alt);

  let next = ctx.get_compressed_data(false).unwrap();
  assert_eq!(next.time_stamp, 2 * FRAME_DURATION);
  assert!(next.is_shown());

  let log = log.lock().unwrap();
  assert_eq!(log[1].fi.ref_frame_flags, RefFrameFlags::LAST);
  assert_eq!(log[1].fi.copy_to_altref, CopyPolicy::FromOther);
  assert_eq!(log[2].fi.refresh, RefreshFlags::ALTREF_ONLY);
  assert!(!log[2].fi.show_frame);
  assert!(log[3].fi.ref_frame_flags.contains(RefFrameFlags::ALT));
  assert!(log[3].fi.altref_sign_bias);
}

#[test]
fn golden_and_alt_ref_refreshed_together() {
  let (mut ctx, log) =
    setup(qcif(), RateControlConfig::new(), SizeModel::Modelled);
  let frame = ctx.new_frame();
  let aliasing =
    |ctx: &Context<MockEncoder>| Aliasing::from_store(&ctx.inner.store);

  send(&mut ctx, &frame, 0).unwrap();
  ctx.get_compressed_data(false).unwrap();

  send(&mut ctx, &frame, 1).unwrap();
  ctx.update_reference(7).unwrap();
  let both = ctx.get_compressed_data(false).unwrap();
  assert!(both.flags.contains(FrameFlags::GOLDEN | FrameFlags::ALTREF));
  assert!(aliasing(&ctx).gold_is_alt);

  send(&mut ctx, &frame, 2).unwrap();
  ctx.update_reference(1).unwrap();
  ctx.get_compressed_data(false).unwrap();
  let a = aliasing(&ctx);
  assert!(a.gold_is_alt);
  assert!(!a.gold_is_last);

  // The override only lasts one frame.
  send(&mut ctx, &frame, 3).unwrap();
  let plain = ctx.get_compressed_data(false).unwrap();
  assert_eq!(plain.flags, FrameFlags::NONE);

  let log = log.lock().unwrap();
  assert_eq!(log[2].fi.ref_frame_flags, RefFrameFlags::LAST);
  assert_eq!(
    log[3].fi.ref_frame_flags,
    RefFrameFlags::LAST | RefFrameFlags::GOLD
  );
}

#[test]
fn buffer_underflow_never_locks_out() {
  let enc = EncoderConfig { auto_key: false, ..qcif() };
  let rc = RateControlConfig::new()
    .with_mode(RateControlMode::Cbr)
    .with_bitrate(300)
    .with_frame_dropping(50);
  let (mut ctx, _) = setup(enc, rc, SizeModel::Modelled);
  let av = ctx.rc_summary().av_per_frame_bandwidth;
  ctx.inner.encoder.model = SizeModel::Constant(4 * av);

  let mut run = 0;
  let mut longest_run = 0;
  let mut coded = 0;
  let mut dropped = 0;
  encode_stream(&mut ctx, 300, 9, |_, pkt| {
    if pkt.is_dropped() {
      assert!(pkt.data.is_empty());
      dropped += 1;
      run += 1;
      longest_run = longest_run.max(run);
    } else {
      coded += 1;
      run = 0;
    }
  });

  assert!(dropped > 0);
  assert!(coded > 30, "only {} frames coded", coded);
  assert!(longest_run < 40, "{} frames dropped in a row", longest_run);
}

#[test]
fn entropy_persistence_is_one_shot() {
  let (mut ctx, _) =
    setup(qcif(), RateControlConfig::new(), SizeModel::Modelled);
  let frame = ctx.new_frame();

  send(&mut ctx, &frame, 0).unwrap();
  ctx.get_compressed_data(false).unwrap();
  let after_key = ctx.inner.encoder.context;
  assert_eq!(after_key, 1);

  ctx.update_entropy_persistence(false);
  send(&mut ctx, &frame, 1).unwrap();
  ctx.get_compressed_data(false).unwrap();
  assert_eq!(ctx.inner.encoder.context, after_key);

  send(&mut ctx, &frame, 2).unwrap();
  ctx.get_compressed_data(false).unwrap();
  assert_eq!(ctx.inner.encoder.context, after_key + 1);
}

#[test]
fn reference_mask() {
  let (mut ctx, log) =
    setup(qcif(), RateControlConfig::new(), SizeModel::Modelled);
  let frame = ctx.new_frame();

  assert_eq!(
    ctx.set_reference_usage_mask(8),
    Err(EncoderStatus::InvalidReference)
  );
  assert_eq!(ctx.update_reference(9), Err(EncoderStatus::InvalidReference));

  for i in 0..2 {
    send(&mut ctx, &frame, i).unwrap();
    ctx.get_compressed_data(false).unwrap();
  }
  // GOLDEN is distinct from LAST after a golden only refresh.
  ctx.update_reference(2).unwrap();
  send(&mut ctx, &frame, 2).unwrap();
  ctx.get_compressed_data(false).unwrap();

  ctx.set_reference_usage_mask(RefFrameFlags::GOLD.bits() as u32).unwrap();
  send(&mut ctx, &frame, 3).unwrap();
  ctx.get_compressed_data(false).unwrap();
  send(&mut ctx, &frame, 4).unwrap();
  ctx.get_compressed_data(false).unwrap();

  let log = log.lock().unwrap();
  let golden_only = RefreshFlags::from_mask(RefFrameFlags::GOLD);
  assert_eq!(log[2].fi.refresh, golden_only);
  assert_eq!(log[3].fi.ref_frame_flags, RefFrameFlags::GOLD);
  assert!(log[4].fi.ref_frame_flags.contains(RefFrameFlags::LAST));
}

#[test]
fn reference_round_trip() {
  let (mut ctx, _) =
    setup(qcif(), RateControlConfig::new(), SizeModel::Modelled);
  let mut frame = ctx.new_frame();
  fill_frame_const(&mut frame, 60);
  send(&mut ctx, &frame, 0).unwrap();
  ctx.get_compressed_data(false).unwrap();

  let mut gray = ctx.new_frame();
  fill_frame_const(&mut gray, 128);
  ctx.set_reference(RefFrameFlags::GOLD, &gray).unwrap();

  let mut out = ctx.new_frame();
  ctx.get_reference(RefFrameFlags::GOLD, &mut out).unwrap();
  assert_eq!(out, gray);
  // LAST shared its buffer with GOLDEN and keeps its pixels.
  ctx.get_reference(RefFrameFlags::LAST, &mut out).unwrap();
  assert_eq!(out, frame);

  assert_eq!(
    ctx.get_reference(RefFrameFlags::LAST | RefFrameFlags::GOLD, &mut out),
    Err(EncoderStatus::InvalidReference)
  );
  let mut small = Frame::new(64, 64);
  assert_eq!(
    ctx.get_reference(RefFrameFlags::ALT, &mut small),
    Err(EncoderStatus::InvalidReference)
  );
  assert_eq!(
    ctx.set_reference(RefFrameFlags::ALT, &small),
    Err(EncoderStatus::InvalidReference)
  );
}

#[test]
fn mismatched_raw_frame() {
  let (mut ctx, _) =
    setup(qcif(), RateControlConfig::new(), SizeModel::Modelled);
  let frame = Frame::new(64, 48);
  assert_eq!(send(&mut ctx, &frame, 0), Err(EncoderStatus::Failure));
  assert_eq!(ctx.queued_frames(), 0);
}

#[test]
fn flush_refuses_new_frames() {
  let enc = EncoderConfig { lag_in_frames: 4, ..qcif() };
  let (mut ctx, _) =
    setup(enc, RateControlConfig::new(), SizeModel::Modelled);
  let frame = ctx.new_frame();
  send(&mut ctx, &frame, 0).unwrap();
  send(&mut ctx, &frame, 1).unwrap();

  assert_eq!(
    ctx.get_compressed_data(false).err(),
    Some(EncoderStatus::NeedMoreData)
  );
  assert_eq!(ctx.get_compressed_data(true).unwrap().time_stamp, 0);
  assert_eq!(send(&mut ctx, &frame, 2), Err(EncoderStatus::EnoughData));
  assert_eq!(
    ctx.get_compressed_data(false).unwrap().time_stamp,
    FRAME_DURATION
  );
  assert_eq!(
    ctx.get_compressed_data(false).err(),
    Some(EncoderStatus::NeedMoreData)
  );
}

#[test]
fn pack_failure_is_reported() {
  let enc = EncoderConfig { lag_in_frames: 2, ..qcif() };
  let rc = RateControlConfig::new()
    .with_mode(RateControlMode::Cbr)
    .with_bitrate(300);
  let (mut ctx, log) = setup(enc, rc, SizeModel::Modelled);
  let mut frame = ctx.new_frame();
  for i in 0..3 {
    fill_frame_const(&mut frame, 40 + i as u8);
    send(&mut ctx, &frame, i).unwrap();
    drain(&mut ctx, false, &mut |_: &mut Context<MockEncoder>, _| {});
  }
  send(&mut ctx, &frame, 3).unwrap();

  let last = ctx.inner.store.id(RefSlot::Last);
  let golden = ctx.inner.store.id(RefSlot::Golden);
  let before = ctx.rc_summary();
  let queued = ctx.queued_frames();
  let shown = ctx.inner.current_video_frame;
  let context = ctx.inner.encoder.context;

  ctx.inner.encoder.fail_pack = true;
  assert_eq!(
    ctx.get_compressed_data(false).err(),
    Some(EncoderStatus::Failure)
  );
  assert_eq!(ctx.inner.store.id(RefSlot::Last), last);
  assert_eq!(ctx.inner.store.id(RefSlot::Golden), golden);
  assert_eq!(ctx.rc_summary().buffer_level, before.buffer_level);
  assert_eq!(ctx.queued_frames(), queued);
  assert_eq!(ctx.inner.current_video_frame, shown);
  assert_eq!(ctx.inner.encoder.context, context);

  // The same frame goes out once packing works again.
  ctx.inner.encoder.fail_pack = false;
  let pkt = ctx.get_compressed_data(false).unwrap();
  assert_eq!(pkt.time_stamp, 2 * FRAME_DURATION);
  assert_ne!(ctx.inner.store.id(RefSlot::Last), last);
  assert_eq!(log.lock().unwrap().len(), 3);
}

#[test]
fn alt_ref_needs_lag() {
  let enc = EncoderConfig { play_alternate: true, ..qcif() };
  let (mut ctx, _) =
    setup(enc, RateControlConfig::new(), SizeModel::Modelled);
  assert!(!ctx.request_alt_ref());
  assert!(!ctx.is_gf_update_needed());
}
