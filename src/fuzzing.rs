// Copyright (c) 2019-2023, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use libfuzzer_sys::arbitrary::{Arbitrary, Error, Unstructured};

use crate::prelude::*;
use crate::rate::estimate_bits_at_q;

// Adding new fuzz targets
//
// 1. Add a function to this file which looks like this:
//
//    pub fn fuzz_something(data: Data) {
//      // Invoke everything you need.
//      //
//      // Your function may accept a value of any type that implements
//      // Arbitrary. Derive Debug for the structures you create with
//      // arbitrary data.
//    }
//
// 2. cargo fuzz add something
// 3. Copy the contents of any other .rs file from fuzz/fuzz_targets/ into the
//    newly created fuzz/fuzz_targets/something.rs and change the function
//    being called to fuzz_something.
//
// Now you can fuzz the new target with cargo fuzz.

/// Pixel pipeline stand-in sizing frames from their difference with LAST.
#[derive(Debug, Default)]
pub struct SyntheticEncoder {
  state: u32,
  size_bits: i64,
}

fn mean_abs_diff(a: &Frame, b: &Frame) -> f64 {
  let (pa, pb) = (&a.planes[0], &b.planes[0]);
  let mut sum = 0u64;
  for (ra, rb) in pa.rows_iter().zip(pb.rows_iter()) {
    sum += ra.iter().zip(rb).map(|(&x, &y)| x.abs_diff(y) as u64).sum::<u64>();
  }
  sum as f64 / (pa.cfg.width * pa.cfg.height).max(1) as f64
}

impl FrameEncoder for SyntheticEncoder {
  type CodingContext = u32;

  fn save_context(&self) -> u32 {
    self.state
  }

  fn restore_context(&mut self, ctx: &u32) {
    self.state = *ctx;
  }

  fn encode_at(
    &mut self, fi: &FrameInvariants, bufs: EncodeBuffers<'_>,
  ) -> EncodeStats {
    self.state = self.state.wrapping_add(1);
    let key = fi.is_key_frame();
    let complexity = if key {
      1.0
    } else {
      (mean_abs_diff(bufs.source, bufs.last) / 8.0).clamp(0.05, 8.0)
    };
    bufs.recon.copy_from(bufs.source);

    self.size_bits =
      estimate_bits_at_q(key, fi.qindex as i32, fi.mb_count as i64, complexity)
        .max(8);
    let mbs = fi.mb_count as u32;
    let intra = if key { mbs } else { (complexity * 8.0) as u32 % mbs.max(1) };
    EncodeStats {
      size_bits: self.size_bits,
      ref_frame_usage: [intra, mbs - intra, 0, 0],
      intra_error: (complexity * 1000.0) as i64,
      prediction_error: (complexity * 800.0) as i64,
      zero_motion_mbs: mbs / 2,
      gf_active_mbs: mbs / 2,
    }
  }

  fn estimate_entropy_savings(&self, _fi: &FrameInvariants) -> i64 {
    0
  }

  fn pick_loop_filter_level(
    &self, fi: &FrameInvariants, _source: &Frame, _recon: &Frame,
  ) -> u8 {
    fi.qindex >> 2
  }

  fn pack_bitstream(
    &self, fi: &FrameInvariants, out: &mut Vec<u8>,
  ) -> Result<usize, EncoderStatus> {
    out.clear();
    out.push(fi.qindex);
    out.resize(((self.size_bits + 7) >> 3) as usize, 0);
    Ok(out.len())
  }
}

#[derive(Debug)]
pub struct ArbitraryConfig {
  config: Config,
}

#[inline]
fn arbitrary_rational(u: &mut Unstructured<'_>) -> Result<Rational, Error> {
  Ok(Rational::new(Arbitrary::arbitrary(u)?, Arbitrary::arbitrary(u)?))
}

fn arbitrary_rate_control(
  u: &mut Unstructured<'_>,
) -> Result<RateControlConfig, Error> {
  let mode = *u.choose(&[RateControlMode::Vbr, RateControlMode::Cbr])?;
  let mut rc = RateControlConfig::new()
    .with_mode(mode)
    .with_bitrate(Arbitrary::arbitrary(u)?)
    .with_quantizer_range(
      Arbitrary::arbitrary(u)?,
      Arbitrary::arbitrary(u)?,
    )
    .with_undershoot(u.int_in_range(0..=100)?)
    .with_overshoot(u.int_in_range(0..=100)?)
    .with_buffer(
      Arbitrary::arbitrary(u)?,
      Arbitrary::arbitrary(u)?,
      Arbitrary::arbitrary(u)?,
    );
  if Arbitrary::arbitrary(u)? {
    rc = rc.with_fixed_quantizer(Arbitrary::arbitrary(u)?);
  }
  if Arbitrary::arbitrary(u)? {
    rc = rc.with_frame_dropping(u.int_in_range(0..=100)?);
  }
  Ok(rc)
}

impl Arbitrary<'_> for ArbitraryConfig {
  fn arbitrary(u: &mut Unstructured<'_>) -> Result<Self, Error> {
    let mode = *u.choose(&[
      EncoderMode::BestQuality,
      EncoderMode::GoodQuality,
      EncoderMode::Realtime,
    ])?;
    let mut enc =
      EncoderConfig::with_speed_preset(mode, Arbitrary::arbitrary(u)?);
    enc.width = Arbitrary::arbitrary(u)?;
    enc.height = Arbitrary::arbitrary(u)?;
    enc.time_base = arbitrary_rational(u)?;
    enc.error_resilient = Arbitrary::arbitrary(u)?;
    enc.sharpness = Arbitrary::arbitrary(u)?;
    enc.auto_key = Arbitrary::arbitrary(u)?;
    enc.key_frame_frequency = Arbitrary::arbitrary(u)?;
    enc.auto_gold = Arbitrary::arbitrary(u)?;
    enc.alt_freq = Arbitrary::arbitrary(u)?;
    enc.lag_in_frames = Arbitrary::arbitrary(u)?;
    enc.play_alternate = Arbitrary::arbitrary(u)?;
    enc.arnr_max_frames = Arbitrary::arbitrary(u)?;
    enc.arnr_strength = Arbitrary::arbitrary(u)?;
    let config = Config::new()
      .with_encoder_config(enc)
      .with_rate_control(arbitrary_rate_control(u)?)
      .with_threads(1);
    Ok(Self { config })
  }
}

pub fn fuzz_construct_context(arbitrary: ArbitraryConfig) {
  let _ = arbitrary.config.new_context(SyntheticEncoder::default());
}

fn encode_frames(
  ctx: &mut Context<SyntheticEncoder>, frames: impl Iterator<Item = Frame>,
) -> Result<(), EncoderStatus> {
  let duration = 10_000_000 / 30;
  for (i, frame) in frames.enumerate() {
    let ts = i as i64 * duration;
    ctx.receive_raw_frame(&frame, RawFrameFlags::default(), ts, ts + duration)?;
    loop {
      match ctx.get_compressed_data(false) {
        Ok(pkt) => debug!("{}", pkt),
        Err(EncoderStatus::NeedMoreData) => break,
        Err(e) => return Err(e),
      }
    }
  }

  loop {
    match ctx.get_compressed_data(true) {
      Ok(pkt) => debug!("{}", pkt),
      Err(EncoderStatus::NeedMoreData) => break,
      Err(e) => return Err(e),
    }
  }
  Ok(())
}

#[derive(Debug)]
pub struct ArbitraryEncoder {
  config: Config,
  frame_count: u8,
  force_key_at: Option<u8>,
  pixels: Box<[u8]>,
}

impl Arbitrary<'_> for ArbitraryEncoder {
  fn arbitrary(u: &mut Unstructured<'_>) -> Result<Self, Error> {
    let mode = *u.choose(&[EncoderMode::GoodQuality, EncoderMode::Realtime])?;
    let enc = EncoderConfig {
      width: u.int_in_range(16..=256)?,
      height: u.int_in_range(16..=256)?,
      time_base: Rational::new(1, u.int_in_range(1..=60)?),
      error_resilient: Arbitrary::arbitrary(u)?,
      sharpness: u.int_in_range(0..=7)?,
      auto_key: Arbitrary::arbitrary(u)?,
      key_frame_frequency: u.int_in_range(0..=8)?,
      auto_gold: Arbitrary::arbitrary(u)?,
      alt_freq: u.int_in_range(0..=8)?,
      lag_in_frames: u.int_in_range(0..=8)?,
      play_alternate: Arbitrary::arbitrary(u)?,
      arnr_max_frames: u.int_in_range(0..=MAX_ARNR_FRAMES)?,
      arnr_strength: u.int_in_range(0..=MAX_ARNR_STRENGTH)?,
      arnr_type: *u.choose(&[
        ArnrType::Backward,
        ArnrType::Forward,
        ArnrType::Centered,
      ])?,
      ..EncoderConfig::with_speed_preset(mode, u.int_in_range(-5..=5)?)
    };

    let rc = arbitrary_rate_control(u)?;
    let frame_count = u.int_in_range(1..=12)?;
    let force_key_at = Arbitrary::arbitrary(u)?;
    if u.is_empty() {
      return Err(Error::NotEnoughData);
    }
    let pixels = u.bytes(u.len())?.to_vec().into_boxed_slice();
    let config = Config::new()
      .with_encoder_config(enc)
      .with_rate_control(rc)
      .with_threads(1);
    Ok(Self { config, frame_count, force_key_at, pixels })
  }
}

pub fn fuzz_encode(arbitrary: ArbitraryEncoder) {
  let res = arbitrary.config.new_context(SyntheticEncoder::default());
  let mut context = match res {
    Ok(context) => context,
    Err(_) => return,
  };
  if arbitrary.force_key_at == Some(0) {
    context.force_key_frame();
  }

  let mut pixels = arbitrary.pixels.iter().cycle();
  let mut frame = context.new_frame();
  let frames = (0..arbitrary.frame_count).map(|_| {
    for plane in &mut frame.planes {
      let stride = plane.cfg.stride;
      for row in plane.data_origin_mut().chunks_mut(stride) {
        for pixel in row {
          *pixel = *pixels.next().unwrap();
        }
      }
    }
    frame.pad();

    frame.clone()
  });

  let _ = encode_frames(&mut context, frames);
}
