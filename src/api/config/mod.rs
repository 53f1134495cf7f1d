// Copyright (c) 2020-2023, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use thiserror::Error;

use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::Arc;

use crate::api::lookahead::MAX_LAG_BUFFERS;
use crate::api::{Context, ContextInner};
use crate::encoder::FrameEncoder;
use crate::frame::AllocationError;

mod encoder;
pub use encoder::*;

mod rate;
pub use rate::*;

mod speedsettings;
pub use speedsettings::*;

/// Smallest accepted frame dimension.
pub const MIN_DIMENSION: usize = 16;
/// Largest accepted frame dimension.
pub const MAX_DIMENSION: usize = 16383;
/// Largest quantizer on the user scale.
pub const MAX_QUANTIZER: u8 = 63;

/// Enumeration of possible invalid configuration errors.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Error)]
#[non_exhaustive]
pub enum InvalidConfig {
  /// The width is invalid.
  #[error("invalid width {0} (expected >= 16, <= 16383)")]
  InvalidWidth(usize),
  /// The height is invalid.
  #[error("invalid height {0} (expected >= 16, <= 16383)")]
  InvalidHeight(usize),
  /// Framerate numerator is invalid.
  #[error("invalid framerate numerator {actual} (expected > 0, <= {max})")]
  InvalidFrameRateNum {
    /// The actual value.
    actual: u64,
    /// The maximal supported value.
    max: u64,
  },
  /// Framerate denominator is invalid.
  #[error("invalid framerate denominator {actual} (expected > 0, <= {max})")]
  InvalidFrameRateDen {
    /// The actual value.
    actual: u64,
    /// The maximal supported value.
    max: u64,
  },
  /// A quantizer is outside of the 0 to 63 scale.
  #[error("invalid quantizer {0} (expected <= 63)")]
  InvalidQuantizer(u8),
  /// The quantizer range is inverted.
  #[error("invalid quantizer range {min}..={max}")]
  InvalidQuantizerRange {
    /// Configured minimum.
    min: u8,
    /// Configured maximum.
    max: u8,
  },
  /// The lookahead is deeper than the frame store supports.
  #[error("invalid lag {actual} (expected <= {max})")]
  InvalidLag {
    /// The actual value.
    actual: usize,
    /// The maximal supported value.
    max: usize,
  },
  /// A percentage is above 100.
  #[error("invalid {0} percentage {1} (expected <= 100)")]
  InvalidPercentage(&'static str, u32),
  /// `cpu_used` is outside of the range of the encoding mode.
  #[error("invalid cpu_used {actual} (expected >= {min}, <= {max})")]
  InvalidCpuUsed {
    /// The actual value.
    actual: i32,
    /// The minimal supported value.
    min: i32,
    /// The maximal supported value.
    max: i32,
  },
  /// The sharpness is above 7.
  #[error("invalid sharpness {0} (expected <= 7)")]
  InvalidSharpness(u8),
  /// The alt-ref filter parameters are out of range.
  #[error("invalid alt-ref filter {0} {1}")]
  InvalidArnr(&'static str, usize),
  /// The rate control needs a target bitrate in order to produce results
  #[error("The rate control requires a target bitrate")]
  TargetBitrateNeeded,
  /// The buffer model is inconsistent.
  #[error("invalid buffer model {starting}/{optimal}/{maximum} ms")]
  InvalidBuffer {
    /// Starting level.
    starting: i64,
    /// Optimal level.
    optimal: i64,
    /// Maximum size.
    maximum: i64,
  },
}

/// Errors creating a [`Context`].
///
/// [`Context`]: struct.Context.html
#[derive(Debug, Clone, Copy, Eq, PartialEq, Error)]
pub enum ContextError {
  /// The configuration was rejected.
  #[error("invalid configuration: {0}")]
  Config(#[from] InvalidConfig),
  /// The frame store could not be allocated.
  #[error("{0}")]
  Allocation(#[from] AllocationError),
  /// The thread pool could not be built.
  #[error("unable to build the thread pool")]
  ThreadPool,
}

/// Contains the encoder configuration.
#[derive(Clone, Debug, Default)]
pub struct Config {
  /// Settings which impact the produced bitstream.
  pub(crate) enc: EncoderConfig,
  /// Rate control configuration
  pub(crate) rate_control: RateControlConfig,
  /// The number of threads in the threadpool.
  pub(crate) threads: usize,
  /// Shared thread pool
  pub(crate) pool: Option<Arc<ThreadPool>>,
}

impl Config {
  /// Create a default configuration
  ///
  /// same as `Default::default()`
  pub fn new() -> Self {
    Config::default()
  }

  /// Set the encoder configuration
  ///
  /// `EncoderConfig` contains the settings impacting the
  /// codec features used in the produced bitstream.
  pub fn with_encoder_config(mut self, enc: EncoderConfig) -> Self {
    self.enc = enc;
    self
  }

  /// Set the number of workers in the threadpool
  ///
  /// The threadpool is shared across all the different parallel
  /// components in the encoder.
  ///
  /// If it is left unset, the encoder will use the default global
  /// threadpool provided by Rayon instead.
  pub const fn with_threads(mut self, threads: usize) -> Self {
    self.threads = threads;
    self
  }

  /// Set the rate control configuration
  ///
  /// The default configuration targets 256 kbit/s in VBR mode.
  pub const fn with_rate_control(
    mut self, rate_control: RateControlConfig,
  ) -> Self {
    self.rate_control = rate_control;
    self
  }

  /// Use the provided threadpool
  ///
  /// It takes priority over `with_threads()`
  pub fn with_thread_pool(mut self, pool: Arc<ThreadPool>) -> Self {
    self.pool = Some(pool);
    self
  }

  /// The encoder configuration.
  pub const fn encoder_config(&self) -> &EncoderConfig {
    &self.enc
  }

  /// The rate control configuration.
  pub const fn rate_control(&self) -> &RateControlConfig {
    &self.rate_control
  }
}

impl Config {
  pub(crate) fn new_inner<E: FrameEncoder>(
    &self, encoder: E,
  ) -> Result<ContextInner<E>, ContextError> {
    self.validate()?;

    let mut config = self.enc;
    // The speed settings always follow the mode.
    config.speed_settings =
      SpeedSettings::from_mode(config.mode, config.cpu_used);

    Ok(ContextInner::new(&config, &self.rate_control, encoder)?)
  }

  /// Create a new threadpool with this configuration if set,
  /// or return `None` if global threadpool should be used instead.
  pub(crate) fn new_thread_pool(
    &self,
  ) -> Result<Option<Arc<ThreadPool>>, ContextError> {
    if let Some(ref p) = self.pool {
      Ok(Some(p.clone()))
    } else if self.threads != 0 {
      let pool = ThreadPoolBuilder::new()
        .num_threads(self.threads)
        .build()
        .map_err(|_| ContextError::ThreadPool)?;
      Ok(Some(Arc::new(pool)))
    } else {
      Ok(None)
    }
  }

  /// Creates a [`Context`] driving `encoder` with this configuration.
  ///
  /// # Errors
  ///
  /// Returns `ContextError::Config` if the config is invalid and
  /// `ContextError::Allocation` if the frame store cannot be allocated.
  ///
  /// [`Context`]: struct.Context.html
  pub fn new_context<E: FrameEncoder>(
    &self, encoder: E,
  ) -> Result<Context<E>, ContextError> {
    let pool = self.new_thread_pool()?;
    let inner = match pool {
      Some(ref pool) => pool.install(|| self.new_inner(encoder)),
      None => self.new_inner(encoder),
    }?;
    let config = inner.config;

    info!("vp8rc {} {}", config, self.rate_control.mode);

    Ok(Context { is_flushing: false, inner, pool, config })
  }

  /// Validates the configuration.
  ///
  /// # Errors
  ///
  /// Returns the first `InvalidConfig` found.
  pub fn validate(&self) -> Result<(), InvalidConfig> {
    use InvalidConfig::*;

    let config = &self.enc;

    if !(MIN_DIMENSION..=MAX_DIMENSION).contains(&config.width) {
      return Err(InvalidWidth(config.width));
    }
    if !(MIN_DIMENSION..=MAX_DIMENSION).contains(&config.height) {
      return Err(InvalidHeight(config.height));
    }

    if config.time_base.num == 0 || config.time_base.num > u32::MAX as u64 {
      return Err(InvalidFrameRateNum {
        actual: config.time_base.num,
        max: u32::MAX as u64,
      });
    }
    if config.time_base.den == 0 || config.time_base.den > u32::MAX as u64 {
      return Err(InvalidFrameRateDen {
        actual: config.time_base.den,
        max: u32::MAX as u64,
      });
    }

    let (min, max) = config.mode.cpu_used_range();
    if !(min..=max).contains(&config.cpu_used) {
      return Err(InvalidCpuUsed { actual: config.cpu_used, min, max });
    }

    if config.lag_in_frames > MAX_LAG_BUFFERS {
      return Err(InvalidLag {
        actual: config.lag_in_frames,
        max: MAX_LAG_BUFFERS,
      });
    }

    if config.sharpness > 7 {
      return Err(InvalidSharpness(config.sharpness));
    }

    if config.arnr_max_frames > MAX_ARNR_FRAMES {
      return Err(InvalidArnr("max_frames", config.arnr_max_frames));
    }
    if config.arnr_strength > MAX_ARNR_STRENGTH {
      return Err(InvalidArnr("strength", config.arnr_strength as usize));
    }

    let rc = &self.rate_control;

    for q in [rc.min_quantizer, rc.max_quantizer]
      .into_iter()
      .chain(rc.fixed_quantizer)
      .chain(rc.key_quantizer)
      .chain(rc.gold_quantizer)
      .chain(rc.alt_quantizer)
    {
      if q > MAX_QUANTIZER {
        return Err(InvalidQuantizer(q));
      }
    }
    if rc.min_quantizer > rc.max_quantizer {
      return Err(InvalidQuantizerRange {
        min: rc.min_quantizer,
        max: rc.max_quantizer,
      });
    }

    for (name, pct) in [
      ("undershoot", rc.under_shoot_pct),
      ("overshoot", rc.over_shoot_pct),
      ("drop water mark", rc.drop_frames_water_mark),
      ("min section", rc.min_section_pct),
    ] {
      if pct > 100 {
        return Err(InvalidPercentage(name, pct));
      }
    }

    if rc.target_bitrate == 0 && !rc.is_fixed_quantizer() {
      return Err(TargetBitrateNeeded);
    }

    if rc.mode == RateControlMode::Cbr
      && (rc.starting_buffer_ms < 0
        || rc.optimal_buffer_ms < 0
        || rc.maximum_buffer_ms < 0
        || rc.starting_buffer_ms > rc.maximum_buffer_ms.max(1) * 4)
    {
      return Err(InvalidBuffer {
        starting: rc.starting_buffer_ms,
        optimal: rc.optimal_buffer_ms,
        maximum: rc.maximum_buffer_ms,
      });
    }

    Ok(())
  }
}
