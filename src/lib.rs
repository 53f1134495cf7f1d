// Copyright (c) 2017-2023, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

//! vp8rc is the control plane of a one-pass VP8 encoder.
//!
//! It decides, frame by frame, the frame type, which reference slots to
//! refresh, how many bits to spend and which quantizer hits that budget.
//! The pixel pipeline is supplied by the caller through the
//! [`FrameEncoder`] trait.
//!
//! # Basic encoding
//!
//! Encoding is done through the [`Context`] struct. Frames are queued with
//! [`Context::receive_raw_frame`] and compressed frames are retrieved with
//! [`Context::get_compressed_data`].
//!
//! [`FrameEncoder`]: encoder/trait.FrameEncoder.html
//! [`Context`]: struct.Context.html
//! [`Context::receive_raw_frame`]: struct.Context.html#method.receive_raw_frame
//! [`Context::get_compressed_data`]: struct.Context.html#method.get_compressed_data

#![deny(bare_trait_objects)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::unreadable_literal)]
#![warn(clippy::doc_markdown)]
#![warn(clippy::missing_errors_doc)]
#![warn(clippy::missing_panics_doc)]

#[macro_use]
extern crate log;

pub(crate) mod built_info {
  /// Crate version.
  pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");
}

mod serialize {
  cfg_if::cfg_if! {
    if #[cfg(feature="serialize")] {
      pub use serde::*;
    } else {
      pub use noop_proc_macro::{Deserialize, Serialize};
    }
  }
}

mod cpu_features;
mod quantize;
mod rate;
mod recode;
mod temporal_filter;
mod util;

pub mod encoder;
pub mod frame;

mod api;

pub use crate::api::*;
pub use crate::frame::{Frame, Plane};

/// Commonly used types and traits.
pub mod prelude {
  pub use crate::api::*;
  pub use crate::encoder::{
    EncodeBuffers, EncodeStats, FrameEncoder, FrameInvariants,
  };
  pub use crate::frame::{Frame, Plane, RefSlot};
}

/// Version information
///
/// The information is recovered from `Cargo.toml`.
pub mod version {
  /// Major version component
  ///
  /// It is increased every time a release presents an incompatible API change.
  ///
  /// # Panics
  ///
  /// Will panic if package is not built with Cargo,
  /// or if the package version is not a valid triplet of integers.
  pub fn major() -> u64 {
    env!("CARGO_PKG_VERSION_MAJOR").parse().unwrap()
  }
  /// Minor version component
  ///
  /// It is increased every time a release presents new functionalities are added
  /// in a backwards-compatible manner.
  ///
  /// # Panics
  ///
  /// Will panic if package is not built with Cargo,
  /// or if the package version is not a valid triplet of integers.
  pub fn minor() -> u64 {
    env!("CARGO_PKG_VERSION_MINOR").parse().unwrap()
  }
  /// Patch version component
  ///
  /// It is increased every time a release provides only backwards-compatible bugfixes.
  ///
  /// # Panics
  ///
  /// Will panic if package is not built with Cargo,
  /// or if the package version is not a valid triplet of integers.
  pub fn patch() -> u64 {
    env!("CARGO_PKG_VERSION_PATCH").parse().unwrap()
  }

  /// Version information as presented in `[package]` `version`.
  ///
  /// e.g. `0.1.0`
  pub fn short() -> String {
    crate::built_info::PKG_VERSION.to_string()
  }
}

#[cfg(feature = "bench")]
pub mod bench {
  pub mod cpu_features {
    pub use crate::cpu_features::*;
  }
  pub mod quantize {
    pub use crate::quantize::*;
  }
  pub mod rate {
    pub use crate::rate::*;
  }
  pub mod recode {
    pub use crate::recode::*;
  }
  pub mod temporal_filter {
    pub use crate::temporal_filter::*;
  }
}

#[cfg(fuzzing)]
pub mod fuzzing;
