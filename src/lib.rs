// Copyright 2020 ETH Zurich and University of Bologna.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Bit-exact golden reference for a fixed-point 2D convolution accelerator.
//!
//! The crate quantizes 8-bit grayscale samples to signed 8-bit values,
//! extracts KxK windows and computes the multiply-accumulate the hardware
//! performs, with the accumulator checked against its declared width. Around
//! that core sit ReLU and max-pool post-processing, a warm-up/measure
//! benchmark harness, a pipelined-latency model of the accelerator, and a
//! register-level model of the device used to co-verify it against the
//! reference.

#[macro_use]
extern crate log;

pub mod bench;
pub mod configuration;
pub mod conv;
pub mod dataset;
pub mod device;
pub mod error;
pub mod grid;
pub mod model;
pub mod pipeline;
pub mod postprocess;
pub mod quantize;
pub mod report;
pub mod sample;
pub mod verify;
pub mod window;

pub use crate::configuration::Configuration;
pub use crate::conv::{AccumulatorWidth, ConvEngine};
pub use crate::error::{Error, Result};
pub use crate::grid::{FeatureMap, Kernel, QuantGrid, RawGrid, Window};
pub use crate::pipeline::Pipeline;
pub use crate::quantize::Quantizer;
pub use crate::sample::{SampleSource, SyntheticPattern};
