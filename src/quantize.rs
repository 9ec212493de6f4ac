// Copyright 2020 ETH Zurich and University of Bologna.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Integer quantizer mapping raw 8-bit samples into the signed 8-bit domain.
//!
//! The pixel rule is `narrow(scale(pixel - mean))`. Both the scale step and
//! the narrowing step are explicit so the golden path can be pinned to
//! whatever the hardware quantizer implements.

use crate::error::{Error, Result};
use crate::grid::{QuantGrid, RawGrid};
use serde::{Deserialize, Serialize};

/// How `pixel - mean` is divided by the scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rounding {
    /// Integer division rounding toward negative infinity. Canonical.
    FloorDiv,
    /// Arithmetic right shift by `log2(scale)`; requires a power-of-two scale.
    ArithmeticShift,
    /// Integer division rounding toward zero.
    TruncDiv,
}

/// How the scaled value is brought into 8 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Narrowing {
    /// Keep the low 8 bits (two's-complement wrap). Canonical.
    Truncate,
    /// Clamp into [-128, 127].
    Saturate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuantParams {
    pub mean: i32,
    pub scale: u32,
    pub rounding: Rounding,
    pub narrowing: Narrowing,
}

impl Default for QuantParams {
    fn default() -> Self {
        Self {
            mean: 128,
            scale: 2,
            rounding: Rounding::FloorDiv,
            narrowing: Narrowing::Truncate,
        }
    }
}

impl QuantParams {
    pub fn validate(&self) -> Result<()> {
        if self.scale == 0 {
            return Err(Error::config("quantization.scale", self.scale, "must be non-zero"));
        }
        if self.rounding == Rounding::ArithmeticShift && !self.scale.is_power_of_two() {
            return Err(Error::config(
                "quantization.scale",
                self.scale,
                "arithmetic_shift requires a power of two",
            ));
        }
        Ok(())
    }
}

/// A validated quantizer. Pure: the same pixel always maps to the same value.
#[derive(Debug, Clone, Copy)]
pub struct Quantizer {
    params: QuantParams,
    shift: u32,
}

impl Quantizer {
    pub fn new(params: QuantParams) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            params,
            shift: params.scale.trailing_zeros(),
        })
    }

    pub fn params(&self) -> &QuantParams {
        &self.params
    }

    pub fn quantize(&self, pixel: u8) -> i8 {
        let centered = pixel as i64 - self.params.mean as i64;
        let scale = self.params.scale as i64;
        let scaled = match self.params.rounding {
            Rounding::FloorDiv => centered.div_euclid(scale),
            Rounding::ArithmeticShift => centered >> self.shift,
            Rounding::TruncDiv => centered / scale,
        };
        match self.params.narrowing {
            Narrowing::Truncate => scaled as i8,
            Narrowing::Saturate => scaled.max(i8::MIN as i64).min(i8::MAX as i64) as i8,
        }
    }

    pub fn quantize_grid(&self, grid: &RawGrid) -> QuantGrid {
        trace!(
            "Quantize {:?} grid, mean {}, scale {}, {:?}/{:?}",
            grid.dim(),
            self.params.mean,
            self.params.scale,
            self.params.rounding,
            self.params.narrowing
        );
        grid.mapv(|p| self.quantize(p))
    }
}

/// Canonical quantizer: floor division followed by 8-bit truncation.
pub fn quantize(pixel: u8, mean: i32, scale: u32) -> Result<i8> {
    let q = Quantizer::new(QuantParams {
        mean,
        scale,
        ..QuantParams::default()
    })?;
    Ok(q.quantize(pixel))
}

/// Floating-point normalization `trunc(pixel / 255 * 127)`.
///
/// Approximate. It cannot bit-match an integer hardware quantizer and must
/// not be used to produce golden values.
pub fn approximate_normalize(pixel: u8) -> i8 {
    (pixel as f64 / 255.0 * 127.0) as i8
}
