// Copyright 2020 ETH Zurich and University of Bologna.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Sample grids, kernels and windows.
//!
//! Grids are plain `ndarray` matrices in standard (row-major) layout. The
//! element type carries the domain: `u8` for raw sensor samples, `i8` for
//! quantized samples and `i32` for accumulator-width feature maps.

use crate::error::{Error, Result};
use ndarray::Array2;

/// Raw samples as delivered by the sensor, unsigned 8-bit.
pub type RawGrid = Array2<u8>;
/// Quantized samples, signed 8-bit fixed point.
pub type QuantGrid = Array2<i8>;
/// Convolution output, one accumulator value per valid window offset.
pub type FeatureMap = Array2<i32>;

/// Weights of the edge-detection kernel used by the hardware bring-up tests.
pub const EDGE_DETECT_3X3: [i8; 9] = [1, 0, -1, 1, 0, -1, 1, 0, -1];

/// A square, odd-sided kernel of signed 8-bit weights. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Kernel {
    weights: Array2<i8>,
}

impl Kernel {
    /// Build a `k`x`k` kernel from row-major weights.
    pub fn new(k: usize, weights: Vec<i8>) -> Result<Self> {
        if k == 0 || k % 2 == 0 {
            return Err(Error::config("kernel_size", k, "must be odd and non-zero"));
        }
        let actual = weights.len();
        let weights = Array2::from_shape_vec((k, k), weights).map_err(|_| Error::ShapeMismatch {
            what: "kernel weights",
            expected: k * k,
            actual,
        })?;
        Ok(Self { weights })
    }

    pub fn ones(k: usize) -> Result<Self> {
        Self::new(k, vec![1; k * k])
    }

    pub fn edge_detect() -> Self {
        Self {
            weights: Array2::from_shape_vec((3, 3), EDGE_DETECT_3X3.to_vec())
                .expect("3x3 shape matches nine weights"),
        }
    }

    /// Side length K.
    pub fn side(&self) -> usize {
        self.weights.nrows()
    }

    pub fn weights(&self) -> &Array2<i8> {
        &self.weights
    }

    /// Weights in the row-major order the accelerator latches them.
    pub fn flatten(&self) -> Vec<i8> {
        self.weights.iter().copied().collect()
    }
}

/// A K*K neighbourhood serialized row-major, as streamed to the accelerator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    k: usize,
    values: Vec<i8>,
}

impl Window {
    pub(crate) fn from_parts(k: usize, values: Vec<i8>) -> Self {
        debug_assert_eq!(values.len(), k * k);
        Self { k, values }
    }

    pub fn side(&self) -> usize {
        self.k
    }

    pub fn values(&self) -> &[i8] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Output dimensions of a valid (unpadded) sweep of a `k`-sided kernel.
pub fn output_dim(height: usize, width: usize, k: usize) -> Option<(usize, usize)> {
    if k == 0 || k > height || k > width {
        return None;
    }
    Some((height - k + 1, width - k + 1))
}
