// Copyright 2020 ETH Zurich and University of Bologna.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Fixed-point convolution engine.
//!
//! Every multiply-accumulate happens at 64 bits and the running sum is
//! checked against the declared accumulator width after each step, so an
//! accumulator that would overflow in hardware is reported instead of
//! wrapped. The wrapping behaviour of a real register is available through
//! [`wrapping_dot`] for device models only.

use crate::error::{Error, Result};
use crate::grid::{output_dim, FeatureMap, Kernel, QuantGrid, Window};
use crate::window;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;

/// Declared bit width of the hardware accumulator register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct AccumulatorWidth(u32);

impl AccumulatorWidth {
    pub const MIN_BITS: u32 = 16;
    pub const MAX_BITS: u32 = 32;

    pub fn new(bits: u32) -> Result<Self> {
        if bits < Self::MIN_BITS || bits > Self::MAX_BITS {
            return Err(Error::config("accumulator_width", bits, "must be within 16..=32"));
        }
        Ok(Self(bits))
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn min(self) -> i64 {
        -(1i64 << (self.0 - 1))
    }

    pub fn max(self) -> i64 {
        (1i64 << (self.0 - 1)) - 1
    }

    pub fn contains(self, value: i64) -> bool {
        value >= self.min() && value <= self.max()
    }
}

impl TryFrom<u32> for AccumulatorWidth {
    type Error = Error;

    fn try_from(bits: u32) -> Result<Self> {
        Self::new(bits)
    }
}

impl From<AccumulatorWidth> for u32 {
    fn from(width: AccumulatorWidth) -> u32 {
        width.0
    }
}

impl Default for AccumulatorWidth {
    fn default() -> Self {
        Self(16)
    }
}

/// Checked dot product of two equally long tap vectors.
pub fn dot(window: &[i8], kernel: &[i8], width: AccumulatorWidth) -> Result<i32> {
    if window.len() != kernel.len() {
        return Err(Error::ShapeMismatch {
            what: "window taps",
            expected: kernel.len(),
            actual: window.len(),
        });
    }
    let mut acc: i64 = 0;
    for (step, (&x, &w)) in window.iter().zip(kernel.iter()).enumerate() {
        acc += x as i64 * w as i64;
        if !width.contains(acc) {
            return Err(Error::OverflowDetected {
                step,
                value: acc,
                width: width.bits(),
                min: width.min(),
                max: width.max(),
            });
        }
    }
    Ok(acc as i32)
}

/// Dot product as computed by a two's-complement register of `bits` bits
/// that silently wraps on every step.
pub fn wrapping_dot(window: &[i8], kernel: &[i8], bits: u32) -> i64 {
    let bits = bits.max(1).min(64);
    window
        .iter()
        .zip(kernel.iter())
        .fold(0i64, |acc, (&x, &w)| {
            sign_extend(acc.wrapping_add(x as i64 * w as i64), bits)
        })
}

/// Reinterpret the low `bits` bits of `value` as a signed number.
pub fn sign_extend(value: i64, bits: u32) -> i64 {
    let shift = 64 - bits.max(1).min(64);
    (value << shift) >> shift
}

#[derive(Debug, Clone, Copy)]
pub struct ConvEngine {
    k: usize,
    width: AccumulatorWidth,
}

impl ConvEngine {
    pub fn new(k: usize, width: AccumulatorWidth) -> Self {
        Self { k, width }
    }

    pub fn kernel_size(&self) -> usize {
        self.k
    }

    pub fn width(&self) -> AccumulatorWidth {
        self.width
    }

    fn check_kernel(&self, kernel: &Kernel) -> Result<()> {
        if kernel.side() != self.k {
            return Err(Error::ShapeMismatch {
                what: "kernel side",
                expected: self.k,
                actual: kernel.side(),
            });
        }
        Ok(())
    }

    /// Single-window mode.
    pub fn dot(&self, window: &Window, kernel: &Kernel) -> Result<i32> {
        self.check_kernel(kernel)?;
        if window.side() != self.k {
            return Err(Error::ShapeMismatch {
                what: "window side",
                expected: self.k,
                actual: window.side(),
            });
        }
        dot(window.values(), &kernel.flatten(), self.width)
    }

    fn output_shape(&self, image: &QuantGrid) -> Result<(usize, usize)> {
        let (height, width) = image.dim();
        output_dim(height, width, self.k).ok_or(Error::OutOfBounds {
            top: 0,
            left: 0,
            k: self.k,
            height,
            width,
        })
    }

    fn sweep_rows(
        &self,
        image: &QuantGrid,
        taps: &[i8],
        rows: std::ops::Range<usize>,
        cols: usize,
    ) -> Result<Vec<i32>> {
        let mut out = Vec::with_capacity(rows.len() * cols);
        for r in rows {
            for c in 0..cols {
                let win = window::extract(image, r, c, self.k)?;
                out.push(dot(win.values(), taps, self.width)?);
            }
        }
        Ok(out)
    }

    /// Full-sweep mode: `output[r][c] = dot(window at (r, c))` over every
    /// valid offset.
    pub fn convolve(&self, image: &QuantGrid, kernel: &Kernel) -> Result<FeatureMap> {
        self.check_kernel(kernel)?;
        let (rows, cols) = self.output_shape(image)?;
        debug!(
            "Convolve {:?} image with {}x{} kernel -> {}x{}, {}-bit accumulator",
            image.dim(),
            self.k,
            self.k,
            rows,
            cols,
            self.width.bits()
        );
        let taps = kernel.flatten();
        let data = self.sweep_rows(image, &taps, 0..rows, cols)?;
        feature_map(rows, cols, data)
    }

    /// Same result as [`ConvEngine::convolve`], with output rows split into
    /// contiguous bands swept on `threads` scoped threads.
    pub fn convolve_parallel(
        &self,
        image: &QuantGrid,
        kernel: &Kernel,
        threads: usize,
    ) -> Result<FeatureMap> {
        self.check_kernel(kernel)?;
        let (rows, cols) = self.output_shape(image)?;
        let threads = threads.max(1).min(rows.max(1));
        if threads == 1 {
            return self.convolve(image, kernel);
        }
        let taps = kernel.flatten();
        let band = (rows + threads - 1) / threads;
        debug!(
            "Convolve {:?} image on {} threads, {} rows per band",
            image.dim(),
            threads,
            band
        );
        let bands = crossbeam_utils::thread::scope(|s| {
            let handles: Vec<_> = (0..rows)
                .step_by(band)
                .map(|start| {
                    let end = (start + band).min(rows);
                    let taps = &taps;
                    s.spawn(move |_| self.sweep_rows(image, taps, start..end, cols))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
                .collect::<Vec<_>>()
        })
        .unwrap_or_else(|e| std::panic::resume_unwind(e));

        let mut data = Vec::with_capacity(rows * cols);
        for band in bands {
            data.extend(band?);
        }
        feature_map(rows, cols, data)
    }
}

fn feature_map(rows: usize, cols: usize, data: Vec<i32>) -> Result<FeatureMap> {
    let actual = data.len();
    Array2::from_shape_vec((rows, cols), data).map_err(|_| Error::ShapeMismatch {
        what: "feature map",
        expected: rows * cols,
        actual,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::EDGE_DETECT_3X3;
    use ndarray::{arr2, Array2};
    use proptest::prelude::*;

    fn width(bits: u32) -> AccumulatorWidth {
        AccumulatorWidth::new(bits).unwrap()
    }

    #[test]
    fn all_ones_window_with_edge_kernel_is_zero() {
        assert_eq!(dot(&[1; 9], &EDGE_DETECT_3X3, width(16)).unwrap(), 0);
    }

    #[test]
    fn all_ones_window_with_ones_kernel_is_nine() {
        assert_eq!(dot(&[1; 9], &[1; 9], width(16)).unwrap(), 9);
    }

    #[test]
    fn extreme_inputs_overflow_sixteen_bits() {
        match dot(&[127; 9], &[127; 9], width(16)) {
            Err(Error::OverflowDetected {
                step, value, width, ..
            }) => {
                assert_eq!(step, 2);
                assert_eq!(value, 3 * 127 * 127);
                assert_eq!(width, 16);
            }
            other => panic!("expected overflow, got {:?}", other),
        }
    }

    #[test]
    fn extreme_inputs_fit_thirty_two_bits() {
        assert_eq!(dot(&[127; 9], &[127; 9], width(32)).unwrap(), 145_161);
        assert_eq!(dot(&[-128; 9], &[-128; 9], width(32)).unwrap(), 147_456);
    }

    #[test]
    fn worst_case_symmetric_range_needs_nineteen_bits() {
        // 9 * 127 * 127 = 145161 exceeds the 18-bit range of +-131071.
        match dot(&[127; 9], &[-127; 9], width(18)) {
            Err(Error::OverflowDetected {
                step, value, min, ..
            }) => {
                assert_eq!(step, 8);
                assert_eq!(value, -145_161);
                assert_eq!(min, -131_072);
            }
            other => panic!("expected overflow, got {:?}", other),
        }
        assert_eq!(dot(&[127; 9], &[-127; 9], width(19)).unwrap(), -145_161);
    }

    #[test]
    fn transient_overflow_is_reported() {
        // Final sum is 0 but the register passes +48387 on the way.
        let window = [127, 127, 127, -127, -127, -127, 0, 0, 0];
        let err = dot(&window, &[127; 9], width(16)).unwrap_err();
        assert!(matches!(err, Error::OverflowDetected { step: 2, .. }));
    }

    #[test]
    fn tap_count_mismatch() {
        assert!(matches!(
            dot(&[1; 8], &[1; 9], width(16)),
            Err(Error::ShapeMismatch { expected: 9, actual: 8, .. })
        ));
    }

    #[test]
    fn width_bounds() {
        assert!(AccumulatorWidth::new(15).is_err());
        assert!(AccumulatorWidth::new(33).is_err());
        let w = width(16);
        assert_eq!((w.min(), w.max()), (-32768, 32767));
        assert!(w.contains(32767));
        assert!(!w.contains(32768));
    }

    #[test]
    fn wrapping_dot_models_sixteen_bit_register() {
        let wrapped = wrapping_dot(&[127; 9], &[127; 9], 16);
        assert_eq!(wrapped, sign_extend(145_161, 16));
        assert_eq!(wrapped, 145_161 - 2 * 65_536);
        assert_eq!(wrapping_dot(&[1; 9], &[1; 9], 16), 9);
    }

    #[test]
    fn convolve_all_ones() {
        let engine = ConvEngine::new(3, width(16));
        let image = Array2::<i8>::ones((8, 8));
        let out = engine.convolve(&image, &Kernel::ones(3).unwrap()).unwrap();
        assert_eq!(out.dim(), (6, 6));
        assert!(out.iter().all(|&v| v == 9));
    }

    #[test]
    fn convolve_maps_output_coordinates() {
        let engine = ConvEngine::new(3, width(16));
        let image = Array2::from_shape_fn((4, 5), |(r, c)| (r * 5 + c) as i8);
        let out = engine.convolve(&image, &Kernel::edge_detect()).unwrap();
        // Each window's horizontal gradient is constant on a counting grid.
        assert_eq!(out, arr2(&[[-6, -6, -6], [-6, -6, -6]]));

        let kernel = Kernel::new(3, vec![0, 0, 0, 0, 1, 0, 0, 0, 0]).unwrap();
        let centre = engine.convolve(&image, &kernel).unwrap();
        assert_eq!(centre, arr2(&[[6, 7, 8], [11, 12, 13]]));
    }

    #[test]
    fn convolve_rejects_kernel_of_wrong_side() {
        let engine = ConvEngine::new(3, width(16));
        let image = Array2::<i8>::ones((8, 8));
        assert!(matches!(
            engine.convolve(&image, &Kernel::ones(5).unwrap()),
            Err(Error::ShapeMismatch { expected: 3, actual: 5, .. })
        ));
    }

    #[test]
    fn convolve_rejects_image_smaller_than_kernel() {
        let engine = ConvEngine::new(3, width(16));
        let image = Array2::<i8>::ones((2, 8));
        assert!(matches!(
            engine.convolve(&image, &Kernel::ones(3).unwrap()),
            Err(Error::OutOfBounds { .. })
        ));
    }

    #[test]
    fn convolve_propagates_overflow() {
        let engine = ConvEngine::new(3, width(16));
        let image = Array2::<i8>::from_elem((4, 4), 127);
        let kernel = Kernel::new(3, vec![127; 9]).unwrap();
        assert!(matches!(
            engine.convolve(&image, &kernel),
            Err(Error::OverflowDetected { .. })
        ));
    }

    #[test]
    fn engine_dot_checks_window_side() {
        let engine = ConvEngine::new(3, width(16));
        let image = Array2::<i8>::ones((5, 5));
        let win = crate::window::extract(&image, 0, 0, 5).unwrap();
        assert!(matches!(
            engine.dot(&win, &Kernel::ones(3).unwrap()),
            Err(Error::ShapeMismatch { what: "window side", .. })
        ));
    }

    #[test]
    fn convolve_does_not_mutate_inputs() {
        let engine = ConvEngine::new(3, width(32));
        let image = Array2::from_shape_fn((6, 6), |(r, c)| (r as i8) - (c as i8));
        let kernel = Kernel::edge_detect();
        let (image_before, kernel_before) = (image.clone(), kernel.clone());
        let first = engine.convolve(&image, &kernel).unwrap();
        let second = engine.convolve(&image, &kernel).unwrap();
        assert_eq!(first, second);
        assert_eq!(image, image_before);
        assert_eq!(kernel, kernel_before);
    }

    proptest! {
        #[test]
        fn prop_parallel_sweep_matches_serial(
            data in proptest::collection::vec(-20i8..20, 12 * 9),
            weights in proptest::collection::vec(-5i8..5, 9),
            threads in 1usize..6,
        ) {
            let engine = ConvEngine::new(3, width(32));
            let image = Array2::from_shape_vec((12, 9), data).unwrap();
            let kernel = Kernel::new(3, weights).unwrap();
            let serial = engine.convolve(&image, &kernel).unwrap();
            let parallel = engine.convolve_parallel(&image, &kernel, threads).unwrap();
            prop_assert_eq!(serial, parallel);
        }

        #[test]
        fn prop_wrapping_matches_checked_when_in_range(
            window in proptest::collection::vec(-30i8..30, 9),
            kernel in proptest::collection::vec(-30i8..30, 9),
        ) {
            // 9 * 30 * 30 stays inside 16 bits.
            let checked = dot(&window, &kernel, width(16)).unwrap() as i64;
            prop_assert_eq!(wrapping_dot(&window, &kernel, 16), checked);
        }
    }
}
