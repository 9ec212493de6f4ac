// Copyright 2020 ETH Zurich and University of Bologna.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Co-verification of the golden engine against the accelerator model.

use crate::conv::ConvEngine;
use crate::device::{Driver, TAPS};
use crate::error::{Error, Result};
use crate::grid::{output_dim, Kernel, QuantGrid};
use crate::window::WindowExtractor;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mismatch {
    pub row: usize,
    pub col: usize,
    /// `None` when the golden accumulator overflowed its declared width.
    pub golden: Option<i32>,
    pub device: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerificationReport {
    pub windows: usize,
    pub mismatches: Vec<Mismatch>,
}

impl VerificationReport {
    pub fn passed(&self) -> bool {
        self.mismatches.is_empty()
    }
}

/// Run every valid window of `image` through both the checked engine and
/// the device, and collect the windows where they disagree.
pub fn co_verify(
    image: &QuantGrid,
    kernel: &Kernel,
    engine: &ConvEngine,
    driver: &Driver,
) -> Result<VerificationReport> {
    let k = engine.kernel_size();
    if k * k != TAPS {
        return Err(Error::ShapeMismatch {
            what: "device taps",
            expected: TAPS,
            actual: k * k,
        });
    }
    let (height, width) = image.dim();
    if output_dim(height, width, k).is_none() {
        return Err(Error::OutOfBounds {
            top: 0,
            left: 0,
            k,
            height,
            width,
        });
    }
    let taps = kernel.flatten();
    let mut report = VerificationReport::default();
    for ((row, col), window) in WindowExtractor::new(k).windows(image) {
        let golden = match engine.dot(&window, kernel) {
            Ok(v) => Some(v),
            Err(e @ Error::OverflowDetected { .. }) => {
                warn!("Window ({}, {}): {}", row, col, e);
                None
            }
            Err(e) => return Err(e),
        };
        let device = driver.convolve(window.values(), &taps)?;
        report.windows += 1;
        if golden != Some(device) {
            debug!(
                "Mismatch at ({}, {}): golden {:?}, device {}",
                row, col, golden, device
            );
            report.mismatches.push(Mismatch {
                row,
                col,
                golden,
                device,
            });
        }
    }
    info!(
        "Co-verified {} windows, {} mismatches",
        report.windows,
        report.mismatches.len()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conv::AccumulatorWidth;
    use crate::device::{reference_soc, CNN_BASE_ADDR};
    use ndarray::Array2;

    fn engine(bits: u32) -> ConvEngine {
        ConvEngine::new(3, AccumulatorWidth::new(bits).unwrap())
    }

    #[test]
    fn matching_device_passes() {
        let bus = reference_soc(16);
        let drv = Driver::new(&bus, CNN_BASE_ADDR, 16);
        let image = Array2::from_shape_fn((6, 7), |(r, c)| (r as i8 * 3) - c as i8);
        let report = co_verify(&image, &Kernel::edge_detect(), &engine(16), &drv).unwrap();
        assert_eq!(report.windows, 4 * 5);
        assert!(report.passed());
    }

    #[test]
    fn overflowing_window_is_flagged() {
        let bus = reference_soc(16);
        let drv = Driver::new(&bus, CNN_BASE_ADDR, 16);
        // 9 * 40 * 127 = 45720 overflows 16 bits; any window covering at
        // most six of the block's pixels stays within 30480.
        let mut image = Array2::<i8>::zeros((6, 6));
        for r in 0..3 {
            for c in 0..3 {
                image[[r, c]] = 40;
            }
        }
        let kernel = Kernel::new(3, vec![127; 9]).unwrap();
        let report = co_verify(&image, &kernel, &engine(16), &drv).unwrap();
        assert_eq!(report.windows, 16);
        assert_eq!(report.mismatches.len(), 1);
        let m = &report.mismatches[0];
        assert_eq!((m.row, m.col, m.golden), (0, 0, None));
        assert_eq!(m.device, 45_720 - 65_536);
    }

    #[test]
    fn every_saturated_window_is_reported() {
        let bus = reference_soc(16);
        let drv = Driver::new(&bus, CNN_BASE_ADDR, 16);
        let mut image = Array2::<i8>::ones((4, 4));
        for r in 0..3 {
            for c in 0..3 {
                image[[r, c]] = 127;
            }
        }
        let kernel = Kernel::new(3, vec![127; 9]).unwrap();
        let report = co_verify(&image, &kernel, &engine(16), &drv).unwrap();
        let positions: Vec<_> = report.mismatches.iter().map(|m| (m.row, m.col)).collect();
        assert_eq!(positions, vec![(0, 0), (0, 1), (1, 0), (1, 1)]);
        assert!(report.mismatches.iter().all(|m| m.golden.is_none()));
    }

    #[test]
    fn narrow_device_register_disagrees_with_wide_golden() {
        let bus = reference_soc(16);
        let drv = Driver::new(&bus, CNN_BASE_ADDR, 16);
        let image = Array2::<i8>::from_elem((3, 3), 127);
        let kernel = Kernel::new(3, vec![127; 9]).unwrap();
        let report = co_verify(&image, &kernel, &engine(32), &drv).unwrap();
        assert_eq!(
            report.mismatches,
            vec![Mismatch {
                row: 0,
                col: 0,
                golden: Some(145_161),
                device: 145_161 - 2 * 65_536,
            }]
        );
    }

    #[test]
    fn image_smaller_than_kernel_is_rejected() {
        let bus = reference_soc(16);
        let drv = Driver::new(&bus, CNN_BASE_ADDR, 16);
        let image = Array2::<i8>::ones((2, 2));
        match co_verify(&image, &Kernel::edge_detect(), &engine(16), &drv) {
            Err(Error::OutOfBounds { k, height, width, .. }) => {
                assert_eq!((k, height, width), (3, 2, 2))
            }
            other => panic!("expected out-of-bounds, got {:?}", other),
        }
    }

    #[test]
    fn only_three_by_three_kernels_map_to_device() {
        let bus = reference_soc(16);
        let drv = Driver::new(&bus, CNN_BASE_ADDR, 16);
        let image = Array2::<i8>::ones((6, 6));
        let five = ConvEngine::new(5, AccumulatorWidth::new(16).unwrap());
        assert!(matches!(
            co_verify(&image, &Kernel::ones(5).unwrap(), &five, &drv),
            Err(Error::ShapeMismatch { what: "device taps", .. })
        ));
    }
}
