// Copyright 2020 ETH Zurich and University of Bologna.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Warm-up/measure benchmark protocol for the CPU reference.

use crate::conv::ConvEngine;
use crate::error::{Error, Result};
use crate::grid::{Kernel, QuantGrid};
use std::convert::TryFrom;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BenchmarkResult {
    /// Mean wall time of one measured iteration.
    pub average: Duration,
    pub total: Duration,
    pub samples: usize,
    /// `output[0][0]` of the last measured run.
    pub representative: i32,
}

impl BenchmarkResult {
    pub fn average_ms(&self) -> f64 {
        self.average.as_secs_f64() * 1e3
    }

    /// Runs per second at the measured average latency.
    pub fn throughput(&self) -> f64 {
        let secs = self.average.as_secs_f64();
        if secs > 0.0 {
            1.0 / secs
        } else {
            f64::INFINITY
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BenchmarkHarness {
    warmup: usize,
    iterations: usize,
}

impl BenchmarkHarness {
    pub fn new(warmup: usize, iterations: usize) -> Result<Self> {
        if iterations == 0 {
            return Err(Error::config("measured_iterations", iterations, "must be non-zero"));
        }
        Ok(Self { warmup, iterations })
    }

    pub fn warmup(&self) -> usize {
        self.warmup
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Run `op` `warmup` times untimed, then `iterations` times under a
    /// monotonic clock. Returns the total measured time and the last output.
    pub fn run<T, F>(&self, mut op: F) -> Result<(Duration, T)>
    where
        F: FnMut() -> Result<T>,
    {
        debug!("Warm-up: {} iterations", self.warmup);
        for _ in 0..self.warmup {
            op()?;
        }
        debug!("Measure: {} iterations", self.iterations);
        let start = Instant::now();
        let mut last = op()?;
        for _ in 1..self.iterations {
            last = op()?;
        }
        let total = start.elapsed();
        Ok((total, last))
    }

    pub fn measure_convolution(
        &self,
        engine: &ConvEngine,
        image: &QuantGrid,
        kernel: &Kernel,
        threads: usize,
    ) -> Result<BenchmarkResult> {
        let (total, output) = self.run(|| engine.convolve_parallel(image, kernel, threads))?;
        let average = mean(total, self.iterations);
        info!(
            "Measured {} runs in {:?}, average {:?}",
            self.iterations, total, average
        );
        Ok(BenchmarkResult {
            average,
            total,
            samples: self.iterations,
            representative: output.get([0, 0]).copied().unwrap_or_default(),
        })
    }
}

/// `total / samples` without narrowing the divisor.
fn mean(total: Duration, samples: usize) -> Duration {
    let nanos = total.as_nanos() / samples.max(1) as u128;
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}
