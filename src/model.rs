// Copyright 2020 ETH Zurich and University of Bologna.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Closed-form latency model of the pipelined accelerator.
//!
//! A pipeline with fill latency `L` and initiation interval `II` produces
//! `N` outputs in `L + (N - 1) * II` cycles.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareParams {
    pub clock_mhz: f64,
    pub pipeline_latency: u64,
    pub initiation_interval: u64,
    /// Width of the device's result register, used by the device model.
    pub register_width: u32,
}

impl Default for HardwareParams {
    fn default() -> Self {
        Self {
            clock_mhz: 100.0,
            pipeline_latency: 12,
            initiation_interval: 1,
            register_width: 16,
        }
    }
}

impl HardwareParams {
    pub fn validate(&self) -> Result<()> {
        if !(self.clock_mhz.is_finite() && self.clock_mhz > 0.0) {
            return Err(Error::config("hardware.clock_mhz", self.clock_mhz, "must be positive"));
        }
        if self.initiation_interval == 0 {
            return Err(Error::config(
                "hardware.initiation_interval",
                self.initiation_interval,
                "must be non-zero",
            ));
        }
        if self.register_width < 8 || self.register_width > 32 {
            return Err(Error::config(
                "hardware.register_width",
                self.register_width,
                "must be within 8..=32",
            ));
        }
        Ok(())
    }

    /// Clock period in nanoseconds.
    pub fn clock_period_ns(&self) -> f64 {
        1000.0 / self.clock_mhz
    }

    pub fn estimate(&self, outputs: u64) -> Result<HardwareEstimate> {
        self.validate()?;
        if outputs == 0 {
            return Err(Error::config("outputs", outputs, "must be non-zero"));
        }
        let total_cycles = (outputs - 1)
            .checked_mul(self.initiation_interval)
            .ok_or_else(|| {
                Error::config(
                    "hardware.initiation_interval",
                    self.initiation_interval,
                    "steady-state cycle count overflows 64 bits",
                )
            })?
            .checked_add(self.pipeline_latency)
            .ok_or_else(|| {
                Error::config(
                    "hardware.pipeline_latency",
                    self.pipeline_latency,
                    "total cycle count overflows 64 bits",
                )
            })?;
        let clock_period_ns = self.clock_period_ns();
        Ok(HardwareEstimate {
            outputs,
            total_cycles,
            clock_period_ns,
            time_ns: total_cycles as f64 * clock_period_ns,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HardwareEstimate {
    pub outputs: u64,
    pub total_cycles: u64,
    pub clock_period_ns: f64,
    pub time_ns: f64,
}

impl HardwareEstimate {
    pub fn time_us(&self) -> f64 {
        self.time_ns / 1e3
    }

    pub fn time_ms(&self) -> f64 {
        self.time_ns / 1e6
    }

    /// Runs per second.
    pub fn throughput(&self) -> f64 {
        1e9 / self.time_ns
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Speedup {
    /// `cpu_time / hardware_time`.
    pub latency: f64,
    /// `hardware_throughput / cpu_throughput`.
    pub throughput: f64,
}

pub fn speedup(cpu_time: Duration, hw: &HardwareEstimate) -> Speedup {
    speedup_ns(cpu_time.as_secs_f64() * 1e9, hw)
}

/// [`speedup`] for a CPU time given in nanoseconds.
pub fn speedup_ns(cpu_ns: f64, hw: &HardwareEstimate) -> Speedup {
    let cpu_throughput = 1e9 / cpu_ns;
    Speedup {
        latency: cpu_ns / hw.time_ns,
        throughput: hw.throughput() / cpu_throughput,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9 * b.abs().max(1.0)
    }

    #[test]
    fn reference_case() {
        let params = HardwareParams::default();
        let est = params.estimate(900).unwrap();
        assert_eq!(est.total_cycles, 911);
        assert!(close(est.clock_period_ns, 10.0));
        assert!(close(est.time_ns, 9110.0));
        assert!(close(est.time_us(), 9.11));

        let s = speedup(Duration::from_micros(450), &est);
        assert!((s.latency - 49.4).abs() < 0.05, "latency speedup {}", s.latency);
        assert!(close(s.latency, s.throughput));
    }

    #[test]
    fn single_output_costs_fill_latency_only() {
        let est = HardwareParams::default().estimate(1).unwrap();
        assert_eq!(est.total_cycles, 12);
    }

    #[test]
    fn initiation_interval_scales_steady_state() {
        let params = HardwareParams {
            initiation_interval: 4,
            ..HardwareParams::default()
        };
        assert_eq!(params.estimate(10).unwrap().total_cycles, 12 + 9 * 4);
    }

    #[test]
    fn invalid_parameters_rejected() {
        let zero_clock = HardwareParams {
            clock_mhz: 0.0,
            ..HardwareParams::default()
        };
        assert!(zero_clock.estimate(10).is_err());
        let zero_ii = HardwareParams {
            initiation_interval: 0,
            ..HardwareParams::default()
        };
        assert!(zero_ii.estimate(10).is_err());
        assert!(HardwareParams::default().estimate(0).is_err());
    }

    #[test]
    fn cycle_count_overflow_names_the_field() {
        let huge_ii = HardwareParams {
            initiation_interval: u64::MAX / 2,
            ..HardwareParams::default()
        };
        huge_ii.validate().unwrap();
        match huge_ii.estimate(900) {
            Err(Error::InvalidConfiguration { field, .. }) => {
                assert_eq!(field, "hardware.initiation_interval")
            }
            other => panic!("expected configuration error, got {:?}", other),
        }

        let huge_latency = HardwareParams {
            pipeline_latency: u64::MAX,
            ..HardwareParams::default()
        };
        match huge_latency.estimate(2) {
            Err(Error::InvalidConfiguration { field, .. }) => {
                assert_eq!(field, "hardware.pipeline_latency")
            }
            other => panic!("expected configuration error, got {:?}", other),
        }
        assert_eq!(huge_latency.estimate(1).unwrap().total_cycles, u64::MAX);
    }

    #[test]
    fn speedup_accepts_cpu_times_beyond_duration_range() {
        let est = HardwareParams::default().estimate(900).unwrap();
        let s = speedup_ns(1e300, &est);
        assert!(s.latency.is_finite() && s.latency > 0.0);
        let d = speedup(Duration::from_micros(450), &est);
        assert!(close(speedup_ns(450_000.0, &est).latency, d.latency));
    }

    #[test]
    fn throughput_is_inverse_latency() {
        let est = HardwareParams::default().estimate(900).unwrap();
        assert!(close(est.throughput() * est.time_ns, 1e9));
    }
}
