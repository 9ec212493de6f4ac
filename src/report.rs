// Copyright 2020 ETH Zurich and University of Bologna.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Golden-reference and performance reports.

use crate::bench::BenchmarkResult;
use crate::error::Result;
use crate::grid::{FeatureMap, Kernel, Window};
use crate::model::{HardwareEstimate, HardwareParams, Speedup};
use itertools::Itertools;
use serde::Serialize;
use std::fmt;
use std::io::Write;
use std::path::Path;

/// Everything the hardware testbench compares against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoldenReference {
    pub source: String,
    pub window: Window,
    pub weights: Vec<i8>,
    pub output: i32,
}

impl GoldenReference {
    pub fn new(source: String, window: Window, kernel: &Kernel, output: i32) -> Self {
        Self {
            source,
            window,
            weights: kernel.flatten(),
            output,
        }
    }

    /// Render the report. Field order is fixed: source, window, weights,
    /// output.
    pub fn render(&self) -> String {
        self.to_string()
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        std::fs::write(path, self.render())?;
        info!("Golden reference written to {}", path.display());
        Ok(())
    }
}

impl fmt::Display for GoldenReference {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let k = self.window.side();
        writeln!(f, "CPU Reference Output for FPGA Verification")?;
        writeln!(f, "{}", "=".repeat(50))?;
        writeln!(f)?;
        writeln!(f, "Input image : {}", self.source)?;
        writeln!(f, "{}x{} window  : [{}]", k, k, self.window.values().iter().join(", "))?;
        writeln!(f, "Weights     : [{}]", self.weights.iter().join(", "))?;
        writeln!(f, "CPU Output  : {}", self.output)?;
        writeln!(f)?;
        writeln!(f, "Used as golden reference for FPGA verification.")
    }
}

/// Inputs of the console performance report.
#[derive(Debug, Clone, Copy)]
pub struct PerformanceReport<'a> {
    pub image_size: (usize, usize),
    pub kernel_size: usize,
    pub output_size: (usize, usize),
    pub cpu: &'a BenchmarkResult,
    pub hardware: &'a HardwareParams,
    pub estimate: &'a HardwareEstimate,
    pub speedup: &'a Speedup,
}

impl<'a> PerformanceReport<'a> {
    pub fn render(&self) -> String {
        self.to_string()
    }

    pub fn summary(&self) -> Summary {
        Summary {
            image_size: self.image_size,
            kernel_size: self.kernel_size,
            output_size: self.output_size,
            representative: self.cpu.representative,
            samples: self.cpu.samples,
            cpu_latency_ms: self.cpu.average_ms(),
            hardware_latency_ms: self.estimate.time_ms(),
            total_cycles: self.estimate.total_cycles,
            latency_speedup: self.speedup.latency,
            throughput_speedup: self.speedup.throughput,
        }
    }
}

impl<'a> fmt::Display for PerformanceReport<'a> {
    fn fmt(&self, s: &mut fmt::Formatter) -> fmt::Result {
        let bar = "=".repeat(70);
        let rule = "-".repeat(70);
        let (ih, iw) = self.image_size;
        let (oh, ow) = self.output_size;
        let k = self.kernel_size;
        let cpu_ms = self.cpu.average_ms();
        let est = self.estimate;
        let hw = self.hardware;

        writeln!(s, "{}", bar)?;
        writeln!(s, " SPEEDUP ANALYSIS: CPU reference vs pipelined accelerator")?;
        writeln!(s, "{}", bar)?;
        writeln!(s)?;
        writeln!(s, "CONVOLUTION PARAMETERS")?;
        writeln!(s, "   Image size:       {}x{}", ih, iw)?;
        writeln!(s, "   Kernel size:      {}x{}", k, k)?;
        writeln!(s, "   Output size:      {}x{} = {} pixels", oh, ow, oh * ow)?;
        writeln!(s, "   Output[0,0]:      {}", self.cpu.representative)?;
        writeln!(s)?;
        writeln!(s, "CPU PERFORMANCE (measured, {} runs)", self.cpu.samples)?;
        writeln!(s, "   Latency:          {:.6} ms ({:.3} us)", cpu_ms, cpu_ms * 1e3)?;
        writeln!(s, "   Throughput:       {:.2} runs/sec", self.cpu.throughput())?;
        writeln!(s)?;
        writeln!(s, "ACCELERATOR PERFORMANCE (theoretical)")?;
        writeln!(s, "   Clock frequency:  {} MHz", hw.clock_mhz)?;
        writeln!(s, "   Clock period:     {:.1} ns", est.clock_period_ns)?;
        writeln!(s, "   Pipeline latency: {} cycles", hw.pipeline_latency)?;
        writeln!(s, "   Initiation Int.:  {} (II={})", hw.initiation_interval, hw.initiation_interval)?;
        writeln!(s, "   Total cycles:     {}", est.total_cycles)?;
        writeln!(s, "   Latency:          {:.6} ms ({:.3} us)", est.time_ms(), est.time_us())?;
        writeln!(s, "   Throughput:       {:.2} runs/sec", est.throughput())?;
        writeln!(s)?;
        writeln!(s, "EXPECTED SPEEDUP")?;
        writeln!(s, "   Latency speedup:     {:.2}x", self.speedup.latency)?;
        writeln!(s, "   Throughput speedup:  {:.2}x", self.speedup.throughput)?;
        writeln!(s)?;
        writeln!(s, "{}", rule)?;
        writeln!(s, " T_hw = (L + (N-1) x II) x T_clk")?;
        writeln!(
            s,
            "      = ({} + ({}-1) x {}) x {}ns",
            hw.pipeline_latency, est.outputs, hw.initiation_interval, est.clock_period_ns
        )?;
        writeln!(s, "      = {} x {}ns", est.total_cycles, est.clock_period_ns)?;
        writeln!(s, "      = {:.1} ns = {:.3} us", est.time_ns, est.time_us())?;
        writeln!(s, "{}", rule)?;
        Ok(())
    }
}

/// Machine-readable form of the performance report.
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub image_size: (usize, usize),
    pub kernel_size: usize,
    pub output_size: (usize, usize),
    pub representative: i32,
    pub samples: usize,
    pub cpu_latency_ms: f64,
    pub hardware_latency_ms: f64,
    pub total_cycles: u64,
    pub latency_speedup: f64,
    pub throughput_speedup: f64,
}

/// Write `map` as CSV, one record per output row.
pub fn dump_feature_map<W: Write>(map: &FeatureMap, out: W) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new().has_headers(false).from_writer(out);
    for row in map.outer_iter() {
        wtr.write_record(row.iter().map(|v| v.to_string()))?;
    }
    wtr.flush()?;
    Ok(())
}
