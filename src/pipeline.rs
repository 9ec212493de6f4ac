// Copyright 2020 ETH Zurich and University of Bologna.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! End-to-end reference run: load, quantize, convolve, post-process.

use crate::bench::{BenchmarkHarness, BenchmarkResult};
use crate::configuration::Configuration;
use crate::conv::ConvEngine;
use crate::device::{reference_soc, Driver, CNN_BASE_ADDR};
use crate::error::{Error, Result};
use crate::grid::{output_dim, FeatureMap, Kernel, QuantGrid};
use crate::model::{speedup, HardwareEstimate, Speedup};
use crate::postprocess::{max_pool, relu};
use crate::quantize::Quantizer;
use crate::report::{GoldenReference, PerformanceReport, Summary};
use crate::sample::SampleSource;
use crate::verify::{co_verify, VerificationReport};
use crate::window::WindowExtractor;

/// Intermediate results of one full pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stages {
    pub convolved: FeatureMap,
    pub activated: FeatureMap,
    pub pooled: FeatureMap,
}

/// Measured and modelled timing of one image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Performance {
    pub image_size: (usize, usize),
    pub output_size: (usize, usize),
    pub cpu: BenchmarkResult,
    pub estimate: HardwareEstimate,
    pub speedup: Speedup,
}

/// A configured reference run bound to a sample source.
///
/// The source is resolved by the caller before construction, so nothing in
/// here probes the filesystem for optional inputs.
pub struct Pipeline {
    config: Configuration,
    source: SampleSource,
    quantizer: Quantizer,
    extractor: WindowExtractor,
    engine: ConvEngine,
    kernel: Kernel,
}

impl Pipeline {
    pub fn new(config: Configuration, source: SampleSource) -> Result<Self> {
        config.validate()?;
        let quantizer = config.quantizer()?;
        let kernel = config.kernel()?;
        let engine = config.engine();
        let extractor = WindowExtractor::new(config.kernel_size);
        debug!(
            "Pipeline: {} input, {}x{} kernel, {}-bit accumulator",
            source.identifier(),
            config.kernel_size,
            config.kernel_size,
            engine.width().bits()
        );
        Ok(Self {
            config,
            source,
            quantizer,
            extractor,
            engine,
            kernel,
        })
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn source(&self) -> &SampleSource {
        &self.source
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    pub fn engine(&self) -> &ConvEngine {
        &self.engine
    }

    /// Load the samples and quantize them to the signed 8-bit domain.
    pub fn load(&self) -> Result<QuantGrid> {
        let raw = self.source.load(self.config.image_size)?;
        Ok(self.quantizer.quantize_grid(&raw))
    }

    /// Golden value of the window at `(top, left)`.
    pub fn golden(&self, image: &QuantGrid, top: usize, left: usize) -> Result<GoldenReference> {
        let window = self.extractor.extract(image, top, left)?;
        let output = self.engine.dot(&window, &self.kernel)?;
        info!("Golden output at ({}, {}): {}", top, left, output);
        Ok(GoldenReference::new(
            self.source.identifier(),
            window,
            &self.kernel,
            output,
        ))
    }

    pub fn convolve(&self, image: &QuantGrid) -> Result<FeatureMap> {
        self.engine
            .convolve_parallel(image, &self.kernel, self.config.threads)
    }

    /// Convolution followed by ReLU and max-pooling.
    pub fn run(&self, image: &QuantGrid) -> Result<Stages> {
        let convolved = self.convolve(image)?;
        let activated = relu(&convolved);
        let pooled = max_pool(&activated, self.config.pool_size, self.config.pool_policy)?;
        Ok(Stages {
            convolved,
            activated,
            pooled,
        })
    }

    pub fn benchmark(&self, image: &QuantGrid) -> Result<BenchmarkResult> {
        let harness = BenchmarkHarness::new(
            self.config.warmup_iterations,
            self.config.measured_iterations,
        )?;
        harness.measure_convolution(&self.engine, image, &self.kernel, self.config.threads)
    }

    fn output_size(&self, image: &QuantGrid) -> Result<(usize, usize)> {
        let (height, width) = image.dim();
        output_dim(height, width, self.config.kernel_size).ok_or(Error::OutOfBounds {
            top: 0,
            left: 0,
            k: self.config.kernel_size,
            height,
            width,
        })
    }

    /// Theoretical accelerator time for a full sweep over `image`.
    pub fn estimate(&self, image: &QuantGrid) -> Result<HardwareEstimate> {
        let (rows, cols) = self.output_size(image)?;
        self.config.hardware.estimate((rows * cols) as u64)
    }

    /// Benchmark `image` and compare against the accelerator model.
    pub fn performance(&self, image: &QuantGrid) -> Result<Performance> {
        let output_size = self.output_size(image)?;
        let cpu = self.benchmark(image)?;
        let estimate = self.estimate(image)?;
        let speedup = speedup(cpu.average, &estimate);
        Ok(Performance {
            image_size: image.dim(),
            output_size,
            cpu,
            estimate,
            speedup,
        })
    }

    pub fn report<'a>(&'a self, perf: &'a Performance) -> PerformanceReport<'a> {
        PerformanceReport {
            image_size: perf.image_size,
            kernel_size: self.config.kernel_size,
            output_size: perf.output_size,
            cpu: &perf.cpu,
            hardware: &self.config.hardware,
            estimate: &perf.estimate,
            speedup: &perf.speedup,
        }
    }

    pub fn summary(&self, perf: &Performance) -> Summary {
        self.report(perf).summary()
    }

    /// Co-verify every window of `image` against the register-level device
    /// model with the configured register width.
    pub fn verify(&self, image: &QuantGrid) -> Result<VerificationReport> {
        let width = self.config.hardware.register_width;
        let bus = reference_soc(width);
        let driver = Driver::new(&bus, CNN_BASE_ADDR, width);
        co_verify(image, &self.kernel, &self.engine, &driver)
    }
}
