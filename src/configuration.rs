// Copyright 2020 ETH Zurich and University of Bologna.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Run configuration, loaded from YAML or JSON.

use crate::conv::{AccumulatorWidth, ConvEngine};
use crate::error::{Error, Result};
use crate::grid::{Kernel, EDGE_DETECT_3X3};
use crate::model::HardwareParams;
use crate::postprocess::PoolPolicy;
use crate::quantize::{QuantParams, Quantizer};
use crate::sample::SyntheticPattern;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Every parameter of a reference run. All fields have defaults, so an
/// empty file yields the bring-up configuration (32x32 image, 3x3 edge
/// kernel, 16-bit accumulator, 100 MHz pipeline with L=12, II=1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Configuration {
    pub image_size: usize,
    pub kernel_size: usize,
    pub accumulator_width: AccumulatorWidth,
    pub warmup_iterations: usize,
    pub measured_iterations: usize,
    pub threads: usize,
    pub pool_size: usize,
    pub pool_policy: PoolPolicy,
    pub quantization: QuantParams,
    pub hardware: HardwareParams,
    /// Row-major kernel weights; defaults to the edge-detection kernel for
    /// K=3 and all-ones otherwise.
    pub kernel: Option<Vec<i8>>,
    /// Input used when no sample file is available.
    pub synthetic: SyntheticPattern,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            image_size: 32,
            kernel_size: 3,
            accumulator_width: AccumulatorWidth::default(),
            warmup_iterations: 10,
            measured_iterations: 1000,
            threads: 1,
            pool_size: 2,
            pool_policy: PoolPolicy::default(),
            quantization: QuantParams::default(),
            hardware: HardwareParams::default(),
            kernel: None,
            synthetic: SyntheticPattern::default(),
        }
    }
}

impl Configuration {
    /// Parse a configuration file. The format follows the extension:
    /// `.yaml`/`.yml` or `.json`.
    pub fn parse<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        let origin = path.display().to_string();
        let config: Configuration = match ext.as_deref() {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&text).map_err(|e| {
                let loc = e.location();
                Error::Parse {
                    path: origin,
                    line: loc.as_ref().map(|l| l.line()).unwrap_or(0),
                    column: loc.as_ref().map(|l| l.column()).unwrap_or(0),
                    message: e.to_string(),
                }
            })?,
            Some("json") => serde_json::from_str(&text).map_err(|e| Error::Parse {
                path: origin,
                line: e.line(),
                column: e.column(),
                message: e.to_string(),
            })?,
            _ => {
                return Err(Error::config(
                    "configuration",
                    path.display(),
                    "expected a .yaml, .yml or .json file",
                ))
            }
        };
        config.validate()?;
        debug!("Loaded configuration from {}: {:?}", path.display(), config);
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.kernel_size == 0 || self.kernel_size % 2 == 0 {
            return Err(Error::config("kernel_size", self.kernel_size, "must be odd and non-zero"));
        }
        if self.kernel_size > self.image_size {
            return Err(Error::config(
                "image_size",
                self.image_size,
                "must be at least kernel_size",
            ));
        }
        if self.measured_iterations == 0 {
            return Err(Error::config(
                "measured_iterations",
                self.measured_iterations,
                "must be non-zero",
            ));
        }
        if self.threads == 0 {
            return Err(Error::config("threads", self.threads, "must be non-zero"));
        }
        if self.pool_size == 0 {
            return Err(Error::config("pool_size", self.pool_size, "must be non-zero"));
        }
        self.quantization.validate()?;
        self.hardware.validate()?;
        self.kernel()?;
        Ok(())
    }

    pub fn kernel(&self) -> Result<Kernel> {
        match &self.kernel {
            Some(weights) => Kernel::new(self.kernel_size, weights.clone()),
            None if self.kernel_size == 3 => Kernel::new(3, EDGE_DETECT_3X3.to_vec()),
            None => Kernel::ones(self.kernel_size),
        }
    }

    pub fn quantizer(&self) -> Result<Quantizer> {
        Quantizer::new(self.quantization)
    }

    pub fn engine(&self) -> ConvEngine {
        ConvEngine::new(self.kernel_size, self.accumulator_width)
    }

    /// Number of outputs of a full sweep over a square image.
    pub fn output_count(&self) -> u64 {
        let side = (self.image_size + 1).saturating_sub(self.kernel_size) as u64;
        side * side
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantize::Rounding;
    use std::fs;

    #[test]
    fn defaults_validate() {
        let c = Configuration::default();
        c.validate().unwrap();
        assert_eq!(c.output_count(), 900);
        assert_eq!(c.kernel().unwrap().flatten(), EDGE_DETECT_3X3.to_vec());
    }

    #[test]
    fn yaml_overrides_selected_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.yaml");
        fs::write(
            &path,
            "image_size: 8\naccumulator_width: 32\nquantization:\n  scale: 8\n  rounding: arithmetic_shift\nhardware:\n  clock_mhz: 200.0\n",
        )
        .unwrap();
        let c = Configuration::parse(&path).unwrap();
        assert_eq!(c.image_size, 8);
        assert_eq!(c.accumulator_width.bits(), 32);
        assert_eq!(c.quantization.rounding, Rounding::ArithmeticShift);
        assert_eq!(c.quantization.mean, 128);
        assert_eq!(c.hardware.pipeline_latency, 12);
        assert_eq!(c.measured_iterations, 1000);
    }

    #[test]
    fn json_configuration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        fs::write(
            &path,
            r#"{"kernel_size": 3, "kernel": [1,1,1,1,1,1,1,1,1], "pool_policy": "truncate"}"#,
        )
        .unwrap();
        let c = Configuration::parse(&path).unwrap();
        assert_eq!(c.kernel().unwrap().flatten(), vec![1; 9]);
        assert_eq!(c.pool_policy, PoolPolicy::Truncate);
    }

    #[test]
    fn invalid_accumulator_width_rejected_at_parse() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        fs::write(&path, r#"{"accumulator_width": 8}"#).unwrap();
        assert!(Configuration::parse(&path).is_err());
    }

    #[test]
    fn unknown_fields_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        fs::write(&path, r#"{"repeat": 5}"#).unwrap();
        assert!(matches!(
            Configuration::parse(&path),
            Err(Error::Parse { .. })
        ));
    }

    #[test]
    fn unknown_extension_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.toml");
        fs::write(&path, "").unwrap();
        assert!(matches!(
            Configuration::parse(&path),
            Err(Error::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn semantic_checks() {
        let mut c = Configuration::default();
        c.kernel_size = 4;
        assert!(c.validate().is_err());

        let mut c = Configuration::default();
        c.kernel = Some(vec![1; 4]);
        assert!(matches!(c.validate(), Err(Error::ShapeMismatch { .. })));

        let mut c = Configuration::default();
        c.image_size = 2;
        assert!(c.validate().is_err());

        let mut c = Configuration::default();
        c.quantization.scale = 3;
        c.quantization.rounding = Rounding::ArithmeticShift;
        assert!(c.validate().is_err());
    }

    #[test]
    fn larger_kernels_default_to_ones() {
        let mut c = Configuration::default();
        c.kernel_size = 5;
        assert_eq!(c.kernel().unwrap().flatten(), vec![1; 25]);
        assert_eq!(c.output_count(), 28 * 28);
    }
}
