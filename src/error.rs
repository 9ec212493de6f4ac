// Copyright 2020 ETH Zurich and University of Bologna.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy shared by every stage of the reference datapath.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("window {k}x{k} at ({top}, {left}) exceeds {height}x{width} grid")]
    OutOfBounds {
        top: usize,
        left: usize,
        k: usize,
        height: usize,
        width: usize,
    },

    #[error("shape mismatch in {what}: expected {expected}, got {actual}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error(
        "accumulator overflow at MAC step {step}: partial sum {value} outside {width}-bit range [{min}, {max}]"
    )]
    OverflowDetected {
        step: usize,
        value: i64,
        width: u32,
        min: i64,
        max: i64,
    },

    #[error("pool size {pool} does not evenly divide {height}x{width} feature map")]
    InvalidPoolSize {
        pool: usize,
        height: usize,
        width: usize,
    },

    #[error("input artifact {0} not found")]
    MissingInputArtifact(PathBuf),

    #[error("{path}:{line}:{column}: {message}")]
    Parse {
        path: String,
        line: usize,
        column: usize,
        message: String,
    },

    #[error("invalid configuration: {field} = {value} ({reason})")]
    InvalidConfiguration {
        field: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error("device did not signal done after {polls} polls")]
    DeviceTimeout { polls: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl Error {
    pub(crate) fn config(field: &'static str, value: impl ToString, reason: &'static str) -> Self {
        Error::InvalidConfiguration {
            field,
            value: value.to_string(),
            reason,
        }
    }
}
