// Copyright 2020 ETH Zurich and University of Bologna.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Sample input artifacts: the plain-text grid format and the synthetic
//! fallback used when no sample file is available.

use crate::error::{Error, Result};
use crate::grid::RawGrid;
use itertools::Itertools;
use ndarray::Array2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Parse a grid of space-separated integers in `[0, 255]`, one row per line.
/// Blank lines are ignored. `origin` names the source in error messages.
pub fn parse_text_grid(text: &str, origin: &str) -> Result<RawGrid> {
    let parse_err = |line: usize, column: usize, message: String| Error::Parse {
        path: origin.to_string(),
        line,
        column,
        message,
    };
    let mut width = None;
    let mut height = 0;
    let mut data = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let lineno = lineno + 1;
        if line.trim().is_empty() {
            continue;
        }
        let mut count = 0;
        for (col, tok) in line.split_whitespace().enumerate() {
            let value: i64 = tok
                .parse()
                .map_err(|_| parse_err(lineno, col + 1, format!("`{}` is not an integer", tok)))?;
            if !(0..=255).contains(&value) {
                return Err(parse_err(
                    lineno,
                    col + 1,
                    format!("{} outside [0, 255]", value),
                ));
            }
            data.push(value as u8);
            count += 1;
        }
        match width {
            None => width = Some(count),
            Some(w) if w != count => {
                return Err(parse_err(
                    lineno,
                    count,
                    format!("row has {} values, expected {}", count, w),
                ))
            }
            _ => {}
        }
        height += 1;
    }
    let width = width.ok_or_else(|| parse_err(0, 0, "empty grid".to_string()))?;
    Ok(Array2::from_shape_vec((height, width), data).expect("rows checked for equal length"))
}

pub fn read_text_grid<P: AsRef<Path>>(path: P) -> Result<RawGrid> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;
    let grid = parse_text_grid(&text, &path.display().to_string())?;
    debug!("Read {:?} grid from {}", grid.dim(), path.display());
    Ok(grid)
}

pub fn format_text_grid(grid: &RawGrid) -> String {
    let mut out = String::new();
    for row in grid.outer_iter() {
        out.push_str(&row.iter().join(" "));
        out.push('\n');
    }
    out
}

pub fn write_text_grid<P: AsRef<Path>>(path: P, grid: &RawGrid) -> Result<()> {
    fs::write(path, format_text_grid(grid))?;
    Ok(())
}

/// Deterministic input used when no sample artifact is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyntheticPattern {
    /// Every pixel is 1.
    Ones,
    /// `pixel[r][c] = (r * width + c) mod 256`.
    Gradient,
    /// Uniform pixels from a ChaCha8 stream seeded with `seed`.
    Noise { seed: u64 },
}

impl Default for SyntheticPattern {
    fn default() -> Self {
        SyntheticPattern::Ones
    }
}

impl SyntheticPattern {
    pub fn generate(&self, height: usize, width: usize) -> RawGrid {
        match *self {
            SyntheticPattern::Ones => Array2::ones((height, width)),
            SyntheticPattern::Gradient => {
                Array2::from_shape_fn((height, width), |(r, c)| ((r * width + c) % 256) as u8)
            }
            SyntheticPattern::Noise { seed } => {
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                Array2::from_shape_fn((height, width), |_| rng.gen())
            }
        }
    }
}

impl fmt::Display for SyntheticPattern {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SyntheticPattern::Ones => write!(f, "ones"),
            SyntheticPattern::Gradient => write!(f, "gradient"),
            SyntheticPattern::Noise { seed } => write!(f, "noise(seed={})", seed),
        }
    }
}

/// Where the raw samples come from. Resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleSource {
    TextGrid(PathBuf),
    Synthetic(SyntheticPattern),
}

impl SampleSource {
    /// Use `path` if it names an existing file, otherwise fall back to
    /// `fallback`.
    pub fn detect(path: Option<&Path>, fallback: SyntheticPattern) -> Self {
        match path {
            Some(p) if p.is_file() => {
                info!("Sample input: {}", p.display());
                SampleSource::TextGrid(p.to_path_buf())
            }
            Some(p) => {
                warn!(
                    "{}; using synthetic {} input",
                    Error::MissingInputArtifact(p.to_path_buf()),
                    fallback
                );
                SampleSource::Synthetic(fallback)
            }
            None => {
                info!("No sample input given; using synthetic {} input", fallback);
                SampleSource::Synthetic(fallback)
            }
        }
    }

    /// Load the samples. Synthetic sources produce a `size`x`size` grid.
    pub fn load(&self, size: usize) -> Result<RawGrid> {
        match self {
            SampleSource::TextGrid(path) => {
                if !path.is_file() {
                    return Err(Error::MissingInputArtifact(path.clone()));
                }
                let grid = read_text_grid(path)?;
                if grid.dim() != (size, size) {
                    warn!(
                        "{} is {}x{}, configured image size is {}x{}",
                        path.display(),
                        grid.nrows(),
                        grid.ncols(),
                        size,
                        size
                    );
                }
                Ok(grid)
            }
            SampleSource::Synthetic(pattern) => Ok(pattern.generate(size, size)),
        }
    }

    /// Identifier written into reports.
    pub fn identifier(&self) -> String {
        match self {
            SampleSource::TextGrid(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            SampleSource::Synthetic(pattern) => format!("synthetic ({})", pattern),
        }
    }
}
