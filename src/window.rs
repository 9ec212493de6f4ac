// Copyright 2020 ETH Zurich and University of Bologna.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Window extraction in accelerator streaming order.

use crate::error::{Error, Result};
use crate::grid::{output_dim, QuantGrid, Window};
use ndarray::s;

/// Pull the `k`x`k` neighbourhood with top-left corner `(top, left)` out of
/// `grid`, row-major.
pub fn extract(grid: &QuantGrid, top: usize, left: usize, k: usize) -> Result<Window> {
    let (height, width) = grid.dim();
    if k == 0 || top + k > height || left + k > width {
        return Err(Error::OutOfBounds {
            top,
            left,
            k,
            height,
            width,
        });
    }
    let values = grid
        .slice(s![top..top + k, left..left + k])
        .iter()
        .copied()
        .collect();
    Ok(Window::from_parts(k, values))
}

#[derive(Debug, Clone, Copy)]
pub struct WindowExtractor {
    k: usize,
}

impl WindowExtractor {
    pub fn new(k: usize) -> Self {
        Self { k }
    }

    pub fn side(&self) -> usize {
        self.k
    }

    pub fn extract(&self, grid: &QuantGrid, top: usize, left: usize) -> Result<Window> {
        extract(grid, top, left, self.k)
    }

    /// Every valid window of `grid`, top-left to bottom-right.
    pub fn windows<'a>(&self, grid: &'a QuantGrid) -> Windows<'a> {
        let (h, w) = grid.dim();
        let (rows, cols) = output_dim(h, w, self.k).unwrap_or((0, 0));
        Windows {
            grid,
            k: self.k,
            rows,
            cols,
            next: 0,
        }
    }
}

/// Row-major iterator over `((row, col), window)` pairs.
pub struct Windows<'a> {
    grid: &'a QuantGrid,
    k: usize,
    rows: usize,
    cols: usize,
    next: usize,
}

impl<'a> Iterator for Windows<'a> {
    type Item = ((usize, usize), Window);

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.rows * self.cols {
            return None;
        }
        let (r, c) = (self.next / self.cols, self.next % self.cols);
        self.next += 1;
        let window = extract(self.grid, r, c, self.k).ok()?;
        Some(((r, c), window))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.rows * self.cols - self.next.min(self.rows * self.cols);
        (left, Some(left))
    }
}

impl<'a> ExactSizeIterator for Windows<'a> {}
