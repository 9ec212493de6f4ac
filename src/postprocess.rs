// Copyright 2020 ETH Zurich and University of Bologna.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Integer-domain stages applied after the convolution.

use crate::error::{Error, Result};
use crate::grid::FeatureMap;
use ndarray::{s, Array2};
use serde::{Deserialize, Serialize};

/// What max-pooling does with rows/columns that do not fill a whole tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolPolicy {
    /// Refuse maps whose dimensions are not multiples of the pool size.
    Strict,
    /// Drop the trailing remainder.
    Truncate,
}

impl Default for PoolPolicy {
    fn default() -> Self {
        PoolPolicy::Strict
    }
}

pub fn relu(map: &FeatureMap) -> FeatureMap {
    map.mapv(|x| x.max(0))
}

/// Replace each non-overlapping `pool`x`pool` tile with its maximum.
pub fn max_pool(map: &FeatureMap, pool: usize, policy: PoolPolicy) -> Result<FeatureMap> {
    let (height, width) = map.dim();
    let invalid = Error::InvalidPoolSize {
        pool,
        height,
        width,
    };
    if pool == 0 {
        return Err(invalid);
    }
    if policy == PoolPolicy::Strict && (height % pool != 0 || width % pool != 0) {
        return Err(invalid);
    }
    let (rows, cols) = (height / pool, width / pool);
    if rows == 0 || cols == 0 {
        return Err(invalid);
    }
    trace!(
        "Max-pool {}x{} map with {}x{} tiles -> {}x{}",
        height,
        width,
        pool,
        pool,
        rows,
        cols
    );
    let mut out = Array2::zeros((rows, cols));
    for ((r, c), v) in out.indexed_iter_mut() {
        let tile = map.slice(s![r * pool..(r + 1) * pool, c * pool..(c + 1) * pool]);
        *v = tile.iter().copied().max().unwrap_or(i32::MIN);
    }
    Ok(out)
}
