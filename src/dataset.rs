// Copyright 2020 ETH Zurich and University of Bologna.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Validation datasets: sample grids on disk plus a labels file.

use crate::error::{Error, Result};
use crate::sample::{write_text_grid, SyntheticPattern};
use std::fs;
use std::path::{Path, PathBuf};

pub const LABELS_FILE: &str = "labels.txt";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub file: String,
    pub label: i64,
}

/// Contents of a labels file, one `<filename> <integer label>` per line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSet {
    pub entries: Vec<Label>,
}

impl LabelSet {
    pub fn parse(text: &str, origin: &str) -> Result<Self> {
        let mut entries = Vec::new();
        for (i, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<_> = line.split_whitespace().collect();
            let err = |column, message: &str| Error::Parse {
                path: origin.to_string(),
                line: i + 1,
                column,
                message: message.to_string(),
            };
            if fields.len() != 2 {
                return Err(err(1, "expected `<filename> <integer label>`"));
            }
            let label: i64 = fields[1]
                .parse()
                .map_err(|_| err(2, "label is not an integer"))?;
            entries.push(Label {
                file: fields[0].to_string(),
                label,
            });
        }
        Ok(Self { entries })
    }

    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        Self::parse(&fs::read_to_string(path)?, &path.display().to_string())
    }

    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|e| format!("{} {}\n", e.file, e.label))
            .collect()
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, self.render())?;
        Ok(())
    }
}

/// Write `count` noise grids of `size`x`size` pixels named `img_<i>.txt`
/// into `dir`, plus a labels file assigning label 0 to each. Grid `i` is
/// seeded with `seed + i`.
pub fn generate<P: AsRef<Path>>(dir: P, count: usize, size: usize, seed: u64) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;
    let mut labels = LabelSet::default();
    let mut written = Vec::with_capacity(count);
    for i in 0..count {
        let name = format!("img_{}.txt", i);
        let path = dir.join(&name);
        let grid = SyntheticPattern::Noise {
            seed: seed.wrapping_add(i as u64),
        }
        .generate(size, size);
        write_text_grid(&path, &grid)?;
        info!("Generated: {} ({}x{} grayscale)", name, size, size);
        labels.entries.push(Label {
            file: name,
            label: 0,
        });
        written.push(path);
    }
    labels.write(dir.join(LABELS_FILE))?;
    Ok(written)
}
