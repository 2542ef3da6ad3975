// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The physical layout of the TCAM rows in one MAU stage.
//!
//! Rows are split into two halves at a midpoint.  Within a half, a row may
//! chain its result into the neighbouring row on the midpoint side, building
//! one wide match out of several rows.  The row on either side of the
//! midpoint is the only one that can chain into the other half.

use std::ops::Range;

/// Row count of a Tofino MAU stage
pub const TOFINO_TCAM_ROWS: usize = 12;
/// Column count of a Tofino MAU stage
pub const TOFINO_TCAM_COLS: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Half {
    Lower,
    Upper,
}

impl Half {
    pub fn other(self) -> Half {
        match self {
            Half::Lower => Half::Upper,
            Half::Upper => Half::Lower,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TcamRowTopology {
    rows: usize,
    cols: usize,
}

impl TcamRowTopology {
    /// Row bitmaps are carried in a u32, so there can be at most 32 rows.
    /// The row count must be even, with at least one row per half.
    pub fn new(rows: usize, cols: usize) -> Option<Self> {
        if rows == 0 || rows % 2 != 0 || rows > u32::BITS as usize || cols == 0
        {
            return None;
        }
        Some(TcamRowTopology { rows, cols })
    }

    pub fn tofino() -> Self {
        TcamRowTopology {
            rows: TOFINO_TCAM_ROWS,
            cols: TOFINO_TCAM_COLS,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// The first row of the upper half
    pub fn midpoint(&self) -> usize {
        self.rows / 2
    }

    pub fn contains(&self, row: usize, col: usize) -> bool {
        row < self.rows && col < self.cols
    }

    pub fn half_of(&self, row: usize) -> Half {
        if row < self.midpoint() {
            Half::Lower
        } else {
            Half::Upper
        }
    }

    pub fn half_rows(&self, half: Half) -> Range<usize> {
        match half {
            Half::Lower => 0..self.midpoint(),
            Half::Upper => self.midpoint()..self.rows,
        }
    }

    /// The row of `half` adjacent to the midpoint
    pub fn boundary_row(&self, half: Half) -> usize {
        match half {
            Half::Lower => self.midpoint() - 1,
            Half::Upper => self.midpoint(),
        }
    }

    /// The neighbour of `row` on the midpoint side, within the same half
    pub fn inner_neighbor(&self, row: usize) -> Option<usize> {
        if row >= self.rows || row == self.boundary_row(self.half_of(row)) {
            return None;
        }
        match self.half_of(row) {
            Half::Lower => Some(row + 1),
            Half::Upper => Some(row - 1),
        }
    }

    /// The neighbour of `row` away from the midpoint
    pub fn outer_neighbor(&self, row: usize) -> Option<usize> {
        if row >= self.rows {
            return None;
        }
        match self.half_of(row) {
            Half::Lower => row.checked_sub(1),
            Half::Upper => (row + 1 < self.rows).then_some(row + 1),
        }
    }

    pub fn row_bit(&self, row: usize) -> u32 {
        1 << row
    }

    pub fn half_mask(&self, half: Half) -> u32 {
        self.half_rows(half).fold(0, |mask, row| mask | self.row_bit(row))
    }

    /// Every row whose bit is set in `mask`, lowest first
    pub fn rows_in(&self, mask: u32) -> impl Iterator<Item = usize> + '_ {
        (0..self.rows).filter(move |row| mask & self.row_bit(*row) != 0)
    }
}

impl Default for TcamRowTopology {
    fn default() -> Self {
        TcamRowTopology::tofino()
    }
}
