// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared raster and ordered result assembly.

use rayfarm_proto::{ColumnRange, ColumnsPayload, PixelColor};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

use crate::display::RepaintPort;

/// Why a band could not be written.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AssembleError {
    /// Band reaches past the raster's width.
    #[error("range {range} outside raster width {width}")]
    OutOfBounds {
        /// Offending range.
        range: ColumnRange,
        /// Raster width.
        width: u32,
    },
    /// Band carries the wrong number of colors.
    #[error("range {range} needs {expected} colors, got {actual}")]
    LengthMismatch {
        /// Offending range.
        range: ColumnRange,
        /// `range.len() * H`.
        expected: usize,
        /// Colors received.
        actual: usize,
    },
    /// Result was computed for another image height.
    #[error("result height {actual} does not match raster height {expected}")]
    HeightMismatch {
        /// Raster height.
        expected: u32,
        /// Height announced by the result.
        actual: u32,
    },
}

/// `W×H` image stored column by column.
///
/// Each column has its own lock, so writers of disjoint bands never contend
/// and readers only ever block on the columns being replaced.
pub struct Raster {
    width: u32,
    height: u32,
    columns: Vec<RwLock<Vec<PixelColor>>>,
}

impl Raster {
    /// Black raster of `width × height`.
    pub fn new(width: u32, height: u32) -> Self {
        let columns = (0..width)
            .map(|_| RwLock::new(vec![PixelColor::BLACK; height as usize]))
            .collect();
        Self {
            width,
            height,
            columns,
        }
    }

    /// Columns.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Rows.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// `(width, height)`.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Replace the cells of `range` with `colors` (column-major, `H` per column).
    ///
    /// Bounds and length are checked before anything is touched. The band's
    /// column locks are taken in ascending order and held together, so a
    /// reader never observes half a band.
    pub fn write_band(&self, range: ColumnRange, colors: &[PixelColor]) -> Result<(), AssembleError> {
        if !range.within(self.width) {
            return Err(AssembleError::OutOfBounds {
                range,
                width: self.width,
            });
        }
        let expected = range.cells(self.height);
        if colors.len() != expected {
            return Err(AssembleError::LengthMismatch {
                range,
                expected,
                actual: colors.len(),
            });
        }
        let mut guards: Vec<_> = self.columns[range.from as usize..range.to as usize]
            .iter()
            .map(|column| column.write().unwrap_or_else(PoisonError::into_inner))
            .collect();
        if self.height == 0 {
            return Ok(());
        }
        for (guard, band) in guards.iter_mut().zip(colors.chunks(self.height as usize)) {
            guard.copy_from_slice(band);
        }
        Ok(())
    }

    /// Color at `(column, row)`.
    pub fn pixel(&self, column: u32, row: u32) -> Option<PixelColor> {
        let cells = self
            .columns
            .get(column as usize)?
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        cells.get(row as usize).copied()
    }

    /// Row-major RGBA8 copy of the whole raster, alpha fully opaque.
    pub fn to_rgba8(&self) -> Vec<u8> {
        let (w, h) = (self.width as usize, self.height as usize);
        let mut out = vec![0u8; w * h * 4];
        for (x, column) in self.columns.iter().enumerate() {
            let cells = column.read().unwrap_or_else(PoisonError::into_inner);
            for (y, color) in cells.iter().enumerate() {
                let at = (y * w + x) * 4;
                out[at..at + 3].copy_from_slice(&color.to_array());
                out[at + 3] = 0xff;
            }
        }
        out
    }
}

/// Progress after one assembled band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coverage {
    /// Band just written.
    pub range: ColumnRange,
    /// Columns of `range` that were not covered before.
    pub newly_completed: u32,
    /// Columns covered so far.
    pub completed: u32,
    /// Raster width.
    pub total: u32,
}

impl Coverage {
    /// `true` once every column is covered.
    pub fn is_complete(&self) -> bool {
        self.completed == self.total
    }
}

/// Writes worker results into a [`Raster`] and tracks which columns are done.
pub struct ImageAssembler {
    raster: Arc<Raster>,
    covered: Vec<bool>,
    completed: u32,
    overwrites: u32,
    repaint: Arc<dyn RepaintPort>,
}

impl ImageAssembler {
    /// Assemble into `raster`, notifying `repaint` after every band.
    pub fn new(raster: Arc<Raster>, repaint: Arc<dyn RepaintPort>) -> Self {
        let covered = vec![false; raster.width() as usize];
        Self {
            raster,
            covered,
            completed: 0,
            overwrites: 0,
            repaint,
        }
    }

    /// Raster being filled.
    pub fn raster(&self) -> &Arc<Raster> {
        &self.raster
    }

    /// Write one result and report coverage.
    ///
    /// Writing an already covered band replaces its pixels but does not
    /// count toward completion again.
    pub fn assemble(&mut self, result: &ColumnsPayload) -> Result<Coverage, AssembleError> {
        if result.height != self.raster.height() {
            return Err(AssembleError::HeightMismatch {
                expected: self.raster.height(),
                actual: result.height,
            });
        }
        self.raster.write_band(result.range, &result.colors)?;

        let mut newly_completed = 0;
        for column in result.range.columns() {
            let seen = &mut self.covered[column as usize];
            if *seen {
                self.overwrites += 1;
            } else {
                *seen = true;
                newly_completed += 1;
            }
        }
        self.completed += newly_completed;
        let coverage = Coverage {
            range: result.range,
            newly_completed,
            completed: self.completed,
            total: self.raster.width(),
        };
        self.repaint.request_repaint(coverage);
        Ok(coverage)
    }

    /// Columns covered so far.
    pub fn completed_columns(&self) -> u32 {
        self.completed
    }

    /// Columns written more than once.
    pub fn overwrites(&self) -> u32 {
        self.overwrites
    }

    /// `true` once every column of the raster is covered.
    pub fn is_complete(&self) -> bool {
        self.completed == self.raster.width()
    }

    /// Maximal uncovered column spans, ascending.
    pub fn missing_ranges(&self) -> Vec<ColumnRange> {
        let mut gaps = Vec::new();
        let mut start: Option<u32> = None;
        for (column, covered) in (0u32..).zip(self.covered.iter().copied()) {
            match (covered, start) {
                (false, None) => start = Some(column),
                (true, Some(from)) => {
                    gaps.extend(ColumnRange::new(from, column));
                    start = None;
                }
                _ => {}
            }
        }
        if let Some(from) = start {
            gaps.extend(ColumnRange::new(from, self.raster.width()));
        }
        gaps
    }
}
