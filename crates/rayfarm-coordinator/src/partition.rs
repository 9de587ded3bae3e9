// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Column partitioning.

use rayfarm_proto::ColumnRange;

/// Split `[0, width)` into near-equal contiguous ranges, one per worker.
///
/// The first `width % n` ranges get one extra column, so no two ranges differ
/// by more than one. With more workers than columns only `width` one-column
/// ranges are produced; the rest stay unassigned. Zero workers or zero width
/// yields no ranges.
pub fn partition(workers: usize, width: u32) -> Vec<ColumnRange> {
    let n = match u32::try_from(workers) {
        Ok(n) => n.min(width),
        Err(_) => width,
    };
    if n == 0 {
        return Vec::new();
    }
    let base = width / n;
    let remainder = width % n;
    let mut ranges = Vec::with_capacity(n as usize);
    let mut from = 0u32;
    for i in 0..n {
        let len = base + u32::from(i < remainder);
        let to = from + len;
        ranges.extend(ColumnRange::new(from, to));
        from = to;
    }
    ranges
}
