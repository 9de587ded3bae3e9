// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Repaint port that remembers what it was told.

use rayfarm_coordinator::{Coverage, RepaintPort};
use std::sync::{Mutex, PoisonError};

/// Records every repaint request.
#[derive(Default)]
pub struct RecordingRepaint {
    seen: Mutex<Vec<Coverage>>,
}

impl RecordingRepaint {
    /// Empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests received, oldest first.
    pub fn coverages(&self) -> Vec<Coverage> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of requests received.
    pub fn count(&self) -> usize {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl RepaintPort for RecordingRepaint {
    fn request_repaint(&self, coverage: Coverage) {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(coverage);
    }
}
