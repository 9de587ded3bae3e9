// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Display-facing adapters: repaint port, channel queue, frame surface.
//!
//! The render pipeline never waits on the display. The assembler pushes a
//! [`Coverage`] into a [`RepaintPort`] and moves on; the UI side drains a
//! [`RepaintQueue`] at its own pace and redraws a [`DisplaySurface`].

use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;

use crate::assembler::{Coverage, Raster};

/// Fire-and-forget repaint trigger.
pub trait RepaintPort: Send + Sync {
    /// Note that `coverage.range` changed. Must not block.
    fn request_repaint(&self, coverage: Coverage);
}

/// Discards repaint requests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRepaint;

impl RepaintPort for NoRepaint {
    fn request_repaint(&self, _coverage: Coverage) {}
}

/// Something that can present a [`Raster`].
pub trait DisplaySurface {
    /// Present `raster` from now on.
    fn set_raster(&mut self, raster: Arc<Raster>);
    /// Redraw current raster contents. Safe to call any number of times.
    fn repaint(&mut self);
    /// Raster dimensions `(W, H)`.
    fn preferred_size(&self) -> (u32, u32);
}

/// Repaint port backed by an unbounded channel.
#[derive(Clone)]
pub struct ChannelRepaint {
    tx: Sender<Coverage>,
}

impl RepaintPort for ChannelRepaint {
    fn request_repaint(&self, coverage: Coverage) {
        // A closed queue means nobody is watching.
        let _ = self.tx.send(coverage);
    }
}

/// Receiving end of a [`ChannelRepaint`].
pub struct RepaintQueue {
    rx: Receiver<Coverage>,
}

/// Connected repaint port and queue.
pub fn repaint_channel() -> (ChannelRepaint, RepaintQueue) {
    let (tx, rx) = mpsc::channel();
    (ChannelRepaint { tx }, RepaintQueue { rx })
}

impl RepaintQueue {
    /// Drain up to `max` pending repaint requests without blocking.
    pub fn drain(&self, max: usize) -> Vec<Coverage> {
        let mut out = Vec::new();
        for _ in 0..max {
            match self.rx.try_recv() {
                Ok(coverage) => out.push(coverage),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break,
            }
        }
        out
    }

    /// Drain pending requests and repaint `surface` once if there were any.
    ///
    /// Returns the drained requests.
    pub fn pump<D: DisplaySurface + ?Sized>(&self, surface: &mut D, max: usize) -> Vec<Coverage> {
        let drained = self.drain(max);
        if !drained.is_empty() {
            surface.repaint();
        }
        drained
    }
}

/// Presents a raster as an RGBA8 frame buffer, rebuilt on every repaint.
pub struct FrameSurface {
    raster: Arc<Raster>,
    frame: Vec<u8>,
    repaints: u64,
}

impl FrameSurface {
    /// Surface presenting `raster`; its preferred size is the raster's size.
    pub fn new(raster: Arc<Raster>) -> Self {
        let frame = raster.to_rgba8();
        Self {
            raster,
            frame,
            repaints: 0,
        }
    }

    /// Last presented frame, row-major RGBA8.
    pub fn frame(&self) -> &[u8] {
        &self.frame
    }

    /// Number of repaints so far.
    pub fn repaint_count(&self) -> u64 {
        self.repaints
    }
}

impl DisplaySurface for FrameSurface {
    fn set_raster(&mut self, raster: Arc<Raster>) {
        self.raster = raster;
        self.repaint();
    }

    fn repaint(&mut self) {
        self.frame = self.raster.to_rgba8();
        self.repaints += 1;
    }

    fn preferred_size(&self) -> (u32, u32) {
        self.raster.dimensions()
    }
}
