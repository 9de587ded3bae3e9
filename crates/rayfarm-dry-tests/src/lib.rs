// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared test doubles and fixtures for rayfarm crates.
#![forbid(unsafe_code)]
//!
//! # Modules
//!
//! - [`config`] - In-memory config store fake for testing without filesystem
//! - [`repaint`] - Repaint port that records coverage reports
//! - [`scenes`] - Fixture scenes and probe-raster checks
//! - [`worker`] - Scripted worker endpoints with injectable faults

pub mod config;
pub mod repaint;
pub mod scenes;
pub mod worker;

// Re-export commonly used items at crate root for convenience
pub use config::{InMemoryConfigStore, StoreFailure};
pub use repaint::RecordingRepaint;
pub use scenes::{camera, empty_image_scene, probe_mismatches, sphere_scene};
pub use worker::{Call, Fault, ScriptedWorker};
