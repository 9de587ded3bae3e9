// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared application services for rayfarm processes (config, prefs).
//! Storage backends live in adapter crates; this crate only owns the port.

pub mod config;
pub mod prefs;
