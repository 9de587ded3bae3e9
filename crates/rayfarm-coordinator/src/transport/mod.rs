// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Ways to carry request packets to a worker.

mod local;
mod socket;

pub use local::InProcessTransport;
pub use socket::{workers_from_prefs, SocketTransport};
