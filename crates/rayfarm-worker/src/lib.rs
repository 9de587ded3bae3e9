// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Worker side of the rayfarm protocol.
//!
//! A worker is a passive responder. Each connection gets its own
//! [`WorkerSession`], which starts `Live` (answers `ping`) and becomes `Ready`
//! only after an `init` hands it a scene. The scene is held by a
//! [`BoundScene`] owned by that session, so two coordinators talking to the
//! same worker process never see each other's scenes.

mod server;
mod session;
mod shader;

pub use server::{encode_reply, serve, serve_connection};
pub use session::{BoundScene, WorkerSession};
pub use shader::{ProbeShader, Shader};
