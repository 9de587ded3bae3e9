// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Coordinator side of rayfarm: spreads one image over many render workers.
//!
//! A [`RenderSession`] pings every [`WorkerEndpoint`], hands the survivors the
//! scene, splits the image width into column ranges with [`partition`] and
//! collects the results into a shared [`Raster`] through an
//! [`ImageAssembler`]. Display code watches progress through a
//! [`RepaintPort`] without ever blocking the render.
//!
//! ```no_run
//! # async fn demo(scene: rayfarm_proto::SceneDescriptor) {
//! use rayfarm_app_core::prefs::CoordinatorPrefs;
//! use rayfarm_coordinator::{workers_from_prefs, DispatchPolicy, RenderSession};
//!
//! let prefs = CoordinatorPrefs::default();
//! let mut session = RenderSession::new(
//!     scene,
//!     workers_from_prefs(&prefs),
//!     DispatchPolicy::from(&prefs),
//! );
//! let report = session.run().await;
//! # let _ = report;
//! # }
//! ```

pub mod assembler;
pub mod dispatcher;
pub mod display;
pub mod endpoint;
pub mod partition;
pub mod session;
pub mod transport;

pub use assembler::{AssembleError, Coverage, ImageAssembler, Raster};
pub use dispatcher::{DispatchPolicy, DispatchStats, Dispatcher, Exclusion, Phase, WorkerStatus};
pub use display::{
    repaint_channel, ChannelRepaint, DisplaySurface, FrameSurface, NoRepaint, RepaintPort,
    RepaintQueue,
};
pub use endpoint::{EndpointError, RemoteWorker, Transport, WorkerEndpoint};
pub use partition::partition;
pub use session::{AbortHandle, RenderError, RenderReport, RenderSession, SessionState};
pub use transport::{workers_from_prefs, InProcessTransport, SocketTransport};
