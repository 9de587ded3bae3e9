// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! One end-to-end render request.

use rayfarm_proto::{ColumnRange, SceneDescriptor};
use rayfarm_scene::SceneError;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::assembler::{ImageAssembler, Raster};
use crate::dispatcher::{DispatchPolicy, Dispatcher, Exclusion, Outcome};
use crate::display::{NoRepaint, RepaintPort};
use crate::endpoint::WorkerEndpoint;

/// Lifecycle of a [`RenderSession`].
///
/// `Uninitialized → Initialized → Rendering → Complete`, with `Failed`
/// reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, nothing sent yet.
    Uninitialized,
    /// At least one worker holds the scene.
    Initialized,
    /// Column ranges are being computed.
    Rendering,
    /// Every column was assembled.
    Complete,
    /// Terminal failure; see the returned [`RenderError`].
    Failed,
}

/// Why a session did not complete.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RenderError {
    /// Scene was rejected before any worker was contacted.
    #[error("invalid scene: {0}")]
    InvalidScene(#[from] SceneError),
    /// No worker survived the ping and init phases.
    #[error("no workers available ({} excluded)", .excluded.len())]
    NoWorkersAvailable {
        /// Every worker and why it was dropped.
        excluded: Vec<Exclusion>,
    },
    /// Recovery ran out with columns still missing. The raster keeps
    /// whatever was assembled.
    #[error("render incomplete, {} column gap(s) missing: {reason}", .missing.len())]
    PartialFailure {
        /// Uncovered column spans.
        missing: Vec<ColumnRange>,
        /// Last failure that led here.
        reason: String,
    },
    /// The caller aborted the session.
    #[error("render aborted")]
    Aborted,
    /// `run` was called on a session that already ran.
    #[error("render session already started")]
    AlreadyStarted,
    /// A single column's reply would not fit the reply budget.
    #[error("a {height}-row column does not fit a {budget}-byte reply")]
    ColumnTooTall {
        /// Image height.
        height: u32,
        /// [`DispatchPolicy::reply_budget`] in effect.
        budget: usize,
    },
}

/// What happened during a render, success or not.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderReport {
    /// Workers that accepted the scene.
    pub ready: Vec<String>,
    /// Workers dropped along the way.
    pub excluded: Vec<Exclusion>,
    /// Ranges retried on the worker that failed them.
    pub retries: u32,
    /// Ranges moved to another worker.
    pub reassignments: u32,
    /// Scenes re-sent after a worker reported losing it.
    pub reinits: u32,
    /// Columns covered so far.
    pub completed_columns: u32,
    /// Columns written more than once.
    pub overwrites: u32,
}

/// Cancels a running [`RenderSession`] from anywhere.
#[derive(Clone)]
pub struct AbortHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl AbortHandle {
    /// Stop issuing calls; results still in flight are discarded.
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    /// `true` once [`AbortHandle::abort`] was called.
    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Renders one scene across a set of workers into a shared raster.
pub struct RenderSession {
    scene: Arc<SceneDescriptor>,
    workers: Vec<Arc<dyn WorkerEndpoint>>,
    policy: DispatchPolicy,
    raster: Arc<Raster>,
    repaint: Arc<dyn RepaintPort>,
    state: watch::Sender<SessionState>,
    abort: Arc<watch::Sender<bool>>,
    report: RenderReport,
}

impl RenderSession {
    /// Session for `scene` over `workers`; nothing is contacted until [`run`](Self::run).
    pub fn new(
        scene: SceneDescriptor,
        workers: Vec<Arc<dyn WorkerEndpoint>>,
        policy: DispatchPolicy,
    ) -> Self {
        let raster = Arc::new(Raster::new(scene.width(), scene.height()));
        let (state, _) = watch::channel(SessionState::Uninitialized);
        let (abort, _) = watch::channel(false);
        Self {
            scene: Arc::new(scene),
            workers,
            policy,
            raster,
            repaint: Arc::new(NoRepaint),
            state,
            abort: Arc::new(abort),
            report: RenderReport::default(),
        }
    }

    /// Notify `port` after every assembled band.
    pub fn with_repaint(mut self, port: Arc<dyn RepaintPort>) -> Self {
        self.repaint = port;
        self
    }

    /// Raster being filled; hand it to a display surface.
    pub fn raster(&self) -> Arc<Raster> {
        Arc::clone(&self.raster)
    }

    /// Handle that aborts this session.
    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            tx: Arc::clone(&self.abort),
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state transition.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Report of the last run; default before [`run`](Self::run).
    pub fn report(&self) -> &RenderReport {
        &self.report
    }

    fn advance(&self, next: SessionState) {
        info!(from = ?self.state(), to = ?next, "render session state");
        self.state.send_replace(next);
    }

    fn fail(&self, err: RenderError) -> RenderError {
        warn!(%err, "render session failed");
        self.advance(SessionState::Failed);
        err
    }

    fn aborted(&self) -> bool {
        *self.abort.borrow()
    }

    /// Render the scene. Runs at most once per session.
    ///
    /// Workers failing `ping` or `init` are excluded; the remaining ones
    /// split the width and compute their ranges concurrently. On partial
    /// failure or abort the raster keeps every band already assembled.
    pub async fn run(&mut self) -> Result<RenderReport, RenderError> {
        if self.state() != SessionState::Uninitialized {
            return Err(RenderError::AlreadyStarted);
        }
        if let Err(err) = self.scene.validate() {
            return Err(self.fail(err.into()));
        }
        if self.policy.columns_per_call(self.scene.height()) == 0 {
            return Err(self.fail(RenderError::ColumnTooTall {
                height: self.scene.height(),
                budget: self.policy.reply_budget,
            }));
        }
        if self.scene.lights.is_empty() {
            warn!("scene has no lights");
        }
        info!(
            workers = self.workers.len(),
            width = self.scene.width(),
            height = self.scene.height(),
            "render session starting"
        );

        let mut dispatcher =
            Dispatcher::new(self.workers.clone(), self.policy, self.abort.subscribe());
        dispatcher.ping_all().await;
        if self.aborted() {
            return Err(self.fail(RenderError::Aborted));
        }
        let ready = dispatcher.init_all(&self.scene).await;
        self.report.ready = dispatcher.ready_ids();
        self.report.excluded = dispatcher.exclusions().to_vec();
        if ready == 0 {
            return Err(self.fail(RenderError::NoWorkersAvailable {
                excluded: dispatcher.exclusions().to_vec(),
            }));
        }
        self.advance(SessionState::Initialized);
        if self.aborted() {
            return Err(self.fail(RenderError::Aborted));
        }

        self.advance(SessionState::Rendering);
        let mut assembler = ImageAssembler::new(Arc::clone(&self.raster), Arc::clone(&self.repaint));
        let outcome = dispatcher.render(&self.scene, &mut assembler).await;

        let stats = dispatcher.stats();
        self.report.excluded = dispatcher.exclusions().to_vec();
        self.report.retries = stats.retries;
        self.report.reassignments = stats.reassignments;
        self.report.reinits = stats.reinits;
        self.report.completed_columns = assembler.completed_columns();
        self.report.overwrites = assembler.overwrites();

        match outcome {
            Outcome::Complete => {
                self.advance(SessionState::Complete);
                Ok(self.report.clone())
            }
            Outcome::Aborted => Err(self.fail(RenderError::Aborted)),
            Outcome::Stalled(reason) => Err(self.fail(RenderError::PartialFailure {
                missing: assembler.missing_ranges(),
                reason,
            })),
        }
    }
}
