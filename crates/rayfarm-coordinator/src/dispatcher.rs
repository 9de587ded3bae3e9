// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Worker selection, range dispatch, retry and reassignment.

use futures_util::future::BoxFuture;
use futures_util::stream::{FuturesUnordered, StreamExt};
use rayfarm_app_core::prefs::CoordinatorPrefs;
use rayfarm_proto::wire::MAX_PAYLOAD;
use rayfarm_proto::{AckToken, ColumnRange, ColumnsPayload, SceneDescriptor, SceneDigest};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::assembler::ImageAssembler;
use crate::endpoint::{EndpointError, WorkerEndpoint};
use crate::partition::partition;

/// Timeout and retry knobs for one render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchPolicy {
    /// Upper bound on every remote call; expiry counts as a failure.
    pub call_timeout: Duration,
    /// Retries of a range on the same worker before the worker is dropped
    /// and the range reassigned.
    pub max_retries: u32,
    /// Payload bytes one `columns` reply may take. A worker's range is
    /// requested in as many sequential calls as this requires.
    pub reply_budget: usize,
}

impl DispatchPolicy {
    /// Columns one compute call may cover at image height `height`.
    pub fn columns_per_call(&self, height: u32) -> u32 {
        ColumnRange::max_columns(height, self.reply_budget)
    }
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self::from(&CoordinatorPrefs::default())
    }
}

impl From<&CoordinatorPrefs> for DispatchPolicy {
    fn from(prefs: &CoordinatorPrefs) -> Self {
        Self {
            call_timeout: prefs.call_timeout(),
            max_retries: prefs.max_retries,
            reply_budget: MAX_PAYLOAD,
        }
    }
}

/// Session phase in which a worker was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Liveness check.
    Ping,
    /// Scene hand-off.
    Init,
    /// Range computation, after retries ran out.
    Compute,
}

/// A worker dropped from a session, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exclusion {
    /// [`WorkerEndpoint::id`] of the worker.
    pub worker: String,
    /// Phase that failed.
    pub phase: Phase,
    /// Last failure seen from it.
    pub reason: EndpointError,
}

/// Where a worker stands within one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    /// Not yet contacted.
    Registered,
    /// Answered `ping`; holds no scene for this session.
    Live,
    /// Accepted the session's scene.
    Ready,
    /// Dropped; receives no further calls.
    Excluded,
}

/// Counters for one render.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Ranges retried on the worker that failed them.
    pub retries: u32,
    /// Ranges moved to another worker.
    pub reassignments: u32,
    /// Scene re-sent before a retry.
    pub reinits: u32,
}

/// How the compute phase ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Outcome {
    Complete,
    Aborted,
    Stalled(String),
}

async fn timed<T, F>(limit: Duration, call: F) -> Result<T, EndpointError>
where
    F: Future<Output = Result<T, EndpointError>>,
{
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or(Err(EndpointError::Timeout(limit)))
}

/// An `init` acknowledgement for other dimensions or another scene digest
/// counts as a failed `init`.
fn check_ack(
    scene: &SceneDescriptor,
    digest: Option<SceneDigest>,
    ack: AckToken,
) -> Result<AckToken, EndpointError> {
    if (ack.width, ack.height) != (scene.width(), scene.height()) {
        Err(EndpointError::Protocol(format!(
            "worker acknowledged a {}x{} image",
            ack.width, ack.height
        )))
    } else if digest.is_some_and(|digest| digest != ack.scene_digest) {
        Err(EndpointError::Protocol(format!(
            "worker acknowledged scene {}",
            ack.scene_digest
        )))
    } else {
        Ok(ack)
    }
}

/// Everything a compute call needs besides the worker and its job.
#[derive(Clone)]
struct CallContext {
    scene: Arc<SceneDescriptor>,
    digest: Option<SceneDigest>,
    limit: Duration,
    columns_per_call: u32,
}

#[derive(Debug, Clone, Copy)]
struct Job {
    range: ColumnRange,
    failures: u32,
    reinit: bool,
}

impl Job {
    fn new(range: ColumnRange) -> Self {
        Self {
            range,
            failures: 0,
            reinit: false,
        }
    }
}

struct Done {
    worker: usize,
    job: Job,
    rest: Option<ColumnRange>,
    result: Result<ColumnsPayload, EndpointError>,
}

/// Compute the head of `job.range` that fits one reply; `Done::rest` is what
/// the worker still owes afterwards.
fn compute_call(
    worker: usize,
    endpoint: Arc<dyn WorkerEndpoint>,
    cx: CallContext,
    job: Job,
) -> BoxFuture<'static, Done> {
    Box::pin(async move {
        let (head, rest) = job.range.split_first(cx.columns_per_call);
        let result = async {
            if job.reinit {
                let ack = timed(cx.limit, endpoint.init(&cx.scene)).await?;
                check_ack(&cx.scene, cx.digest, ack)?;
            }
            timed(cx.limit, endpoint.compute_columns(head)).await
        }
        .await;
        Done {
            worker,
            job,
            rest,
            result,
        }
    })
}

/// Drives the workers of one session through ping, init and compute.
///
/// Every worker sees its calls strictly in sequence and has at most one call
/// in flight. All calls of a session are polled from the task running the
/// session; no extra tasks are spawned.
pub struct Dispatcher {
    workers: Vec<Arc<dyn WorkerEndpoint>>,
    status: Vec<WorkerStatus>,
    policy: DispatchPolicy,
    abort: watch::Receiver<bool>,
    excluded: Vec<Exclusion>,
    stats: DispatchStats,
}

impl Dispatcher {
    /// Dispatcher over `workers`; stops issuing calls once `abort` reads `true`.
    pub fn new(
        workers: Vec<Arc<dyn WorkerEndpoint>>,
        policy: DispatchPolicy,
        abort: watch::Receiver<bool>,
    ) -> Self {
        let status = vec![WorkerStatus::Registered; workers.len()];
        Self {
            workers,
            status,
            policy,
            abort,
            excluded: Vec::new(),
            stats: DispatchStats::default(),
        }
    }

    /// Status of worker `index`.
    pub fn status(&self, index: usize) -> Option<WorkerStatus> {
        self.status.get(index).copied()
    }

    /// Ids of workers currently `Ready`.
    pub fn ready_ids(&self) -> Vec<String> {
        self.indices(WorkerStatus::Ready)
            .map(|i| self.workers[i].id().to_string())
            .collect()
    }

    /// Workers dropped so far.
    pub fn exclusions(&self) -> &[Exclusion] {
        &self.excluded
    }

    /// Retry and reassignment counters.
    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// `true` once the session was asked to abort.
    pub fn aborted(&self) -> bool {
        *self.abort.borrow()
    }

    fn indices(&self, wanted: WorkerStatus) -> impl Iterator<Item = usize> + '_ {
        self.status
            .iter()
            .enumerate()
            .filter(move |(_, s)| **s == wanted)
            .map(|(i, _)| i)
    }

    fn exclude(&mut self, index: usize, phase: Phase, reason: EndpointError) {
        let worker = self.workers[index].id().to_string();
        warn!(worker = %worker, ?phase, %reason, "excluding worker");
        self.status[index] = WorkerStatus::Excluded;
        self.excluded.push(Exclusion {
            worker,
            phase,
            reason,
        });
    }

    /// Ping every registered worker concurrently. Returns how many are live.
    pub async fn ping_all(&mut self) -> usize {
        let limit = self.policy.call_timeout;
        let mut calls: FuturesUnordered<_> = self
            .indices(WorkerStatus::Registered)
            .map(|i| {
                let endpoint = Arc::clone(&self.workers[i]);
                async move { (i, timed(limit, endpoint.ping()).await) }
            })
            .collect();
        while let Some((i, result)) = calls.next().await {
            match result {
                Ok(token) => {
                    debug!(worker = self.workers[i].id(), protocol = token.protocol, "worker live");
                    self.status[i] = WorkerStatus::Live;
                }
                Err(err) => self.exclude(i, Phase::Ping, err),
            }
        }
        self.indices(WorkerStatus::Live).count()
    }

    /// Send `scene` to every live worker concurrently. Returns how many are ready.
    ///
    /// Workers whose acknowledgement does not match `scene` are excluded.
    pub async fn init_all(&mut self, scene: &Arc<SceneDescriptor>) -> usize {
        let limit = self.policy.call_timeout;
        let expected = SceneDigest::of(scene).ok();
        let mut calls: FuturesUnordered<_> = self
            .indices(WorkerStatus::Live)
            .map(|i| {
                let endpoint = Arc::clone(&self.workers[i]);
                let scene = Arc::clone(scene);
                async move { (i, timed(limit, endpoint.init(&scene)).await) }
            })
            .collect();
        while let Some((i, result)) = calls.next().await {
            match result.and_then(|ack| check_ack(scene, expected, ack)) {
                Ok(ack) => {
                    debug!(worker = self.workers[i].id(), digest = %ack.scene_digest, "worker ready");
                    self.status[i] = WorkerStatus::Ready;
                }
                Err(err) => self.exclude(i, Phase::Init, err),
            }
        }
        self.indices(WorkerStatus::Ready).count()
    }

    fn idle_ready(&self, busy: &[bool]) -> Option<usize> {
        self.indices(WorkerStatus::Ready).find(|&i| !busy[i])
    }

    /// Partition the image over the ready workers and collect every range.
    ///
    /// Each worker owns one partition range and computes it in as many
    /// sequential calls as [`DispatchPolicy::reply_budget`] requires.
    /// Failed calls are retried on the same worker up to
    /// [`DispatchPolicy::max_retries`] times. A retry after `NotInitialized`,
    /// a timeout or a lost connection re-sends the scene first, since the
    /// worker may be talking over a fresh connection. Past that the worker is
    /// excluded and its remaining range queued for the next idle ready
    /// worker. After an abort no call is issued and results still arriving
    /// are dropped unassembled.
    pub(crate) async fn render(
        &mut self,
        scene: &Arc<SceneDescriptor>,
        assembler: &mut ImageAssembler,
    ) -> Outcome {
        let cx = CallContext {
            scene: Arc::clone(scene),
            digest: SceneDigest::of(scene).ok(),
            limit: self.policy.call_timeout,
            columns_per_call: self.policy.columns_per_call(scene.height()),
        };
        let mut busy = vec![false; self.workers.len()];
        let mut queue: VecDeque<Job> = VecDeque::new();
        let mut in_flight: FuturesUnordered<BoxFuture<'static, Done>> = FuturesUnordered::new();
        let mut last_failure: Option<String> = None;

        let ready: Vec<usize> = self.indices(WorkerStatus::Ready).collect();
        let ranges = partition(ready.len(), scene.width());
        info!(workers = ready.len(), ranges = ranges.len(), "dispatching column ranges");
        for (&worker, range) in ready.iter().zip(ranges) {
            busy[worker] = true;
            let endpoint = Arc::clone(&self.workers[worker]);
            in_flight.push(compute_call(worker, endpoint, cx.clone(), Job::new(range)));
        }

        loop {
            while !self.aborted() && !queue.is_empty() {
                let Some(worker) = self.idle_ready(&busy) else {
                    break;
                };
                let Some(job) = queue.pop_front() else {
                    break;
                };
                self.stats.reassignments += 1;
                debug!(worker = self.workers[worker].id(), range = %job.range, "reassigning range");
                busy[worker] = true;
                let endpoint = Arc::clone(&self.workers[worker]);
                in_flight.push(compute_call(worker, endpoint, cx.clone(), job));
            }

            let Some(done) = in_flight.next().await else {
                break;
            };
            busy[done.worker] = false;
            if self.aborted() {
                debug!(range = %done.job.range, "discarding result after abort");
                continue;
            }

            let assembled = done.result.and_then(|columns| {
                assembler
                    .assemble(&columns)
                    .map_err(|e| EndpointError::Protocol(e.to_string()))
            });
            let err = match assembled {
                Ok(coverage) => {
                    debug!(
                        range = %coverage.range,
                        completed = coverage.completed,
                        total = coverage.total,
                        "range assembled"
                    );
                    if let Some(rest) = done.rest {
                        busy[done.worker] = true;
                        let endpoint = Arc::clone(&self.workers[done.worker]);
                        let next = Job::new(rest);
                        in_flight.push(compute_call(done.worker, endpoint, cx.clone(), next));
                    }
                    continue;
                }
                Err(err) => err,
            };

            let id = self.workers[done.worker].id().to_string();
            last_failure = Some(format!("{id} failed {}: {err}", done.job.range));
            let mut job = done.job;
            job.failures += 1;
            if job.failures <= self.policy.max_retries {
                job.reinit = matches!(
                    err,
                    EndpointError::NotInitialized
                        | EndpointError::Timeout(_)
                        | EndpointError::Unreachable(_)
                );
                self.stats.retries += 1;
                if job.reinit {
                    self.stats.reinits += 1;
                }
                debug!(worker = %id, range = %job.range, attempt = job.failures, %err, "retrying range");
                busy[done.worker] = true;
                let endpoint = Arc::clone(&self.workers[done.worker]);
                in_flight.push(compute_call(done.worker, endpoint, cx.clone(), job));
            } else {
                self.exclude(done.worker, Phase::Compute, err);
                queue.push_back(Job::new(job.range));
            }
        }

        if assembler.is_complete() {
            Outcome::Complete
        } else if self.aborted() {
            Outcome::Aborted
        } else {
            Outcome::Stalled(last_failure.unwrap_or_else(|| "no ready workers left".to_string()))
        }
    }
}
