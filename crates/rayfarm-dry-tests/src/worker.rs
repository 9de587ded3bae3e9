// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Scripted worker endpoints with injectable faults.

use futures_util::future::BoxFuture;
use rayfarm_coordinator::{EndpointError, WorkerEndpoint};
use rayfarm_proto::{
    AckToken, ColumnRange, ColumnsPayload, ErrorCode, ErrorPayload, InitPayload, LivenessToken,
    SceneDescriptor,
};
use rayfarm_worker::{BoundScene, ProbeShader};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Misbehavior a [`ScriptedWorker`] can be told to exhibit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// `ping` fails as if the process were gone.
    Unreachable,
    /// `ping` answers with a token from another protocol version.
    Incompatible,
    /// `init` is refused with `E_INVALID_SCENE`.
    RejectInit,
    /// Every `compute_columns` fails with `E_INTERNAL`.
    FailCompute,
    /// The first `n` `compute_columns` calls fail with `E_INTERNAL`.
    FailComputeTimes(u32),
    /// The first `n` `compute_columns` calls succeed, every later one fails
    /// with `E_INTERNAL`.
    FailComputeAfter(u32),
    /// `compute_columns` never answers.
    HangCompute,
    /// The first `compute_columns` never answers; later ones do.
    HangFirstCompute,
    /// Every `init` after the first acknowledges the wrong image width.
    BadReinitAck,
    /// The first `compute_columns` forgets the scene and answers `E_NOT_INITIALIZED`.
    ForgetScene,
    /// `compute_columns` answers one color short.
    ShortReply,
}

/// A call as the worker saw it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    /// `ping`.
    Ping,
    /// `init`.
    Init,
    /// `compute_columns(range)`.
    Compute(ColumnRange),
}

#[derive(Default)]
struct Inner {
    bound: Option<BoundScene>,
    calls: Vec<Call>,
    in_flight: usize,
    peak_in_flight: usize,
    compute_failures: u32,
    computed: u32,
    forgot: bool,
    hung: bool,
    inits: u32,
}

/// In-memory [`WorkerEndpoint`] computing [`ProbeShader`] pixels.
///
/// Records every call and the highest number of its calls ever in flight
/// at once, so tests can check the one-call-per-worker rule.
pub struct ScriptedWorker {
    id: String,
    faults: Vec<Fault>,
    delay: Duration,
    inner: Mutex<Inner>,
}

struct InFlight<'a>(&'a Mutex<Inner>);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut inner = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        inner.in_flight -= 1;
    }
}

impl ScriptedWorker {
    /// Healthy worker labelled `id`.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            faults: Vec::new(),
            delay: Duration::ZERO,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Add a fault.
    pub fn with_fault(mut self, fault: Fault) -> Self {
        self.faults.push(fault);
        self
    }

    /// Sleep this long inside every `compute_columns`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Wrap for use as a session endpoint.
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    fn has(&self, fault: Fault) -> bool {
        self.faults.contains(&fault)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enter(&self, call: Call) -> InFlight<'_> {
        let mut inner = self.lock();
        inner.calls.push(call);
        inner.in_flight += 1;
        inner.peak_in_flight = inner.peak_in_flight.max(inner.in_flight);
        InFlight(&self.inner)
    }

    /// Every call received, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Ranges requested, in order.
    pub fn computed_ranges(&self) -> Vec<ColumnRange> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Compute(range) => Some(range),
                _ => None,
            })
            .collect()
    }

    /// Number of `init` calls received.
    pub fn init_count(&self) -> usize {
        self.calls().iter().filter(|c| **c == Call::Init).count()
    }

    /// Most calls this worker ever had in flight simultaneously.
    pub fn peak_in_flight(&self) -> usize {
        self.lock().peak_in_flight
    }

    fn compute_now(&self, range: ColumnRange) -> Result<ColumnsPayload, EndpointError> {
        let mut inner = self.lock();
        if self.has(Fault::ForgetScene) && !inner.forgot {
            inner.forgot = true;
            inner.bound = None;
        }
        let failing = self.has(Fault::FailCompute)
            || self.faults.iter().any(|f| match f {
                Fault::FailComputeTimes(n) => inner.compute_failures < *n,
                Fault::FailComputeAfter(n) => inner.computed >= *n,
                _ => false,
            });
        if failing {
            inner.compute_failures += 1;
            return Err(ErrorPayload::new(ErrorCode::Internal, "scripted failure").into());
        }
        let bound = inner.bound.as_ref().ok_or(EndpointError::NotInitialized)?;
        let mut columns = bound
            .compute_columns(&ProbeShader, range)
            .map_err(EndpointError::from)?;
        if self.has(Fault::ShortReply) {
            columns.colors.pop();
        }
        inner.computed += 1;
        Ok(columns)
    }
}

impl WorkerEndpoint for ScriptedWorker {
    fn id(&self) -> &str {
        &self.id
    }

    fn ping(&self) -> BoxFuture<'_, Result<LivenessToken, EndpointError>> {
        Box::pin(async move {
            let _call = self.enter(Call::Ping);
            if self.has(Fault::Unreachable) {
                return Err(EndpointError::Unreachable("scripted: no such worker".into()));
            }
            if self.has(Fault::Incompatible) {
                let mut stale = LivenessToken::current();
                stale.protocol += 1;
                return Err(EndpointError::Incompatible(stale));
            }
            Ok(LivenessToken::current())
        })
    }

    fn init<'a>(
        &'a self,
        scene: &'a SceneDescriptor,
    ) -> BoxFuture<'a, Result<AckToken, EndpointError>> {
        Box::pin(async move {
            let _call = self.enter(Call::Init);
            if self.has(Fault::RejectInit) {
                return Err(ErrorPayload::new(ErrorCode::InvalidScene, "scripted rejection").into());
            }
            let bound =
                BoundScene::bind(InitPayload::new(scene.clone())).map_err(EndpointError::from)?;
            let mut ack = bound.ack();
            let mut inner = self.lock();
            inner.inits += 1;
            if self.has(Fault::BadReinitAck) && inner.inits > 1 {
                ack.width += 1;
            }
            inner.bound = Some(bound);
            Ok(ack)
        })
    }

    fn compute_columns(
        &self,
        range: ColumnRange,
    ) -> BoxFuture<'_, Result<ColumnsPayload, EndpointError>> {
        Box::pin(async move {
            let _call = self.enter(Call::Compute(range));
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let hang = self.has(Fault::HangCompute) || {
                let mut inner = self.lock();
                let first = self.has(Fault::HangFirstCompute) && !inner.hung;
                inner.hung |= first;
                first
            };
            if hang {
                return std::future::pending().await;
            }
            self.compute_now(range)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenes::sphere_scene;

    #[tokio::test]
    async fn healthy_worker_follows_the_two_phase_contract() {
        let worker = ScriptedWorker::new("w");
        let range = ColumnRange::new(0, 2).unwrap();
        assert!(worker.ping().await.is_ok());
        assert_eq!(
            worker.compute_columns(range).await,
            Err(EndpointError::NotInitialized)
        );
        worker.init(&sphere_scene(2, 2)).await.unwrap();
        assert_eq!(worker.compute_columns(range).await.unwrap().colors.len(), 4);
        assert_eq!(
            worker.calls(),
            vec![Call::Ping, Call::Compute(range), Call::Init, Call::Compute(range)]
        );
        assert_eq!(worker.peak_in_flight(), 1);
    }

    #[tokio::test]
    async fn fail_times_recovers() {
        let worker = ScriptedWorker::new("w").with_fault(Fault::FailComputeTimes(1));
        worker.init(&sphere_scene(2, 2)).await.unwrap();
        let range = ColumnRange::new(0, 1).unwrap();
        assert!(matches!(
            worker.compute_columns(range).await,
            Err(EndpointError::Rejected(_))
        ));
        assert!(worker.compute_columns(range).await.is_ok());
    }

    #[tokio::test]
    async fn forgotten_scene_needs_reinit() {
        let worker = ScriptedWorker::new("w").with_fault(Fault::ForgetScene);
        let scene = sphere_scene(2, 2);
        worker.init(&scene).await.unwrap();
        let range = ColumnRange::new(0, 1).unwrap();
        assert_eq!(
            worker.compute_columns(range).await,
            Err(EndpointError::NotInitialized)
        );
        worker.init(&scene).await.unwrap();
        assert!(worker.compute_columns(range).await.is_ok());
        assert_eq!(worker.init_count(), 2);
    }

    #[tokio::test]
    async fn dropped_hanging_call_leaves_nothing_in_flight() {
        let worker = ScriptedWorker::new("w").with_fault(Fault::HangCompute);
        let range = ColumnRange::new(0, 1).unwrap();
        let hung =
            tokio::time::timeout(Duration::from_millis(10), worker.compute_columns(range)).await;
        assert!(hung.is_err());
        assert_eq!(worker.lock().in_flight, 0);
    }
}
