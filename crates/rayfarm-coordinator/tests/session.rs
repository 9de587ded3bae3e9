// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(missing_docs)]
//! Render session behavior against scripted workers.

use rayfarm_coordinator::{
    DispatchPolicy, DisplaySurface, EndpointError, FrameSurface, InProcessTransport, Phase,
    RemoteWorker, RenderError, RenderSession, SessionState, WorkerEndpoint,
};
use rayfarm_dry_tests::{
    empty_image_scene, probe_mismatches, sphere_scene, Call, Fault, RecordingRepaint,
    ScriptedWorker,
};
use rayfarm_proto::{ColumnRange, PixelColor, COLUMNS_OVERHEAD};
use rayfarm_scene::SceneError;
use rayfarm_worker::ProbeShader;
use std::sync::Arc;
use std::time::Duration;

fn r(from: u32, to: u32) -> ColumnRange {
    ColumnRange::new(from, to).unwrap()
}

fn policy(max_retries: u32) -> DispatchPolicy {
    DispatchPolicy {
        call_timeout: Duration::from_secs(5),
        max_retries,
        ..DispatchPolicy::default()
    }
}

fn endpoints(workers: &[Arc<ScriptedWorker>]) -> Vec<Arc<dyn WorkerEndpoint>> {
    workers
        .iter()
        .map(|w| Arc::clone(w) as Arc<dyn WorkerEndpoint>)
        .collect()
}

#[tokio::test]
async fn single_worker_renders_four_by_two() {
    let worker = ScriptedWorker::new("w0").shared();
    let repaint = Arc::new(RecordingRepaint::new());
    let mut session = RenderSession::new(sphere_scene(4, 2), endpoints(&[worker.clone()]), policy(2))
        .with_repaint(repaint.clone());
    let surface = FrameSurface::new(session.raster());
    assert_eq!(surface.preferred_size(), (4, 2));
    assert_eq!(session.state(), SessionState::Uninitialized);

    let report = session.run().await.unwrap();

    assert_eq!(session.state(), SessionState::Complete);
    assert_eq!(worker.calls(), vec![Call::Ping, Call::Init, Call::Compute(r(0, 4))]);
    let raster = session.raster();
    let placed: Vec<(u32, u32)> = [(0, 0), (0, 1), (1, 0), (1, 1), (2, 0), (2, 1), (3, 0), (3, 1)]
        .into_iter()
        .map(|(c, row)| ProbeShader::decode(raster.pixel(c, row).unwrap()))
        .collect();
    assert_eq!(
        placed,
        vec![(0, 0), (0, 1), (1, 0), (1, 1), (2, 0), (2, 1), (3, 0), (3, 1)]
    );
    assert_eq!(report.completed_columns, 4);
    assert_eq!(report.ready, vec!["w0".to_string()]);
    assert_eq!(repaint.count(), 1);
    assert!(repaint.coverages()[0].is_complete());
}

#[tokio::test]
async fn two_workers_split_five_columns_remainder_first() {
    let workers = [ScriptedWorker::new("a").shared(), ScriptedWorker::new("b").shared()];
    let repaint = Arc::new(RecordingRepaint::new());
    let mut session = RenderSession::new(sphere_scene(5, 3), endpoints(&workers), policy(2))
        .with_repaint(repaint.clone());

    let report = session.run().await.unwrap();

    assert_eq!(workers[0].computed_ranges(), vec![r(0, 3)]);
    assert_eq!(workers[1].computed_ranges(), vec![r(3, 5)]);
    assert!(probe_mismatches(&session.raster()).is_empty());
    assert_eq!(report.overwrites, 0);
    assert_eq!(repaint.count(), 2);
    let newly: u32 = repaint.coverages().iter().map(|c| c.newly_completed).sum();
    assert_eq!(newly, 5);
}

#[tokio::test]
async fn permanently_failing_worker_is_replaced() {
    let workers = [
        ScriptedWorker::new("bad").with_fault(Fault::FailCompute).shared(),
        ScriptedWorker::new("good").shared(),
    ];
    let mut session = RenderSession::new(sphere_scene(4, 2), endpoints(&workers), policy(1));

    let report = session.run().await.unwrap();

    assert_eq!(session.state(), SessionState::Complete);
    assert_eq!(workers[0].computed_ranges(), vec![r(0, 2), r(0, 2)]);
    assert_eq!(workers[1].computed_ranges(), vec![r(2, 4), r(0, 2)]);
    assert_eq!(report.retries, 1);
    assert_eq!(report.reassignments, 1);
    assert_eq!(report.excluded.len(), 1);
    assert_eq!(report.excluded[0].worker, "bad");
    assert_eq!(report.excluded[0].phase, Phase::Compute);
    assert!(probe_mismatches(&session.raster()).is_empty());
    assert_eq!(report.completed_columns, 4);
    for w in &workers {
        assert_eq!(w.peak_in_flight(), 1);
    }
}

#[tokio::test]
async fn transient_failure_is_retried_in_place() {
    let worker = ScriptedWorker::new("flaky")
        .with_fault(Fault::FailComputeTimes(2))
        .shared();
    let mut session = RenderSession::new(sphere_scene(3, 2), endpoints(&[worker.clone()]), policy(2));

    let report = session.run().await.unwrap();

    assert_eq!(worker.computed_ranges(), vec![r(0, 3); 3]);
    assert_eq!(report.retries, 2);
    assert_eq!(report.reassignments, 0);
    assert!(report.excluded.is_empty());
}

#[tokio::test]
async fn lost_scene_is_resent_before_retry() {
    let worker = ScriptedWorker::new("amnesiac")
        .with_fault(Fault::ForgetScene)
        .shared();
    let mut session = RenderSession::new(sphere_scene(2, 2), endpoints(&[worker.clone()]), policy(1));

    let report = session.run().await.unwrap();

    assert_eq!(
        worker.calls(),
        vec![
            Call::Ping,
            Call::Init,
            Call::Compute(r(0, 2)),
            Call::Init,
            Call::Compute(r(0, 2)),
        ]
    );
    assert_eq!(report.reinits, 1);
    assert!(probe_mismatches(&session.raster()).is_empty());
}

#[tokio::test]
async fn no_survivors_means_no_workers_available() {
    let workers = [
        ScriptedWorker::new("gone").with_fault(Fault::Unreachable).shared(),
        ScriptedWorker::new("old").with_fault(Fault::Incompatible).shared(),
        ScriptedWorker::new("picky").with_fault(Fault::RejectInit).shared(),
    ];
    let mut session = RenderSession::new(sphere_scene(4, 2), endpoints(&workers), policy(2));

    let err = session.run().await.unwrap_err();

    let RenderError::NoWorkersAvailable { excluded } = err else {
        panic!("expected NoWorkersAvailable, got {err:?}");
    };
    let mut phases: Vec<(String, Phase)> = excluded
        .into_iter()
        .map(|e| (e.worker, e.phase))
        .collect();
    phases.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(
        phases,
        vec![
            ("gone".to_string(), Phase::Ping),
            ("old".to_string(), Phase::Ping),
            ("picky".to_string(), Phase::Init),
        ]
    );
    assert_eq!(session.state(), SessionState::Failed);
    // never asked to compute, and ping-failures never saw init
    assert!(workers.iter().all(|w| w.computed_ranges().is_empty()));
    assert_eq!(workers[0].init_count(), 0);
}

#[tokio::test]
async fn empty_worker_list_fails_immediately() {
    let mut session = RenderSession::new(sphere_scene(4, 2), Vec::new(), policy(2));
    assert!(matches!(
        session.run().await,
        Err(RenderError::NoWorkersAvailable { excluded }) if excluded.is_empty()
    ));
}

#[tokio::test]
async fn exhausted_recovery_reports_missing_columns() {
    let workers = [
        ScriptedWorker::new("once")
            .with_fault(Fault::FailComputeAfter(1))
            .shared(),
        ScriptedWorker::new("never").with_fault(Fault::FailCompute).shared(),
    ];
    let mut session = RenderSession::new(sphere_scene(4, 2), endpoints(&workers), policy(0));

    let err = session.run().await.unwrap_err();

    let RenderError::PartialFailure { missing, reason } = err else {
        panic!("expected PartialFailure, got {err:?}");
    };
    assert_eq!(missing, vec![r(2, 4)]);
    assert!(reason.contains("once"), "{reason}");
    assert_eq!(session.state(), SessionState::Failed);

    // best-effort partial image survives
    let raster = session.raster();
    assert_eq!(ProbeShader::decode(raster.pixel(1, 1).unwrap()), (1, 1));
    assert_eq!(raster.pixel(3, 1), Some(PixelColor::BLACK));
    assert_eq!(session.report().completed_columns, 2);
    assert_eq!(session.report().excluded.len(), 2);
}

#[tokio::test]
async fn invalid_scene_never_reaches_workers() {
    let worker = ScriptedWorker::new("w").shared();
    let mut session = RenderSession::new(empty_image_scene(), endpoints(&[worker.clone()]), policy(2));

    let err = session.run().await.unwrap_err();

    assert!(matches!(
        err,
        RenderError::InvalidScene(SceneError::EmptyImage { width: 4, height: 0 })
    ));
    assert!(worker.calls().is_empty());
    assert_eq!(session.state(), SessionState::Failed);
}

#[tokio::test]
async fn session_runs_once() {
    let worker = ScriptedWorker::new("w").shared();
    let mut session = RenderSession::new(sphere_scene(2, 2), endpoints(&[worker.clone()]), policy(0));
    session.run().await.unwrap();
    assert_eq!(session.run().await, Err(RenderError::AlreadyStarted));
    assert_eq!(worker.init_count(), 1);
}

#[tokio::test]
async fn hung_worker_times_out_and_range_moves() {
    let workers = [
        ScriptedWorker::new("stuck").with_fault(Fault::HangCompute).shared(),
        ScriptedWorker::new("ok").shared(),
    ];
    let limit = Duration::from_millis(50);
    let policy = DispatchPolicy {
        call_timeout: limit,
        max_retries: 0,
        ..DispatchPolicy::default()
    };
    let mut session = RenderSession::new(sphere_scene(6, 2), endpoints(&workers), policy);

    let report = session.run().await.unwrap();

    assert_eq!(report.excluded.len(), 1);
    assert_eq!(report.excluded[0].worker, "stuck");
    assert_eq!(report.excluded[0].reason, EndpointError::Timeout(limit));
    assert_eq!(workers[1].computed_ranges(), vec![r(3, 6), r(0, 3)]);
    assert!(probe_mismatches(&session.raster()).is_empty());
}

#[tokio::test]
async fn timed_out_call_is_retried_after_reinit() {
    let worker = ScriptedWorker::new("sleepy")
        .with_fault(Fault::HangFirstCompute)
        .shared();
    let policy = DispatchPolicy {
        call_timeout: Duration::from_millis(50),
        max_retries: 1,
        ..DispatchPolicy::default()
    };
    let mut session = RenderSession::new(sphere_scene(3, 2), endpoints(&[worker.clone()]), policy);

    let report = session.run().await.unwrap();

    assert_eq!(
        worker.calls(),
        vec![
            Call::Ping,
            Call::Init,
            Call::Compute(r(0, 3)),
            Call::Init,
            Call::Compute(r(0, 3)),
        ]
    );
    assert_eq!((report.retries, report.reinits), (1, 1));
    assert!(report.excluded.is_empty());
    assert!(probe_mismatches(&session.raster()).is_empty());
}

#[tokio::test]
async fn mismatched_reinit_ack_fails_the_retry() {
    let workers = [
        ScriptedWorker::new("liar")
            .with_fault(Fault::ForgetScene)
            .with_fault(Fault::BadReinitAck)
            .shared(),
        ScriptedWorker::new("ok").shared(),
    ];
    let mut session = RenderSession::new(sphere_scene(4, 2), endpoints(&workers), policy(1));

    let report = session.run().await.unwrap();

    // the re-init was answered, but for the wrong image, so no compute followed
    assert_eq!(
        workers[0].calls(),
        vec![
            Call::Ping,
            Call::Init,
            Call::Compute(r(0, 2)),
            Call::Init,
        ]
    );
    assert_eq!(report.excluded.len(), 1);
    assert_eq!(report.excluded[0].worker, "liar");
    assert!(matches!(report.excluded[0].reason, EndpointError::Protocol(_)));
    assert_eq!(workers[1].computed_ranges(), vec![r(2, 4), r(0, 2)]);
    assert!(probe_mismatches(&session.raster()).is_empty());
}

#[tokio::test]
async fn ranges_are_fetched_in_budget_sized_calls() {
    let workers = [ScriptedWorker::new("a").shared(), ScriptedWorker::new("b").shared()];
    let repaint = Arc::new(RecordingRepaint::new());
    // three two-row columns per reply
    let policy = DispatchPolicy {
        reply_budget: COLUMNS_OVERHEAD + 3 * 3 * 2,
        ..policy(0)
    };
    let mut session = RenderSession::new(sphere_scene(8, 2), endpoints(&workers), policy)
        .with_repaint(repaint.clone());

    let report = session.run().await.unwrap();

    assert_eq!(workers[0].computed_ranges(), vec![r(0, 3), r(3, 4)]);
    assert_eq!(workers[1].computed_ranges(), vec![r(4, 7), r(7, 8)]);
    for w in &workers {
        assert_eq!(w.peak_in_flight(), 1);
    }
    assert_eq!(report.completed_columns, 8);
    assert_eq!(report.reassignments, 0);
    assert_eq!(repaint.count(), 4);
    assert!(probe_mismatches(&session.raster()).is_empty());
}

#[tokio::test]
async fn column_taller_than_reply_budget_is_refused() {
    let worker = ScriptedWorker::new("w").shared();
    let budget = COLUMNS_OVERHEAD + 5;
    let policy = DispatchPolicy {
        reply_budget: budget,
        ..policy(0)
    };
    let mut session = RenderSession::new(sphere_scene(4, 2), endpoints(&[worker.clone()]), policy);

    let err = session.run().await.unwrap_err();

    assert_eq!(err, RenderError::ColumnTooTall { height: 2, budget });
    assert!(worker.calls().is_empty());
    assert_eq!(session.state(), SessionState::Failed);
}

#[tokio::test]
async fn spare_worker_picks_up_reassigned_range() {
    let workers = [
        ScriptedWorker::new("bad").with_fault(Fault::FailCompute).shared(),
        ScriptedWorker::new("busy")
            .with_delay(Duration::from_millis(100))
            .shared(),
        ScriptedWorker::new("spare").shared(),
    ];
    let mut session = RenderSession::new(sphere_scene(2, 1), endpoints(&workers), policy(0));

    session.run().await.unwrap();

    assert_eq!(workers[1].computed_ranges(), vec![r(1, 2)]);
    assert_eq!(workers[2].computed_ranges(), vec![r(0, 1)]);
}

#[tokio::test]
async fn short_reply_is_never_written() {
    let workers = [
        ScriptedWorker::new("short").with_fault(Fault::ShortReply).shared(),
        ScriptedWorker::new("ok").shared(),
    ];
    let mut session = RenderSession::new(sphere_scene(4, 3), endpoints(&workers), policy(0));

    let report = session.run().await.unwrap();

    assert!(matches!(report.excluded[0].reason, EndpointError::Protocol(_)));
    assert_eq!(report.overwrites, 0);
    assert!(probe_mismatches(&session.raster()).is_empty());
}

#[tokio::test]
async fn abort_discards_in_flight_results() {
    let workers = [
        ScriptedWorker::new("slow-a")
            .with_delay(Duration::from_millis(200))
            .shared(),
        ScriptedWorker::new("slow-b")
            .with_delay(Duration::from_millis(200))
            .shared(),
    ];
    let repaint = Arc::new(RecordingRepaint::new());
    let mut session = RenderSession::new(sphere_scene(4, 2), endpoints(&workers), policy(2))
        .with_repaint(repaint.clone());
    let abort = session.abort_handle();
    let raster = session.raster();

    let running = tokio::spawn(async move {
        let result = session.run().await;
        (session, result)
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    abort.abort();
    let (session, result) = running.await.unwrap();

    assert_eq!(result, Err(RenderError::Aborted));
    assert!(abort.is_aborted());
    assert_eq!(session.state(), SessionState::Failed);
    // in-flight calls were allowed to finish, nothing new was issued
    assert_eq!(workers[0].computed_ranges(), vec![r(0, 2)]);
    assert_eq!(workers[1].computed_ranges(), vec![r(2, 4)]);
    assert_eq!(raster.pixel(3, 1), Some(PixelColor::BLACK));
    assert_eq!(repaint.count(), 0);
}

#[tokio::test]
async fn state_watch_observes_completion() {
    let worker = ScriptedWorker::new("w").shared();
    let mut session = RenderSession::new(sphere_scene(2, 2), endpoints(&[worker]), policy(0));
    let mut states = session.watch_state();
    assert_eq!(*states.borrow_and_update(), SessionState::Uninitialized);

    session.run().await.unwrap();

    assert!(states.has_changed().unwrap());
    assert_eq!(*states.borrow_and_update(), SessionState::Complete);
}

#[tokio::test]
async fn in_process_workers_render_through_the_codec() {
    let workers: Vec<Arc<dyn WorkerEndpoint>> = (0..3)
        .map(|i| {
            Arc::new(RemoteWorker::new(
                format!("local-{i}"),
                InProcessTransport::new(Arc::new(ProbeShader)),
            )) as Arc<dyn WorkerEndpoint>
        })
        .collect();
    let mut session = RenderSession::new(sphere_scene(10, 4), workers, policy(0));

    let report = session.run().await.unwrap();

    assert_eq!(report.ready.len(), 3);
    assert!(probe_mismatches(&session.raster()).is_empty());
}
