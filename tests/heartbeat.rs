mod common;

use chrono::{Duration, Utc};
use common::{ENTER, ThreadTrace, start_with};
use syncshadow::{ProcessStatus, RawEventKind, SemanticEvent, SyncShadow, TerminationReason};

#[test]
fn test_silent_process_is_marked_crashed() {
    let h = start_with(SyncShadow::new().heartbeat_timeout(5));
    let alive = ThreadTrace::new(1, 1);
    let silent = ThreadTrace::new(2, 1);

    h.feed([alive.created(), silent.created()]);
    assert!(h.engine.check_heartbeats(Utc::now()).is_empty());

    let later = Utc::now() + Duration::seconds(10);
    assert_eq!(h.engine.check_heartbeats(later), vec![1, 2]);
    assert_eq!(h.engine.status(2), Some(ProcessStatus::Crashed));

    let reasons: Vec<TerminationReason> = h
        .events()
        .into_iter()
        .filter_map(|e| match e {
            SemanticEvent::ProcessTerminated { reason, .. } => Some(reason),
            _ => None,
        })
        .collect();
    assert_eq!(
        reasons,
        vec![
            TerminationReason::HeartbeatTimeout,
            TerminationReason::HeartbeatTimeout
        ]
    );

    // Crashed processes ignore anything that still trickles in
    h.feed([silent.raw(RawEventKind::Heartbeat)]);
    assert_eq!(h.engine.status(2), Some(ProcessStatus::Crashed));
}

#[test]
fn test_heartbeat_keeps_process_alive() {
    let h = start_with(SyncShadow::new().heartbeat_timeout(60));
    let t1 = ThreadTrace::new(1, 1);

    h.feed([t1.created(), t1.raw(RawEventKind::Heartbeat)]);
    let soon = Utc::now() + Duration::seconds(30);
    assert!(h.engine.check_heartbeats(soon).is_empty());
    assert_eq!(h.engine.status(1), Some(ProcessStatus::Running));
}

#[test]
fn test_terminate_on_request() {
    let h = start_with(SyncShadow::new());
    let t1 = ThreadTrace::new(4, 1);

    h.feed([t1.created()]);
    assert!(h.engine.terminate(4));
    assert!(!h.engine.terminate(4));
    assert_eq!(h.engine.status(4), Some(ProcessStatus::Terminated));
    assert!(h.events().iter().any(|e| matches!(
        e,
        SemanticEvent::ProcessTerminated {
            process_id: 4,
            reason: TerminationReason::Requested
        }
    )));
}

#[test]
fn test_late_events_after_terminate_are_discarded() {
    let h = start_with(SyncShadow::new());
    let t1 = ThreadTrace::new(4, 1);
    let t2 = ThreadTrace::new(4, 2);

    h.feed([t1.created()]);
    h.feed(t1.acquire(7));
    assert!(h.engine.terminate(4));

    // Still in transit when the process was torn down
    h.engine.dispatch(t1.exit(ENTER)).unwrap();
    h.engine.dispatch(t2.exit(ENTER)).unwrap();
    h.feed(t1.release(7));

    assert_eq!(h.engine.status(4), Some(ProcessStatus::Terminated));
    assert_eq!(h.engine.process_ids(), vec![4]);
    assert!(h.engine.snapshot(4).unwrap().locks.is_empty());

    let terminations: Vec<TerminationReason> = h
        .events()
        .into_iter()
        .filter_map(|e| match e {
            SemanticEvent::ProcessTerminated { reason, .. } => Some(reason),
            _ => None,
        })
        .collect();
    assert_eq!(terminations, vec![TerminationReason::Requested]);
}
