mod common;

use common::{ThreadTrace, start_engine};
use fxhash::FxHashMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use syncshadow::{ProcessTrackedObjectId, RawEvent, SemanticEvent, ThreadState};

const LOCKS: u64 = 4;

/// Per-thread streams of critical sections that take locks in ascending
/// order, sometimes reentrantly
fn generate_streams(rng: &mut StdRng, threads: u64) -> (Vec<VecDeque<RawEvent>>, usize) {
    let mut acquires = 0;
    let streams = (1..=threads)
        .map(|tid| {
            let trace = ThreadTrace::new(1, tid);
            let mut stream = VecDeque::from([trace.created()]);
            for _ in 0..rng.random_range(1..6) {
                let mut held = Vec::new();
                for lock in 0..LOCKS {
                    if rng.random_bool(0.5) {
                        held.push(lock);
                        if rng.random_bool(0.2) {
                            held.push(lock);
                        }
                    }
                }
                for &lock in &held {
                    stream.extend(trace.acquire(lock));
                }
                for &lock in held.iter().rev() {
                    stream.extend(trace.release(lock));
                }
                acquires += held.len();
            }
            stream
        })
        .collect();
    (streams, acquires)
}

/// Merge the streams at random, keeping each one FIFO
fn interleave(rng: &mut StdRng, mut streams: Vec<VecDeque<RawEvent>>) -> Vec<RawEvent> {
    let mut merged = Vec::new();
    loop {
        let pending: Vec<usize> = (0..streams.len())
            .filter(|i| !streams[*i].is_empty())
            .collect();
        if pending.is_empty() {
            return merged;
        }
        let pick = pending[rng.random_range(0..pending.len())];
        if let Some(event) = streams[pick].pop_front() {
            merged.push(event);
        }
    }
}

/// Replay the published lock events and check no lock ever had two owners
fn assert_mutual_exclusion(events: &[SemanticEvent]) {
    let mut owners: FxHashMap<ProcessTrackedObjectId, (u64, u32)> = FxHashMap::default();
    for event in events {
        match event {
            SemanticEvent::LockAcquireReturned {
                thread,
                lock,
                success: true,
                ..
            } => {
                let entry = owners.entry(*lock).or_insert((thread.thread_id, 0));
                assert!(
                    entry.1 == 0 || entry.0 == thread.thread_id,
                    "Lock {lock} taken by {thread} while owned by {}",
                    entry.0
                );
                *entry = (thread.thread_id, entry.1 + 1);
            }
            SemanticEvent::LockReleased { thread, lock, .. } => {
                let entry = owners.get_mut(lock).expect("Released lock was never taken");
                assert_eq!(entry.0, thread.thread_id);
                assert!(entry.1 > 0);
                entry.1 -= 1;
            }
            _ => {}
        }
    }
    assert!(owners.values().all(|(_, depth)| *depth == 0));
}

#[test]
fn test_shuffled_streams_replay_consistently() {
    for seed in 0..32 {
        let mut rng = StdRng::seed_from_u64(seed);
        let threads = rng.random_range(2..6);
        let (streams, acquires) = generate_streams(&mut rng, threads);

        let h = start_engine();
        h.feed(interleave(&mut rng, streams));

        let events = h.events();
        let returned = events
            .iter()
            .filter(|e| matches!(e, SemanticEvent::LockAcquireReturned { .. }))
            .count();
        assert_eq!(returned, acquires, "seed {seed}");
        assert_mutual_exclusion(&events);

        let snapshot = h.engine.snapshot(1).unwrap();
        for thread in &snapshot.threads {
            assert_eq!(thread.state, ThreadState::Running, "seed {seed}");
            assert_eq!(thread.parked_events, 0, "seed {seed}");
        }
        assert!(snapshot.locks.iter().all(|l| l.owner.is_none()));
    }
}
