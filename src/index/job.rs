//! Single-flight indexing runs and the read gate that keeps readers off a
//! half-written index.
//!
//! All state lives behind one mutex so that `state`, `phase` and
//! `last_result` always change together. The lock is only held for
//! bookkeeping, never while the pipeline runs.

use crate::error::{ServiceError, ServiceResult};
use crate::index::types::{IndexPhase, IndexResult, IndexState, IndexingStatus};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

/// Capability consulted before every read of the engine
pub trait ReadGate: Send + Sync {
    /// Register a reader; false while an indexing run is active
    fn try_enter(&self) -> bool;

    /// Release a reader registered by `try_enter`
    fn leave(&self);
}

/// RAII token proving the index is not being rewritten
pub struct ReadPermit<'a> {
    gate: &'a dyn ReadGate,
}

impl<'a> ReadPermit<'a> {
    pub fn acquire(gate: &'a dyn ReadGate) -> ServiceResult<Self> {
        if gate.try_enter() {
            Ok(Self { gate })
        } else {
            Err(ServiceError::Locked)
        }
    }
}

impl Drop for ReadPermit<'_> {
    fn drop(&mut self) {
        self.gate.leave();
    }
}

#[derive(Default)]
struct JobState {
    state: IndexState,
    phase: IndexPhase,
    last_result: Option<Arc<IndexResult>>,
    generation: u64,
    active_reads: usize,
}

#[derive(Default)]
struct Shared {
    state: Mutex<JobState>,
    changed: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, JobState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_phase(&self, phase: IndexPhase) {
        let mut state = self.lock();
        if state.state == IndexState::Running {
            log::debug!("indexing phase: {:?}", phase);
            state.phase = phase;
        }
    }

    /// Block until readers admitted before the run have finished
    fn wait_for_reads(&self) {
        let mut state = self.lock();
        while state.active_reads > 0 {
            state = self.changed.wait(state).unwrap_or_else(|e| e.into_inner());
        }
    }

    fn complete(&self, result: IndexResult) {
        let mut state = self.lock();
        state.last_result = Some(Arc::new(result));
        state.state = IndexState::Idle;
        state.phase = IndexPhase::Idle;
        drop(state);
        self.changed.notify_all();
    }
}

/// Publishes the run's result when the worker exits, including by panic
struct Completion<'a> {
    shared: &'a Shared,
    result: Option<IndexResult>,
}

impl Drop for Completion<'_> {
    fn drop(&mut self) {
        let result = self.result.take().unwrap_or_else(|| {
            log::error!("indexing worker panicked");
            IndexResult::failed("indexing worker panicked")
        });
        self.shared.complete(result);
    }
}

/// Owns the process-wide indexing status
#[derive(Clone, Default)]
pub struct JobManager {
    shared: Arc<Shared>,
}

impl JobManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept a run and execute `pipeline` on a background thread.
    ///
    /// Returns the run's generation number as soon as it is accepted, or
    /// `AlreadyRunning` if another run is active.
    pub fn start<F>(&self, pipeline: F) -> ServiceResult<u64>
    where
        F: FnOnce(&dyn Fn(IndexPhase)) -> IndexResult + Send + 'static,
    {
        let generation = {
            let mut state = self.shared.lock();
            if state.state == IndexState::Running {
                return Err(ServiceError::AlreadyRunning);
            }
            state.state = IndexState::Running;
            state.phase = IndexPhase::Waiting;
            state.generation += 1;
            state.generation
        };

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("seekql-indexer".to_string())
            .spawn(move || {
                let mut completion = Completion {
                    shared: &shared,
                    result: None,
                };
                shared.wait_for_reads();
                let on_phase = |phase: IndexPhase| shared.set_phase(phase);
                completion.result = Some(pipeline(&on_phase));
            });

        if let Err(e) = spawned {
            let mut state = self.shared.lock();
            state.state = IndexState::Idle;
            state.phase = IndexPhase::Idle;
            state.generation -= 1;
            drop(state);
            self.shared.changed.notify_all();
            return Err(ServiceError::Internal(format!("failed to spawn indexing thread: {}", e)));
        }

        log::info!("indexing run {} accepted", generation);
        Ok(generation)
    }

    /// Snapshot of the published status
    pub fn status(&self) -> IndexingStatus {
        let state = self.shared.lock();
        IndexingStatus {
            state: state.state,
            phase: state.phase,
            last_result: state.last_result.clone(),
            generation: state.generation,
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().state == IndexState::Running
    }

    /// `Locked` while a run is active
    pub fn guard(&self) -> ServiceResult<ReadPermit<'_>> {
        ReadPermit::acquire(self)
    }

    /// Wait until no run is active; false if `timeout` elapsed first
    pub fn wait_for_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.lock();
        while state.state == IndexState::Running {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = match self.shared.changed.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(e) => e.into_inner().0,
            };
        }
        true
    }
}

impl ReadGate for JobManager {
    fn try_enter(&self) -> bool {
        let mut state = self.shared.lock();
        if state.state == IndexState::Running {
            return false;
        }
        state.active_reads += 1;
        true
    }

    fn leave(&self) {
        let mut state = self.shared.lock();
        state.active_reads = state.active_reads.saturating_sub(1);
        let drained = state.active_reads == 0;
        drop(state);
        if drained {
            self.shared.changed.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::sync::mpsc;

    const WAIT: Duration = Duration::from_secs(5);

    fn done(indexed: u64) -> IndexResult {
        IndexResult {
            indexed_count: indexed,
            ..IndexResult::default()
        }
    }

    #[test]
    fn test_run_publishes_result() {
        let jobs = JobManager::new();
        assert!(jobs.status().last_result.is_none());

        let generation = jobs.start(|_| done(7)).unwrap();
        assert_eq!(generation, 1);
        assert!(jobs.wait_for_idle(WAIT));

        let status = jobs.status();
        assert_eq!(status.state, IndexState::Idle);
        assert_eq!(status.phase, IndexPhase::Idle);
        assert_eq!(status.last_result.unwrap().indexed_count, 7);
    }

    #[test]
    fn test_concurrent_starts_single_flight() {
        let jobs = JobManager::new();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Arc::new(Mutex::new(release_rx));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let jobs = jobs.clone();
                let barrier = Arc::clone(&barrier);
                let rx = Arc::clone(&release_rx);
                thread::spawn(move || {
                    barrier.wait();
                    jobs.start(move |_| {
                        let _ = rx.lock().unwrap().recv();
                        done(1)
                    })
                })
            })
            .collect();

        let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 1);
        assert!(
            outcomes
                .iter()
                .filter_map(|o| o.as_ref().err())
                .all(|e| *e == ServiceError::AlreadyRunning)
        );
        assert!(jobs.is_running());

        release_tx.send(()).unwrap();
        assert!(jobs.wait_for_idle(WAIT));
        assert!(jobs.start(|_| done(0)).is_ok());
        assert!(jobs.wait_for_idle(WAIT));
        assert_eq!(jobs.status().generation, 2);
    }

    #[test]
    fn test_reads_locked_while_running() {
        let jobs = JobManager::new();
        assert!(jobs.guard().is_ok());

        let (tx, rx) = mpsc::channel::<()>();
        jobs.start(move |_| {
            let _ = rx.recv();
            done(0)
        })
        .unwrap();

        assert!(matches!(jobs.guard(), Err(ServiceError::Locked)));
        tx.send(()).unwrap();
        assert!(jobs.wait_for_idle(WAIT));
        assert!(jobs.guard().is_ok());
    }

    #[test]
    fn test_run_waits_for_admitted_reads() {
        let jobs = JobManager::new();
        let permit = jobs.guard().unwrap();

        let (started_tx, started_rx) = mpsc::channel::<()>();
        jobs.start(move |_| {
            started_tx.send(()).unwrap();
            done(0)
        })
        .unwrap();

        assert_eq!(jobs.status().phase, IndexPhase::Waiting);
        assert!(started_rx.recv_timeout(Duration::from_millis(100)).is_err());

        drop(permit);
        assert!(started_rx.recv_timeout(WAIT).is_ok());
        assert!(jobs.wait_for_idle(WAIT));
    }

    #[test]
    fn test_phase_updates_visible() {
        let jobs = JobManager::new();
        let (tx, rx) = mpsc::channel::<()>();
        let (phase_tx, phase_rx) = mpsc::channel::<()>();
        jobs.start(move |on_phase| {
            on_phase(IndexPhase::Writing);
            phase_tx.send(()).unwrap();
            let _ = rx.recv();
            done(0)
        })
        .unwrap();

        phase_rx.recv_timeout(WAIT).unwrap();
        assert_eq!(jobs.status().phase, IndexPhase::Writing);
        tx.send(()).unwrap();
        assert!(jobs.wait_for_idle(WAIT));
    }

    #[test]
    fn test_panicking_run_returns_to_idle() {
        let jobs = JobManager::new();
        jobs.start(|_| panic!("boom")).unwrap();
        assert!(jobs.wait_for_idle(WAIT));

        let status = jobs.status();
        assert!(!status.is_running());
        let result = status.last_result.unwrap();
        assert!(result.failure.is_some());
        assert!(jobs.guard().is_ok());
    }

    #[test]
    fn test_wait_for_idle_times_out() {
        let jobs = JobManager::new();
        let (tx, rx) = mpsc::channel::<()>();
        jobs.start(move |_| {
            let _ = rx.recv();
            done(0)
        })
        .unwrap();

        assert!(!jobs.wait_for_idle(Duration::from_millis(50)));
        tx.send(()).unwrap();
        assert!(jobs.wait_for_idle(WAIT));
    }
}
