use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
};

use tokio_util::sync::CancellationToken;

use super::{
    barrier::{DoneGuard, EntryBarrier},
    error::WorkloadError,
    reporter::{ProgressEvent, ProgressReporter},
};
use crate::workload::WorkloadEntry;

/// Lifecycle of a `WorkerTask`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    Created,
    WaitingForEntry,
    Running,
    ReportingProgress,
    Finishing,
    Done,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::WaitingForEntry,
            2 => Self::Running,
            3 => Self::ReportingProgress,
            4 => Self::Finishing,
            _ => Self::Done,
        }
    }
}

/// Worker state readable from other threads.
#[derive(Debug, Clone)]
pub struct StateCell(Arc<AtomicU8>);

impl StateCell {
    fn new() -> Self {
        Self(Arc::new(AtomicU8::new(WorkerState::Created as u8)))
    }

    pub fn get(&self) -> WorkerState {
        WorkerState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: WorkerState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// How a worker ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerStatus {
    Finished,
    Failed(WorkloadError),
    Cancelled,
}

/// What a worker did before terminating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    pub name: Arc<str>,
    /// Input pairs processed successfully.
    pub computed: usize,
    /// Wrapping sum of every result, equal across correct variants over the same inputs.
    pub checksum: u64,
    pub status: WorkerStatus,
}

impl WorkerReport {
    fn new(name: Arc<str>) -> Self {
        Self {
            name,
            computed: 0,
            checksum: 0,
            status: WorkerStatus::Finished,
        }
    }

    /// Report for a task whose own report could not be collected.
    pub(super) fn abandoned(name: Arc<str>, status: WorkerStatus) -> Self {
        Self {
            status,
            ..Self::new(name)
        }
    }
}

/// One workload run, gated by the entry barrier and checked out of the exit barrier.
///
/// The exit barrier is signalled when the task is dropped, so it happens exactly
/// once whether the task finished, failed, was cancelled, panicked or never ran.
pub struct WorkerTask {
    entry: WorkloadEntry,
    gate: Arc<EntryBarrier>,
    reporter: ProgressReporter,
    cancel: CancellationToken,
    state: StateCell,
    step: u8,
    _done: DoneGuard,
}

impl WorkerTask {
    /// Creates a new `WorkerTask` and reports it at 0%.
    ///
    /// # Arguments
    /// * `entry` - The workload to run.
    /// * `gate` - The entry barrier shared by every worker of the run.
    /// * `done` - Guard over the run's exit barrier.
    /// * `reporter` - Where progress events are sent.
    /// * `cancel` - Checked at every suspension point.
    /// * `step` - Reporting cadence in percent, clamped to `1..=100`.
    pub fn new(
        entry: WorkloadEntry,
        gate: Arc<EntryBarrier>,
        done: DoneGuard,
        reporter: ProgressReporter,
        cancel: CancellationToken,
        step: u8,
    ) -> Self {
        reporter.progress(ProgressEvent::progress(Arc::clone(entry.name()), 0));

        Self {
            entry,
            gate,
            reporter,
            cancel,
            state: StateCell::new(),
            step: step.clamp(1, 100),
            _done: done,
        }
    }

    pub fn name(&self) -> &Arc<str> {
        self.entry.name()
    }

    pub fn state(&self) -> StateCell {
        self.state.clone()
    }

    /// Blocks the calling thread for the whole lifetime of the worker.
    ///
    /// # Returns
    /// The worker's report, the exit barrier has been signalled once this returns.
    pub fn run(self) -> WorkerReport {
        let report = self.execute();
        log::debug!(
            "{} checked out after {} computations: {:?}",
            report.name,
            report.computed,
            report.status
        );
        report
    }

    fn execute(&self) -> WorkerReport {
        let name = Arc::clone(self.entry.name());
        let mut report = WorkerReport::new(Arc::clone(&name));

        self.transition(WorkerState::WaitingForEntry);
        // An open gate wins over a pending cancellation, which is then noticed
        // at the first progress report.
        let released = futures::executor::block_on(async {
            tokio::select! {
                biased;
                _ = self.gate.wait() => true,
                _ = self.cancel.cancelled() => false,
            }
        });

        if !released {
            self.transition(WorkerState::Finishing);
            report.status = WorkerStatus::Cancelled;
            return report;
        }

        self.transition(WorkerState::Running);

        let inputs = Arc::clone(self.entry.inputs());
        let total = inputs.len();
        let mut threshold = self.step;

        for (i, &(a, b)) in inputs.pairs().iter().enumerate() {
            match self.compute(a, b) {
                Ok(value) => {
                    report.computed += 1;
                    report.checksum = report.checksum.wrapping_add(value as u64);
                }
                Err(e) => {
                    self.transition(WorkerState::Finishing);
                    log::warn!("{name} failed on input #{i} ({a}, {b}): {e}");
                    let reached = percent(i, total);
                    self.reporter
                        .progress(ProgressEvent::failed(Arc::clone(&name), reached, e.clone()));
                    report.status = WorkerStatus::Failed(e);
                    return report;
                }
            }

            let reached = percent(i + 1, total);
            let cancelled = reached < 100 && self.cancel.is_cancelled();
            if reached < threshold && !cancelled {
                continue;
            }

            self.transition(WorkerState::ReportingProgress);
            self.reporter
                .progress(ProgressEvent::progress(Arc::clone(&name), reached));
            threshold = next_threshold(reached, self.step);

            if cancelled {
                self.transition(WorkerState::Finishing);
                log::debug!("{name} cancelled at {reached}%");
                report.status = WorkerStatus::Cancelled;
                return report;
            }
            self.transition(WorkerState::Running);
        }

        if total == 0 {
            self.reporter
                .progress(ProgressEvent::progress(Arc::clone(&name), 100));
        }

        self.transition(WorkerState::Finishing);
        report
    }

    fn compute(&self, a: i64, b: i64) -> Result<i64, WorkloadError> {
        panic::catch_unwind(AssertUnwindSafe(|| self.entry.compute(a, b)))
            .unwrap_or_else(|payload| Err(WorkloadError::Panicked(panic_message(&*payload))))
    }

    fn transition(&self, state: WorkerState) {
        log::trace!("{} -> {state:?}", self.entry.name());
        self.state.set(state);
    }
}

impl Drop for WorkerTask {
    fn drop(&mut self) {
        self.transition(WorkerState::Done);
    }
}

fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    (done as u128 * 100 / total as u128).min(100) as u8
}

fn next_threshold(reached: u8, step: u8) -> u8 {
    let next = (reached as u16 / step as u16 + 1) * step as u16;
    next.min(100) as u8
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::Mutex,
        thread,
        time::{Duration, Instant},
    };

    use super::*;
    use crate::{
        orchestra::{
            barrier::ExitBarrier,
            reporter::{PresentationThread, ProgressSink},
            RunOutcome,
        },
        workload::{gcd, Inputs},
    };

    #[derive(Clone, Default)]
    struct Events(Arc<Mutex<Vec<(u8, bool)>>>);

    impl ProgressSink for Events {
        fn on_progress(&mut self, _worker: &str, percent: u8) {
            self.0.lock().unwrap().push((percent, false));
        }

        fn on_failed(&mut self, _worker: &str, percent: u8, _error: &WorkloadError) {
            self.0.lock().unwrap().push((percent, true));
        }

        fn on_done(&mut self, _outcome: RunOutcome) {}
    }

    struct Fixture {
        gate: Arc<EntryBarrier>,
        exit: Arc<ExitBarrier>,
        cancel: CancellationToken,
        events: Events,
        presentation: PresentationThread,
    }

    impl Fixture {
        fn new() -> Self {
            let events = Events::default();
            Self {
                gate: Arc::new(EntryBarrier::new()),
                exit: Arc::new(ExitBarrier::new(1)),
                cancel: CancellationToken::new(),
                presentation: PresentationThread::spawn(Box::new(events.clone())).unwrap(),
                events,
            }
        }

        fn task(&self, entry: WorkloadEntry, step: u8) -> WorkerTask {
            WorkerTask::new(
                entry,
                Arc::clone(&self.gate),
                self.exit.done_guard(),
                self.presentation.reporter(),
                self.cancel.clone(),
                step,
            )
        }

        fn events(&self) -> Vec<(u8, bool)> {
            self.presentation.reporter().flush();
            self.events.0.lock().unwrap().clone()
        }
    }

    fn inputs(n: i64) -> Arc<Inputs> {
        Arc::new(Inputs::new((1..=n).map(|i| (i * 6, i * 4)).collect()))
    }

    fn wait_for_state(state: &StateCell, want: WorkerState) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while state.get() != want {
            assert!(Instant::now() < deadline, "worker stuck in {:?}", state.get());
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn waits_for_entry_then_runs_to_completion() {
        let fx = Fixture::new();
        let task = fx.task(WorkloadEntry::new("binary", gcd::binary, inputs(8)), 25);
        let state = task.state();
        assert_eq!(state.get(), WorkerState::Created);

        let handle = thread::spawn(move || task.run());
        wait_for_state(&state, WorkerState::WaitingForEntry);
        assert_eq!(fx.exit.remaining(), 1);

        fx.gate.release();
        let report = handle.join().unwrap();

        assert_eq!(report.status, WorkerStatus::Finished);
        assert_eq!(report.computed, 8);
        assert_eq!(report.checksum, (1..=8u64).map(|i| i * 2).sum::<u64>());
        assert_eq!(state.get(), WorkerState::Done);
        assert!(fx.exit.is_open());
        assert_eq!(
            fx.events(),
            [(0, false), (25, false), (50, false), (75, false), (100, false)]
        );
    }

    #[test]
    fn failure_reports_terminal_event_and_still_checks_out() {
        let fx = Fixture::new();
        let entry = WorkloadEntry::new(
            "flaky",
            |a, b| {
                if a == 18 {
                    Err(WorkloadError::Failed("third input".into()))
                } else {
                    gcd::iterative_euclid(a, b)
                }
            },
            inputs(10),
        );
        let task = fx.task(entry, 10);

        fx.gate.release();
        let report = task.run();

        assert_eq!(
            report.status,
            WorkerStatus::Failed(WorkloadError::Failed("third input".into()))
        );
        assert_eq!(report.computed, 2);
        assert!(fx.exit.is_open());
        assert_eq!(fx.events(), [(0, false), (10, false), (20, false), (20, true)]);
    }

    #[test]
    fn panicking_workload_is_contained() {
        let fx = Fixture::new();
        let entry = WorkloadEntry::new("panics", |_, _| panic!("division by zero"), inputs(4));
        let task = fx.task(entry, 10);

        fx.gate.release();
        let report = task.run();

        assert_eq!(
            report.status,
            WorkerStatus::Failed(WorkloadError::Panicked("division by zero".into()))
        );
        assert!(fx.exit.is_open());
    }

    #[test]
    fn cancelled_before_release_never_computes() {
        let fx = Fixture::new();
        let task = fx.task(WorkloadEntry::new("binary", gcd::binary, inputs(4)), 10);
        let state = task.state();

        let handle = thread::spawn(move || task.run());
        wait_for_state(&state, WorkerState::WaitingForEntry);
        fx.cancel.cancel();

        let report = handle.join().unwrap();
        assert_eq!(report.status, WorkerStatus::Cancelled);
        assert_eq!(report.computed, 0);
        assert!(fx.exit.is_open());
    }

    #[test]
    fn cancellation_is_noticed_after_the_current_input() {
        let fx = Fixture::new();
        let task = fx.task(WorkloadEntry::new("binary", gcd::binary, inputs(100)), 10);

        fx.gate.release();
        fx.cancel.cancel();
        let report = task.run();

        assert_eq!(report.status, WorkerStatus::Cancelled);
        assert_eq!(report.computed, 1);
        assert_eq!(fx.events(), [(0, false), (1, false)]);
    }

    #[test]
    fn cancellation_with_a_single_report_stops_on_the_first_input() {
        let fx = Fixture::new();
        let task = fx.task(WorkloadEntry::new("binary", gcd::binary, inputs(50)), 100);

        fx.gate.release();
        fx.cancel.cancel();
        let report = task.run();

        assert_eq!(report.status, WorkerStatus::Cancelled);
        assert_eq!(report.computed, 1);
        assert_eq!(fx.events(), [(0, false), (2, false)]);
    }

    #[test]
    fn empty_inputs_complete_at_full_progress() {
        let fx = Fixture::new();
        let task = fx.task(WorkloadEntry::new("binary", gcd::binary, inputs(0)), 10);

        fx.gate.release();
        let report = task.run();

        assert_eq!(report.status, WorkerStatus::Finished);
        assert_eq!(fx.events(), [(0, false), (100, false)]);
    }

    #[test]
    fn dropping_an_unrun_task_checks_out() {
        let fx = Fixture::new();
        let task = fx.task(WorkloadEntry::new("binary", gcd::binary, inputs(1)), 10);
        let state = task.state();

        drop(task);
        assert_eq!(state.get(), WorkerState::Done);
        assert!(fx.exit.is_open());
    }

    #[test]
    fn odd_steps_still_end_at_one_hundred() {
        assert_eq!(next_threshold(30, 30), 60);
        assert_eq!(next_threshold(90, 30), 100);
        assert_eq!(next_threshold(100, 100), 100);
        assert_eq!(percent(1, 3), 33);
        assert_eq!(percent(3, 3), 100);
    }
}
