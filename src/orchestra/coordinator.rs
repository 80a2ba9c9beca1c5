use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::{
    runtime::{Builder, Runtime},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use super::{
    barrier::{EntryBarrier, ExitBarrier},
    error::{Result, WorkloadError},
    reporter::{PresentationThread, ProgressReporter, ProgressSink},
    worker::{StateCell, WorkerReport, WorkerStatus, WorkerTask},
};
use crate::{
    config::RunConfig,
    workload::{Inputs, Registry},
};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every worker checked out, failed workloads included.
    Completed,
    /// The wait was interrupted or timed out before every worker checked out.
    Cancelled,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => f.write_str("completed"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// The outcome of a run together with what every launched worker reported.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub workers: Vec<WorkerReport>,
}

/// Interrupts the runs of a `Coordinator` from any thread.
///
/// Cancelling is permanent: the current run and every later one end as `Cancelled`.
#[derive(Debug, Clone)]
pub struct CancelHandle(CancellationToken);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }
}

struct WorkerHandle {
    name: Arc<str>,
    state: StateCell,
    join: JoinHandle<WorkerReport>,
}

/// Everything a single run owns, dropped once the run returns.
struct RunState {
    workers: Vec<WorkerHandle>,
    entry: Arc<EntryBarrier>,
    exit: Arc<ExitBarrier>,
}

impl RunState {
    fn new(size: usize) -> Self {
        Self {
            workers: Vec::with_capacity(size),
            entry: Arc::new(EntryBarrier::new()),
            exit: Arc::new(ExitBarrier::new(size)),
        }
    }

    /// Hands the task to a pool thread of its own.
    fn launch(&mut self, task: WorkerTask) {
        let name = Arc::clone(task.name());
        let state = task.state();
        let join = tokio::task::spawn_blocking(move || task.run());
        self.workers.push(WorkerHandle { name, state, join });
    }

    /// Waits for every launched task to terminate.
    ///
    /// An interrupted run only waits `grace` for the stragglers. Tasks still
    /// running past it are abandoned and reported as cancelled.
    async fn finish(self, outcome: RunOutcome, grace: Duration) -> RunReport {
        let mut reports = Vec::with_capacity(self.workers.len());
        let deadline = tokio::time::Instant::now() + grace;

        for mut handle in self.workers {
            let joined = match outcome {
                RunOutcome::Completed => Ok((&mut handle.join).await),
                RunOutcome::Cancelled => {
                    tokio::time::timeout_at(deadline, &mut handle.join).await
                }
            };

            match joined {
                Ok(Ok(report)) => reports.push(report),
                Ok(Err(e)) => {
                    log::warn!("{} terminated abnormally: {e}", handle.name);
                    reports.push(WorkerReport::abandoned(
                        handle.name,
                        WorkerStatus::Failed(WorkloadError::Panicked(e.to_string())),
                    ));
                }
                Err(_) => {
                    log::warn!(
                        "abandoning {} in state {:?}, still busy after {grace:?}",
                        handle.name,
                        handle.state.get()
                    );
                    reports.push(WorkerReport::abandoned(handle.name, WorkerStatus::Cancelled));
                }
            }
        }

        RunReport {
            outcome,
            workers: reports,
        }
    }
}

/// Launches a fixed set of workers behind an entry barrier and waits for all of
/// them on an exit barrier.
///
/// Workers run on tokio's blocking pool, one thread each, growing on demand and
/// reusing idle threads. The coordinator waits from the calling thread and every
/// presentation callback runs on a dedicated presentation thread.
pub struct Coordinator {
    config: RunConfig,
    runtime: Runtime,
    presentation: PresentationThread,
    cancel: CancellationToken,
}

impl Coordinator {
    /// Creates a new `Coordinator`.
    ///
    /// # Arguments
    /// * `config` - Reporting cadence, deadline and input seed of every run.
    /// * `sink` - Receives the presentation events, replaceable through `reporter().set_sink`.
    ///
    /// # Errors
    /// Returns an `OrchestraError` if the config is invalid or a thread can't be spawned.
    pub fn new(config: RunConfig, sink: Box<dyn ProgressSink>) -> Result<Self> {
        config.validate()?;

        let runtime = Builder::new_current_thread()
            .enable_all()
            .thread_name("gcd-worker")
            .build()?;
        let presentation = PresentationThread::spawn(sink)?;

        Ok(Self {
            config,
            runtime,
            presentation,
            cancel: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn reporter(&self) -> ProgressReporter {
        self.presentation.reporter()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(self.cancel.clone())
    }

    /// Runs the four GCD variants over `iterations` random input pairs.
    pub fn run(&self, iterations: usize) -> RunOutcome {
        let inputs = Arc::new(Inputs::random(iterations, self.config.seed));
        self.run_with(Registry::gcd(inputs)).outcome
    }

    /// Runs one worker per registry entry and blocks until all of them checked
    /// out or the run is interrupted.
    ///
    /// By the time this returns every worker task has terminated and the sink
    /// has received `on_done`.
    pub fn run_with(&self, registry: Registry) -> RunReport {
        let started = Instant::now();
        let report = self.runtime.block_on(self.drive(registry));

        let reporter = self.reporter();
        reporter.done(report.outcome);
        reporter.flush();

        log::info!(
            "run {} in {:?} with {} worker(s)",
            report.outcome,
            started.elapsed(),
            report.workers.len()
        );
        report
    }

    async fn drive(&self, registry: Registry) -> RunReport {
        let mut run = RunState::new(registry.len());
        let cancel = self.cancel.child_token();
        let reporter = self.reporter();
        let names = registry.names();

        for entry in registry {
            let task = WorkerTask::new(
                entry,
                Arc::clone(&run.entry),
                run.exit.done_guard(),
                reporter.clone(),
                cancel.clone(),
                self.config.progress_step,
            );
            run.launch(task);
        }

        log::info!("starting {} worker(s)", run.workers.len());
        reporter.started(names);
        run.entry.release();

        let outcome = self.await_exit(&run.exit, &cancel).await;
        if outcome == RunOutcome::Cancelled {
            log::warn!(
                "cancelling run with {} worker(s) still out",
                run.exit.remaining()
            );
            cancel.cancel();
        }

        run.finish(outcome, SHUTDOWN_GRACE).await
    }

    async fn await_exit(&self, exit: &ExitBarrier, cancel: &CancellationToken) -> RunOutcome {
        let all_done = async {
            match self.config.deadline() {
                Some(deadline) => tokio::time::timeout(deadline, exit.await_all())
                    .await
                    .is_ok(),
                None => {
                    exit.await_all().await;
                    true
                }
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => RunOutcome::Cancelled,
            done = all_done => {
                if done {
                    RunOutcome::Completed
                } else {
                    log::warn!("deadline expired before every worker checked out");
                    RunOutcome::Cancelled
                }
            }
        }
    }

    /// Stops the presentation thread after it drained, then the worker pool.
    pub fn shutdown(self) {
        let Self {
            runtime,
            presentation,
            ..
        } = self;

        presentation.close();
        runtime.shutdown_timeout(SHUTDOWN_GRACE);
    }
}
