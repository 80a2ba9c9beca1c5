use std::{
    collections::BTreeMap,
    io,
    panic::{self, AssertUnwindSafe},
    sync::{mpsc as std_mpsc, Arc},
    thread::{self, JoinHandle},
};

use tokio::sync::mpsc;

use super::{coordinator::RunOutcome, error::WorkloadError};

/// A single progress update emitted by a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub worker: Arc<str>,
    pub percent: u8,
    /// Set on the terminal event of a worker whose workload failed.
    pub error: Option<WorkloadError>,
}

impl ProgressEvent {
    pub fn progress(worker: Arc<str>, percent: u8) -> Self {
        Self {
            worker,
            percent: percent.min(100),
            error: None,
        }
    }

    pub fn failed(worker: Arc<str>, percent: u8, error: WorkloadError) -> Self {
        Self {
            worker,
            percent: percent.min(100),
            error: Some(error),
        }
    }

    /// Whether no further events follow this one for the same worker.
    pub fn is_terminal(&self) -> bool {
        self.percent == 100 || self.error.is_some()
    }
}

/// The presentation side of a run, implemented by whoever displays progress.
///
/// Every method is called on the presentation thread only.
pub trait ProgressSink: Send {
    /// A run is about to release its workers.
    fn on_started(&mut self, _workers: &[String]) {}

    fn on_progress(&mut self, worker: &str, percent: u8);

    /// A worker's workload failed after reaching `percent`.
    fn on_failed(&mut self, worker: &str, percent: u8, error: &WorkloadError) {
        log::warn!("{worker} failed at {percent}%: {error}");
    }

    fn on_done(&mut self, outcome: RunOutcome);
}

/// State owned by the presentation thread.
struct Presenter {
    sink: Box<dyn ProgressSink>,
    /// Latest event of every worker, failures keep their error.
    last: BTreeMap<Arc<str>, (u8, Option<WorkloadError>)>,
}

impl Presenter {
    fn started(&mut self, workers: &[String]) {
        self.last.retain(|worker, _| workers.iter().any(|w| **w == **worker));
        self.sink.on_started(workers);
    }

    fn progress(&mut self, event: ProgressEvent) {
        match &event.error {
            Some(error) => self.sink.on_failed(&event.worker, event.percent, error),
            None => self.sink.on_progress(&event.worker, event.percent),
        }
        self.last.insert(event.worker, (event.percent, event.error));
    }

    /// Swaps the sink and redisplays the latest known state of every worker.
    fn replace(&mut self, sink: Box<dyn ProgressSink>) {
        self.sink = sink;
        for (worker, (percent, error)) in &self.last {
            match error {
                Some(error) => self.sink.on_failed(worker, *percent, error),
                None => self.sink.on_progress(worker, *percent),
            }
        }
    }
}

enum Job {
    Run(Box<dyn FnOnce(&mut Presenter) + Send>),
    Close,
}

/// Handle used by workers and the coordinator to reach the presentation thread.
///
/// Callbacks run in submission order. Once the thread is closed, submissions
/// are dropped.
#[derive(Clone)]
pub struct ProgressReporter {
    tx: mpsc::UnboundedSender<Job>,
}

impl ProgressReporter {
    /// Runs `callback` on the presentation thread.
    pub fn report<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(move |_| callback());
    }

    pub fn started(&self, workers: Vec<String>) {
        self.submit(move |p| p.started(&workers));
    }

    pub fn progress(&self, event: ProgressEvent) {
        self.submit(move |p| p.progress(event));
    }

    pub fn done(&self, outcome: RunOutcome) {
        self.submit(move |p| p.sink.on_done(outcome));
    }

    /// Replaces the sink without disturbing running workers.
    ///
    /// The swap is ordered with the other submissions: events submitted before
    /// reach the old sink, events submitted after reach the new one.
    pub fn set_sink(&self, sink: Box<dyn ProgressSink>) {
        self.submit(move |p| p.replace(sink));
    }

    /// Blocks until every callback submitted before this call has run.
    ///
    /// Must not be called from the presentation thread itself.
    pub fn flush(&self) {
        let (tx, rx) = std_mpsc::channel();
        self.report(move || {
            let _ = tx.send(());
        });
        // A closed thread drops the callback, and with it the sender.
        let _ = rx.recv();
    }

    fn submit<F>(&self, job: F)
    where
        F: FnOnce(&mut Presenter) + Send + 'static,
    {
        if self.tx.send(Job::Run(Box::new(job))).is_err() {
            log::debug!("presentation thread closed, dropping callback");
        }
    }
}

/// The dedicated thread every presentation callback runs on.
pub struct PresentationThread {
    reporter: ProgressReporter,
    handle: Option<JoinHandle<()>>,
}

impl PresentationThread {
    /// Spawns the presentation thread.
    ///
    /// # Arguments
    /// * `sink` - Receives every presentation event until replaced.
    ///
    /// # Returns
    /// The running thread or an io error if the OS refused to spawn it.
    pub fn spawn(sink: Box<dyn ProgressSink>) -> io::Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel();

        let handle = thread::Builder::new()
            .name("presentation".into())
            .spawn(move || {
                let mut presenter = Presenter {
                    sink,
                    last: BTreeMap::new(),
                };

                while let Some(Job::Run(job)) = rx.blocking_recv() {
                    let res = panic::catch_unwind(AssertUnwindSafe(|| job(&mut presenter)));
                    if res.is_err() {
                        log::warn!("presentation callback panicked");
                    }
                }

                log::debug!("presentation thread stopped");
            })?;

        Ok(Self {
            reporter: ProgressReporter { tx },
            handle: Some(handle),
        })
    }

    pub fn reporter(&self) -> ProgressReporter {
        self.reporter.clone()
    }

    /// Runs every callback submitted so far, then stops the thread.
    pub fn close(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        let _ = self.reporter.tx.send(Job::Close);
        if handle.join().is_err() {
            log::warn!("presentation thread panicked");
        }
    }
}

impl Drop for PresentationThread {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Seen {
        Started(Vec<String>),
        Progress(String, u8),
        Failed(String, u8),
        Done(RunOutcome),
    }

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<Seen>>>);

    impl Recorder {
        fn seen(&self) -> Vec<Seen> {
            self.0.lock().unwrap().clone()
        }
    }

    impl ProgressSink for Recorder {
        fn on_started(&mut self, workers: &[String]) {
            self.0.lock().unwrap().push(Seen::Started(workers.to_vec()));
        }

        fn on_progress(&mut self, worker: &str, percent: u8) {
            self.0.lock().unwrap().push(Seen::Progress(worker.into(), percent));
        }

        fn on_failed(&mut self, worker: &str, percent: u8, _error: &WorkloadError) {
            self.0.lock().unwrap().push(Seen::Failed(worker.into(), percent));
        }

        fn on_done(&mut self, outcome: RunOutcome) {
            self.0.lock().unwrap().push(Seen::Done(outcome));
        }
    }

    #[test]
    fn callbacks_run_on_the_presentation_thread_in_order() {
        let names = Arc::new(Mutex::new(Vec::new()));
        let thread = PresentationThread::spawn(Box::new(Recorder::default())).unwrap();
        let reporter = thread.reporter();

        for i in 0..10 {
            let names = Arc::clone(&names);
            reporter.report(move || {
                let name = thread::current().name().map(str::to_owned);
                names.lock().unwrap().push((i, name));
            });
        }
        reporter.flush();

        let names = names.lock().unwrap();
        assert_eq!(names.len(), 10);
        for (expected, (i, name)) in names.iter().enumerate() {
            assert_eq!(*i, expected);
            assert_eq!(name.as_deref(), Some("presentation"));
        }
    }

    #[test]
    fn typed_events_reach_the_sink() {
        let recorder = Recorder::default();
        let thread = PresentationThread::spawn(Box::new(recorder.clone())).unwrap();
        let reporter = thread.reporter();
        let worker: Arc<str> = "binary".into();

        reporter.started(vec!["binary".into()]);
        reporter.progress(ProgressEvent::progress(Arc::clone(&worker), 50));
        reporter.progress(ProgressEvent::failed(
            Arc::clone(&worker),
            60,
            WorkloadError::Failed("x".into()),
        ));
        reporter.done(RunOutcome::Completed);
        thread.close();

        assert_eq!(
            recorder.seen(),
            [
                Seen::Started(vec!["binary".into()]),
                Seen::Progress("binary".into(), 50),
                Seen::Failed("binary".into(), 60),
                Seen::Done(RunOutcome::Completed),
            ]
        );
    }

    #[test]
    fn replaced_sink_gets_latest_progress_replayed() {
        let old = Recorder::default();
        let new = Recorder::default();
        let thread = PresentationThread::spawn(Box::new(old.clone())).unwrap();
        let reporter = thread.reporter();

        reporter.progress(ProgressEvent::progress("a".into(), 10));
        reporter.progress(ProgressEvent::progress("a".into(), 40));
        reporter.progress(ProgressEvent::progress("b".into(), 20));
        reporter.progress(ProgressEvent::progress("c".into(), 30));
        reporter.progress(ProgressEvent::failed(
            "c".into(),
            30,
            WorkloadError::Failed("x".into()),
        ));
        reporter.set_sink(Box::new(new.clone()));
        reporter.progress(ProgressEvent::progress("b".into(), 100));
        reporter.flush();

        assert_eq!(old.seen().len(), 5);
        assert_eq!(
            new.seen(),
            [
                Seen::Progress("a".into(), 40),
                Seen::Progress("b".into(), 20),
                Seen::Failed("c".into(), 30),
                Seen::Progress("b".into(), 100),
            ]
        );
    }

    #[test]
    fn panicking_callback_does_not_stop_the_thread() {
        let recorder = Recorder::default();
        let thread = PresentationThread::spawn(Box::new(recorder.clone())).unwrap();
        let reporter = thread.reporter();

        reporter.report(|| panic!("bad callback"));
        reporter.done(RunOutcome::Cancelled);
        reporter.flush();

        assert_eq!(recorder.seen(), [Seen::Done(RunOutcome::Cancelled)]);
    }

    #[test]
    fn submissions_after_close_are_dropped() {
        let thread = PresentationThread::spawn(Box::new(Recorder::default())).unwrap();
        let reporter = thread.reporter();
        thread.close();

        reporter.done(RunOutcome::Completed);
        reporter.flush();
    }

    #[test]
    fn progress_percent_is_clamped() {
        let event = ProgressEvent::progress("a".into(), 250);
        assert_eq!(event.percent, 100);
        assert!(event.is_terminal());
        assert!(!ProgressEvent::progress("a".into(), 99).is_terminal());
    }
}
