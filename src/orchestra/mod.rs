mod barrier;
mod coordinator;
mod error;
mod reporter;
mod worker;

pub use barrier::{DoneGuard, EntryBarrier, ExitBarrier};
pub use coordinator::{CancelHandle, Coordinator, RunOutcome, RunReport};
pub use error::{OrchestraError, Result, WorkloadError};
pub use reporter::{PresentationThread, ProgressEvent, ProgressReporter, ProgressSink};
pub use worker::{StateCell, WorkerReport, WorkerState, WorkerStatus, WorkerTask};
