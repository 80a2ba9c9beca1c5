//! Barrier-gated worker pool: every worker waits on an entry barrier until the
//! coordinator lets them go, reports progress to a single presentation thread,
//! and checks out of an exit barrier the coordinator blocks on.

pub mod config;
pub mod orchestra;
pub mod workload;

pub use config::RunConfig;
pub use orchestra::{
    CancelHandle, Coordinator, OrchestraError, ProgressSink, RunOutcome, RunReport, WorkloadError,
};
pub use workload::{Inputs, Registry, WorkloadEntry};
