use std::{env, process, thread, time::Instant};

use anyhow::Context;
use log::info;
use tokio::{runtime, signal};

use latch_orchestra::{
    CancelHandle, Coordinator, ProgressSink, RunConfig, RunOutcome, WorkloadError,
};

/// Prints every presentation event to stdout.
struct ConsoleSink {
    started: Option<Instant>,
}

impl ProgressSink for ConsoleSink {
    fn on_started(&mut self, workers: &[String]) {
        self.started = Some(Instant::now());
        println!("Starting GCD tests: {}", workers.join(", "));
    }

    fn on_progress(&mut self, worker: &str, percent: u8) {
        println!("{percent}% complete for {worker}");
    }

    fn on_failed(&mut self, worker: &str, percent: u8, error: &WorkloadError) {
        println!("{worker} failed at {percent}%: {error}");
    }

    fn on_done(&mut self, outcome: RunOutcome) {
        match self.started {
            Some(started) => println!("All threads {outcome} after {:?}", started.elapsed()),
            None => println!("All threads {outcome}"),
        }
    }
}

/// Cancels the coordinator on Ctrl-C, from a thread of its own.
fn cancel_on_interrupt(cancel: CancelHandle) -> anyhow::Result<()> {
    let rt = runtime::Builder::new_current_thread().enable_all().build()?;

    thread::Builder::new()
        .name("interrupt".into())
        .spawn(move || {
            if rt.block_on(signal::ctrl_c()).is_ok() {
                info!("received SIGINT, cancelling");
                cancel.cancel();
            }
        })?;

    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() > 3 {
        eprintln!("Usage: {} [iterations] [config.json]", args[0]);
        process::exit(1);
    }

    let config = match args.get(2) {
        Some(path) => RunConfig::from_file(path).with_context(|| format!("loading {path}"))?,
        None => RunConfig::default(),
    };

    let iterations = match args.get(1) {
        Some(raw) => raw
            .parse::<usize>()
            .with_context(|| format!("invalid iteration count: {raw}"))?,
        None => config.iterations,
    };

    let coordinator = Coordinator::new(config, Box::new(ConsoleSink { started: None }))?;
    cancel_on_interrupt(coordinator.cancel_handle())?;

    info!("running GCD tests over {iterations} input pairs");
    let outcome = coordinator.run(iterations);
    coordinator.shutdown();

    if outcome == RunOutcome::Cancelled {
        process::exit(1);
    }
    Ok(())
}
