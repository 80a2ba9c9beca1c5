use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

use tokio::sync::Notify;

/// Single-use gate that holds every worker until the coordinator lets them go.
///
/// The released state is latched, so a worker arriving after `release` passes
/// straight through instead of waiting for a signal it already missed.
#[derive(Debug, Default)]
pub struct EntryBarrier {
    released: AtomicBool,
    notify: Notify,
}

impl EntryBarrier {
    /// Creates a closed `EntryBarrier`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the gate and wakes every waiter.
    ///
    /// # Returns
    /// `true` for the call that actually opened the gate, `false` for any later one.
    pub fn release(&self) -> bool {
        let first = !self.released.swap(true, Ordering::AcqRel);
        if first {
            self.notify.notify_waiters();
        }
        first
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Waits until `release` has been called at least once.
    pub async fn wait(&self) {
        loop {
            // Register before reading the flag, `notify_waiters` only reaches
            // waiters that are already enabled.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_released() {
                return;
            }
            notified.await;
        }
    }
}

/// Countdown gate the coordinator blocks on until every worker checked out.
#[derive(Debug)]
pub struct ExitBarrier {
    remaining: AtomicUsize,
    notify: Notify,
}

impl ExitBarrier {
    /// Creates a new `ExitBarrier`.
    ///
    /// # Arguments
    /// * `count` - The amount of workers that must signal before the gate opens.
    ///   A zero count yields a gate that is already open.
    pub fn new(count: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(count),
            notify: Notify::new(),
        }
    }

    /// Checks one worker out.
    ///
    /// The counter saturates at zero, signals past the initial count are ignored.
    ///
    /// # Returns
    /// `true` only for the signal that brought the count to zero.
    pub fn signal_done(&self) -> bool {
        let prev = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));

        match prev {
            Ok(1) => {
                self.notify.notify_waiters();
                true
            }
            Ok(_) => false,
            Err(_) => {
                log::warn!("exit barrier signalled past zero, ignoring");
                false
            }
        }
    }

    /// The amount of workers that have not signalled yet.
    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    pub fn is_open(&self) -> bool {
        self.remaining() == 0
    }

    /// Waits until every worker has signalled.
    pub async fn await_all(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_open() {
                return;
            }
            notified.await;
        }
    }

    /// Returns a guard that signals this barrier once when dropped.
    pub fn done_guard(self: &Arc<Self>) -> DoneGuard {
        DoneGuard {
            exit: Arc::clone(self),
        }
    }
}

/// Signals its `ExitBarrier` on drop, whether the owner returned, bailed out or panicked.
#[derive(Debug)]
pub struct DoneGuard {
    exit: Arc<ExitBarrier>,
}

impl Drop for DoneGuard {
    fn drop(&mut self) {
        self.exit.signal_done();
    }
}
