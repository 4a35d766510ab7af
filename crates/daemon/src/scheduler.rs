// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The timeout scheduler (`§4.2`): a single lazily-spawned task that wakes
//! workers subscribed to [`EventMask::TIMEOUT`] on their configured period
//! by delivering a directed `SIGALRM` to the worker's OS thread.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::core_state::{CoreHandle, Pthread};

#[derive(Clone, Debug)]
struct PendingEntry {
    deadline: Instant,
    timeout: Duration,
}

struct SchedulerState {
    pending: HashMap<String, PendingEntry>,
}

/// Shared timeout scheduler. One instance per daemon, held for the life of
/// the process; its background task is spawned and torn down on demand
/// (`§4.2`: "lazily re-created when a worker next asks for timeout
/// service").
pub struct Scheduler {
    state: Mutex<SchedulerState>,
    condvar: Condvar,
    running: AtomicBool,
    core: CoreHandle,
}

impl Scheduler {
    pub fn new(core: CoreHandle) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SchedulerState { pending: HashMap::new() }),
            condvar: Condvar::new(),
            running: AtomicBool::new(false),
            core,
        })
    }

    /// Register (or refresh) a worker's timeout deadline and ensure the
    /// scheduler task is running (`§4.2` "Registration").
    pub fn register(self: &Arc<Self>, uuid: &str, timeout: Duration) {
        {
            let mut state = self.state.lock();
            state.pending.insert(
                uuid.to_string(),
                PendingEntry { deadline: Instant::now() + timeout, timeout },
            );
        }
        self.condvar.notify_all();
        self.ensure_spawned();
    }

    /// Reset a worker's deadline to fire immediately, used by `SET_TIMEOUT`
    /// so the new value takes effect right away (`§4.2`).
    pub fn reset_deadline(self: &Arc<Self>, uuid: &str, timeout: Duration) {
        let mut state = self.state.lock();
        if let Some(entry) = state.pending.get_mut(uuid) {
            entry.timeout = timeout;
            entry.deadline = Instant::now();
        }
        drop(state);
        self.condvar.notify_all();
    }

    /// Remove a worker from timeout service (`§4.4` unregister-for-event /
    /// cleanup handler step 3).
    pub fn cancel(&self, uuid: &str) {
        let mut state = self.state.lock();
        state.pending.remove(uuid);
        if state.pending.is_empty() {
            drop(state);
            self.condvar.notify_all();
        }
    }

    fn ensure_spawned(self: &Arc<Self>) {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            install_wake_signal_handler();
            let scheduler = Arc::clone(self);
            let spawned = std::thread::Builder::new()
                .name("dmevent-scheduler".into())
                .stack_size(256 * 1024)
                .spawn(move || scheduler.run());
            if let Err(e) = spawned {
                tracing::error!("failed to spawn timeout scheduler thread: {e}");
                self.running.store(false, Ordering::Release);
            }
        }
    }

    fn run(self: Arc<Self>) {
        debug!("timeout scheduler started");
        loop {
            let mut state = self.state.lock();
            if state.pending.is_empty() {
                self.running.store(false, Ordering::Release);
                drop(state);
                ignore_wake_signal();
                debug!("timeout scheduler exiting (no pending timeouts)");
                return;
            }
            let next_deadline =
                state.pending.values().map(|e| e.deadline).min().unwrap_or_else(Instant::now);
            let now = Instant::now();
            if next_deadline > now {
                let wait_for = next_deadline - now;
                let timed_out = self.condvar.wait_for(&mut state, wait_for).timed_out();
                if !timed_out {
                    // Woken by a registration/reset/cancel; loop to re-evaluate.
                    continue;
                }
            }
            let due: Vec<String> = state
                .pending
                .iter()
                .filter(|(_, e)| e.deadline <= Instant::now())
                .map(|(uuid, _)| uuid.clone())
                .collect();
            for uuid in &due {
                if let Some(entry) = state.pending.get_mut(uuid) {
                    entry.deadline += entry.timeout;
                }
            }
            drop(state);

            for uuid in due {
                self.tick(&uuid);
            }
        }
    }

    /// One scheduler tick for a single worker: deliver the wake signal iff
    /// the worker is `Running` and not currently processing; otherwise the
    /// tick is silently skipped (the deadline was already advanced by the
    /// caller) (`§4.2`, `§8` invariant 6).
    fn tick(&self, uuid: &str) {
        let core = self.core.lock();
        let Some(entry) = core.active.get(uuid) else {
            trace!(uuid, "scheduler tick skipped: worker not active");
            return;
        };
        if entry.status != dmevent_core::WorkerStatus::Running || entry.processing {
            trace!(uuid, processing = entry.processing, status = %entry.status, "scheduler tick skipped");
            return;
        }
        if let Some(tid) = entry.thread_id {
            deliver_wake_signal(tid);
        }
    }
}

/// Deliver the directed `SIGALRM` used solely to interrupt a worker's
/// blocking kernel wait (`§4.2`, `§9`: "do not use the signal to
/// communicate data").
pub fn deliver_wake_signal(tid: Pthread) {
    deliver_wake_signal_checked(tid);
}

/// Same delivery, but reports whether the target thread still exists.
/// `pthread_kill` returns `ESRCH` (nonzero) for a thread that has already
/// exited; the update protocol (`§4.4`) and the reaper (`§4.5a`) both use
/// that to tell "signal delivered" apart from "signal target is gone".
pub fn deliver_wake_signal_checked(tid: Pthread) -> bool {
    #[allow(unsafe_code)]
    let rc = unsafe { libc::pthread_kill(tid, libc::SIGALRM) };
    rc == 0
}

static HANDLER_INSTALLED: AtomicBool = AtomicBool::new(false);

extern "C" fn noop_handler(_: libc::c_int) {}

/// Install a no-op `SIGALRM` handler (not `SIG_IGN`) so a delivery while a
/// worker is inside its blocking wait produces `EINTR` instead of being
/// silently dropped.
fn install_wake_signal_handler() {
    if HANDLER_INSTALLED.swap(true, Ordering::AcqRel) {
        return;
    }
    use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
    let action = SigAction::new(SigHandler::Handler(noop_handler), SaFlags::empty(), SigSet::empty());
    #[allow(unsafe_code)]
    unsafe {
        let _ = sigaction(Signal::SIGALRM, &action);
    }
}

/// Install `SIG_IGN` for `SIGALRM` at process scope so a late delivery
/// after the scheduler has torn down is harmless (`§4.2` "Cancellation").
fn ignore_wake_signal() {
    use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
    let action = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
    #[allow(unsafe_code)]
    unsafe {
        let _ = sigaction(Signal::SIGALRM, &action);
    }
    HANDLER_INSTALLED.store(false, Ordering::Release);
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
