// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The reusable kernel wait task and the outcomes its blocking wait can report.

use crate::ids::DeviceUuid;

/// A pre-bound handle to the kernel's "wait for next event" call for one
/// device. Workers keep exactly one of these alive for their whole lifetime
/// and rebind its event sequence number after each wait returns, so the
/// kernel transport never has to re-resolve the device by UUID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitTask {
    pub uuid: DeviceUuid,
    /// Event sequence number the kernel last reported; the next wait call
    /// only returns once this has advanced.
    pub event_nr: u64,
}

impl WaitTask {
    pub fn new(uuid: DeviceUuid) -> Self {
        Self { uuid, event_nr: 0 }
    }

    pub fn with_event_nr(uuid: DeviceUuid, event_nr: u64) -> Self {
        Self { uuid, event_nr }
    }
}

/// Reason a worker's current-events bit was set by an interrupted wait.
///
/// The source ORs both into one "something happened" bit; keeping them
/// distinct here lets the worker report which one fired while still
/// allowing callers to merge them the way `§4.3a` specifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptReason {
    /// The kernel reported a genuine device-level error.
    DeviceError,
    /// The wait was broken out of by the scheduler's directed wake signal.
    Timeout,
}

/// Outcome of one blocking kernel wait call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Transient failure (e.g. `EINTR` from an unrelated signal); retry
    /// after a brief backoff without re-entering the wait immediately.
    Retry,
    /// The wait returned because something worth reporting happened.
    Interrupted(InterruptReason),
    /// The device vanished or the transport failed unrecoverably; the
    /// worker must proceed straight to cleanup.
    Fatal,
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;
