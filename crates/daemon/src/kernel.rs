// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The kernel transport boundary: resolving a device and blocking for its
//! next event. The real implementation talks to the device-mapper ioctl
//! interface; that transport is an external collaborator out of scope for
//! this crate (`§1`), so this module only defines the trait the rest of
//! the daemon programs against plus a test double.

use dmevent_core::{DeviceIdentity, DeviceUuid, WaitOutcome, WaitTask};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("device {0} does not exist")]
    NoSuchDevice(DeviceUuid),
    #[error("kernel transport error: {0}")]
    Transport(String),
}

/// Abstraction over the device-mapper ioctl transport used by a worker.
///
/// Implementations must not block the caller longer than the semantics
/// below promise: `wait` is the only method allowed to block
/// indefinitely, and only it is expected to be interrupted by `SIGALRM`.
pub trait DeviceMonitor: Send + Sync {
    /// Resolve `uuid` to its current name/major/minor and prime `task`
    /// with the device's current event sequence number. Fails with
    /// [`KernelError::NoSuchDevice`] if the device does not exist
    /// (`§4.3` step 1).
    fn resolve(&self, uuid: &DeviceUuid) -> Result<(DeviceIdentity, WaitTask), KernelError>;

    /// Block until the device's event sequence number advances past
    /// `task.event_nr`, or the wait is interrupted. Updates `task` in
    /// place on a non-fatal return so the next call picks up where this
    /// one left off.
    fn wait(&self, task: &mut WaitTask) -> WaitOutcome;

    /// Non-blocking status query used for timeout-driven invocations,
    /// which must hand the plugin a fresh snapshot rather than the
    /// blocking-wait task's stale payload (`§4.3` task-selection note).
    fn snapshot(&self, uuid: &DeviceUuid) -> Result<WaitTask, KernelError>;
}

/// Placeholder [`DeviceMonitor`] wired into the production binary.
///
/// The device-mapper ioctl wait transport is an external collaborator
/// out of scope for this crate (`§1`); a real deployment links a monitor
/// that talks to `/dev/mapper` in its place. This one fails every
/// resolve so a device never silently waits on an impossible kernel
/// conversation.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnimplementedDeviceMonitor;

impl DeviceMonitor for UnimplementedDeviceMonitor {
    fn resolve(&self, uuid: &DeviceUuid) -> Result<(DeviceIdentity, WaitTask), KernelError> {
        Err(KernelError::Transport(format!(
            "no device-mapper ioctl transport linked into this build; cannot resolve {uuid}"
        )))
    }

    fn wait(&self, _task: &mut WaitTask) -> WaitOutcome {
        WaitOutcome::Fatal
    }

    fn snapshot(&self, uuid: &DeviceUuid) -> Result<WaitTask, KernelError> {
        Err(KernelError::Transport(format!(
            "no device-mapper ioctl transport linked into this build; cannot snapshot {uuid}"
        )))
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod fake {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;

    /// Scripted outcomes for one device, consumed in order by successive
    /// `wait` calls; the last entry repeats once exhausted.
    #[derive(Clone)]
    pub struct Script {
        pub identity: DeviceIdentity,
        pub outcomes: Vec<WaitOutcome>,
    }

    /// A controllable [`DeviceMonitor`] for worker-loop tests: no real
    /// blocking, just a scripted outcome sequence per device plus a
    /// counter of how many times each method was called.
    #[derive(Clone, Default)]
    pub struct FakeDeviceMonitor {
        scripts: Arc<Mutex<HashMap<String, Script>>>,
        cursor: Arc<Mutex<HashMap<String, usize>>>,
        pub wait_calls: Arc<Mutex<u64>>,
    }

    impl FakeDeviceMonitor {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn script(&self, uuid: &str, script: Script) {
            self.scripts.lock().insert(uuid.to_string(), script);
        }

        pub fn push_outcome(&self, uuid: &str, outcome: WaitOutcome) {
            self.scripts
                .lock()
                .entry(uuid.to_string())
                .or_insert_with(|| Script {
                    identity: DeviceIdentity::new(DeviceUuid::new(uuid), uuid, 253, 0),
                    outcomes: vec![],
                })
                .outcomes
                .push(outcome);
        }
    }

    impl DeviceMonitor for FakeDeviceMonitor {
        fn resolve(&self, uuid: &DeviceUuid) -> Result<(DeviceIdentity, WaitTask), KernelError> {
            let scripts = self.scripts.lock();
            let script = scripts
                .get(uuid.as_str())
                .ok_or_else(|| KernelError::NoSuchDevice(uuid.clone()))?;
            Ok((script.identity.clone(), WaitTask::new(uuid.clone())))
        }

        fn wait(&self, task: &mut WaitTask) -> WaitOutcome {
            *self.wait_calls.lock() += 1;
            let scripts = self.scripts.lock();
            let Some(script) = scripts.get(task.uuid.as_str()) else {
                return WaitOutcome::Fatal;
            };
            if script.outcomes.is_empty() {
                return WaitOutcome::Retry;
            }
            let mut cursor = self.cursor.lock();
            let idx = cursor.entry(task.uuid.to_string()).or_insert(0);
            let outcome = script.outcomes[(*idx).min(script.outcomes.len() - 1)];
            *idx += 1;
            task.event_nr += 1;
            outcome
        }

        fn snapshot(&self, uuid: &DeviceUuid) -> Result<WaitTask, KernelError> {
            let scripts = self.scripts.lock();
            if scripts.contains_key(uuid.as_str()) {
                Ok(WaitTask::new(uuid.clone()))
            } else {
                Err(KernelError::NoSuchDevice(uuid.clone()))
            }
        }
    }
}

#[cfg(test)]
#[path = "kernel_tests.rs"]
mod tests;
