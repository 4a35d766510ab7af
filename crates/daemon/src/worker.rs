// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The device worker (`§4.3`) — the heart of the daemon. One OS thread per
//! monitored device, blocking in the kernel wait and invoking the plugin's
//! event handler when something happens.
//!
//! The thread is a plain `std::thread`, not a tokio task: delivering the
//! directed wake signal (`§4.2`) needs a real `pthread_t` to call
//! `pthread_kill` on, and capturing/retaining the OS thread identity of a
//! task run on tokio's blocking-pool is not something the runtime
//! exposes. Everything else in the daemon stays on tokio; this is the one
//! place structured concurrency gives way to a bare OS thread, matching
//! the source's own pthread-per-device model (`§5`).

use std::ffi::c_void;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dmevent_core::{DeviceUuid, EventMask, InterruptReason, PluginName, WaitOutcome, WaitTask, WorkerStatus};
use parking_lot::Condvar;
use tokio::sync::Notify;
use tracing::info;

use crate::core_state::CoreHandle;
use crate::kernel::{DeviceMonitor, KernelError};
use crate::plugin::TaskHandle;
use crate::scheduler::Scheduler;

const WORKER_STACK_SIZE: usize = 256 * 1024;
const WAIT_RETRY_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, thiserror::Error)]
pub enum WorkerStartError {
    #[error("device does not exist: {0}")]
    NoSuchDevice(#[from] KernelError),
    #[error("plugin register_device failed")]
    PluginRegisterFailed,
    #[error("could not create worker thread: {0}")]
    SpawnFailed(#[source] std::io::Error),
}

/// Spawn a worker thread for `uuid` and block until its initial
/// `register_device` call completes, so the caller can report success or
/// failure to the client synchronously (`§4.3` creation, main-loop step 2).
pub fn spawn_worker(
    core: CoreHandle,
    scheduler: Arc<Scheduler>,
    monitor: Arc<dyn DeviceMonitor>,
    dispatcher_kick: Arc<Notify>,
    uuid: DeviceUuid,
) -> Result<(), WorkerStartError> {
    let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<(), WorkerStartError>>(0);
    let thread_uuid = uuid.clone();
    let key = uuid.as_str().to_string();
    let spawn_core = Arc::clone(&core);
    let name = format!("dmevent-w-{}", &uuid.as_str()[..uuid.as_str().len().min(8)]);
    let handle = std::thread::Builder::new()
        .name(name)
        .stack_size(WORKER_STACK_SIZE)
        .spawn(move || run(core, scheduler, monitor, dispatcher_kick, thread_uuid, ready_tx))
        .map_err(WorkerStartError::SpawnFailed)?;
    {
        let mut guard = spawn_core.lock();
        if let Some(entry) = guard.active.get_mut(&key) {
            entry.join_handle = Some(handle);
        } else if let Some(entry) = guard.unused.get_mut(&key) {
            entry.join_handle = Some(handle);
        }
        // Neither table has the key: the worker already raced through to
        // reap-and-removal before we got the lock. Vanishingly unlikely
        // (it requires resolve+cleanup to outrun this thread entirely),
        // and harmless either way — the thread has already finished.
    }
    ready_rx.recv().unwrap_or(Err(WorkerStartError::PluginRegisterFailed))
}

/// The worker thread body: resolve, register, then the serviced loop and
/// cleanup (`§4.3` main loop, steps 1-4).
fn run(
    core: CoreHandle,
    scheduler: Arc<Scheduler>,
    monitor: Arc<dyn DeviceMonitor>,
    dispatcher_kick: Arc<Notify>,
    uuid: DeviceUuid,
    ready_tx: mpsc::SyncSender<Result<(), WorkerStartError>>,
) {
    let key = uuid.as_str().to_string();

    // Record this OS thread's identity so the scheduler and the update
    // protocol can later deliver the directed wake signal to it (`§4.2`).
    #[allow(unsafe_code)]
    let tid = unsafe { libc::pthread_self() };
    {
        let mut guard = core.lock();
        if let Some(entry) = guard.active.get_mut(&key) {
            entry.thread_id = Some(tid);
        }
    }

    // Step 1: resolve device.
    let (identity, mut task) = match monitor.resolve(&uuid) {
        Ok(pair) => pair,
        Err(e) => {
            let _ = ready_tx.send(Err(WorkerStartError::NoSuchDevice(e)));
            let mut user_data: *mut c_void = std::ptr::null_mut();
            cleanup(&core, &scheduler, &dispatcher_kick, &key, false, &mut user_data);
            return;
        }
    };
    {
        let mut guard = core.lock();
        if let Some(entry) = guard.active.get_mut(&key) {
            entry.device = Some(identity.clone());
        }
    }

    // Step 2: register with the plugin. The descriptor is cloned out from
    // under the lock and the lock dropped before the call — no lock is
    // ever held across a plugin invocation (`§5`).
    let plugin_name = {
        let guard = core.lock();
        guard.active.get(&key).map(|e| e.plugin_name.clone()).unwrap_or_else(|| PluginName::new(""))
    };
    let desc = {
        let guard = core.lock();
        guard.plugins.lookup(plugin_name.as_str())
    };
    let mut user_data: *mut c_void = std::ptr::null_mut();
    let registered = match desc {
        Some(desc) => desc.register_device(
            &identity.name,
            identity.uuid.as_str(),
            identity.major,
            identity.minor,
            &mut user_data,
        ),
        None => false,
    };
    if !registered {
        let _ = ready_tx.send(Err(WorkerStartError::PluginRegisterFailed));
        cleanup(&core, &scheduler, &dispatcher_kick, &key, false, &mut user_data);
        return;
    }
    let _ = ready_tx.send(Ok(()));

    // Step 3: the serviced loop.
    let mut fatal = false;
    loop {
        let grace_notify = {
            let mut guard = core.lock();
            let Some(entry) = guard.active.get_mut(&key) else { break };
            if entry.events.is_empty() {
                break;
            }
            entry.status = WorkerStatus::Running;
            entry.processing = false;
            entry.use_count += 1;
            entry.grace_notify.clone()
        };

        fatal = service_events(&core, &monitor, &scheduler, &key, &mut task, &plugin_name, &mut user_data);

        let (should_continue_outer, grace_deadline) = {
            let mut guard = core.lock();
            let shutting_down = guard.shutdown.is_shutting_down();
            let grace = guard.grace;
            let Some(entry) = guard.active.get(&key) else { break };
            let events_nonempty = !entry.events.is_empty();
            if grace.is_disabled() || events_nonempty || shutting_down || fatal {
                (false, None)
            } else {
                guard.move_to_unused(&key);
                if let Some(unused) = guard.unused.get_mut(&key) {
                    unused.status = WorkerStatus::GracePeriod;
                }
                (true, Some(Instant::now() + grace.duration()))
            }
        };

        if !should_continue_outer {
            break;
        }

        if let Some(deadline) = grace_deadline {
            wait_grace(&core, &grace_notify, &key, deadline);
        }

        let keep_going = {
            let guard = core.lock();
            guard.active.contains_key(&key) || guard.unused.get(&key).map(|e| !e.events.is_empty()).unwrap_or(false)
        };
        if !keep_going {
            break;
        }
    }

    cleanup(&core, &scheduler, &dispatcher_kick, &key, registered, &mut user_data);
}

/// `§4.3a` event-servicing inner loop. Returns `true` iff the wait reported
/// a fatal error and the worker must proceed straight to cleanup.
fn service_events(
    core: &CoreHandle,
    monitor: &Arc<dyn DeviceMonitor>,
    scheduler: &Arc<Scheduler>,
    key: &str,
    task: &mut WaitTask,
    plugin_name: &PluginName,
    user_data: &mut *mut c_void,
) -> bool {
    loop {
        let (filter, current, shutting_down) = {
            let guard = core.lock();
            let Some(entry) = guard.active.get(key) else { return true };
            (entry.events, entry.current_events, guard.shutdown.is_shutting_down())
        };
        if filter.is_empty() || shutting_down {
            return false;
        }

        if !current.is_empty() && current.intersects(filter) {
            {
                let mut guard = core.lock();
                if let Some(entry) = guard.active.get_mut(key) {
                    entry.processing = true;
                }
            }

            let is_timeout = current.wants_timeout();
            let event_task = if is_timeout {
                match monitor.snapshot(&task.uuid) {
                    Ok(t) => t,
                    Err(_) => return true,
                }
            } else {
                task.clone()
            };
            invoke_process_event(core, plugin_name, &event_task, current.bits(), user_data);

            let pending_wake = {
                let mut guard = core.lock();
                let Some(entry) = guard.active.get_mut(key) else { return true };
                entry.current_events = EventMask::empty();
                entry.processing = false;
                entry.pending
            };
            if pending_wake {
                // A plugin-issued wake signal landed while processing; the
                // source allows a plugin to self-terminate this way.
                return false;
            }
            continue;
        }

        match monitor.wait(task) {
            WaitOutcome::Retry => {
                std::thread::sleep(WAIT_RETRY_BACKOFF);
            }
            WaitOutcome::Interrupted(reason) => {
                let mut guard = core.lock();
                if let Some(entry) = guard.active.get_mut(key) {
                    let bit = match reason {
                        InterruptReason::DeviceError => EventMask::ALL_ERRORS,
                        InterruptReason::Timeout => EventMask::TIMEOUT,
                    };
                    entry.current_events |= bit;
                }
            }
            WaitOutcome::Fatal => {
                let _ = scheduler; // scheduler.cancel happens in cleanup, not here
                return true;
            }
        }
    }
}

fn invoke_process_event(
    core: &CoreHandle,
    plugin_name: &PluginName,
    task: &WaitTask,
    mask: u32,
    user_data: &mut *mut c_void,
) {
    let desc = {
        let guard = core.lock();
        guard.plugins.lookup(plugin_name.as_str())
    };
    let Some(desc) = desc else { return };
    let uuid_c = std::ffi::CString::new(task.uuid.as_str()).unwrap_or_default();
    let handle = crate::plugin::TaskHandle { uuid: uuid_c.as_ptr(), event_nr: task.event_nr };
    desc.process_event(&handle, mask, user_data);
}

/// `§4.3b` grace-period wait: blocks on the worker's own condition
/// variable, using a guard from the shared global `core` mutex so a
/// concurrent `move_to_active` (which moves the entry back into `active`
/// and wakes this same condvar under that same mutex) can never be missed
/// between the table check and the wait. Returns once shutdown begins, a
/// matching re-registration lands, or the grace deadline elapses.
fn wait_grace(core: &CoreHandle, condvar: &Condvar, key: &str, deadline: Instant) {
    let mut guard = core.lock();
    loop {
        let shutting_down = guard.shutdown.is_shutting_down();
        let reactivated = guard.active.contains_key(key);
        if shutting_down || reactivated {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        let remaining = deadline - now;
        if condvar.wait_for(&mut guard, remaining).timed_out() {
            return;
        }
        // Spurious wake or a notification meant for another grace-period
        // worker sharing the lock: loop and re-check this worker's own
        // condition.
    }
}

/// `§4.3c` cleanup handler: runs on every exit path. Relinks the worker
/// into the unused table, zeroes its filter, deregisters it from the
/// scheduler, calls `unregister_device` if registration succeeded, and
/// marks it `Done`.
///
/// `user_data` is the same per-worker slot threaded through `register_device`
/// (`run()`) and `process_event` (`service_events`/`invoke_process_event`):
/// whatever the plugin stashed there is what `unregister_device` must see,
/// per `§6.3`'s register/process/unregister ownership contract.
fn cleanup(
    core: &CoreHandle,
    scheduler: &Arc<Scheduler>,
    dispatcher_kick: &Notify,
    key: &str,
    registered: bool,
    user_data: &mut *mut c_void,
) {
    scheduler.cancel(key);

    let (plugin_name, device, shutting_down) = {
        let mut guard = core.lock();
        guard.move_to_unused(key);
        let entry = guard.unused.get_mut(key);
        let plugin_name = entry.as_ref().map(|e| e.plugin_name.clone());
        let device = entry.as_ref().and_then(|e| e.device.clone());
        if let Some(entry) = entry {
            entry.events = EventMask::empty();
        }
        (plugin_name, device, guard.shutdown.is_shutting_down())
    };

    if registered {
        if let (Some(plugin_name), Some(device)) = (&plugin_name, &device) {
            let desc = {
                let guard = core.lock();
                guard.plugins.lookup(plugin_name.as_str())
            };
            if let Some(desc) = desc {
                desc.unregister_device(&device.name, device.uuid.as_str(), device.major, device.minor, user_data);
            }
        }
    }

    {
        let mut guard = core.lock();
        if let Some(entry) = guard.unused.get_mut(key) {
            entry.status = WorkerStatus::Done;
        }
        if let Some(name) = &plugin_name {
            guard.plugins.release(name.as_str());
            guard.refresh_idle_tracking(Instant::now());
        }
    }

    info!(uuid = key, "worker reached Done");
    if shutting_down {
        dispatcher_kick.notify_one();
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
