// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The registry and shared-state operations (`§4.4`): everything the
//! request dispatcher calls into while holding (or briefly taking) the
//! global mutex. [`Daemon`] is the daemon's single owned mutable-state
//! object plus the operations that mutate it — the `§9` "model as a
//! single owned core object" re-architecture note, wired up end to end.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dmevent_core::{DeviceUuid, EventMask, PluginName, WorkerStatus};
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::core_state::{CoreHandle, DaemonCore};
use crate::kernel::DeviceMonitor;
use crate::plugin::PluginError;
use crate::scheduler::{deliver_wake_signal_checked, Scheduler};
use crate::worker::{spawn_worker, WorkerStartError};

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("no such device")]
    NoSuchDevice,
    #[error(transparent)]
    PluginLoad(#[from] PluginError),
    #[error(transparent)]
    WorkerStart(#[from] WorkerStartError),
}

impl DaemonError {
    /// Errno-style status carried in the reply header (`§7`).
    pub fn errno(&self) -> i32 {
        match self {
            DaemonError::NoSuchDevice => libc::ENODEV,
            DaemonError::PluginLoad(_) => libc::ENOENT,
            DaemonError::WorkerStart(WorkerStartError::SpawnFailed(_)) => libc::EAGAIN,
            DaemonError::WorkerStart(_) => libc::EIO,
        }
    }
}

/// One active-or-unused (non-grace) device's registration, as returned by
/// `GET_REGISTERED_DEVICE`/`GET_NEXT_REGISTERED_DEVICE` and formatted into
/// `GET_STATUS` (`§4.4`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredDevice {
    pub plugin_name: String,
    pub uuid: String,
    pub events: EventMask,
    pub timeout_secs: u32,
}

/// Fields reported by `GET_PARAMETERS` (`§4.4`).
#[derive(Debug, Clone)]
pub struct DaemonParams {
    pub pid: u32,
    pub daemonized: bool,
    pub supervised: bool,
    pub exit_sentinel: Option<PathBuf>,
}

/// The daemon's registry and shared-state facade: owns the global mutex
/// handle, the timeout scheduler, and the kernel transport, and exposes
/// the `§4.4` operations the dispatcher calls on each request.
pub struct Daemon {
    core: CoreHandle,
    scheduler: Arc<Scheduler>,
    monitor: Arc<dyn DeviceMonitor>,
    dispatcher_kick: Arc<Notify>,
}

impl Daemon {
    pub fn new(
        core: CoreHandle,
        scheduler: Arc<Scheduler>,
        monitor: Arc<dyn DeviceMonitor>,
        dispatcher_kick: Arc<Notify>,
    ) -> Self {
        Self { core, scheduler, monitor, dispatcher_kick }
    }

    pub fn core(&self) -> &CoreHandle {
        &self.core
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    fn scheduler_sync(&self, uuid: &str, events: EventMask, timeout_secs: u32) {
        if events.wants_timeout() {
            self.scheduler.register(uuid, Duration::from_secs(timeout_secs.max(1) as u64));
        } else {
            self.scheduler.cancel(uuid);
        }
    }

    /// `§4.4` Register-for-event.
    pub fn register_for_event(
        &self,
        plugin_name: PluginName,
        uuid: DeviceUuid,
        events_add: EventMask,
        timeout_secs: u32,
    ) -> Result<(), DaemonError> {
        // Resolved here (in addition to the worker's own resolve, `§4.3`
        // step 1) purely to get a path-inode for the grace-reuse match
        // below; a failure here does not abort registration, it just
        // means the inode check can't run yet (`matches_reuse` treats a
        // missing identity as "no check possible").
        let resolved_device = self.monitor.resolve(&uuid).ok().map(|(id, _)| id);

        let mut core = self.core.lock();

        // Step 1: plugin lookup; load on first use.
        if core.plugins.lookup(plugin_name.as_str()).is_none() {
            core.plugins.load(&plugin_name)?;
            core.refresh_idle_tracking(Instant::now());
        }

        // Step 2: already active -> OR events in and run the update protocol.
        if let Some(entry) = core.active.get(uuid.as_str()) {
            let new_filter = entry.events | events_add;
            let new_timeout = if timeout_secs > 0 { timeout_secs } else { entry.timeout_secs };
            if let Some(entry) = core.active.get_mut(uuid.as_str()) {
                entry.timeout_secs = new_timeout;
            }
            run_update_protocol(&mut core, uuid.as_str(), new_filter);
            drop(core);
            self.scheduler_sync(uuid.as_str(), new_filter, new_timeout);
            return Ok(());
        }

        // Step 3: grace-period reuse candidate in the unused table.
        let reuse_key = core
            .find_grace_reuse(uuid.as_str(), &plugin_name, resolved_device.as_ref())
            .map(str::to_string);
        if let Some(reuse_key) = reuse_key {
            if let Some((old_events, old_timeout)) = core.unused.get(&reuse_key).map(|e| (e.events, e.timeout_secs)) {
                let new_filter = old_events | events_add;
                let new_timeout = if timeout_secs > 0 { timeout_secs } else { old_timeout };
                if let Some(entry) = core.unused.get_mut(&reuse_key) {
                    entry.timeout_secs = new_timeout;
                }
                // The reused worker never released its reference; no
                // acquire here (`§4.1` refcount only changes at creation
                // and release).
                run_update_protocol(&mut core, &reuse_key, new_filter);
                drop(core);
                self.scheduler_sync(&reuse_key, new_filter, new_timeout);
                return Ok(());
            }
        }

        // Step 4: brand new worker.
        core.plugins.acquire(plugin_name.as_str());
        core.new_entry(uuid.as_str(), plugin_name.clone(), events_add, timeout_secs);
        core.refresh_idle_tracking(Instant::now());
        drop(core);

        match spawn_worker(
            Arc::clone(&self.core),
            Arc::clone(&self.scheduler),
            Arc::clone(&self.monitor),
            Arc::clone(&self.dispatcher_kick),
            uuid.clone(),
        ) {
            Ok(()) => {
                // Step 5: timeout-category subscription.
                if events_add.wants_timeout() {
                    self.scheduler.register(uuid.as_str(), Duration::from_secs(timeout_secs.max(1) as u64));
                }
                Ok(())
            }
            Err(e) => {
                // Compensating unregister: the worker thread's own cleanup
                // handler already relinked and released on failure, so
                // this is a defensive no-op unless spawn itself failed
                // before the thread ever ran (`SpawnFailed`).
                let mut core = self.core.lock();
                if core.active.remove(uuid.as_str()).is_some() {
                    core.plugins.release(plugin_name.as_str());
                    core.refresh_idle_tracking(Instant::now());
                }
                Err(e.into())
            }
        }
    }

    /// `§4.4` Unregister-for-event.
    pub fn unregister_for_event(&self, uuid: &DeviceUuid, events_remove: EventMask) -> Result<(), DaemonError> {
        let mut core = self.core.lock();
        let Some(old_filter) = core.active.get(uuid.as_str()).map(|e| e.events) else {
            return Err(DaemonError::NoSuchDevice);
        };
        let new_filter = old_filter & !events_remove;
        run_update_protocol(&mut core, uuid.as_str(), new_filter);
        drop(core);
        if events_remove.wants_timeout() {
            self.scheduler.cancel(uuid.as_str());
        }
        Ok(())
    }

    /// `§4.4` Set-timeout: also nudges the scheduler so the new value
    /// takes effect immediately rather than waiting for the old deadline.
    pub fn set_timeout(&self, uuid: &DeviceUuid, timeout_secs: u32) -> Result<(), DaemonError> {
        let mut core = self.core.lock();
        let in_active = core.active.contains_key(uuid.as_str());
        let wants_timeout = if in_active {
            let Some(entry) = core.active.get_mut(uuid.as_str()) else { return Err(DaemonError::NoSuchDevice) };
            entry.timeout_secs = timeout_secs;
            entry.events.wants_timeout()
        } else {
            let Some(entry) = core.unused.get_mut(uuid.as_str()) else { return Err(DaemonError::NoSuchDevice) };
            entry.timeout_secs = timeout_secs;
            entry.events.wants_timeout()
        };
        drop(core);
        if wants_timeout {
            self.scheduler.reset_deadline(uuid.as_str(), Duration::from_secs(timeout_secs.max(1) as u64));
        }
        Ok(())
    }

    pub fn get_timeout(&self, uuid: &DeviceUuid) -> Result<u32, DaemonError> {
        let core = self.core.lock();
        if let Some(entry) = core.active.get(uuid.as_str()) {
            return Ok(entry.timeout_secs);
        }
        core.unused.get(uuid.as_str()).map(|e| e.timeout_secs).ok_or(DaemonError::NoSuchDevice)
    }

    /// `§4.4` Get-registered-device: linear scan of the active table,
    /// then the unused table excluding `GracePeriod` entries.
    pub fn get_registered_device(
        &self,
        plugin_name: Option<&str>,
        uuid: Option<&str>,
    ) -> Option<RegisteredDevice> {
        let core = self.core.lock();
        scan(&core, plugin_name, uuid).next()
    }

    /// `§4.4` Get-next-registered-device: traversal resumes immediately
    /// after `after_uuid` and filters by plugin name only.
    pub fn get_next_registered_device(&self, plugin_name: Option<&str>, after_uuid: &str) -> Option<RegisteredDevice> {
        let core = self.core.lock();
        let mut seen = false;
        for (key, entry) in iter_visible(&core) {
            if !seen {
                if key == after_uuid {
                    seen = true;
                }
                continue;
            }
            if let Some(p) = plugin_name {
                if entry.plugin_name.as_str() != p {
                    continue;
                }
            }
            return Some(to_registered(key, entry));
        }
        None
    }

    /// `§4.4` Get-status: `"0:<index> <dso-name> <uuid> <events-decimal>
    /// <timeout>;"` per device, semicolon-joined (recovered format, see
    /// `SPEC_FULL.md` §11).
    pub fn get_status(&self) -> String {
        let core = self.core.lock();
        iter_visible(&core)
            .enumerate()
            .map(|(idx, (uuid, entry))| {
                format!("0:{} {} {} {} {};", idx, entry.plugin_name.as_str(), uuid, entry.events.bits(), entry.timeout_secs)
            })
            .collect()
    }

    pub fn get_parameters(&self, params: &DaemonParams) -> String {
        let core = self.core.lock();
        let idle_secs = core.idle_since.map(|since| since.elapsed().as_secs());
        dmevent_wire::payload::join_tokens([
            params.pid.to_string(),
            if params.daemonized { "1".to_string() } else { "0".to_string() },
            if params.supervised { "supervised".to_string() } else { "direct".to_string() },
            params.exit_sentinel.as_ref().map(|p| p.display().to_string()).unwrap_or_default(),
            idle_secs.map(|s| s.to_string()).unwrap_or_default(),
        ])
    }

    /// `DIE`/exit-sentinel-driven force-unregister-all (`§4.5` step 2,
    /// `§4.6` restart handoff): clear every active worker's filter,
    /// cancelling timeout service along the way.
    pub fn force_unregister_all(&self) {
        let mut core = self.core.lock();
        let uuids: Vec<String> = core.active.keys().cloned().collect();
        for uuid in uuids {
            let wants_timeout = core.active.get(&uuid).map(|e| e.events.wants_timeout()).unwrap_or(false);
            run_update_protocol(&mut core, &uuid, EventMask::empty());
            if wants_timeout {
                self.scheduler.cancel(&uuid);
            }
        }
    }

    /// `§4.5a` reaper: bounded per-iteration work on the unused table's
    /// lowest-keyed entry.
    pub fn reap_one_pass(&self) {
        loop {
            let mut core = self.core.lock();
            let Some(uuid) = core.unused.keys().next().cloned() else { return };
            let status = core.unused.get(&uuid).map(|e| e.status);
            match status {
                Some(WorkerStatus::Done) => {
                    let Some(mut entry) = core.unused.remove(&uuid) else { return };
                    drop(core);
                    if let Some(handle) = entry.join_handle.take() {
                        if handle.join().is_err() {
                            warn!(uuid, "worker thread panicked");
                        }
                    }
                    // continue: bounded by table shrinking each pass, so
                    // this loop always terminates.
                }
                Some(WorkerStatus::GracePeriod) if core.shutdown.is_shutting_down() => {
                    if let Some(entry) = core.unused.get(&uuid) {
                        entry.grace_notify.notify_all();
                    }
                    return;
                }
                _ => {
                    let tid = core.unused.get(&uuid).and_then(|e| e.thread_id);
                    drop(core);
                    match tid {
                        Some(tid) if !deliver_wake_signal_checked(tid) => {
                            // target already gone: try the next entry now
                        }
                        _ => return,
                    }
                }
            }
        }
    }
}

fn iter_visible(core: &DaemonCore) -> impl Iterator<Item = (&str, &crate::core_state::WorkerEntry)> {
    core.active
        .iter()
        .map(|(k, v)| (k.as_str(), v))
        .chain(core.unused.iter().filter(|(_, e)| e.status != WorkerStatus::GracePeriod).map(|(k, v)| (k.as_str(), v)))
}

fn scan<'a>(
    core: &'a DaemonCore,
    plugin_name: Option<&'a str>,
    uuid: Option<&'a str>,
) -> impl Iterator<Item = RegisteredDevice> + 'a {
    iter_visible(core)
        .filter(move |(key, entry)| {
            if let Some(p) = plugin_name {
                if entry.plugin_name.as_str() != p {
                    return false;
                }
            }
            if let Some(u) = uuid {
                if *key != u {
                    return false;
                }
            }
            true
        })
        .map(|(key, entry)| to_registered(key, entry))
}

fn to_registered(key: &str, entry: &crate::core_state::WorkerEntry) -> RegisteredDevice {
    RegisteredDevice {
        plugin_name: entry.plugin_name.as_str().to_string(),
        uuid: key.to_string(),
        events: entry.events,
        timeout_secs: entry.timeout_secs,
    }
}

/// `§4.4` update protocol, shared by register/unregister/force-unregister.
/// Must be called with `core`'s mutex already held.
pub(crate) fn run_update_protocol(core: &mut DaemonCore, uuid: &str, new_filter: EventMask) {
    let old_filter = match core.active.get(uuid).or_else(|| core.unused.get(uuid)) {
        Some(entry) => entry.events,
        None => return,
    };
    if old_filter == new_filter {
        return;
    }

    let status = core.active.get(uuid).or_else(|| core.unused.get(uuid)).map(|e| e.status);
    if core.active.contains_key(uuid) {
        if let Some(entry) = core.active.get_mut(uuid) {
            entry.events = new_filter;
            entry.pending = true;
        }
    } else if let Some(entry) = core.unused.get_mut(uuid) {
        entry.events = new_filter;
        entry.pending = true;
    }

    let shutting_down = core.shutdown.is_shutting_down();
    let in_grace = status == Some(WorkerStatus::GracePeriod);

    if (!new_filter.is_empty() || shutting_down) && in_grace {
        // Move-before-signal (`§4.3b`, `§4.4` rationale): the entry is
        // visible in `active` before the worker's grace wait ever wakes.
        core.move_to_active(uuid);
        return;
    }

    let (processing, thread_id) = core
        .active
        .get(uuid)
        .or_else(|| core.unused.get(uuid))
        .map(|e| (e.processing, e.thread_id))
        .unwrap_or((true, None));
    if !processing {
        if let Some(tid) = thread_id {
            if !deliver_wake_signal_checked(tid) {
                // Target thread is already gone: force the filter empty
                // so the next reaper pass's cleanup sees nothing left to
                // service (`§4.4` update protocol, signal-failure branch).
                if let Some(entry) = core.active.get_mut(uuid) {
                    entry.events = EventMask::empty();
                }
                info!(uuid, "wake signal target gone, forcing cleanup");
            }
        }
    }
}

#[cfg(test)]
#[path = "daemon_tests.rs"]
mod tests;
