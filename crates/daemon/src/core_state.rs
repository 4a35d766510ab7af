// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The daemon's single owned mutable-state object (`§3`, `§9` "model as a
//! single owned core object" re-architecture note).
//!
//! [`DaemonCore`] holds the plugin registry, the active/unused worker
//! tables, and the process-wide shutdown/idle bookkeeping. Every operation
//! in `§4.4` runs with this struct locked behind one
//! `parking_lot::Mutex`; no method here blocks or does I/O, so the lock is
//! never held across a plugin call or a kernel wait (`§5`).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use dmevent_core::{DeviceIdentity, EventMask, GraceConfig, ShutdownState, WorkerStatus};
use parking_lot::Condvar;

use crate::plugin::PluginRegistry;

/// Shared handle to the daemon's single owned mutable-state object.
pub type CoreHandle = Arc<parking_lot::Mutex<DaemonCore>>;

/// OS thread handle used to deliver the directed wake signal via
/// `pthread_kill`. Plain `libc::pthread_t` rather than a `nix` wrapper:
/// `nix` has no stable `pthread_kill` binding across the versions this
/// workspace pins, so the one `pthread_kill` call site in
/// [`crate::worker`] goes straight through `libc`.
pub type Pthread = libc::pthread_t;

/// One device worker's bookkeeping, as held inside whichever table it
/// currently belongs to. Moving a worker between tables moves this struct;
/// its identity (uuid, plugin name) never changes across a move.
pub struct WorkerEntry {
    pub plugin_name: dmevent_core::PluginName,
    pub device: Option<DeviceIdentity>,
    pub status: WorkerStatus,
    /// Events filter configured by the client.
    pub events: EventMask,
    /// Events observed by the most recent wait, pending consumption.
    pub current_events: EventMask,
    pub timeout_secs: u32,
    pub wake_deadline: Option<Instant>,
    /// Set while inside the plugin's `process_event` handler.
    pub processing: bool,
    /// Set by the update protocol whenever the filter changes underneath
    /// a running worker, cleared once the worker observes it.
    pub pending: bool,
    /// Incremented each time the worker enters `Running`; observability
    /// only, never read by control logic.
    pub use_count: u64,
    /// OS thread identity of the worker's blocking loop, used to deliver
    /// the directed wake signal (`§4.2`, `§4.3b`). `None` before the
    /// thread has started running its kernel wait at least once.
    pub thread_id: Option<Pthread>,
    /// Wakes the worker's grace-period condition wait (`§4.3b`). A
    /// dedicated condvar per worker, but every wait against it is made
    /// with a guard from the *same* global `core` mutex — exactly the
    /// pthreads idiom of several `pthread_cond_t`s sharing one
    /// `pthread_mutex_t`, which is what makes "move back to active" and
    /// "wake the grace wait" atomic with each other (`§4.3b`, `§4.4`,
    /// `§9` "keep this deliberate coupling").
    pub grace_notify: Arc<Condvar>,
    /// Handle to the worker's OS thread, stashed here immediately after
    /// `std::thread::Builder::spawn` returns so the reaper (`§4.5a`) can
    /// join it once the worker reaches `Done`. Best-effort: if the worker
    /// races to `Done` before the handle is stored (possible when a
    /// device fails to resolve near-instantly), the thread is left
    /// detached rather than joined — it has already finished running by
    /// that point, so nothing leaks beyond the `JoinHandle` itself.
    pub join_handle: Option<std::thread::JoinHandle<()>>,
}

impl WorkerEntry {
    fn new(plugin_name: dmevent_core::PluginName, events: EventMask, timeout_secs: u32) -> Self {
        Self {
            plugin_name,
            device: None,
            status: WorkerStatus::Registering,
            events,
            current_events: EventMask::empty(),
            timeout_secs,
            wake_deadline: None,
            processing: true,
            pending: false,
            use_count: 0,
            thread_id: None,
            grace_notify: Arc::new(Condvar::new()),
            join_handle: None,
        }
    }

    /// Reuse candidate check for grace-period re-registration (`§4.4`
    /// step 3): same plugin and, once the device has been resolved, the
    /// same path-inode (a changed inode means the device was destroyed
    /// and recreated under the same UUID).
    pub fn matches_reuse(&self, plugin_name: &dmevent_core::PluginName, new_device: Option<&DeviceIdentity>) -> bool {
        if &self.plugin_name != plugin_name {
            return false;
        }
        match (&self.device, new_device) {
            (Some(existing), Some(new)) => existing.matches_for_reuse(new),
            _ => true,
        }
    }
}

/// The daemon's single owned mutable-state object.
pub struct DaemonCore {
    pub plugins: PluginRegistry,
    /// Workers with a non-empty filter, in `Registering` or `Running`.
    /// Keyed by UUID in a `BTreeMap` rather than a `HashMap` so
    /// `GET_NEXT_REGISTERED_DEVICE`'s "traversal starts immediately after
    /// a found entry" (`§4.4`) has a stable, deterministic order to walk —
    /// the closest safe-Rust analogue of the source's insertion-ordered
    /// linked list.
    pub active: BTreeMap<String, WorkerEntry>,
    /// Workers in `GracePeriod` or `Done`, awaiting reuse or reaping.
    pub unused: BTreeMap<String, WorkerEntry>,
    pub shutdown: ShutdownState,
    pub idle_since: Option<Instant>,
    pub grace: GraceConfig,
    pub exit_sentinel: Option<std::path::PathBuf>,
    /// Whether the kernel control device is currently held open; mirrors
    /// `!plugins.is_empty()` (`§4.1` invariant).
    pub kernel_held: bool,
}

impl DaemonCore {
    pub fn new(grace: GraceConfig, exit_sentinel: Option<std::path::PathBuf>) -> Self {
        Self {
            plugins: PluginRegistry::default(),
            active: BTreeMap::new(),
            unused: BTreeMap::new(),
            shutdown: ShutdownState::default(),
            idle_since: None,
            grace,
            exit_sentinel,
            kernel_held: false,
        }
    }

    pub fn new_entry(
        &mut self,
        uuid: &str,
        plugin_name: dmevent_core::PluginName,
        events: EventMask,
        timeout_secs: u32,
    ) -> &mut WorkerEntry {
        use std::collections::btree_map::Entry;
        match self.active.entry(uuid.to_string()) {
            Entry::Occupied(o) => {
                let slot = o.into_mut();
                *slot = WorkerEntry::new(plugin_name, events, timeout_secs);
                slot
            }
            Entry::Vacant(v) => v.insert(WorkerEntry::new(plugin_name, events, timeout_secs)),
        }
    }

    /// Linear scan of the active table, optionally chained with the unused
    /// table excluding `GracePeriod` entries (`§4.4` get/get-next note).
    pub fn find_by_uuid(&self, uuid: &str) -> Option<(&str, &WorkerEntry)> {
        if let Some((k, v)) = self.active.get_key_value(uuid) {
            return Some((k.as_str(), v));
        }
        self.unused
            .get_key_value(uuid)
            .filter(|(_, w)| w.status != WorkerStatus::GracePeriod)
    }

    pub fn find_grace_reuse(
        &self,
        uuid: &str,
        plugin_name: &dmevent_core::PluginName,
        device: Option<&DeviceIdentity>,
    ) -> Option<&str> {
        self.unused.get(uuid).and_then(|w| {
            (w.status == WorkerStatus::GracePeriod && w.matches_reuse(plugin_name, device))
                .then_some(uuid)
        })
    }

    /// Whether the daemon is idle: no plugins loaded, i.e. no workers in
    /// any state but `Done` (`§4.1` invariant).
    pub fn is_idle(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Update `idle_since`/`kernel_held` after a change in plugin-registry
    /// emptiness (`§4.1`).
    pub fn refresh_idle_tracking(&mut self, now: Instant) {
        let empty = self.plugins.is_empty();
        if empty && self.kernel_held {
            self.kernel_held = false;
            self.idle_since = Some(now);
        } else if !empty && !self.kernel_held {
            self.kernel_held = true;
            self.idle_since = None;
        }
    }

    /// Move a worker entry from `unused` into `active` and wake its grace
    /// wait in the same call, so the move is atomic with the signal as
    /// the "move before signal" rule requires (`§4.3b`, `§4.4`): the
    /// entry is already visible in `active` by the time the worker thread
    /// wakes up and re-checks the table.
    pub fn move_to_active(&mut self, uuid: &str) -> bool {
        if let Some(mut entry) = self.unused.remove(uuid) {
            entry.status = WorkerStatus::Registering;
            entry.grace_notify.notify_all();
            self.active.insert(uuid.to_string(), entry);
            true
        } else {
            false
        }
    }

    /// Move a worker entry from `active` into `unused`, used both for the
    /// grace transition and for cleanup-time relinking.
    pub fn move_to_unused(&mut self, uuid: &str) -> bool {
        if let Some(entry) = self.active.remove(uuid) {
            self.unused.insert(uuid.to_string(), entry);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
#[path = "core_state_tests.rs"]
mod tests;
