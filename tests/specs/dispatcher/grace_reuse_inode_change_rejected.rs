// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Seed scenario: a grace-parked worker is only a reuse candidate while the
//! device's path-inode is unchanged. If the device was destroyed and
//! recreated under the same UUID (a different inode) while the worker sat
//! in `GracePeriod`, a new registration must not reuse it: it spawns a
//! fresh worker with a fresh `register_device` call instead.
//!
//! This seeds the grace-parked entry directly rather than driving a real
//! worker there first, so the only thread involved is the one spawned by
//! the registration under test.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use dmevent_core::{DeviceIdentity, DeviceUuid, EventMask, GraceConfig, PluginName, WorkerStatus};
use dmevent_daemon::core_state::DaemonCore;
use dmevent_daemon::daemon::Daemon;
use dmevent_daemon::kernel::fake::{FakeDeviceMonitor, Script};
use dmevent_daemon::kernel::DeviceMonitor;
use dmevent_daemon::scheduler::Scheduler;

use crate::support;

#[test]
fn inode_mismatch_forces_a_fresh_registration_instead_of_reuse() {
    support::reset_counters();

    let core = Arc::new(parking_lot::Mutex::new(DaemonCore::new(GraceConfig::new(30).unwrap(), None)));
    support::seed_plugin(&core, "inode.so", support::ok_register);
    let plugin_name = PluginName::new("inode.so");

    let old_identity = DeviceIdentity {
        uuid: DeviceUuid::new("dev-inode"),
        name: "dev-inode".to_string(),
        major: 253,
        minor: 7,
        path_inode: Some(111),
    };
    {
        let mut guard = core.lock();
        guard.plugins.acquire("inode.so");
        let entry = guard.new_entry("dev-inode", plugin_name.clone(), EventMask::empty(), 0);
        entry.device = Some(old_identity.clone());
        guard.move_to_unused("dev-inode");
        guard.unused.get_mut("dev-inode").unwrap().status = WorkerStatus::GracePeriod;
    }

    let new_identity = DeviceIdentity { path_inode: Some(222), ..old_identity.clone() };
    let monitor = Arc::new(FakeDeviceMonitor::new());
    monitor.script("dev-inode", Script { identity: new_identity.clone(), outcomes: vec![] });

    let scheduler = Scheduler::new(Arc::clone(&core));
    let kick = Arc::new(tokio::sync::Notify::new());
    let monitor_dyn: Arc<dyn DeviceMonitor> = monitor;
    let daemon = Daemon::new(Arc::clone(&core), scheduler, monitor_dyn, kick);

    let result = daemon.register_for_event(plugin_name, DeviceUuid::new("dev-inode"), EventMask::DEVICE_ERROR, 0);
    assert!(result.is_ok(), "a rejected reuse must still fall through to a fresh registration: {result:?}");

    assert_eq!(
        support::REGISTER_CALLS.load(Ordering::SeqCst),
        1,
        "only the fresh worker's register_device call should have run"
    );

    let guard = core.lock();
    let active = guard.active.get("dev-inode").expect("fresh worker should be active");
    assert_eq!(active.device.as_ref().map(|d| d.path_inode), Some(Some(222)));

    let parked = guard.unused.get("dev-inode").expect("the stale grace-parked entry is left untouched");
    assert_eq!(parked.status, WorkerStatus::GracePeriod);
    assert_eq!(parked.device.as_ref().map(|d| d.path_inode), Some(Some(111)));
}
