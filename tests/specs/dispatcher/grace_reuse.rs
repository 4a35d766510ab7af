// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Seed scenario: a worker that empties its filter with a grace period
//! configured parks in `GracePeriod` instead of exiting immediately, and a
//! matching re-registration while it is still parked reuses the same
//! worker rather than spawning a new one or calling `register_device` a
//! second time.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use dmevent_core::{DeviceUuid, EventMask, PluginName, WorkerStatus};
use dmevent_wire::{Command, Request};

use crate::support::{self, Harness};

#[tokio::test]
async fn grace_period_reuse_skips_a_fresh_register_device_call() {
    support::reset_counters();
    let monitor = Arc::new(dmevent_daemon::kernel::fake::FakeDeviceMonitor::new());
    support::script_device(&monitor, "dev-grace");
    let (daemon, core, kick) = support::new_daemon(5, monitor);
    support::seed_plugin(&core, "grace.so", support::ok_register);

    let mut harness = Harness::spawn(daemon, core.clone(), kick).await;

    let register = Request {
        id: "g1".into(),
        plugin_name: Some(PluginName::new("grace.so")),
        device_uuid: Some(DeviceUuid::new("dev-grace")),
        events: EventMask::DEVICE_ERROR,
        timeout_secs: 0,
    }
    .encode();
    let reply = harness.roundtrip(Command::RegisterForEvent.code(), register).await;
    assert_eq!(reply.code, 0, "initial register should succeed: {:?}", reply.payload);
    assert!(support::wait_until(|| core.lock().active.contains_key("dev-grace"), Duration::from_secs(2)));

    let unregister = Request {
        id: "g2".into(),
        plugin_name: None,
        device_uuid: Some(DeviceUuid::new("dev-grace")),
        events: EventMask::DEVICE_ERROR,
        timeout_secs: 0,
    }
    .encode();
    let reply = harness.roundtrip(Command::UnregisterForEvent.code(), unregister).await;
    assert_eq!(reply.code, 0);

    assert!(support::wait_until(
        || core.lock().unused.get("dev-grace").map(|e| e.status == WorkerStatus::GracePeriod).unwrap_or(false),
        Duration::from_secs(2)
    ));
    assert_eq!(support::REGISTER_CALLS.load(Ordering::SeqCst), 1);

    let reregister = Request {
        id: "g3".into(),
        plugin_name: Some(PluginName::new("grace.so")),
        device_uuid: Some(DeviceUuid::new("dev-grace")),
        events: EventMask::DEVICE_ERROR,
        timeout_secs: 0,
    }
    .encode();
    let reply = harness.roundtrip(Command::RegisterForEvent.code(), reregister).await;
    assert_eq!(reply.code, 0, "grace-period reuse should succeed: {:?}", reply.payload);

    assert!(support::wait_until(|| core.lock().active.contains_key("dev-grace"), Duration::from_secs(2)));
    assert!(!core.lock().unused.contains_key("dev-grace"), "reused worker should have left the unused table");

    // The decisive assertion: reuse must not call register_device a second
    // time, and must not load a second plugin descriptor for the same name.
    assert_eq!(
        support::REGISTER_CALLS.load(Ordering::SeqCst),
        1,
        "grace-period reuse must not re-invoke register_device"
    );
    assert_eq!(core.lock().plugins.len(), 1);

    harness.shutdown().await;
}
