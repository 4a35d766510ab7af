// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Seed scenario: a `DIE` request while a device is actively registered
//! forces shutdown to `Scheduled` immediately, replies `DYING`, and clears
//! every active worker's filter so each one exits on its own rather than
//! being torn down from outside its own thread.

use std::sync::Arc;
use std::time::Duration;

use dmevent_core::{DeviceUuid, EventMask, PluginName, ShutdownState};
use dmevent_wire::{Command, Request};

use crate::support::{self, Harness};

#[tokio::test]
async fn die_forces_shutdown_and_clears_every_active_filter() {
    support::reset_counters();
    let monitor = Arc::new(dmevent_daemon::kernel::fake::FakeDeviceMonitor::new());
    support::script_device(&monitor, "dev-die");
    let (daemon, core, kick) = support::new_daemon(0, monitor);
    support::seed_plugin(&core, "die.so", support::ok_register);

    let mut harness = Harness::spawn(daemon, core.clone(), kick).await;

    let register = Request {
        id: "d1".into(),
        plugin_name: Some(PluginName::new("die.so")),
        device_uuid: Some(DeviceUuid::new("dev-die")),
        events: EventMask::DEVICE_ERROR,
        timeout_secs: 0,
    }
    .encode();
    let reply = harness.roundtrip(Command::RegisterForEvent.code(), register).await;
    assert_eq!(reply.code, 0, "register should succeed: {:?}", reply.payload);
    assert!(support::wait_until(|| core.lock().active.contains_key("dev-die"), Duration::from_secs(2)));

    let reply = harness.roundtrip(Command::Die.code(), "d2 - - - -").await;
    assert_eq!(reply.code, 0);
    assert!(reply.payload.contains("DYING"), "DIE should answer DYING: {}", reply.payload);

    assert_eq!(core.lock().shutdown, ShutdownState::Scheduled);
    let filter_cleared = support::wait_until(
        || {
            let guard = core.lock();
            guard
                .active
                .get("dev-die")
                .map(|e| e.events.is_empty())
                .or_else(|| guard.unused.get("dev-die").map(|e| e.events.is_empty()))
                .unwrap_or(true)
        },
        Duration::from_secs(2),
    );
    assert!(filter_cleared, "DIE must force every active worker's filter empty");

    harness.shutdown().await;
}
