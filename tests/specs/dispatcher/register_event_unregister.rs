// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Seed scenario: register a device for an event category, observe it in
//! `GET_STATUS`, then unregister it and observe it disappear.

use std::sync::Arc;
use std::time::Duration;

use dmevent_core::{DeviceUuid, EventMask, PluginName};
use dmevent_wire::{Command, Request};

use crate::support::{self, Harness};

#[tokio::test]
async fn register_then_status_then_unregister_round_trips() {
    support::reset_counters();
    let monitor = Arc::new(dmevent_daemon::kernel::fake::FakeDeviceMonitor::new());
    support::script_device(&monitor, "dev-reg");
    let (daemon, core, kick) = support::new_daemon(0, monitor);
    support::seed_plugin(&core, "reg.so", support::ok_register);

    let mut harness = Harness::spawn(daemon, core.clone(), kick).await;

    let register = Request {
        id: "reg1".into(),
        plugin_name: Some(PluginName::new("reg.so")),
        device_uuid: Some(DeviceUuid::new("dev-reg")),
        events: EventMask::DEVICE_ERROR,
        timeout_secs: 0,
    }
    .encode();
    let reply = harness.roundtrip(Command::RegisterForEvent.code(), register).await;
    assert_eq!(reply.code, 0, "register should succeed, got payload {:?}", reply.payload);
    assert!(support::wait_until(|| core.lock().active.contains_key("dev-reg"), Duration::from_secs(2)));

    let status = Request {
        id: "st1".into(),
        plugin_name: None,
        device_uuid: None,
        events: EventMask::empty(),
        timeout_secs: 0,
    }
    .encode();
    let reply = harness.roundtrip(Command::GetStatus.code(), status).await;
    assert_eq!(reply.code, 0);
    assert!(reply.payload.contains("dev-reg"), "status payload should list dev-reg: {}", reply.payload);
    assert!(reply.payload.contains("reg.so"));

    let unregister = Request {
        id: "un1".into(),
        plugin_name: None,
        device_uuid: Some(DeviceUuid::new("dev-reg")),
        events: EventMask::DEVICE_ERROR,
        timeout_secs: 0,
    }
    .encode();
    let reply = harness.roundtrip(Command::UnregisterForEvent.code(), unregister).await;
    assert_eq!(reply.code, 0, "unregister should succeed, got payload {:?}", reply.payload);

    // An empty filter with no grace period configured takes the worker
    // straight to Done, then the reaper removes it on the next pass.
    assert!(support::wait_until(
        || !core.lock().active.contains_key("dev-reg") && !core.lock().unused.contains_key("dev-reg"),
        Duration::from_secs(2)
    ));
    assert_eq!(support::UNREGISTER_CALLS.load(std::sync::atomic::Ordering::SeqCst), 1);

    harness.shutdown().await;
}
