// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Seed scenario: registering against a plugin name that does not resolve
//! to a loadable shared object fails the request with `ENOENT` and leaves
//! no trace in either worker table — no worker is ever spawned for a
//! plugin that never loaded.

use std::sync::Arc;

use dmevent_core::{DeviceUuid, EventMask, PluginName};
use dmevent_wire::{Command, Request};

use crate::support::{self, Harness};

#[tokio::test]
async fn register_with_an_unloadable_plugin_fails_with_enoent() {
    support::reset_counters();
    let monitor = Arc::new(dmevent_daemon::kernel::fake::FakeDeviceMonitor::new());
    let (daemon, core, kick) = support::new_daemon(0, monitor);

    let mut harness = Harness::spawn(daemon, core.clone(), kick).await;

    let register = Request {
        id: "p1".into(),
        plugin_name: Some(PluginName::new("/nonexistent/does-not-exist.so")),
        device_uuid: Some(DeviceUuid::new("dev-missing-plugin")),
        events: EventMask::DEVICE_ERROR,
        timeout_secs: 0,
    }
    .encode();
    let reply = harness.roundtrip(Command::RegisterForEvent.code(), register).await;

    assert_eq!(reply.code, libc::ENOENT as u32, "an unloadable plugin should fail with ENOENT: {:?}", reply.payload);
    assert!(!core.lock().active.contains_key("dev-missing-plugin"));
    assert!(!core.lock().unused.contains_key("dev-missing-plugin"));
    assert!(core.lock().plugins.is_empty(), "a failed load must not leave a stale registry entry");
    assert_eq!(support::REGISTER_CALLS.load(std::sync::atomic::Ordering::SeqCst), 0);

    harness.shutdown().await;
}
