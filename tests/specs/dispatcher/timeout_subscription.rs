// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Seed scenario: registering with `EventMask::TIMEOUT` subscribes the
//! device to the scheduler (visible via `GET_TIMEOUT`/`SET_TIMEOUT`), and a
//! timeout-interrupted wait reaches the plugin with the `TIMEOUT` bit set.
//!
//! The directed `SIGALRM` delivery itself is covered at the unit level in
//! `dmevent-daemon`'s own `scheduler_tests.rs`/`worker_tests.rs`; this
//! scenario scripts the wait outcome the scheduler's signal would produce,
//! the same way those unit tests do, and checks the request-level surface
//! a client actually sees.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use dmevent_core::{DeviceUuid, EventMask, InterruptReason, PluginName, WaitOutcome};
use dmevent_wire::{Command, Request};

use crate::support::{self, Harness};

#[tokio::test]
async fn timeout_registration_is_queryable_and_fires_into_the_plugin() {
    support::reset_counters();
    let monitor = Arc::new(dmevent_daemon::kernel::fake::FakeDeviceMonitor::new());
    support::script_device(&monitor, "dev-timeout");
    monitor.push_outcome("dev-timeout", WaitOutcome::Interrupted(InterruptReason::Timeout));
    monitor.push_outcome("dev-timeout", WaitOutcome::Fatal);
    let (daemon, core, kick) = support::new_daemon(0, monitor);
    support::seed_plugin(&core, "timeout.so", support::ok_register);

    let mut harness = Harness::spawn(daemon, core.clone(), kick).await;

    let register = Request {
        id: "t1".into(),
        plugin_name: Some(PluginName::new("timeout.so")),
        device_uuid: Some(DeviceUuid::new("dev-timeout")),
        events: EventMask::TIMEOUT,
        timeout_secs: 5,
    }
    .encode();
    let reply = harness.roundtrip(Command::RegisterForEvent.code(), register).await;
    assert_eq!(reply.code, 0, "register should succeed: {:?}", reply.payload);

    let get_timeout = Request {
        id: "t2".into(),
        plugin_name: None,
        device_uuid: Some(DeviceUuid::new("dev-timeout")),
        events: EventMask::empty(),
        timeout_secs: 0,
    }
    .encode();
    let reply = harness.roundtrip(Command::GetTimeout.code(), get_timeout).await;
    assert_eq!(reply.code, 0);
    assert!(reply.payload.ends_with(" 5"), "expected the configured 5s timeout back: {}", reply.payload);

    assert!(support::wait_until(
        || support::PROCESS_CALLS.load(Ordering::SeqCst) >= 1,
        Duration::from_secs(2)
    ));
    assert_eq!(support::LAST_MASK.load(Ordering::SeqCst), EventMask::TIMEOUT.bits());

    harness.shutdown().await;
}
