// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use dmevent_core::{DeviceUuid, PluginName};

fn core() -> DaemonCore {
    DaemonCore::new(GraceConfig::default(), None)
}

#[test]
fn new_entry_lands_in_active_table() {
    let mut c = core();
    c.new_entry("dev-a", PluginName::new("p.so"), EventMask::DEVICE_ERROR, 0);
    assert!(c.active.contains_key("dev-a"));
    assert!(!c.unused.contains_key("dev-a"));
    assert_eq!(c.active["dev-a"].status, WorkerStatus::Registering);
}

#[test]
fn move_to_unused_then_back_to_active_round_trips() {
    let mut c = core();
    c.new_entry("dev-a", PluginName::new("p.so"), EventMask::DEVICE_ERROR, 0);
    assert!(c.move_to_unused("dev-a"));
    assert!(!c.active.contains_key("dev-a"));
    assert!(c.unused.contains_key("dev-a"));

    assert!(c.move_to_active("dev-a"));
    assert!(c.active.contains_key("dev-a"));
    assert_eq!(c.active["dev-a"].status, WorkerStatus::Registering);
}

#[test]
fn move_to_unused_on_absent_uuid_is_false() {
    let mut c = core();
    assert!(!c.move_to_unused("nope"));
    assert!(!c.move_to_active("nope"));
}

#[test]
fn find_by_uuid_excludes_grace_period_entries_in_unused() {
    let mut c = core();
    c.new_entry("dev-a", PluginName::new("p.so"), EventMask::DEVICE_ERROR, 0);
    c.move_to_unused("dev-a");
    c.unused.get_mut("dev-a").unwrap().status = WorkerStatus::GracePeriod;

    assert!(c.find_by_uuid("dev-a").is_none());

    c.unused.get_mut("dev-a").unwrap().status = WorkerStatus::Done;
    assert!(c.find_by_uuid("dev-a").is_some());
}

#[test]
fn find_grace_reuse_requires_matching_plugin_and_inode() {
    let mut c = core();
    c.new_entry("dev-a", PluginName::new("p.so"), EventMask::empty(), 0);
    c.move_to_unused("dev-a");
    c.unused.get_mut("dev-a").unwrap().status = WorkerStatus::GracePeriod;
    c.unused.get_mut("dev-a").unwrap().device =
        Some(DeviceIdentity { uuid: DeviceUuid::new("dev-a"), name: "dev-a".into(), major: 253, minor: 0, path_inode: Some(42) });

    let same_plugin = PluginName::new("p.so");
    let other_plugin = PluginName::new("q.so");
    let same_inode = DeviceIdentity { uuid: DeviceUuid::new("dev-a"), name: "dev-a".into(), major: 253, minor: 0, path_inode: Some(42) };
    let new_inode = DeviceIdentity { uuid: DeviceUuid::new("dev-a"), name: "dev-a".into(), major: 253, minor: 0, path_inode: Some(99) };

    assert_eq!(c.find_grace_reuse("dev-a", &same_plugin, Some(&same_inode)), Some("dev-a"));
    assert_eq!(c.find_grace_reuse("dev-a", &other_plugin, Some(&same_inode)), None);
    assert_eq!(c.find_grace_reuse("dev-a", &same_plugin, Some(&new_inode)), None);
}

#[test]
fn refresh_idle_tracking_sets_and_clears_idle_since() {
    let mut c = core();
    let t0 = Instant::now();

    // Plugin registry starts empty with kernel_held pretending to be true
    // (as if the last plugin had just unloaded) -> transitions to idle.
    c.kernel_held = true;
    c.refresh_idle_tracking(t0);
    assert!(!c.kernel_held);
    assert!(c.idle_since.is_some());

    // A subsequent call with no change is a no-op.
    c.refresh_idle_tracking(t0);
    assert!(!c.kernel_held);
    assert!(c.idle_since.is_some());
}
