// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared harness for the dispatcher-facing scenarios: a wired-up
//! `Daemon`/`Dispatcher` pair over an in-memory duplex stream, plus the
//! in-process plugin stubs the unit tests in `dmevent-daemon` itself use
//! (re-exported behind the `test-support` feature for exactly this
//! purpose).

use std::ffi::{c_char, c_int, c_void};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dmevent_core::{DeviceIdentity, DeviceUuid, GraceConfig, PluginName};
use dmevent_daemon::core_state::{CoreHandle, DaemonCore};
use dmevent_daemon::daemon::{Daemon, DaemonParams};
use dmevent_daemon::dispatcher::Dispatcher;
use dmevent_daemon::kernel::fake::{FakeDeviceMonitor, Script};
use dmevent_daemon::kernel::DeviceMonitor;
use dmevent_daemon::plugin::{abi, PluginDescriptor};
use dmevent_daemon::scheduler::Scheduler;
use tokio::sync::Notify;

pub static REGISTER_CALLS: AtomicU32 = AtomicU32::new(0);
pub static PROCESS_CALLS: AtomicU32 = AtomicU32::new(0);
pub static UNREGISTER_CALLS: AtomicU32 = AtomicU32::new(0);
pub static LAST_MASK: AtomicU32 = AtomicU32::new(0);

pub fn reset_counters() {
    REGISTER_CALLS.store(0, Ordering::SeqCst);
    PROCESS_CALLS.store(0, Ordering::SeqCst);
    UNREGISTER_CALLS.store(0, Ordering::SeqCst);
    LAST_MASK.store(0, Ordering::SeqCst);
}

pub extern "C" fn ok_register(
    _device: *const c_char,
    _uuid: *const c_char,
    _major: c_int,
    _minor: c_int,
    _user: *mut *mut c_void,
) -> c_int {
    REGISTER_CALLS.fetch_add(1, Ordering::SeqCst);
    0
}

pub extern "C" fn failing_register(
    _device: *const c_char,
    _uuid: *const c_char,
    _major: c_int,
    _minor: c_int,
    _user: *mut *mut c_void,
) -> c_int {
    1
}

pub extern "C" fn counting_process_event(
    _task: *const abi::TaskHandle,
    mask: u32,
    _user: *mut *mut c_void,
) -> c_int {
    PROCESS_CALLS.fetch_add(1, Ordering::SeqCst);
    LAST_MASK.store(mask, Ordering::SeqCst);
    0
}

pub extern "C" fn ok_unregister(
    _device: *const c_char,
    _uuid: *const c_char,
    _major: c_int,
    _minor: c_int,
    _user: *mut *mut c_void,
) -> c_int {
    UNREGISTER_CALLS.fetch_add(1, Ordering::SeqCst);
    0
}

pub fn test_params() -> DaemonParams {
    DaemonParams { pid: 9001, daemonized: false, supervised: false, exit_sentinel: None }
}

/// Build a `Daemon` with a fresh, empty `DaemonCore` at the given grace
/// period, wired to `monitor`.
pub fn new_daemon(
    grace_secs: u32,
    monitor: Arc<FakeDeviceMonitor>,
) -> (Arc<Daemon>, CoreHandle, Arc<Notify>) {
    let core = Arc::new(parking_lot::Mutex::new(DaemonCore::new(
        GraceConfig::new(grace_secs).expect("grace period within range"),
        None,
    )));
    let scheduler = Scheduler::new(Arc::clone(&core));
    let kick = Arc::new(Notify::new());
    let monitor: Arc<dyn DeviceMonitor> = monitor;
    let daemon = Arc::new(Daemon::new(Arc::clone(&core), scheduler, monitor, Arc::clone(&kick)));
    (daemon, core, kick)
}

/// Install a test-stub plugin descriptor under `name`, using the counting
/// entry points above, without going through `register_for_event`'s normal
/// load path.
pub fn seed_plugin(core: &CoreHandle, name: &str, register: abi::RegisterFn) {
    let desc = PluginDescriptor::for_test(
        PluginName::new(name),
        abi::for_test(register, counting_process_event, ok_unregister),
    );
    core.lock().plugins.insert_for_test(desc);
}

/// Script a device identity with no outcomes queued; callers push outcomes
/// with `monitor.push_outcome(uuid, ...)` as each scenario needs.
pub fn script_device(monitor: &FakeDeviceMonitor, uuid: &str) {
    monitor.script(
        uuid,
        Script { identity: DeviceIdentity::new(DeviceUuid::new(uuid), uuid, 253, 7), outcomes: vec![] },
    );
}

pub fn wait_until(cond: impl Fn() -> bool, timeout: Duration) -> bool {
    let start = std::time::Instant::now();
    loop {
        if cond() {
            return true;
        }
        if start.elapsed() >= timeout {
            return cond();
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

/// A dispatcher over an in-memory duplex pair, driving the real async
/// request loop rather than calling its private `dispatch` method directly
/// (unlike `dmevent-daemon`'s own in-crate unit tests, this harness has no
/// access to that private method from outside the crate).
pub struct Harness {
    pub daemon: Arc<Daemon>,
    pub core: CoreHandle,
    pub client_writer: tokio::io::DuplexStream,
    pub client_reader: tokio::io::DuplexStream,
    pub dispatcher_task: tokio::task::JoinHandle<()>,
}

impl Harness {
    pub async fn spawn(daemon: Arc<Daemon>, core: CoreHandle, kick: Arc<Notify>) -> Self {
        let (dispatcher_reader, client_writer) = tokio::io::duplex(8192);
        let (client_reader, dispatcher_writer) = tokio::io::duplex(8192);

        let dispatcher = Dispatcher::new(
            dispatcher_reader,
            dispatcher_writer,
            Arc::clone(&daemon),
            core.clone(),
            kick,
            "0.2.0-test",
            test_params(),
        )
        .with_idle_timeout(Duration::from_secs(3600))
        .with_poll_interval(Duration::from_millis(20));

        let dispatcher_task = tokio::spawn(dispatcher.run());

        Self { daemon, core, client_writer, client_reader, dispatcher_task }
    }

    pub async fn roundtrip(&mut self, code: u32, payload: impl Into<String>) -> dmevent_wire::Frame {
        dmevent_wire::Frame::new(code, payload).write(&mut self.client_writer).await.expect("write request frame");
        tokio::time::timeout(Duration::from_secs(2), dmevent_wire::Frame::read(&mut self.client_reader))
            .await
            .expect("reply within timeout")
            .expect("read reply frame")
    }

    pub async fn shutdown(self) {
        self.core.lock().shutdown.signal();
        self.daemon.force_unregister_all();
        self.dispatcher_task.abort();
    }
}
