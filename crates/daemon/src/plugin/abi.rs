// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The plugin ABI: three C-linkage entry points exported by a dlopen'd
//! shared object, and the one `unsafe` boundary in this crate that calls
//! into them.
//!
//! This module intentionally does not try to make the FFI "safe" beyond
//! what the types below already enforce (valid `CString`s in, opaque
//! pointers shepherded through exactly as the ABI prescribes). Everything
//! upstream of here — refcounting, call ordering, the per-worker `user`
//! slot's lifetime — is enforced by safe code in [`super`] and in
//! `crate::worker`.

#![allow(unsafe_code)]

use std::ffi::{c_char, c_int, c_void, CString};
use std::path::Path;

use libloading::{Library, Symbol};
use tracing::debug;

use super::PluginError;

/// `int register_device(const char *device, const char *uuid, int major, int minor, void **user)`
pub type RegisterFn =
    unsafe extern "C" fn(*const c_char, *const c_char, c_int, c_int, *mut *mut c_void) -> c_int;

/// `int process_event(const struct dm_task_event *task, uint32_t event_mask, void **user)`
pub type ProcessEventFn = unsafe extern "C" fn(*const TaskHandle, u32, *mut *mut c_void) -> c_int;

/// `int unregister_device(const char *device, const char *uuid, int major, int minor, void **user)`
pub type UnregisterFn =
    unsafe extern "C" fn(*const c_char, *const c_char, c_int, c_int, *mut *mut c_void) -> c_int;

/// Opaque event snapshot handed to `process_event`. The plugin is not
/// expected to interpret anything beyond `event_mask`/`event_nr`; `uuid` is
/// provided so plugins that key their own state off it need not round-trip
/// through `user`.
#[repr(C)]
pub struct TaskHandle {
    pub uuid: *const c_char,
    pub event_nr: u64,
}

/// The three resolved entry points plus the library keeping them valid.
///
/// `library` is `None` only for the in-process test stubs built by
/// [`for_test`]: those entry points are plain `extern "C" fn`s linked
/// directly into the test binary, so there is no `Library` to keep alive.
pub struct LoadedSymbols {
    pub library: Option<Library>,
    pub register: RegisterFn,
    pub process_event: ProcessEventFn,
    pub unregister: UnregisterFn,
}

/// Build a [`LoadedSymbols`] from real `extern "C" fn`s linked into this
/// binary instead of a dlopen'd file, for tests that need to exercise the
/// worker/registry call path without a `.so` fixture on disk.
#[cfg(any(test, feature = "test-support"))]
pub fn for_test(
    register: RegisterFn,
    process_event: ProcessEventFn,
    unregister: UnregisterFn,
) -> LoadedSymbols {
    LoadedSymbols { library: None, register, process_event, unregister }
}

/// Open `path` with immediate (`RTLD_NOW`) symbol resolution and resolve
/// the three required entry points.
///
/// Immediate resolution is deliberate: a plugin with a missing symbol in
/// some rarely-taken code path must fail here, at registration time, not
/// fail later inside a worker with no client listening for the error.
pub fn load(path: &Path) -> Result<LoadedSymbols, PluginError> {
    let library = unsafe {
        libloading::os::unix::Library::open(Some(path), libc::RTLD_NOW | libc::RTLD_LOCAL)
            .map(Library::from)
            .map_err(|e| PluginError::Open { path: path.to_path_buf(), source: e })?
    };

    let register = resolve::<RegisterFn>(&library, b"register_device\0", path)?;
    let process_event = resolve::<ProcessEventFn>(&library, b"process_event\0", path)?;
    let unregister = resolve::<UnregisterFn>(&library, b"unregister_device\0", path)?;

    debug!(path = %path.display(), "resolved plugin entry points");
    Ok(LoadedSymbols { library: Some(library), register, process_event, unregister })
}

fn resolve<T: Copy>(library: &Library, name: &[u8], path: &Path) -> Result<T, PluginError> {
    unsafe {
        let symbol: Symbol<T> = library
            .get(name)
            .map_err(|e| PluginError::MissingSymbol {
                path: path.to_path_buf(),
                symbol: String::from_utf8_lossy(&name[..name.len() - 1]).into_owned(),
                source: e,
            })?;
        Ok(*symbol)
    }
}

/// Call `register_device`. `user` is the worker's per-device opaque slot;
/// the plugin may write a pointer into it that later calls receive back.
pub fn call_register(
    f: RegisterFn,
    device: &CString,
    uuid: &CString,
    major: u32,
    minor: u32,
    user: &mut *mut c_void,
) -> c_int {
    unsafe { f(device.as_ptr(), uuid.as_ptr(), major as c_int, minor as c_int, user as *mut _) }
}

/// Call `process_event` with a task the caller still owns after the call
/// returns (the worker's reusable wait task) or one the caller destroys
/// immediately after (a fresh timeout snapshot) — ownership is the
/// caller's concern, not this function's.
pub fn call_process_event(
    f: ProcessEventFn,
    task: &TaskHandle,
    event_mask: u32,
    user: &mut *mut c_void,
) -> c_int {
    unsafe { f(task as *const TaskHandle, event_mask, user as *mut _) }
}

/// Call `unregister_device`.
pub fn call_unregister(
    f: UnregisterFn,
    device: &CString,
    uuid: &CString,
    major: u32,
    minor: u32,
    user: &mut *mut c_void,
) -> c_int {
    unsafe { f(device.as_ptr(), uuid.as_ptr(), major as c_int, minor as c_int, user as *mut _) }
}

#[cfg(test)]
#[path = "abi_tests.rs"]
mod tests;
