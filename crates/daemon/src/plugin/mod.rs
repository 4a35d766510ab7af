// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Plugin registry (`§4.1`): loads/unloads plugin DSOs by name and
//! reference-counts their use across workers.

pub mod abi;

use std::ffi::c_void;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use dmevent_core::PluginName;
use thiserror::Error;

pub use abi::TaskHandle;

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("dlopen {path}: {source}")]
    Open { path: PathBuf, source: libloading::Error },

    #[error("dlsym {symbol} in {path}: {source}")]
    MissingSymbol { path: PathBuf, symbol: String, source: libloading::Error },
}

/// A loaded plugin: its three entry points, the library keeping them
/// valid, and a use count. One descriptor per plugin name exists in the
/// registry at a time (`§3` invariant).
///
/// Handed out from the registry as `Arc<PluginDescriptor>` rather than a
/// borrow so a caller can clone it, drop the global mutex, and only then
/// call into the plugin: no lock is ever held across a plugin call (`§5`).
pub struct PluginDescriptor {
    pub name: PluginName,
    symbols: abi::LoadedSymbols,
    refcount: AtomicU32,
}

impl PluginDescriptor {
    pub fn register_device(
        &self,
        device: &str,
        uuid: &str,
        major: u32,
        minor: u32,
        user: &mut *mut c_void,
    ) -> bool {
        let device = std::ffi::CString::new(device).unwrap_or_default();
        let uuid = std::ffi::CString::new(uuid).unwrap_or_default();
        abi::call_register(self.symbols.register, &device, &uuid, major, minor, user) == 0
    }

    pub fn process_event(&self, task: &TaskHandle, event_mask: u32, user: &mut *mut c_void) {
        abi::call_process_event(self.symbols.process_event, task, event_mask, user);
    }

    pub fn unregister_device(
        &self,
        device: &str,
        uuid: &str,
        major: u32,
        minor: u32,
        user: &mut *mut c_void,
    ) {
        let device = std::ffi::CString::new(device).unwrap_or_default();
        let uuid = std::ffi::CString::new(uuid).unwrap_or_default();
        abi::call_unregister(self.symbols.unregister, &device, &uuid, major, minor, user);
    }

    pub fn refcount(&self) -> u32 {
        self.refcount.load(Ordering::Acquire)
    }

    /// Build a descriptor around in-process test-stub entry points rather
    /// than a dlopen'd library, for worker/registry tests that need a
    /// working plugin without a `.so` fixture on disk.
    #[cfg(any(test, feature = "test-support"))]
    pub fn for_test(name: PluginName, symbols: abi::LoadedSymbols) -> Arc<Self> {
        Arc::new(Self { name, symbols, refcount: AtomicU32::new(0) })
    }
}

/// The plugin registry, keyed by plugin name. Lives inside
/// [`crate::core_state::DaemonCore`], so all operations already run under
/// the global mutex — no interior locking here. What it hands out
/// (`Arc<PluginDescriptor>`) is what lets callers release that mutex
/// before actually calling into a plugin.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: std::collections::HashMap<String, Arc<PluginDescriptor>>,
}

impl PluginRegistry {
    pub fn lookup(&self, name: &str) -> Option<Arc<PluginDescriptor>> {
        self.plugins.get(name).cloned()
    }

    /// Load `name` if not already present, returning the descriptor either
    /// way. Does not touch the refcount — callers call [`Self::acquire`]
    /// once they have successfully attached a worker to it.
    pub fn load(&mut self, name: &PluginName) -> Result<Arc<PluginDescriptor>, PluginError> {
        if let Some(desc) = self.plugins.get(name.as_str()) {
            return Ok(Arc::clone(desc));
        }
        let path = PathBuf::from(name.as_str());
        let symbols = abi::load(&path)?;
        let desc =
            Arc::new(PluginDescriptor { name: name.clone(), symbols, refcount: AtomicU32::new(0) });
        self.plugins.insert(name.as_str().to_string(), Arc::clone(&desc));
        Ok(desc)
    }

    pub fn acquire(&mut self, name: &str) {
        if let Some(desc) = self.plugins.get(name) {
            desc.refcount.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// Release one reference; unload the plugin if it reaches zero.
    pub fn release(&mut self, name: &str) {
        let Some(desc) = self.plugins.get(name) else { return };
        let prev = desc.refcount.fetch_sub(1, Ordering::AcqRel);
        if prev <= 1 {
            self.plugins.remove(name);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// Insert an already-built descriptor directly, bypassing `load`'s
    /// dlopen call. Test-only door into the registry (`§4.1`'s own
    /// invariant — one descriptor per name — still holds: this just
    /// replaces *how* that one descriptor gets built).
    #[cfg(any(test, feature = "test-support"))]
    pub fn insert_for_test(&mut self, desc: Arc<PluginDescriptor>) {
        self.plugins.insert(desc.name.as_str().to_string(), desc);
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
