// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the daemon crate (`§6.6`).
//!
//! The three supervised-handoff variables are read exactly once at startup
//! and removed from the process environment regardless of outcome, so a
//! child process (e.g. a `--restart` sibling) never inherits a stale
//! handoff it did not itself negotiate.

use std::ffi::CString;

/// Protocol version embedded in `HELLO`/`DIE` replies and `GET_PARAMETERS`.
pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

const ACTIVATION_VAR: &str = "DMEVENTD_ACTIVATION";
const PID_VAR: &str = "DMEVENTD_PID";
const FDS_VAR: &str = "DMEVENTD_FDS";

/// Raw contents of the three supervised-handoff environment variables,
/// captured before they are scrubbed from the environment.
#[derive(Debug, Clone, Default)]
pub struct ActivationEnv {
    pub activation: Option<String>,
    pub pid: Option<String>,
    pub fds: Option<String>,
}

impl ActivationEnv {
    /// Whether the triple is exactly the well-formed supervised contract:
    /// `DMEVENTD_ACTIVATION=1`, `DMEVENTD_PID=<our pid>`, `DMEVENTD_FDS=2`.
    pub fn is_valid_handoff(&self, our_pid: u32) -> bool {
        self.activation.as_deref() == Some("1")
            && self.pid.as_deref() == Some(our_pid.to_string().as_str())
            && self.fds.as_deref() == Some("2")
    }
}

/// Read the three supervised-handoff variables and unset all of them,
/// regardless of whether they formed a valid contract (`§4.6`).
pub fn take_activation_env() -> ActivationEnv {
    let env = ActivationEnv {
        activation: std::env::var(ACTIVATION_VAR).ok(),
        pid: std::env::var(PID_VAR).ok(),
        fds: std::env::var(FDS_VAR).ok(),
    };
    std::env::remove_var(ACTIVATION_VAR);
    std::env::remove_var(PID_VAR);
    std::env::remove_var(FDS_VAR);
    env
}

/// Force the process locale to `C` so a large locale archive is never
/// pinned into memory by this long-lived daemon (`§6.6`).
pub fn force_c_locale() {
    // SAFETY: called once at startup before any other thread is spawned.
    #[allow(unsafe_code)]
    unsafe {
        if let Ok(locale) = CString::new("C") {
            libc::setlocale(libc::LC_ALL, locale.as_ptr());
        }
    }
    std::env::set_var("LC_ALL", "C");
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
