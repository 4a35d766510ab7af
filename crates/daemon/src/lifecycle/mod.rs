// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process startup, daemonization, and the `--restart` handoff (`§4.6`).
//!
//! This module owns everything that happens before the dispatcher loop
//! gets its first request: deciding direct vs. supervised startup,
//! provisioning the pair of FIFOs, forking into the background, writing
//! the pidfile, and (for `--restart`) talking to a sibling instance to
//! collect its registrations before taking its place.

mod client;
mod restart;
mod startup;

pub use client::{ClientError, FifoClient, RawReply};
pub use restart::{restart_handoff, RestartOutcome};
pub use startup::{daemonize, prepare_fifo, protect_against_oom_killer, write_pidfile, FifoPair};

use std::path::PathBuf;

use dmevent_core::GraceConfig;
use thiserror::Error;

/// Where the daemon writes a syslog-style vs. plain-stderr log stream
/// (`§6.5` `-l`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    Syslog,
    Stderr,
}

/// Everything startup needs to know, gathered from CLI flags and defaults
/// before any FIFO or pidfile touches the filesystem.
#[derive(Debug, Clone)]
pub struct Config {
    pub server_fifo: PathBuf,
    pub client_fifo: PathBuf,
    pub pid_file: PathBuf,
    pub exit_sentinel: Option<PathBuf>,
    pub grace: GraceConfig,
    pub foreground: bool,
    pub log_target: LogTarget,
    pub debug_level: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_fifo: PathBuf::from(DEFAULT_SERVER_FIFO),
            client_fifo: PathBuf::from(DEFAULT_CLIENT_FIFO),
            pid_file: PathBuf::from(DEFAULT_PID_FILE),
            exit_sentinel: None,
            grace: GraceConfig::default(),
            foreground: false,
            log_target: LogTarget::Syslog,
            debug_level: 0,
        }
    }
}

pub const DEFAULT_SERVER_FIFO: &str = "/var/run/dmeventd-server";
pub const DEFAULT_CLIENT_FIFO: &str = "/var/run/dmeventd-client";
pub const DEFAULT_PID_FILE: &str = "/var/run/dmeventd.pid";

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("another instance is already running (pidfile {0})")]
    AlreadyRunning(PathBuf),

    #[error("FIFO {path}: {source}")]
    Fifo { path: PathBuf, source: std::io::Error },

    #[error("pidfile {path}: {source}")]
    Pidfile { path: PathBuf, source: std::io::Error },

    #[error("file descriptor operation failed: {0}")]
    Descriptor(std::io::Error),

    #[error("chdir(\"/\") failed: {0}")]
    Chdir(std::io::Error),

    #[error("fork/setsid failed: {0}")]
    Fork(#[source] nix::Error),
}

/// Which contract produced a [`StartupResult`]'s FIFOs (`§4.6`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupMode {
    /// This process opened (or created) the FIFOs itself.
    Direct,
    /// The FIFOs were inherited, already open, from a supervisor (`§6.6`).
    Supervised,
}

/// The outcome of [`startup`]: the two open FIFO descriptors and whether
/// this process just forked into the background.
pub struct StartupResult {
    pub fifos: FifoPair,
    pub mode: StartupMode,
    pub daemonized: bool,
}

/// Run the `§4.6` startup sequence: consume and scrub the activation
/// environment, try the supervised handoff, and fall back to a direct
/// daemonization + FIFO provisioning otherwise.
///
/// The three `DMEVENTD_*` variables are always read and unset by
/// [`crate::env::take_activation_env`] before this function returns,
/// whether or not they formed a valid contract, so a later `--restart`
/// sibling never inherits a stale handoff it did not itself negotiate.
pub fn startup(config: &Config) -> Result<StartupResult, LifecycleError> {
    let activation = crate::env::take_activation_env();
    let our_pid = std::process::id();

    if activation.is_valid_handoff(our_pid) {
        match startup::inherited_fifos() {
            Ok(fifos) => {
                return Ok(StartupResult { fifos, mode: StartupMode::Supervised, daemonized: false });
            }
            Err(e) => {
                tracing::warn!(error = %e, "supervised handoff env was present but descriptors were invalid; starting directly");
            }
        }
    }

    let daemonized = if config.foreground {
        false
    } else {
        daemonize()?;
        true
    };

    protect_against_oom_killer();
    write_pidfile(&config.pid_file)?;

    let server = prepare_fifo(&config.server_fifo)?;
    let client = prepare_fifo(&config.client_fifo)?;

    Ok(StartupResult {
        fifos: FifoPair { server, client },
        mode: StartupMode::Direct,
        daemonized,
    })
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
