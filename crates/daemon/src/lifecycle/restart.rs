// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `--restart` sibling-invocation handoff (`§4.6`, `§11`): query the
//! currently running instance's registrations, tell it to die, wait for
//! the pidfile to change, and (if it was supervised) replay those
//! registrations into this process.

use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::time::Duration;

use dmevent_core::{DeviceUuid, EventMask, PluginName};
use dmevent_wire::{Command, Request};
use nix::sys::signal::kill;
use nix::unistd::Pid;
use tracing::{info, warn};

use super::client::{ClientError, FifoClient};
use super::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartOutcome {
    /// No previous instance was found; proceed with a normal startup.
    NoPreviousInstance,
    /// The old instance died and this process replayed its
    /// registrations into itself; the dispatcher can start serving
    /// immediately with those registrations already in place.
    Replayed,
    /// The old instance died but was running in direct mode; the caller
    /// should continue with its own normal (non-handoff) startup.
    ContinueStartup,
}

const PIDFILE_POLL_INTERVAL: Duration = Duration::from_millis(200);
const PIDFILE_POLL_ATTEMPTS: u32 = 25; // ~5s

#[derive(Debug, Clone)]
struct SavedRegistration {
    plugin_name: String,
    uuid: String,
    events: EventMask,
    timeout_secs: u32,
}

/// Run the full handoff sequence; the caller is expected to follow a
/// [`RestartOutcome::ContinueStartup`] or [`RestartOutcome::NoPreviousInstance`]
/// result with its own normal [`super::startup`] call.
pub fn restart_handoff(config: &Config) -> Result<RestartOutcome, ClientError> {
    if !previous_instance_running(&config.pid_file) {
        info!(path = %config.pid_file.display(), "no running instance to restart");
        return Ok(RestartOutcome::NoPreviousInstance);
    }

    let mut client = FifoClient::connect(&config.server_fifo, &config.client_fifo)?;
    client.bypassing(Command::Hello, "restart")?;

    let status_reply = client.request(Command::GetStatus, &status_query())?;
    let registrations = parse_status(&status_reply.rest);

    let params_reply = client.request(Command::GetParameters, &status_query())?;
    let supervised = parse_parameters_supervised(&params_reply.rest);

    let before_inode = inode_of(&config.pid_file);
    client.bypassing(Command::Die, "restart")?;
    drop(client);

    if !wait_for_pidfile_change(&config.pid_file, before_inode) {
        warn!("pidfile did not change after DIE; proceeding anyway");
    }

    if !supervised {
        info!("previous instance was not supervised; continuing with a normal startup");
        return Ok(RestartOutcome::ContinueStartup);
    }

    replay_registrations(config, &registrations)?;
    Ok(RestartOutcome::Replayed)
}

fn status_query() -> Request {
    Request { id: "restart".to_string(), plugin_name: None, device_uuid: None, events: EventMask::empty(), timeout_secs: 0 }
}

fn replay_registrations(config: &Config, registrations: &[SavedRegistration]) -> Result<(), ClientError> {
    let mut client = FifoClient::connect(&config.server_fifo, &config.client_fifo)?;
    client.bypassing(Command::Hello, "restart")?;
    for reg in registrations {
        let request = Request {
            id: "restart".to_string(),
            plugin_name: Some(PluginName::new(reg.plugin_name.clone())),
            device_uuid: Some(DeviceUuid::new(reg.uuid.clone())),
            events: reg.events,
            timeout_secs: reg.timeout_secs,
        };
        if let Err(e) = client.request(Command::RegisterForEvent, &request) {
            warn!(uuid = %reg.uuid, error = %e, "failed to reinstate a monitored device");
        }
    }
    Ok(())
}

/// Parse `GET_STATUS`'s `"0:<index> <dso-name> <uuid> <events> <timeout>;"`
/// semicolon-joined blob (`§11`). A `-` (the wire protocol's empty-token
/// placeholder) means no devices were registered.
fn parse_status(blob: &str) -> Vec<SavedRegistration> {
    if blob.is_empty() || blob == "-" {
        return Vec::new();
    }
    blob.split(';')
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| {
            let fields: Vec<&str> = entry.split(' ').collect();
            let [_, plugin, uuid, events, timeout] = <[&str; 5]>::try_from(fields).ok()?;
            Some(SavedRegistration {
                plugin_name: plugin.to_string(),
                uuid: uuid.to_string(),
                events: EventMask::from_bits_truncate(events.parse().unwrap_or(0)),
                timeout_secs: timeout.parse().unwrap_or(0),
            })
        })
        .collect()
}

/// `GET_PARAMETERS`'s second field is `"supervised"` or `"direct"` (`§4.4`).
fn parse_parameters_supervised(blob: &str) -> bool {
    blob.split(' ').nth(1) == Some("supervised")
}

fn previous_instance_running(pid_file: &Path) -> bool {
    let Ok(contents) = std::fs::read_to_string(pid_file) else {
        return false;
    };
    let Ok(pid) = contents.trim().parse::<i32>() else {
        return false;
    };
    kill(Pid::from_raw(pid), None).is_ok()
}

fn inode_of(path: &Path) -> Option<u64> {
    std::fs::metadata(path).ok().map(|m| m.ino())
}

fn wait_for_pidfile_change(path: &Path, before: Option<u64>) -> bool {
    for _ in 0..PIDFILE_POLL_ATTEMPTS {
        std::thread::sleep(PIDFILE_POLL_INTERVAL);
        let now = inode_of(path);
        if now != before {
            return true;
        }
    }
    false
}

#[cfg(test)]
#[path = "restart_tests.rs"]
mod tests;
