// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request payload: `<id> <plugin_name> <device_uuid> <events_bitmask> <timeout_secs>`.

use dmevent_core::{DeviceUuid, EventMask, PluginName};

use crate::error::WireError;
use crate::payload::{join_tokens, split_tokens};

/// A parsed request payload, universal across every command that runs
/// through the regular parser (everything except `HELLO` and `DIE`).
///
/// Fields the command does not use are left at their parsed-but-irrelevant
/// value; callers only read the fields their command needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub id: String,
    pub plugin_name: Option<PluginName>,
    pub device_uuid: Option<DeviceUuid>,
    pub events: EventMask,
    pub timeout_secs: u32,
}

impl Request {
    pub fn parse(payload: &str) -> Result<Self, WireError> {
        let tokens = split_tokens(payload, 5)?;
        let [id, plugin, uuid, events, timeout] = match <[String; 5]>::try_from(tokens) {
            Ok(arr) => arr,
            Err(_) => unreachable!("split_tokens already checked the length"),
        };
        let plugin_name = if plugin.is_empty() { None } else { Some(PluginName::new(plugin)) };
        let device_uuid = if uuid.is_empty() { None } else { Some(DeviceUuid::new(uuid)) };
        let events = parse_events_mask(&events)?;
        let timeout_secs = parse_timeout(&timeout)?;
        Ok(Self { id, plugin_name, device_uuid, events, timeout_secs })
    }

    pub fn encode(&self) -> String {
        let events = format!("0x{:02x}", self.events.bits());
        join_tokens([
            self.id.as_str(),
            self.plugin_name.as_ref().map(PluginName::as_str).unwrap_or(""),
            self.device_uuid.as_ref().map(DeviceUuid::as_str).unwrap_or(""),
            events.as_str(),
            &self.timeout_secs.to_string(),
        ])
    }
}

fn parse_events_mask(token: &str) -> Result<EventMask, WireError> {
    if token.is_empty() {
        return Ok(EventMask::empty());
    }
    let bits = if let Some(hex) = token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
    } else {
        token.parse::<u32>()
    }
    .map_err(|_| WireError::BadEventsMask(token.to_string()))?;
    Ok(EventMask::from_bits_truncate(bits))
}

fn parse_timeout(token: &str) -> Result<u32, WireError> {
    if token.is_empty() {
        return Ok(0);
    }
    token.parse::<u32>().map_err(|_| WireError::BadTimeout(token.to_string()))
}

#[cfg(test)]
#[path = "request_tests.rs"]
mod tests;
