// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The command/status code carried in frame headers.
//!
//! Numeric assignment is stable and shared with the client library; do not
//! renumber without a matching client-side release.

use crate::error::WireError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Command {
    Active = 1,
    RegisterForEvent = 2,
    UnregisterForEvent = 3,
    GetRegisteredDevice = 4,
    GetNextRegisteredDevice = 5,
    SetTimeout = 6,
    GetTimeout = 7,
    Hello = 8,
    GetStatus = 9,
    GetParameters = 10,
    Die = 11,
}

impl Command {
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Whether this command bypasses the regular `(id, plugin, uuid,
    /// events, timeout)` payload parser (`§4.5`).
    pub fn bypasses_parser(self) -> bool {
        matches!(self, Command::Hello | Command::Die)
    }
}

impl TryFrom<u32> for Command {
    type Error = WireError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        Ok(match code {
            1 => Command::Active,
            2 => Command::RegisterForEvent,
            3 => Command::UnregisterForEvent,
            4 => Command::GetRegisteredDevice,
            5 => Command::GetNextRegisteredDevice,
            6 => Command::SetTimeout,
            7 => Command::GetTimeout,
            8 => Command::Hello,
            9 => Command::GetStatus,
            10 => Command::GetParameters,
            11 => Command::Die,
            other => return Err(WireError::UnknownCommand(other)),
        })
    }
}

dmevent_core::simple_display! {
    Command {
        Active => "ACTIVE",
        RegisterForEvent => "REGISTER_FOR_EVENT",
        UnregisterForEvent => "UNREGISTER_FOR_EVENT",
        GetRegisteredDevice => "GET_REGISTERED_DEVICE",
        GetNextRegisteredDevice => "GET_NEXT_REGISTERED_DEVICE",
        SetTimeout => "SET_TIMEOUT",
        GetTimeout => "GET_TIMEOUT",
        Hello => "HELLO",
        GetStatus => "GET_STATUS",
        GetParameters => "GET_PARAMETERS",
        Die => "DIE",
    }
}

#[cfg(test)]
#[path = "command_tests.rs"]
mod tests;
