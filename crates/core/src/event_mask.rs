// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event category bitmask shared between clients, workers, and plugins.

use bitflags::bitflags;

bitflags! {
    /// Categories of device events a client can subscribe to.
    ///
    /// Numeric values are fixed by the wire protocol and must not change.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EventMask: u32 {
        /// Report multiple errors of the same kind just once.
        const SINGLE        = 0x01;
        /// Report all occurrences of an error.
        const MULTI         = 0x02;
        /// Failure on a particular sector.
        const SECTOR_ERROR  = 0x04;
        /// Device failure.
        const DEVICE_ERROR  = 0x08;
        /// Failure on an IO path.
        const PATH_ERROR    = 0x10;
        /// Failure on a host adaptor.
        const ADAPTOR_ERROR = 0x20;
        /// Mirror synchronization completed or failed.
        const SYNC_STATUS   = 0x40;
        /// The worker's configured timeout elapsed.
        const TIMEOUT       = 0x80;
    }
}

impl EventMask {
    /// Union of every device-error sub-category, used when a wait reports a
    /// generic device error without a specific kind.
    pub const ALL_ERRORS: EventMask = EventMask::SECTOR_ERROR
        .union(EventMask::DEVICE_ERROR)
        .union(EventMask::PATH_ERROR)
        .union(EventMask::ADAPTOR_ERROR);

    /// Whether this mask subscribes to timeout-driven wakeups.
    pub fn wants_timeout(self) -> bool {
        self.contains(EventMask::TIMEOUT)
    }
}

#[cfg(test)]
#[path = "event_mask_tests.rs"]
mod tests;
