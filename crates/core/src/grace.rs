// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Grace-period configuration.

use std::time::Duration;
use thiserror::Error;

pub const GRACE_PERIOD_MIN_SECS: u32 = 0;
pub const GRACE_PERIOD_MAX_SECS: u32 = 300;
pub const GRACE_PERIOD_DEFAULT_SECS: u32 = 10;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("grace period {0}s out of range {GRACE_PERIOD_MIN_SECS}-{GRACE_PERIOD_MAX_SECS}s")]
pub struct GracePeriodOutOfRange(pub u32);

/// Bounded grace-period duration. `0` disables the grace state entirely:
/// a worker whose events empty goes straight to `Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraceConfig {
    secs: u32,
}

impl GraceConfig {
    pub fn new(secs: u32) -> Result<Self, GracePeriodOutOfRange> {
        if secs > GRACE_PERIOD_MAX_SECS {
            return Err(GracePeriodOutOfRange(secs));
        }
        Ok(Self { secs })
    }

    pub fn secs(self) -> u32 {
        self.secs
    }

    pub fn duration(self) -> Duration {
        Duration::from_secs(self.secs as u64)
    }

    pub fn is_disabled(self) -> bool {
        self.secs == 0
    }
}

impl Default for GraceConfig {
    fn default() -> Self {
        Self { secs: GRACE_PERIOD_DEFAULT_SECS }
    }
}

#[cfg(test)]
#[path = "grace_tests.rs"]
mod tests;
