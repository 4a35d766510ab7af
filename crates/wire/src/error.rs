// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Errors raised while framing or parsing the wire protocol.

use thiserror::Error;

/// Frames larger than this are rejected outright; the real protocol never
/// sends payloads anywhere near this size, so a larger length is treated as
/// a corrupt or hostile peer rather than a legitimate oversized request.
pub const MAX_PAYLOAD_LEN: u32 = 64 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("unknown command/status code {0}")]
    UnknownCommand(u32),

    #[error("payload length {0} exceeds maximum {MAX_PAYLOAD_LEN}")]
    PayloadTooLarge(u32),

    #[error("payload is not valid ASCII/UTF-8")]
    InvalidPayload,

    #[error("expected {expected} space-delimited tokens, got {actual}")]
    WrongTokenCount { expected: usize, actual: usize },

    #[error("malformed events bitmask {0:?}")]
    BadEventsMask(String),

    #[error("malformed timeout value {0:?}")]
    BadTimeout(String),

    #[error("connection closed mid-frame")]
    Truncated,
}

/// I/O-level framing errors, kept distinct from payload-parsing errors so
/// callers can tell "the peer hung up" apart from "the peer sent garbage".
#[derive(Debug, Error)]
pub enum FramingError {
    #[error(transparent)]
    Protocol(#[from] WireError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
