// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Space-delimited token encoding shared by request and reply payloads.
//!
//! An empty field is encoded as the single character `-` so that a fixed
//! token count survives round tripping even when a field is unset.

use crate::error::WireError;

/// Split a payload string into exactly `expected` tokens, mapping the `-`
/// placeholder back to an empty string.
pub fn split_tokens(payload: &str, expected: usize) -> Result<Vec<String>, WireError> {
    if payload.is_empty() && expected == 0 {
        return Ok(vec![]);
    }
    let tokens: Vec<String> = payload
        .split(' ')
        .map(|tok| if tok == "-" { String::new() } else { tok.to_string() })
        .collect();
    if tokens.len() != expected {
        return Err(WireError::WrongTokenCount { expected, actual: tokens.len() });
    }
    Ok(tokens)
}

/// Join tokens with single spaces, encoding any empty token as `-`.
pub fn join_tokens<I, S>(tokens: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tokens
        .into_iter()
        .map(|t| if t.as_ref().is_empty() { "-".to_string() } else { t.as_ref().to_string() })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
#[path = "payload_tests.rs"]
mod tests;
