// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reply payload: `<id> <command-specific fields...>`.

use crate::payload::join_tokens;

/// A reply, ready to be written as a [`crate::Frame`] whose `code` is
/// `status` and whose payload is [`Response::payload`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Errno-style status; zero means success.
    pub status: i32,
    pub id: String,
    pub fields: Vec<String>,
}

impl Response {
    pub fn success(id: impl Into<String>) -> Self {
        Self { status: 0, id: id.into(), fields: vec!["Success".to_string()] }
    }

    pub fn error(id: impl Into<String>, status: i32, message: impl Into<String>) -> Self {
        Self { status, id: id.into(), fields: vec![message.into()] }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.fields.push(field.into());
        self
    }

    /// Build the `"HELLO"|"DYING" <protocol_version>` suffix the `HELLO`
    /// and `DIE` replies embed.
    pub fn greeting(id: impl Into<String>, tag: &str, protocol_version: &str) -> Self {
        Self { status: 0, id: id.into(), fields: vec![tag.to_string(), protocol_version.to_string()] }
    }

    pub fn is_success(&self) -> bool {
        self.status == 0
    }

    pub fn payload(&self) -> String {
        let mut tokens = vec![self.id.as_str()];
        tokens.extend(self.fields.iter().map(String::as_str));
        join_tokens(tokens)
    }
}

#[cfg(test)]
#[path = "response_tests.rs"]
mod tests;
