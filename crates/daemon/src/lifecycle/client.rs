// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! A minimal blocking client over a running instance's FIFOs, used only
//! by `--restart` and `--info` (`§4.6`, `§6.5`) to talk to a sibling
//! process from inside this same binary. A full async client library is
//! out of scope; this just needs to send one request and read one reply
//! at a time.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use dmevent_wire::{Command, Request, MAX_PAYLOAD_LEN};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("could not open FIFO {path}: {source}")]
    Open { path: PathBuf, source: std::io::Error },

    #[error("I/O error talking to daemon: {0}")]
    Io(#[from] std::io::Error),

    #[error("reply payload of {0} bytes exceeds the maximum frame size")]
    ReplyTooLarge(u32),
}

/// A reply read straight off the client FIFO, split only on the first
/// space so a multi-field payload with embedded spaces (`GET_STATUS`'s
/// semicolon-joined status blob) survives intact in `rest`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawReply {
    pub status: i32,
    pub id: String,
    pub rest: String,
}

/// An open connection to a running daemon's pair of FIFOs.
pub struct FifoClient {
    write_to_server: std::fs::File,
    read_from_client: std::fs::File,
}

impl FifoClient {
    pub fn connect(server_path: &Path, client_path: &Path) -> Result<Self, ClientError> {
        let write_to_server = std::fs::OpenOptions::new()
            .write(true)
            .open(server_path)
            .map_err(|source| ClientError::Open { path: server_path.to_path_buf(), source })?;
        let read_from_client = std::fs::OpenOptions::new()
            .read(true)
            .open(client_path)
            .map_err(|source| ClientError::Open { path: client_path.to_path_buf(), source })?;
        Ok(Self { write_to_server, read_from_client })
    }

    /// Send a request built from `command` and the usual `(id, plugin,
    /// uuid, events, timeout)` fields, and block for the reply.
    pub fn request(&mut self, command: Command, request: &Request) -> Result<RawReply, ClientError> {
        self.write_frame(command.code(), &request.encode())?;
        self.read_frame()
    }

    /// `HELLO`/`DIE`: bypass the regular parser, send only an `id` token.
    pub fn bypassing(&mut self, command: Command, id: &str) -> Result<RawReply, ClientError> {
        self.write_frame(command.code(), id)?;
        self.read_frame()
    }

    fn write_frame(&mut self, code: u32, payload: &str) -> Result<(), ClientError> {
        let bytes = payload.as_bytes();
        self.write_to_server.write_all(&code.to_be_bytes())?;
        self.write_to_server.write_all(&(bytes.len() as u32).to_be_bytes())?;
        self.write_to_server.write_all(bytes)?;
        self.write_to_server.flush()?;
        Ok(())
    }

    fn read_frame(&mut self) -> Result<RawReply, ClientError> {
        let mut header = [0u8; 8];
        self.read_from_client.read_exact(&mut header)?;
        let status = i32::from_be_bytes(header[0..4].try_into().unwrap_or_default());
        let len = u32::from_be_bytes(header[4..8].try_into().unwrap_or_default());
        if len > MAX_PAYLOAD_LEN {
            return Err(ClientError::ReplyTooLarge(len));
        }
        let mut buf = vec![0u8; len as usize];
        self.read_from_client.read_exact(&mut buf)?;
        let payload = String::from_utf8_lossy(&buf).into_owned();

        let mut split = payload.splitn(2, ' ');
        let id = split.next().unwrap_or("-").to_string();
        let rest = split.next().unwrap_or("").to_string();
        Ok(RawReply { status, id, rest })
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
