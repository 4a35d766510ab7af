// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! FIFO provisioning, daemonization, the pidfile, and the best-effort
//! OOM-killer exemption (`§4.6`, `§6.6`).

use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::os::unix::fs::{FileTypeExt, MetadataExt, OpenOptionsExt};
use std::os::unix::io::{AsRawFd, FromRawFd};
use std::path::Path;

use fs2::FileExt;
use nix::unistd::{chdir, fork, pipe, setsid, ForkResult};
use tracing::{info, warn};

use super::LifecycleError;

/// The two FIFO descriptors, server-to-client direction and
/// client-to-server direction, whichever way [`super::startup`] obtained
/// them.
pub struct FifoPair {
    pub server: File,
    pub client: File,
}

/// Fixed descriptor numbers a supervisor hands off on, one past stdio
/// (`§6.6`): the server FIFO at 3, the client FIFO at 4. Mirrors the
/// systemd socket-activation convention this protocol is modeled on.
const INHERITED_SERVER_FD: i32 = 3;
const INHERITED_CLIENT_FD: i32 = 4;

/// Reclaim the pair of descriptors a supervisor pre-opened for us,
/// validating each is actually a FIFO before trusting it (`§4.6`).
pub(super) fn inherited_fifos() -> Result<FifoPair, LifecycleError> {
    let server = validated_inherited_fd(INHERITED_SERVER_FD)?;
    let client = validated_inherited_fd(INHERITED_CLIENT_FD)?;
    Ok(FifoPair { server, client })
}

fn validated_inherited_fd(fd: i32) -> Result<File, LifecycleError> {
    // SAFETY: the caller (startup, under a validated supervised-handoff
    // contract) asserts this descriptor number is open and was handed to
    // us for exactly this purpose; we take ownership of it here.
    #[allow(unsafe_code)]
    let file = unsafe { File::from_raw_fd(fd) };
    let meta = file.metadata().map_err(LifecycleError::Descriptor)?;
    if !meta.file_type().is_fifo() {
        return Err(LifecycleError::Descriptor(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("inherited fd {fd} is not a FIFO"),
        )));
    }
    set_cloexec(&file)?;
    Ok(file)
}

/// Validate an existing FIFO's attributes, or replace/create it, then
/// open it for read-write use (`§4.6`, `§6.6`; grounded on the original
/// `_open_fifo` validate-replace-create sequence).
pub fn prepare_fifo(path: &Path) -> Result<File, LifecycleError> {
    let fifo_error = |source: std::io::Error| LifecycleError::Fifo { path: path.to_path_buf(), source };

    match std::fs::symlink_metadata(path) {
        Ok(meta) => {
            if !is_acceptable_fifo(&meta) {
                warn!(path = %path.display(), "existing FIFO has unexpected attributes; recreating");
                std::fs::remove_file(path).map_err(fifo_error)?;
                create_fifo(path)?;
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => create_fifo(path)?,
        Err(e) => return Err(fifo_error(e)),
    }

    let file = OpenOptions::new().read(true).write(true).open(path).map_err(fifo_error)?;
    let meta = file.metadata().map_err(fifo_error)?;
    if !meta.file_type().is_fifo() {
        return Err(fifo_error(std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a FIFO after open")));
    }
    set_cloexec(&file).map_err(|e| LifecycleError::Fifo { path: path.to_path_buf(), source: e })?;
    Ok(file)
}

/// A FIFO we own must be owned by us, mode `0600`, with no group/world
/// permission bits set.
fn is_acceptable_fifo(meta: &std::fs::Metadata) -> bool {
    meta.file_type().is_fifo() && meta.uid() == current_uid() && (meta.mode() & 0o077) == 0
}

fn current_uid() -> u32 {
    nix::unistd::getuid().as_raw()
}

fn create_fifo(path: &Path) -> Result<(), LifecycleError> {
    nix::unistd::mkfifo(path, nix::sys::stat::Mode::from_bits_truncate(0o600))
        .map_err(|e| LifecycleError::Fifo { path: path.to_path_buf(), source: std::io::Error::from(e) })
}

fn set_cloexec(file: &File) -> Result<(), std::io::Error> {
    let fd = file.as_raw_fd();
    let flags = nix::fcntl::fcntl(fd, nix::fcntl::FcntlArg::F_GETFD).map_err(std::io::Error::from)?;
    let new_flags = nix::fcntl::FdFlag::from_bits_truncate(flags) | nix::fcntl::FdFlag::FD_CLOEXEC;
    nix::fcntl::fcntl(fd, nix::fcntl::FcntlArg::F_SETFD(new_flags)).map_err(std::io::Error::from)?;
    Ok(())
}

/// Fork into the background, detach from the controlling terminal, and
/// redirect stdio to `/dev/null` (`§4.6`; grounded on the original
/// `_daemonize` fork/setsid/chdir sequence). The parent blocks on a pipe
/// until the child has finished its own setup, then exits zero; only the
/// child returns from this function.
pub fn daemonize() -> Result<(), LifecycleError> {
    let (read_fd, write_fd) = pipe().map_err(LifecycleError::Fork)?;

    // SAFETY: called once, before any other thread exists in this
    // process, as the very first step of startup.
    #[allow(unsafe_code)]
    let fork_result = unsafe { fork() }.map_err(LifecycleError::Fork)?;

    match fork_result {
        ForkResult::Parent { .. } => {
            drop(write_fd);
            let mut signal = [0u8; 1];
            let mut ready = File::from(read_fd);
            let _ = std::io::Read::read(&mut ready, &mut signal);
            std::process::exit(0);
        }
        ForkResult::Child => {
            drop(read_fd);
            chdir("/").map_err(|e| LifecycleError::Chdir(std::io::Error::from(e)))?;
            setsid().map_err(LifecycleError::Fork)?;
            redirect_stdio_to_devnull()?;
            let mut ready = File::from(write_fd);
            let _ = ready.write_all(b"\n");
            Ok(())
        }
    }
}

fn redirect_stdio_to_devnull() -> Result<(), LifecycleError> {
    let devnull = OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/null")
        .map_err(LifecycleError::Descriptor)?;
    let fd = devnull.as_raw_fd();
    for target in [0, 1, 2] {
        nix::unistd::dup2(fd, target).map_err(|e| LifecycleError::Descriptor(std::io::Error::from(e)))?;
    }
    Ok(())
}

/// Best-effort exemption from the Linux OOM killer, never fatal
/// (`§4.6`; grounded on the original `_protect_against_oom_killer`).
pub fn protect_against_oom_killer() {
    #[cfg(target_os = "linux")]
    {
        const OOM_SCORE_ADJ_MIN: &str = "-900";
        match std::fs::write("/proc/self/oom_score_adj", OOM_SCORE_ADJ_MIN) {
            Ok(()) => info!("adjusted oom_score_adj"),
            Err(e) => warn!(error = %e, "could not adjust oom_score_adj; continuing without OOM protection"),
        }
    }
}

/// Acquire an exclusive lock on the pidfile and write our pid into it,
/// failing if another live instance already holds the lock.
pub fn write_pidfile(path: &Path) -> Result<(), LifecycleError> {
    let open_error = |source: std::io::Error| LifecycleError::Pidfile { path: path.to_path_buf(), source };

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .mode(0o644)
        .open(path)
        .map_err(open_error)?;

    file.try_lock_exclusive().map_err(|_| LifecycleError::AlreadyRunning(path.to_path_buf()))?;
    file.set_len(0).map_err(open_error)?;
    write!(file, "{}\n", std::process::id()).map_err(open_error)?;
    file.flush().map_err(open_error)?;
    Ok(())
}

#[cfg(test)]
#[path = "startup_tests.rs"]
mod tests;
