// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The request dispatcher (`§4.5`): the main-thread loop that reads
//! requests off the server FIFO, dispatches them by command code, and
//! interleaves idle/shutdown bookkeeping and reaping between requests.

use std::path::PathBuf;
use std::time::Duration;

use dmevent_core::{Clock, SystemClock};
use dmevent_wire::{Command, Frame, Request, Response};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::core_state::CoreHandle;
use crate::daemon::{Daemon, DaemonParams};

/// Default idle-exit timeout (`§4.5` step 1): one hour with no loaded
/// plugins before the dispatcher logs and exits.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(3600);

/// How long a single readiness wait blocks before looping back to
/// re-check idle/shutdown state (`§4.5` step 3, `§5` "bounded select").
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

fn first_token(payload: &str) -> String {
    payload.split(' ').next().unwrap_or("").to_string()
}

/// The main dispatcher loop, generic over the FIFO reader/writer halves so
/// tests can drive it over an in-memory duplex stream instead of a real
/// named pipe, and over the clock so idle-timeout/backward-clock-jump
/// behavior is deterministically testable (`§8` boundary behaviors).
pub struct Dispatcher<R, W, C = SystemClock> {
    reader: R,
    writer: W,
    daemon: std::sync::Arc<Daemon>,
    core: CoreHandle,
    dispatcher_kick: std::sync::Arc<Notify>,
    clock: C,
    protocol_version: String,
    params: DaemonParams,
    idle_timeout: Duration,
    poll_interval: Duration,
    /// Wall-clock baseline (epoch ms) for the current idle period; `None`
    /// while the daemon is not idle. Separate from
    /// [`crate::core_state::DaemonCore::idle_since`] (a monotonic
    /// [`std::time::Instant`] used only for `GET_PARAMETERS` reporting):
    /// the idle-timeout exit specifically needs wall time so a backward
    /// clock jump can be detected and the baseline rebased (`§8`).
    idle_baseline_ms: Option<u64>,
}

impl<R, W> Dispatcher<R, W, SystemClock>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(
        reader: R,
        writer: W,
        daemon: std::sync::Arc<Daemon>,
        core: CoreHandle,
        dispatcher_kick: std::sync::Arc<Notify>,
        protocol_version: impl Into<String>,
        params: DaemonParams,
    ) -> Self {
        Self::with_clock(reader, writer, daemon, core, dispatcher_kick, protocol_version, params, SystemClock)
    }
}

impl<R, W, C> Dispatcher<R, W, C>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    C: Clock,
{
    pub fn with_clock(
        reader: R,
        writer: W,
        daemon: std::sync::Arc<Daemon>,
        core: CoreHandle,
        dispatcher_kick: std::sync::Arc<Notify>,
        protocol_version: impl Into<String>,
        params: DaemonParams,
        clock: C,
    ) -> Self {
        Self {
            reader,
            writer,
            daemon,
            core,
            dispatcher_kick,
            clock,
            protocol_version: protocol_version.into(),
            params,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            idle_baseline_ms: None,
        }
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Run the dispatcher to completion: returns once an idle timeout or a
    /// signal-originated exit is observed while idle (`§4.5` step 1).
    pub async fn run(mut self) {
        info!("dispatcher loop started");
        loop {
            if self.tick_idle_and_shutdown() {
                break;
            }

            tokio::select! {
                biased;
                frame = Frame::read(&mut self.reader) => {
                    match frame {
                        Ok(frame) => self.handle_frame(frame).await,
                        Err(e) => warn!(error = %e, "dropping malformed request frame"),
                    }
                }
                _ = self.dispatcher_kick.notified() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            self.daemon.reap_one_pass();
        }
    }

    /// `§4.5` steps 1-2. Returns `true` if the loop should exit now.
    fn tick_idle_and_shutdown(&mut self) -> bool {
        let idle = self.core.lock().is_idle();
        if idle {
            let now_ms = self.clock.epoch_ms();
            let baseline = *self.idle_baseline_ms.get_or_insert(now_ms);
            if now_ms < baseline {
                // Wall clock moved backwards; rebase rather than treat the
                // whole gap as idle time (`§8` boundary behavior).
                self.idle_baseline_ms = Some(now_ms);
            }
            let baseline = self.idle_baseline_ms.unwrap_or(now_ms);
            let elapsed_ms = now_ms.saturating_sub(baseline);

            if self.core.lock().shutdown.is_shutting_down() {
                info!("dispatcher exiting: idle with exit signalled");
                return true;
            }
            if elapsed_ms >= self.idle_timeout.as_millis() as u64 {
                info!(elapsed_ms, "dispatcher exiting: idle timeout elapsed");
                return true;
            }
            return false;
        }

        // Not idle: the idle baseline resets so the next idle period is
        // timed from scratch (`§8`: "idle timeout resets on plugin-registry
        // going non-empty").
        self.idle_baseline_ms = None;

        let mut core = self.core.lock();
        if core.shutdown.is_shutting_down() {
            if core.shutdown.mark_scheduled() {
                info!("shutdown transitioned from signaled to scheduled");
            }
            drop(core);
            if self.exit_sentinel_present() {
                self.daemon.force_unregister_all();
            }
        }
        false
    }

    fn exit_sentinel_present(&self) -> bool {
        self.core
            .lock()
            .exit_sentinel
            .as_ref()
            .map(|p: &PathBuf| p.exists())
            .unwrap_or(false)
    }

    async fn handle_frame(&mut self, frame: Frame) {
        let response = self.dispatch(frame.code, &frame.payload);
        let reply = Frame::new(response.status as u32, response.payload());
        if let Err(e) = reply.write(&mut self.writer).await {
            warn!(error = %e, "failed to write reply frame");
        }
    }

    /// `§4.5` command table.
    fn dispatch(&self, code: u32, payload: &str) -> Response {
        let command = match Command::try_from(code) {
            Ok(c) => c,
            Err(e) => return Response::error("-", libc::EINVAL, e.to_string()),
        };

        if command.bypasses_parser() {
            return self.dispatch_bypassing(command, payload);
        }

        let request = match Request::parse(payload) {
            Ok(r) => r,
            Err(e) => return Response::error("-", libc::EINVAL, e.to_string()),
        };

        match command {
            Command::Active => Response::success(request.id),
            Command::RegisterForEvent => self.handle_register(request),
            Command::UnregisterForEvent => self.handle_unregister(request),
            Command::GetRegisteredDevice => self.handle_get_registered(request),
            Command::GetNextRegisteredDevice => self.handle_get_next_registered(request),
            Command::SetTimeout => self.handle_set_timeout(request),
            Command::GetTimeout => self.handle_get_timeout(request),
            Command::GetStatus => Response::success(request.id).with_field(self.daemon.get_status()),
            Command::GetParameters => {
                Response::success(request.id).with_field(self.daemon.get_parameters(&self.params))
            }
            Command::Hello | Command::Die => unreachable!("handled by dispatch_bypassing"),
        }
    }

    /// `HELLO`/`DIE`: skip the regular 5-token parser, grab just the
    /// leading `id` token, and answer with the protocol-version suffix
    /// (`§4.5` command table, `§6.1`).
    fn dispatch_bypassing(&self, command: Command, payload: &str) -> Response {
        let id = first_token(payload);
        match command {
            Command::Hello => Response::greeting(id, "HELLO", &self.protocol_version),
            Command::Die => {
                self.core.lock().shutdown.force_scheduled();
                self.daemon.force_unregister_all();
                Response::greeting(id, "DYING", &self.protocol_version)
            }
            _ => unreachable!("only Hello/Die bypass the parser"),
        }
    }

    fn handle_register(&self, request: Request) -> Response {
        let (Some(plugin), Some(uuid)) = (request.plugin_name.clone(), request.device_uuid.clone()) else {
            return Response::error(request.id, libc::EINVAL, "missing plugin name or device uuid");
        };
        match self.daemon.register_for_event(plugin, uuid, request.events, request.timeout_secs) {
            Ok(()) => Response::success(request.id),
            Err(e) => Response::error(request.id, e.errno(), e.to_string()),
        }
    }

    fn handle_unregister(&self, request: Request) -> Response {
        let Some(uuid) = request.device_uuid.clone() else {
            return Response::error(request.id, libc::EINVAL, "missing device uuid");
        };
        match self.daemon.unregister_for_event(&uuid, request.events) {
            Ok(()) => Response::success(request.id),
            Err(e) => Response::error(request.id, e.errno(), e.to_string()),
        }
    }

    fn handle_get_registered(&self, request: Request) -> Response {
        let plugin_name = request.plugin_name.as_ref().map(|p| p.as_str());
        let uuid = request.device_uuid.as_ref().map(|u| u.as_str());
        match self.daemon.get_registered_device(plugin_name, uuid) {
            Some(dev) => Response::success(request.id)
                .with_field(dev.plugin_name)
                .with_field(dev.uuid)
                .with_field(format!("0x{:02x}", dev.events.bits()))
                .with_field(dev.timeout_secs.to_string()),
            None => Response::error(request.id, libc::ENODEV, "no such device"),
        }
    }

    fn handle_get_next_registered(&self, request: Request) -> Response {
        let Some(after_uuid) = request.device_uuid.clone() else {
            return Response::error(request.id, libc::EINVAL, "missing device uuid");
        };
        let plugin_name = request.plugin_name.as_ref().map(|p| p.as_str());
        match self.daemon.get_next_registered_device(plugin_name, after_uuid.as_str()) {
            Some(dev) => Response::success(request.id)
                .with_field(dev.plugin_name)
                .with_field(dev.uuid)
                .with_field(format!("0x{:02x}", dev.events.bits()))
                .with_field(dev.timeout_secs.to_string()),
            None => Response::error(request.id, libc::ENODEV, "no such device"),
        }
    }

    fn handle_set_timeout(&self, request: Request) -> Response {
        let Some(uuid) = request.device_uuid.clone() else {
            return Response::error(request.id, libc::EINVAL, "missing device uuid");
        };
        match self.daemon.set_timeout(&uuid, request.timeout_secs) {
            Ok(()) => Response::success(request.id),
            Err(e) => Response::error(request.id, e.errno(), e.to_string()),
        }
    }

    fn handle_get_timeout(&self, request: Request) -> Response {
        let Some(uuid) = request.device_uuid.clone() else {
            return Response::error(request.id, libc::EINVAL, "missing device uuid");
        };
        match self.daemon.get_timeout(&uuid) {
            Ok(secs) => Response::success(request.id).with_field(secs.to_string()),
            Err(e) => Response::error(request.id, e.errno(), e.to_string()),
        }
    }
}

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod tests;
