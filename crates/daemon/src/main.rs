// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `dmeventd`: CLI entry point, process wiring, and the `--restart`/
//! `--info` sibling-invocation paths (`§6.5`).

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use dmevent_core::GraceConfig;
use dmevent_daemon::core_state::{CoreHandle, DaemonCore};
use dmevent_daemon::daemon::{Daemon, DaemonParams};
use dmevent_daemon::dispatcher::Dispatcher;
use dmevent_daemon::env::{force_c_locale, PROTOCOL_VERSION};
use dmevent_daemon::kernel::UnimplementedDeviceMonitor;
use dmevent_daemon::lifecycle::{
    self, restart_handoff, Config, FifoClient, LifecycleError, LogTarget, RestartOutcome, StartupMode,
};
use dmevent_daemon::scheduler::Scheduler;
use tokio::sync::Notify;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Recovered from the original's numbered process exits (`§6.5`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
enum ExitCode {
    Success = 0,
    LockBusy = 1,
    FifoFailure = 2,
    DescriptorFailure = 3,
    ChdirFailure = 4,
    GenericFailure = 5,
}

impl From<&LifecycleError> for ExitCode {
    fn from(e: &LifecycleError) -> Self {
        match e {
            LifecycleError::AlreadyRunning(_) => ExitCode::LockBusy,
            LifecycleError::Fifo { .. } => ExitCode::FifoFailure,
            LifecycleError::Pidfile { .. } => ExitCode::FifoFailure,
            LifecycleError::Descriptor(_) => ExitCode::DescriptorFailure,
            LifecycleError::Chdir(_) => ExitCode::ChdirFailure,
            LifecycleError::Fork(_) => ExitCode::GenericFailure,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum LogArg {
    Syslog,
    Stderr,
}

fn parse_exit_on(value: &str) -> Result<PathBuf, String> {
    if value.contains('"') {
        return Err("exit-sentinel path may not contain a double quote".to_string());
    }
    Ok(PathBuf::from(value))
}

/// `dm-event` daemon: watches device-mapper devices for events and
/// dispatches them to plugins over a pair of named pipes (`§6.5`).
#[derive(Debug, Parser)]
#[command(name = "dmeventd", version = PROTOCOL_VERSION)]
struct Cli {
    /// Raise trace verbosity; repeatable up to 3 times.
    #[arg(short = 'd', long = "debug", action = clap::ArgAction::Count)]
    debug: u8,

    /// Don't daemonize; run in the foreground.
    #[arg(short = 'f', long = "foreground")]
    foreground: bool,

    /// Log target.
    #[arg(short = 'l', long = "log", value_enum, default_value_t = LogArg::Syslog)]
    log: LogArg,

    /// Restart handoff: replace a currently running instance.
    #[arg(short = 'R', long = "restart")]
    restart: bool,

    /// Query a running daemon's parameters and print them.
    #[arg(long = "info")]
    info: bool,

    /// Pidfile path.
    #[arg(short = 'p', long = "pid-file", default_value = lifecycle::DEFAULT_PID_FILE)]
    pid_file: PathBuf,

    /// Exit-sentinel path: once set, an idle dispatcher unregisters
    /// everything and exits when this path exists.
    #[arg(short = 'a', long = "exit-on", value_parser = parse_exit_on)]
    exit_on: Option<PathBuf>,

    /// Grace-period duration in seconds (0-300).
    #[arg(short = 'g', long = "grace-period", value_parser = clap::value_parser!(u32).range(0..=300), default_value_t = 10)]
    grace_period: u32,

    /// Server FIFO path.
    #[arg(long = "server-fifo", default_value = lifecycle::DEFAULT_SERVER_FIFO)]
    server_fifo: PathBuf,

    /// Client FIFO path.
    #[arg(long = "client-fifo", default_value = lifecycle::DEFAULT_CLIENT_FIFO)]
    client_fifo: PathBuf,
}

impl Cli {
    fn lifecycle_config(&self) -> Result<Config, ExitCode> {
        let grace = GraceConfig::new(self.grace_period).map_err(|_| ExitCode::GenericFailure)?;
        Ok(Config {
            server_fifo: self.server_fifo.clone(),
            client_fifo: self.client_fifo.clone(),
            pid_file: self.pid_file.clone(),
            exit_sentinel: self.exit_on.clone(),
            grace,
            foreground: self.foreground,
            log_target: match self.log {
                LogArg::Syslog => LogTarget::Syslog,
                LogArg::Stderr => LogTarget::Stderr,
            },
            debug_level: self.debug,
        })
    }
}

fn init_logging(cli: &Cli) {
    let level = match cli.debug {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(format!("dmeventd={level}")));

    match cli.log {
        LogArg::Stderr => {
            let _ = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init();
        }
        LogArg::Syslog => match open_syslog_writer() {
            Ok(writer) => {
                let _ = tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_writer(move || writer.clone())
                    .with_ansi(false)
                    .try_init();
            }
            Err(e) => {
                let _ = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init();
                warn!(error = %e, "could not open syslog; falling back to stderr");
            }
        },
    }
}

/// A cloneable handle onto the one underlying syslog connection, so
/// `tracing_subscriber`'s per-event `MakeWriter` closure can hand out a
/// fresh writer without reopening the connection each time.
#[derive(Clone)]
struct SyslogWriter(Arc<std::sync::Mutex<syslog_tracing::Syslog>>);

impl std::io::Write for SyslogWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap_or_else(|p| p.into_inner()).write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.lock().unwrap_or_else(|p| p.into_inner()).flush()
    }
}

fn open_syslog_writer() -> std::io::Result<SyslogWriter> {
    let syslog = syslog_tracing::Syslog::new(c"dmeventd", syslog_tracing::Options::LOG_PID, syslog_tracing::Facility::Daemon)?;
    Ok(SyslogWriter(Arc::new(std::sync::Mutex::new(syslog))))
}

/// Best-effort process-wide `SIGPIPE` ignore, so a client disconnecting
/// mid-write surfaces as an `EPIPE` write error instead of killing the
/// daemon (`§6.6`).
fn ignore_sigpipe() {
    use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
    let action = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
    // SAFETY: installs a handler once, before any other thread exists.
    #[allow(unsafe_code)]
    unsafe {
        let _ = sigaction(Signal::SIGPIPE, &action);
    }
}

/// Spawn one task per terminating signal, each idempotently marking
/// [`dmevent_core::ShutdownState::signal`] and kicking the dispatcher so
/// it notices without waiting out its poll interval.
fn spawn_signal_watchers(core: CoreHandle, dispatcher_kick: Arc<Notify>) {
    use tokio::signal::unix::{signal, SignalKind};

    for kind in [SignalKind::terminate(), SignalKind::interrupt(), SignalKind::hangup(), SignalKind::quit()] {
        let core = core.clone();
        let kick = dispatcher_kick.clone();
        let Ok(mut stream) = signal(kind) else {
            warn!(?kind, "could not install signal handler");
            continue;
        };
        tokio::spawn(async move {
            while stream.recv().await.is_some() {
                info!("shutdown signal received");
                core.lock().shutdown.signal();
                kick.notify_one();
            }
        });
    }
}

fn run_restart(cli: &Cli) -> ExitCode {
    let config = match cli.lifecycle_config() {
        Ok(c) => c,
        Err(code) => return code,
    };
    match restart_handoff(&config) {
        Ok(RestartOutcome::NoPreviousInstance) => {
            info!("no previous instance found; continuing with a normal startup");
            ExitCode::Success
        }
        Ok(RestartOutcome::Replayed) => {
            info!("restart handoff complete: registrations replayed into the new instance");
            ExitCode::Success
        }
        Ok(RestartOutcome::ContinueStartup) => {
            info!("previous instance was not supervised; continuing with a normal startup");
            ExitCode::Success
        }
        Err(e) => {
            error!(error = %e, "restart handoff failed");
            ExitCode::GenericFailure
        }
    }
}

fn run_info(cli: &Cli) -> ExitCode {
    let config = match cli.lifecycle_config() {
        Ok(c) => c,
        Err(code) => return code,
    };
    let mut client = match FifoClient::connect(&config.server_fifo, &config.client_fifo) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "could not connect to a running instance");
            return ExitCode::GenericFailure;
        }
    };
    let id = "info";
    if let Err(e) = client.bypassing(dmevent_wire::Command::Hello, id) {
        error!(error = %e, "HELLO failed");
        return ExitCode::GenericFailure;
    }
    let query = dmevent_wire::Request {
        id: id.to_string(),
        plugin_name: None,
        device_uuid: None,
        events: dmevent_core::EventMask::empty(),
        timeout_secs: 0,
    };
    match client.request(dmevent_wire::Command::GetParameters, &query) {
        Ok(reply) => {
            println!("{}", reply.rest);
            ExitCode::Success
        }
        Err(e) => {
            error!(error = %e, "GET_PARAMETERS failed");
            ExitCode::GenericFailure
        }
    }
}

fn run_daemon(cli: &Cli) -> ExitCode {
    let config = match cli.lifecycle_config() {
        Ok(c) => c,
        Err(code) => return code,
    };

    let startup_result = match lifecycle::startup(&config) {
        Ok(r) => r,
        Err(e) => {
            error!(error = %e, "startup failed");
            return ExitCode::from(&e);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "could not start async runtime");
            return ExitCode::GenericFailure;
        }
    };

    runtime.block_on(async move {
        let core: CoreHandle = Arc::new(parking_lot::Mutex::new(DaemonCore::new(config.grace, config.exit_sentinel.clone())));
        let scheduler = Scheduler::new(core.clone());
        let monitor = Arc::new(UnimplementedDeviceMonitor);
        let dispatcher_kick = Arc::new(Notify::new());
        let daemon = Arc::new(Daemon::new(core.clone(), scheduler, monitor, dispatcher_kick.clone()));

        spawn_signal_watchers(core.clone(), dispatcher_kick.clone());

        let params = DaemonParams {
            pid: std::process::id(),
            daemonized: startup_result.daemonized,
            supervised: startup_result.mode == StartupMode::Supervised,
            exit_sentinel: config.exit_sentinel.clone(),
        };

        let reader = match tokio::net::unix::pipe::Receiver::from_file(startup_result.fifos.server) {
            Ok(r) => r,
            Err(e) => {
                error!(error = %e, "could not wrap server FIFO for async I/O");
                return ExitCode::DescriptorFailure;
            }
        };
        let writer = match tokio::net::unix::pipe::Sender::from_file(startup_result.fifos.client) {
            Ok(w) => w,
            Err(e) => {
                error!(error = %e, "could not wrap client FIFO for async I/O");
                return ExitCode::DescriptorFailure;
            }
        };

        let dispatcher = Dispatcher::new(reader, writer, daemon, core, dispatcher_kick, PROTOCOL_VERSION, params);
        dispatcher.run().await;
        ExitCode::Success
    })
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli);
    force_c_locale();
    ignore_sigpipe();

    let code = if cli.restart {
        run_restart(&cli)
    } else if cli.info {
        run_info(&cli)
    } else {
        run_daemon(&cli)
    };

    std::process::exit(code as i32);
}
