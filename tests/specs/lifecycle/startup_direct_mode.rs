// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Seed scenario: with `foreground = true` and no supervised-handoff
//! environment present, `lifecycle::startup` takes the direct path — no
//! fork, a freshly created FIFO pair, and a pidfile holding our own pid.

use std::os::unix::fs::FileTypeExt;

use dmevent_core::GraceConfig;
use dmevent_daemon::lifecycle::{self, Config, LogTarget, StartupMode};

#[test]
#[serial_test::serial(dmeventd_activation_env)]
fn direct_startup_provisions_fifos_and_a_pidfile_without_forking() {
    std::env::remove_var("DMEVENTD_ACTIVATION");
    std::env::remove_var("DMEVENTD_PID");
    std::env::remove_var("DMEVENTD_FDS");

    let dir = tempfile::tempdir().expect("tempdir");
    let config = Config {
        server_fifo: dir.path().join("server-fifo"),
        client_fifo: dir.path().join("client-fifo"),
        pid_file: dir.path().join("dmeventd.pid"),
        exit_sentinel: None,
        grace: GraceConfig::default(),
        foreground: true,
        log_target: LogTarget::Stderr,
        debug_level: 0,
    };

    let result = lifecycle::startup(&config).expect("direct startup should succeed in the foreground");

    assert_eq!(result.mode, StartupMode::Direct);
    assert!(!result.daemonized, "foreground startup must never fork");

    let server_meta = result.fifos.server.metadata().expect("server fifo metadata");
    let client_meta = result.fifos.client.metadata().expect("client fifo metadata");
    assert!(server_meta.file_type().is_fifo());
    assert!(client_meta.file_type().is_fifo());

    let pid_contents = std::fs::read_to_string(&config.pid_file).expect("pidfile readable");
    assert_eq!(pid_contents.trim(), std::process::id().to_string());
}

#[test]
#[serial_test::serial(dmeventd_activation_env)]
fn a_malformed_activation_env_falls_back_to_direct_startup() {
    std::env::set_var("DMEVENTD_ACTIVATION", "1");
    std::env::set_var("DMEVENTD_PID", "not-a-real-pid");
    std::env::set_var("DMEVENTD_FDS", "2");

    let dir = tempfile::tempdir().expect("tempdir");
    let config = Config {
        server_fifo: dir.path().join("server-fifo"),
        client_fifo: dir.path().join("client-fifo"),
        pid_file: dir.path().join("dmeventd.pid"),
        exit_sentinel: None,
        grace: GraceConfig::default(),
        foreground: true,
        log_target: LogTarget::Stderr,
        debug_level: 0,
    };

    let result = lifecycle::startup(&config).expect("a mismatched pid should fall through to direct startup");
    assert_eq!(result.mode, StartupMode::Direct);

    // take_activation_env always scrubs the three variables, win or lose.
    assert!(std::env::var("DMEVENTD_ACTIVATION").is_err());
    assert!(std::env::var("DMEVENTD_PID").is_err());
    assert!(std::env::var("DMEVENTD_FDS").is_err());
}
