// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Seed scenario: `--restart` against a pidfile that names no live
//! process — either missing entirely or left over from a pid that is no
//! longer running — takes the `NoPreviousInstance` branch without ever
//! trying to open a FIFO client connection.

use dmevent_core::GraceConfig;
use dmevent_daemon::lifecycle::{restart_handoff, Config, LogTarget, RestartOutcome};

fn base_config(dir: &tempfile::TempDir) -> Config {
    Config {
        server_fifo: dir.path().join("server-fifo"),
        client_fifo: dir.path().join("client-fifo"),
        pid_file: dir.path().join("dmeventd.pid"),
        exit_sentinel: None,
        grace: GraceConfig::default(),
        foreground: true,
        log_target: LogTarget::Stderr,
        debug_level: 0,
    }
}

#[test]
fn a_missing_pidfile_reports_no_previous_instance() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = base_config(&dir);

    let outcome = restart_handoff(&config).expect("no pidfile should not be an error");
    assert_eq!(outcome, RestartOutcome::NoPreviousInstance);
}

#[test]
fn a_stale_pidfile_naming_a_dead_process_reports_no_previous_instance() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = base_config(&dir);
    // A pid far past any plausible live process, left behind by a crash
    // that never cleaned up its pidfile.
    std::fs::write(&config.pid_file, "2147483647\n").expect("write stale pidfile");

    let outcome = restart_handoff(&config).expect("a dead pid should not be an error");
    assert_eq!(outcome, RestartOutcome::NoPreviousInstance);
}
