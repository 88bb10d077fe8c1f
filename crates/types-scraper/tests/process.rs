// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Supervised child process tests against real shell commands.

#![cfg(unix)]

use std::time::{Duration, Instant};
use types_scraper::{ChildProcess, ProcessError, ProcessOptions};

fn collect(child: &mut ChildProcess) -> (Vec<String>, Vec<String>, Option<ProcessError>) {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut error = None;
    for round in child.monitor() {
        match round {
            Ok(round) => {
                if let Some(line) = round.get(0) {
                    stdout.push(line.to_string());
                }
                if let Some(line) = round.get(1) {
                    stderr.push(line.to_string());
                }
            }
            Err(err) => error = Some(err),
        }
    }
    (stdout, stderr, error)
}

#[test]
fn test_stdout_and_stderr_lines() {
    let mut child = ChildProcess::spawn(
        &["sh", "-c", "echo out1; echo err1 >&2; echo out2; echo err2 >&2"],
        ProcessOptions::default(),
    )
    .unwrap();

    let (stdout, stderr, error) = collect(&mut child);
    assert_eq!(stdout, vec!["out1", "out2"]);
    assert_eq!(stderr, vec!["err1", "err2"]);
    assert!(error.is_none());
}

#[test]
fn test_failed_process_reports_exit_code() {
    let mut child =
        ChildProcess::spawn(&["sh", "-c", "echo before; exit 3"], ProcessOptions::default()).unwrap();

    let (stdout, _, error) = collect(&mut child);
    // Output is drained before the failure is reported.
    assert_eq!(stdout, vec!["before"]);
    let error = error.expect("non-zero exit must be reported");
    assert!(matches!(error, ProcessError::Failed { .. }));
    assert_eq!(error.exit_code(), Some(3));
}

#[test]
fn test_piped_lines_reach_child() {
    let mut child = ChildProcess::spawn(&["cat"], ProcessOptions::default()).unwrap();
    child.pipe_stdin(Some("pkg::msg::Foo".to_string()));
    child.pipe_stdin(Some(String::new()));
    child.pipe_stdin(Some("pkg::msg::Bar".to_string()));
    child.pipe_stdin(None);

    let (stdout, stderr, error) = collect(&mut child);
    assert_eq!(stdout, vec!["pkg::msg::Foo", "pkg::msg::Bar"]);
    assert!(stderr.is_empty());
    assert!(error.is_none());
}

#[test]
fn test_request_stop_interrupts_child() {
    let mut child = ChildProcess::spawn(&["sleep", "10"], ProcessOptions::default()).unwrap();
    let stop = child.stop_handle();
    assert_eq!(stop.pid(), child.pid());

    let started = Instant::now();
    let stopper = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(100));
        stop.stop();
        stop.stop();
    });

    let (stdout, _, error) = collect(&mut child);
    stopper.join().unwrap();
    assert!(stdout.is_empty());
    assert!(error.is_none(), "interrupt is a clean exit: {:?}", error);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_child_ignoring_stdin() {
    let mut child = ChildProcess::spawn(&["true"], ProcessOptions::default()).unwrap();
    for i in 0..100 {
        child.pipe_stdin(Some(format!("line {}", i)));
    }
    child.pipe_stdin(None);

    let (_, _, error) = collect(&mut child);
    assert!(error.is_none(), "closed pipe is not an error: {:?}", error);
}

#[test]
fn test_abandoned_monitor_stops_child() {
    let mut child =
        ChildProcess::spawn(&["sh", "-c", "echo ready; exec sleep 20"], ProcessOptions::default())
            .unwrap();

    let started = Instant::now();
    {
        let mut monitor = child.monitor();
        let round = monitor.next().unwrap().unwrap();
        assert_eq!(round.get(0), Some("ready"));
    }
    assert!(started.elapsed() < Duration::from_secs(5));
}
