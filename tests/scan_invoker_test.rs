// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2026 Bartek Kus

#![cfg(unix)]

mod common;

use prismascan::scan::CancelToken;
use prismascan::{FailureKind, ScanError};
use serde_json::json;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

fn output_path(report: &serde_json::Value) -> PathBuf {
    PathBuf::from(report["output"].as_str().expect("stub reports its output path"))
}

// The slow stub announces its output file on stderr before sleeping.
fn announced_path(stderr: &str) -> PathBuf {
    stderr
        .lines()
        .find_map(|l| l.strip_prefix("out: "))
        .map(PathBuf::from)
        .expect("stub prints its output path")
}

#[test]
fn test_returns_report_verbatim() {
    let report = common::invoker().scan("clean:latest").unwrap();
    assert_eq!(report, json!({ "vulnerabilities": [] }));
}

#[test]
fn test_arguments_follow_twistcli_grammar() {
    let report = common::invoker().scan("argv-image:1.0").unwrap();
    let out = output_path(&report);

    let expected = format!(
        "images scan --address {} --token {} --details --output-file {} argv-image:1.0",
        common::API_URL,
        common::API_TOKEN,
        out.display()
    );
    assert_eq!(report["argv"], expected);

    let name = out.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("twistcli_scan_"), "unexpected name {}", name);
    assert!(name.ends_with(".json"), "unexpected name {}", name);
}

#[test]
fn test_output_file_removed_after_success() {
    let report = common::invoker().scan("argv-cleanup").unwrap();
    assert!(!output_path(&report).exists());
}

#[test]
fn test_non_zero_exit_is_process_failure() {
    let err = common::invoker().scan("fail-image").unwrap_err();
    assert_eq!(err.kind(), FailureKind::ScanProcessFailed);

    match &err {
        ScanError::ProcessFailed {
            exit_code,
            message,
            stderr,
            partial_output,
        } => {
            assert_eq!(*exit_code, Some(2));
            assert_eq!(message, "error: image fail-image not found");
            assert!(!stderr.is_empty());
            assert_eq!(partial_output.as_deref(), Some("partial report"));

            // The stub echoes the output path on stderr.
            let path = stderr
                .lines()
                .find_map(|l| l.strip_prefix("boom: "))
                .expect("stub prints its output path");
            assert!(!PathBuf::from(path).exists(), "{} was left behind", path);
        }
        other => panic!("unexpected error: {:?}", other),
    }

    let failure = err.to_failure();
    assert_eq!(failure.details.unwrap()["exit_code"], 2);
}

#[test]
fn test_missing_executable() {
    let err = common::missing_invoker().scan("clean").unwrap_err();
    assert_eq!(err.kind(), FailureKind::ExecutableNotFound);
    assert!(err.to_string().contains("/nonexistent/prismascan/bin/twistcli"));
}

#[test]
fn test_invalid_json_is_unreadable() {
    let err = common::invoker().scan("broken-image").unwrap_err();
    assert_eq!(err.kind(), FailureKind::ResultUnreadable);
    match err {
        ScanError::ResultUnreadable { path, reason } => {
            assert!(reason.contains("invalid JSON"), "reason: {}", reason);
            assert!(!path.exists());
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn test_missing_output_file_is_unreadable() {
    let err = common::invoker().scan("remove-output").unwrap_err();
    assert_eq!(err.kind(), FailureKind::ResultUnreadable);
}

#[test]
fn test_timeout_kills_scan_and_cleans_up() {
    let started = Instant::now();
    let err = common::invoker_with_timeout(Duration::from_millis(300))
        .scan("slow-image")
        .unwrap_err();

    // The stub's shell forks `sleep`, so the scanner's own child holds the
    // pipes; the group kill must still return well before it would finish.
    assert_eq!(err.kind(), FailureKind::Timeout);
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(err.to_failure().details.unwrap()["timeout_ms"], 300);

    match &err {
        ScanError::Timeout { stderr, .. } => {
            let path = announced_path(stderr);
            assert!(!path.exists(), "{} was left behind", path.display());
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn test_cancel_stops_running_scan() {
    let invoker = common::invoker();
    let cancel = CancelToken::new();

    let started = Instant::now();
    let err = thread::scope(|s| {
        let handle = s.spawn(|| invoker.scan_with_cancel("slow-image", &cancel));
        thread::sleep(Duration::from_millis(200));
        cancel.cancel();
        handle.join().unwrap()
    })
    .unwrap_err();

    assert_eq!(err.kind(), FailureKind::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(10));

    match &err {
        ScanError::Cancelled { stderr } => {
            let path = announced_path(stderr);
            assert!(!path.exists(), "{} was left behind", path.display());
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn test_concurrent_scans_are_isolated() {
    let invoker = common::invoker();

    let (a, b) = thread::scope(|s| {
        let a = s.spawn(|| invoker.scan("echo-alpha"));
        let b = s.spawn(|| invoker.scan("echo-beta"));
        (a.join().unwrap().unwrap(), b.join().unwrap().unwrap())
    });

    assert_eq!(a["image"], "echo-alpha");
    assert_eq!(b["image"], "echo-beta");

    let (path_a, path_b) = (output_path(&a), output_path(&b));
    assert_ne!(path_a, path_b);
    assert!(!path_a.exists());
    assert!(!path_b.exists());
}
