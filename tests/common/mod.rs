// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2026 Bartek Kus

#![allow(dead_code)]

use prismascan::{ScanInvoker, ScannerConfig};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use tempfile::TempDir;

pub const API_URL: &str = "https://console.test:8083";
pub const API_TOKEN: &str = "test-token";

// Behaviour is picked by the image name so one script serves every test.
// It is written once, before any test spawns it: writing an executable while
// another thread forks can leave it "text file busy".
const STUB: &str = r#"#!/bin/sh
argv="$*"
out=""
image=""
while [ $# -gt 0 ]; do
  case "$1" in
    --output-file) out="$2"; shift 2 ;;
    --address|--token) shift 2 ;;
    *) image="$1"; shift ;;
  esac
done
case "$image" in
  clean*) printf '{"vulnerabilities": []}' > "$out" ;;
  echo*) sleep 1; printf '{"image": "%s", "output": "%s"}' "$image" "$out" > "$out" ;;
  argv*) printf '{"argv": "%s", "output": "%s"}' "$argv" "$out" > "$out" ;;
  broken*) printf '{"vuln' > "$out" ;;
  remove*) rm -f "$out" ;;
  fail*)
    printf 'partial report' > "$out"
    echo "boom: $out" >&2
    echo "error: image $image not found" >&2
    exit 2 ;;
  slow*)
    echo "out: $out" >&2
    sleep 30
    true ;;
  *) echo "unknown stub mode: $image" >&2; exit 64 ;;
esac
"#;

static STUB_DIR: OnceLock<TempDir> = OnceLock::new();

pub fn stub_scanner() -> PathBuf {
    let dir = STUB_DIR.get_or_init(|| {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("twistcli");
        fs::write(&path, STUB).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        dir
    });
    dir.path().join("twistcli")
}

pub fn config(executable: &Path, timeout: Duration) -> ScannerConfig {
    ScannerConfig {
        executable: executable.to_path_buf(),
        api_url: API_URL.to_string(),
        api_token: API_TOKEN.to_string(),
        timeout,
    }
}

pub fn invoker() -> ScanInvoker {
    ScanInvoker::new(config(&stub_scanner(), Duration::from_secs(20)))
}

pub fn invoker_with_timeout(timeout: Duration) -> ScanInvoker {
    ScanInvoker::new(config(&stub_scanner(), timeout))
}

pub fn missing_invoker() -> ScanInvoker {
    ScanInvoker::new(config(
        Path::new("/nonexistent/prismascan/bin/twistcli"),
        Duration::from_secs(5),
    ))
}
