// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2026 Bartek Kus
// Feature: PRISMA_IMAGE_SCAN

pub mod error;
pub mod process;

pub use error::{FailureKind, ScanError, ScanFailure};
pub use process::CancelToken;

use crate::config::ScannerConfig;
use process::{Captured, WaitOutcome};
use serde_json::Value;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;
use tempfile::TempPath;

const OUTPUT_PREFIX: &str = "twistcli_scan_";
const OUTPUT_SUFFIX: &str = ".json";

/// Runs `twistcli images scan` for one image and returns the JSON report it
/// writes.
///
/// Each call owns a fresh temporary output file and child process, so a
/// single invoker can be shared across threads.
pub struct ScanInvoker {
    config: ScannerConfig,
}

impl ScanInvoker {
    pub fn new(config: ScannerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    pub fn scan(&self, image: &str) -> Result<Value, ScanError> {
        self.scan_with_cancel(image, &CancelToken::new())
    }

    pub fn scan_with_cancel(&self, image: &str, cancel: &CancelToken) -> Result<Value, ScanError> {
        if cancel.is_cancelled() {
            log::info!("Scan of '{}' cancelled before it started", image);
            return Err(ScanError::Cancelled {
                stderr: String::new(),
            });
        }
        let executable = self.resolve_executable()?;

        // Dropping the guard removes the file, whichever way we leave.
        let output = OutputFile::allocate()?;

        log::info!(
            "Scanning image '{}' with {} (output: {})",
            image,
            executable.display(),
            output.path().display()
        );
        let started = Instant::now();

        let mut cmd = Command::new(&executable);
        cmd.args(scan_args(&self.config, output.path(), image));

        let outcome = match process::run_bounded(&mut cmd, self.config.timeout, cancel) {
            Ok(outcome) => outcome,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ScanError::ExecutableNotFound {
                    executable,
                    reason: e.to_string(),
                });
            }
            Err(e) => {
                return Err(ScanError::ProcessFailed {
                    exit_code: None,
                    message: format!("failed to run scanner: {}", e),
                    stderr: String::new(),
                    partial_output: None,
                });
            }
        };

        let result = match outcome {
            WaitOutcome::Exited { status, output: captured } if status.success() => {
                log::debug!("twistcli stdout:\n{}", captured.stdout);
                output.read_json()
            }
            WaitOutcome::Exited { status, output: captured } => {
                Err(process_failed(status.code(), captured, output.read_partial()))
            }
            WaitOutcome::TimedOut { output: captured } => Err(ScanError::Timeout {
                timeout: self.config.timeout,
                stderr: captured.stderr.trim().to_string(),
            }),
            WaitOutcome::Cancelled { output: captured } => Err(ScanError::Cancelled {
                stderr: captured.stderr.trim().to_string(),
            }),
        };

        match &result {
            Ok(_) => log::info!(
                "Scan of '{}' finished in {:.1}s",
                image,
                started.elapsed().as_secs_f64()
            ),
            Err(e) => log::error!("Scan of '{}' failed: {}", image, e),
        }
        result
    }

    /// Honors `TWISTCLI_EXECUTABLE`: bare names go through `PATH`, anything
    /// else is checked as a path.
    fn resolve_executable(&self) -> Result<PathBuf, ScanError> {
        which::which(&self.config.executable).map_err(|e| {
            log::error!(
                "twistcli executable '{}' not found. Set TWISTCLI_EXECUTABLE to its path.",
                self.config.executable.display()
            );
            ScanError::ExecutableNotFound {
                executable: self.config.executable.clone(),
                reason: e.to_string(),
            }
        })
    }
}

/// Positional order is dictated by the twistcli argument grammar.
pub fn scan_args(config: &ScannerConfig, output: &Path, image: &str) -> Vec<String> {
    vec![
        "images".to_string(),
        "scan".to_string(),
        "--address".to_string(),
        config.api_url.clone(),
        "--token".to_string(),
        config.api_token.clone(),
        "--details".to_string(),
        "--output-file".to_string(),
        output.to_string_lossy().into_owned(),
        image.to_string(),
    ]
}

fn process_failed(code: Option<i32>, captured: Captured, partial: Option<String>) -> ScanError {
    let stderr = captured.stderr.trim().to_string();
    match code {
        Some(c) => log::error!("twistcli exited with code {}", c),
        None => log::error!("twistcli was terminated by a signal"),
    }
    if !stderr.is_empty() {
        log::error!("twistcli error output:\n{}", stderr);
    }
    if let Some(partial) = &partial {
        log::error!("twistcli output file contents:\n{}", partial);
    }

    let message = match stderr.lines().last() {
        Some(line) => line.to_string(),
        None if code.is_none() => "terminated by signal".to_string(),
        None => "no error output".to_string(),
    };

    ScanError::ProcessFailed {
        exit_code: code,
        message,
        stderr,
        partial_output: partial,
    }
}

/// Uniquely named scan output file, removed on drop.
struct OutputFile {
    path: PathBuf,
    guard: Option<TempPath>,
}

impl OutputFile {
    fn allocate() -> Result<Self, ScanError> {
        let file = tempfile::Builder::new()
            .prefix(OUTPUT_PREFIX)
            .suffix(OUTPUT_SUFFIX)
            .tempfile()
            .map_err(|e| ScanError::ProcessFailed {
                exit_code: None,
                message: format!("failed to create scan output file: {}", e),
                stderr: String::new(),
                partial_output: None,
            })?;
        let guard = file.into_temp_path();
        Ok(Self {
            path: guard.to_path_buf(),
            guard: Some(guard),
        })
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn read_json(&self) -> Result<Value, ScanError> {
        let unreadable = |reason: String| ScanError::ResultUnreadable {
            path: self.path().to_path_buf(),
            reason,
        };
        let bytes = fs::read(self.path()).map_err(|e| unreadable(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| unreadable(format!("invalid JSON: {}", e)))
    }

    fn read_partial(&self) -> Option<String> {
        fs::read_to_string(self.path())
            .ok()
            .filter(|s| !s.trim().is_empty())
    }
}

impl Drop for OutputFile {
    fn drop(&mut self) {
        if let Some(guard) = self.guard.take() {
            // The scanner may already have replaced or removed it.
            if let Err(e) = guard.close()
                && e.kind() != io::ErrorKind::NotFound
            {
                log::warn!(
                    "Failed to remove scan output file {}: {}",
                    self.path.display(),
                    e
                );
            }
        }
    }
}
