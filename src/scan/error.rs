// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2026 Bartek Kus
// Feature: PRISMA_IMAGE_SCAN

use crate::config::ConfigError;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failure kinds surfaced to callers. The serialized names are part of the
/// tool contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    ConfigurationError,
    ExecutableNotFound,
    ScanProcessFailed,
    ResultUnreadable,
    Timeout,
    Cancelled,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::ConfigurationError => "ConfigurationError",
            FailureKind::ExecutableNotFound => "ExecutableNotFound",
            FailureKind::ScanProcessFailed => "ScanProcessFailed",
            FailureKind::ResultUnreadable => "ResultUnreadable",
            FailureKind::Timeout => "Timeout",
            FailureKind::Cancelled => "Cancelled",
        }
    }
}

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("scanner configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("scanner executable '{}' was not found: {reason}", .executable.display())]
    ExecutableNotFound { executable: PathBuf, reason: String },

    #[error("scanner failed{}: {message}", exit_suffix(.exit_code))]
    ProcessFailed {
        exit_code: Option<i32>,
        message: String,
        stderr: String,
        partial_output: Option<String>,
    },

    #[error("scan result at '{}' is unreadable: {reason}", .path.display())]
    ResultUnreadable { path: PathBuf, reason: String },

    #[error("scan did not finish within {:?}", .timeout)]
    Timeout { timeout: Duration, stderr: String },

    #[error("scan was cancelled")]
    Cancelled { stderr: String },
}

fn exit_suffix(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!(" with exit code {}", c),
        None => String::new(),
    }
}

impl ScanError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ScanError::Configuration(_) => FailureKind::ConfigurationError,
            ScanError::ExecutableNotFound { .. } => FailureKind::ExecutableNotFound,
            ScanError::ProcessFailed { .. } => FailureKind::ScanProcessFailed,
            ScanError::ResultUnreadable { .. } => FailureKind::ResultUnreadable,
            ScanError::Timeout { .. } => FailureKind::Timeout,
            ScanError::Cancelled { .. } => FailureKind::Cancelled,
        }
    }

    pub fn to_failure(&self) -> ScanFailure {
        let details = match self {
            ScanError::ExecutableNotFound { executable, .. } => Some(json!({
                "executable": executable.display().to_string(),
            })),
            ScanError::ProcessFailed {
                exit_code,
                stderr,
                partial_output,
                ..
            } => Some(json!({
                "exit_code": exit_code,
                "stderr": stderr,
                "partial_output": partial_output,
            })),
            ScanError::ResultUnreadable { reason, .. } => Some(json!({ "reason": reason })),
            ScanError::Timeout { timeout, stderr } => Some(json!({
                "timeout_ms": u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                "stderr": stderr,
            })),
            ScanError::Cancelled { stderr } => Some(json!({ "stderr": stderr })),
            ScanError::Configuration(_) => None,
        };

        ScanFailure {
            kind: self.kind(),
            message: self.to_string(),
            details,
        }
    }
}

/// Caller-visible failure value. Replaces the bare `null` the tool used to
/// return so clients can branch on `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanFailure {
    pub kind: FailureKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}
