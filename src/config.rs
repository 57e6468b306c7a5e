// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2026 Bartek Kus
// Feature: SCANNER_CONFIG

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const ENV_EXECUTABLE: &str = "TWISTCLI_EXECUTABLE";
pub const ENV_API_URL: &str = "TWISTLOCK_API_URL";
pub const ENV_API_TOKEN: &str = "TWISTLOCK_API_TOKEN";
pub const ENV_TIMEOUT_SECS: &str = "TWISTCLI_TIMEOUT_SECS";

pub const DEFAULT_TIMEOUT_SECS: u64 = 600;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variables: {}", .0.join(", "))]
    Missing(Vec<&'static str>),
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Connection parameters for the scanner, validated once at startup.
#[derive(Clone)]
pub struct ScannerConfig {
    pub executable: PathBuf,
    pub api_url: String,
    pub api_token: String,
    pub timeout: Duration,
}

impl ScannerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary variable source.
    ///
    /// Every required variable is checked before returning so the error names
    /// all of the missing ones at once. Blank values count as missing.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let executable = read(ENV_EXECUTABLE);
        let api_url = read(ENV_API_URL);
        let api_token = read(ENV_API_TOKEN);

        let mut missing = Vec::new();
        if executable.is_none() {
            missing.push(ENV_EXECUTABLE);
        }
        if api_url.is_none() {
            missing.push(ENV_API_URL);
        }
        if api_token.is_none() {
            missing.push(ENV_API_TOKEN);
        }

        let (Some(executable), Some(api_url), Some(api_token)) = (executable, api_url, api_token)
        else {
            return Err(ConfigError::Missing(missing));
        };

        let timeout = match read(ENV_TIMEOUT_SECS) {
            None => Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            Some(raw) => match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    return Err(ConfigError::Invalid {
                        var: ENV_TIMEOUT_SECS,
                        reason: format!("expected a positive number of seconds, got '{}'", raw),
                    });
                }
            },
        };

        Ok(Self {
            executable: PathBuf::from(executable),
            api_url,
            api_token,
            timeout,
        })
    }
}

// The token is a credential; keep it out of logs and panic messages.
impl fmt::Debug for ScannerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScannerConfig")
            .field("executable", &self.executable)
            .field("api_url", &self.api_url)
            .field("api_token", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}
