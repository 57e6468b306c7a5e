// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2026 Bartek Kus
// Feature: MCP_ROUTER

pub mod config;
pub mod router;
pub mod scan;
pub mod transport;

pub use config::ScannerConfig;
pub use scan::{FailureKind, ScanError, ScanFailure, ScanInvoker};
