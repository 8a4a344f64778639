// SPDX-FileCopyrightText: © 2025 EdgeKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Structured error types for EdgeKit.
//!
//! This module provides a single error hierarchy for the runtime. All
//! errors implement `Display` and carry a descriptive message so they can
//! be logged or surfaced to configuration tooling as-is.

use thiserror::Error;

/// Main error type for EdgeKit operations.
///
/// This enum categorizes errors into distinct kinds to enable better error
/// handling, logging, and recovery strategies. Each variant includes a
/// descriptive message.
#[derive(Debug, Error)]
pub enum EdgekitError {
    /// Configuration or parameter validation error.
    ///
    /// Examples:
    /// - Malformed pipeline description or JSON document
    /// - Unresolved variable reference in a launch string
    /// - Anonymous element carrying a variable reference
    /// - Out-of-range retry parameter
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A requested entity does not exist.
    ///
    /// Examples:
    /// - Pipeline id not present in the manager
    /// - Variable absent from every property source
    #[error("Not found: {0}")]
    NotFound(String),

    /// An operation was issued against an object in the wrong state.
    ///
    /// Examples:
    /// - Start on a controller whose build failed
    /// - Duplicate pipeline id registered with a manager
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A recoverable runtime fault originating from the streaming
    /// framework (error, warning, or end-of-stream bus events).
    #[error("Transient fault: {0}")]
    Transient(String),

    /// Resource exhaustion or an internal invariant violation.
    #[error("Fatal error: {0}")]
    Fatal(String),

    /// I/O error (property files, device access).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for Results using `EdgekitError`.
pub type Result<T> = std::result::Result<T, EdgekitError>;

// JSON documents arrive from several property sources; a parse failure is
// always a configuration problem.
impl From<serde_json::Error> for EdgekitError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidArgument(format!("JSON parse failure: {err}"))
    }
}
