// SPDX-FileCopyrightText: © 2025 EdgeKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Pipeline state machine and status reporting.
//!
//! ## State Machine
//!
//! Pipelines transition through these states during their lifecycle:
//!
//! ```text
//!     Initialized ──────────┐
//!          ↓                │
//!       Running ←──┐        │
//!        ↓   ↓     │        │
//!  Suspended EndOfStream    │
//!        ↓                  │
//!       Stopped ←───────────┤
//!                           │
//!       Errored ←───────────┘
//! ```
//!
//! ### Valid Transitions:
//! - `Initialized` → `Running` (start; passes through the framework's
//!   preparing window, visible to subscribers as `Suspended`)
//! - `Running` → `Suspended` (pause) and `Suspended` → `Running` (resume;
//!   a single resume is supported, repeated pause/resume cycles are not
//!   promised)
//! - `Running` → `EndOfStream` (finite source drained)
//! - Any state → `Stopped` (stop; always succeeds, frees all framework
//!   resources)
//! - Any state → `Errored` (fatal fault; sticky until the next
//!   successful build)
//! - `Stopped`/`Errored`/`EndOfStream` → `Initialized` (rebuild)

use crate::fault::Fault;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Observable lifecycle state of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Graph built, no data flowing yet.
    Initialized,
    /// Graph is live and processing.
    Running,
    /// Graph is paused; resources retained.
    Suspended,
    /// No graph resources are owned in this state.
    Stopped,
    /// The stream finished; terminal until restart.
    EndOfStream,
    /// A fatal fault or failed build; terminal until restart.
    Errored,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initialized => "initialized",
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::Stopped => "stopped",
            Self::EndOfStream => "end_of_stream",
            Self::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// Coarse health indicator carried on [`PipelineStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    Ok,
    Error,
}

/// Human-readable status reflecting a pipeline's most recent transition.
///
/// An `Error` status persists until the next successful build, even
/// across stops, so operators can always see the last fault.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineStatus {
    pub code: StatusCode,
    pub description: String,
    pub last_fault: Option<Fault>,
}

impl PipelineStatus {
    pub fn ok(description: impl Into<String>) -> Self {
        Self { code: StatusCode::Ok, description: description.into(), last_fault: None }
    }

    pub fn errored(description: impl Into<String>, fault: Option<Fault>) -> Self {
        Self { code: StatusCode::Error, description: description.into(), last_fault: fault }
    }

    pub const fn is_errored(&self) -> bool {
        matches!(self.code, StatusCode::Error)
    }
}

impl Default for PipelineStatus {
    fn default() -> Self {
        Self::ok("created")
    }
}
