// SPDX-FileCopyrightText: © 2025 EdgeKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Shared timing and capacity constants for the pipeline engine.
//!
//! This module provides the canonical default values for the runtime's
//! waits, polls, and channel sizes so the controller, supervisor, and
//! manager stay consistent.

use std::time::Duration;

// === State Machine Timing ===

/// Default time a state request waits for the graph to commit to the
/// target before giving up.
///
/// Graph transitions are asynchronous; real sources can take a while to
/// preroll. Waiters also wake early when the pipeline errors or a newer
/// state request supersedes theirs.
pub const DEFAULT_STATE_WAIT: Duration = Duration::from_millis(3000);

/// How long `stop()` waits for the bus loop task to exit after
/// cancellation before abandoning the join.
pub const BUS_LOOP_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

// === Retry Supervisor Timing ===

/// Idle polling interval for retry workers with nothing actionable
/// (awaiting a success, or holding a fault no rule matches).
///
/// Cheap enough to keep workers responsive to newly recorded faults
/// without a dedicated wakeup channel.
pub const RETRY_IDLE_POLL: Duration = Duration::from_millis(100);

// === Channel Capacities ===

/// Default buffer size for a graph's bus channel in the mock framework.
///
/// Real frameworks own their bus; this only bounds test traffic.
pub const DEFAULT_BUS_CAPACITY: usize = 64;
