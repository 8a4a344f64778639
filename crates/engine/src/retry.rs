// SPDX-FileCopyrightText: © 2025 EdgeKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Fault-driven restart supervision.
//!
//! The supervisor subscribes to controllers and tracks one
//! [`RetryState`] per pipeline it has seen fault. Each tracked pipeline
//! gets one worker task that matches the latest fault against the
//! configured policy, sleeps out the computed backoff, and calls
//! `restart` on the controller. A state change back to `Running` counts
//! as success and resets the attempt counter.

use crate::constants::RETRY_IDLE_POLL;
use crate::controller::PipelineController;
use crate::observer::PipelineObserver;
use crate::resolver::Resolver;
use edgekit_core::fault::Fault;
use edgekit_core::retry::RetryPolicy;
use edgekit_core::state::PipelineState;
use opentelemetry::{global, KeyValue};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Per-pipeline supervision bookkeeping.
#[derive(Debug, Clone)]
pub struct RetryState {
    pub attempt_count: u32,
    pub last_fault: Option<Fault>,
    /// Set after a restart was issued; cleared by the next fault. While
    /// set, the worker idles instead of retrying.
    pub awaiting_success: bool,
}

struct RetryShared {
    pipeline: Arc<PipelineController>,
    state: StdMutex<RetryState>,
    cancel: CancellationToken,
}

impl RetryShared {
    #[allow(clippy::unwrap_used)]
    fn state_locked(&self) -> std::sync::MutexGuard<'_, RetryState> {
        self.state.lock().unwrap()
    }
}

struct RetryEntry {
    shared: Arc<RetryShared>,
    worker: JoinHandle<()>,
}

/// Observes controllers and schedules restarts with backoff for faults
/// matching the configured policy.
pub struct RetrySupervisor {
    policy: RetryPolicy,
    entries: StdMutex<HashMap<String, RetryEntry>>,
    restarts_counter: opentelemetry::metrics::Counter<u64>,
}

impl RetrySupervisor {
    pub fn new(policy: RetryPolicy) -> Arc<Self> {
        let meter = global::meter("edgekit_engine");
        Arc::new(Self {
            policy,
            entries: StdMutex::new(HashMap::new()),
            restarts_counter: meter
                .u64_counter("pipeline.supervised_restarts")
                .with_description("Restarts issued by the retry supervisor")
                .build(),
        })
    }

    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Snapshot of a pipeline's retry bookkeeping, if it is tracked.
    pub fn retry_state(&self, pipeline_id: &str) -> Option<RetryState> {
        self.entries_locked().get(pipeline_id).map(|entry| entry.shared.state_locked().clone())
    }

    /// Stops supervising a pipeline: cancels its worker, waits for it to
    /// exit, and drops the retry state.
    pub async fn forget(&self, pipeline_id: &str) {
        let entry = self.entries_locked().remove(pipeline_id);
        if let Some(entry) = entry {
            entry.shared.cancel.cancel();
            if let Err(e) = entry.worker.await {
                tracing::error!(pipeline_id, error = %e, "retry worker panicked");
            }
            tracing::debug!(pipeline_id, "retry supervision released");
        }
    }

    /// Stops every worker. Used when the supervisor is replaced or the
    /// manager tears down.
    pub async fn shutdown(&self) {
        let entries: Vec<(String, RetryEntry)> = self.entries_locked().drain().collect();
        for (pipeline_id, entry) in entries {
            entry.shared.cancel.cancel();
            if let Err(e) = entry.worker.await {
                tracing::error!(pipeline_id = %pipeline_id, error = %e, "retry worker panicked");
            }
        }
    }

    #[allow(clippy::unwrap_used)]
    fn entries_locked(&self) -> std::sync::MutexGuard<'_, HashMap<String, RetryEntry>> {
        self.entries.lock().unwrap()
    }
}

impl PipelineObserver for RetrySupervisor {
    fn on_fault(&self, pipeline: &Arc<PipelineController>, fault: &Fault) {
        let mut entries = self.entries_locked();
        if let Some(entry) = entries.get(pipeline.id()) {
            let mut state = entry.shared.state_locked();
            state.last_fault = Some(fault.clone());
            state.awaiting_success = false;
            return;
        }
        tracing::debug!(pipeline_id = %pipeline.id(), "starting retry supervision");
        let shared = Arc::new(RetryShared {
            pipeline: pipeline.clone(),
            state: StdMutex::new(RetryState {
                attempt_count: 0,
                last_fault: Some(fault.clone()),
                awaiting_success: false,
            }),
            cancel: CancellationToken::new(),
        });
        let worker = tokio::spawn(worker_loop(
            self.policy.clone(),
            shared.clone(),
            self.restarts_counter.clone(),
        ));
        entries.insert(pipeline.id().to_string(), RetryEntry { shared, worker });
    }

    fn on_state_change(
        &self,
        pipeline: &Arc<PipelineController>,
        _old: PipelineState,
        new: PipelineState,
    ) {
        if new != PipelineState::Running {
            return;
        }
        let entries = self.entries_locked();
        let Some(entry) = entries.get(pipeline.id()) else {
            return;
        };
        if entry.shared.cancel.is_cancelled() {
            return;
        }
        let mut state = entry.shared.state_locked();
        if state.attempt_count != 0 {
            tracing::info!(
                pipeline_id = %pipeline.id(),
                attempts = state.attempt_count,
                "pipeline recovered after supervised restart"
            );
        }
        state.attempt_count = 0;
        state.awaiting_success = true;
    }
}

/// One worker per supervised pipeline.
async fn worker_loop(
    policy: RetryPolicy,
    shared: Arc<RetryShared>,
    restarts_counter: opentelemetry::metrics::Counter<u64>,
) {
    let pipeline_id = shared.pipeline.id().to_string();
    loop {
        if shared.cancel.is_cancelled() {
            break;
        }
        let actionable = {
            let state = shared.state_locked();
            if state.awaiting_success { None } else { state.last_fault.clone() }
        };
        let Some(fault) = actionable else {
            if idle_tick(&shared.cancel).await {
                continue;
            }
            break;
        };
        if !policy.matches(&fault) {
            if idle_tick(&shared.cancel).await {
                continue;
            }
            break;
        }
        let delay_ms = {
            let mut state = shared.state_locked();
            let raw = policy.raw_delay_ms(state.attempt_count);
            if raw > policy.max_delay_ms {
                // Sticky clamp: walking the counter back pins the
                // computed delay at max on subsequent retries.
                state.attempt_count = state.attempt_count.saturating_sub(1);
                policy.max_delay_ms
            } else {
                raw
            }
        };
        tracing::info!(
            pipeline_id = %pipeline_id,
            delay_ms,
            %fault,
            "scheduling supervised restart"
        );
        tokio::select! {
            () = shared.cancel.cancelled() => break,
            () = tokio::time::sleep(Duration::from_millis(delay_ms)) => {},
        }
        shared.state_locked().attempt_count += 1;
        restarts_counter.add(1, &[KeyValue::new("pipeline_id", pipeline_id.clone())]);
        if let Err(e) = shared.pipeline.restart().await {
            tracing::warn!(pipeline_id = %pipeline_id, error = %e, "supervised restart failed");
        }
        shared.state_locked().awaiting_success = true;
    }
}

/// Cancellable idle sleep; returns `false` when the worker should exit.
async fn idle_tick(cancel: &CancellationToken) -> bool {
    tokio::select! {
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(RETRY_IDLE_POLL) => true,
    }
}

/// Reads the optional `retry` property through the resolver chain.
///
/// A missing property or an unreadable chain yields the default policy.
pub async fn policy_from_properties(resolver: &Resolver) -> RetryPolicy {
    match resolver.try_get("retry").await {
        Ok(Some(variable)) => RetryPolicy::from_json(&variable.value),
        Ok(None) => RetryPolicy::default(),
        Err(e) => {
            tracing::warn!(error = %e, "failed to read retry property, using default policy");
            RetryPolicy::default()
        },
    }
}
