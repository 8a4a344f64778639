// SPDX-FileCopyrightText: © 2025 EdgeKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Per-pipeline lifecycle controller.
//!
//! A controller owns exactly one graph and drives it through the
//! pipeline state machine. Bus messages are consumed by one owned task
//! per controller; classified faults and observed state changes are
//! dispatched to subscribers from that task, without the controller's
//! state lock held, so handlers may call back in.
//!
//! State requests are arbitrated through a single latest-requested-target
//! slot: when requests race, only the most recent one keeps waiting, and
//! superseded waiters return unsuccessfully. Build failures are sticky:
//! `start` refuses with `InvalidState` until the next successful build.
//! A single pause/resume hop is supported; repeated pause/resume cycles
//! are not promised.

use crate::builder::{build_graph, Graph};
use crate::classifier::classify;
use crate::constants::{BUS_LOOP_JOIN_TIMEOUT, DEFAULT_STATE_WAIT};
use crate::observer::PipelineObserver;
use crate::resolver::Resolver;
use edgekit_core::description::PipelineDescription;
use edgekit_core::error::{EdgekitError, Result};
use edgekit_core::fault::FaultSeverity;
use edgekit_core::framework::{
    BusMessage, FrameworkElement, FrameworkGraph, GraphState, PropertyValue, StreamingFramework,
};
use edgekit_core::state::{PipelineState, PipelineStatus};
use edgekit_core::variable::Variable;
use opentelemetry::{global, KeyValue};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Controller-owned state guarded by the per-controller lock.
struct ControllerInner {
    description: PipelineDescription,
    graph: Option<GraphRuntime>,
    status: PipelineStatus,
    /// Sticky build failure; cleared only by a successful build.
    build_failed: bool,
}

/// A live graph plus the bus loop that serves it.
struct GraphRuntime {
    graph: Graph,
    cancel: CancellationToken,
    bus_task: JoinHandle<()>,
}

/// Owns one graph and its deterministic state machine.
pub struct PipelineController {
    id: String,
    framework: Arc<dyn StreamingFramework>,
    resolver: Arc<Resolver>,
    inner: Mutex<ControllerInner>,
    /// Observed pipeline state; doubles as the waiters' condition.
    state_tx: watch::Sender<PipelineState>,
    subscribers: StdMutex<Vec<Arc<dyn PipelineObserver>>>,
    /// Most recent state request; racing requests are resolved by
    /// letting only the current holder keep waiting.
    latest_target: StdMutex<Option<PipelineState>>,
    transitions_counter: opentelemetry::metrics::Counter<u64>,
}

impl PipelineController {
    pub fn new(
        framework: Arc<dyn StreamingFramework>,
        resolver: Arc<Resolver>,
        description: PipelineDescription,
    ) -> Arc<Self> {
        let meter = global::meter("edgekit_engine");
        let (state_tx, _state_rx) = watch::channel(PipelineState::Initialized);
        Arc::new(Self {
            id: description.id.clone(),
            framework,
            resolver,
            inner: Mutex::new(ControllerInner {
                description,
                graph: None,
                status: PipelineStatus::default(),
                build_failed: false,
            }),
            state_tx,
            subscribers: StdMutex::new(Vec::new()),
            latest_target: StdMutex::new(None),
            transitions_counter: meter
                .u64_counter("pipeline.state_transitions")
                .with_description("Pipeline state transitions")
                .build(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Last observed pipeline state.
    pub fn state(&self) -> PipelineState {
        *self.state_tx.borrow()
    }

    /// A receiver observing every state transition.
    pub fn watch_state(&self) -> watch::Receiver<PipelineState> {
        self.state_tx.subscribe()
    }

    pub async fn status(&self) -> PipelineStatus {
        self.inner.lock().await.status.clone()
    }

    pub async fn description(&self) -> PipelineDescription {
        self.inner.lock().await.description.clone()
    }

    /// Registers a subscriber for fault and state-change events.
    pub fn subscribe(&self, subscriber: Arc<dyn PipelineObserver>) {
        self.subscribers_locked().push(subscriber);
    }

    /// Removes a subscriber. An in-flight dispatch to it completes; it
    /// receives no further events.
    pub fn unsubscribe(&self, subscriber: &Arc<dyn PipelineObserver>) {
        self.subscribers_locked().retain(|s| !Arc::ptr_eq(s, subscriber));
    }

    /// Builds the graph from the current description.
    ///
    /// On failure the controller enters `Errored` with no live graph and
    /// no bus task, and refuses `start` until the next successful build.
    pub async fn build(self: &Arc<Self>) -> Result<()> {
        match self.install_build(None).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.publish_state(PipelineState::Errored);
                Err(e)
            },
        }
    }

    /// Requests `Running` and waits for the graph to commit to it.
    ///
    /// Valid from `Initialized`, `Stopped` (rebuilds first, since a
    /// stopped controller owns no graph), and `Suspended`. A no-op when
    /// already running.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        {
            let inner = self.inner.lock().await;
            if inner.build_failed {
                return Err(EdgekitError::InvalidState(format!(
                    "pipeline '{}' cannot start: {}",
                    self.id, inner.status.description
                )));
            }
        }
        let current = self.state();
        match current {
            PipelineState::Running => return Ok(()),
            PipelineState::Initialized | PipelineState::Stopped | PipelineState::Suspended => {},
            PipelineState::EndOfStream | PipelineState::Errored => {
                return Err(EdgekitError::InvalidState(format!(
                    "pipeline '{}' cannot start from state {current}; restart it instead",
                    self.id
                )));
            },
        }
        let owns_graph = self.inner.lock().await.graph.is_some();
        if !owns_graph {
            self.install_build(None).await?;
        }
        if self.transition(PipelineState::Running, DEFAULT_STATE_WAIT).await? {
            Ok(())
        } else {
            Err(EdgekitError::Transient(format!(
                "pipeline '{}' did not reach running: {}",
                self.id,
                self.status().await.description
            )))
        }
    }

    /// Requests `Suspended` from `Running`.
    pub async fn pause(self: &Arc<Self>) -> Result<()> {
        if self.state() != PipelineState::Running {
            return Err(EdgekitError::InvalidState(format!(
                "pipeline '{}' can only pause while running (currently {})",
                self.id,
                self.state()
            )));
        }
        if self.transition(PipelineState::Suspended, DEFAULT_STATE_WAIT).await? {
            Ok(())
        } else {
            Err(EdgekitError::Transient(format!(
                "pipeline '{}' did not reach suspended",
                self.id
            )))
        }
    }

    /// Tears the graph down and drives the state to `Stopped`.
    ///
    /// Best-effort: teardown errors are logged, never propagated, and
    /// the controller ends up owning no framework resources either way.
    pub async fn stop(self: &Arc<Self>) -> Result<()> {
        *self.latest_target_locked() = Some(PipelineState::Stopped);
        let runtime = self.inner.lock().await.graph.take();
        if let Some(runtime) = runtime {
            if let Err(e) = runtime.graph.handle.request_state(GraphState::Null).await {
                tracing::warn!(pipeline_id = %self.id, error = %e, "teardown state change failed");
            }
            runtime.cancel.cancel();
            match tokio::time::timeout(BUS_LOOP_JOIN_TIMEOUT, runtime.bus_task).await {
                Ok(Ok(())) => {},
                Ok(Err(e)) => {
                    tracing::error!(pipeline_id = %self.id, error = %e, "bus loop task panicked");
                },
                Err(_) => {
                    tracing::warn!(pipeline_id = %self.id, "bus loop did not exit before timeout");
                },
            }
        }
        {
            // An errored status stays visible across stops until the
            // next successful build.
            let mut inner = self.inner.lock().await;
            if !inner.status.is_errored() {
                inner.status = PipelineStatus::ok("stopped");
            }
        }
        self.publish_state(PipelineState::Stopped);
        Ok(())
    }

    /// Stop, rebuild from the current description, start.
    pub async fn restart(self: &Arc<Self>) -> Result<()> {
        tracing::info!(pipeline_id = %self.id, "restarting pipeline");
        self.stop().await?;
        self.start().await
    }

    /// Replaces the definition: stop, build the new definition, start.
    ///
    /// Atomic on failure: if the new definition does not build, the
    /// controller stays `Stopped` with an errored status and the stored
    /// description unchanged.
    pub async fn change_definition(self: &Arc<Self>, definition: impl Into<String>) -> Result<()> {
        let definition = definition.into();
        if definition.trim().is_empty() {
            return Err(EdgekitError::InvalidArgument(format!(
                "pipeline '{}' cannot change to an empty definition",
                self.id
            )));
        }
        let new_description = {
            let inner = self.inner.lock().await;
            PipelineDescription { definition, ..inner.description.clone() }
        };
        self.stop().await?;
        self.install_build(Some(new_description)).await?;
        self.start().await
    }

    /// Re-resolves this pipeline's variables and applies any that
    /// changed: mutable variables are patched on the live node, a
    /// changed immutable variable forces a restart.
    pub async fn refresh(self: &Arc<Self>) -> Result<()> {
        let changed = self.resolver.refresh().await?;
        self.apply_stale(&changed).await
    }

    /// Applies an already-computed set of changed variable names.
    pub(crate) async fn apply_stale(self: &Arc<Self>, changed: &BTreeSet<String>) -> Result<()> {
        if changed.is_empty() {
            return Ok(());
        }
        let mut needs_restart = false;
        let mut patches: Vec<(Arc<dyn FrameworkElement>, String, Variable)> = Vec::new();
        {
            let inner = self.inner.lock().await;
            let Some(runtime) = &inner.graph else {
                return Ok(());
            };
            for binding in &runtime.graph.bindings {
                if !changed.contains(&binding.variable) {
                    continue;
                }
                let variable = self.resolver.get(&binding.variable).await?;
                if variable.immutable {
                    needs_restart = true;
                    continue;
                }
                let Some(element) = runtime.graph.elements.get(&binding.element) else {
                    continue;
                };
                patches.push((element.clone(), binding.property.clone(), variable));
            }
        }
        for (element, property, variable) in patches {
            let value = PropertyValue::parse_lenient(&variable.expansion_text());
            tracing::info!(
                pipeline_id = %self.id,
                element = %element.name(),
                property = %property,
                %value,
                "patching stale variable in place"
            );
            element.set_property(&property, value).await?;
        }
        if needs_restart {
            tracing::info!(pipeline_id = %self.id, "immutable variable changed, rebuilding");
            self.restart().await?;
        }
        Ok(())
    }

    /// Builds a graph and installs it, committing the description only
    /// on success. The caller must ensure no graph is currently owned.
    async fn install_build(
        self: &Arc<Self>,
        new_description: Option<PipelineDescription>,
    ) -> Result<()> {
        let description = {
            let inner = self.inner.lock().await;
            if inner.graph.is_some() {
                return Err(EdgekitError::InvalidState(format!(
                    "pipeline '{}' already owns a graph; stop it before rebuilding",
                    self.id
                )));
            }
            new_description.unwrap_or_else(|| inner.description.clone())
        };
        match build_graph(&self.framework, &self.id, &description.definition, &self.resolver).await
        {
            Ok(graph) => {
                let cancel = CancellationToken::new();
                let bus_task = tokio::spawn(Self::bus_loop(
                    Arc::downgrade(self),
                    graph.handle.clone(),
                    cancel.clone(),
                ));
                {
                    let mut inner = self.inner.lock().await;
                    inner.graph = Some(GraphRuntime { graph, cancel, bus_task });
                    inner.description = description;
                    inner.build_failed = false;
                    inner.status = PipelineStatus::ok("graph built");
                }
                self.publish_state(PipelineState::Initialized);
                Ok(())
            },
            Err(e) => {
                tracing::error!(pipeline_id = %self.id, error = %e, "graph build failed");
                let mut inner = self.inner.lock().await;
                inner.build_failed = true;
                inner.status = PipelineStatus::errored(format!("build failed: {e}"), None);
                Err(e)
            },
        }
    }

    /// Requests a framework transition and waits for the outcome.
    ///
    /// Returns `Ok(true)` when the target was reached, `Ok(false)` when
    /// the pipeline errored, the wait timed out, or a newer request
    /// superseded this one.
    async fn transition(
        self: &Arc<Self>,
        target: PipelineState,
        wait: Duration,
    ) -> Result<bool> {
        let graph_target = match target {
            PipelineState::Running => GraphState::Playing,
            PipelineState::Suspended => GraphState::Paused,
            PipelineState::Stopped => GraphState::Null,
            other => {
                return Err(EdgekitError::InvalidArgument(format!(
                    "{other} is not a requestable state"
                )));
            },
        };
        *self.latest_target_locked() = Some(target);
        let handle = {
            let inner = self.inner.lock().await;
            let Some(runtime) = &inner.graph else {
                return Err(EdgekitError::InvalidState(format!(
                    "pipeline '{}' owns no graph",
                    self.id
                )));
            };
            runtime.graph.handle.clone()
        };
        handle.request_state(graph_target).await?;
        Ok(self.wait_for(target, wait).await)
    }

    /// Waits until the observed state reaches `target`, the pipeline
    /// errors, a newer request supersedes this one, or `wait` elapses.
    async fn wait_for(&self, target: PipelineState, wait: Duration) -> bool {
        let mut rx = self.state_tx.subscribe();
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let current = *rx.borrow_and_update();
            if current == target {
                return true;
            }
            if current == PipelineState::Errored {
                return false;
            }
            if *self.latest_target_locked() != Some(target) {
                tracing::debug!(
                    pipeline_id = %self.id,
                    %target,
                    "state wait superseded by a newer request"
                );
                return false;
            }
            match tokio::time::timeout_at(deadline, rx.changed()).await {
                Ok(Ok(())) => {},
                Ok(Err(_)) | Err(_) => return false,
            }
        }
    }

    /// Consumes the graph's bus until cancelled or the bus drains.
    ///
    /// Holds only a weak reference so an abandoned controller is not
    /// kept alive by its own bus loop.
    async fn bus_loop(
        weak: Weak<Self>,
        handle: Arc<dyn FrameworkGraph>,
        cancel: CancellationToken,
    ) {
        loop {
            let message = tokio::select! {
                () = cancel.cancelled() => break,
                message = handle.poll_bus() => match message {
                    Some(message) => message,
                    None => break,
                },
            };
            let Some(controller) = weak.upgrade() else { break };
            controller.handle_bus_message(message).await;
        }
    }

    /// Processes one bus message on the bus-loop task.
    ///
    /// For a fault, subscribers receive `on_fault` before any state
    /// change resulting from the same incident.
    async fn handle_bus_message(self: &Arc<Self>, message: BusMessage) {
        if let Some(fault) = classify(&message) {
            tracing::info!(pipeline_id = %self.id, %fault, "fault observed on bus");
            for subscriber in self.subscriber_snapshot() {
                subscriber.on_fault(self, &fault);
            }
            match fault.severity {
                FaultSeverity::Error => {
                    {
                        let mut inner = self.inner.lock().await;
                        inner.status =
                            PipelineStatus::errored(fault.message.clone(), Some(fault));
                    }
                    self.publish_state(PipelineState::Errored);
                },
                FaultSeverity::EndOfStream => {
                    {
                        let mut inner = self.inner.lock().await;
                        let mut status = PipelineStatus::ok("end of stream");
                        status.last_fault = Some(fault);
                        inner.status = status;
                    }
                    self.publish_state(PipelineState::EndOfStream);
                },
                FaultSeverity::Warning => {},
            }
            return;
        }
        if let BusMessage::StateChanged { old, new } = message {
            let current = self.state();
            // Errored and end-of-stream are terminal until the next
            // build; late framework transitions must not mask them.
            if matches!(current, PipelineState::Errored | PipelineState::EndOfStream) {
                tracing::trace!(
                    pipeline_id = %self.id,
                    %old,
                    %new,
                    "ignoring framework state change in terminal state"
                );
                return;
            }
            self.publish_state(map_graph_state(new));
        }
    }

    /// Publishes an observed state, waking waiters and notifying
    /// subscribers. No controller lock is held during dispatch.
    fn publish_state(self: &Arc<Self>, new: PipelineState) {
        let old = *self.state_tx.borrow();
        if old == new {
            return;
        }
        self.state_tx.send_replace(new);
        tracing::debug!(pipeline_id = %self.id, %old, %new, "pipeline state changed");
        self.transitions_counter.add(
            1,
            &[
                KeyValue::new("pipeline_id", self.id.clone()),
                KeyValue::new("state", new.to_string()),
            ],
        );
        for subscriber in self.subscriber_snapshot() {
            subscriber.on_state_change(self, old, new);
        }
    }

    fn subscriber_snapshot(&self) -> Vec<Arc<dyn PipelineObserver>> {
        self.subscribers_locked().clone()
    }

    /// Flips the retry preference without rebuilding.
    pub(crate) async fn set_retry_enabled(&self, retry_enabled: bool) {
        self.inner.lock().await.description.retry_enabled = retry_enabled;
    }

    #[allow(clippy::unwrap_used)]
    fn subscribers_locked(&self) -> std::sync::MutexGuard<'_, Vec<Arc<dyn PipelineObserver>>> {
        self.subscribers.lock().unwrap()
    }

    #[allow(clippy::unwrap_used)]
    fn latest_target_locked(&self) -> std::sync::MutexGuard<'_, Option<PipelineState>> {
        self.latest_target.lock().unwrap()
    }
}

const fn map_graph_state(state: GraphState) -> PipelineState {
    match state {
        GraphState::Null => PipelineState::Stopped,
        GraphState::Ready => PipelineState::Initialized,
        GraphState::Paused => PipelineState::Suspended,
        GraphState::Playing => PipelineState::Running,
    }
}
