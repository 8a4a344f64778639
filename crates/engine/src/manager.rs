// SPDX-FileCopyrightText: © 2025 EdgeKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Fleet management: reconciles controllers against the declarative
//! `pipelines` configuration.
//!
//! The manager owns one controller per configured pipeline id. Observers
//! registered here receive lifecycle events (added, removed, previews);
//! per-pipeline fault and state-change subscriptions are made on the
//! controller itself. Observer dispatch iterates a snapshot, so an
//! observer may unregister from within a callback.

use crate::controller::PipelineController;
use crate::observer::PipelineObserver;
use crate::resolver::Resolver;
use crate::retry::RetrySupervisor;
use edgekit_core::description::{parse_pipelines, PipelineDescription};
use edgekit_core::error::{EdgekitError, Result};
use edgekit_core::framework::StreamingFramework;
use edgekit_core::state::{PipelineState, PipelineStatus};
use indexmap::IndexMap;
use opentelemetry::global;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;

/// Point-in-time view of one managed pipeline.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PipelineSnapshot {
    pub state: PipelineState,
    pub status: PipelineStatus,
}

/// Owns and reconciles the set of pipeline controllers.
pub struct PipelineManager {
    framework: Arc<dyn StreamingFramework>,
    resolver: Arc<Resolver>,
    controllers: Mutex<IndexMap<String, Arc<PipelineController>>>,
    observers: StdMutex<Vec<Arc<dyn PipelineObserver>>>,
    retry: Mutex<Option<Arc<RetrySupervisor>>>,
    /// Once the manager has been started, later adds start immediately.
    start_on_add: AtomicBool,
    active_gauge: opentelemetry::metrics::Gauge<u64>,
}

impl PipelineManager {
    pub fn new(framework: Arc<dyn StreamingFramework>, resolver: Arc<Resolver>) -> Self {
        let meter = global::meter("edgekit_engine");
        Self {
            framework,
            resolver,
            controllers: Mutex::new(IndexMap::new()),
            observers: StdMutex::new(Vec::new()),
            retry: Mutex::new(None),
            start_on_add: AtomicBool::new(false),
            active_gauge: meter
                .u64_gauge("pipelines.active")
                .with_description("Number of managed pipelines")
                .build(),
        }
    }

    pub fn register_observer(&self, observer: Arc<dyn PipelineObserver>) {
        self.observers_locked().push(observer);
    }

    pub fn unregister_observer(&self, observer: &Arc<dyn PipelineObserver>) {
        self.observers_locked().retain(|o| !Arc::ptr_eq(o, observer));
    }

    /// Builds one controller per entry of the `pipelines` property.
    ///
    /// Individual build failures are collected; the manager stays
    /// initialized (failed controllers remain registered with an errored
    /// status) and the aggregated error is returned.
    pub async fn initialize(&self) -> Result<()> {
        let descriptions = self.read_pipelines().await?;
        let mut failures = Vec::new();
        for description in descriptions {
            let id = description.id.clone();
            if let Err(e) = self.install(description, false).await {
                failures.push(format!("{id}: {e}"));
            }
        }
        self.record_active().await;
        if failures.is_empty() {
            Ok(())
        } else {
            Err(EdgekitError::InvalidArgument(format!(
                "{} pipeline(s) failed to build: {}",
                failures.len(),
                failures.join("; ")
            )))
        }
    }

    /// Adds a pipeline, unless an observer claims the add.
    pub async fn add(&self, description: PipelineDescription) -> Result<()> {
        description.validate()?;
        for observer in self.observer_snapshot() {
            if observer.on_add_preview(&description) {
                tracing::debug!(pipeline_id = %description.id, "add claimed by an observer");
                return Ok(());
            }
        }
        let result = self.install(description, true).await;
        self.record_active().await;
        result
    }

    /// Removes a pipeline, unless an observer vetoes the removal.
    pub async fn remove(&self, pipeline_id: &str) -> Result<()> {
        for observer in self.observer_snapshot() {
            if observer.on_remove_preview(pipeline_id) {
                tracing::debug!(pipeline_id, "removal vetoed by an observer");
                return Ok(());
            }
        }
        let controller = self
            .controllers
            .lock()
            .await
            .shift_remove(pipeline_id)
            .ok_or_else(|| EdgekitError::NotFound(format!("no pipeline with id '{pipeline_id}'")))?;
        if let Some(supervisor) = self.retry.lock().await.clone() {
            supervisor.forget(pipeline_id).await;
        }
        if let Err(e) = controller.stop().await {
            tracing::warn!(pipeline_id, error = %e, "stop during removal failed");
        }
        for observer in self.observer_snapshot() {
            observer.on_removed(pipeline_id);
        }
        self.record_active().await;
        tracing::info!(pipeline_id, "pipeline removed");
        Ok(())
    }

    /// Applies a changed description; unknown ids fall back to `add`.
    pub async fn update(&self, description: PipelineDescription) -> Result<()> {
        description.validate()?;
        let existing = self.controllers.lock().await.get(&description.id).cloned();
        let Some(controller) = existing else {
            return self.add(description).await;
        };
        for observer in self.observer_snapshot() {
            if observer.on_definition_change_preview(&controller, &description.definition) {
                tracing::debug!(pipeline_id = %description.id, "definition change claimed by an observer");
                return Ok(());
            }
        }
        self.apply_retry_preference(&controller, description.retry_enabled).await;
        controller.set_retry_enabled(description.retry_enabled).await;
        controller.change_definition(description.definition).await
    }

    /// Starts every pipeline; later adds start automatically.
    /// Individual failures are logged, not fatal.
    pub async fn start(&self) -> Result<()> {
        self.start_on_add.store(true, Ordering::SeqCst);
        for (id, controller) in self.controller_snapshot().await {
            if let Err(e) = controller.start().await {
                tracing::error!(pipeline_id = %id, error = %e, "failed to start pipeline");
            }
        }
        Ok(())
    }

    /// Best-effort stop across all pipelines.
    pub async fn stop(&self) -> Result<()> {
        for (id, controller) in self.controller_snapshot().await {
            if let Err(e) = controller.stop().await {
                tracing::error!(pipeline_id = %id, error = %e, "failed to stop pipeline");
            }
        }
        Ok(())
    }

    /// Best-effort restart across all pipelines.
    pub async fn restart(&self) -> Result<()> {
        for (id, controller) in self.controller_snapshot().await {
            if let Err(e) = controller.restart().await {
                tracing::error!(pipeline_id = %id, error = %e, "failed to restart pipeline");
            }
        }
        Ok(())
    }

    /// Re-reads the `pipelines` property and reconciles: new ids are
    /// added, missing ids removed, changed definitions rebuilt, and
    /// unchanged pipelines get a chance to process stale variables.
    pub async fn refresh(&self) -> Result<()> {
        let changed_variables = self.resolver.refresh().await?;
        let fresh = self.read_pipelines().await?;

        let current: IndexMap<String, PipelineDescription> = {
            let controllers = self.controllers.lock().await;
            let mut map = IndexMap::with_capacity(controllers.len());
            for (id, controller) in controllers.iter() {
                map.insert(id.clone(), controller.description().await);
            }
            map
        };
        let fresh_ids: BTreeSet<&str> = fresh.iter().map(|d| d.id.as_str()).collect();

        let removed: Vec<String> =
            current.keys().filter(|id| !fresh_ids.contains(id.as_str())).cloned().collect();
        for id in removed {
            if let Err(e) = self.remove(&id).await {
                tracing::error!(pipeline_id = %id, error = %e, "failed to remove pipeline during refresh");
            }
        }

        for description in fresh {
            match current.get(&description.id) {
                None => {
                    let id = description.id.clone();
                    if let Err(e) = self.add(description).await {
                        tracing::error!(pipeline_id = %id, error = %e, "failed to add pipeline during refresh");
                    }
                },
                Some(previous) if previous.definition != description.definition => {
                    let id = description.id.clone();
                    if let Err(e) = self.update(description).await {
                        tracing::error!(pipeline_id = %id, error = %e, "failed to update pipeline during refresh");
                    }
                },
                Some(previous) => {
                    let controller = self.controllers.lock().await.get(&description.id).cloned();
                    let Some(controller) = controller else { continue };
                    if previous.retry_enabled != description.retry_enabled {
                        self.apply_retry_preference(&controller, description.retry_enabled).await;
                        controller.set_retry_enabled(description.retry_enabled).await;
                    }
                    if let Err(e) = controller.apply_stale(&changed_variables).await {
                        tracing::error!(
                            pipeline_id = %description.id,
                            error = %e,
                            "failed to apply stale variables during refresh"
                        );
                    }
                },
            }
        }
        self.record_active().await;
        Ok(())
    }

    /// Attaches a retry supervisor to every controller whose description
    /// enables retries, replacing (and shutting down) any prior handler.
    pub async fn set_retry_mechanism(&self, supervisor: Arc<RetrySupervisor>) {
        let previous = self.retry.lock().await.replace(supervisor.clone());
        for (_, controller) in self.controller_snapshot().await {
            if let Some(previous) = &previous {
                let erased: Arc<dyn PipelineObserver> = previous.clone();
                controller.unsubscribe(&erased);
            }
            if controller.description().await.retry_enabled {
                controller.subscribe(supervisor.clone());
            }
        }
        if let Some(previous) = previous {
            previous.shutdown().await;
        }
    }

    /// The controller for `pipeline_id`, if managed.
    pub async fn get(&self, pipeline_id: &str) -> Option<Arc<PipelineController>> {
        self.controllers.lock().await.get(pipeline_id).cloned()
    }

    pub async fn ids(&self) -> Vec<String> {
        self.controllers.lock().await.keys().cloned().collect()
    }

    /// State and status of every managed pipeline, in registration order.
    pub async fn statuses(&self) -> IndexMap<String, PipelineSnapshot> {
        let controllers = self.controller_snapshot().await;
        let mut map = IndexMap::with_capacity(controllers.len());
        for (id, controller) in controllers {
            map.insert(
                id,
                PipelineSnapshot { state: controller.state(), status: controller.status().await },
            );
        }
        map
    }

    pub async fn start_pipeline(&self, pipeline_id: &str) -> Result<()> {
        self.require(pipeline_id).await?.start().await
    }

    pub async fn stop_pipeline(&self, pipeline_id: &str) -> Result<()> {
        self.require(pipeline_id).await?.stop().await
    }

    pub async fn restart_pipeline(&self, pipeline_id: &str) -> Result<()> {
        self.require(pipeline_id).await?.restart().await
    }

    async fn require(&self, pipeline_id: &str) -> Result<Arc<PipelineController>> {
        self.get(pipeline_id)
            .await
            .ok_or_else(|| EdgekitError::NotFound(format!("no pipeline with id '{pipeline_id}'")))
    }

    /// Registers a controller for `description` and builds it. The
    /// controller stays registered when the build fails so its errored
    /// status remains inspectable.
    async fn install(&self, description: PipelineDescription, announce: bool) -> Result<()> {
        description.validate()?;
        let controller = {
            let mut controllers = self.controllers.lock().await;
            if controllers.contains_key(&description.id) {
                return Err(EdgekitError::InvalidState(format!(
                    "pipeline id '{}' is already registered",
                    description.id
                )));
            }
            let controller = PipelineController::new(
                self.framework.clone(),
                self.resolver.clone(),
                description.clone(),
            );
            controllers.insert(description.id.clone(), controller.clone());
            controller
        };
        let build_result = controller.build().await;
        if description.retry_enabled {
            if let Some(supervisor) = self.retry.lock().await.clone() {
                controller.subscribe(supervisor);
            }
        }
        if announce {
            for observer in self.observer_snapshot() {
                observer.on_added(&controller);
            }
        }
        build_result?;
        tracing::info!(pipeline_id = %description.id, "pipeline registered");
        if announce && self.start_on_add.load(Ordering::SeqCst) {
            if let Err(e) = controller.start().await {
                tracing::error!(
                    pipeline_id = %description.id,
                    error = %e,
                    "failed to start pipeline after add"
                );
            }
        }
        Ok(())
    }

    async fn apply_retry_preference(
        &self,
        controller: &Arc<PipelineController>,
        retry_enabled: bool,
    ) {
        let Some(supervisor) = self.retry.lock().await.clone() else { return };
        let erased: Arc<dyn PipelineObserver> = supervisor.clone();
        controller.unsubscribe(&erased);
        if retry_enabled {
            controller.subscribe(supervisor);
        }
    }

    async fn read_pipelines(&self) -> Result<Vec<PipelineDescription>> {
        match self.resolver.try_get("pipelines").await? {
            Some(variable) => parse_pipelines(&variable.value),
            None => {
                tracing::warn!("no 'pipelines' property configured, managing zero pipelines");
                Ok(Vec::new())
            },
        }
    }

    async fn controller_snapshot(&self) -> Vec<(String, Arc<PipelineController>)> {
        self.controllers
            .lock()
            .await
            .iter()
            .map(|(id, controller)| (id.clone(), controller.clone()))
            .collect()
    }

    fn observer_snapshot(&self) -> Vec<Arc<dyn PipelineObserver>> {
        self.observers_locked().clone()
    }

    #[allow(clippy::unwrap_used)]
    fn observers_locked(&self) -> std::sync::MutexGuard<'_, Vec<Arc<dyn PipelineObserver>>> {
        self.observers.lock().unwrap()
    }

    async fn record_active(&self) {
        let count = self.controllers.lock().await.len();
        self.active_gauge.record(count as u64, &[]);
    }
}
