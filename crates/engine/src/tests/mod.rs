// SPDX-FileCopyrightText: © 2025 EdgeKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

mod controller;
mod resolver;

use crate::observer::PipelineObserver;
use crate::resolver::Resolver;
use crate::sources::MemorySource;
use edgekit_core::fault::Fault;
use edgekit_core::state::PipelineState;
use edgekit_core::variable::Variable;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Polls `condition` every 10ms until it holds or `deadline_ms` elapses.
pub(crate) async fn wait_until(deadline_ms: u64, mut condition: impl FnMut() -> bool) -> bool {
    let mut waited = 0;
    while !condition() && waited < deadline_ms {
        tokio::time::sleep(Duration::from_millis(10)).await;
        waited += 10;
    }
    condition()
}

pub(crate) fn resolver_with(variables: Vec<Variable>) -> (Arc<MemorySource>, Arc<Resolver>) {
    let source = Arc::new(MemorySource::with_variables(variables));
    let resolver = Arc::new(Resolver::new(vec![source.clone()]));
    (source, resolver)
}

/// Records every dispatched fault and state transition.
#[derive(Default)]
pub(crate) struct RecordingObserver {
    pub faults: Mutex<Vec<Fault>>,
    pub transitions: Mutex<Vec<(PipelineState, PipelineState)>>,
    pub added: Mutex<Vec<String>>,
    pub removed: Mutex<Vec<String>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[allow(clippy::unwrap_used)]
    pub fn fault_count(&self) -> usize {
        self.faults.lock().unwrap().len()
    }

    #[allow(clippy::unwrap_used)]
    pub fn states_entered(&self) -> Vec<PipelineState> {
        self.transitions.lock().unwrap().iter().map(|(_, new)| *new).collect()
    }
}

#[allow(clippy::unwrap_used)]
impl PipelineObserver for RecordingObserver {
    fn on_fault(&self, _pipeline: &Arc<crate::controller::PipelineController>, fault: &Fault) {
        self.faults.lock().unwrap().push(fault.clone());
    }

    fn on_state_change(
        &self,
        _pipeline: &Arc<crate::controller::PipelineController>,
        old: PipelineState,
        new: PipelineState,
    ) {
        self.transitions.lock().unwrap().push((old, new));
    }

    fn on_added(&self, pipeline: &Arc<crate::controller::PipelineController>) {
        self.added.lock().unwrap().push(pipeline.id().to_string());
    }

    fn on_removed(&self, pipeline_id: &str) {
        self.removed.lock().unwrap().push(pipeline_id.to_string());
    }
}
