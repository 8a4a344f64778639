// SPDX-FileCopyrightText: © 2025 EdgeKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Observer contract for pipeline and manager events.

use crate::controller::PipelineController;
use edgekit_core::description::PipelineDescription;
use edgekit_core::fault::Fault;
use edgekit_core::state::PipelineState;
use std::sync::Arc;

/// Callbacks for pipeline lifecycle events.
///
/// Fault and state-change callbacks run on the owning controller's bus
/// loop and must not block indefinitely; they may call back into the
/// controller (restart, status queries) because no controller lock is
/// held during dispatch. Preview callbacks let an observer claim an
/// operation: returning `true` suppresses the manager's default
/// handling.
///
/// All methods have no-op defaults so implementors override only what
/// they consume.
#[allow(unused_variables)]
pub trait PipelineObserver: Send + Sync {
    /// A classified fault was observed on the pipeline's bus.
    fn on_fault(&self, pipeline: &Arc<PipelineController>, fault: &Fault) {}

    /// The pipeline's observed state changed.
    fn on_state_change(
        &self,
        pipeline: &Arc<PipelineController>,
        old: PipelineState,
        new: PipelineState,
    ) {
    }

    /// A controller was registered with the manager.
    fn on_added(&self, pipeline: &Arc<PipelineController>) {}

    /// A controller was removed from the manager.
    fn on_removed(&self, pipeline_id: &str) {}

    /// Return `true` to claim the add; the manager then builds nothing
    /// for this description.
    fn on_add_preview(&self, description: &PipelineDescription) -> bool {
        false
    }

    /// Return `true` to veto the removal.
    fn on_remove_preview(&self, pipeline_id: &str) -> bool {
        false
    }

    /// Return `true` to claim the definition change; the manager then
    /// leaves the controller untouched.
    fn on_definition_change_preview(
        &self,
        pipeline: &Arc<PipelineController>,
        new_definition: &str,
    ) -> bool {
        false
    }
}
