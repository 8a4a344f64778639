// SPDX-FileCopyrightText: © 2025 EdgeKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Compiles an expanded launch string into a live graph.

use crate::expansion::{expand, ExpansionBinding};
use crate::resolver::Resolver;
use edgekit_core::error::{EdgekitError, Result};
use edgekit_core::framework::{FrameworkElement, FrameworkGraph, StreamingFramework};
use std::collections::HashMap;
use std::sync::Arc;

/// A built graph: the framework handle, the elements referenced by
/// variable bindings, and the bindings themselves.
///
/// Element handles are looked up fresh on every build, so bindings
/// always patch the live node.
pub struct Graph {
    pub handle: Arc<dyn FrameworkGraph>,
    pub elements: HashMap<String, Arc<dyn FrameworkElement>>,
    pub bindings: Vec<ExpansionBinding>,
}

/// Expands `definition` and asks the framework to build it.
///
/// The build is atomic: if expansion, parsing, or any binding's element
/// lookup fails, no graph is returned and nothing is left running. The
/// pipeline id is attached to the root graph object so bus events can be
/// attributed.
pub async fn build_graph(
    framework: &Arc<dyn StreamingFramework>,
    pipeline_id: &str,
    definition: &str,
    resolver: &Resolver,
) -> Result<Graph> {
    let expanded = expand(definition, resolver).await?;
    tracing::debug!(pipeline_id, definition = %expanded.text, "building graph");

    let handle: Arc<dyn FrameworkGraph> = Arc::from(framework.parse_launch(&expanded.text).await?);
    handle.set_owner_id(pipeline_id);

    let mut elements = HashMap::new();
    for binding in &expanded.bindings {
        if elements.contains_key(&binding.element) {
            continue;
        }
        let element = handle.element_by_name(&binding.element).ok_or_else(|| {
            EdgekitError::InvalidArgument(format!(
                "element '{}' referenced by variable '{}' was not found in the built graph of pipeline '{}'",
                binding.element, binding.variable, pipeline_id
            ))
        })?;
        elements.insert(binding.element.clone(), element);
    }

    tracing::info!(
        pipeline_id,
        bindings = expanded.bindings.len(),
        "graph built"
    );
    Ok(Graph { handle, elements, bindings: expanded.bindings })
}
