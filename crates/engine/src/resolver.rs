// SPDX-FileCopyrightText: © 2025 EdgeKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Variable resolution over an ordered property-source chain.

use edgekit_core::error::{EdgekitError, Result};
use edgekit_core::variable::{PropertySource, Variable};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Resolves variables against an ordered chain of property sources.
///
/// The resolver itself is stateless; sources own any caching. Lookup
/// walks the chain in order and the first source that knows the name
/// wins. Any source error other than "not found" aborts the walk.
pub struct Resolver {
    sources: Vec<Arc<dyn PropertySource>>,
}

impl Resolver {
    pub fn new(sources: Vec<Arc<dyn PropertySource>>) -> Self {
        Self { sources }
    }

    /// Resolves `name`, failing with `NotFound` when no source knows it.
    pub async fn get(&self, name: &str) -> Result<Variable> {
        self.try_get(name).await?.ok_or_else(|| {
            EdgekitError::NotFound(format!("variable '{name}' is absent from every property source"))
        })
    }

    /// Resolves `name`, returning `Ok(None)` when no source knows it.
    pub async fn try_get(&self, name: &str) -> Result<Option<Variable>> {
        for source in &self.sources {
            match source.lookup(name).await {
                Ok(Some(variable)) => {
                    tracing::trace!(
                        variable = name,
                        source = source.source_name(),
                        "resolved variable"
                    );
                    return Ok(Some(variable));
                },
                Ok(None) => {},
                Err(e) => {
                    tracing::error!(
                        variable = name,
                        source = source.source_name(),
                        error = %e,
                        "property source failed, aborting lookup chain"
                    );
                    return Err(e);
                },
            }
        }
        Ok(None)
    }

    /// Synchronizes every source and returns the union of the names they
    /// report as changed since their previous synchronization.
    pub async fn refresh(&self) -> Result<BTreeSet<String>> {
        let mut changed = BTreeSet::new();
        for source in &self.sources {
            let names = source.synchronize().await?;
            if !names.is_empty() {
                tracing::debug!(
                    source = source.source_name(),
                    count = names.len(),
                    "property source reported changed variables"
                );
            }
            changed.extend(names);
        }
        Ok(changed)
    }
}
