// SPDX-FileCopyrightText: © 2025 EdgeKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Declarative pipeline descriptions.
//!
//! The `pipelines` configuration property is a JSON array of these
//! records; the manager reconciles its controllers against it.

use crate::error::{EdgekitError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Immutable description of one pipeline.
///
/// Unknown JSON fields are ignored so configurations can carry
/// deployment-specific annotations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineDescription {
    /// Unique id within a manager.
    pub id: String,
    /// Launch string, possibly containing `${NAME}` references.
    pub definition: String,
    /// Opts this pipeline into the retry mechanism, if one is attached.
    #[serde(default)]
    pub retry_enabled: bool,
}

impl PipelineDescription {
    pub fn new(id: impl Into<String>, definition: impl Into<String>) -> Self {
        Self { id: id.into(), definition: definition.into(), retry_enabled: false }
    }

    /// Rejects empty ids and definitions.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(EdgekitError::InvalidArgument(
                "pipeline id must be a non-empty string".to_string(),
            ));
        }
        if self.definition.trim().is_empty() {
            return Err(EdgekitError::InvalidArgument(format!(
                "pipeline '{}' has an empty definition",
                self.id
            )));
        }
        Ok(())
    }
}

/// Parses the `pipelines` property value into validated descriptions.
pub fn parse_pipelines(value: &Value) -> Result<Vec<PipelineDescription>> {
    let entries = value.as_array().ok_or_else(|| {
        EdgekitError::InvalidArgument(format!(
            "the 'pipelines' property must be a JSON array, got {value}"
        ))
    })?;
    let mut descriptions = Vec::with_capacity(entries.len());
    for entry in entries {
        let description: PipelineDescription =
            serde_json::from_value(entry.clone()).map_err(|e| {
                EdgekitError::InvalidArgument(format!("malformed pipeline description: {e}"))
            })?;
        description.validate()?;
        descriptions.push(description);
    }
    Ok(descriptions)
}
