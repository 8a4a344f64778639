// SPDX-FileCopyrightText: © 2025 EdgeKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! External variables and the property-source chain they are resolved from.
//!
//! A [`Variable`] is a typed, named value referenced from a pipeline
//! description as `${NAME}`. Variables come from [`PropertySource`]
//! implementations (command-line arguments, JSON files, remote key/value
//! services, in-memory collections) arranged in an ordered chain.

use crate::error::{EdgekitError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The declared type of a variable's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    String,
    Int,
    Float,
    Bool,
    Json,
}

impl ValueKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::Json => "json",
        }
    }
}

/// A named, typed value resolved from a property source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub kind: ValueKind,
    pub value: Value,
    /// A change to an immutable variable requires a full graph rebuild;
    /// mutable variables can be patched on the live node instead.
    pub immutable: bool,
}

impl Variable {
    pub fn new(name: impl Into<String>, kind: ValueKind, value: Value) -> Self {
        Self { name: name.into(), kind, value, immutable: false }
    }

    pub fn string(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, ValueKind::String, Value::String(value.into()))
    }

    #[must_use]
    pub const fn immutable(mut self) -> Self {
        self.immutable = true;
        self
    }

    /// Parses a variable from its JSON form.
    ///
    /// The canonical descriptor is an object
    /// `{"type": ..., "value": ..., "immutable": bool}`; any other JSON
    /// value is accepted with its kind inferred from the value itself.
    pub fn from_json(name: &str, value: &Value) -> Result<Self> {
        if let Value::Object(map) = value {
            if map.contains_key("type") && map.contains_key("value") {
                return Self::from_descriptor(name, map);
            }
        }
        Ok(Self::infer(name, value.clone()))
    }

    fn from_descriptor(name: &str, map: &serde_json::Map<String, Value>) -> Result<Self> {
        let kind: ValueKind = serde_json::from_value(map["type"].clone()).map_err(|_| {
            EdgekitError::InvalidArgument(format!(
                "variable '{name}' declares unknown type {}",
                map["type"]
            ))
        })?;
        let value = map["value"].clone();
        let matches = match kind {
            ValueKind::String => value.is_string(),
            ValueKind::Int => value.is_i64() || value.is_u64(),
            ValueKind::Float => value.is_number(),
            ValueKind::Bool => value.is_boolean(),
            ValueKind::Json => true,
        };
        if !matches {
            return Err(EdgekitError::InvalidArgument(format!(
                "variable '{name}' value {value} does not match declared type {}",
                kind.as_str()
            )));
        }
        let immutable = map.get("immutable").and_then(Value::as_bool).unwrap_or(false);
        Ok(Self { name: name.to_string(), kind, value, immutable })
    }

    fn infer(name: &str, value: Value) -> Self {
        let kind = match &value {
            Value::String(_) => ValueKind::String,
            Value::Bool(_) => ValueKind::Bool,
            Value::Number(n) if n.is_i64() || n.is_u64() => ValueKind::Int,
            Value::Number(_) => ValueKind::Float,
            Value::Null | Value::Array(_) | Value::Object(_) => ValueKind::Json,
        };
        Self { name: name.to_string(), kind, value, immutable: false }
    }

    /// Textual form substituted into a launch string.
    ///
    /// Strings expand to their raw content; everything else expands to
    /// its JSON rendering.
    pub fn expansion_text(&self) -> String {
        match &self.value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// One layer of the variable resolution chain.
///
/// Sources own any caching; the resolver above them is stateless.
#[async_trait]
pub trait PropertySource: Send + Sync {
    /// Source name for diagnostics.
    fn source_name(&self) -> &str;

    /// Looks up a variable. `Ok(None)` means the variable is absent from
    /// this source and the chain continues; any error aborts the chain.
    async fn lookup(&self, name: &str) -> Result<Option<Variable>>;

    /// Returns the names of variables whose values changed since the
    /// previous call.
    async fn synchronize(&self) -> Result<Vec<String>>;
}
