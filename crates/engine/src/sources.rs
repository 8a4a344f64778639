// SPDX-FileCopyrightText: © 2025 EdgeKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Built-in property sources.
//!
//! Three sources ship with the runtime: command-line arguments, a JSON
//! file, and an in-memory collection. Remote key/value services plug in
//! through the same [`PropertySource`] trait.

use async_trait::async_trait;
use edgekit_core::error::{EdgekitError, Result};
use edgekit_core::variable::{PropertySource, Variable};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Variables supplied on the command line as `--NAME descriptor` pairs.
///
/// The descriptor is a JSON document (typically
/// `{"type": ..., "value": ..., "immutable": ...}`); anything that does
/// not parse as JSON is taken as a plain string value. The argument list
/// is fixed at construction, so `synchronize` never reports changes.
#[derive(Debug)]
pub struct ArgsSource {
    variables: HashMap<String, Variable>,
}

impl ArgsSource {
    /// Parses a raw argument slice. Tokens that do not start with `--`
    /// are skipped; a trailing `--NAME` with no value is rejected.
    pub fn parse<S: AsRef<str>>(args: &[S]) -> Result<Self> {
        let mut variables = HashMap::new();
        let mut iter = args.iter().map(|a| a.as_ref());
        while let Some(token) = iter.next() {
            let Some(name) = token.strip_prefix("--") else {
                continue;
            };
            if name.is_empty() {
                continue;
            }
            let Some(raw) = iter.next() else {
                return Err(EdgekitError::InvalidArgument(format!(
                    "argument --{name} is missing a value"
                )));
            };
            let variable = match serde_json::from_str::<Value>(raw) {
                Ok(json) => Variable::from_json(name, &json)?,
                Err(_) => Variable::string(name, raw),
            };
            variables.insert(name.to_string(), variable);
        }
        Ok(Self { variables })
    }
}

#[async_trait]
impl PropertySource for ArgsSource {
    fn source_name(&self) -> &str {
        "command-line"
    }

    async fn lookup(&self, name: &str) -> Result<Option<Variable>> {
        Ok(self.variables.get(name).cloned())
    }

    async fn synchronize(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Variables loaded from a JSON object file.
///
/// `synchronize` re-reads the file and reports names whose values were
/// added, changed, or removed since the last read.
pub struct JsonFileSource {
    path: PathBuf,
    cached: Mutex<HashMap<String, Variable>>,
}

impl JsonFileSource {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let cached = Self::load(&path)?;
        Ok(Self { path, cached: Mutex::new(cached) })
    }

    fn load(path: &Path) -> Result<HashMap<String, Variable>> {
        let text = std::fs::read_to_string(path)?;
        let document: Value = serde_json::from_str(&text)?;
        let Value::Object(map) = document else {
            return Err(EdgekitError::InvalidArgument(format!(
                "property file {} must contain a JSON object",
                path.display()
            )));
        };
        let mut variables = HashMap::with_capacity(map.len());
        for (name, value) in &map {
            variables.insert(name.clone(), Variable::from_json(name, value)?);
        }
        Ok(variables)
    }
}

#[async_trait]
impl PropertySource for JsonFileSource {
    fn source_name(&self) -> &str {
        "json-file"
    }

    async fn lookup(&self, name: &str) -> Result<Option<Variable>> {
        #[allow(clippy::unwrap_used)]
        let cached = self.cached.lock().unwrap();
        Ok(cached.get(name).cloned())
    }

    async fn synchronize(&self) -> Result<Vec<String>> {
        let fresh = Self::load(&self.path)?;
        #[allow(clippy::unwrap_used)]
        let mut cached = self.cached.lock().unwrap();
        let mut changed: BTreeSet<String> = BTreeSet::new();
        for (name, variable) in &fresh {
            if cached.get(name) != Some(variable) {
                changed.insert(name.clone());
            }
        }
        for name in cached.keys() {
            if !fresh.contains_key(name) {
                changed.insert(name.clone());
            }
        }
        *cached = fresh;
        Ok(changed.into_iter().collect())
    }
}

/// An in-memory variable collection.
///
/// Useful for embedding and tests. Mutations made through [`set`] and
/// [`remove`] surface through `synchronize`; the initial population does
/// not count as a change.
///
/// [`set`]: MemorySource::set
/// [`remove`]: MemorySource::remove
#[derive(Default)]
pub struct MemorySource {
    variables: Mutex<HashMap<String, Variable>>,
    dirty: Mutex<BTreeSet<String>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_variables(variables: impl IntoIterator<Item = Variable>) -> Self {
        let map = variables.into_iter().map(|v| (v.name.clone(), v)).collect();
        Self { variables: Mutex::new(map), dirty: Mutex::new(BTreeSet::new()) }
    }

    /// Inserts or replaces a variable; no-op when the value is unchanged.
    pub fn set(&self, variable: Variable) {
        #[allow(clippy::unwrap_used)]
        let mut variables = self.variables.lock().unwrap();
        if variables.get(&variable.name) == Some(&variable) {
            return;
        }
        #[allow(clippy::unwrap_used)]
        self.dirty.lock().unwrap().insert(variable.name.clone());
        variables.insert(variable.name.clone(), variable);
    }

    pub fn remove(&self, name: &str) {
        #[allow(clippy::unwrap_used)]
        if self.variables.lock().unwrap().remove(name).is_some() {
            #[allow(clippy::unwrap_used)]
            self.dirty.lock().unwrap().insert(name.to_string());
        }
    }
}

#[async_trait]
impl PropertySource for MemorySource {
    fn source_name(&self) -> &str {
        "memory"
    }

    async fn lookup(&self, name: &str) -> Result<Option<Variable>> {
        #[allow(clippy::unwrap_used)]
        let variables = self.variables.lock().unwrap();
        Ok(variables.get(name).cloned())
    }

    async fn synchronize(&self) -> Result<Vec<String>> {
        #[allow(clippy::unwrap_used)]
        let mut dirty = self.dirty.lock().unwrap();
        Ok(std::mem::take(&mut *dirty).into_iter().collect())
    }
}
