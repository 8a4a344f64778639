// SPDX-FileCopyrightText: © 2025 EdgeKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

use crate::resolver::Resolver;
use crate::sources::{ArgsSource, MemorySource};
use async_trait::async_trait;
use edgekit_core::error::{EdgekitError, Result};
use edgekit_core::variable::{PropertySource, ValueKind, Variable};
use std::sync::Arc;

/// A source that always fails, for chain-abort behavior.
struct BrokenSource;

#[async_trait]
impl PropertySource for BrokenSource {
    fn source_name(&self) -> &str {
        "broken"
    }

    async fn lookup(&self, _name: &str) -> Result<Option<Variable>> {
        Err(EdgekitError::Fatal("backing store unreachable".to_string()))
    }

    async fn synchronize(&self) -> Result<Vec<String>> {
        Err(EdgekitError::Fatal("backing store unreachable".to_string()))
    }
}

#[tokio::test]
async fn test_first_source_wins() {
    let first = Arc::new(MemorySource::with_variables(vec![Variable::string("A", "one")]));
    let second = Arc::new(MemorySource::with_variables(vec![
        Variable::string("A", "two"),
        Variable::string("B", "only"),
    ]));
    let resolver = Resolver::new(vec![first, second]);

    assert_eq!(resolver.get("A").await.unwrap().expansion_text(), "one");
    assert_eq!(resolver.get("B").await.unwrap().expansion_text(), "only");
}

#[tokio::test]
async fn test_missing_variable_is_not_found() {
    let resolver = Resolver::new(vec![Arc::new(MemorySource::new())]);
    let err = resolver.get("NOPE").await.unwrap_err();
    assert!(matches!(err, EdgekitError::NotFound(_)), "got {err}");
    assert!(resolver.try_get("NOPE").await.unwrap().is_none());
}

#[tokio::test]
async fn test_source_error_aborts_the_chain() {
    let fallback = Arc::new(MemorySource::with_variables(vec![Variable::string("A", "one")]));
    let resolver = Resolver::new(vec![Arc::new(BrokenSource), fallback]);
    let err = resolver.get("A").await.unwrap_err();
    assert!(matches!(err, EdgekitError::Fatal(_)), "got {err}");
}

#[tokio::test]
async fn test_refresh_aggregates_changed_sets() {
    let first = Arc::new(MemorySource::with_variables(vec![Variable::string("A", "1")]));
    let second = Arc::new(MemorySource::with_variables(vec![Variable::string("B", "1")]));
    let resolver = Resolver::new(vec![first.clone(), second.clone()]);

    assert!(resolver.refresh().await.unwrap().is_empty());

    first.set(Variable::string("A", "2"));
    second.set(Variable::string("B", "2"));
    second.set(Variable::string("C", "new"));
    let changed = resolver.refresh().await.unwrap();
    assert_eq!(
        changed.into_iter().collect::<Vec<_>>(),
        vec!["A".to_string(), "B".to_string(), "C".to_string()]
    );

    // Consumed: a second refresh reports nothing.
    assert!(resolver.refresh().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unchanged_set_is_not_reported() {
    let source = Arc::new(MemorySource::with_variables(vec![Variable::string("A", "1")]));
    let resolver = Resolver::new(vec![source.clone()]);
    source.set(Variable::string("A", "1"));
    assert!(resolver.refresh().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_args_source_descriptor_and_bare_values() {
    let source = ArgsSource::parse(&[
        "--PATTERN",
        r#"{"type":"string","value":"1"}"#,
        "--THRESHOLD",
        r#"{"type":"float","value":0.5,"immutable":true}"#,
        "--LABEL",
        "front-camera",
        "positional-noise",
    ])
    .unwrap();

    let pattern = source.lookup("PATTERN").await.unwrap().unwrap();
    assert_eq!(pattern.kind, ValueKind::String);
    assert!(!pattern.immutable);

    let threshold = source.lookup("THRESHOLD").await.unwrap().unwrap();
    assert_eq!(threshold.kind, ValueKind::Float);
    assert!(threshold.immutable);

    // Not valid JSON, taken as a plain string.
    let label = source.lookup("LABEL").await.unwrap().unwrap();
    assert_eq!(label.kind, ValueKind::String);
    assert_eq!(label.expansion_text(), "front-camera");

    assert!(source.lookup("positional-noise").await.unwrap().is_none());
    assert!(source.synchronize().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_args_source_missing_value_is_rejected() {
    let err = ArgsSource::parse(&["--PATTERN"]).unwrap_err();
    assert!(matches!(err, EdgekitError::InvalidArgument(_)), "got {err}");
}

#[tokio::test]
async fn test_json_file_source_reload_reports_changes() {
    let dir = std::env::temp_dir().join(format!("edgekit-props-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("variables.json");
    std::fs::write(
        &path,
        r#"{"PATTERN": {"type": "string", "value": "1"}, "LABEL": "cam0"}"#,
    )
    .unwrap();

    let source = JsonFileSourceGuard::open(&path);
    assert_eq!(source.0.lookup("PATTERN").await.unwrap().unwrap().expansion_text(), "1");
    assert_eq!(source.0.lookup("LABEL").await.unwrap().unwrap().expansion_text(), "cam0");
    assert!(source.0.synchronize().await.unwrap().is_empty());

    std::fs::write(&path, r#"{"PATTERN": {"type": "string", "value": "0"}}"#).unwrap();
    let changed = source.0.synchronize().await.unwrap();
    assert_eq!(changed, vec!["LABEL".to_string(), "PATTERN".to_string()]);
    assert_eq!(source.0.lookup("PATTERN").await.unwrap().unwrap().expansion_text(), "0");
    assert!(source.0.lookup("LABEL").await.unwrap().is_none());
}

/// Removes the backing file when the test ends.
struct JsonFileSourceGuard(crate::sources::JsonFileSource, std::path::PathBuf);

impl JsonFileSourceGuard {
    fn open(path: &std::path::Path) -> Self {
        Self(crate::sources::JsonFileSource::open(path).unwrap(), path.to_path_buf())
    }
}

impl Drop for JsonFileSourceGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.1);
    }
}
