// SPDX-FileCopyrightText: © 2025 EdgeKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Scriptable in-process framework for testing the runtime.
//!
//! [`MockFramework`] parses launch strings into [`MockGraph`]s that walk
//! the native state ladder one rung at a time, reporting every committed
//! rung on the bus. Tests can mark factories as unknown (to force build
//! failures), inject error and warning messages, and read back property
//! writes. An element carrying a `num-buffers` property emits
//! end-of-stream shortly after reaching `Playing`, like a finite source.

use crate::constants::DEFAULT_BUS_CAPACITY;
use async_trait::async_trait;
use edgekit_core::error::{EdgekitError, Result};
use edgekit_core::framework::{
    BusEventDetails, BusMessage, FrameworkElement, FrameworkGraph, GraphState, PropertyValue,
    StreamingFramework,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Delay between a finite source reaching `Playing` and its
/// end-of-stream message, giving state waiters time to observe
/// `Running` first.
const EOS_DELAY: Duration = Duration::from_millis(50);

/// An in-process stand-in for the streaming framework.
#[derive(Default)]
pub struct MockFramework {
    unknown_factories: StdMutex<BTreeSet<String>>,
    stall_playing: StdMutex<bool>,
    graphs: StdMutex<Vec<Arc<MockGraphCore>>>,
}

impl MockFramework {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Marks a factory name as unknown; parsing any description that
    /// uses it fails like a missing plugin would.
    pub fn mark_unknown(&self, factory: &str) {
        self.unknown_factories_locked().insert(factory.to_string());
    }

    /// Graphs built while set never commit the `Playing` rung; state
    /// requests park at `Paused`, leaving waiters hanging.
    pub fn stall_before_playing(&self, stall: bool) {
        #[allow(clippy::unwrap_used)]
        let mut flag = self.stall_playing.lock().unwrap();
        *flag = stall;
    }

    /// The most recently built graph attributed to `owner_id`.
    pub fn graph(&self, owner_id: &str) -> Option<Arc<MockGraphCore>> {
        self.graphs_locked().iter().rev().find(|g| g.owner_id() == owner_id).cloned()
    }

    /// Number of graphs built so far, across all pipelines.
    pub fn built_count(&self) -> usize {
        self.graphs_locked().len()
    }

    /// Pushes an error message onto the bus of `owner_id`'s live graph.
    /// Returns `false` when no such graph exists or the bus is gone.
    pub fn inject_error(&self, owner_id: &str, details: BusEventDetails) -> bool {
        self.graph(owner_id)
            .is_some_and(|graph| graph.bus_tx.try_send(BusMessage::Error(details)).is_ok())
    }

    /// Pushes a warning message onto the bus of `owner_id`'s live graph.
    pub fn inject_warning(&self, owner_id: &str, details: BusEventDetails) -> bool {
        self.graph(owner_id)
            .is_some_and(|graph| graph.bus_tx.try_send(BusMessage::Warning(details)).is_ok())
    }

    /// Reads a property from a named element of `owner_id`'s live graph.
    pub fn element_property(
        &self,
        owner_id: &str,
        element: &str,
        property: &str,
    ) -> Option<PropertyValue> {
        self.graph(owner_id)?.elements.get(element)?.property(property)
    }

    #[allow(clippy::unwrap_used)]
    fn unknown_factories_locked(&self) -> std::sync::MutexGuard<'_, BTreeSet<String>> {
        self.unknown_factories.lock().unwrap()
    }

    #[allow(clippy::unwrap_used)]
    fn graphs_locked(&self) -> std::sync::MutexGuard<'_, Vec<Arc<MockGraphCore>>> {
        self.graphs.lock().unwrap()
    }
}

#[async_trait]
impl StreamingFramework for MockFramework {
    async fn parse_launch(&self, description: &str) -> Result<Box<dyn FrameworkGraph>> {
        let unknown = self.unknown_factories_locked().clone();
        let mut elements = HashMap::new();
        let mut eos_source = false;
        for (index, segment) in description.split('!').enumerate() {
            let tokens = tokenize(segment)?;
            let Some(factory) = tokens.first().cloned() else {
                return Err(EdgekitError::InvalidArgument(format!(
                    "empty element in '{description}'"
                )));
            };
            if unknown.contains(&factory) {
                return Err(EdgekitError::InvalidArgument(format!(
                    "no element \"{factory}\""
                )));
            }
            let mut properties = HashMap::new();
            let mut name = None;
            for token in &tokens[1..] {
                let Some((key, value)) = token.split_once('=') else {
                    return Err(EdgekitError::InvalidArgument(format!(
                        "could not parse '{token}' in element '{factory}'"
                    )));
                };
                if key == "name" {
                    name = Some(value.to_string());
                }
                if key == "num-buffers" {
                    eos_source = true;
                }
                properties.insert(key.to_string(), PropertyValue::parse_lenient(value));
            }
            let name = name.unwrap_or_else(|| format!("{factory}{index}"));
            let element = Arc::new(MockElement {
                name: name.clone(),
                factory,
                properties: StdMutex::new(properties),
            });
            elements.insert(name, element);
        }

        let (bus_tx, bus_rx) = mpsc::channel(DEFAULT_BUS_CAPACITY);
        #[allow(clippy::unwrap_used)]
        let stall_playing = *self.stall_playing.lock().unwrap();
        let core = Arc::new(MockGraphCore {
            description: description.to_string(),
            owner: StdMutex::new(String::new()),
            state: StdMutex::new(GraphState::Null),
            elements,
            bus_tx,
            bus_rx: tokio::sync::Mutex::new(bus_rx),
            eos_source,
            stall_playing,
        });
        self.graphs_locked().push(core.clone());
        Ok(Box::new(MockGraph(core)))
    }
}

/// Shared graph internals, also handed to tests for scripting.
pub struct MockGraphCore {
    description: String,
    owner: StdMutex<String>,
    state: StdMutex<GraphState>,
    elements: HashMap<String, Arc<MockElement>>,
    bus_tx: mpsc::Sender<BusMessage>,
    bus_rx: tokio::sync::Mutex<mpsc::Receiver<BusMessage>>,
    eos_source: bool,
    stall_playing: bool,
}

impl MockGraphCore {
    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn owner_id(&self) -> String {
        self.owner_locked().clone()
    }

    pub fn state(&self) -> GraphState {
        *self.state_locked()
    }

    pub fn element(&self, name: &str) -> Option<Arc<MockElement>> {
        self.elements.get(name).cloned()
    }

    #[allow(clippy::unwrap_used)]
    fn owner_locked(&self) -> std::sync::MutexGuard<'_, String> {
        self.owner.lock().unwrap()
    }

    #[allow(clippy::unwrap_used)]
    fn state_locked(&self) -> std::sync::MutexGuard<'_, GraphState> {
        self.state.lock().unwrap()
    }
}

/// Handle returned to the builder; shares its core with the framework's
/// registry so tests can observe the graph.
pub struct MockGraph(Arc<MockGraphCore>);

#[async_trait]
impl FrameworkGraph for MockGraph {
    fn set_owner_id(&self, id: &str) {
        *self.0.owner_locked() = id.to_string();
    }

    fn owner_id(&self) -> String {
        self.0.owner_id()
    }

    async fn request_state(&self, target: GraphState) -> Result<()> {
        loop {
            let step = {
                let mut state = self.0.state_locked();
                let current = *state;
                if current == target {
                    return Ok(());
                }
                let next = step_toward(current, target);
                if next == GraphState::Playing && self.0.stall_playing {
                    return Ok(());
                }
                *state = next;
                (current, next)
            };
            let (old, new) = step;
            let _ = self.0.bus_tx.send(BusMessage::StateChanged { old, new }).await;
            if new == GraphState::Playing && self.0.eos_source {
                let core = self.0.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(EOS_DELAY).await;
                    if core.state() == GraphState::Playing {
                        let _ = core.bus_tx.send(BusMessage::EndOfStream).await;
                    }
                });
            }
        }
    }

    fn current_state(&self) -> GraphState {
        self.0.state()
    }

    async fn poll_bus(&self) -> Option<BusMessage> {
        self.0.bus_rx.lock().await.recv().await
    }

    fn element_by_name(&self, name: &str) -> Option<Arc<dyn FrameworkElement>> {
        let element: Arc<dyn FrameworkElement> = self.0.elements.get(name)?.clone();
        Some(element)
    }
}

/// A parsed element with a recorded property map.
pub struct MockElement {
    name: String,
    factory: String,
    properties: StdMutex<HashMap<String, PropertyValue>>,
}

impl MockElement {
    pub fn property(&self, name: &str) -> Option<PropertyValue> {
        self.properties_locked().get(name).cloned()
    }

    #[allow(clippy::unwrap_used)]
    fn properties_locked(&self) -> std::sync::MutexGuard<'_, HashMap<String, PropertyValue>> {
        self.properties.lock().unwrap()
    }
}

#[async_trait]
impl FrameworkElement for MockElement {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn factory_name(&self) -> String {
        self.factory.clone()
    }

    async fn set_property(&self, property: &str, value: PropertyValue) -> Result<()> {
        self.properties_locked().insert(property.to_string(), value);
        Ok(())
    }
}

/// Builds error details the way the framework would report them.
pub fn error_details(domain_tag: &str, code: i32, message: &str) -> BusEventDetails {
    let domain = edgekit_core::fault::FaultDomain::from_tag(domain_tag);
    BusEventDetails {
        message: message.to_string(),
        debug: String::new(),
        code,
        domain_tag: domain_tag.to_string(),
        domain_quark: domain.canonical_quark(),
        source_name: String::new(),
        source_factory: String::new(),
    }
}

fn step_toward(current: GraphState, target: GraphState) -> GraphState {
    let up = target > current;
    match (current, up) {
        (GraphState::Null, true) => GraphState::Ready,
        (GraphState::Ready, true) | (GraphState::Playing, false) => GraphState::Paused,
        (GraphState::Paused, true) => GraphState::Playing,
        (GraphState::Paused, false) => GraphState::Ready,
        (GraphState::Ready, false) => GraphState::Null,
        (state, _) => state,
    }
}

/// Splits an element segment into whitespace-separated tokens, keeping
/// double-quoted runs (with `\"` and `\\` escapes) together and
/// unescaping them.
fn tokenize(segment: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = segment.chars();
    while let Some(c) = chars.next() {
        match c {
            '"' => in_quotes = !in_quotes,
            '\\' if in_quotes => {
                let Some(escaped) = chars.next() else {
                    return Err(EdgekitError::InvalidArgument(format!(
                        "dangling escape in '{segment}'"
                    )));
                };
                current.push(escaped);
            },
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            },
            c => current.push(c),
        }
    }
    if in_quotes {
        return Err(EdgekitError::InvalidArgument(format!(
            "unterminated quote in '{segment}'"
        )));
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    Ok(tokens)
}
