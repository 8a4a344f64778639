// SPDX-FileCopyrightText: © 2025 EdgeKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Contract with the streaming-media framework.
//!
//! The runtime never executes media itself; it drives graphs through
//! these traits. A production deployment backs them with the real
//! framework bindings; tests use the scriptable mock in the engine crate.

use crate::error::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Native state ladder of the streaming framework.
///
/// Transitions walk the ladder one rung at a time
/// (`Null ↔ Ready ↔ Paused ↔ Playing`), and each committed rung is
/// reported on the bus as a [`BusMessage::StateChanged`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum GraphState {
    Null,
    Ready,
    Paused,
    Playing,
}

impl fmt::Display for GraphState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Null => "null",
            Self::Ready => "ready",
            Self::Paused => "paused",
            Self::Playing => "playing",
        };
        f.write_str(name)
    }
}

/// A typed value assignable to an element property.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl PropertyValue {
    /// Interprets a textual value the way launch strings do: integer if
    /// it parses, then float, otherwise a plain string.
    pub fn parse_lenient(text: &str) -> Self {
        if let Ok(i) = text.parse::<i64>() {
            return Self::Int(i);
        }
        if let Ok(f) = text.parse::<f64>() {
            return Self::Float(f);
        }
        Self::Str(text.to_string())
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(v) => f.write_str(v),
        }
    }
}

/// Payload shared by error and warning bus messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusEventDetails {
    pub message: String,
    pub debug: String,
    pub code: i32,
    /// Textual domain tag, e.g. `"core"` or `"resource"`.
    pub domain_tag: String,
    /// The framework's numeric registration for the domain tag.
    pub domain_quark: u32,
    /// Name of the element the event originated from, empty if none.
    pub source_name: String,
    /// Factory of the originating element, empty if none.
    pub source_factory: String,
}

/// A raw, typed message observed on a graph's bus.
#[derive(Debug, Clone, PartialEq)]
pub enum BusMessage {
    Error(BusEventDetails),
    Warning(BusEventDetails),
    EndOfStream,
    StateChanged { old: GraphState, new: GraphState },
    /// Anything else (clock, latency, tags); ignored by the runtime.
    Other,
}

/// Entry point into the streaming framework: compiles launch strings
/// into live graphs.
#[async_trait]
pub trait StreamingFramework: Send + Sync {
    /// Parses a fully expanded launch string into a graph in the `Null`
    /// state. Fails with `InvalidArgument` for descriptions the
    /// framework cannot compile.
    async fn parse_launch(&self, description: &str) -> Result<Box<dyn FrameworkGraph>>;
}

/// A live graph instance owned by exactly one controller.
#[async_trait]
pub trait FrameworkGraph: Send + Sync {
    /// Attaches the owning pipeline id to the root graph object so bus
    /// events can be attributed.
    fn set_owner_id(&self, id: &str);

    fn owner_id(&self) -> String;

    /// Requests a transition toward `target`. Completion is asynchronous
    /// and observed through [`BusMessage::StateChanged`] events.
    async fn request_state(&self, target: GraphState) -> Result<()>;

    /// The last state the graph committed to.
    fn current_state(&self) -> GraphState;

    /// Awaits the next bus message. Returns `None` once the graph has
    /// been torn down and the bus drained.
    async fn poll_bus(&self) -> Option<BusMessage>;

    /// Looks up a child element by its logical (`name=`) attribute.
    fn element_by_name(&self, name: &str) -> Option<Arc<dyn FrameworkElement>>;
}

/// A single element within a live graph.
#[async_trait]
pub trait FrameworkElement: Send + Sync {
    fn name(&self) -> String;

    fn factory_name(&self) -> String;

    /// Sets a property on the live element.
    async fn set_property(&self, property: &str, value: PropertyValue) -> Result<()>;
}
