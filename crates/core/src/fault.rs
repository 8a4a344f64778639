// SPDX-FileCopyrightText: © 2025 EdgeKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Normalized fault records produced from raw bus events.
//!
//! A [`Fault`] is the classified form of an error, warning, or
//! end-of-stream message observed on a graph's bus. Faults carry a stable
//! JSON wire form so they can be forwarded to external consumers and
//! reconstructed losslessly.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity of a classified bus event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultSeverity {
    /// A fatal error reported by the framework; the graph stops flowing.
    Error,
    /// A non-fatal warning; the graph keeps running.
    Warning,
    /// The stream finished; observable but not self-healing.
    EndOfStream,
}

impl FaultSeverity {
    /// Integer wire form: 0=end-of-stream, 1=error, 2=warning.
    pub const fn as_wire(self) -> i32 {
        match self {
            Self::EndOfStream => 0,
            Self::Error => 1,
            Self::Warning => 2,
        }
    }

    pub const fn from_wire(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::EndOfStream),
            1 => Some(Self::Error),
            2 => Some(Self::Warning),
            _ => None,
        }
    }

    /// String wire form used alongside the integer for readability.
    pub const fn type_string(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::EndOfStream => "eos",
        }
    }
}

/// The framework's error category carried on faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultDomain {
    Core,
    Library,
    Resource,
    Stream,
    /// Used for events that carry no domain, such as end-of-stream.
    NotDefined,
    /// Any domain tag not recognized by this runtime.
    Unknown,
}

impl FaultDomain {
    /// Integer wire form: 0=core, 1=library, 2=resource, 3=stream,
    /// 4=not-defined, 5=unknown.
    pub const fn as_wire(self) -> i32 {
        match self {
            Self::Core => 0,
            Self::Library => 1,
            Self::Resource => 2,
            Self::Stream => 3,
            Self::NotDefined => 4,
            Self::Unknown => 5,
        }
    }

    pub const fn from_wire(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Core),
            1 => Some(Self::Library),
            2 => Some(Self::Resource),
            3 => Some(Self::Stream),
            4 => Some(Self::NotDefined),
            5 => Some(Self::Unknown),
            _ => None,
        }
    }

    /// Maps a framework domain tag to the enum. Anything unrecognized
    /// becomes [`FaultDomain::Unknown`].
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "core" => Self::Core,
            "library" => Self::Library,
            "resource" => Self::Resource,
            "stream" => Self::Stream,
            _ => Self::Unknown,
        }
    }

    pub const fn as_tag(self) -> &'static str {
        match self {
            Self::Core => "core",
            Self::Library => "library",
            Self::Resource => "resource",
            Self::Stream => "stream",
            Self::NotDefined => "not-defined",
            Self::Unknown => "unknown",
        }
    }

    /// The canonical numeric tag the framework registers for this domain.
    /// Domains without a registered tag report 0.
    pub const fn canonical_quark(self) -> u32 {
        match self {
            Self::Core => 1,
            Self::Library => 2,
            Self::Resource => 3,
            Self::Stream => 4,
            Self::NotDefined | Self::Unknown => 0,
        }
    }
}

/// Generic failure code reported by the framework's core domain.
pub const CORE_CODE_FAILED: i32 = 1;

/// A classified bus event.
///
/// The wire form (see [`FaultWire`]) is stable: serializing a fault and
/// deserializing the result reproduces the original record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "FaultWire", try_from = "FaultWire")]
pub struct Fault {
    pub severity: FaultSeverity,
    pub domain: FaultDomain,
    pub code: i32,
    pub message: String,
    pub debug_detail: String,
    /// Name of the element that raised the event, empty if unattributed.
    pub element_name: String,
    /// Factory name of the raising element, empty if unattributed.
    pub element_factory: String,
    /// The framework's numeric tag for the domain.
    pub raw_domain_tag: u32,
}

impl Fault {
    /// The fixed fault emitted for end-of-stream events.
    pub fn end_of_stream() -> Self {
        Self {
            severity: FaultSeverity::EndOfStream,
            domain: FaultDomain::NotDefined,
            code: 0,
            message: "End of Stream".to_string(),
            debug_detail: String::new(),
            element_name: String::new(),
            element_factory: String::new(),
            raw_domain_tag: 0,
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} from element '{}' ({}): {} [domain {}, code {}]",
            self.severity.type_string(),
            self.element_name,
            self.element_factory,
            self.message,
            self.domain.as_tag(),
            self.code
        )
    }
}

/// JSON wire representation of a [`Fault`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FaultWire {
    factory: String,
    name: String,
    debug_info: String,
    code: i32,
    domain: i32,
    domain_string: String,
    message: String,
    #[serde(rename = "type")]
    severity: i32,
    #[serde(rename = "type_string")]
    severity_string: String,
}

impl From<Fault> for FaultWire {
    fn from(fault: Fault) -> Self {
        Self {
            factory: fault.element_factory,
            name: fault.element_name,
            debug_info: fault.debug_detail,
            code: fault.code,
            domain: fault.domain.as_wire(),
            domain_string: fault.domain.as_tag().to_string(),
            message: fault.message,
            severity: fault.severity.as_wire(),
            severity_string: fault.severity.type_string().to_string(),
        }
    }
}

impl TryFrom<FaultWire> for Fault {
    type Error = String;

    fn try_from(wire: FaultWire) -> std::result::Result<Self, String> {
        let severity = FaultSeverity::from_wire(wire.severity)
            .ok_or_else(|| format!("unknown fault type {}", wire.severity))?;
        let domain = FaultDomain::from_wire(wire.domain)
            .ok_or_else(|| format!("unknown fault domain {}", wire.domain))?;
        // The numeric domain tag is not part of the wire form; end-of-stream
        // faults carry tag 0 and everything else the canonical registration.
        let raw_domain_tag = match severity {
            FaultSeverity::EndOfStream => 0,
            FaultSeverity::Error | FaultSeverity::Warning => domain.canonical_quark(),
        };
        Ok(Self {
            severity,
            domain,
            code: wire.code,
            message: wire.message,
            debug_detail: wire.debug_info,
            element_name: wire.name,
            element_factory: wire.factory,
            raw_domain_tag,
        })
    }
}
