// SPDX-FileCopyrightText: © 2025 EdgeKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Normalizes raw bus messages into [`Fault`] records.
//!
//! Classification is deterministic and does no I/O: errors and warnings
//! keep their extracted message, debug detail, code, and domain; an
//! end-of-stream message maps to the fixed end-of-stream fault; every
//! other message kind produces no fault.

use edgekit_core::fault::{Fault, FaultDomain, FaultSeverity};
use edgekit_core::framework::{BusEventDetails, BusMessage};

/// Converts a raw bus message into a fault, if it represents one.
pub fn classify(message: &BusMessage) -> Option<Fault> {
    match message {
        BusMessage::Error(details) => Some(from_details(FaultSeverity::Error, details)),
        BusMessage::Warning(details) => Some(from_details(FaultSeverity::Warning, details)),
        BusMessage::EndOfStream => Some(Fault::end_of_stream()),
        BusMessage::StateChanged { .. } | BusMessage::Other => None,
    }
}

fn from_details(severity: FaultSeverity, details: &BusEventDetails) -> Fault {
    Fault {
        severity,
        domain: FaultDomain::from_tag(&details.domain_tag),
        code: details.code,
        message: details.message.clone(),
        debug_detail: details.debug.clone(),
        element_name: details.source_name.clone(),
        element_factory: details.source_factory.clone(),
        raw_domain_tag: details.domain_quark,
    }
}
