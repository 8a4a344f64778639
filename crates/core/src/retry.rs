// SPDX-FileCopyrightText: © 2025 EdgeKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Retry policy configuration and delay computation.
//!
//! A [`RetryPolicy`] decides which faults are retryable and how long to
//! back off between restart attempts. The supervisor in the engine crate
//! owns the per-pipeline attempt counters; this module owns the rule
//! matching and the raw (unclamped) delay formula.

use crate::fault::{Fault, FaultDomain, FaultSeverity, CORE_CODE_FAILED};
use serde_json::Value;

/// Backoff growth mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryMode {
    Linear,
    Exponential,
}

/// Pattern matched against classified faults. `None` fields match
/// anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultRule {
    pub severity: Option<FaultSeverity>,
    pub domain: Option<FaultDomain>,
    pub code: Option<i32>,
}

impl FaultRule {
    pub fn matches(&self, fault: &Fault) -> bool {
        self.severity.is_none_or(|s| s == fault.severity)
            && self.domain.is_none_or(|d| d == fault.domain)
            && self.code.is_none_or(|c| c == fault.code)
    }
}

/// Restart backoff configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub mode: RetryMode,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Linear step, or exponential base.
    pub increment: f64,
    pub rules: Vec<FaultRule>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            mode: RetryMode::Linear,
            min_delay_ms: 10,
            max_delay_ms: 300_000,
            increment: 2500.0,
            rules: vec![FaultRule {
                severity: Some(FaultSeverity::Error),
                domain: Some(FaultDomain::Core),
                code: Some(CORE_CODE_FAILED),
            }],
        }
    }
}

impl RetryPolicy {
    /// True when any rule matches the fault.
    pub fn matches(&self, fault: &Fault) -> bool {
        self.rules.iter().any(|rule| rule.matches(fault))
    }

    /// Raw backoff delay before clamping to `max_delay_ms`.
    ///
    /// Attempt 0 yields `min` in linear mode and `min + 1` in exponential
    /// mode; the extra millisecond seeds the growth so that
    /// `increment^n` stays monotonic from the first retry onward. The
    /// seed is part of the observable contract.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn raw_delay_ms(&self, attempt: u32) -> u64 {
        if attempt == 0 {
            return match self.mode {
                RetryMode::Linear => self.min_delay_ms,
                RetryMode::Exponential => self.min_delay_ms + 1,
            };
        }
        let growth = match self.mode {
            RetryMode::Linear => self.increment * f64::from(attempt),
            RetryMode::Exponential => self.increment.powi(attempt.min(i32::MAX as u32) as i32),
        };
        if !growth.is_finite() || growth < 0.0 {
            return self.max_delay_ms;
        }
        self.min_delay_ms.saturating_add(growth as u64)
    }

    /// Parses the `retry` configuration property.
    ///
    /// Missing or invalid fields fall back to the defaults with a
    /// warning; a malformed document never aborts startup.
    pub fn from_json(value: &Value) -> Self {
        let defaults = Self::default();
        let Some(map) = value.as_object() else {
            tracing::warn!(%value, "retry configuration is not an object, using defaults");
            return defaults;
        };

        let mode = match map.get("Mode").and_then(Value::as_str) {
            Some("linear") => RetryMode::Linear,
            Some("exponential") => RetryMode::Exponential,
            Some(other) => {
                tracing::warn!(mode = other, "unknown retry mode, falling back to linear");
                defaults.mode
            },
            None => defaults.mode,
        };

        let min_delay_ms = read_u64(map, "Min").unwrap_or(defaults.min_delay_ms);
        let mut max_delay_ms = read_u64(map, "Max").unwrap_or(defaults.max_delay_ms);
        if max_delay_ms < min_delay_ms {
            tracing::warn!(
                min_delay_ms,
                max_delay_ms,
                "retry Max is below Min, clamping Max to Min"
            );
            max_delay_ms = min_delay_ms;
        }
        let increment = match map.get("Increment").and_then(Value::as_f64) {
            Some(v) if v >= 0.0 => v,
            Some(v) => {
                tracing::warn!(increment = v, "negative retry increment, using default");
                defaults.increment
            },
            None => defaults.increment,
        };

        let rules = map.get("Messages").map_or_else(
            || defaults.rules.clone(),
            |messages| parse_rules(messages).unwrap_or_else(|| defaults.rules.clone()),
        );

        Self { mode, min_delay_ms, max_delay_ms, increment, rules }
    }
}

fn read_u64(map: &serde_json::Map<String, Value>, key: &str) -> Option<u64> {
    let raw = map.get(key)?;
    match raw.as_u64() {
        Some(v) => Some(v),
        None => {
            tracing::warn!(key, %raw, "retry parameter is not a non-negative integer, using default");
            None
        },
    }
}

/// Wire integers: severity 0=eos/1=error/2=warning, domain 0..=5, and -1
/// meaning "any" for every field.
fn parse_rules(value: &Value) -> Option<Vec<FaultRule>> {
    let entries = value.as_array().or_else(|| {
        tracing::warn!(%value, "retry Messages is not an array, using default rules");
        None
    })?;
    let mut rules = Vec::with_capacity(entries.len());
    for entry in entries {
        let Some(map) = entry.as_object() else {
            tracing::warn!(%entry, "skipping malformed retry rule");
            continue;
        };
        let severity = match map.get("Type").and_then(Value::as_i64) {
            None | Some(-1) => None,
            #[allow(clippy::cast_possible_truncation)]
            Some(raw) => match FaultSeverity::from_wire(raw as i32) {
                Some(s) => Some(s),
                None => {
                    tracing::warn!(raw, "skipping retry rule with unknown Type");
                    continue;
                },
            },
        };
        let domain = match map.get("Domain").and_then(Value::as_i64) {
            None | Some(-1) => None,
            #[allow(clippy::cast_possible_truncation)]
            Some(raw) => match FaultDomain::from_wire(raw as i32) {
                Some(d) => Some(d),
                None => {
                    tracing::warn!(raw, "skipping retry rule with unknown Domain");
                    continue;
                },
            },
        };
        #[allow(clippy::cast_possible_truncation)]
        let code = match map.get("Code").and_then(Value::as_i64) {
            None | Some(-1) => None,
            Some(raw) => Some(raw as i32),
        };
        rules.push(FaultRule { severity, domain, code });
    }
    if rules.is_empty() {
        tracing::warn!("retry Messages contained no usable rules, using default rules");
        return None;
    }
    Some(rules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.mode, RetryMode::Linear);
        assert_eq!(policy.min_delay_ms, 10);
        assert_eq!(policy.max_delay_ms, 300_000);
        assert_eq!(policy.rules.len(), 1);
        assert!(policy.rules[0].matches(&Fault {
            severity: FaultSeverity::Error,
            domain: FaultDomain::Core,
            code: CORE_CODE_FAILED,
            message: String::new(),
            debug_detail: String::new(),
            element_name: String::new(),
            element_factory: String::new(),
            raw_domain_tag: 1,
        }));
    }

    #[test]
    fn test_linear_delays() {
        let policy = RetryPolicy {
            mode: RetryMode::Linear,
            min_delay_ms: 0,
            max_delay_ms: 500,
            increment: 100.0,
            rules: Vec::new(),
        };
        assert_eq!(policy.raw_delay_ms(0), 0);
        assert_eq!(policy.raw_delay_ms(1), 100);
        assert_eq!(policy.raw_delay_ms(3), 300);
        // Clamping to max is the caller's job.
        assert_eq!(policy.raw_delay_ms(7), 700);
    }

    #[test]
    fn test_exponential_delays_are_seeded() {
        let policy = RetryPolicy {
            mode: RetryMode::Exponential,
            min_delay_ms: 10,
            max_delay_ms: 100_000,
            increment: 3.0,
            rules: Vec::new(),
        };
        // Attempt 0 is min + 1, the deliberate monotonic seed.
        assert_eq!(policy.raw_delay_ms(0), 11);
        assert_eq!(policy.raw_delay_ms(1), 13);
        assert_eq!(policy.raw_delay_ms(2), 19);
        assert_eq!(policy.raw_delay_ms(3), 37);
    }

    #[test]
    fn test_from_json_full() {
        let policy = RetryPolicy::from_json(&json!({
            "Mode": "exponential",
            "Min": 5, "Max": 1000, "Increment": 2,
            "Messages": [
                {"Type": 1, "Domain": 0, "Code": 1},
                {"Type": 0, "Domain": -1, "Code": -1},
            ]
        }));
        assert_eq!(policy.mode, RetryMode::Exponential);
        assert_eq!(policy.min_delay_ms, 5);
        assert_eq!(policy.max_delay_ms, 1000);
        assert_eq!(policy.rules.len(), 2);
        assert_eq!(policy.rules[1].severity, Some(FaultSeverity::EndOfStream));
        assert_eq!(policy.rules[1].domain, None);
        assert_eq!(policy.rules[1].code, None);
        assert!(policy.matches(&Fault::end_of_stream()));
    }

    #[test]
    fn test_from_json_falls_back_per_field() {
        let policy = RetryPolicy::from_json(&json!({
            "Mode": "sideways",
            "Min": "soon",
            "Max": 200_000,
        }));
        let defaults = RetryPolicy::default();
        assert_eq!(policy.mode, defaults.mode);
        assert_eq!(policy.min_delay_ms, defaults.min_delay_ms);
        assert_eq!(policy.max_delay_ms, 200_000);
        assert_eq!(policy.rules, defaults.rules);
    }

    #[test]
    fn test_from_json_max_below_min() {
        let policy = RetryPolicy::from_json(&json!({"Min": 100, "Max": 50}));
        assert_eq!(policy.min_delay_ms, 100);
        assert_eq!(policy.max_delay_ms, 100);
    }

    #[test]
    fn test_rule_any_fields() {
        let rule = FaultRule { severity: None, domain: None, code: None };
        assert!(rule.matches(&Fault::end_of_stream()));
    }

    #[test]
    fn test_equal_min_and_max_pin_every_delay() {
        let policy = RetryPolicy {
            mode: RetryMode::Exponential,
            min_delay_ms: 100,
            max_delay_ms: 100,
            increment: 2.0,
            rules: Vec::new(),
        };
        for attempt in 0..5 {
            assert_eq!(policy.raw_delay_ms(attempt).min(policy.max_delay_ms), 100);
        }
    }
}
