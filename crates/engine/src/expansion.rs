// SPDX-FileCopyrightText: © 2025 EdgeKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Launch-string variable expansion.
//!
//! A launch string is a `!`-separated list of elements; each element is a
//! factory name followed by whitespace-separated `key=value` properties.
//! This module locates `${NAME}` references in property values, resolves
//! them through a [`Resolver`], substitutes their textual form, and
//! records which live node property each reference maps to so refreshes
//! can patch values later.
//!
//! Substituted values are emitted double-quoted with `\` and `"` escaped
//! inside the expansion. Two quote normalizations then run exactly once,
//! in order: a bare quoted caps element between `!` separators loses its
//! quotes, and so does a quoted caps argument to `capsfilter`. Expanding
//! a string that contains no references is idempotent.

use crate::resolver::Resolver;
use edgekit_core::error::{EdgekitError, Result};

/// Maps one `${NAME}` occurrence to the node property it expanded into.
///
/// The element handle itself lives on the built [`Graph`] and is
/// refreshed on every rebuild; bindings are name-based and survive
/// rebuilds unchanged.
///
/// [`Graph`]: crate::builder::Graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpansionBinding {
    /// Logical node name taken from the element's `name=` attribute.
    pub element: String,
    /// Property the reference appeared in.
    pub property: String,
    /// Referenced variable name.
    pub variable: String,
}

/// Result of expanding a launch string.
#[derive(Debug, Clone)]
pub struct ExpandedDefinition {
    pub text: String,
    pub bindings: Vec<ExpansionBinding>,
}

/// Expands every `${NAME}` reference in `definition`.
///
/// Fails with `InvalidArgument` when a referencing element carries no
/// `name=` attribute, when a reference is malformed, or when the
/// referenced variable cannot be resolved.
pub async fn expand(definition: &str, resolver: &Resolver) -> Result<ExpandedDefinition> {
    if definition.trim().is_empty() {
        return Err(EdgekitError::InvalidArgument(
            "pipeline definition must not be empty".to_string(),
        ));
    }
    let mut bindings = Vec::new();
    let mut elements = Vec::new();
    for segment in definition.split('!') {
        if segment.trim().is_empty() {
            return Err(EdgekitError::InvalidArgument(format!(
                "empty element in definition '{definition}'"
            )));
        }
        elements.push(expand_element(segment, resolver, &mut bindings).await?);
    }
    let text = elements.join(" ! ");
    let text = normalize_bare_caps(&text);
    let text = normalize_capsfilter_caps(&text);
    Ok(ExpandedDefinition { text, bindings })
}

async fn expand_element(
    segment: &str,
    resolver: &Resolver,
    bindings: &mut Vec<ExpansionBinding>,
) -> Result<String> {
    let tokens: Vec<&str> = segment.split_whitespace().collect();
    let element_name = tokens.iter().find_map(|t| t.strip_prefix("name="));
    if element_name.is_some_and(|name| name.contains("${")) {
        return Err(EdgekitError::InvalidArgument(format!(
            "element name attribute cannot contain a variable reference in '{segment}'"
        )));
    }

    let mut out = Vec::with_capacity(tokens.len());
    for token in tokens {
        if !token.contains("${") {
            out.push(token.to_string());
            continue;
        }
        let Some(element) = element_name else {
            return Err(EdgekitError::InvalidArgument(format!(
                "element '{}' carries a variable reference but no name= attribute",
                segment.trim()
            )));
        };
        let Some((property, value)) = token.split_once('=') else {
            return Err(EdgekitError::InvalidArgument(format!(
                "variable reference in '{token}' must appear in a key=value property"
            )));
        };
        let expanded = expand_value(value, element, property, resolver, bindings).await?;
        out.push(format!("{property}={expanded}"));
    }
    Ok(out.join(" "))
}

async fn expand_value(
    value: &str,
    element: &str,
    property: &str,
    resolver: &Resolver,
    bindings: &mut Vec<ExpansionBinding>,
) -> Result<String> {
    let mut out = String::new();
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            return Err(EdgekitError::InvalidArgument(format!(
                "unterminated variable reference in '{value}'"
            )));
        };
        let name = &after[..end];
        if name.is_empty() {
            return Err(EdgekitError::InvalidArgument(format!(
                "empty variable reference in '{value}'"
            )));
        }
        let variable = resolver.get(name).await?;
        bindings.push(ExpansionBinding {
            element: element.to_string(),
            property: property.to_string(),
            variable: name.to_string(),
        });
        out.push_str(&escape(&variable.expansion_text()));
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(format!("\"{out}\""))
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

/// `! "caps-expr" !` → `! caps-expr !`
fn normalize_bare_caps(text: &str) -> String {
    let elements: Vec<&str> =
        text.split('!').map(|segment| strip_whole_quotes(segment.trim())).collect();
    elements.join(" ! ")
}

/// `! capsfilter "caps-expr" !` → `! capsfilter caps-expr !`
fn normalize_capsfilter_caps(text: &str) -> String {
    let elements: Vec<String> = text
        .split('!')
        .map(|segment| {
            let tokens: Vec<&str> = segment.split_whitespace().collect();
            if tokens.first() != Some(&"capsfilter") {
                return tokens.join(" ");
            }
            tokens.iter().map(|t| strip_whole_quotes(t)).collect::<Vec<_>>().join(" ")
        })
        .collect();
    elements.join(" ! ")
}

/// Strips one pair of surrounding double quotes when they enclose the
/// whole token and the interior carries no further quotes.
fn strip_whole_quotes(token: &str) -> &str {
    if token.len() >= 2 && token.starts_with('"') && token.ends_with('"') {
        let interior = &token[1..token.len() - 1];
        if !interior.contains('"') {
            return interior;
        }
    }
    token
}
