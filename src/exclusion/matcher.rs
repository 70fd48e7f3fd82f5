//! Exclusion rules: exact references and `*` wildcard patterns.
//!
//! An image is excluded when its digest or any of its references matches any
//! rule. Exact rules are hashed; wildcard rules compile to anchored regexes
//! where `*` matches any run of characters (including `/` and `:`), so
//! `docker.io/library/alpine:*` covers every alpine tag but not `alpine2`.
//! An empty rule list matches nothing.

#![allow(missing_docs)]

use std::collections::HashSet;

use regex::Regex;

use crate::core::errors::{EraserError, Result};
use crate::core::model::Image;

/// Compiled wildcard rule.
#[derive(Debug, Clone)]
struct WildcardRule {
    original: String,
    compiled: Regex,
}

/// Compiled exclusion list.
#[derive(Debug, Clone, Default)]
pub struct ExclusionMatcher {
    exact: HashSet<String>,
    wildcards: Vec<WildcardRule>,
}

impl ExclusionMatcher {
    /// Compile patterns. Blank entries are ignored; surrounding whitespace is trimmed.
    pub fn compile<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut matcher = Self::default();
        for raw in patterns {
            let pattern = raw.as_ref().trim();
            if pattern.is_empty() {
                continue;
            }
            if pattern.contains('*') {
                if matcher.wildcards.iter().any(|w| w.original == pattern) {
                    continue;
                }
                matcher.wildcards.push(WildcardRule {
                    original: pattern.to_string(),
                    compiled: wildcard_to_regex(pattern)?,
                });
            } else {
                matcher.exact.insert(pattern.to_string());
            }
        }
        Ok(matcher)
    }

    /// A matcher with no rules; excludes nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether a single digest or reference is protected.
    pub fn matches(&self, reference: &str) -> bool {
        self.matching_rule(reference).is_some()
    }

    /// Whether any identifier of `image` is protected.
    pub fn excludes(&self, image: &Image) -> bool {
        image.identifiers().any(|id| self.matches(id))
    }

    /// The rule protecting `reference`, for log lines and skip reasons.
    pub fn matching_rule(&self, reference: &str) -> Option<&str> {
        if let Some(hit) = self.exact.get(reference) {
            return Some(hit.as_str());
        }
        self.wildcards
            .iter()
            .find(|w| w.compiled.is_match(reference))
            .map(|w| w.original.as_str())
    }

    /// First rule protecting any identifier of `image`.
    pub fn exclusion_reason(&self, image: &Image) -> Option<String> {
        image.identifiers().find_map(|id| {
            self.matching_rule(id)
                .map(|rule| format!("{id} matches exclusion rule {rule}"))
        })
    }

    pub fn rule_count(&self) -> usize {
        self.exact.len() + self.wildcards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rule_count() == 0
    }
}

/// Validate that a pattern is usable as an exclusion rule.
pub fn validate_pattern(pattern: &str) -> Result<()> {
    let trimmed = pattern.trim();
    if trimmed.is_empty() {
        return Err(EraserError::InvalidConfig {
            details: "exclusion pattern must not be empty".to_string(),
        });
    }
    if trimmed.contains('*') {
        wildcard_to_regex(trimmed)?;
    }
    Ok(())
}

/// `*` → `.*`; every other character is literal.
fn wildcard_to_regex(pattern: &str) -> Result<Regex> {
    let mut regex_str = String::with_capacity(pattern.len() * 2 + 2);
    regex_str.push('^');
    for (i, part) in pattern.split('*').enumerate() {
        if i > 0 {
            regex_str.push_str(".*");
        }
        regex_str.push_str(&regex::escape(part));
    }
    regex_str.push('$');

    Regex::new(&regex_str).map_err(|err| EraserError::InvalidConfig {
        details: format!("invalid exclusion pattern {pattern:?}: {err}"),
    })
}
