//! The shared run record and RFC 7386 merge-patch.
//!
//! ```text
//! spec.nodes.<node>        collector: that node's candidate set
//! status.vulnerable        scanner
//! status.failed            scanner
//! status.removals.<node>   eraser: that node's removal report
//! ```

#![allow(missing_docs)]

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::model::{CandidateSet, FailedImage, Image, RemovalReport};

/// One run's shared record. Unknown top-level fields (API object metadata) are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageJob {
    #[serde(default)]
    pub spec: JobSpec,
    #[serde(default)]
    pub status: JobStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Node name → candidates that node published.
    #[serde(default)]
    pub nodes: BTreeMap<String, CandidateSet>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    #[serde(default)]
    pub vulnerable: Vec<Image>,
    #[serde(default)]
    pub failed: Vec<FailedImage>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub removals: BTreeMap<String, RemovalReport>,
}

impl ImageJob {
    /// Union of every node's candidates.
    pub fn candidates(&self) -> CandidateSet {
        let mut all = CandidateSet::new();
        for set in self.spec.nodes.values() {
            all.merge(set);
        }
        all
    }
}

/// Top-level section a patch applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateSection {
    Spec,
    Status,
}

impl StateSection {
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Spec => "spec",
            Self::Status => "status",
        }
    }

    /// Wrap a section-relative patch into a whole-document patch.
    #[must_use]
    pub fn wrap(self, patch: &Value) -> Value {
        let mut root = Map::new();
        root.insert(self.key().to_string(), patch.clone());
        Value::Object(root)
    }
}

/// Apply `patch` to `target` per RFC 7386: objects merge recursively, `null`
/// deletes a key, anything else (arrays included) replaces.
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                merge_patch(target_map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}
