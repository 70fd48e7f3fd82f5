//! Collector: inventory this node, reconcile, publish the candidate set.
//!
//! connect → list images → list containers → load exclusions → reconcile →
//! one merge-patch of `spec.nodes.<node>`. Nothing is written unless every
//! step before the write succeeded.

#![allow(missing_docs)]

use std::path::PathBuf;
use std::time::Instant;

use serde::Serialize;
use serde_json::json;

use crate::core::errors::Result;
use crate::core::model::CandidateSet;
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::pipeline::reconcile::reconcile_detailed;
use crate::pipeline::{elapsed_ms, load_matcher};
use crate::runtime::RuntimeClient;
use crate::state::{ClusterState, StateSection};

/// Inputs for one collector run.
#[derive(Debug, Clone)]
pub struct CollectorOptions {
    pub node: String,
    pub run_id: String,
    pub exclusion_path: PathBuf,
    pub extra_patterns: Vec<String>,
}

/// What the collector saw and published.
#[derive(Debug, Clone, Serialize)]
pub struct CollectReport {
    pub node: String,
    pub run_id: String,
    pub images: usize,
    pub running: usize,
    pub excluded: usize,
    pub candidates: CandidateSet,
    pub duration_ms: u64,
}

pub struct Collector<'a> {
    runtime: &'a dyn RuntimeClient,
    state: &'a dyn ClusterState,
    logger: Option<ActivityLoggerHandle>,
}

impl<'a> Collector<'a> {
    pub fn new(
        runtime: &'a dyn RuntimeClient,
        state: &'a dyn ClusterState,
        logger: Option<ActivityLoggerHandle>,
    ) -> Self {
        Self {
            runtime,
            state,
            logger,
        }
    }

    pub async fn run(&self, options: &CollectorOptions) -> Result<CollectReport> {
        let start = Instant::now();

        let images = self.runtime.list_images().await?;
        let containers = self.runtime.list_containers().await?;
        let matcher = load_matcher(
            &options.exclusion_path,
            &options.extra_patterns,
            self.logger.as_ref(),
        )?;

        let outcome = reconcile_detailed(&images, &containers, &matcher);
        for (digest, reason) in &outcome.excluded {
            self.log_event(ActivityEvent::ImageSkipped {
                digest: digest.clone(),
                reason: reason.clone(),
            });
        }

        let patch = json!({ "nodes": { options.node.as_str(): &outcome.candidates } });
        self.state
            .patch_merge(&options.run_id, StateSection::Spec, &patch)
            .await?;
        self.log_event(ActivityEvent::CandidatesPublished {
            count: outcome.candidates.len(),
        });

        Ok(CollectReport {
            node: options.node.clone(),
            run_id: options.run_id.clone(),
            images: outcome.inventory,
            running: outcome.running.len(),
            excluded: outcome.excluded.len(),
            candidates: outcome.candidates,
            duration_ms: elapsed_ms(start),
        })
    }

    fn log_event(&self, event: ActivityEvent) {
        if let Some(logger) = &self.logger {
            logger.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{Container, Image};
    use crate::runtime::fake::FakeRuntime;
    use crate::state::MemoryStateStore;

    fn options(dir: &std::path::Path) -> CollectorOptions {
        CollectorOptions {
            node: "node-a".to_string(),
            run_id: "run-1".to_string(),
            exclusion_path: dir.join("excluded"),
            extra_patterns: Vec::new(),
        }
    }

    #[tokio::test]
    async fn publishes_candidates_under_node_key() {
        let tmp = tempfile::tempdir().unwrap();
        let runtime = FakeRuntime::new(
            vec![
                Image::new("sha256:aaa", &["app:v1"]),
                Image::new("sha256:bbb", &["app:v2"]),
            ],
            vec![Container::running("c1", "app:v2")],
        );
        let state = MemoryStateStore::new();
        let report = Collector::new(&runtime, &state, None)
            .run(&options(tmp.path()))
            .await
            .unwrap();

        assert_eq!(report.images, 2);
        assert_eq!(report.running, 1);
        assert_eq!(report.candidates.len(), 1);

        let job = state.get("run-1").await.unwrap();
        let published = &job.spec.nodes["node-a"];
        assert!(published.contains("sha256:aaa"));
        assert!(!published.contains("sha256:bbb"));
        assert_eq!(state.patches().len(), 1);
    }

    #[tokio::test]
    async fn exclusion_artifact_is_honored() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("excluded"),
            r#"{"excluded": ["docker.io/library/alpine:*"]}"#,
        )
        .unwrap();
        let runtime = FakeRuntime::new(
            vec![Image::new("sha256:aaa", &["docker.io/library/alpine:3.18"])],
            Vec::new(),
        );
        let state = MemoryStateStore::new();
        let report = Collector::new(&runtime, &state, None)
            .run(&options(tmp.path()))
            .await
            .unwrap();
        assert_eq!(report.excluded, 1);
        assert!(report.candidates.is_empty());
        let job = state.get("run-1").await.unwrap();
        assert!(job.spec.nodes["node-a"].is_empty());
    }

    #[tokio::test]
    async fn runtime_failure_writes_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let runtime = FakeRuntime::new(vec![Image::new("sha256:aaa", &[])], Vec::new());
        runtime.fail_listing("socket closed");
        let state = MemoryStateStore::new();
        let err = Collector::new(&runtime, &state, None)
            .run(&options(tmp.path()))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ERA-2002");
        assert!(state.patches().is_empty());
    }

    #[tokio::test]
    async fn malformed_exclusion_artifact_writes_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("excluded"), "[not json").unwrap();
        let runtime = FakeRuntime::new(vec![Image::new("sha256:aaa", &[])], Vec::new());
        let state = MemoryStateStore::new();
        let err = Collector::new(&runtime, &state, None)
            .run(&options(tmp.path()))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ERA-1003");
        assert!(state.patches().is_empty());
    }
}
