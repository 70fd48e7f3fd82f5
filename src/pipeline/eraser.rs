//! Eraser: remove vulnerable images from this node.
//!
//! Targets come from a work-order file when one is given, otherwise from
//! `status.vulnerable`. Exclusions and the container snapshot are read fresh
//! right before the removal loop; the loop itself never aborts on a per-image
//! failure.

#![allow(missing_docs)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::core::errors::{EraserError, Result};
use crate::core::model::{Image, ImageIndex, RemovalOutcome, RemovalReport, RunningSet, SkipReason};
use crate::events::EventSink;
use crate::exclusion::matcher::ExclusionMatcher;
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::pipeline::{elapsed_ms, load_matcher, verification_reference};
use crate::runtime::RuntimeClient;
use crate::state::{ClusterState, StateSection};

// ──────────────────── targets ────────────────────

/// One removal target.
///
/// A digest only ever matches the image stored under exactly that digest on
/// this node. A bare reference is resolved against the local inventory, so it
/// names whatever image carries it right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EraseTarget {
    Digest(String),
    Reference(String),
}

impl EraseTarget {
    /// Classify a work-order string.
    pub fn parse(identifier: &str) -> Self {
        let identifier = identifier.trim();
        if is_content_digest(identifier) {
            Self::Digest(identifier.to_string())
        } else {
            Self::Reference(identifier.to_string())
        }
    }

    /// Key recorded in the report when the target does not resolve.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Digest(digest) => digest,
            Self::Reference(reference) => reference,
        }
    }

    fn resolve<'i>(&self, index: &'i ImageIndex) -> Option<&'i Image> {
        match self {
            Self::Digest(digest) => index.get(digest),
            Self::Reference(reference) => index.resolve(reference),
        }
    }
}

/// `algorithm:hex`, e.g. `sha256:4f2a...`.
fn is_content_digest(identifier: &str) -> bool {
    let Some((algorithm, encoded)) = identifier.split_once(':') else {
        return false;
    };
    algorithm.starts_with("sha")
        && algorithm[3..].chars().all(|c| c.is_ascii_digit())
        && !encoded.is_empty()
        && encoded.chars().all(|c| c.is_ascii_hexdigit())
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ImageListItem {
    Reference(String),
    Image { digest: String },
}

/// Parse a work-order file: a JSON array of digests/references or
/// `{"digest": ..., "tags": [...]}` objects. Object entries always match by
/// digest; their tags are informational.
pub fn load_image_list(path: &Path) -> Result<Vec<EraseTarget>> {
    let raw = std::fs::read_to_string(path).map_err(|source| EraserError::io(path, source))?;
    let items: Vec<ImageListItem> =
        serde_json::from_str(&raw).map_err(|e| EraserError::ConfigParse {
            context: "image list",
            details: format!("{}: {e}", path.display()),
        })?;

    let mut targets = Vec::with_capacity(items.len());
    for item in items {
        let target = match item {
            ImageListItem::Reference(reference) => EraseTarget::parse(&reference),
            ImageListItem::Image { digest, .. } => EraseTarget::Digest(digest.trim().to_string()),
        };
        if target.as_str().is_empty() {
            return Err(EraserError::ConfigParse {
                context: "image list",
                details: format!("{}: empty image identifier", path.display()),
            });
        }
        targets.push(target);
    }
    Ok(targets)
}

// ──────────────────── eraser ────────────────────

/// Inputs for one eraser run.
#[derive(Debug, Clone)]
pub struct EraserOptions {
    pub node: String,
    pub run_id: String,
    pub exclusion_path: PathBuf,
    pub extra_patterns: Vec<String>,
    /// Work-order file; when absent targets come from shared state.
    pub image_list: Option<PathBuf>,
    pub dry_run: bool,
    pub tag_fallback: bool,
}

/// Where the removal targets were read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetSource {
    ImageList,
    State,
}

#[derive(Debug, Clone, Serialize)]
pub struct EraseReport {
    pub source: TargetSource,
    pub targets: usize,
    pub report: RemovalReport,
    /// Whether the report was written to `status.removals.<node>`.
    pub published: bool,
    pub events_emitted: usize,
    pub events_failed: usize,
}

pub struct Eraser<'a> {
    runtime: &'a dyn RuntimeClient,
    state: &'a dyn ClusterState,
    events: Option<&'a dyn EventSink>,
    logger: Option<ActivityLoggerHandle>,
}

impl<'a> Eraser<'a> {
    pub fn new(
        runtime: &'a dyn RuntimeClient,
        state: &'a dyn ClusterState,
        logger: Option<ActivityLoggerHandle>,
    ) -> Self {
        Self {
            runtime,
            state,
            events: None,
            logger,
        }
    }

    /// Emit one event per removed image through `sink`.
    #[must_use]
    pub fn with_events(mut self, sink: &'a dyn EventSink) -> Self {
        self.events = Some(sink);
        self
    }

    pub async fn run(&self, options: &EraserOptions) -> Result<EraseReport> {
        let start = Instant::now();

        let (source, targets) = match &options.image_list {
            Some(path) => (TargetSource::ImageList, load_image_list(path)?),
            None => {
                let job = self.state.get(&options.run_id).await?;
                let targets = job
                    .status
                    .vulnerable
                    .into_iter()
                    .map(|image| EraseTarget::Digest(image.digest))
                    .collect();
                (TargetSource::State, targets)
            }
        };

        let matcher = load_matcher(
            &options.exclusion_path,
            &options.extra_patterns,
            self.logger.as_ref(),
        )?;
        let running = RunningSet::from_containers(&self.runtime.list_containers().await?);
        let index = ImageIndex::from_images(&self.runtime.list_images().await?);

        let mut report = RemovalReport::new(&options.node, options.dry_run);
        let mut removed_refs = Vec::new();
        let mut seen = HashSet::new();

        for target in &targets {
            let Some(current) = target.resolve(&index) else {
                report.record(target.as_str(), RemovalOutcome::NotFound);
                self.log_event(ActivityEvent::ImageNotFound {
                    digest: target.as_str().to_string(),
                });
                continue;
            };
            if !seen.insert(current.digest.clone()) {
                continue;
            }

            let outcome = self.erase_one(current, &matcher, &running, options).await;
            if let RemovalOutcome::Removed { .. } = outcome {
                removed_refs.push((
                    current.digest.clone(),
                    verification_reference(current).to_string(),
                ));
            }
            report.record(current.digest.clone(), outcome);
        }
        report.duration_ms = elapsed_ms(start);

        let (events_emitted, events_failed) = self.emit_events(&options.node, &removed_refs).await;

        let published = source == TargetSource::State;
        if published {
            let patch = json!({ "removals": { options.node.as_str(): &report } });
            self.state
                .patch_merge(&options.run_id, StateSection::Status, &patch)
                .await?;
        }

        Ok(EraseReport {
            source,
            targets: targets.len(),
            report,
            published,
            events_emitted,
            events_failed,
        })
    }

    async fn erase_one(
        &self,
        image: &Image,
        matcher: &ExclusionMatcher,
        running: &RunningSet,
        options: &EraserOptions,
    ) -> RemovalOutcome {
        if let Some(rule) = matcher.exclusion_reason(image) {
            return self.skip(&image.digest, SkipReason::Excluded, rule);
        }
        if running.pins(image) {
            return self.skip(
                &image.digest,
                SkipReason::Running,
                "in use by a running container".to_string(),
            );
        }
        if options.dry_run {
            self.log_event(ActivityEvent::ImageRemoved {
                digest: image.digest.clone(),
                handle: image.digest.clone(),
                duration_ms: 0,
                dry_run: true,
            });
            return RemovalOutcome::Skipped {
                reason: SkipReason::DryRun,
                detail: "would remove".to_string(),
            };
        }

        let started = Instant::now();
        let mut handles = vec![image.digest.as_str()];
        if options.tag_fallback {
            handles.extend(image.tags.iter().map(String::as_str));
        }

        let mut first_error: Option<EraserError> = None;
        for handle in handles {
            match self.runtime.remove_image(handle).await {
                Ok(()) => {
                    self.log_event(ActivityEvent::ImageRemoved {
                        digest: image.digest.clone(),
                        handle: handle.to_string(),
                        duration_ms: elapsed_ms(started),
                        dry_run: false,
                    });
                    return RemovalOutcome::Removed {
                        handle: handle.to_string(),
                    };
                }
                Err(err) if err.is_not_found() => {}
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) => {
                self.log_event(ActivityEvent::RemovalFailed {
                    digest: image.digest.clone(),
                    error_code: err.code().to_string(),
                    error_message: err.to_string(),
                });
                RemovalOutcome::Failed {
                    error_code: err.code().to_string(),
                    error: err.to_string(),
                }
            }
            None => {
                self.log_event(ActivityEvent::ImageNotFound {
                    digest: image.digest.clone(),
                });
                RemovalOutcome::NotFound
            }
        }
    }

    fn skip(&self, digest: &str, reason: SkipReason, detail: String) -> RemovalOutcome {
        self.log_event(ActivityEvent::ImageSkipped {
            digest: digest.to_string(),
            reason: format!("{reason}: {detail}"),
        });
        RemovalOutcome::Skipped { reason, detail }
    }

    async fn emit_events(&self, node: &str, removed: &[(String, String)]) -> (usize, usize) {
        let Some(sink) = self.events else {
            return (0, 0);
        };
        let mut emitted = 0;
        let mut failed = 0;
        for (digest, reference) in removed {
            match sink.image_removed(node, digest, reference).await {
                Ok(()) => emitted += 1,
                Err(err) => {
                    failed += 1;
                    self.log_event(ActivityEvent::EventEmitFailed {
                        digest: digest.clone(),
                        error_message: err.to_string(),
                    });
                }
            }
        }
        (emitted, failed)
    }

    fn log_event(&self, event: ActivityEvent) {
        if let Some(logger) = &self.logger {
            logger.send(event);
        }
    }
}
