//! Scanner: classify every candidate in the run and publish the verdicts.
//!
//! Verified images are not recorded. A verification error marks that one
//! image Failed and the scan carries on; only unreadable state or a failed
//! status write fails the phase.

#![allow(missing_docs)]

use std::time::Instant;

use serde::Serialize;
use serde_json::json;

use crate::core::errors::Result;
use crate::core::model::{FailedImage, Image, Verdict};
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::pipeline::elapsed_ms;
use crate::state::{ClusterState, StateSection};
use crate::verify::Verifier;

/// Reference handed to the verifier: first `repo:tag`, else the first
/// reference of any kind, else the bare digest.
pub fn verification_reference(image: &Image) -> &str {
    image
        .tags
        .iter()
        .find(|t| !t.contains('@'))
        .or_else(|| image.tags.first())
        .map_or(image.digest.as_str(), String::as_str)
}

/// Verdicts in candidate (digest) order.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub run_id: String,
    pub verdicts: Vec<(String, Verdict)>,
    pub vulnerable: Vec<Image>,
    pub failed: Vec<FailedImage>,
    pub duration_ms: u64,
}

impl ScanReport {
    pub fn scanned(&self) -> usize {
        self.verdicts.len()
    }

    pub fn verified_count(&self) -> usize {
        self.verdicts
            .iter()
            .filter(|(_, v)| matches!(v, Verdict::Verified))
            .count()
    }
}

pub struct Scanner<'a> {
    verifier: &'a dyn Verifier,
    state: &'a dyn ClusterState,
    logger: Option<ActivityLoggerHandle>,
}

impl<'a> Scanner<'a> {
    pub fn new(
        verifier: &'a dyn Verifier,
        state: &'a dyn ClusterState,
        logger: Option<ActivityLoggerHandle>,
    ) -> Self {
        Self {
            verifier,
            state,
            logger,
        }
    }

    pub async fn run(&self, run_id: &str) -> Result<ScanReport> {
        let start = Instant::now();
        let job = self.state.get(run_id).await?;
        let candidates = job.candidates();

        let mut report = ScanReport {
            run_id: run_id.to_string(),
            verdicts: Vec::with_capacity(candidates.len()),
            vulnerable: Vec::new(),
            failed: Vec::new(),
            duration_ms: 0,
        };

        for image in candidates.iter() {
            let verdict = self.classify(image).await;
            match &verdict {
                Verdict::Verified => {}
                Verdict::Vulnerable => report.vulnerable.push(image.clone()),
                Verdict::Failed { reason } => report.failed.push(FailedImage {
                    digest: image.digest.clone(),
                    tags: image.tags.clone(),
                    reason: reason.clone(),
                }),
            }
            report.verdicts.push((image.digest.clone(), verdict));
        }

        let patch = json!({
            "vulnerable": &report.vulnerable,
            "failed": &report.failed,
        });
        self.state
            .patch_merge(run_id, StateSection::Status, &patch)
            .await?;

        report.duration_ms = elapsed_ms(start);
        Ok(report)
    }

    async fn classify(&self, image: &Image) -> Verdict {
        let reference = verification_reference(image);
        match self.verifier.verify(reference).await {
            Ok(true) => {
                self.log_event(ActivityEvent::ImageVerified {
                    digest: image.digest.clone(),
                    reference: reference.to_string(),
                });
                Verdict::Verified
            }
            Ok(false) => {
                self.log_event(ActivityEvent::ImageVulnerable {
                    digest: image.digest.clone(),
                    reference: reference.to_string(),
                });
                Verdict::Vulnerable
            }
            Err(err) => {
                self.log_event(ActivityEvent::VerificationFailed {
                    digest: image.digest.clone(),
                    reference: reference.to_string(),
                    error_code: err.code().to_string(),
                    error_message: err.to_string(),
                });
                Verdict::Failed {
                    reason: err.to_string(),
                }
            }
        }
    }

    fn log_event(&self, event: ActivityEvent) {
        if let Some(logger) = &self.logger {
            logger.send(event);
        }
    }
}
