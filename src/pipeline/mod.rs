//! The three phases: collect, scan, erase.
//!
//! Each phase is a short-lived run that reads its inputs, acts, and publishes a
//! single patch to shared state. Phases never call each other.

pub mod collector;
pub mod eraser;
pub mod reconcile;
pub mod scanner;

use std::path::Path;
use std::time::Instant;

use crate::core::errors::Result;
use crate::exclusion::artifact::load_exclusions;
use crate::exclusion::matcher::ExclusionMatcher;
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};

pub use collector::{CollectReport, Collector, CollectorOptions};
pub use eraser::{EraseReport, EraseTarget, Eraser, EraserOptions, TargetSource, load_image_list};
pub use reconcile::{Reconciliation, reconcile, reconcile_detailed};
pub use scanner::{ScanReport, Scanner, verification_reference};

/// Phase names used in log context and CLI output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Collect,
    Scan,
    Erase,
}

impl Phase {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Collect => "collect",
            Self::Scan => "scan",
            Self::Erase => "erase",
        }
    }
}

/// Load the exclusion artifact fresh and compile it with inline patterns.
///
/// A missing artifact is reported to the log and yields only the inline rules.
pub fn load_matcher(
    path: &Path,
    extra_patterns: &[String],
    logger: Option<&ActivityLoggerHandle>,
) -> Result<ExclusionMatcher> {
    let loaded = load_exclusions(path)?;
    let matcher = loaded.compile(extra_patterns)?;
    if let Some(logger) = logger {
        if loaded.missing {
            logger.send(ActivityEvent::ExclusionMissing {
                path: path.display().to_string(),
            });
        }
        logger.send(ActivityEvent::ExclusionLoaded {
            rules: matcher.rule_count(),
            sources: loaded.sources.len(),
        });
    }
    Ok(matcher)
}

#[allow(clippy::cast_possible_truncation)]
pub(crate) fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}
