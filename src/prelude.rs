//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use image_eraser::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{EraserError, Result};
pub use crate::core::model::{
    CandidateSet, Container, Image, ImageIndex, RemovalOutcome, RemovalReport, RunningSet,
    Verdict,
};

// Exclusions
pub use crate::exclusion::artifact::load_exclusions;
pub use crate::exclusion::matcher::ExclusionMatcher;

// Runtime and shared state
pub use crate::runtime::{CriClient, RuntimeClient, RuntimeEndpoint, RuntimeKind};
pub use crate::state::{ClusterState, ImageJob, StateSection};

// Phases
pub use crate::events::EventSink;
pub use crate::pipeline::{Collector, Eraser, Scanner, reconcile};
pub use crate::verify::Verifier;
