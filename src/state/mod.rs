//! Shared cluster state: the per-run record the three phases communicate through.

pub mod api;
pub mod document;
pub mod file;
pub mod memory;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::config::{StateBackend, StateConfig};
use crate::core::errors::Result;

pub use api::ApiStateStore;
pub use document::{ImageJob, JobSpec, JobStatus, StateSection, merge_patch};
pub use file::FileStateStore;
pub use memory::MemoryStateStore;

/// Read and merge-patch access to run records.
#[async_trait]
pub trait ClusterState: Send + Sync {
    /// The record for `run_id`. A missing record is a `StateIo` error.
    async fn get(&self, run_id: &str) -> Result<ImageJob>;

    /// Apply an RFC 7386 merge-patch to one section of the record.
    ///
    /// `patch` is relative to the section, e.g. `{"nodes": {"node-a": [...]}}`
    /// for [`StateSection::Spec`]. A spec patch creates the record if needed.
    async fn patch_merge(&self, run_id: &str, section: StateSection, patch: &Value) -> Result<()>;
}

/// Build the configured backend.
pub fn open(config: &StateConfig) -> Result<Box<dyn ClusterState>> {
    Ok(match config.backend {
        StateBackend::File => Box::new(FileStateStore::new(&config.dir)),
        StateBackend::Api => Box::new(ApiStateStore::from_config(&config.api)?),
    })
}
