//! Container runtime access: the [`RuntimeClient`] seam, the CRI client, and a fake.

pub mod cri;
pub mod endpoint;
pub mod fake;

use std::time::Duration;

use async_trait::async_trait;

use crate::core::config::RuntimeConfig;
use crate::core::errors::Result;
use crate::core::model::{Container, Image};

pub use cri::CriClient;
pub use endpoint::{RuntimeEndpoint, RuntimeKind};

/// Operations the pipeline needs from the node's container runtime.
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    /// Every image the runtime knows about.
    async fn list_images(&self) -> Result<Vec<Image>>;

    /// Every container, in any state.
    async fn list_containers(&self) -> Result<Vec<Container>>;

    /// Remove one image by digest or reference.
    ///
    /// Returns [`crate::core::errors::EraserError::NotFound`] when the runtime
    /// has no image under `handle`.
    async fn remove_image(&self, handle: &str) -> Result<()>;
}

/// Resolve the configured endpoint and dial it.
pub async fn connect(config: &RuntimeConfig) -> Result<CriClient> {
    let endpoint = RuntimeEndpoint::resolve(config)?;
    CriClient::connect(
        &endpoint,
        Duration::from_secs(config.dial_timeout_secs),
        Duration::from_secs(config.call_timeout_secs),
    )
    .await
}
