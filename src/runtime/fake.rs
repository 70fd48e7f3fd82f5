//! In-memory [`RuntimeClient`] for tests and local dry runs.

#![allow(missing_docs)]

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::core::errors::{EraserError, Result};
use crate::core::model::{Container, Image};
use crate::runtime::RuntimeClient;

#[derive(Debug, Default)]
struct Inner {
    images: Vec<Image>,
    containers: Vec<Container>,
    removals: Vec<String>,
    remove_failures: HashMap<String, String>,
    list_failure: Option<String>,
    reject_digest_handles: bool,
}

/// Fake runtime holding an image and container inventory.
///
/// Removing an image deletes it from the inventory, so a second removal of
/// the same handle reports not-found like a real runtime does.
#[derive(Debug, Default)]
pub struct FakeRuntime {
    inner: Mutex<Inner>,
}

impl FakeRuntime {
    pub fn new(images: Vec<Image>, containers: Vec<Container>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                images,
                containers,
                ..Inner::default()
            }),
        }
    }

    /// Make `remove_image(handle)` fail with a runtime error.
    pub fn fail_removal(&self, handle: &str, details: &str) {
        self.inner
            .lock()
            .remove_failures
            .insert(handle.to_string(), details.to_string());
    }

    /// Make both list calls fail.
    pub fn fail_listing(&self, details: &str) {
        self.inner.lock().list_failure = Some(details.to_string());
    }

    /// Report not-found for digest handles so callers must fall back to references.
    pub fn reject_digest_handles(&self) {
        self.inner.lock().reject_digest_handles = true;
    }

    pub fn set_containers(&self, containers: Vec<Container>) {
        self.inner.lock().containers = containers;
    }

    /// Every handle passed to `remove_image`, in call order, including failed ones.
    pub fn removal_calls(&self) -> Vec<String> {
        self.inner.lock().removals.clone()
    }

    /// Digests still present.
    pub fn image_digests(&self) -> Vec<String> {
        self.inner
            .lock()
            .images
            .iter()
            .map(|img| img.digest.clone())
            .collect()
    }
}

#[async_trait]
impl RuntimeClient for FakeRuntime {
    async fn list_images(&self) -> Result<Vec<Image>> {
        let inner = self.inner.lock();
        if let Some(details) = &inner.list_failure {
            return Err(EraserError::Runtime {
                operation: "list_images",
                target: "fake".to_string(),
                details: details.clone(),
            });
        }
        Ok(inner.images.clone())
    }

    async fn list_containers(&self) -> Result<Vec<Container>> {
        let inner = self.inner.lock();
        if let Some(details) = &inner.list_failure {
            return Err(EraserError::Runtime {
                operation: "list_containers",
                target: "fake".to_string(),
                details: details.clone(),
            });
        }
        Ok(inner.containers.clone())
    }

    async fn remove_image(&self, handle: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.removals.push(handle.to_string());

        if let Some(details) = inner.remove_failures.get(handle) {
            return Err(EraserError::Runtime {
                operation: "remove_image",
                target: handle.to_string(),
                details: details.clone(),
            });
        }

        let by_digest = inner.images.iter().position(|img| img.digest == handle);
        let position = if by_digest.is_some() && inner.reject_digest_handles {
            None
        } else {
            by_digest.or_else(|| {
                inner
                    .images
                    .iter()
                    .position(|img| img.tags.iter().any(|t| t == handle))
            })
        };

        match position {
            Some(idx) => {
                inner.images.remove(idx);
                Ok(())
            }
            None => Err(EraserError::NotFound {
                target: handle.to_string(),
            }),
        }
    }
}
