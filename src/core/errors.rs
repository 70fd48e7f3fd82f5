//! ERA-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, EraserError>;

/// Top-level error type for the image eraser pipeline.
#[derive(Debug, Error)]
pub enum EraserError {
    #[error("[ERA-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[ERA-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[ERA-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[ERA-1101] unsupported container runtime: {name}")]
    UnsupportedRuntime { name: String },

    #[error("[ERA-1102] unsupported endpoint protocol {scheme:?} in {endpoint}")]
    UnsupportedProtocol { endpoint: String, scheme: String },

    #[error("[ERA-2001] cannot connect to {target}: {details}")]
    Connection { target: String, details: String },

    #[error("[ERA-2002] runtime call {operation} failed for {target}: {details}")]
    Runtime {
        operation: &'static str,
        target: String,
        details: String,
    },

    #[error("[ERA-2003] image not found: {target}")]
    NotFound { target: String },

    #[error("[ERA-2101] verification of {image} failed: {details}")]
    Verification { image: String, details: String },

    #[error("[ERA-2201] shared state {operation} failed for run {run_id}: {details}")]
    StateIo {
        operation: &'static str,
        run_id: String,
        details: String,
    },

    #[error("[ERA-2301] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[ERA-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl EraserError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "ERA-1001",
            Self::MissingConfig { .. } => "ERA-1002",
            Self::ConfigParse { .. } => "ERA-1003",
            Self::UnsupportedRuntime { .. } => "ERA-1101",
            Self::UnsupportedProtocol { .. } => "ERA-1102",
            Self::Connection { .. } => "ERA-2001",
            Self::Runtime { .. } => "ERA-2002",
            Self::NotFound { .. } => "ERA-2003",
            Self::Verification { .. } => "ERA-2101",
            Self::StateIo { .. } => "ERA-2201",
            Self::Serialization { .. } => "ERA-2301",
            Self::Io { .. } => "ERA-3002",
        }
    }

    /// Whether a later cycle re-running the phase might succeed.
    ///
    /// Nothing retries inside a process; the scheduler re-runs the job.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::Runtime { .. }
                | Self::Verification { .. }
                | Self::StateIo { .. }
                | Self::Io { .. }
        )
    }

    /// Not-found on removal is an idempotent success, never a failure.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Convenience constructor for shared-state failures.
    #[must_use]
    pub fn state_io(operation: &'static str, run_id: &str, details: impl ToString) -> Self {
        Self::StateIo {
            operation,
            run_id: run_id.to_string(),
            details: details.to_string(),
        }
    }

    /// Map a gRPC status from a CRI call, folding `NOT_FOUND` into [`Self::NotFound`].
    #[must_use]
    pub fn from_status(operation: &'static str, target: &str, status: &tonic::Status) -> Self {
        match status.code() {
            tonic::Code::NotFound => Self::NotFound {
                target: target.to_string(),
            },
            code => Self::Runtime {
                operation,
                target: target.to_string(),
                details: format!("{code:?}: {}", status.message()),
            },
        }
    }
}

impl From<serde_json::Error> for EraserError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for EraserError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

impl From<tonic::Status> for EraserError {
    fn from(status: tonic::Status) -> Self {
        Self::from_status("cri", "runtime", &status)
    }
}

impl From<reqwest::Error> for EraserError {
    fn from(value: reqwest::Error) -> Self {
        let target = value
            .url()
            .map_or_else(|| "api server".to_string(), |url| url.as_str().to_string());
        Self::Connection {
            target,
            details: value.to_string(),
        }
    }
}

impl From<tonic::transport::Error> for EraserError {
    fn from(value: tonic::transport::Error) -> Self {
        Self::Connection {
            target: "cri".to_string(),
            details: value.to_string(),
        }
    }
}
