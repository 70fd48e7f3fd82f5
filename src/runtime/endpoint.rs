//! Runtime name → socket resolution and endpoint parsing.

#![allow(missing_docs)]

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::core::config::RuntimeConfig;
use crate::core::errors::{EraserError, Result};

/// Container runtimes with a well-known CRI socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeKind {
    Containerd,
    Crio,
    Dockershim,
}

impl RuntimeKind {
    pub const ALL: [Self; 3] = [Self::Containerd, Self::Crio, Self::Dockershim];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Containerd => "containerd",
            Self::Crio => "crio",
            Self::Dockershim => "dockershim",
        }
    }

    /// Default socket path for this runtime.
    #[must_use]
    pub const fn default_socket(self) -> &'static str {
        match self {
            Self::Containerd => "/run/containerd/containerd.sock",
            Self::Crio => "/var/run/crio/crio.sock",
            Self::Dockershim => "/var/run/dockershim.sock",
        }
    }
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuntimeKind {
    type Err = EraserError;

    fn from_str(raw: &str) -> Result<Self> {
        let name = raw.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == name)
            .ok_or_else(|| EraserError::UnsupportedRuntime {
                name: raw.trim().to_string(),
            })
    }
}

/// A resolved local CRI endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeEndpoint {
    socket: PathBuf,
    raw: String,
}

impl RuntimeEndpoint {
    /// Resolve from config: an explicit endpoint wins over the runtime name.
    pub fn resolve(config: &RuntimeConfig) -> Result<Self> {
        match config.endpoint.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => Self::parse(raw),
            _ => {
                let kind: RuntimeKind = config.name.parse()?;
                Self::parse(&format!("unix://{}", kind.default_socket()))
            }
        }
    }

    /// Parse `unix:///path` or a bare path (treated as a unix socket).
    /// Any other scheme is rejected.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let path = match trimmed.split_once("://") {
            Some(("unix", rest)) => rest,
            Some((scheme, _)) => {
                return Err(EraserError::UnsupportedProtocol {
                    endpoint: trimmed.to_string(),
                    scheme: scheme.to_string(),
                });
            }
            None => trimmed,
        };
        if path.is_empty() {
            return Err(EraserError::InvalidConfig {
                details: format!("runtime endpoint {trimmed:?} has no socket path"),
            });
        }
        Ok(Self {
            socket: PathBuf::from(path),
            raw: trimmed.to_string(),
        })
    }

    #[must_use]
    pub fn socket(&self) -> &Path {
        &self.socket
    }

    /// `unix://` form for log lines and errors.
    #[must_use]
    pub fn uri(&self) -> String {
        format!("unix://{}", self.socket.display())
    }

    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(name: &str, endpoint: Option<&str>) -> RuntimeConfig {
        RuntimeConfig {
            name: name.to_string(),
            endpoint: endpoint.map(str::to_string),
            ..RuntimeConfig::default()
        }
    }

    #[test]
    fn known_runtimes_resolve_to_default_sockets() {
        for (name, socket) in [
            ("containerd", "/run/containerd/containerd.sock"),
            ("crio", "/var/run/crio/crio.sock"),
            ("dockershim", "/var/run/dockershim.sock"),
            (" Containerd ", "/run/containerd/containerd.sock"),
        ] {
            let ep = RuntimeEndpoint::resolve(&config(name, None)).unwrap();
            assert_eq!(ep.socket(), Path::new(socket), "{name}");
        }
    }

    #[test]
    fn unknown_runtime_is_rejected() {
        let err = RuntimeEndpoint::resolve(&config("rkt", None)).unwrap_err();
        assert_eq!(err.code(), "ERA-1101");
        assert!(err.to_string().contains("rkt"));
    }

    #[test]
    fn explicit_endpoint_overrides_name() {
        let ep =
            RuntimeEndpoint::resolve(&config("rkt", Some("unix:///tmp/custom.sock"))).unwrap();
        assert_eq!(ep.socket(), Path::new("/tmp/custom.sock"));
        assert_eq!(ep.uri(), "unix:///tmp/custom.sock");
    }

    #[test]
    fn blank_endpoint_falls_back_to_name() {
        let ep = RuntimeEndpoint::resolve(&config("crio", Some("  "))).unwrap();
        assert_eq!(ep.socket(), Path::new("/var/run/crio/crio.sock"));
    }

    #[test]
    fn bare_path_is_treated_as_unix_socket() {
        let ep = RuntimeEndpoint::parse("/run/k3s/containerd/containerd.sock").unwrap();
        assert_eq!(ep.socket(), Path::new("/run/k3s/containerd/containerd.sock"));
        assert_eq!(ep.uri(), "unix:///run/k3s/containerd/containerd.sock");
    }

    #[test]
    fn non_unix_schemes_are_unsupported() {
        for raw in ["tcp://10.0.0.1:1234", "http://localhost", "npipe:////./pipe/x"] {
            let err = RuntimeEndpoint::parse(raw).unwrap_err();
            assert_eq!(err.code(), "ERA-1102", "{raw}");
        }
    }

    #[test]
    fn empty_socket_path_is_invalid() {
        assert_eq!(RuntimeEndpoint::parse("unix://").unwrap_err().code(), "ERA-1001");
    }
}
