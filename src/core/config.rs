//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{EraserError, Result};

/// Default namespace when `POD_NAMESPACE` is unset.
pub const DEFAULT_NAMESPACE: &str = "eraser-system";

/// Full eraser configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
#[derive(Default)]
pub struct Config {
    pub runtime: RuntimeConfig,
    pub node: NodeConfig,
    pub exclusion: ExclusionConfig,
    pub state: StateConfig,
    pub scanner: ScannerConfig,
    pub eraser: EraserConfig,
    pub logging: LoggingConfig,
}

/// Container runtime connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Runtime name used to pick a well-known socket (containerd, crio, dockershim).
    pub name: String,
    /// Explicit endpoint; overrides the runtime-name lookup when set.
    pub endpoint: Option<String>,
    pub dial_timeout_secs: u64,
    pub call_timeout_secs: u64,
}

/// Identity of the node this process runs on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NodeConfig {
    pub name: Option<String>,
    pub namespace: String,
}

/// Where exclusion patterns come from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExclusionConfig {
    /// File or directory of exclusion documents.
    pub path: PathBuf,
    /// Inline patterns appended to whatever the artifact provides.
    pub patterns: Vec<String>,
}

/// Shared-state backend selection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    #[default]
    File,
    Api,
}

/// Shared-state location and run identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StateConfig {
    pub backend: StateBackend,
    /// Run identifier; one shared-state record per run.
    pub run_id: String,
    /// Directory for the file backend.
    pub dir: PathBuf,
    pub api: ApiConfig,
}

/// Cluster REST API settings for the `api` backend and event sink.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ApiConfig {
    /// API server base URL; derived from `KUBERNETES_SERVICE_HOST`/`_PORT` when unset.
    pub server: Option<String>,
    pub token_file: PathBuf,
    pub ca_file: PathBuf,
    pub group_version: String,
    pub resource: String,
    /// Object kind used when the run record has to be created.
    pub kind: String,
    pub request_timeout_secs: u64,
}

/// Verification capability settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScannerConfig {
    /// Verifier argv; the image reference is appended as the last argument.
    pub verifier_command: Vec<String>,
    pub verify_timeout_secs: u64,
    /// Exit code meaning "checked, no valid signature" (vulnerable).
    pub unverified_exit_code: i32,
}

/// Removal behavior.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EraserConfig {
    pub dry_run: bool,
    pub emit_removal_events: bool,
    /// Retry removal by reference when the digest handle is not found.
    pub tag_fallback: bool,
}

/// Activity log settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// JSONL file; `None` writes lines to stderr.
    pub path: Option<PathBuf>,
    pub fallback_path: Option<PathBuf>,
    pub max_size_bytes: u64,
    pub max_rotated_files: u32,
    pub fsync_interval_secs: u64,
    pub channel_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            name: "containerd".to_string(),
            endpoint: None,
            dial_timeout_secs: 300,
            call_timeout_secs: 60,
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: None,
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }
}

impl Default for ExclusionConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/run/eraser.sh/excluded"),
            patterns: Vec::new(),
        }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            backend: StateBackend::File,
            run_id: "collector-cr".to_string(),
            dir: PathBuf::from("/var/lib/eraser/state"),
            api: ApiConfig::default(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        let sa = PathBuf::from("/var/run/secrets/kubernetes.io/serviceaccount");
        Self {
            server: None,
            token_file: sa.join("token"),
            ca_file: sa.join("ca.crt"),
            group_version: "eraser.sh/v1alpha1".to_string(),
            resource: "imagejobs".to_string(),
            kind: "ImageJob".to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            verifier_command: Vec::new(),
            verify_timeout_secs: 120,
            unverified_exit_code: 1,
        }
    }
}

impl Default for EraserConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            emit_removal_events: true,
            tag_fallback: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            path: None,
            fallback_path: None,
            max_size_bytes: 100 * 1024 * 1024,
            max_rotated_files: 5,
            fsync_interval_secs: 10,
            channel_capacity: 1024,
        }
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathBuf::from("/etc/eraser/config.toml")
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| EraserError::Io {
                path: path_buf.clone(),
                source,
            })?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(EraserError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.apply_env_overrides_from(env_var)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for the startup log line (FNV-1a).
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    /// Node name, required by the collector and eraser.
    pub fn require_node_name(&self) -> Result<&str> {
        self.node
            .name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| EraserError::InvalidConfig {
                details: "node name is not set (use --node-name or NODE_NAME)".to_string(),
            })
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        // runtime
        if let Some(raw) = lookup("ERASER_RUNTIME") {
            self.runtime.name = raw;
        }
        if let Some(raw) = lookup("ERASER_RUNTIME_ENDPOINT") {
            self.runtime.endpoint = Some(raw);
        }
        if let Some(raw) = lookup("ERASER_RUNTIME_DIAL_TIMEOUT_SECS") {
            self.runtime.dial_timeout_secs =
                parse_env_u64("ERASER_RUNTIME_DIAL_TIMEOUT_SECS", &raw)?;
        }
        if let Some(raw) = lookup("ERASER_RUNTIME_CALL_TIMEOUT_SECS") {
            self.runtime.call_timeout_secs =
                parse_env_u64("ERASER_RUNTIME_CALL_TIMEOUT_SECS", &raw)?;
        }

        // node identity comes from the downward API
        if let Some(raw) = lookup("NODE_NAME") {
            self.node.name = Some(raw);
        }
        if let Some(raw) = lookup("POD_NAMESPACE") {
            self.node.namespace = raw;
        }

        // exclusion
        if let Some(raw) = lookup("ERASER_EXCLUSION_PATH") {
            self.exclusion.path = PathBuf::from(raw);
        }

        // state
        if let Some(raw) = lookup("ERASER_STATE_BACKEND") {
            self.state.backend = parse_backend(&raw)?;
        }
        if let Some(raw) = lookup("ERASER_RUN_ID") {
            self.state.run_id = raw;
        }
        if let Some(raw) = lookup("ERASER_STATE_DIR") {
            self.state.dir = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("ERASER_API_SERVER") {
            self.state.api.server = Some(raw);
        }

        // scanner
        if let Some(raw) = lookup("ERASER_SCANNER_VERIFY_TIMEOUT_SECS") {
            self.scanner.verify_timeout_secs =
                parse_env_u64("ERASER_SCANNER_VERIFY_TIMEOUT_SECS", &raw)?;
        }

        // eraser
        if let Some(raw) = lookup("ERASER_DRY_RUN") {
            self.eraser.dry_run = parse_env_bool("ERASER_DRY_RUN", &raw)?;
        }
        if let Some(raw) = lookup("ERASER_EMIT_REMOVAL_EVENTS") {
            self.eraser.emit_removal_events =
                parse_env_bool("ERASER_EMIT_REMOVAL_EVENTS", &raw)?;
        }

        // logging
        if let Some(raw) = lookup("ERASER_LOG_PATH") {
            self.logging.path = Some(PathBuf::from(raw));
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.runtime.name.trim().is_empty() && self.runtime.endpoint.is_none() {
            return Err(EraserError::InvalidConfig {
                details: "runtime.name or runtime.endpoint must be set".to_string(),
            });
        }

        for (name, val) in [
            ("runtime.dial_timeout_secs", self.runtime.dial_timeout_secs),
            ("runtime.call_timeout_secs", self.runtime.call_timeout_secs),
            ("scanner.verify_timeout_secs", self.scanner.verify_timeout_secs),
            (
                "state.api.request_timeout_secs",
                self.state.api.request_timeout_secs,
            ),
        ] {
            if val == 0 {
                return Err(EraserError::InvalidConfig {
                    details: format!("{name} must be > 0"),
                });
            }
        }

        if self.state.run_id.trim().is_empty() {
            return Err(EraserError::InvalidConfig {
                details: "state.run_id must not be empty".to_string(),
            });
        }
        // The run id becomes a file name and a URL path segment.
        if self
            .state
            .run_id
            .chars()
            .any(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_')))
        {
            return Err(EraserError::InvalidConfig {
                details: format!(
                    "state.run_id {:?} may only contain [A-Za-z0-9._-]",
                    self.state.run_id
                ),
            });
        }

        if self.node.namespace.trim().is_empty() {
            return Err(EraserError::InvalidConfig {
                details: "node.namespace must not be empty".to_string(),
            });
        }

        if self.logging.channel_capacity == 0 || self.logging.max_size_bytes == 0 {
            return Err(EraserError::InvalidConfig {
                details: "logging.channel_capacity and logging.max_size_bytes must be > 0"
                    .to_string(),
            });
        }

        for pattern in &self.exclusion.patterns {
            crate::exclusion::matcher::validate_pattern(pattern)?;
        }

        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_backend(raw: &str) -> Result<StateBackend> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "file" => Ok(StateBackend::File),
        "api" => Ok(StateBackend::Api),
        other => Err(EraserError::ConfigParse {
            context: "env",
            details: format!("ERASER_STATE_BACKEND={other:?}: expected \"file\" or \"api\""),
        }),
    }
}

fn parse_env_u64(name: &str, raw: &str) -> Result<u64> {
    raw.parse::<u64>().map_err(|error| EraserError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}

fn parse_env_bool(name: &str, raw: &str) -> Result<bool> {
    raw.parse::<bool>().map_err(|error| EraserError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}
