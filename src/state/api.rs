//! Cluster REST API access: the run record as a custom resource, plus the
//! shared HTTP client the event sink reuses.
//!
//! Spec patches go to the object, status patches to its `/status`
//! subresource, both as `application/merge-patch+json`. The first spec patch
//! of a run creates the object.

#![allow(missing_docs)]

use std::fs;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde_json::{Value, json};

use crate::core::config::ApiConfig;
use crate::core::errors::{EraserError, Result};
use crate::state::ClusterState;
use crate::state::document::{ImageJob, StateSection};

pub const MERGE_PATCH: &str = "application/merge-patch+json";
const JSON: &str = "application/json";

/// Status and body of one API call.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: String,
}

impl ApiResponse {
    fn summary(&self) -> String {
        let body = self.body.trim();
        if body.is_empty() {
            self.status.to_string()
        } else {
            format!("{}: {}", self.status, truncate(body, 512))
        }
    }
}

/// Authenticated HTTP client for the cluster API server.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    server: String,
    token: Option<String>,
}

impl ApiClient {
    /// Build from config, reading the service-account token and CA bundle when present.
    pub fn from_config(config: &ApiConfig) -> Result<Self> {
        Self::from_config_with(config, |name| std::env::var(name).ok())
    }

    fn from_config_with<F>(config: &ApiConfig, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let server = resolve_server(config.server.as_deref(), lookup)?;

        let token = match fs::read_to_string(&config.token_file) {
            Ok(raw) => Some(raw.trim().to_string()).filter(|t| !t.is_empty()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(source) => return Err(EraserError::io(&config.token_file, source)),
        };

        let mut builder = reqwest::Client::builder()
            .user_agent(concat!("image-eraser/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.request_timeout_secs));
        match fs::read(&config.ca_file) {
            Ok(pem) => {
                let cert = reqwest::Certificate::from_pem(&pem).map_err(|e| {
                    EraserError::InvalidConfig {
                        details: format!("CA bundle {}: {e}", config.ca_file.display()),
                    }
                })?;
                builder = builder.add_root_certificate(cert);
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => return Err(EraserError::io(&config.ca_file, source)),
        }

        Ok(Self {
            http: builder.build()?,
            server,
            token,
        })
    }

    /// Client without credentials, for local API servers and tests.
    pub fn plain(server: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder().timeout(timeout).build()?,
            server: server.trim_end_matches('/').to_string(),
            token: None,
        })
    }

    #[must_use]
    pub fn server(&self) -> &str {
        &self.server
    }

    /// Send one request. Non-2xx statuses are returned, not raised.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        content_type: &str,
        body: Option<&Value>,
    ) -> Result<ApiResponse> {
        let url = format!("{}{path}", self.server);
        let mut req = self
            .http
            .request(method, &url)
            .header(reqwest::header::ACCEPT, JSON);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        if let Some(body) = body {
            req = req
                .header(reqwest::header::CONTENT_TYPE, content_type)
                .body(serde_json::to_vec(body)?);
        }
        let response = req.send().await?;
        let status = response.status();
        let body = response.text().await?;
        Ok(ApiResponse { status, body })
    }
}

/// Explicit server, else the in-cluster service env.
fn resolve_server<F>(explicit: Option<&str>, lookup: F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(server) = explicit.map(str::trim).filter(|s| !s.is_empty()) {
        return Ok(server.trim_end_matches('/').to_string());
    }
    match (
        lookup("KUBERNETES_SERVICE_HOST"),
        lookup("KUBERNETES_SERVICE_PORT"),
    ) {
        (Some(host), Some(port)) if !host.is_empty() && !port.is_empty() => {
            if host.contains(':') {
                Ok(format!("https://[{host}]:{port}"))
            } else {
                Ok(format!("https://{host}:{port}"))
            }
        }
        _ => Err(EraserError::InvalidConfig {
            details: "state.api.server is not set and KUBERNETES_SERVICE_HOST/PORT are absent"
                .to_string(),
        }),
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

// ──────────────────── state store ────────────────────

/// Run records stored as cluster-scoped custom resources.
#[derive(Debug, Clone)]
pub struct ApiStateStore {
    client: ApiClient,
    group_version: String,
    resource: String,
    kind: String,
}

impl ApiStateStore {
    pub fn from_config(config: &ApiConfig) -> Result<Self> {
        Ok(Self::with_client(ApiClient::from_config(config)?, config))
    }

    pub fn with_client(client: ApiClient, config: &ApiConfig) -> Self {
        Self {
            client,
            group_version: config.group_version.clone(),
            resource: config.resource.clone(),
            kind: config.kind.clone(),
        }
    }

    fn collection_path(&self) -> String {
        format!("/apis/{}/{}", self.group_version, self.resource)
    }

    #[must_use]
    pub fn object_path(&self, run_id: &str, section: StateSection) -> String {
        match section {
            StateSection::Spec => format!("{}/{run_id}", self.collection_path()),
            StateSection::Status => format!("{}/{run_id}/status", self.collection_path()),
        }
    }

    async fn create(&self, run_id: &str, spec: &Value) -> Result<ApiResponse> {
        let object = json!({
            "apiVersion": self.group_version,
            "kind": self.kind,
            "metadata": {"name": run_id},
            "spec": spec,
        });
        self.client
            .request(Method::POST, &self.collection_path(), JSON, Some(&object))
            .await
    }

    async fn patch(&self, run_id: &str, section: StateSection, patch: &Value) -> Result<ApiResponse> {
        self.client
            .request(
                Method::PATCH,
                &self.object_path(run_id, section),
                MERGE_PATCH,
                Some(&section.wrap(patch)),
            )
            .await
    }
}

#[async_trait]
impl ClusterState for ApiStateStore {
    async fn get(&self, run_id: &str) -> Result<ImageJob> {
        let response = self
            .client
            .request(
                Method::GET,
                &self.object_path(run_id, StateSection::Spec),
                JSON,
                None,
            )
            .await?;
        if !response.status.is_success() {
            return Err(EraserError::state_io("get", run_id, response.summary()));
        }
        serde_json::from_str(&response.body).map_err(|e| EraserError::state_io("get", run_id, e))
    }

    async fn patch_merge(&self, run_id: &str, section: StateSection, patch: &Value) -> Result<()> {
        let mut response = self.patch(run_id, section, patch).await?;

        if response.status == StatusCode::NOT_FOUND && section == StateSection::Spec {
            response = self.create(run_id, patch).await?;
            // Another node created it first; our contribution still needs merging.
            if response.status == StatusCode::CONFLICT {
                response = self.patch(run_id, section, patch).await?;
            }
        }

        if response.status.is_success() {
            Ok(())
        } else {
            Err(EraserError::state_io("patch", run_id, response.summary()))
        }
    }
}
