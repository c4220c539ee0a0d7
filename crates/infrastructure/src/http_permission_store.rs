//! Permission store client for an OpenSearch-style security plugin.
//!
//! All grants share one role. The client owns the picture of what that role
//! currently admits ([`RuleBook`]) and rewrites the whole role document on
//! every change, one writer at a time. The in-memory book only advances once
//! the upsert has succeeded.


use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};
use url::Url;

use dlsgate_application::PermissionStore;
use dlsgate_core::{AppError, AppResult, PermissionStoreError};
use dlsgate_domain::{RequestId, RoleDocument, RuleBook, RuleLayout};

const ROLE_API_PATH: [&str; 4] = ["_plugins", "_security", "api", "roles"];

/// Client certificate and key used for mutual TLS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentityPaths {
    /// PEM-encoded certificate chain.
    pub certificate_path: PathBuf,
    /// PEM-encoded private key.
    pub key_path: PathBuf,
}

/// Connection settings for the authorization service.
#[derive(Debug, Clone)]
pub struct HttpPermissionStoreConfig {
    /// Service base URL, e.g. `https://localhost:9200`.
    pub base_url: Url,
    /// Name of the shared role every grant is written into.
    pub role_name: String,
    /// Basic auth credentials, if the service expects them.
    pub basic_auth: Option<(String, String)>,
    /// Client identity for mutual TLS.
    pub client_identity: Option<ClientIdentityPaths>,
    /// Extra trusted root certificate.
    pub ca_certificate_path: Option<PathBuf>,
    /// Skips server certificate validation. Testing only.
    pub accept_invalid_certs: bool,
    /// Per-request timeout.
    pub timeout: Duration,
    /// How grants are folded into the role.
    pub layout: RuleLayout,
}

/// HTTP implementation of the permission store port.
pub struct HttpPermissionStore {
    http_client: reqwest::Client,
    endpoint: Url,
    basic_auth: Option<(String, String)>,
    rules: Mutex<RuleBook>,
}

impl HttpPermissionStore {
    /// Builds the TLS client and resolves the role endpoint.
    pub fn new(config: HttpPermissionStoreConfig) -> AppResult<Self> {
        let http_client = build_http_client(&config)?;
        let endpoint = role_endpoint(&config.base_url, config.role_name.as_str())?;

        info!(
            endpoint = %endpoint,
            layout = config.layout.as_str(),
            mutual_tls = config.client_identity.is_some(),
            "permission store client configured"
        );

        Ok(Self::with_client(
            http_client,
            endpoint,
            config.basic_auth,
            config.layout,
        ))
    }

    /// Creates a store over an already configured HTTP client.
    #[must_use]
    pub fn with_client(
        http_client: reqwest::Client,
        endpoint: Url,
        basic_auth: Option<(String, String)>,
        layout: RuleLayout,
    ) -> Self {
        Self {
            http_client,
            endpoint,
            basic_auth,
            rules: Mutex::new(RuleBook::new(layout)),
        }
    }

    async fn apply<F>(&self, change: F) -> Result<(), PermissionStoreError>
    where
        F: FnOnce(&mut RuleBook) -> bool,
    {
        let mut rules = self.rules.lock().await;
        let mut next = rules.clone();
        let changed = change(&mut next);

        // Pushed even when unchanged so a repeat call also repairs drift.
        self.upsert(&next.render()).await?;
        if changed {
            *rules = next;
        }

        Ok(())
    }

    async fn upsert(&self, document: &RoleDocument) -> Result<(), PermissionStoreError> {
        debug!(
            endpoint = %self.endpoint,
            document = %serde_json::to_string(document).unwrap_or_default(),
            "sending role document"
        );

        let mut request = self.http_client.put(self.endpoint.clone()).json(document);
        if let Some((username, password)) = &self.basic_auth {
            request = request.basic_auth(username, Some(password));
        }

        let response = request
            .send()
            .await
            .map_err(|error| PermissionStoreError::Unreachable(error.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| PermissionStoreError::Unreachable(error.to_string()))?;

        if !status.is_success() {
            return Err(PermissionStoreError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        match serde_json::from_str::<Value>(body.as_str()) {
            Ok(Value::Object(payload)) => {
                let result = payload
                    .get("status")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or("unknown");
                debug!(status = status.as_u16(), result, "role document accepted");
                Ok(())
            }
            Ok(_) => Err(PermissionStoreError::Malformed(format!(
                "expected a JSON object, got: {body}"
            ))),
            Err(error) => Err(PermissionStoreError::Malformed(format!(
                "{error}; body: {body}"
            ))),
        }
    }
}

#[async_trait]
impl PermissionStore for HttpPermissionStore {
    async fn grant(
        &self,
        request_id: RequestId,
        index: &str,
        username: &str,
    ) -> Result<(), PermissionStoreError> {
        self.apply(|rules| rules.grant(request_id, index, username))
            .await
    }

    async fn clear(
        &self,
        request_id: RequestId,
        index: &str,
        username: &str,
    ) -> Result<(), PermissionStoreError> {
        self.apply(|rules| rules.clear(request_id, index, username))
            .await
    }
}

fn role_endpoint(base_url: &Url, role_name: &str) -> AppResult<Url> {
    if role_name.trim().is_empty() {
        return Err(AppError::Validation(
            "permission store role name must not be empty".to_owned(),
        ));
    }

    let mut endpoint = base_url.clone();
    endpoint
        .path_segments_mut()
        .map_err(|()| {
            AppError::Validation(format!(
                "permission store URL '{base_url}' cannot carry a path"
            ))
        })?
        .pop_if_empty()
        .extend(ROLE_API_PATH)
        .push(role_name);

    Ok(endpoint)
}

fn build_http_client(config: &HttpPermissionStoreConfig) -> AppResult<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .timeout(config.timeout)
        .danger_accept_invalid_certs(config.accept_invalid_certs);

    if let Some(identity) = &config.client_identity {
        let mut pem = read_pem(&identity.certificate_path)?;
        pem.push(b'\n');
        pem.extend(read_pem(&identity.key_path)?);
        let identity = reqwest::Identity::from_pem(&pem).map_err(|error| {
            AppError::Validation(format!("invalid permission store client identity: {error}"))
        })?;
        builder = builder.identity(identity);
    }

    if let Some(path) = &config.ca_certificate_path {
        let certificate = reqwest::Certificate::from_pem(&read_pem(path)?).map_err(|error| {
            AppError::Validation(format!(
                "invalid permission store CA certificate '{}': {error}",
                path.display()
            ))
        })?;
        builder = builder.add_root_certificate(certificate);
    }

    builder
        .build()
        .map_err(|error| AppError::Internal(format!("failed to build HTTP client: {error}")))
}

fn read_pem(path: &Path) -> AppResult<Vec<u8>> {
    std::fs::read(path).map_err(|error| {
        AppError::Validation(format!("failed to read '{}': {error}", path.display()))
    })
}
