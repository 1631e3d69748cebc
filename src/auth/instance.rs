// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Instance configuration lookup.
//!
//! The handshake needs to know where the instance's frontend API lives and
//! whether it is a development instance. That comes either from static
//! configuration or from the backend API.

use std::time::Duration;

use futures::future::BoxFuture;
use serde::Deserialize;
use url::Url;

use crate::retry::Retryable;

/// HTTP timeout for an instance lookup.
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Path of the handshake endpoint on the frontend API.
const HANDSHAKE_PATH: &str = "/v1/client/handshake";

/// What the handshake needs to know about an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceConfig {
    pub instance_id: String,
    /// Frontend API host, e.g. `clerk.example.com`
    pub frontend_api: String,
    pub development: bool,
}

impl InstanceConfig {
    /// Handshake endpoint URL.
    pub fn handshake_endpoint(&self) -> Result<Url, InstanceError> {
        let base = if self.frontend_api.contains("://") {
            self.frontend_api.clone()
        } else {
            format!("https://{}", self.frontend_api)
        };
        Url::parse(&base)
            .and_then(|url| url.join(HANDSHAKE_PATH))
            .map_err(|e| InstanceError::Decode(format!("invalid frontend API host: {e}")))
    }
}

/// Instance lookup failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InstanceError {
    #[error("network error: {0}")]
    Network(String),
    #[error("HTTP {0} from instance endpoint")]
    Status(u16),
    #[error("invalid instance configuration: {0}")]
    Decode(String),
    #[error("unknown instance '{0}'")]
    UnknownInstance(String),
}

impl Retryable for InstanceError {
    fn is_retryable(&self) -> bool {
        match self {
            InstanceError::Network(_) => true,
            InstanceError::Status(status) => *status >= 500,
            InstanceError::Decode(_) | InstanceError::UnknownInstance(_) => false,
        }
    }
}

/// Source of instance configuration.
pub trait InstanceDirectory: Send + Sync {
    fn lookup<'a>(&'a self, instance_id: &'a str)
        -> BoxFuture<'a, Result<InstanceConfig, InstanceError>>;
}

/// Configuration known at start-up.
#[derive(Debug, Clone)]
pub struct StaticInstanceDirectory {
    config: InstanceConfig,
}

impl StaticInstanceDirectory {
    pub fn new(config: InstanceConfig) -> Self {
        Self { config }
    }
}

impl InstanceDirectory for StaticInstanceDirectory {
    fn lookup<'a>(
        &'a self,
        instance_id: &'a str,
    ) -> BoxFuture<'a, Result<InstanceConfig, InstanceError>> {
        let result = if instance_id == self.config.instance_id {
            Ok(self.config.clone())
        } else {
            Err(InstanceError::UnknownInstance(instance_id.to_string()))
        };
        Box::pin(std::future::ready(result))
    }
}

#[derive(Debug, Deserialize)]
struct InstanceResponse {
    frontend_api: String,
    #[serde(default)]
    environment_type: Option<String>,
}

/// Backend API lookup. The URL may contain an `{instance_id}` placeholder.
pub struct HttpInstanceDirectory {
    client: reqwest::Client,
    url: String,
    secret_key: Option<String>,
}

impl HttpInstanceDirectory {
    pub fn new(url: impl Into<String>, secret_key: Option<String>) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(LOOKUP_TIMEOUT).build()?,
            url: url.into(),
            secret_key,
        })
    }

    async fn fetch(&self, instance_id: &str) -> Result<InstanceConfig, InstanceError> {
        let mut request = self
            .client
            .get(self.url.replace("{instance_id}", instance_id));
        if let Some(secret) = &self.secret_key {
            request = request.bearer_auth(secret);
        }

        let response = request
            .send()
            .await
            .map_err(|e| InstanceError::Network(e.to_string()))?;
        if !response.status().is_success() {
            return Err(InstanceError::Status(response.status().as_u16()));
        }

        let body: InstanceResponse = response
            .json()
            .await
            .map_err(|e| InstanceError::Decode(e.to_string()))?;

        Ok(InstanceConfig {
            instance_id: instance_id.to_string(),
            frontend_api: body.frontend_api,
            development: body.environment_type.as_deref() == Some("development"),
        })
    }
}

impl InstanceDirectory for HttpInstanceDirectory {
    fn lookup<'a>(
        &'a self,
        instance_id: &'a str,
    ) -> BoxFuture<'a, Result<InstanceConfig, InstanceError>> {
        Box::pin(self.fetch(instance_id))
    }
}
