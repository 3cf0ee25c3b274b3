//! Cached credentials with single-flight refresh.

use async_trait::async_trait;
use futures_util::future::{self, BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};
use thiserror::Error;

use crate::config::{AuthKind, LinkConfig};
use crate::error::{ServiceError, ServiceResult};
use crate::observability::metrics;

use super::sources::{RefreshEndpoint, StaticCredential};

/// How a credential is presented downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialScheme {
    /// `Authorization: Bearer <token>`
    Bearer,
    /// Raw key in a named header.
    ApiKey { header: String },
}

/// A credential for one service.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
    pub scheme: CredentialScheme,
    /// Hard expiry; `None` never expires.
    pub expires_at: Option<SystemTime>,
}

// Keep tokens out of logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("scheme", &self.scheme)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl Credential {
    pub fn bearer(token: impl Into<String>, expires_at: Option<SystemTime>) -> Self {
        Self {
            token: token.into(),
            scheme: CredentialScheme::Bearer,
            expires_at,
        }
    }

    pub fn api_key(key: impl Into<String>, header: impl Into<String>) -> Self {
        Self {
            token: key.into(),
            scheme: CredentialScheme::ApiKey {
                header: header.into(),
            },
            expires_at: None,
        }
    }

    /// Usable without refresh: not within `margin` of hard expiry.
    pub fn is_fresh(&self, now: SystemTime, margin: Duration) -> bool {
        match self.expires_at {
            None => true,
            Some(at) => now + margin < at,
        }
    }

    pub fn is_expired(&self, now: SystemTime) -> bool {
        matches!(self.expires_at, Some(at) if now >= at)
    }

    /// Header name and value to attach.
    pub fn header(&self) -> (String, String) {
        match &self.scheme {
            CredentialScheme::Bearer => ("authorization".to_string(), format!("Bearer {}", self.token)),
            CredentialScheme::ApiKey { header } => (header.clone(), self.token.clone()),
        }
    }
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("refresh request failed: {0}")]
    Request(String),
    #[error("refresh rejected with status {0}")]
    Rejected(u16),
    #[error("malformed refresh response: {0}")]
    Malformed(String),
    #[error("refresh timed out after {0:?}")]
    Timeout(Duration),
}

/// Where fresh credentials come from.
#[async_trait]
pub trait CredentialSource: Send + Sync + fmt::Debug {
    async fn fetch(&self, service: &str) -> Result<Credential, CredentialError>;
}

type RefreshFuture = Shared<BoxFuture<'static, Result<Credential, Arc<CredentialError>>>>;

#[derive(Debug)]
struct Slot {
    source: Arc<dyn CredentialSource>,
    current: Mutex<Option<Credential>>,
    in_flight: Mutex<Option<RefreshFuture>>,
}

impl Slot {
    fn current(&self) -> MutexGuard<'_, Option<Credential>> {
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn in_flight(&self) -> MutexGuard<'_, Option<RefreshFuture>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Per-service credential cache.
///
/// At most one refresh runs per service; concurrent callers await the same
/// result.
#[derive(Debug)]
pub struct CredentialProvider {
    slots: HashMap<String, Arc<Slot>>,
    safety_margin: Duration,
    refresh_timeout: Duration,
}

impl Default for CredentialProvider {
    fn default() -> Self {
        Self::new(Duration::from_secs(30), Duration::from_secs(5))
    }
}

impl CredentialProvider {
    pub fn new(safety_margin: Duration, refresh_timeout: Duration) -> Self {
        Self {
            slots: HashMap::new(),
            safety_margin,
            refresh_timeout,
        }
    }

    /// Register a source for every service with `authentication` set.
    pub fn from_config(config: &LinkConfig, http: reqwest::Client) -> ServiceResult<Self> {
        let mut provider = Self::new(
            Duration::from_secs(config.credentials.safety_margin_secs),
            Duration::from_millis(config.credentials.refresh_timeout_ms),
        );

        for service in &config.services {
            let Some(auth) = &service.authentication else {
                continue;
            };
            let source: Arc<dyn CredentialSource> = match auth.kind {
                AuthKind::ApiKey => {
                    let key = auth.api_key.clone().ok_or_else(|| {
                        ServiceError::config(format!("service '{}': api-key auth needs api_key", service.name))
                    })?;
                    let header = auth.header.clone().unwrap_or_else(|| "x-api-key".to_string());
                    Arc::new(StaticCredential::new(Credential::api_key(key, header)))
                }
                AuthKind::Jwt => match (&auth.refresh_url, &auth.token) {
                    (Some(url), _) => {
                        let url = url::Url::parse(url).map_err(|e| {
                            ServiceError::config(format!("service '{}': invalid refresh_url", service.name))
                                .with_source(e)
                        })?;
                        Arc::new(RefreshEndpoint::new(http.clone(), url, auth.refresh_token.clone()))
                    }
                    (None, Some(token)) => {
                        Arc::new(StaticCredential::new(Credential::bearer(token.clone(), None)))
                    }
                    (None, None) => {
                        return Err(ServiceError::config(format!(
                            "service '{}': jwt auth needs token or refresh_url",
                            service.name
                        )))
                    }
                },
            };
            provider.register(&service.name, source);
        }

        Ok(provider)
    }

    pub fn register(&mut self, service: &str, source: Arc<dyn CredentialSource>) {
        self.slots.insert(
            service.to_string(),
            Arc::new(Slot {
                source,
                current: Mutex::new(None),
                in_flight: Mutex::new(None),
            }),
        );
    }

    pub fn has_source(&self, service: &str) -> bool {
        self.slots.contains_key(service)
    }

    /// A credential valid beyond the safety margin, refreshing if needed.
    pub async fn get(&self, service: &str) -> ServiceResult<Credential> {
        let slot = self.slots.get(service).ok_or_else(|| {
            ServiceError::config(format!("no credential source for service '{}'", service))
        })?;

        if let Some(credential) = slot.current().as_ref() {
            if credential.is_fresh(SystemTime::now(), self.safety_margin) {
                return Ok(credential.clone());
            }
        }

        let refresh = self.join_refresh(service, slot);
        match refresh.await {
            Ok(credential) => Ok(credential),
            Err(e) => {
                let stale = slot
                    .current()
                    .as_ref()
                    .filter(|c| !c.is_expired(SystemTime::now()))
                    .cloned();
                match stale {
                    Some(credential) => {
                        tracing::warn!(
                            service = %service,
                            error = %e,
                            "Credential refresh failed, serving cached credential until expiry"
                        );
                        Ok(credential)
                    }
                    None => Err(ServiceError::auth(format!(
                        "could not obtain credential for '{}': {}",
                        service, e
                    ))),
                }
            }
        }
    }

    /// Start a refresh or join the one already running.
    ///
    /// The refresh runs on its own task, so it completes (and its timeout
    /// stays meaningful) even when every waiting caller is dropped.
    fn join_refresh(&self, service: &str, slot: &Arc<Slot>) -> RefreshFuture {
        let mut in_flight = slot.in_flight();
        if let Some(existing) = in_flight.as_ref() {
            return existing.clone();
        }
        // A refresh may have stored its credential and cleared the slot
        // between the caller's freshness check and this lock.
        if let Some(credential) = slot.current().as_ref() {
            if credential.is_fresh(SystemTime::now(), self.safety_margin) {
                return future::ready(Ok(credential.clone())).boxed().shared();
            }
        }

        let owner = slot.clone();
        let task_service = service.to_string();
        let timeout = self.refresh_timeout;
        let task = tokio::spawn(async move {
            let service = task_service;
            tracing::debug!(service = %service, "Refreshing credential");
            let result = match tokio::time::timeout(timeout, owner.source.fetch(&service)).await {
                Ok(result) => result,
                Err(_) => Err(CredentialError::Timeout(timeout)),
            };
            match &result {
                Ok(credential) => {
                    *owner.current() = Some(credential.clone());
                    metrics::record_credential_refresh(&service, "success");
                }
                Err(e) => {
                    tracing::error!(service = %service, error = %e, "Credential refresh failed");
                    metrics::record_credential_refresh(&service, "failure");
                }
            }
            *owner.in_flight() = None;
            result
        });

        let service = service.to_string();
        let refresh = async move {
            match task.await {
                Ok(result) => result.map_err(Arc::new),
                Err(e) => {
                    tracing::error!(service = %service, error = %e, "Credential refresh task aborted");
                    Err(Arc::new(CredentialError::Request(format!("refresh task aborted: {}", e))))
                }
            }
        }
        .boxed()
        .shared();

        *in_flight = Some(refresh.clone());
        refresh
    }

    /// Drop the cached credential so the next call refreshes.
    pub fn invalidate(&self, service: &str) {
        if let Some(slot) = self.slots.get(service) {
            if slot.current().take().is_some() {
                tracing::info!(service = %service, "Credential invalidated");
            }
        }
    }
}
