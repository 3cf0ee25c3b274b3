//! Credential sources.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::{Duration, SystemTime};
use url::Url;

use super::credentials::{Credential, CredentialError, CredentialSource};

/// Credential fixed at startup.
#[derive(Debug, Clone)]
pub struct StaticCredential {
    credential: Credential,
}

impl StaticCredential {
    pub fn new(credential: Credential) -> Self {
        Self { credential }
    }
}

#[async_trait]
impl CredentialSource for StaticCredential {
    async fn fetch(&self, _service: &str) -> Result<Credential, CredentialError> {
        Ok(self.credential.clone())
    }
}

/// Bearer tokens issued by a refresh endpoint.
///
/// POSTs `{"refreshToken": ...}` and reads the token from `token`,
/// `accessToken` or `access_token`, and its lifetime in seconds from
/// `expiresIn` or `expires_in`.
#[derive(Debug, Clone)]
pub struct RefreshEndpoint {
    http: reqwest::Client,
    url: Url,
    refresh_token: Option<String>,
}

impl RefreshEndpoint {
    pub fn new(http: reqwest::Client, url: Url, refresh_token: Option<String>) -> Self {
        Self {
            http,
            url,
            refresh_token,
        }
    }
}

#[async_trait]
impl CredentialSource for RefreshEndpoint {
    async fn fetch(&self, _service: &str) -> Result<Credential, CredentialError> {
        let response = self
            .http
            .post(self.url.clone())
            .json(&json!({ "refreshToken": self.refresh_token }))
            .send()
            .await
            .map_err(|e| CredentialError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CredentialError::Rejected(status.as_u16()));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| CredentialError::Malformed(e.to_string()))?;
        parse_token_response(&body, SystemTime::now())
    }
}

fn parse_token_response(body: &Value, now: SystemTime) -> Result<Credential, CredentialError> {
    let token = ["token", "accessToken", "access_token"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_str))
        .ok_or_else(|| CredentialError::Malformed("no token field".to_string()))?;

    let expires_at = ["expiresIn", "expires_in"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_u64))
        .map(|secs| now + Duration::from_secs(secs));

    Ok(Credential::bearer(token, expires_at))
}
