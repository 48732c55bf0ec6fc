use std::time::Duration;

use serde::Deserialize;
use tracing::{info, instrument};

use crate::oauth_core::error::AuthError;
use crate::oauth_core::http_client::{HttpRequest, OAuthHttpClient, execute_bounded};

/// Result of parsing /.well-known/openid-configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
    pub jwks_uri: String,
    #[serde(default)]
    pub scopes_supported: Vec<String>,
    #[serde(default)]
    pub code_challenge_methods_supported: Vec<String>,
    #[serde(default)]
    pub token_endpoint_auth_methods_supported: Vec<String>,
    #[serde(default)]
    pub prompt_values_supported: Vec<String>,
}

pub fn discovery_url(issuer: &str) -> String {
    format!("{}/.well-known/openid-configuration", issuer.trim_end_matches('/'))
}

/// Fetch and check the provider's discovery document. Any failure is fatal configuration.
#[instrument(skip(http), level = "debug")]
pub async fn discover(
    http: &dyn OAuthHttpClient,
    issuer: &str,
    timeout: Duration,
) -> Result<ProviderMetadata, AuthError> {
    let url = discovery_url(issuer);
    let response = execute_bounded(http, HttpRequest::get(url.as_str()).header("Accept", "application/json"), timeout)
        .await
        .map_err(|e| AuthError::Configuration(format!("discovery request to {url} failed: {e}")))?;
    if !response.is_success() {
        return Err(AuthError::Configuration(format!(
            "discovery document at {url} answered HTTP {}",
            response.status
        )));
    }
    let metadata: ProviderMetadata = serde_json::from_slice(&response.body)
        .map_err(|e| AuthError::Configuration(format!("unparseable discovery document: {e}")))?;
    if metadata.issuer.trim_end_matches('/') != issuer.trim_end_matches('/') {
        return Err(AuthError::Configuration(format!(
            "discovery issuer `{}` does not match configured issuer `{issuer}`",
            metadata.issuer
        )));
    }
    info!(issuer = %metadata.issuer, "provider metadata discovered");
    Ok(metadata)
}
