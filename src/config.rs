//! Startup configuration from the environment.
//!
//! Loaded once; anything missing or malformed is a [`AuthError::Configuration`] and the
//! process is expected to refuse to start.

use std::time::Duration;

use tracing::info;

use crate::oauth_core::error::AuthError;
use crate::oauth_core::http_client::OAuthHttpClient;
use crate::openid::discovery::discover;
use crate::provider::{
    Check, PSEUDOIDC_ISSUER, Prompt, ProviderDescriptor, ProviderDescriptorBuilder, TokenEndpointAuth,
    UserinfoPolicy,
};

const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct PseudoidcConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub issuer: String,
    pub scopes: Vec<String>,
    pub prompt: Option<Prompt>,
    pub checks: Vec<Check>,
    pub userinfo: UserinfoPolicy,
    pub token_auth: Option<TokenEndpointAuth>,
    pub extra_authorize_params: Vec<(String, String)>,
    pub authorization_endpoint: Option<String>,
    pub token_endpoint: Option<String>,
    pub userinfo_endpoint: Option<String>,
    pub jwks_uri: Option<String>,
}

impl PseudoidcConfig {
    /// Read the process environment, after loading `.env` if one exists.
    pub fn from_env() -> Result<Self, AuthError> {
        // A missing .env file is normal outside development.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AuthError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let require = |key: &str| get(key).ok_or_else(|| AuthError::Configuration(format!("{key} is not set")));

        let scopes = get("PSEUDOIDC_SCOPES")
            .map(|s| s.split([' ', ',']).filter(|s| !s.is_empty()).map(str::to_string).collect())
            .unwrap_or_else(|| vec!["openid".to_string()]);
        let prompt = match get("PSEUDOIDC_PROMPT") {
            None => Some(Prompt::Create),
            Some(p) if p.eq_ignore_ascii_case("unset") => None,
            Some(p) => Some(p.parse()?),
        };
        let checks = get("PSEUDOIDC_CHECKS")
            .unwrap_or_else(|| "state,nonce".to_string())
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(str::parse)
            .collect::<Result<Vec<Check>, _>>()?;
        let extra_authorize_params = get("PSEUDOIDC_EXTRA_PARAMS")
            .map(|raw| {
                url::form_urlencoded::parse(raw.as_bytes())
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect()
            })
            .unwrap_or_default();

        Ok(PseudoidcConfig {
            client_id: require("PSEUDOIDC_CLIENT_ID")?,
            client_secret: require("PSEUDOIDC_CLIENT_SECRET")?,
            redirect_uri: require("PSEUDOIDC_REDIRECT_URI")?,
            issuer: get("PSEUDOIDC_ISSUER").unwrap_or_else(|| PSEUDOIDC_ISSUER.to_string()),
            scopes,
            prompt,
            checks,
            userinfo: get("PSEUDOIDC_USERINFO")
                .map(|v| v.parse::<UserinfoPolicy>())
                .transpose()?
                .unwrap_or(UserinfoPolicy::WhenClaimsIncomplete),
            token_auth: get("PSEUDOIDC_TOKEN_AUTH").map(|v| v.parse::<TokenEndpointAuth>()).transpose()?,
            extra_authorize_params,
            authorization_endpoint: get("PSEUDOIDC_AUTHORIZATION_ENDPOINT"),
            token_endpoint: get("PSEUDOIDC_TOKEN_ENDPOINT"),
            userinfo_endpoint: get("PSEUDOIDC_USERINFO_ENDPOINT"),
            jwks_uri: get("PSEUDOIDC_JWKS_URI"),
        })
    }

    /// Descriptor builder carrying everything configured explicitly.
    pub fn builder(&self) -> ProviderDescriptorBuilder {
        let mut builder = ProviderDescriptor::builder(self.issuer.as_str())
            .client_id(self.client_id.as_str())
            .client_secret(self.client_secret.as_str())
            .redirect_uri(self.redirect_uri.as_str())
            .scopes(self.scopes.iter().cloned())
            .checks(self.checks.iter().copied())
            .userinfo_policy(self.userinfo);
        if let Some(prompt) = self.prompt {
            builder = builder.prompt(prompt);
        }
        if let Some(auth) = self.token_auth {
            builder = builder.token_endpoint_auth(auth);
        }
        for (name, value) in &self.extra_authorize_params {
            builder = builder.extra_authorize_param(name.as_str(), value.as_str());
        }
        if let Some(url) = &self.authorization_endpoint {
            builder = builder.authorization_endpoint(url.as_str());
        }
        if let Some(url) = &self.token_endpoint {
            builder = builder.token_endpoint(url.as_str());
        }
        if let Some(url) = &self.userinfo_endpoint {
            builder = builder.userinfo_endpoint(url.as_str());
        }
        if let Some(url) = &self.jwks_uri {
            builder = builder.jwks_uri(url.as_str());
        }
        builder
    }

    /// Final descriptor, running discovery only when a required endpoint was not configured.
    pub async fn load_descriptor(&self, http: &dyn OAuthHttpClient) -> Result<ProviderDescriptor, AuthError> {
        let mut builder = self.builder();
        if !builder.has_endpoints() {
            let metadata = discover(http, &self.issuer, DISCOVERY_TIMEOUT).await?;
            builder = builder.discovered(&metadata)?;
        }
        let descriptor = builder.build()?;
        info!(issuer = descriptor.issuer(), client_id = descriptor.client_id(), "provider configured");
        Ok(descriptor)
    }
}
