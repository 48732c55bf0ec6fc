use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, instrument};
use url::Url;
use uuid::Uuid;

use super::crypto::{RANDOM_VALUE_BYTES, pkce_code_challenge, pkce_code_verifier, random_url_safe};
use super::error::AuthError;
use super::oauth_provider::StateStore;
use super::types::AuthorizationRequestState;
use crate::provider::{Check, Prompt, ProviderDescriptor};

/// Result of starting a login: where to send the browser and what to remember.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: Url,
    pub state: AuthorizationRequestState,
}

/// A started login whose state already sits in the store under `session_key`.
#[derive(Debug, Clone)]
pub struct AuthorizationRedirect {
    pub url: Url,
    /// Opaque key for the caller's cookie; the callback presents it back.
    pub session_key: String,
}

/// Builds authorization redirects for one provider.
#[derive(Debug, Clone)]
pub struct AuthorizationRequestBuilder {
    descriptor: Arc<ProviderDescriptor>,
}

impl AuthorizationRequestBuilder {
    pub fn new(descriptor: Arc<ProviderDescriptor>) -> Self {
        AuthorizationRequestBuilder { descriptor }
    }

    /// Generate fresh `state`, and `nonce` / PKCE values when required, and the URL carrying them.
    pub fn build(&self, prompt_override: Option<Prompt>) -> Result<AuthorizationRequest, AuthError> {
        let descriptor = &self.descriptor;
        if descriptor.client_id().is_empty() {
            return Err(AuthError::Configuration("client id is missing".into()));
        }

        let state = AuthorizationRequestState {
            state: random_url_safe(RANDOM_VALUE_BYTES)?,
            nonce: if descriptor.requires(Check::Nonce) {
                Some(random_url_safe(RANDOM_VALUE_BYTES)?)
            } else {
                None
            },
            pkce_verifier: if descriptor.requires(Check::Pkce) {
                Some(pkce_code_verifier()?)
            } else {
                None
            },
            redirect_uri: descriptor.redirect_uri().to_string(),
            created_at: Utc::now(),
        };

        let mut url = descriptor.authorization_endpoint().clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", descriptor.client_id())
                .append_pair("redirect_uri", &state.redirect_uri)
                .append_pair("scope", &descriptor.scopes().join(" "))
                .append_pair("state", &state.state);
            if let Some(nonce) = &state.nonce {
                query.append_pair("nonce", nonce);
            }
            if let Some(verifier) = &state.pkce_verifier {
                query
                    .append_pair("code_challenge", &pkce_code_challenge(verifier))
                    .append_pair("code_challenge_method", "S256");
            }
            if let Some(prompt) = prompt_override.or(descriptor.prompt()) {
                query.append_pair("prompt", prompt.as_str());
            }
            for (name, value) in descriptor.extra_authorize_params() {
                query.append_pair(name, value);
            }
        }

        Ok(AuthorizationRequest { url, state })
    }

    /// Build a request and park its state in `store` under a fresh opaque key.
    #[instrument(skip(self, store), level = "debug")]
    pub async fn initiate(
        &self,
        store: &dyn StateStore,
        prompt_override: Option<Prompt>,
    ) -> Result<AuthorizationRedirect, AuthError> {
        let AuthorizationRequest { url, state } = self.build(prompt_override)?;
        let session_key = Uuid::new_v4().to_string();
        store.put(&session_key, state, self.descriptor.state_ttl()).await?;
        debug!(authorize_host = url.host_str().unwrap_or_default(), "login initiated");
        Ok(AuthorizationRedirect { url, session_key })
    }
}
