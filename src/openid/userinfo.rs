use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, instrument};

use crate::oauth_core::error::AuthError;
use crate::oauth_core::http_client::{HttpRequest, OAuthHttpClient, execute_bounded};
use crate::oauth_core::types::{IdentityClaims, Profile};
use crate::provider::{ProviderDescriptor, UserinfoPolicy};

/// Calls the userinfo endpoint. Enrichment only: `sub` always comes from the identity token.
#[derive(Clone)]
pub struct UserinfoFetcher {
    descriptor: Arc<ProviderDescriptor>,
    http: Arc<dyn OAuthHttpClient>,
}

impl UserinfoFetcher {
    pub fn new(descriptor: Arc<ProviderDescriptor>, http: Arc<dyn OAuthHttpClient>) -> Self {
        UserinfoFetcher { descriptor, http }
    }

    /// Whether the descriptor's policy calls for a fetch given what the identity token already holds.
    pub fn should_fetch(&self, claims: &IdentityClaims) -> bool {
        if self.descriptor.userinfo_endpoint().is_none() {
            return false;
        }
        match self.descriptor.userinfo_policy() {
            UserinfoPolicy::Never => false,
            UserinfoPolicy::Always => true,
            UserinfoPolicy::WhenClaimsIncomplete => claims.email.is_none(),
        }
    }

    #[instrument(skip_all, level = "debug")]
    pub async fn fetch(&self, access_token: &str) -> Result<Profile, AuthError> {
        let endpoint = self
            .descriptor
            .userinfo_endpoint()
            .ok_or_else(|| AuthError::ProfileFetch("provider has no userinfo endpoint".into()))?;
        let request = HttpRequest::get(endpoint.as_str())
            .header("Authorization", format!("Bearer {access_token}"))
            .header("Accept", "application/json");
        let limit = self.descriptor.userinfo_timeout();
        let response = execute_bounded(self.http.as_ref(), request, limit).await?;
        if !response.is_success() {
            return Err(AuthError::ProfileFetch(format!("userinfo answered HTTP {}", response.status)));
        }
        let profile = parse_profile(&response.body, self.descriptor.subject_fields())?;
        debug!(email_present = profile.email.is_some(), "userinfo fetched");
        Ok(profile)
    }
}

/// Map a userinfo body to a [`Profile`].
pub fn parse_profile(body: &[u8], subject_fields: &[String]) -> Result<Profile, AuthError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| AuthError::ProfileFetch(format!("userinfo body is not JSON: {e}")))?;
    let obj = value
        .as_object()
        .ok_or_else(|| AuthError::ProfileFetch("userinfo body is not a JSON object".into()))?;

    let id = subject_fields
        .iter()
        .find_map(|field| match obj.get(field.as_str()) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
        .ok_or_else(|| AuthError::ProfileFetch("userinfo carries no subject".into()))?;
    let email_verified = match obj.get("email_verified") {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    };
    let text = |key: &str| obj.get(key).and_then(Value::as_str).map(str::to_string);

    Ok(Profile {
        id,
        email: text("email"),
        email_verified,
        name: text("name").or_else(|| text("preferred_username")),
    })
}
