use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::Value;
use tracing::{debug, instrument, warn};
use url::form_urlencoded;

use super::crypto::is_valid_pkce_verifier;
use super::error::AuthError;
use super::http_client::{HttpRequest, OAuthHttpClient, execute_bounded};
use super::types::{AuthorizationRequestState, TokenSet};
use crate::provider::{Check, ProviderDescriptor};

/// Longest slice of an error body kept for operator logs.
const MAX_ERROR_BODY: usize = 512;

/// Everything a strategy may put into the token request.
pub struct TokenRequestContext<'a> {
    pub descriptor: &'a ProviderDescriptor,
    pub code: &'a str,
    pub redirect_uri: &'a str,
    pub code_verifier: Option<&'a str>,
}

/// Shape of one provider's token request and response.
///
/// Provider quirks live behind this trait so the rest of the pipeline only ever sees a [`TokenSet`].
pub trait TokenRequestStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn build_request(&self, ctx: &TokenRequestContext<'_>) -> HttpRequest;

    fn parse_response(&self, body: &[u8], descriptor: &ProviderDescriptor) -> Result<TokenSet, AuthError> {
        normalize_token_response(body, descriptor.subject_fields())
    }
}

fn base_form<'a>(ctx: &TokenRequestContext<'a>) -> Vec<(&'static str, &'a str)> {
    let mut form = vec![
        ("grant_type", "authorization_code"),
        ("code", ctx.code),
        ("redirect_uri", ctx.redirect_uri),
    ];
    if let Some(verifier) = ctx.code_verifier {
        form.push(("code_verifier", verifier));
    }
    form
}

fn encode_form(pairs: &[(&str, &str)]) -> Vec<u8> {
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
        .into_bytes()
}

fn form_request(ctx: &TokenRequestContext<'_>, pairs: &[(&str, &str)]) -> HttpRequest {
    HttpRequest::post(ctx.descriptor.token_endpoint().as_str(), encode_form(pairs))
        .header("Content-Type", "application/x-www-form-urlencoded")
        .header("Accept", "application/json")
}

/// Client credentials in the form body. PseudOIDC's default.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientSecretPost;

impl TokenRequestStrategy for ClientSecretPost {
    fn name(&self) -> &'static str {
        "client_secret_post"
    }

    fn build_request(&self, ctx: &TokenRequestContext<'_>) -> HttpRequest {
        let mut form = base_form(ctx);
        form.push(("client_id", ctx.descriptor.client_id()));
        form.push(("client_secret", ctx.descriptor.client_secret().expose()));
        form_request(ctx, &form)
    }
}

/// Client credentials in an HTTP Basic header (RFC 6749 §2.3.1).
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientSecretBasic;

impl TokenRequestStrategy for ClientSecretBasic {
    fn name(&self) -> &'static str {
        "client_secret_basic"
    }

    fn build_request(&self, ctx: &TokenRequestContext<'_>) -> HttpRequest {
        // Both halves are form-urlencoded before joining.
        let id: String = form_urlencoded::byte_serialize(ctx.descriptor.client_id().as_bytes()).collect();
        let secret: String =
            form_urlencoded::byte_serialize(ctx.descriptor.client_secret().expose().as_bytes()).collect();
        let credentials = STANDARD.encode(format!("{id}:{secret}"));
        let mut form = base_form(ctx);
        form.push(("client_id", ctx.descriptor.client_id()));
        form_request(ctx, &form).header("Authorization", format!("Basic {credentials}"))
    }
}

/// Turn a token endpoint body into a [`TokenSet`], tolerating the usual deviations:
/// missing `token_type`, string-typed `expires_in`, and a subject under a custom field name.
pub fn normalize_token_response(body: &[u8], subject_fields: &[String]) -> Result<TokenSet, AuthError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| AuthError::TokenParse(format!("body is not JSON: {e}")))?;
    let obj = value
        .as_object()
        .ok_or_else(|| AuthError::TokenParse("body is not a JSON object".into()))?;

    let access_token = obj
        .get("access_token")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AuthError::TokenParse("missing access_token".into()))?
        .to_string();
    let text = |key: &str| obj.get(key).and_then(Value::as_str).map(str::to_string);

    let expires_in = obj.get("expires_in").and_then(|v| match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    });
    let subject_hint = subject_fields.iter().find_map(|field| match obj.get(field.as_str()) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    });

    Ok(TokenSet {
        access_token,
        id_token: text("id_token").filter(|t| !t.is_empty()),
        token_type: text("token_type").unwrap_or_else(|| "Bearer".to_string()),
        expires_at: expires_in
            .filter(|secs| *secs > 0)
            .map(|secs| Utc::now() + ChronoDuration::seconds(secs)),
        refresh_token: text("refresh_token"),
        scope: text("scope"),
        subject_hint,
    })
}

fn truncate_body(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if text.len() <= MAX_ERROR_BODY {
        return text.into_owned();
    }
    let mut end = MAX_ERROR_BODY;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

/// Trades an authorization code for tokens. Exactly one attempt per callback.
#[derive(Clone)]
pub struct TokenExchanger {
    descriptor: Arc<ProviderDescriptor>,
    http: Arc<dyn OAuthHttpClient>,
}

impl TokenExchanger {
    pub fn new(descriptor: Arc<ProviderDescriptor>, http: Arc<dyn OAuthHttpClient>) -> Self {
        TokenExchanger { descriptor, http }
    }

    #[instrument(skip_all, level = "debug", fields(strategy = self.descriptor.token_strategy().name()))]
    pub async fn exchange(&self, code: &str, request_state: &AuthorizationRequestState) -> Result<TokenSet, AuthError> {
        let code_verifier = if self.descriptor.requires(Check::Pkce) {
            let verifier = request_state
                .pkce_verifier
                .as_deref()
                .ok_or_else(|| AuthError::Internal("stored attempt has no PKCE verifier".into()))?;
            if !is_valid_pkce_verifier(verifier) {
                return Err(AuthError::Internal("stored PKCE verifier is malformed".into()));
            }
            Some(verifier)
        } else {
            None
        };
        let ctx = TokenRequestContext {
            descriptor: &self.descriptor,
            code,
            redirect_uri: &request_state.redirect_uri,
            code_verifier,
        };
        let strategy = self.descriptor.token_strategy();
        let request = strategy.build_request(&ctx);

        let limit = self.descriptor.token_timeout();
        let response = execute_bounded(self.http.as_ref(), request, limit).await?;
        debug!(status = response.status, "token endpoint answered");
        if !response.is_success() {
            let body = truncate_body(&response.body);
            warn!(status = response.status, body = %body, "token exchange refused");
            return Err(AuthError::TokenExchange { status: response.status, body });
        }
        strategy.parse_response(&response.body, &self.descriptor)
    }
}
