//! Callback handling: the state machine that turns a provider redirect into a [`Session`].
//!
//! ```text
//! Started -> CodeReceived -> StateValidated -> TokenExchanged -> ClaimsValidated -> SessionEstablished
//!    \_____________\_______________\________________\________________\______> Failed{stage, cause}
//! ```
//!
//! Nothing here retries. The authorization code is single-use, so a failed exchange
//! means the caller starts a fresh login.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::oauth_core::crypto::constant_time_eq;
use crate::oauth_core::error::{AuthError, ErrorCategory, ErrorResponse, InvalidTokenReason};
use crate::oauth_core::http_client::OAuthHttpClient;
use crate::oauth_core::oauth_provider::{SessionSink, StateStore};
use crate::oauth_core::token_exchange::TokenExchanger;
use crate::oauth_core::types::{AuthorizationRequestState, IdentityClaims, Profile, Session, TokenSet};
use crate::openid::id_token::IdTokenVerifier;
use crate::openid::userinfo::UserinfoFetcher;
use crate::provider::ProviderDescriptor;
use crate::session::map_session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackStage {
    Started,
    CodeReceived,
    StateValidated,
    TokenExchanged,
    ClaimsValidated,
    SessionEstablished,
}

/// Query parameters of the provider's redirect back to us.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackParams {
    /// Parse a raw query string (`code=...&state=...`), with or without the leading `?`.
    pub fn from_query(query: &str) -> Self {
        let mut params = CallbackParams::default();
        for (key, value) in url::form_urlencoded::parse(query.trim_start_matches('?').as_bytes()) {
            let slot = match key.as_ref() {
                "code" => &mut params.code,
                "state" => &mut params.state,
                "error" => &mut params.error,
                "error_description" => &mut params.error_description,
                _ => continue,
            };
            slot.get_or_insert_with(|| value.into_owned());
        }
        params
    }

    pub fn from_url(url: &Url) -> Self {
        Self::from_query(url.query().unwrap_or_default())
    }
}

/// Terminal failure of a callback: the stage being entered and why it could not be.
#[derive(Debug, Error)]
#[error("login failed entering {stage:?}: {cause}")]
pub struct CallbackFailure {
    pub stage: CallbackStage,
    #[source]
    pub cause: AuthError,
}

impl CallbackFailure {
    pub fn new(stage: CallbackStage, cause: AuthError) -> Self {
        CallbackFailure { stage, cause }
    }

    pub fn category(&self) -> ErrorCategory {
        self.cause.category()
    }

    /// Log the internal cause for operators and produce the opaque end-user response.
    pub fn to_response(&self) -> ErrorResponse {
        let category = self.category();
        warn!(
            stage = ?self.stage,
            category = ?category,
            error = %self.cause,
            "login callback failed"
        );
        ErrorResponse::for_category(category)
    }
}

fn failed(stage: CallbackStage) -> impl FnOnce(AuthError) -> CallbackFailure {
    move |cause| CallbackFailure::new(stage, cause)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Orchestrates one callback: state check, token exchange, claim validation, session mapping.
#[derive(Clone)]
pub struct CallbackController {
    store: Arc<dyn StateStore>,
    exchanger: TokenExchanger,
    verifier: IdTokenVerifier,
    userinfo: UserinfoFetcher,
}

impl CallbackController {
    pub fn new(
        descriptor: Arc<ProviderDescriptor>,
        http: Arc<dyn OAuthHttpClient>,
        store: Arc<dyn StateStore>,
    ) -> Self {
        CallbackController {
            store,
            exchanger: TokenExchanger::new(descriptor.clone(), http.clone()),
            verifier: IdTokenVerifier::new(descriptor.clone(), http.clone()),
            userinfo: UserinfoFetcher::new(descriptor, http),
        }
    }

    /// Run the callback for the attempt stored under `session_key`.
    #[instrument(skip_all, level = "debug")]
    pub async fn handle(&self, session_key: &str, params: CallbackParams) -> Result<Session, CallbackFailure> {
        use CallbackStage::*;
        debug!(stage = ?Started, "callback received");

        if let Some(error) = non_empty(params.error) {
            return Err(failed(CodeReceived)(AuthError::ProviderDenied {
                error,
                description: params.error_description,
            }));
        }
        let code = non_empty(params.code).ok_or(AuthError::MissingCode).map_err(failed(CodeReceived))?;
        let returned_state = non_empty(params.state)
            .ok_or(AuthError::MissingState)
            .map_err(failed(CodeReceived))?;
        debug!(stage = ?CodeReceived);

        let request_state = self
            .consume_state(session_key, &returned_state)
            .await
            .map_err(failed(StateValidated))?;
        debug!(stage = ?StateValidated);

        let tokens = self
            .exchanger
            .exchange(&code, &request_state)
            .await
            .map_err(failed(TokenExchanged))?;
        debug!(stage = ?TokenExchanged, token_type = %tokens.token_type);

        let (claims, profile) = self
            .validate_claims(tokens, &request_state)
            .await
            .map_err(failed(ClaimsValidated))?;
        drop(request_state);
        debug!(stage = ?ClaimsValidated);

        let session = map_session(&claims, Some(&profile)).map_err(failed(SessionEstablished))?;
        info!(stage = ?SessionEstablished, issuer = %session.issuer, "login session established");
        Ok(session)
    }

    /// [`handle`](Self::handle), then hand the session to `sink`.
    pub async fn handle_and_persist(
        &self,
        session_key: &str,
        params: CallbackParams,
        sink: &dyn SessionSink,
    ) -> Result<Session, CallbackFailure> {
        let session = self.handle(session_key, params).await?;
        sink.persist(session.clone())
            .await
            .map_err(failed(CallbackStage::SessionEstablished))?;
        Ok(session)
    }

    /// The stored record is removed whatever the comparison says: one shot per attempt.
    async fn consume_state(&self, session_key: &str, returned: &str) -> Result<AuthorizationRequestState, AuthError> {
        let stored = self.store.take(session_key).await?;
        match stored {
            Some(record) if constant_time_eq(&record.state, returned) => Ok(record),
            Some(_) => {
                warn!(target: "pseudoidc::security", "callback state does not match the stored attempt");
                Err(AuthError::StateMismatch)
            }
            None => {
                warn!(target: "pseudoidc::security", "callback for unknown, expired or consumed attempt");
                Err(AuthError::StateMismatch)
            }
        }
    }

    /// Consumes the token set; it is dropped before this returns.
    async fn validate_claims(
        &self,
        tokens: TokenSet,
        request_state: &AuthorizationRequestState,
    ) -> Result<(IdentityClaims, Profile), AuthError> {
        let id_token = tokens.id_token.as_deref().ok_or_else(|| {
            AuthError::invalid_token(InvalidTokenReason::Malformed("token response carries no id_token".into()))
        })?;
        let claims = self.verifier.verify(id_token, request_state.nonce.as_deref()).await?;
        if tokens.subject_hint.as_deref().is_some_and(|hint| hint != claims.sub) {
            return Err(AuthError::invalid_token(InvalidTokenReason::SubjectMismatch));
        }

        let enriched = if self.userinfo.should_fetch(&claims) {
            match self.userinfo.fetch(&tokens.access_token).await {
                Ok(profile) if profile.id == claims.sub => Some(profile),
                Ok(_) => {
                    warn!("userinfo subject differs from the identity token, profile discarded");
                    None
                }
                Err(err) => {
                    warn!(error = %err, "userinfo enrichment failed, using identity token claims");
                    None
                }
            }
        } else {
            None
        };
        let profile = enriched.unwrap_or_else(|| Profile::from_claims(&claims));
        Ok((claims, profile))
    }
}
