//! Error taxonomy for the login exchange and its mapping to end-user responses.

use std::fmt;
use std::time::Duration;

use serde_json::json;
use thiserror::Error;

/// Why an identity token was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidTokenReason {
    /// Not three dot-separated segments, or a segment failed to decode.
    Malformed(String),
    /// The header algorithm is not one we verify, or disagrees with the key.
    UnsupportedAlgorithm(String),
    /// No published key matches the token's `kid`.
    UnknownKey,
    /// Signature did not verify against the published key.
    BadSignature,
    Expired,
    IssuerMismatch,
    AudienceMismatch,
    NonceMismatch,
    /// The token response named a different subject than the identity token.
    SubjectMismatch,
    /// The provider's key set could not be fetched or parsed.
    KeySet(String),
    /// Any other claim check (`nbf`, required claims, ...).
    Claims(String),
}

impl fmt::Display for InvalidTokenReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidTokenReason::Malformed(detail) => write!(f, "malformed token: {detail}"),
            InvalidTokenReason::UnsupportedAlgorithm(alg) => write!(f, "unsupported algorithm {alg}"),
            InvalidTokenReason::UnknownKey => f.write_str("no matching signing key"),
            InvalidTokenReason::BadSignature => f.write_str("signature mismatch"),
            InvalidTokenReason::Expired => f.write_str("token expired"),
            InvalidTokenReason::IssuerMismatch => f.write_str("issuer mismatch"),
            InvalidTokenReason::AudienceMismatch => f.write_str("audience mismatch"),
            InvalidTokenReason::NonceMismatch => f.write_str("nonce mismatch"),
            InvalidTokenReason::SubjectMismatch => f.write_str("subject mismatch"),
            InvalidTokenReason::KeySet(detail) => write!(f, "signing keys unavailable: {detail}"),
            InvalidTokenReason::Claims(detail) => write!(f, "claim validation failed: {detail}"),
        }
    }
}

impl From<jsonwebtoken::errors::Error> for InvalidTokenReason {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;
        match err.kind() {
            ErrorKind::InvalidToken
            | ErrorKind::Base64(_)
            | ErrorKind::Json(_)
            | ErrorKind::Utf8(_) => InvalidTokenReason::Malformed(err.to_string()),
            ErrorKind::InvalidSignature => InvalidTokenReason::BadSignature,
            ErrorKind::ExpiredSignature => InvalidTokenReason::Expired,
            ErrorKind::InvalidIssuer => InvalidTokenReason::IssuerMismatch,
            ErrorKind::InvalidAudience => InvalidTokenReason::AudienceMismatch,
            ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName | ErrorKind::MissingAlgorithm => {
                InvalidTokenReason::UnsupportedAlgorithm(err.to_string())
            }
            ErrorKind::InvalidRsaKey(_) | ErrorKind::InvalidEcdsaKey | ErrorKind::InvalidKeyFormat => {
                InvalidTokenReason::KeySet(err.to_string())
            }
            _ => InvalidTokenReason::Claims(err.to_string()),
        }
    }
}

/// Every failure the login exchange can produce.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Fatal at startup: missing or unusable provider configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("callback is missing the `code` parameter")]
    MissingCode,

    #[error("callback is missing the `state` parameter")]
    MissingState,

    /// The provider redirected back with `error=...` instead of a code.
    #[error("provider refused the authorization request: {error}")]
    ProviderDenied {
        error: String,
        description: Option<String>,
    },

    /// Unknown, expired, replayed or forged `state`.
    #[error("state mismatch")]
    StateMismatch,

    #[error("token endpoint answered HTTP {status}")]
    TokenExchange { status: u16, body: String },

    #[error("token response rejected: {0}")]
    TokenParse(String),

    #[error("identity token rejected: {reason}")]
    InvalidToken { reason: InvalidTokenReason },

    #[error("userinfo fetch failed: {0}")]
    ProfileFetch(String),

    #[error("verified claims carry no subject")]
    MissingSubject,

    #[error("upstream call exceeded {0:?}")]
    Timeout(Duration),

    #[error("upstream transport failure: {0}")]
    Transport(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    pub(crate) fn invalid_token(reason: InvalidTokenReason) -> Self {
        AuthError::InvalidToken { reason }
    }

    /// Coarse class used for status mapping and log routing.
    pub fn category(&self) -> ErrorCategory {
        match self {
            AuthError::Configuration(_) => ErrorCategory::Configuration,
            AuthError::MissingCode | AuthError::MissingState | AuthError::ProviderDenied { .. } => {
                ErrorCategory::ClientProtocol
            }
            AuthError::StateMismatch => ErrorCategory::StateMismatch,
            AuthError::TokenExchange { .. }
            | AuthError::TokenParse(_)
            | AuthError::InvalidToken { .. }
            | AuthError::ProfileFetch(_)
            | AuthError::Timeout(_)
            | AuthError::Transport(_) => ErrorCategory::Upstream,
            AuthError::MissingSubject | AuthError::Internal(_) => ErrorCategory::Internal,
        }
    }

    pub fn http_status(&self) -> u16 {
        self.category().http_status()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    ClientProtocol,
    StateMismatch,
    Upstream,
    Internal,
}

impl ErrorCategory {
    pub fn http_status(self) -> u16 {
        match self {
            ErrorCategory::ClientProtocol | ErrorCategory::StateMismatch => 400,
            ErrorCategory::Upstream => 502,
            ErrorCategory::Configuration | ErrorCategory::Internal => 500,
        }
    }

    /// Public error code. Deliberately coarse: the cause stays in operator logs.
    pub fn public_code(self) -> &'static str {
        match self {
            ErrorCategory::ClientProtocol => "invalid_request",
            ErrorCategory::StateMismatch | ErrorCategory::Upstream => "authentication_failed",
            ErrorCategory::Configuration | ErrorCategory::Internal => "server_error",
        }
    }
}

/// Status and JSON body to hand back to the end user.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorResponse {
    pub status: u16,
    pub body: serde_json::Value,
}

impl ErrorResponse {
    pub fn for_category(category: ErrorCategory) -> Self {
        ErrorResponse {
            status: category.http_status(),
            body: json!({
                "error": category.public_code(),
                "error_description": "Authentication failed",
            }),
        }
    }

    pub fn body_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&self.body).unwrap_or_default()
    }
}
