//! Values flowing through one login attempt, from the authorization request to the session.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-attempt security values, stored between the redirect and the callback.
///
/// Serializable so external security-check stores can persist it.
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthorizationRequestState {
    /// Anti-CSRF value round-tripped through the redirect.
    pub state: String,
    /// Expected `nonce` claim, when nonce checking is required.
    pub nonce: Option<String>,
    /// PKCE code verifier, when PKCE is required.
    pub pkce_verifier: Option<String>,
    /// Redirect URI sent with the authorization request; the token request must repeat it.
    pub redirect_uri: String,
    pub created_at: DateTime<Utc>,
}

impl fmt::Debug for AuthorizationRequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizationRequestState")
            .field("nonce_set", &self.nonce.is_some())
            .field("pkce", &self.pkce_verifier.is_some())
            .field("redirect_uri", &self.redirect_uri)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Tokens returned by the token endpoint. Never leaves the callback that produced it.
#[derive(Clone)]
pub struct TokenSet {
    pub access_token: String,
    pub id_token: Option<String>,
    pub token_type: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
    /// Subject the provider reported next to the tokens, under whatever field name it uses.
    pub subject_hint: Option<String>,
}

impl fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"<redacted>")
            .field("id_token", &self.id_token.as_ref().map(|_| "<redacted>"))
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("scope", &self.scope)
            .field("subject_hint", &self.subject_hint)
            .finish()
    }
}

/// `aud` may be a single string or an array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    Single(String),
    Multiple(Vec<String>),
}

impl Audience {
    pub fn contains(&self, value: &str) -> bool {
        match self {
            Audience::Single(s) => s == value,
            Audience::Multiple(v) => v.iter().any(|s| s == value),
        }
    }
}

/// Claims of a verified identity token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityClaims {
    pub sub: String,
    pub iss: String,
    pub aud: Audience,
    pub exp: i64,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(default)]
    pub azp: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: Option<bool>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Normalized external identity, from userinfo or straight from the claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub email: Option<String>,
    pub email_verified: bool,
    pub name: Option<String>,
}

impl Profile {
    pub fn from_claims(claims: &IdentityClaims) -> Self {
        Profile {
            id: claims.sub.clone(),
            email: claims.email.clone(),
            email_verified: claims.email_verified.unwrap_or(false),
            name: claims.name.clone(),
        }
    }
}

/// What the application gets to keep: a pseudonym, never tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub pseudonym: String,
    pub display_name: Option<String>,
    pub issuer: String,
}
