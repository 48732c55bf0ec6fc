//! Mapping verified claims (and an optional profile) into the application session.

use crate::oauth_core::error::AuthError;
use crate::oauth_core::types::{IdentityClaims, Profile, Session};

/// Pure and deterministic. The pseudonym is always the verified `sub`, never `profile.id`.
pub fn map_session(claims: &IdentityClaims, profile: Option<&Profile>) -> Result<Session, AuthError> {
    if claims.sub.trim().is_empty() {
        return Err(AuthError::MissingSubject);
    }
    let display_name = profile
        .and_then(|p| p.name.clone())
        .or_else(|| claims.name.clone())
        .filter(|name| !name.trim().is_empty());
    Ok(Session {
        pseudonym: claims.sub.clone(),
        display_name,
        issuer: claims.iss.clone(),
    })
}
