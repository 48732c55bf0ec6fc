//! Identity token verification.
//!
//! The token is only trusted after its signature verifies against the provider's
//! published keys and `iss`, `aud`, `exp`, `nbf`, `azp` and `nonce` all check out.

use std::sync::Arc;

use jsonwebtoken::{Algorithm, Validation, decode, decode_header};
use tracing::{debug, instrument};

use crate::oauth_core::crypto::constant_time_eq;
use crate::oauth_core::error::{AuthError, InvalidTokenReason};
use crate::oauth_core::http_client::OAuthHttpClient;
use crate::oauth_core::jwks::JwksCache;
use crate::oauth_core::types::IdentityClaims;
use crate::provider::{Check, ProviderDescriptor};

const REQUIRED_CLAIMS: [&str; 4] = ["exp", "iss", "aud", "sub"];

#[derive(Clone)]
pub struct IdTokenVerifier {
    descriptor: Arc<ProviderDescriptor>,
    jwks: JwksCache,
}

impl IdTokenVerifier {
    pub fn new(descriptor: Arc<ProviderDescriptor>, http: Arc<dyn OAuthHttpClient>) -> Self {
        let jwks = JwksCache::new(
            http,
            descriptor.jwks_uri().as_str(),
            descriptor.jwks_ttl(),
            descriptor.token_timeout(),
        );
        IdTokenVerifier { descriptor, jwks }
    }

    pub fn jwks(&self) -> &JwksCache {
        &self.jwks
    }

    /// Verify `id_token` and return its claims. `expected_nonce` is the attempt's stored nonce.
    #[instrument(skip_all, level = "debug")]
    pub async fn verify(&self, id_token: &str, expected_nonce: Option<&str>) -> Result<IdentityClaims, AuthError> {
        let invalid = AuthError::invalid_token;

        let segments: Vec<&str> = id_token.split('.').collect();
        if segments.len() != 3 || segments.iter().any(|s| s.is_empty()) {
            return Err(invalid(InvalidTokenReason::Malformed(format!(
                "expected 3 non-empty segments, found {}",
                segments.len()
            ))));
        }
        let header = decode_header(id_token).map_err(|e| invalid(e.into()))?;
        if matches!(header.alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
            return Err(invalid(InvalidTokenReason::UnsupportedAlgorithm(format!("{:?}", header.alg))));
        }

        let jwk = self.jwks.get(header.kid.as_deref()).await?;
        let (key, key_alg) = jwk.decoding_key().map_err(invalid)?;
        if header.alg != key_alg {
            return Err(invalid(InvalidTokenReason::UnsupportedAlgorithm(format!(
                "token signed with {:?}, key is for {:?}",
                header.alg, key_alg
            ))));
        }

        let mut validation = Validation::new(key_alg);
        validation.set_issuer(&[self.descriptor.issuer()]);
        validation.set_audience(&[self.descriptor.client_id()]);
        validation.set_required_spec_claims(&REQUIRED_CLAIMS);
        validation.leeway = self.descriptor.clock_leeway().as_secs();
        validation.validate_exp = true;
        validation.validate_nbf = true;

        let claims = decode::<IdentityClaims>(id_token, &key, &validation)
            .map_err(|e| invalid(e.into()))?
            .claims;

        if let Some(azp) = &claims.azp {
            if azp != self.descriptor.client_id() {
                return Err(invalid(InvalidTokenReason::AudienceMismatch));
            }
        }
        self.check_nonce(&claims, expected_nonce)?;

        debug!(issuer = %claims.iss, "identity token verified");
        Ok(claims)
    }

    fn check_nonce(&self, claims: &IdentityClaims, expected: Option<&str>) -> Result<(), AuthError> {
        let mismatch = || AuthError::invalid_token(InvalidTokenReason::NonceMismatch);
        match (expected, claims.nonce.as_deref()) {
            (Some(expected), Some(actual)) if constant_time_eq(expected, actual) => Ok(()),
            (Some(_), _) => Err(mismatch()),
            (None, _) if self.descriptor.requires(Check::Nonce) => {
                Err(AuthError::Internal("nonce check required but no nonce was stored".into()))
            }
            (None, _) => Ok(()),
        }
    }
}
