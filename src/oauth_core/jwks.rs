//! JWKS caching for identity token verification.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use jsonwebtoken::{Algorithm, DecodingKey};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use super::error::{AuthError, InvalidTokenReason};
use super::http_client::{HttpRequest, OAuthHttpClient, execute_bounded};

/// A JWK as represented in a JWKS endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    pub kty: String,
    pub kid: Option<String>,
    #[serde(rename = "use")]
    pub use_: Option<String>,
    pub alg: Option<String>,
    pub n: Option<String>,
    pub e: Option<String>,
    pub crv: Option<String>,
    pub x: Option<String>,
    pub y: Option<String>,
}

impl Jwk {
    /// Decoding key plus the algorithm it verifies. The algorithm comes from the key, never the token.
    pub fn decoding_key(&self) -> Result<(DecodingKey, Algorithm), InvalidTokenReason> {
        let missing = |field: &str| InvalidTokenReason::KeySet(format!("{} JWK missing `{field}`", self.kty));
        match self.kty.as_str() {
            "RSA" => {
                let n = self.n.as_deref().ok_or_else(|| missing("n"))?;
                let e = self.e.as_deref().ok_or_else(|| missing("e"))?;
                let key = DecodingKey::from_rsa_components(n, e)?;
                let alg = match self.alg.as_deref() {
                    None | Some("RS256") => Algorithm::RS256,
                    Some("RS384") => Algorithm::RS384,
                    Some("RS512") => Algorithm::RS512,
                    Some("PS256") => Algorithm::PS256,
                    Some("PS384") => Algorithm::PS384,
                    Some("PS512") => Algorithm::PS512,
                    Some(other) => return Err(InvalidTokenReason::UnsupportedAlgorithm(other.to_string())),
                };
                Ok((key, alg))
            }
            "EC" => {
                let x = self.x.as_deref().ok_or_else(|| missing("x"))?;
                let y = self.y.as_deref().ok_or_else(|| missing("y"))?;
                let key = DecodingKey::from_ec_components(x, y)?;
                let alg = match (self.alg.as_deref(), self.crv.as_deref()) {
                    (Some("ES384"), _) | (None, Some("P-384")) => Algorithm::ES384,
                    (None | Some("ES256"), _) => Algorithm::ES256,
                    (Some(other), _) => return Err(InvalidTokenReason::UnsupportedAlgorithm(other.to_string())),
                };
                Ok((key, alg))
            }
            other => Err(InvalidTokenReason::UnsupportedAlgorithm(format!("key type {other}"))),
        }
    }

    fn is_signing_key(&self) -> bool {
        self.use_.as_deref().is_none_or(|u| u == "sig")
    }
}

/// A JWKS response containing multiple keys.
#[derive(Debug, Deserialize)]
struct JwkSet {
    keys: Vec<Jwk>,
}

/// Keys from one JWKS fetch. Replaced whole, never edited in place.
#[derive(Default)]
struct KeySnapshot {
    keys: HashMap<String, Jwk>,
    fetched_at: Option<Instant>,
}

impl KeySnapshot {
    fn is_stale(&self, ttl: Duration) -> bool {
        self.fetched_at.is_none_or(|at| at.elapsed() > ttl)
    }

    fn lookup(&self, kid: Option<&str>) -> Option<Jwk> {
        match kid {
            Some(kid) => self.keys.get(kid).cloned(),
            None if self.keys.len() == 1 => self.keys.values().next().cloned(),
            None => None,
        }
    }
}

/// A cache of JWKs fetched from a JWKS URI with automatic refresh.
///
/// Readers always see one complete key set. Concurrent refreshes are coalesced into one fetch.
/// Keys without a `kid` are kept under a positional name so single-key sets still work.
#[derive(Clone)]
pub struct JwksCache {
    http: Arc<dyn OAuthHttpClient>,
    uri: String,
    snapshot: Arc<RwLock<Arc<KeySnapshot>>>,
    refresh_lock: Arc<Mutex<()>>,
    ttl: Duration,
    fetch_timeout: Duration,
}

impl JwksCache {
    /// Keys are fetched lazily, on first use.
    pub fn new(http: Arc<dyn OAuthHttpClient>, uri: impl Into<String>, ttl: Duration, fetch_timeout: Duration) -> Self {
        JwksCache {
            http,
            uri: uri.into(),
            snapshot: Arc::new(RwLock::new(Arc::new(KeySnapshot::default()))),
            refresh_lock: Arc::new(Mutex::new(())),
            ttl,
            fetch_timeout,
        }
    }

    fn current(&self) -> Arc<KeySnapshot> {
        match self.snapshot.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn install(&self, snapshot: KeySnapshot) -> Arc<KeySnapshot> {
        let snapshot = Arc::new(snapshot);
        match self.snapshot.write() {
            Ok(mut guard) => *guard = snapshot.clone(),
            Err(poisoned) => *poisoned.into_inner() = snapshot.clone(),
        }
        snapshot
    }

    /// Fetch the key set now, waiting for any refresh already in flight.
    pub async fn refresh(&self) -> Result<(), AuthError> {
        let _guard = self.refresh_lock.lock().await;
        self.fetch().await.map(|snapshot| {
            self.install(snapshot);
        })
    }

    #[instrument(skip(self), level = "debug", fields(uri = %self.uri))]
    async fn fetch(&self) -> Result<KeySnapshot, AuthError> {
        let response = execute_bounded(
            self.http.as_ref(),
            HttpRequest::get(self.uri.as_str()).header("Accept", "application/json"),
            self.fetch_timeout,
        )
        .await
        .map_err(|e| match e {
            AuthError::Timeout(_) => e,
            other => AuthError::invalid_token(InvalidTokenReason::KeySet(other.to_string())),
        })?;
        if !response.is_success() {
            return Err(AuthError::invalid_token(InvalidTokenReason::KeySet(format!(
                "JWKS endpoint answered HTTP {}",
                response.status
            ))));
        }
        let jwks: JwkSet = serde_json::from_slice(&response.body)
            .map_err(|e| AuthError::invalid_token(InvalidTokenReason::KeySet(format!("unparseable JWKS: {e}"))))?;

        let keys: HashMap<String, Jwk> = jwks
            .keys
            .into_iter()
            .filter(Jwk::is_signing_key)
            .enumerate()
            .map(|(index, jwk)| (jwk.kid.clone().unwrap_or_else(|| format!("#{index}")), jwk))
            .collect();
        debug!(keys = keys.len(), "JWKS refreshed");
        Ok(KeySnapshot { keys, fetched_at: Some(Instant::now()) })
    }

    /// Key for `kid`, refreshing when stale and once more when the kid is unknown (key rotation).
    pub async fn get(&self, kid: Option<&str>) -> Result<Jwk, AuthError> {
        let seen = self.current();
        let stale = seen.is_stale(self.ttl);
        if !stale {
            if let Some(jwk) = seen.lookup(kid) {
                return Ok(jwk);
            }
        }

        let _guard = self.refresh_lock.lock().await;
        let latest = self.current();
        let keys = if Arc::ptr_eq(&latest, &seen) {
            if !stale {
                info!(kid = ?kid, "signing key not cached, refreshing JWKS");
            }
            self.install(self.fetch().await?)
        } else {
            // Another caller refreshed while this one waited.
            latest
        };
        keys.lookup(kid)
            .ok_or_else(|| AuthError::invalid_token(InvalidTokenReason::UnknownKey))
    }

    pub fn len(&self) -> usize {
        self.current().keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current().keys.is_empty()
    }
}
