//! Collaborator seams: the security-check store and the session sink.

use std::time::Duration;

use async_trait::async_trait;

use super::error::AuthError;
use super::types::{AuthorizationRequestState, Session};

/// Holds [`AuthorizationRequestState`] between the redirect and the callback.
#[async_trait]
pub trait StateStore: Send + Sync + 'static {
    /// Store the state for one login attempt under an opaque key, expiring after `ttl`.
    async fn put(&self, key: &str, state: AuthorizationRequestState, ttl: Duration) -> Result<(), AuthError>;

    /// Atomically fetch and delete. Two racing callers never both receive the record;
    /// an expired record is reported as absent.
    async fn take(&self, key: &str) -> Result<Option<AuthorizationRequestState>, AuthError>;
}

/// Receives established sessions. Transport (cookie, signed token, server store) is the sink's business.
#[async_trait]
pub trait SessionSink: Send + Sync + 'static {
    async fn persist(&self, session: Session) -> Result<(), AuthError>;
}
