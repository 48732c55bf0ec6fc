//! OAuth2 core primitives for the client side of the authorization-code flow.

pub mod crypto;
pub mod error;
pub mod http_client;
pub mod jwks;
pub mod memory;
pub mod oauth_client;
pub mod oauth_provider;
pub mod token_exchange;
pub mod types;
