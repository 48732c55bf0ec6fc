pub mod oauth_core;

pub mod openid;

pub mod callback;
pub mod config;
pub mod provider;
pub mod session;

pub use callback::{CallbackController, CallbackFailure, CallbackParams, CallbackStage};
pub use config::PseudoidcConfig;
pub use oauth_core::error::{AuthError, ErrorCategory, ErrorResponse, InvalidTokenReason};
pub use oauth_core::http_client::{HttpClientError, HttpRequest, HttpResponse, InMemoryHttpClient, OAuthHttpClient, ReqwestHttpClient};
pub use oauth_core::memory::{InMemorySessionSink, InMemoryStateStore};
pub use oauth_core::oauth_client::{AuthorizationRedirect, AuthorizationRequest, AuthorizationRequestBuilder};
pub use oauth_core::oauth_provider::{SessionSink, StateStore};
pub use oauth_core::token_exchange::{ClientSecretBasic, ClientSecretPost, TokenExchanger, TokenRequestStrategy};
pub use oauth_core::types::{AuthorizationRequestState, IdentityClaims, Profile, Session, TokenSet};
pub use openid::id_token::IdTokenVerifier;
pub use openid::userinfo::UserinfoFetcher;
pub use provider::{Check, PSEUDOIDC_ISSUER, Prompt, ProviderDescriptor, TokenEndpointAuth, UserinfoPolicy};
pub use session::map_session;
