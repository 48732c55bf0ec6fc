#![allow(dead_code)]

use std::sync::Arc;

use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use pseudoidc_oauth::oauth_core::http_client::HttpResponse;
use pseudoidc_oauth::provider::ProviderDescriptorBuilder;
use pseudoidc_oauth::{
    AuthorizationRedirect, AuthorizationRequestBuilder, CallbackController, CallbackParams, Check, HttpRequest,
    InMemoryHttpClient, InMemoryStateStore, Prompt, ProviderDescriptor,
};
use serde_json::{Value, json};
use url::Url;

pub const ISSUER: &str = "https://auth.local";
pub const AUTHORIZE_URL: &str = "https://auth.local/authorize";
pub const TOKEN_URL: &str = "https://auth.local/token";
pub const USERINFO_URL: &str = "https://auth.local/userinfo";
pub const JWKS_URL: &str = "https://auth.local/jwks";
pub const CLIENT_ID: &str = "client1";
pub const CLIENT_SECRET: &str = "secret";
pub const REDIRECT_URI: &str = "https://app.local/callback";
pub const KID: &str = "test-key";

const SIGNING_KEY: &[u8] = include_bytes!("../fixtures/signing_key.pem");
const ROGUE_KEY: &[u8] = include_bytes!("../fixtures/rogue_key.pem");
const SIGNING_KEY_N: &str = "3dLjIeeYfXUElCaYuvfOT9fx1S2RaRwEVBfGTYcGr7czlZMt7mPzo7fEFn0-hOE3M_8frjwt9sC5ZHGHfSB11gEGMSstAw6Y6UZ2Ov593Briywpbg8HTV9Shf7yUhoY2OT2j0EXZEtS2kv9-rYvj6lNN9EQeafgw0C40YVdpv2gzg14MsmSKdE_Ps8UTkYdLYEgXLmfre4ABuZLtV56WeYzfHdaE4LGbZI5vD5oZchysTsAG-8Gef_KGnYvW84ABY-D5Z8Tqz3h5tj7KWIzs95O0CwmP1HWPUi1nBAvvfAkm9W3vkDFXq9VQqicQGqF9vMfx1CGld77ZX5yprPgd_w";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Provider configured the PseudOIDC way, against local mock endpoints.
pub fn descriptor_builder() -> ProviderDescriptorBuilder {
    ProviderDescriptor::builder(ISSUER)
        .prompt(Prompt::Create)
        .check(Check::Nonce)
        .authorization_endpoint(AUTHORIZE_URL)
        .token_endpoint(TOKEN_URL)
        .userinfo_endpoint(USERINFO_URL)
        .jwks_uri(JWKS_URL)
        .client_id(CLIENT_ID)
        .client_secret(CLIENT_SECRET)
        .redirect_uri(REDIRECT_URI)
}

pub fn descriptor() -> Arc<ProviderDescriptor> {
    Arc::new(descriptor_builder().build().unwrap())
}

pub fn jwks_for(kids: &[&str]) -> HttpResponse {
    let keys: Vec<Value> = kids
        .iter()
        .map(|kid| json!({"kty": "RSA", "kid": kid, "use": "sig", "alg": "RS256", "n": SIGNING_KEY_N, "e": "AQAB"}))
        .collect();
    HttpResponse::json(200, &json!({ "keys": keys }))
}

/// Mock provider that already publishes the signing key.
pub fn provider_http() -> InMemoryHttpClient {
    let http = InMemoryHttpClient::new();
    http.insert_response(JWKS_URL, jwks_for(&[KID]));
    http
}

/// Claims a well-behaved provider would put in the identity token.
pub fn claims(sub: &str, nonce: Option<&str>) -> Value {
    let now = Utc::now().timestamp();
    let mut claims = json!({
        "iss": ISSUER,
        "sub": sub,
        "aud": CLIENT_ID,
        "exp": now + 300,
        "iat": now,
    });
    if let Some(nonce) = nonce {
        claims["nonce"] = json!(nonce);
    }
    claims
}

pub fn sign_with(pem: &[u8], kid: Option<&str>, claims: &Value) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = kid.map(str::to_string);
    encode(&header, claims, &EncodingKey::from_rsa_pem(pem).unwrap()).unwrap()
}

pub fn sign(claims: &Value) -> String {
    sign_with(SIGNING_KEY, Some(KID), claims)
}

pub fn sign_with_kid(kid: &str, claims: &Value) -> String {
    sign_with(SIGNING_KEY, Some(kid), claims)
}

pub fn sign_rogue(claims: &Value) -> String {
    sign_with(ROGUE_KEY, Some(KID), claims)
}

pub fn token_response(access_token: &str, id_token: &str) -> HttpResponse {
    HttpResponse::json(
        200,
        &json!({
            "access_token": access_token,
            "id_token": id_token,
            "token_type": "Bearer",
            "expires_in": 3600,
        }),
    )
}

pub fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs().find(|(k, _)| k == name).map(|(_, v)| v.into_owned())
}

pub fn form_param(request: &HttpRequest, name: &str) -> Option<String> {
    url::form_urlencoded::parse(request.body.as_deref().unwrap_or_default())
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

pub fn callback(code: &str, state: &str) -> CallbackParams {
    CallbackParams { code: Some(code.to_string()), state: Some(state.to_string()), ..CallbackParams::default() }
}

/// One relying party wired to a mock provider.
pub struct Harness {
    pub http: InMemoryHttpClient,
    pub store: Arc<InMemoryStateStore>,
    pub descriptor: Arc<ProviderDescriptor>,
    pub controller: CallbackController,
}

impl Harness {
    pub fn new(builder: ProviderDescriptorBuilder) -> Self {
        Self::with_http(builder, provider_http())
    }

    pub fn with_http(builder: ProviderDescriptorBuilder, http: InMemoryHttpClient) -> Self {
        init_tracing();
        let descriptor = Arc::new(builder.build().unwrap());
        let store = Arc::new(InMemoryStateStore::new());
        let controller = CallbackController::new(descriptor.clone(), Arc::new(http.clone()), store.clone());
        Harness { http, store, descriptor, controller }
    }

    /// Start a login; returns the redirect plus the `state` and `nonce` it carries.
    pub async fn start(&self) -> (AuthorizationRedirect, String, Option<String>) {
        let redirect = AuthorizationRequestBuilder::new(self.descriptor.clone())
            .initiate(self.store.as_ref(), None)
            .await
            .unwrap();
        let state = query_param(&redirect.url, "state").unwrap();
        let nonce = query_param(&redirect.url, "nonce");
        (redirect, state, nonce)
    }

    pub fn requests_to(&self, url: &str) -> Vec<HttpRequest> {
        self.http.requests().into_iter().filter(|r| r.url == url).collect()
    }
}
