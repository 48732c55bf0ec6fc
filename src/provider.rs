//! Static description of the identity provider: endpoints, client credentials and the
//! security checks it insists on.
//!
//! A [`ProviderDescriptor`] is built once at startup, then shared read-only
//! (`Arc<ProviderDescriptor>`) by every component of the login pipeline.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;
use url::Url;

use crate::oauth_core::error::AuthError;
use crate::oauth_core::token_exchange::{ClientSecretBasic, ClientSecretPost, TokenRequestStrategy};
use crate::openid::discovery::ProviderMetadata;

/// Issuer of the PseudOIDC service.
pub const PSEUDOIDC_ISSUER: &str = "https://auth.scramblesolutions.com";

const DEFAULT_TOKEN_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_USERINFO_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_JWKS_TTL: Duration = Duration::from_secs(600);
const DEFAULT_CLOCK_LEEWAY: Duration = Duration::from_secs(60);
const DEFAULT_STATE_TTL: Duration = Duration::from_secs(600);

/// Authorization parameters the request builder owns; extra parameters may not repeat them.
const RESERVED_AUTHORIZE_PARAMS: [&str; 9] = [
    "response_type",
    "client_id",
    "redirect_uri",
    "scope",
    "state",
    "nonce",
    "prompt",
    "code_challenge",
    "code_challenge_method",
];

/// Security checks a provider can require on an authorization attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Check {
    State,
    Nonce,
    Pkce,
}

impl FromStr for Check {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "state" => Ok(Check::State),
            "nonce" => Ok(Check::Nonce),
            "pkce" => Ok(Check::Pkce),
            other => Err(AuthError::Configuration(format!("unknown check `{other}`"))),
        }
    }
}

/// `prompt` values sent on the authorization request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prompt {
    None,
    Login,
    Consent,
    SelectAccount,
    /// Ask the provider to mint a fresh pseudonym.
    Create,
}

impl Prompt {
    pub fn as_str(self) -> &'static str {
        match self {
            Prompt::None => "none",
            Prompt::Login => "login",
            Prompt::Consent => "consent",
            Prompt::SelectAccount => "select_account",
            Prompt::Create => "create",
        }
    }
}

impl FromStr for Prompt {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Prompt::None),
            "login" => Ok(Prompt::Login),
            "consent" => Ok(Prompt::Consent),
            "select_account" => Ok(Prompt::SelectAccount),
            "create" => Ok(Prompt::Create),
            other => Err(AuthError::Configuration(format!("unknown prompt `{other}`"))),
        }
    }
}

/// When to call the userinfo endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserinfoPolicy {
    Never,
    /// Only when the identity token lacks an email claim.
    WhenClaimsIncomplete,
    Always,
}

impl FromStr for UserinfoPolicy {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "never" => Ok(UserinfoPolicy::Never),
            "incomplete" => Ok(UserinfoPolicy::WhenClaimsIncomplete),
            "always" => Ok(UserinfoPolicy::Always),
            other => Err(AuthError::Configuration(format!("unknown userinfo policy `{other}`"))),
        }
    }
}

/// How the client authenticates at the token endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenEndpointAuth {
    ClientSecretPost,
    ClientSecretBasic,
}

impl TokenEndpointAuth {
    pub fn strategy(self) -> Arc<dyn TokenRequestStrategy> {
        match self {
            TokenEndpointAuth::ClientSecretPost => Arc::new(ClientSecretPost),
            TokenEndpointAuth::ClientSecretBasic => Arc::new(ClientSecretBasic),
        }
    }
}

impl FromStr for TokenEndpointAuth {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "client_secret_post" => Ok(TokenEndpointAuth::ClientSecretPost),
            "client_secret_basic" => Ok(TokenEndpointAuth::ClientSecretBasic),
            other => Err(AuthError::Configuration(format!("unknown token endpoint auth `{other}`"))),
        }
    }
}

/// Client secret. Its `Debug` output never shows the value.
#[derive(Clone)]
pub struct ClientSecret(String);

impl ClientSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        ClientSecret(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ClientSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ClientSecret(<redacted>)")
    }
}

/// Immutable provider configuration.
pub struct ProviderDescriptor {
    issuer: String,
    authorization_endpoint: Url,
    token_endpoint: Url,
    userinfo_endpoint: Option<Url>,
    jwks_uri: Url,
    client_id: String,
    client_secret: ClientSecret,
    redirect_uri: Url,
    scopes: Vec<String>,
    checks: BTreeSet<Check>,
    prompt: Option<Prompt>,
    extra_authorize_params: Vec<(String, String)>,
    userinfo: UserinfoPolicy,
    token_strategy: Arc<dyn TokenRequestStrategy>,
    subject_fields: Vec<String>,
    token_timeout: Duration,
    userinfo_timeout: Duration,
    jwks_ttl: Duration,
    clock_leeway: Duration,
    state_ttl: Duration,
}

impl ProviderDescriptor {
    pub fn builder(issuer: impl Into<String>) -> ProviderDescriptorBuilder {
        ProviderDescriptorBuilder::new(issuer)
    }

    /// PseudOIDC defaults: `openid` scope, `prompt=create`, state and nonce checks.
    pub fn pseudoidc() -> ProviderDescriptorBuilder {
        ProviderDescriptorBuilder::new(PSEUDOIDC_ISSUER)
            .prompt(Prompt::Create)
            .check(Check::Nonce)
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn authorization_endpoint(&self) -> &Url {
        &self.authorization_endpoint
    }

    pub fn token_endpoint(&self) -> &Url {
        &self.token_endpoint
    }

    pub fn userinfo_endpoint(&self) -> Option<&Url> {
        self.userinfo_endpoint.as_ref()
    }

    pub fn jwks_uri(&self) -> &Url {
        &self.jwks_uri
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn client_secret(&self) -> &ClientSecret {
        &self.client_secret
    }

    pub fn redirect_uri(&self) -> &Url {
        &self.redirect_uri
    }

    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    /// Whether `check` is mandatory. `state` always is.
    pub fn requires(&self, check: Check) -> bool {
        check == Check::State || self.checks.contains(&check)
    }

    pub fn prompt(&self) -> Option<Prompt> {
        self.prompt
    }

    pub fn extra_authorize_params(&self) -> &[(String, String)] {
        &self.extra_authorize_params
    }

    pub fn userinfo_policy(&self) -> UserinfoPolicy {
        self.userinfo
    }

    pub fn token_strategy(&self) -> &dyn TokenRequestStrategy {
        self.token_strategy.as_ref()
    }

    /// Field names that may carry the subject in non-identity-token responses, in priority order.
    pub fn subject_fields(&self) -> &[String] {
        &self.subject_fields
    }

    pub fn token_timeout(&self) -> Duration {
        self.token_timeout
    }

    pub fn userinfo_timeout(&self) -> Duration {
        self.userinfo_timeout
    }

    pub fn jwks_ttl(&self) -> Duration {
        self.jwks_ttl
    }

    pub fn clock_leeway(&self) -> Duration {
        self.clock_leeway
    }

    pub fn state_ttl(&self) -> Duration {
        self.state_ttl
    }
}

impl fmt::Debug for ProviderDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderDescriptor")
            .field("issuer", &self.issuer)
            .field("authorization_endpoint", &self.authorization_endpoint.as_str())
            .field("token_endpoint", &self.token_endpoint.as_str())
            .field("userinfo_endpoint", &self.userinfo_endpoint.as_ref().map(Url::as_str))
            .field("jwks_uri", &self.jwks_uri.as_str())
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret)
            .field("scopes", &self.scopes)
            .field("checks", &self.checks)
            .field("prompt", &self.prompt)
            .field("userinfo", &self.userinfo)
            .field("token_strategy", &self.token_strategy.name())
            .finish_non_exhaustive()
    }
}

/// Builder for [`ProviderDescriptor`]. `build` is where missing configuration surfaces.
pub struct ProviderDescriptorBuilder {
    issuer: String,
    authorization_endpoint: Option<String>,
    token_endpoint: Option<String>,
    userinfo_endpoint: Option<String>,
    jwks_uri: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    redirect_uri: Option<String>,
    scopes: Vec<String>,
    checks: BTreeSet<Check>,
    prompt: Option<Prompt>,
    extra_authorize_params: Vec<(String, String)>,
    userinfo: UserinfoPolicy,
    token_auth: Option<TokenEndpointAuth>,
    token_strategy: Option<Arc<dyn TokenRequestStrategy>>,
    subject_fields: Vec<String>,
    token_timeout: Duration,
    userinfo_timeout: Duration,
    jwks_ttl: Duration,
    clock_leeway: Duration,
    state_ttl: Duration,
}

impl ProviderDescriptorBuilder {
    pub fn new(issuer: impl Into<String>) -> Self {
        ProviderDescriptorBuilder {
            issuer: issuer.into(),
            authorization_endpoint: None,
            token_endpoint: None,
            userinfo_endpoint: None,
            jwks_uri: None,
            client_id: None,
            client_secret: None,
            redirect_uri: None,
            scopes: vec!["openid".to_string()],
            checks: BTreeSet::from([Check::State]),
            prompt: None,
            extra_authorize_params: Vec::new(),
            userinfo: UserinfoPolicy::WhenClaimsIncomplete,
            token_auth: None,
            token_strategy: None,
            subject_fields: vec!["sub".into(), "pseudonym".into(), "user_id".into()],
            token_timeout: DEFAULT_TOKEN_TIMEOUT,
            userinfo_timeout: DEFAULT_USERINFO_TIMEOUT,
            jwks_ttl: DEFAULT_JWKS_TTL,
            clock_leeway: DEFAULT_CLOCK_LEEWAY,
            state_ttl: DEFAULT_STATE_TTL,
        }
    }

    pub fn authorization_endpoint(mut self, url: impl Into<String>) -> Self {
        self.authorization_endpoint = Some(url.into());
        self
    }

    pub fn token_endpoint(mut self, url: impl Into<String>) -> Self {
        self.token_endpoint = Some(url.into());
        self
    }

    pub fn userinfo_endpoint(mut self, url: impl Into<String>) -> Self {
        self.userinfo_endpoint = Some(url.into());
        self
    }

    pub fn jwks_uri(mut self, url: impl Into<String>) -> Self {
        self.jwks_uri = Some(url.into());
        self
    }

    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    pub fn redirect_uri(mut self, url: impl Into<String>) -> Self {
        self.redirect_uri = Some(url.into());
        self
    }

    /// Replace the requested scopes. `openid` is added back if missing.
    pub fn scopes(mut self, scopes: impl IntoIterator<Item = String>) -> Self {
        self.scopes = scopes.into_iter().collect();
        self
    }

    /// Replace the required checks. `state` stays enforced regardless.
    pub fn checks(mut self, checks: impl IntoIterator<Item = Check>) -> Self {
        self.checks = checks.into_iter().collect();
        self.checks.insert(Check::State);
        self
    }

    pub fn check(mut self, check: Check) -> Self {
        self.checks.insert(check);
        self
    }

    pub fn prompt(mut self, prompt: Prompt) -> Self {
        self.prompt = Some(prompt);
        self
    }

    pub fn no_prompt(mut self) -> Self {
        self.prompt = None;
        self
    }

    /// Provider-specific authorization parameter, appended after the standard ones.
    pub fn extra_authorize_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_authorize_params.push((name.into(), value.into()));
        self
    }

    pub fn userinfo_policy(mut self, policy: UserinfoPolicy) -> Self {
        self.userinfo = policy;
        self
    }

    pub fn token_endpoint_auth(mut self, auth: TokenEndpointAuth) -> Self {
        self.token_auth = Some(auth);
        self
    }

    /// Custom token request shape; wins over [`TokenEndpointAuth`].
    pub fn token_strategy(mut self, strategy: Arc<dyn TokenRequestStrategy>) -> Self {
        self.token_strategy = Some(strategy);
        self
    }

    pub fn subject_fields(mut self, fields: impl IntoIterator<Item = String>) -> Self {
        self.subject_fields = fields.into_iter().collect();
        self
    }

    pub fn token_timeout(mut self, timeout: Duration) -> Self {
        self.token_timeout = timeout;
        self
    }

    pub fn userinfo_timeout(mut self, timeout: Duration) -> Self {
        self.userinfo_timeout = timeout;
        self
    }

    pub fn jwks_ttl(mut self, ttl: Duration) -> Self {
        self.jwks_ttl = ttl;
        self
    }

    pub fn clock_leeway(mut self, leeway: Duration) -> Self {
        self.clock_leeway = leeway;
        self
    }

    pub fn state_ttl(mut self, ttl: Duration) -> Self {
        self.state_ttl = ttl;
        self
    }

    /// Fill endpoints not set explicitly from discovery metadata.
    ///
    /// The issuer is taken as the document spells it, since tokens carry that exact string.
    /// Fails when PKCE is required and the provider advertises methods without `S256`.
    pub fn discovered(mut self, metadata: &ProviderMetadata) -> Result<Self, AuthError> {
        let methods = &metadata.code_challenge_methods_supported;
        if self.checks.contains(&Check::Pkce) && !methods.is_empty() && !methods.iter().any(|m| m == "S256") {
            return Err(AuthError::Configuration(format!(
                "PKCE is required but the provider only supports {methods:?}"
            )));
        }
        if let Some(prompt) = self.prompt {
            let prompts = &metadata.prompt_values_supported;
            if !prompts.is_empty() && !prompts.iter().any(|p| p == prompt.as_str()) {
                warn!(prompt = prompt.as_str(), supported = ?prompts, "provider does not advertise the configured prompt");
            }
        }
        let scopes = &metadata.scopes_supported;
        if !scopes.is_empty() {
            for scope in self.scopes.iter().filter(|s| !scopes.contains(*s)) {
                warn!(scope = %scope, "provider does not advertise the requested scope");
            }
        }

        self.issuer = metadata.issuer.clone();
        self.authorization_endpoint
            .get_or_insert_with(|| metadata.authorization_endpoint.clone());
        self.token_endpoint.get_or_insert_with(|| metadata.token_endpoint.clone());
        self.jwks_uri.get_or_insert_with(|| metadata.jwks_uri.clone());
        if self.userinfo_endpoint.is_none() {
            self.userinfo_endpoint = metadata.userinfo_endpoint.clone();
        }
        let methods = &metadata.token_endpoint_auth_methods_supported;
        if self.token_auth.is_none()
            && !methods.is_empty()
            && !methods.iter().any(|m| m == "client_secret_post")
            && methods.iter().any(|m| m == "client_secret_basic")
        {
            self.token_auth = Some(TokenEndpointAuth::ClientSecretBasic);
        }
        Ok(self)
    }

    pub fn has_endpoints(&self) -> bool {
        self.authorization_endpoint.is_some() && self.token_endpoint.is_some() && self.jwks_uri.is_some()
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn build(self) -> Result<ProviderDescriptor, AuthError> {
        if self.issuer.trim().is_empty() {
            return Err(AuthError::Configuration("issuer is empty".into()));
        }
        parse_url("issuer", &self.issuer)?;
        let authorization_endpoint = required_url("authorization endpoint", self.authorization_endpoint)?;
        let token_endpoint = required_url("token endpoint", self.token_endpoint)?;
        let jwks_uri = required_url("jwks uri", self.jwks_uri)?;
        let userinfo_endpoint = self
            .userinfo_endpoint
            .map(|u| parse_url("userinfo endpoint", &u))
            .transpose()?;
        let redirect_uri = required_url("redirect uri", self.redirect_uri)?;
        let client_id = self
            .client_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| AuthError::Configuration("client id is missing".into()))?;
        let client_secret = self
            .client_secret
            .filter(|s| !s.is_empty())
            .map(ClientSecret::new)
            .ok_or_else(|| AuthError::Configuration("client secret is missing".into()))?;

        if let Some((name, _)) = self
            .extra_authorize_params
            .iter()
            .find(|(name, _)| RESERVED_AUTHORIZE_PARAMS.contains(&name.as_str()))
        {
            return Err(AuthError::Configuration(format!(
                "extra authorization parameter `{name}` would duplicate a standard one"
            )));
        }

        let mut scopes = self.scopes;
        if !scopes.iter().any(|s| s == "openid") {
            scopes.insert(0, "openid".to_string());
        }
        let mut checks = self.checks;
        checks.insert(Check::State);
        let token_strategy = match self.token_strategy {
            Some(strategy) => strategy,
            None => self.token_auth.unwrap_or(TokenEndpointAuth::ClientSecretPost).strategy(),
        };

        Ok(ProviderDescriptor {
            issuer: self.issuer,
            authorization_endpoint,
            token_endpoint,
            userinfo_endpoint,
            jwks_uri,
            client_id,
            client_secret,
            redirect_uri,
            scopes,
            checks,
            prompt: self.prompt,
            extra_authorize_params: self.extra_authorize_params,
            userinfo: self.userinfo,
            token_strategy,
            subject_fields: self.subject_fields,
            token_timeout: self.token_timeout,
            userinfo_timeout: self.userinfo_timeout,
            jwks_ttl: self.jwks_ttl,
            clock_leeway: self.clock_leeway,
            state_ttl: self.state_ttl,
        })
    }
}

fn parse_url(what: &str, raw: &str) -> Result<Url, AuthError> {
    Url::parse(raw).map_err(|e| AuthError::Configuration(format!("invalid {what} `{raw}`: {e}")))
}

fn required_url(what: &str, raw: Option<String>) -> Result<Url, AuthError> {
    let raw = raw.ok_or_else(|| AuthError::Configuration(format!("{what} is missing")))?;
    parse_url(what, &raw)
}
