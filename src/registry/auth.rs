//! Request authorization for registry calls.

use std::fmt;

use reqwest::RequestBuilder;
use serde::Deserialize;
use tracing::debug;

use super::challenge::ChallengeContext;
use super::error::RegistryError;

/// Registry credentials. Empty username and password mean anonymous access.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// The anonymous identity.
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_empty() && self.password.is_empty()
    }
}

// Keep passwords out of logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

/// How requests to the registry get authorized.
#[derive(Clone, PartialEq, Eq)]
pub enum Authorizer {
    Anonymous,
    Basic { username: String, password: String },
    Bearer(String),
}

impl fmt::Debug for Authorizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Authorizer::Anonymous => f.write_str("Anonymous"),
            Authorizer::Basic { username, .. } => write!(f, "Basic({username})"),
            Authorizer::Bearer(_) => f.write_str("Bearer(<token>)"),
        }
    }
}

impl Authorizer {
    /// Negotiate an authorizer for the challenges a ping returned.
    ///
    /// A bearer challenge wins over basic: a token scoped to `scope` is
    /// fetched from the challenge realm, presenting `credential` unless it is
    /// anonymous. A basic challenge attaches the credential to every request.
    pub async fn negotiate(
        http: &reqwest::Client,
        challenges: &ChallengeContext,
        credential: &Credential,
        scope: &str,
    ) -> Result<Self, RegistryError> {
        if let Some((realm, service)) = challenges.bearer() {
            let token = fetch_token(http, realm, service, credential, scope).await?;
            return Ok(Authorizer::Bearer(token));
        }

        if challenges.offers_basic() && !credential.is_anonymous() {
            return Ok(Authorizer::Basic {
                username: credential.username.clone(),
                password: credential.password.clone(),
            });
        }

        Ok(Authorizer::Anonymous)
    }

    /// Attach authorization to an outgoing request.
    pub fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        match self {
            Authorizer::Anonymous => request,
            Authorizer::Basic { username, password } => request.basic_auth(username, Some(password)),
            Authorizer::Bearer(token) => request.bearer_auth(token),
        }
    }
}

async fn fetch_token(
    http: &reqwest::Client,
    realm: &str,
    service: Option<&str>,
    credential: &Credential,
    scope: &str,
) -> Result<String, RegistryError> {
    let mut query = vec![("scope", scope)];
    if let Some(service) = service {
        query.push(("service", service));
    }

    debug!(realm, ?service, scope, anonymous = credential.is_anonymous(), "Requesting registry token");

    let mut request = http.get(realm).query(&query);
    if !credential.is_anonymous() {
        request = request.basic_auth(&credential.username, Some(&credential.password));
    }

    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(RegistryError::TokenRequest {
            realm: realm.to_string(),
            status,
            body,
        });
    }

    let body = response.bytes().await?;
    let token: TokenResponse =
        serde_json::from_slice(&body).map_err(|e| RegistryError::TokenDecode(e.to_string()))?;

    token
        .token
        .filter(|t| !t.is_empty())
        .or(token.access_token.filter(|t| !t.is_empty()))
        .ok_or_else(|| {
            RegistryError::TokenDecode("authorization server did not include a token".to_string())
        })
}
