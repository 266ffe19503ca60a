//! Authentication challenges advertised by a registry ping.

use http_auth::ChallengeRef;
use http_auth::parser::ChallengeParser;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, WWW_AUTHENTICATE};

use super::error::RegistryError;

/// Header a v2 registry uses to announce its API version.
pub const API_VERSION_HEADER: &str = "Docker-Distribution-Api-Version";
const V2_API_VERSION: &str = "registry/2.0";

/// One authentication scheme offered by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Challenge {
    /// HTTP basic authentication.
    Basic,
    /// Token authentication against `realm`.
    Bearer {
        realm: String,
        service: Option<String>,
    },
}

impl Challenge {
    fn from_ref(challenge: &ChallengeRef<'_>) -> Result<Option<Self>, RegistryError> {
        if challenge.scheme.eq_ignore_ascii_case("Basic") {
            return Ok(Some(Challenge::Basic));
        }
        if !challenge.scheme.eq_ignore_ascii_case("Bearer") {
            return Ok(None);
        }

        let mut realm = None;
        let mut service = None;
        for (key, value) in &challenge.params {
            if key.eq_ignore_ascii_case("realm") {
                realm = Some(value.to_unescaped());
            } else if key.eq_ignore_ascii_case("service") {
                service = Some(value.to_unescaped());
            }
        }

        let realm = realm.ok_or_else(|| {
            RegistryError::PingResponse("bearer challenge without realm".to_string())
        })?;
        Ok(Some(Challenge::Bearer { realm, service }))
    }
}

/// What the unauthenticated `GET /v2/` told us.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChallengeContext {
    challenges: Vec<Challenge>,
    v2_confirmed: bool,
}

impl ChallengeContext {
    /// Build a context from a ping response.
    ///
    /// Challenges are only read from `401 Unauthorized` responses. Schemes
    /// other than Basic and Bearer are ignored.
    pub fn from_response(status: StatusCode, headers: &HeaderMap) -> Result<Self, RegistryError> {
        let v2_confirmed = headers
            .get_all(API_VERSION_HEADER)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .any(|version| version.trim() == V2_API_VERSION);

        let mut challenges = Vec::new();
        if status == StatusCode::UNAUTHORIZED {
            for header in headers.get_all(WWW_AUTHENTICATE) {
                let text = header.to_str().map_err(|e| {
                    RegistryError::PingResponse(format!("unreadable challenge header: {e}"))
                })?;
                for parsed in ChallengeParser::new(text) {
                    let challenge = parsed.map_err(|e| {
                        RegistryError::PingResponse(format!("malformed challenge {text:?}: {e:?}"))
                    })?;
                    if let Some(challenge) = Challenge::from_ref(&challenge)? {
                        challenges.push(challenge);
                    }
                }
            }
        }

        Ok(Self {
            challenges,
            v2_confirmed,
        })
    }

    /// Whether the version header confirmed the v2 protocol.
    pub fn v2_confirmed(&self) -> bool {
        self.v2_confirmed
    }

    /// The first bearer challenge, if any.
    pub fn bearer(&self) -> Option<(&str, Option<&str>)> {
        self.challenges.iter().find_map(|c| match c {
            Challenge::Bearer { realm, service } => Some((realm.as_str(), service.as_deref())),
            Challenge::Basic => None,
        })
    }

    /// Whether basic authentication was offered.
    pub fn offers_basic(&self) -> bool {
        self.challenges.contains(&Challenge::Basic)
    }

    pub fn challenges(&self) -> &[Challenge] {
        &self.challenges
    }
}
