//! Registry credentials stored in image pull secrets.
//!
//! Two encodings are recognised:
//!
//! - `.dockerconfigjson`: `{"auths": {"<registry>": {"auth": "<base64 user:pass>"}}}`
//! - `.dockercfg` (legacy): `{"<registry>": {"auth": "<base64 user:pass>"}}`
//!
//! When both keys are present `.dockerconfigjson` wins.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use k8s_openapi::api::core::v1::Secret;
use serde::Deserialize;
use thiserror::Error;

use crate::registry::Credential;
use crate::registry::reference::{ImageName, ReferenceError, normalize_registry_key};

/// Secret data key of the current docker config format.
pub const DOCKER_CONFIG_JSON_KEY: &str = ".dockerconfigjson";
/// Secret data key of the legacy docker config format.
pub const DOCKER_CONFIG_KEY: &str = ".dockercfg";

/// Errors from decoding registry credentials out of a secret.
#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("no docker config found in secret")]
    MissingDockerConfig,

    #[error("malformed docker config: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("registry domain: {0} does not exist")]
    UnknownRegistry(String),

    #[error("auth field is not valid base64: {0}")]
    InvalidAuthEncoding(#[from] base64::DecodeError),

    #[error("auth field should equal basic auth syntax")]
    InvalidAuthFormat,

    #[error("invalid image: {0}")]
    Reference(#[from] ReferenceError),
}

#[derive(Deserialize, Debug, Clone, Default)]
struct RegistryAuthEntry {
    #[serde(default)]
    auth: String,
}

#[derive(Deserialize)]
struct RegistryConfigs {
    #[serde(default)]
    auths: BTreeMap<String, RegistryAuthEntry>,
}

/// Registry domain to auth blob mapping decoded from one secret.
#[derive(Debug, Clone, Default)]
pub struct DockerConfig {
    auths: BTreeMap<String, RegistryAuthEntry>,
}

impl DockerConfig {
    /// Decode the docker config carried by `secret`.
    pub fn from_secret(secret: &Secret) -> Result<Self, CredentialError> {
        let data = secret.data.as_ref();
        let lookup = |key: &str| data.and_then(|d| d.get(key)).map(|bytes| bytes.0.as_slice());

        if let Some(raw) = lookup(DOCKER_CONFIG_JSON_KEY) {
            let configs: RegistryConfigs = serde_json::from_slice(raw)?;
            return Ok(Self {
                auths: configs.auths,
            });
        }

        if let Some(raw) = lookup(DOCKER_CONFIG_KEY) {
            let auths: BTreeMap<String, RegistryAuthEntry> = serde_json::from_slice(raw)?;
            return Ok(Self { auths });
        }

        Err(CredentialError::MissingDockerConfig)
    }

    /// Credential for `domain`.
    ///
    /// The exact key is preferred; otherwise keys written the way the docker
    /// CLI writes them (`https://index.docker.io/v1/`) are matched after
    /// normalization.
    pub fn credential_for(&self, domain: &str) -> Result<Credential, CredentialError> {
        let entry = self
            .auths
            .get(domain)
            .or_else(|| {
                self.auths
                    .iter()
                    .find(|(key, _)| normalize_registry_key(key) == domain)
                    .map(|(_, entry)| entry)
            })
            .ok_or_else(|| CredentialError::UnknownRegistry(domain.to_string()))?;

        decode_auth(&entry.auth)
    }
}

/// Decode a base64 `user:pass` blob.
pub fn decode_auth(auth: &str) -> Result<Credential, CredentialError> {
    let decoded = STANDARD.decode(auth.trim())?;
    let text = String::from_utf8_lossy(&decoded);

    let mut parts = text.split(':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(username), Some(password), None) => Ok(Credential::new(username, password)),
        _ => Err(CredentialError::InvalidAuthFormat),
    }
}

/// Decode the credential `secret` holds for the registry serving `repository`.
pub fn credential_from_secret(
    secret: &Secret,
    repository: &str,
) -> Result<Credential, CredentialError> {
    let config = DockerConfig::from_secret(secret)?;
    let name = ImageName::parse_normalized(repository)?;
    config.credential_for(name.domain())
}
