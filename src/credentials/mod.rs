//! Pull-secret credentials.
//!
//! Secrets are fetched best-effort: missing ones are skipped quietly, other
//! lookup failures are logged and skipped, and whatever succeeded is
//! returned in the order the workload listed them.

pub mod docker_config;
pub mod secrets;

use k8s_openapi::api::core::v1::Secret;
use tracing::{debug, instrument, warn};

use crate::registry::Credential;
use crate::workload::PullSecretRef;

pub use docker_config::{CredentialError, DockerConfig, credential_from_secret};
pub use secrets::{KubeSecretLookup, SecretLookup, SecretLookupError, StaticSecretLookup};

/// Namespace used when a workload does not carry one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// A fetched pull secret, decoded on demand per repository.
#[derive(Debug, Clone)]
pub struct PullSecret {
    name: String,
    secret: Secret,
}

impl PullSecret {
    pub fn new(name: impl Into<String>, secret: Secret) -> Self {
        Self {
            name: name.into(),
            secret,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Decode the credential this secret holds for `repository`'s registry.
    pub fn credential_for(&self, repository: &str) -> Result<Credential, CredentialError> {
        credential_from_secret(&self.secret, repository)
    }
}

/// Fetches a workload's pull secrets through a [`SecretLookup`].
#[derive(Clone)]
pub struct CredentialResolver<S> {
    secrets: S,
}

impl<S: SecretLookup> CredentialResolver<S> {
    pub fn new(secrets: S) -> Self {
        Self { secrets }
    }

    /// Fetch every referenced secret from `namespace` (`default` when empty).
    #[instrument(skip(self, refs), fields(count = refs.len()))]
    pub async fn fetch(&self, refs: &[PullSecretRef], namespace: &str) -> Vec<PullSecret> {
        let namespace = if namespace.is_empty() {
            DEFAULT_NAMESPACE
        } else {
            namespace
        };

        let mut fetched = Vec::with_capacity(refs.len());
        for pull_secret in refs {
            match self.secrets.get(namespace, &pull_secret.name).await {
                Ok(secret) => fetched.push(PullSecret::new(pull_secret.name.clone(), secret)),
                Err(e) if e.is_not_found() => {
                    debug!(secret = %pull_secret.name, namespace, "Pull secret not found, skipping");
                }
                Err(e) => {
                    warn!(secret = %pull_secret.name, namespace, error = %e, "Failed to fetch pull secret");
                }
            }
        }
        fetched
    }
}
