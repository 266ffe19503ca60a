//! Namespaced secret lookup.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use thiserror::Error;

/// Errors from fetching a secret.
#[derive(Error, Debug)]
pub enum SecretLookupError {
    #[error("Secret {namespace}/{name} not found")]
    NotFound { namespace: String, name: String },

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
}

impl SecretLookupError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, SecretLookupError::NotFound { .. })
    }
}

/// Fetches a secret by namespace and name.
///
/// Implementations are shared across concurrent admission requests.
pub trait SecretLookup: Send + Sync {
    fn get(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<Secret, SecretLookupError>> + Send;
}

/// Secret lookup backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeSecretLookup {
    client: Client,
}

impl KubeSecretLookup {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl SecretLookup for KubeSecretLookup {
    async fn get(&self, namespace: &str, name: &str) -> Result<Secret, SecretLookupError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(secret) => Ok(secret),
            Err(kube::Error::Api(e)) if e.code == 404 => Err(SecretLookupError::NotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            }),
            Err(e) => Err(SecretLookupError::Kube(e)),
        }
    }
}

/// In-memory secret store keyed by `(namespace, name)`.
///
/// Drives the resolver without an API server; the test suites build their
/// pull secrets into one.
#[derive(Clone, Default)]
pub struct StaticSecretLookup {
    secrets: Arc<RwLock<BTreeMap<(String, String), Secret>>>,
}

impl StaticSecretLookup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a secret under its own namespace (or `default`) and name.
    pub fn insert(&self, secret: Secret) {
        let namespace = secret
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| super::DEFAULT_NAMESPACE.to_string());
        let name = secret.metadata.name.clone().unwrap_or_default();
        if let Ok(mut secrets) = self.secrets.write() {
            secrets.insert((namespace, name), secret);
        }
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with_secret(self, secret: Secret) -> Self {
        self.insert(secret);
        self
    }
}

impl SecretLookup for StaticSecretLookup {
    async fn get(&self, namespace: &str, name: &str) -> Result<Secret, SecretLookupError> {
        let found = self
            .secrets
            .read()
            .ok()
            .and_then(|secrets| {
                secrets
                    .get(&(namespace.to_string(), name.to_string()))
                    .cloned()
            });
        found.ok_or_else(|| SecretLookupError::NotFound {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    }
}
