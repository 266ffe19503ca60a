//! Image reference splitting and normalization.
//!
//! Names follow the docker "normalized named" rules: a missing domain means
//! Docker Hub, single-component Docker Hub names live under `library/`, and
//! the first path component is only a domain when it looks like one
//! (contains `.` or `:`, or is `localhost`).

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

/// Canonical Docker Hub domain.
pub const DEFAULT_DOMAIN: &str = "docker.io";
/// Legacy Docker Hub domain, rewritten to [`DEFAULT_DOMAIN`].
pub const LEGACY_DEFAULT_DOMAIN: &str = "index.docker.io";
/// Host that serves the registry API for Docker Hub.
pub const DOCKER_HUB_API_HOST: &str = "registry-1.docker.io";

const OFFICIAL_REPO_PREFIX: &str = "library/";

/// Errors from splitting or normalizing an image reference.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReferenceError {
    #[error("image can't be empty")]
    Empty,

    #[error("invalid image format: {0}")]
    InvalidFormat(String),

    #[error("repository name must be lowercase: {0}")]
    Uppercase(String),

    #[error("invalid reference format: {0}")]
    InvalidName(String),

    #[error("missing domain from image name: {0}")]
    MissingDomain(String),
}

static DOMAIN_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"^(?:[a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9])(?:\.(?:[a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9]))*(?::[0-9]+)?$",
    )
    .ok()
});

static PATH_COMPONENT_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*$").ok());

/// Split `repository:tag` into its two halves.
///
/// Exactly one `:` is required. References that carry a registry port
/// (`host:5000/app:1.0`) or no tag at all are rejected.
pub fn split_image(image: &str) -> Result<(&str, &str), ReferenceError> {
    if image.is_empty() {
        return Err(ReferenceError::Empty);
    }
    let mut parts = image.split(':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(repository), Some(tag), None) => Ok((repository, tag)),
        _ => Err(ReferenceError::InvalidFormat(image.to_string())),
    }
}

/// A normalized repository name: registry domain plus repository path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageName {
    domain: String,
    path: String,
}

impl ImageName {
    /// Parse and normalize a repository name (no tag or digest).
    pub fn parse_normalized(name: &str) -> Result<Self, ReferenceError> {
        if name.is_empty() {
            return Err(ReferenceError::Empty);
        }
        if name.chars().any(|c| c.is_ascii_uppercase()) && !Self::has_explicit_domain(name) {
            return Err(ReferenceError::Uppercase(name.to_string()));
        }

        let (mut domain, mut path) = match name.split_once('/') {
            Some((first, rest)) if Self::looks_like_domain(first) => {
                (first.to_string(), rest.to_string())
            }
            _ => (DEFAULT_DOMAIN.to_string(), name.to_string()),
        };

        if domain == LEGACY_DEFAULT_DOMAIN {
            domain = DEFAULT_DOMAIN.to_string();
        }
        if domain == DEFAULT_DOMAIN && !path.contains('/') {
            path = format!("{OFFICIAL_REPO_PREFIX}{path}");
        }

        Self::validate(name, &domain, &path)?;
        Ok(Self { domain, path })
    }

    fn looks_like_domain(component: &str) -> bool {
        component.contains('.') || component.contains(':') || component == "localhost"
    }

    fn has_explicit_domain(name: &str) -> bool {
        match name.split_once('/') {
            Some((first, rest)) => {
                Self::looks_like_domain(first) && !rest.chars().any(|c| c.is_ascii_uppercase())
            }
            None => false,
        }
    }

    fn validate(name: &str, domain: &str, path: &str) -> Result<(), ReferenceError> {
        let invalid = || ReferenceError::InvalidName(name.to_string());

        let domain_ok = DOMAIN_RE.as_ref().is_some_and(|re| re.is_match(domain));
        if !domain_ok {
            return Err(invalid());
        }

        let component_re = PATH_COMPONENT_RE.as_ref().ok_or_else(invalid)?;
        if path.split('/').any(|component| !component_re.is_match(component)) {
            return Err(invalid());
        }
        Ok(())
    }

    /// Registry domain, e.g. `docker.io` or `ghcr.io`.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Repository path within the registry, e.g. `library/alpine`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Host serving the registry API for this repository.
    pub fn api_host(&self) -> Result<&str, ReferenceError> {
        match self.domain.as_str() {
            "" => Err(ReferenceError::MissingDomain(self.path.clone())),
            DEFAULT_DOMAIN => Ok(DOCKER_HUB_API_HOST),
            domain => Ok(domain),
        }
    }
}

impl fmt::Display for ImageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.domain, self.path)
    }
}

/// Normalize a registry key as written in docker config files.
///
/// Strips scheme and path (`https://index.docker.io/v1/` becomes
/// `index.docker.io`) and folds the legacy Docker Hub domain.
pub fn normalize_registry_key(key: &str) -> &str {
    let without_scheme = key
        .strip_prefix("https://")
        .or_else(|| key.strip_prefix("http://"))
        .unwrap_or(key);
    let host = without_scheme
        .split_once('/')
        .map_or(without_scheme, |(host, _)| host);
    if host == LEGACY_DEFAULT_DOMAIN {
        DEFAULT_DOMAIN
    } else {
        host
    }
}
