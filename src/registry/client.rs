//! Tag listing over the registry v2 protocol.
//!
//! One call performs the full handshake: an unauthenticated ping of
//! `/v2/`, negotiation of the advertised challenge, then the paginated
//! `GET /v2/<name>/tags/list`.

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use reqwest::header::LINK;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use tracing::{debug, instrument};

use super::auth::{Authorizer, Credential};
use super::challenge::ChallengeContext;
use super::error::RegistryError;
use super::reference::ImageName;

/// Default timeout for the unauthenticated ping.
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(15);
/// Default overall timeout for negotiating and listing tags.
pub const DEFAULT_LIST_TIMEOUT: Duration = Duration::from_secs(5 * 60);
/// User agent presented to registries.
pub const USER_AGENT: &str = concat!("tag-resolver/", env!("CARGO_PKG_VERSION"));

/// Lists the tags of a repository.
pub trait TagLister: Send + Sync {
    /// List every tag of `repository`, authenticating with `credential`
    /// (anonymous when `None`).
    fn list_tags(
        &self,
        credential: Option<&Credential>,
        repository: &str,
    ) -> impl Future<Output = Result<Vec<String>, RegistryError>> + Send;
}

/// Configuration for [`RegistryClient`].
#[derive(Clone, Debug)]
pub struct RegistryClientConfig {
    /// Timeout of the `/v2/` ping.
    pub ping_timeout: Duration,
    /// Overall timeout of token negotiation plus tag listing.
    pub list_timeout: Duration,
    /// Registry hosts contacted over plain HTTP instead of HTTPS.
    pub plain_http_hosts: Vec<String>,
    /// `User-Agent` header value.
    pub user_agent: String,
}

impl Default for RegistryClientConfig {
    fn default() -> Self {
        Self {
            ping_timeout: DEFAULT_PING_TIMEOUT,
            list_timeout: DEFAULT_LIST_TIMEOUT,
            plain_http_hosts: Vec::new(),
            user_agent: USER_AGENT.to_string(),
        }
    }
}

impl RegistryClientConfig {
    /// Set the ping timeout.
    pub fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self
    }

    /// Set the overall listing timeout.
    pub fn with_list_timeout(mut self, timeout: Duration) -> Self {
        self.list_timeout = timeout;
        self
    }

    /// Contact `host` over plain HTTP.
    pub fn with_plain_http_host(mut self, host: impl Into<String>) -> Self {
        self.plain_http_hosts.push(host.into());
        self
    }

    fn scheme_for(&self, host: &str) -> &'static str {
        if self.plain_http_hosts.iter().any(|h| h == host) {
            "http"
        } else {
            "https"
        }
    }
}

#[derive(Deserialize)]
struct TagPage {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

/// Registry v2 client that lists tags for a single repository per call.
#[derive(Clone, Debug)]
pub struct RegistryClient {
    http: reqwest::Client,
    config: RegistryClientConfig,
}

impl RegistryClient {
    /// Build a client from configuration.
    pub fn new(config: RegistryClientConfig) -> Result<Self, RegistryError> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { http, config })
    }

    /// List all tags of `repository`.
    #[instrument(skip(self, credential), fields(anonymous = credential.is_none_or(Credential::is_anonymous)))]
    pub async fn tags(
        &self,
        credential: Option<&Credential>,
        repository: &str,
    ) -> Result<Vec<String>, RegistryError> {
        let name = ImageName::parse_normalized(repository)?;
        let host = name.api_host()?;
        let base = format!("{}://{}", self.config.scheme_for(host), host);

        let challenges = self.ping(&base).await?;

        let anonymous = Credential::anonymous();
        let credential = credential.unwrap_or(&anonymous);
        let scope = format!("repository:{}:pull", name.path());

        let listing = async {
            let authorizer =
                Authorizer::negotiate(&self.http, &challenges, credential, &scope).await?;
            debug!(?authorizer, "Negotiated registry authorization");
            self.list_all(&base, &name, &authorizer).await
        };

        tokio::time::timeout(self.config.list_timeout, listing)
            .await
            .map_err(|_| RegistryError::Timeout {
                operation: format!("list tags of {name}"),
                duration: self.config.list_timeout,
            })?
    }

    /// Unauthenticated `GET /v2/`.
    async fn ping(&self, base: &str) -> Result<ChallengeContext, RegistryError> {
        let url = format!("{base}/v2/");
        let response = self
            .http
            .get(&url)
            .timeout(self.config.ping_timeout)
            .send()
            .await?;

        let challenges = ChallengeContext::from_response(response.status(), response.headers())?;
        debug!(
            url = %url,
            status = %response.status(),
            v2 = challenges.v2_confirmed(),
            challenges = challenges.challenges().len(),
            "Pinged registry"
        );
        Ok(challenges)
    }

    /// Follow `Link: <...>; rel="next"` until the listing is exhausted.
    async fn list_all(
        &self,
        base: &str,
        name: &ImageName,
        authorizer: &Authorizer,
    ) -> Result<Vec<String>, RegistryError> {
        let base_url = Url::parse(base).map_err(|e| RegistryError::InvalidUrl(e.to_string()))?;
        let mut next = Some(
            base_url
                .join(&format!("/v2/{}/tags/list", name.path()))
                .map_err(|e| RegistryError::InvalidUrl(e.to_string()))?,
        );

        let mut tags = Vec::new();
        let mut visited = HashSet::new();
        while let Some(url) = next.take() {
            if !visited.insert(url.clone()) {
                return Err(RegistryError::PaginationLoop {
                    url: url.to_string(),
                });
            }
            let response = authorizer.apply(self.http.get(url.clone())).send().await?;
            let status = response.status();

            match status {
                s if s.is_success() => {}
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    return Err(RegistryError::Unauthorized {
                        url: url.to_string(),
                        status,
                    });
                }
                _ => {
                    return Err(RegistryError::UnexpectedStatus {
                        url: url.to_string(),
                        status,
                    });
                }
            }

            next = next_page(&url, response.headers().get_all(LINK).iter())?;

            let body = response.bytes().await?;
            let page: TagPage = serde_json::from_slice(&body)?;
            tags.extend(page.tags.unwrap_or_default());
        }

        debug!(repository = %name, pages = visited.len(), tags = tags.len(), "Listed tags");
        Ok(tags)
    }
}

impl TagLister for RegistryClient {
    async fn list_tags(
        &self,
        credential: Option<&Credential>,
        repository: &str,
    ) -> Result<Vec<String>, RegistryError> {
        self.tags(credential, repository).await
    }
}

/// Extract the `rel="next"` target from `Link` headers, resolved against `current`.
fn next_page<'a>(
    current: &Url,
    links: impl Iterator<Item = &'a reqwest::header::HeaderValue>,
) -> Result<Option<Url>, RegistryError> {
    for value in links {
        let Ok(value) = value.to_str() else {
            continue;
        };
        for link in value.split(',') {
            let mut parts = link.split(';');
            let target = parts.next().map(str::trim).unwrap_or_default();
            let is_next = parts.any(|param| {
                let param = param.trim().replace(' ', "");
                param.eq_ignore_ascii_case("rel=\"next\"") || param.eq_ignore_ascii_case("rel=next")
            });
            if !is_next {
                continue;
            }
            let Some(target) = target.strip_prefix('<').and_then(|t| t.strip_suffix('>')) else {
                continue;
            };
            return current
                .join(target)
                .map(Some)
                .map_err(|e| RegistryError::InvalidUrl(e.to_string()));
        }
    }
    Ok(None)
}
