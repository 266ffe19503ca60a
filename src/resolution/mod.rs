//! Per-workload image resolution.
//!
//! For every init container and then every regular container, the image tag
//! is treated as a version constraint and resolved against the tags the
//! registry offers. Listing is attempted anonymously first, then with each
//! pull secret of the workload in declared order; the first listing that
//! succeeds wins. A container that cannot be listed is left untouched.

pub mod patch;
pub mod report;

use tracing::{debug, info, instrument, warn};

use crate::credentials::{CredentialResolver, PullSecret, SecretLookup};
use crate::registry::{TagLister, split_image};
use crate::version::VersionResolver;
use crate::workload::{ContainerClass, ExtractedWorkload, PullSecretRef};

pub use patch::{JsonPatchOp, to_json_patch};
pub use report::{ContainerOutcome, ContainerReport, CredentialSource, ResolutionReport};

/// Patches for one workload plus what happened to each container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    pub patches: Vec<JsonPatchOp>,
    pub report: ResolutionReport,
}

/// Composes secret lookup, tag listing and version selection.
///
/// Holds no per-request state, so one instance serves concurrent requests.
pub struct ImageResolver<S, L, V> {
    credentials: CredentialResolver<S>,
    registry: L,
    versions: V,
}

/// Pull secrets of one container class, fetched on first need.
struct SecretCache<'a> {
    refs: &'a [PullSecretRef],
    namespace: &'a str,
    fetched: Option<Vec<PullSecret>>,
}

impl<S, L, V> ImageResolver<S, L, V>
where
    S: SecretLookup,
    L: TagLister,
    V: VersionResolver,
{
    pub fn new(secrets: S, registry: L, versions: V) -> Self {
        Self {
            credentials: CredentialResolver::new(secrets),
            registry,
            versions,
        }
    }

    /// Resolve every container of `workload`.
    ///
    /// Never fails: containers that cannot be resolved are reported and
    /// skipped.
    #[instrument(skip_all, fields(spec_path = workload.spec_path, namespace = %workload.namespace))]
    pub async fn resolve(&self, workload: &ExtractedWorkload) -> Resolution {
        let mut resolution = Resolution::default();

        for class in ContainerClass::ALL {
            let mut secrets = SecretCache {
                refs: &workload.spec.image_pull_secrets,
                namespace: &workload.namespace,
                fetched: None,
            };

            for (index, container) in workload.spec.containers_of(class).iter().enumerate() {
                let (patch, outcome) = self
                    .resolve_container(workload.spec_path, class, index, &container.image, &mut secrets)
                    .await;
                resolution.patches.extend(patch);
                resolution.report.push(ContainerReport {
                    class,
                    index,
                    image: container.image.clone(),
                    outcome,
                });
            }
        }

        debug!(
            resolved = resolution.report.resolved(),
            skipped = resolution.report.skipped(),
            "Resolved workload images"
        );
        resolution
    }

    async fn resolve_container(
        &self,
        spec_path: &str,
        class: ContainerClass,
        index: usize,
        image: &str,
        secrets: &mut SecretCache<'_>,
    ) -> (Option<JsonPatchOp>, ContainerOutcome) {
        let (repository, constraint) = match split_image(image) {
            Ok(parts) => parts,
            Err(e) => {
                warn!(container_class = %class, index, image, error = %e, "Skipping container with malformed image");
                return (
                    None,
                    ContainerOutcome::MalformedImage {
                        reason: e.to_string(),
                    },
                );
            }
        };

        let (tags, source) = match self.list_tags(repository, secrets).await {
            Ok(listed) => listed,
            Err(attempts) => {
                warn!(container_class = %class, index, image, attempts, "No tag list obtained, leaving image unchanged");
                return (None, ContainerOutcome::NoTags { attempts });
            }
        };

        let tag = self.versions.resolve(constraint, &tags);
        let constraint_kept = !tags.contains(&tag);
        if constraint_kept {
            debug!(image, tags = tags.len(), "No listed tag satisfies the constraint, keeping it as the tag");
        }

        let patch = JsonPatchOp::replace_image(spec_path, class, index, repository, &tag);
        info!(container_class = %class, index, image, resolved = %patch.value, %source, "Resolved image");
        (
            Some(patch),
            ContainerOutcome::Resolved {
                tag,
                source,
                constraint_kept,
            },
        )
    }

    /// First successful listing, anonymous before pull secrets.
    ///
    /// On failure returns the number of attempts made.
    async fn list_tags(
        &self,
        repository: &str,
        secrets: &mut SecretCache<'_>,
    ) -> Result<(Vec<String>, CredentialSource), usize> {
        match self.registry.list_tags(None, repository).await {
            Ok(tags) => return Ok((tags, CredentialSource::Anonymous)),
            Err(e) => {
                debug!(repository, error = %e, kind = e.kind(), "Anonymous listing failed");
            }
        }
        let mut attempts = 1;

        if secrets.fetched.is_none() {
            secrets.fetched = Some(self.credentials.fetch(secrets.refs, secrets.namespace).await);
        }
        let fetched: &[PullSecret] = secrets.fetched.as_deref().unwrap_or_default();

        for pull_secret in fetched {
            let credential = match pull_secret.credential_for(repository) {
                Ok(credential) => credential,
                Err(e) => {
                    debug!(repository, secret = pull_secret.name(), error = %e, "Pull secret has no usable credential");
                    continue;
                }
            };

            attempts += 1;
            match self.registry.list_tags(Some(&credential), repository).await {
                Ok(tags) => {
                    return Ok((tags, CredentialSource::PullSecret(pull_secret.name().to_string())));
                }
                Err(e) => {
                    debug!(repository, secret = pull_secret.name(), error = %e, kind = e.kind(), "Listing with pull secret failed");
                }
            }
        }

        Err(attempts)
    }
}
