//! Resolution tests: extraction plus orchestration.
//!
//! Every test goes manifest -> `workload::extract` -> `ImageResolver::resolve`
//! with in-memory secrets and a scripted registry.

use serde_json::Value;
use tag_resolver::credentials::StaticSecretLookup;
use tag_resolver::resolution::{ContainerOutcome, CredentialSource, JsonPatchOp, Resolution};
use tag_resolver::version::VersionResolver;
use tag_resolver::workload::{self, ExtractedWorkload};
use tag_resolver::ImageResolver;

use crate::common::fixtures::{
    WorkloadBuilder, docker_config_secret, legacy_docker_config_secret,
};
use crate::{CountingSecrets, FixedVersion, ScriptedRegistry, semver_resolver};

const PRIVATE_REPO: &str = "registry.example.com/team/app";

fn extracted(manifest: &Value) -> ExtractedWorkload {
    let kind = manifest["kind"].as_str().unwrap();
    workload::extract(kind, manifest).unwrap().unwrap()
}

async fn resolve_with<V: VersionResolver>(
    manifest: &Value,
    secrets: StaticSecretLookup,
    registry: ScriptedRegistry,
    versions: V,
) -> Resolution {
    ImageResolver::new(secrets, registry, versions)
        .resolve(&extracted(manifest))
        .await
}

fn replace(path: &str, value: &str) -> JsonPatchOp {
    JsonPatchOp {
        op: "replace".to_string(),
        path: path.to_string(),
        value: value.to_string(),
    }
}

// ============================================================================
// Workload kinds
// ============================================================================

#[tokio::test]
async fn test_pod_end_to_end() {
    let pod = WorkloadBuilder::new("Pod", "web")
        .container("app", "alpine:latest")
        .build();
    let registry = ScriptedRegistry::new().public("alpine", &["1.0"]);

    let resolution = resolve_with(&pod, StaticSecretLookup::new(), registry, FixedVersion("1.0")).await;

    assert_eq!(
        resolution.patches,
        vec![replace("/spec/containers/0/image", "alpine:1.0")]
    );
}

#[tokio::test]
async fn test_deployment_init_container_end_to_end() {
    let deployment = WorkloadBuilder::new("Deployment", "web")
        .init_container("init", "alpine:latest")
        .build();
    let registry = ScriptedRegistry::new().public("alpine", &["1.0"]);

    let resolution =
        resolve_with(&deployment, StaticSecretLookup::new(), registry, FixedVersion("1.0")).await;

    assert_eq!(
        resolution.patches,
        vec![replace(
            "/spec/template/spec/initContainers/0/image",
            "alpine:1.0"
        )]
    );
}

#[tokio::test]
async fn test_template_kinds_share_prefix() {
    for kind in [
        "ReplicationController",
        "Job",
        "ReplicaSet",
        "Deployment",
        "StatefulSet",
        "DaemonSet",
    ] {
        let manifest = WorkloadBuilder::new(kind, "web")
            .container("app", "alpine:latest")
            .build();
        let registry = ScriptedRegistry::new().public("alpine", &["1.0"]);

        let resolution =
            resolve_with(&manifest, StaticSecretLookup::new(), registry, FixedVersion("1.0")).await;
        assert_eq!(
            resolution.patches,
            vec![replace("/spec/template/spec/containers/0/image", "alpine:1.0")],
            "{kind}"
        );
    }
}

#[tokio::test]
async fn test_cron_job_paths() {
    let cron_job = WorkloadBuilder::new("CronJob", "nightly")
        .init_container("init", "busybox:~1.36.0")
        .container("backup", "alpine:~3.19.0")
        .build();
    let registry = ScriptedRegistry::new()
        .public("busybox", &["1.35.0", "1.36.0", "1.36.1"])
        .public("alpine", &["3.19.0", "3.19.4", "3.20.0"]);

    let resolution = semver_resolver(StaticSecretLookup::new(), registry)
        .resolve(&extracted(&cron_job))
        .await;

    assert_eq!(
        resolution.patches,
        vec![
            replace(
                "/spec/jobTemplate/spec/template/spec/initContainers/0/image",
                "busybox:1.36.1"
            ),
            replace(
                "/spec/jobTemplate/spec/template/spec/containers/0/image",
                "alpine:3.19.4"
            ),
        ]
    );
}

#[test]
fn test_service_yields_nothing() {
    let service = WorkloadBuilder::new("Service", "web").build();
    assert!(workload::extract("Service", &service).unwrap().is_none());
}

// ============================================================================
// Credential fallback
// ============================================================================

#[tokio::test]
async fn test_pull_secrets_tried_in_declared_order() {
    let deployment = WorkloadBuilder::new("Deployment", "web")
        .namespace("apps")
        .container("app", &format!("{PRIVATE_REPO}:^1.0.0"))
        .pull_secret("a")
        .pull_secret("b")
        .pull_secret("c")
        .build();
    let secrets = StaticSecretLookup::new()
        .with_secret(docker_config_secret("apps", "a", "registry.example.com", "alice", "pw"))
        .with_secret(docker_config_secret("apps", "b", "registry.example.com", "bob", "pw"))
        .with_secret(docker_config_secret("apps", "c", "registry.example.com", "carol", "pw"));
    let registry = ScriptedRegistry::new().private(PRIVATE_REPO, &["bob", "carol"], &["1.0.0", "1.4.2"]);

    let resolution = semver_resolver(secrets, registry.clone())
        .resolve(&extracted(&deployment))
        .await;

    assert_eq!(
        resolution.patches,
        vec![replace(
            "/spec/template/spec/containers/0/image",
            &format!("{PRIVATE_REPO}:1.4.2")
        )]
    );
    assert_eq!(registry.usernames_for(PRIVATE_REPO), vec!["", "alice", "bob"]);
    assert!(matches!(
        &resolution.report.containers()[0].outcome,
        ContainerOutcome::Resolved { source: CredentialSource::PullSecret(name), .. } if name == "b"
    ));
}

#[tokio::test]
async fn test_secret_for_other_registry_is_skipped() {
    let pod = WorkloadBuilder::new("Pod", "web")
        .namespace("apps")
        .container("app", &format!("{PRIVATE_REPO}:^1.0.0"))
        .pull_secret("quay")
        .pull_secret("legacy")
        .build();
    let secrets = StaticSecretLookup::new()
        .with_secret(docker_config_secret("apps", "quay", "quay.io", "q", "pw"))
        .with_secret(legacy_docker_config_secret(
            "apps",
            "legacy",
            "registry.example.com",
            "lee",
            "pw",
        ));
    let registry = ScriptedRegistry::new().private(PRIVATE_REPO, &["lee"], &["1.1.0"]);

    let resolution = semver_resolver(secrets, registry.clone())
        .resolve(&extracted(&pod))
        .await;

    assert_eq!(resolution.patches.len(), 1);
    // The quay.io secret never reaches the registry.
    assert_eq!(registry.usernames_for(PRIVATE_REPO), vec!["", "lee"]);
}

#[tokio::test]
async fn test_missing_secret_is_skipped() {
    let pod = WorkloadBuilder::new("Pod", "web")
        .namespace("apps")
        .container("app", &format!("{PRIVATE_REPO}:^1.0.0"))
        .pull_secret("deleted")
        .pull_secret("regcred")
        .build();
    let secrets = StaticSecretLookup::new().with_secret(docker_config_secret(
        "apps",
        "regcred",
        "registry.example.com",
        "robot",
        "pw",
    ));
    let registry = ScriptedRegistry::new().private(PRIVATE_REPO, &["robot"], &["1.0.0"]);

    let resolution = semver_resolver(secrets, registry).resolve(&extracted(&pod)).await;
    assert_eq!(
        resolution.patches,
        vec![replace(
            "/spec/containers/0/image",
            &format!("{PRIVATE_REPO}:1.0.0")
        )]
    );
}

#[tokio::test]
async fn test_workload_without_namespace_uses_default() {
    let pod = WorkloadBuilder::new("Pod", "web")
        .container("app", &format!("{PRIVATE_REPO}:^1.0.0"))
        .pull_secret("regcred")
        .build();
    let secrets = StaticSecretLookup::new().with_secret(docker_config_secret(
        "default",
        "regcred",
        "registry.example.com",
        "robot",
        "pw",
    ));
    let registry = ScriptedRegistry::new().private(PRIVATE_REPO, &["robot"], &["1.0.0"]);

    let resolution = semver_resolver(secrets, registry).resolve(&extracted(&pod)).await;
    assert_eq!(resolution.patches.len(), 1);
}

#[tokio::test]
async fn test_secrets_fetched_once_per_container_class() {
    let deployment = WorkloadBuilder::new("Deployment", "web")
        .namespace("apps")
        .init_container("migrate", &format!("{PRIVATE_REPO}:^1.0.0"))
        .container("app", &format!("{PRIVATE_REPO}:^1.0.0"))
        .container("worker", &format!("{PRIVATE_REPO}:^1.0.0"))
        .pull_secret("regcred")
        .build();
    let secrets = CountingSecrets::new(StaticSecretLookup::new().with_secret(
        docker_config_secret("apps", "regcred", "registry.example.com", "robot", "pw"),
    ));
    let registry = ScriptedRegistry::new().private(PRIVATE_REPO, &["robot"], &["1.0.0"]);

    let resolution = ImageResolver::new(secrets.clone(), registry, FixedVersion("1.0.0"))
        .resolve(&extracted(&deployment))
        .await;

    assert_eq!(resolution.patches.len(), 3);
    assert_eq!(secrets.lookups(), vec!["apps/regcred", "apps/regcred"]);
}

#[tokio::test]
async fn test_public_image_never_fetches_secrets() {
    let pod = WorkloadBuilder::new("Pod", "web")
        .namespace("apps")
        .container("app", "alpine:^3.0.0")
        .pull_secret("regcred")
        .build();
    let secrets = CountingSecrets::new(StaticSecretLookup::new());
    let registry = ScriptedRegistry::new().public("alpine", &["3.20.1"]);

    let resolution = ImageResolver::new(secrets.clone(), registry, FixedVersion("3.20.1"))
        .resolve(&extracted(&pod))
        .await;

    assert_eq!(resolution.patches.len(), 1);
    assert!(secrets.lookups().is_empty());
}

// ============================================================================
// Skip rules
// ============================================================================

#[tokio::test]
async fn test_malformed_images_skip_only_themselves() {
    let pod = WorkloadBuilder::new("Pod", "web")
        .container("no-tag", "alpine")
        .container("port", "localhost:5000/app:1.0")
        .container("ok", "alpine:latest")
        .build();
    let registry = ScriptedRegistry::new().public("alpine", &["1.0"]);

    let resolution =
        resolve_with(&pod, StaticSecretLookup::new(), registry, FixedVersion("1.0")).await;

    assert_eq!(
        resolution.patches,
        vec![replace("/spec/containers/2/image", "alpine:1.0")]
    );
    let outcomes: Vec<&str> = resolution
        .report
        .containers()
        .iter()
        .map(|c| c.outcome.label())
        .collect();
    assert_eq!(outcomes, vec!["malformed_image", "malformed_image", "resolved"]);
}

#[tokio::test]
async fn test_unlistable_image_is_left_alone() {
    let pod = WorkloadBuilder::new("Pod", "web")
        .namespace("apps")
        .container("private", &format!("{PRIVATE_REPO}:^1.0.0"))
        .container("public", "alpine:^3.0.0")
        .pull_secret("regcred")
        .build();
    let secrets = StaticSecretLookup::new().with_secret(docker_config_secret(
        "apps",
        "regcred",
        "registry.example.com",
        "wrong",
        "pw",
    ));
    let registry = ScriptedRegistry::new()
        .private(PRIVATE_REPO, &["robot"], &["1.0.0"])
        .public("alpine", &["3.19.0", "3.20.1"]);

    let resolution = semver_resolver(secrets, registry).resolve(&extracted(&pod)).await;

    assert_eq!(
        resolution.patches,
        vec![replace("/spec/containers/1/image", "alpine:3.20.1")]
    );
    assert_eq!(
        resolution.report.containers()[0].outcome,
        ContainerOutcome::NoTags { attempts: 2 }
    );
}

#[tokio::test]
async fn test_nothing_resolvable_yields_empty_patch_list() {
    let pod = WorkloadBuilder::new("Pod", "web")
        .container("app", "unknown/app:^1.0.0")
        .build();

    let resolution = semver_resolver(StaticSecretLookup::new(), ScriptedRegistry::new())
        .resolve(&extracted(&pod))
        .await;
    assert!(resolution.patches.is_empty());
    assert_eq!(resolution.report.skipped(), 1);
}

// ============================================================================
// Version selection through the pipeline
// ============================================================================

#[tokio::test]
async fn test_highest_satisfying_tag_keeps_registry_spelling() {
    let pod = WorkloadBuilder::new("Pod", "web")
        .container("app", "nginx:^1.25.0")
        .build();
    let registry = ScriptedRegistry::new().public(
        "nginx",
        &["1.24.0", "v1.25.3", "1.25.1", "1.26.0-rc.1", "2.0.0", "stable", "latest"],
    );

    let resolution = semver_resolver(StaticSecretLookup::new(), registry)
        .resolve(&extracted(&pod))
        .await;
    assert_eq!(resolution.patches[0].value, "nginx:v1.25.3");
}

#[tokio::test]
async fn test_unsatisfied_constraint_is_written_back() {
    let pod = WorkloadBuilder::new("Pod", "web")
        .container("app", "alpine:^0.5.0")
        .build();
    let registry = ScriptedRegistry::new().public("alpine", &["0.1", "0.4.9"]);

    let resolution = semver_resolver(StaticSecretLookup::new(), registry)
        .resolve(&extracted(&pod))
        .await;

    assert_eq!(resolution.patches[0].value, "alpine:^0.5.0");
    assert!(matches!(
        resolution.report.containers()[0].outcome,
        ContainerOutcome::Resolved {
            constraint_kept: true,
            ..
        }
    ));
}
