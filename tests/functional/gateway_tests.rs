//! Gateway tests: AdmissionReview in, AdmissionReview out through the router.

use std::sync::Arc;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use kube::core::DynamicObject;
use serde_json::{Value, json};
use tag_resolver::HealthState;
use tag_resolver::credentials::StaticSecretLookup;
use tag_resolver::version::SemverResolver;
use tag_resolver::webhooks::{AdmissionReview, DECODE_FAILURE_BODY};
use tag_resolver::{ImageResolver, WebhookState, create_webhook_router};
use tower::ServiceExt;

use crate::common::fixtures::{WorkloadBuilder, admission_review, docker_config_secret};
use crate::{FixedVersion, ScriptedRegistry, webhook_state};

async fn send(app: axum::Router, body: String) -> (StatusCode, Vec<u8>) {
    let response = app
        .oneshot(
            Request::post("/mutate")
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

/// Decode the response envelope; returns (allowed, decoded patch, message).
fn decode(body: &[u8]) -> (bool, Option<Value>, String) {
    let review: AdmissionReview<DynamicObject> = serde_json::from_slice(body).unwrap();
    let response = review.response.unwrap();
    let patch = response
        .patch
        .as_ref()
        .map(|bytes| serde_json::from_slice(bytes).unwrap());
    (response.allowed, patch, response.result.message)
}

#[tokio::test]
async fn test_patch_applies_to_submitted_object() {
    let deployment = WorkloadBuilder::new("Deployment", "web")
        .namespace("apps")
        .init_container("migrate", "app/migrate:~2.1.0")
        .container("app", "nginx:^1.25.0")
        .container("sidecar", "envoyproxy/envoy")
        .build();
    let registry = ScriptedRegistry::new()
        .public("app/migrate", &["2.0.9", "2.1.0", "2.1.7", "2.2.0"])
        .public("nginx", &["1.25.4", "1.27.2", "2.0.0"]);
    let app = create_webhook_router(webhook_state(
        StaticSecretLookup::new(),
        registry,
        SemverResolver::new(),
    ));

    let (status, body) = send(app, admission_review("Deployment", "apps", deployment.clone()).to_string()).await;
    assert_eq!(status, StatusCode::OK);

    let (allowed, patch, _) = decode(&body);
    assert!(allowed);
    let patch: json_patch::Patch = serde_json::from_value(patch.unwrap()).unwrap();

    let mut patched = deployment;
    json_patch::patch(&mut patched, &patch).unwrap();
    let pod_spec = &patched["spec"]["template"]["spec"];
    assert_eq!(pod_spec["initContainers"][0]["image"], "app/migrate:2.1.7");
    assert_eq!(pod_spec["containers"][0]["image"], "nginx:1.27.2");
    assert_eq!(pod_spec["containers"][1]["image"], "envoyproxy/envoy");
}

#[tokio::test]
async fn test_request_namespace_is_used_for_secrets() {
    // Objects created through a controller often carry no metadata.namespace.
    let pod = WorkloadBuilder::new("Pod", "web")
        .container("app", "registry.example.com/team/app:^1.0.0")
        .pull_secret("regcred")
        .build();
    let secrets = StaticSecretLookup::new().with_secret(docker_config_secret(
        "apps",
        "regcred",
        "registry.example.com",
        "robot",
        "pw",
    ));
    let registry =
        ScriptedRegistry::new().private("registry.example.com/team/app", &["robot"], &["1.2.0"]);
    let app = create_webhook_router(webhook_state(secrets, registry, SemverResolver::new()));

    let (_, body) = send(app, admission_review("Pod", "apps", pod).to_string()).await;
    let (allowed, patch, _) = decode(&body);
    assert!(allowed);
    assert_eq!(
        patch.unwrap(),
        json!([{
            "op": "replace",
            "path": "/spec/containers/0/image",
            "value": "registry.example.com/team/app:1.2.0"
        }])
    );
}

#[tokio::test]
async fn test_service_is_allowed_without_patch() {
    let service = WorkloadBuilder::new("Service", "web").namespace("apps").build();
    let app = create_webhook_router(webhook_state(
        StaticSecretLookup::new(),
        ScriptedRegistry::new(),
        FixedVersion("1.0"),
    ));

    let (status, body) = send(app, admission_review("Service", "apps", service).to_string()).await;
    assert_eq!(status, StatusCode::OK);
    let (allowed, patch, _) = decode(&body);
    assert!(allowed);
    assert!(patch.is_none());
}

#[tokio::test]
async fn test_unresolvable_workload_is_allowed_without_patch() {
    let pod = WorkloadBuilder::new("Pod", "web")
        .container("app", "private/app:^1.0.0")
        .build();
    let app = create_webhook_router(webhook_state(
        StaticSecretLookup::new(),
        ScriptedRegistry::new(),
        FixedVersion("1.0"),
    ));

    let (_, body) = send(app, admission_review("Pod", "apps", pod).to_string()).await;
    let (allowed, patch, _) = decode(&body);
    assert!(allowed);
    assert!(patch.is_none());
}

#[tokio::test]
async fn test_undecodable_workload_is_denied() {
    let mut pod = WorkloadBuilder::new("Pod", "web").build();
    pod["spec"]["initContainers"] = json!({"name": "not-a-list"});
    let app = create_webhook_router(webhook_state(
        StaticSecretLookup::new(),
        ScriptedRegistry::new(),
        FixedVersion("1.0"),
    ));

    let (status, body) = send(app, admission_review("Pod", "apps", pod).to_string()).await;
    assert_eq!(status, StatusCode::OK);
    let (allowed, patch, message) = decode(&body);
    assert!(!allowed);
    assert!(patch.is_none());
    assert!(message.contains("failed to decode Pod"), "{message}");
}

#[tokio::test]
async fn test_delete_without_object_is_allowed() {
    let mut review = admission_review("Pod", "apps", json!(null));
    review["request"]["operation"] = json!("DELETE");
    review["request"]["name"] = json!("web");
    let app = create_webhook_router(webhook_state(
        StaticSecretLookup::new(),
        ScriptedRegistry::new(),
        FixedVersion("1.0"),
    ));

    let (status, body) = send(app, review.to_string()).await;
    assert_eq!(status, StatusCode::OK);
    let (allowed, patch, _) = decode(&body);
    assert!(allowed);
    assert!(patch.is_none());
}

#[tokio::test]
async fn test_garbage_body_is_bad_request() {
    let app = create_webhook_router(webhook_state(
        StaticSecretLookup::new(),
        ScriptedRegistry::new(),
        FixedVersion("1.0"),
    ));

    let (status, body) = send(app, "{\"apiVersion\":".to_string()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(String::from_utf8(body).unwrap(), DECODE_FAILURE_BODY);
}

#[tokio::test]
async fn test_admissions_are_counted() {
    let health = Arc::new(HealthState::new());
    let registry = ScriptedRegistry::new().public("alpine", &["1.0"]);
    let resolver = ImageResolver::new(StaticSecretLookup::new(), registry, FixedVersion("1.0"));
    let app = create_webhook_router(Arc::new(WebhookState::new(resolver, Some(health.clone()))));

    let pod = WorkloadBuilder::new("Pod", "web")
        .container("app", "alpine:latest")
        .container("bad", "alpine")
        .build();
    send(app, admission_review("Pod", "apps", pod).to_string()).await;

    let metrics = health.metrics.encode();
    assert!(metrics.contains(r#"tagresolver_admission_requests_total{kind="Pod",outcome="patched"} 1"#), "{metrics}");
    assert!(metrics.contains(r#"tagresolver_container_resolutions_total{outcome="malformed_image"} 1"#), "{metrics}");
}
