//! Admission webhook server.
//!
//! Provides the HTTP endpoints of the mutating admission webhook.
//!
//! To enable the webhook:
//! 1. Deploy cert-manager (or another issuer) for TLS certificates
//! 2. Create a MutatingWebhookConfiguration pointing at `/mutate`
//! 3. Mount the TLS certificate secret at the configured cert/key paths

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use axum_server::Handle;
use axum_server::tls_rustls::RustlsConfig;
use kube::core::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};

use crate::config::WebhookConfig;
use crate::credentials::{DEFAULT_NAMESPACE, SecretLookup};
use crate::health::HealthState;
use crate::registry::TagLister;
use crate::resolution::{ImageResolver, to_json_patch};
use crate::version::VersionResolver;
use crate::workload::WorkloadKind;

/// Plain-text body returned for requests that are not an AdmissionReview.
pub const DECODE_FAILURE_BODY: &str = "unable to decode body";

/// Final decision for one admission request, used as a metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionOutcome {
    /// Allowed without changes
    Allowed,
    /// Allowed with a JSON Patch
    Patched,
    /// Denied
    Denied,
}

impl AdmissionOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            AdmissionOutcome::Allowed => "allowed",
            AdmissionOutcome::Patched => "patched",
            AdmissionOutcome::Denied => "denied",
        }
    }
}

/// Shared state for webhook handlers
pub struct WebhookState<S, L, V> {
    pub resolver: ImageResolver<S, L, V>,
    pub health: Option<Arc<HealthState>>,
}

impl<S, L, V> WebhookState<S, L, V>
where
    S: SecretLookup,
    L: TagLister,
    V: VersionResolver,
{
    pub fn new(resolver: ImageResolver<S, L, V>, health: Option<Arc<HealthState>>) -> Self {
        Self { resolver, health }
    }

    /// Decide one admission request and record its metrics.
    ///
    /// `object` is the raw `request.object`; it is decoded here against the
    /// request's kind so that a bad payload becomes a denial.
    #[instrument(skip_all, fields(uid = %request.uid, kind = %request.kind.kind))]
    pub async fn admit(
        &self,
        request: &AdmissionRequest<DynamicObject>,
        object: Option<&Value>,
    ) -> AdmissionResponse {
        let start = Instant::now();
        let (response, outcome) = self.decide(request, object).await;

        if let Some(health) = &self.health {
            health.metrics.record_admission(
                &request.kind.kind,
                outcome.as_str(),
                start.elapsed().as_secs_f64(),
            );
        }
        response
    }

    async fn decide(
        &self,
        request: &AdmissionRequest<DynamicObject>,
        object: Option<&Value>,
    ) -> (AdmissionResponse, AdmissionOutcome) {
        let Some(object) = object.filter(|o| !o.is_null()) else {
            debug!(operation = ?request.operation, "No object in request, allowing unchanged");
            return (AdmissionResponse::from(request), AdmissionOutcome::Allowed);
        };

        let kind = WorkloadKind::from_kind(&request.kind.kind);
        if !kind.is_supported() {
            debug!("Unsupported kind, allowing unchanged");
            return (AdmissionResponse::from(request), AdmissionOutcome::Allowed);
        }

        let mut workload = match kind.extract(object) {
            Ok(Some(workload)) => workload,
            Ok(None) => return (AdmissionResponse::from(request), AdmissionOutcome::Allowed),
            Err(e) => return deny(request, e.to_string()),
        };

        if workload.namespace.is_empty() {
            workload.namespace = request
                .namespace
                .clone()
                .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
        }

        let resolution = self.resolver.resolve(&workload).await;
        if let Some(health) = &self.health {
            health.metrics.record_resolution(&resolution.report);
        }

        if resolution.patches.is_empty() {
            info!(
                skipped = resolution.report.skipped(),
                "No image resolved, allowing unchanged"
            );
            return (AdmissionResponse::from(request), AdmissionOutcome::Allowed);
        }

        let patch_ops = resolution.patches.len();
        match AdmissionResponse::from(request).with_patch(to_json_patch(&resolution.patches)) {
            Ok(response) => {
                info!(patch_ops, skipped = resolution.report.skipped(), "Patching workload images");
                (response, AdmissionOutcome::Patched)
            }
            Err(e) => {
                error!(error = %e, "Failed to serialize patch");
                deny(request, format!("patch serialization error: {e}"))
            }
        }
    }
}

fn deny(
    request: &AdmissionRequest<DynamicObject>,
    message: String,
) -> (AdmissionResponse, AdmissionOutcome) {
    warn!(message = %message, "Admission request denied");
    (
        AdmissionResponse::from(request).deny(message),
        AdmissionOutcome::Denied,
    )
}

/// Create the webhook router
pub fn create_webhook_router<S, L, V>(state: Arc<WebhookState<S, L, V>>) -> Router
where
    S: SecretLookup + 'static,
    L: TagLister + 'static,
    V: VersionResolver + 'static,
{
    Router::new()
        .route("/", post(mutate::<S, L, V>))
        .route("/mutate", post(mutate::<S, L, V>))
        .route("/healthz", get(healthz))
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Detach `request.object` and `request.oldObject` from a raw review.
///
/// The objects are decoded per kind later on; only the envelope has to
/// match the typed review.
fn take_objects(review: &mut Value) -> Option<Value> {
    let request = review.get_mut("request")?.as_object_mut()?;
    request.remove("oldObject");
    request.remove("object")
}

/// Mutating admission handler.
///
/// The body is decoded by hand so that non-JSON input gets a plain-text 400
/// instead of an extractor rejection.
async fn mutate<S, L, V>(State(state): State<Arc<WebhookState<S, L, V>>>, body: Bytes) -> Response
where
    S: SecretLookup,
    L: TagLister,
    V: VersionResolver,
{
    let decoded = serde_json::from_slice::<Value>(&body).and_then(|mut raw| {
        let object = take_objects(&mut raw);
        serde_json::from_value::<AdmissionReview<DynamicObject>>(raw).map(|review| (review, object))
    });
    let (review, object) = match decoded {
        Ok(decoded) => decoded,
        Err(e) => {
            warn!(error = %e, "Failed to decode admission review");
            return (StatusCode::BAD_REQUEST, DECODE_FAILURE_BODY).into_response();
        }
    };

    let request: AdmissionRequest<DynamicObject> = match review.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "Failed to extract admission request");
            return (
                StatusCode::BAD_REQUEST,
                format!("invalid admission review: {e}"),
            )
                .into_response();
        }
    };

    let response = state.admit(&request, object.as_ref()).await;
    (StatusCode::OK, Json(response.into_review())).into_response()
}

/// Errors that can occur when running the webhook server
#[derive(Debug)]
pub enum WebhookError {
    /// TLS configuration error
    TlsConfig(String),
    /// Server error
    Server(String),
}

impl std::fmt::Display for WebhookError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WebhookError::TlsConfig(msg) => write!(f, "TLS configuration error: {}", msg),
            WebhookError::Server(msg) => write!(f, "Webhook server error: {}", msg),
        }
    }
}

impl std::error::Error for WebhookError {}

/// Run the webhook server with TLS
///
/// Binds to `0.0.0.0:<port>` and serves `/`, `/mutate` and `/healthz`.
/// TLS certificates are loaded from the configured PEM files. The shared
/// [`HealthState`], if any, turns ready once the listener is bound.
pub async fn run_webhook_server<S, L, V>(
    state: Arc<WebhookState<S, L, V>>,
    config: &WebhookConfig,
) -> Result<(), WebhookError>
where
    S: SecretLookup + 'static,
    L: TagLister + 'static,
    V: VersionResolver + 'static,
{
    let health = state.health.clone();
    let app = create_webhook_router(state);

    let tls = RustlsConfig::from_pem_file(
        PathBuf::from(&config.cert_path),
        PathBuf::from(&config.key_path),
    )
    .await
    .map_err(|e| WebhookError::TlsConfig(e.to_string()))?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let handle = Handle::new();
    {
        let handle = handle.clone();
        tokio::spawn(async move {
            let Some(bound) = handle.listening().await else {
                return;
            };
            info!(addr = %bound, "Webhook server listening with TLS");
            if let Some(health) = health {
                health.set_ready(true).await;
            }
        });
    }

    axum_server::bind_rustls(addr, tls)
        .handle(handle)
        .serve(app.into_make_service())
        .await
        .map_err(|e| WebhookError::Server(e.to_string()))?;

    Ok(())
}
