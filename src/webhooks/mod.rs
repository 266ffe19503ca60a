//! Mutating admission webhook.
//!
//! Decodes AdmissionReview envelopes, resolves the images of supported
//! workloads and answers with an allow (optionally carrying a JSON Patch) or
//! a deny when the workload itself cannot be decoded.

mod server;

pub use server::{
    AdmissionOutcome, DECODE_FAILURE_BODY, WebhookError, WebhookState, create_webhook_router,
    run_webhook_server,
};

// Re-export kube-rs admission types for contract testing
pub use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
