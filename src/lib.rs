//! tag-resolver library crate
//!
//! A mutating admission webhook that rewrites floating container image tags
//! (`alpine:^3.19.0`) to the highest tag the registry offers that satisfies
//! the constraint (`alpine:3.20.1`).
//!
//! Request flow: `webhooks` decodes the AdmissionReview, `workload` locates
//! the pod spec, `resolution` lists tags through `registry` (anonymously,
//! then with `credentials` from pull secrets) and picks a tag with `version`.

pub mod config;
pub mod credentials;
pub mod health;
pub mod registry;
pub mod resolution;
pub mod version;
pub mod webhooks;
pub mod workload;

pub use config::{ConfigError, WebhookConfig};
pub use health::HealthState;
pub use resolution::{ImageResolver, JsonPatchOp, Resolution, ResolutionReport};
pub use webhooks::{WebhookError, WebhookState, create_webhook_router, run_webhook_server};
