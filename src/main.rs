//! tag-resolver - pins floating image tags at admission time.
//!
//! This is the main entry point that:
//! - Initializes structured logging
//! - Loads configuration from the environment
//! - Creates the Kubernetes client used for pull-secret lookups
//! - Starts the health server and the TLS webhook server

use std::sync::Arc;
use std::time::Duration;

use kube::Client;
use tokio::signal;
use tracing::{error, info};

use tag_resolver::credentials::KubeSecretLookup;
use tag_resolver::health::{HealthState, run_health_server};
use tag_resolver::registry::RegistryClient;
use tag_resolver::version::SemverResolver;
use tag_resolver::{ImageResolver, WebhookConfig, WebhookState, run_webhook_server};

/// Grace period for in-flight admission requests to complete during shutdown
const SHUTDOWN_GRACE_PERIOD_SECS: u64 = 5;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tag_resolver=info".parse()?)
                .add_directive("kube=info".parse()?),
        )
        .json()
        .init();

    info!("Starting tag-resolver");

    // Both reqwest and axum-server link rustls; pick the provider explicitly.
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        error!(provider = ?e, "Failed to install crypto provider");
        return Err("failed to install rustls crypto provider".into());
    }

    let config = WebhookConfig::from_env()?;
    info!(
        port = config.port,
        health_port = config.health_port,
        ping_timeout_secs = config.ping_timeout.as_secs(),
        list_timeout_secs = config.list_timeout.as_secs(),
        plain_http_registries = ?config.plain_http_registries,
        "Loaded configuration"
    );

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    let registry = RegistryClient::new(config.registry_client_config())?;
    let resolver = ImageResolver::new(KubeSecretLookup::new(client), registry, SemverResolver::new());

    // Create shared health state
    let health_state = Arc::new(HealthState::new());
    let webhook_state = Arc::new(WebhookState::new(resolver, Some(health_state.clone())));

    // Start health server immediately so health checks answer while TLS loads
    let health_handle = {
        let health_state = health_state.clone();
        let port = config.health_port;
        tokio::spawn(async move {
            if let Err(e) = run_health_server(health_state, port).await {
                error!("Health server error: {}", e);
            }
        })
    };

    let webhook_handle = {
        let config = config.clone();
        tokio::spawn(async move {
            if let Err(e) = run_webhook_server(webhook_state, &config).await {
                error!("Webhook server error: {}", e);
            }
        })
    };

    // Readiness is flipped by the webhook server once its TLS listener is bound.

    // Wait for any task to complete (or fail), or shutdown signal
    tokio::select! {
        result = health_handle => {
            if let Err(e) = result {
                error!("Health server task panicked: {}", e);
            }
        }
        result = webhook_handle => {
            if let Err(e) = result {
                error!("Webhook server task panicked: {}", e);
            }
        }
        // Handle graceful shutdown on SIGTERM or SIGINT
        _ = shutdown_signal() => {
            info!("Received shutdown signal, initiating graceful shutdown...");

            // Mark as not ready to stop receiving new admission requests
            health_state.set_ready(false).await;
            info!("Marked webhook as not ready");

            info!(
                "Waiting {}s for in-flight admission requests to complete...",
                SHUTDOWN_GRACE_PERIOD_SECS
            );
            tokio::time::sleep(Duration::from_secs(SHUTDOWN_GRACE_PERIOD_SECS)).await;

            info!("Grace period complete, shutting down");
        }
    }

    info!("tag-resolver stopped");
    Ok(())
}

/// Wait for SIGTERM or SIGINT. Failing to install a handler is fatal.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
