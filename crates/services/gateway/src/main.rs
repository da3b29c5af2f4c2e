//! Test-Session Gateway Binary
//!
//! Entry point for the test-session gateway service.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use testlane_core::ThresholdCatalog;
use testlane_gateway::{
    api::{build_router, AppState},
    auth::JwtAuthenticator,
    clock::SystemClock,
    config::Config,
    hub::ConnectionHub,
    ports::{
        AllowAllPrerequisites, EquipmentStatusSource, HttpEquipmentSource, LogNotifier,
        MemoryEquipmentSource, MemoryRepository, Notifier, WebhookNotifier,
    },
    session::SessionManager,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Test-Session Gateway...");

    // Load configuration
    let config_path = std::env::var("TESTLANE_CONFIG").ok();
    let config = Arc::new(Config::load(config_path.as_deref())?);

    tracing::info!(
        "Configuration: HTTP port={}, max_clients={}, session_timeout={}s",
        config.server.http_port,
        config.limits.max_clients_per_session,
        config.limits.session_timeout_secs
    );

    let clock = Arc::new(SystemClock);
    let catalog = Arc::new(ThresholdCatalog::default());

    // Collaborators behind the ports; swap implementations via config.
    let repository = Arc::new(MemoryRepository::new());
    let notifier: Arc<dyn Notifier> = match &config.notifications.webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(
            url.clone(),
            Duration::from_secs(config.notifications.timeout_seconds),
            config.notifications.max_retries,
            Duration::from_millis(config.notifications.retry_backoff_ms),
        )),
        None => Arc::new(LogNotifier),
    };
    let equipment: Arc<dyn EquipmentStatusSource> = match &config.equipment.base_url {
        Some(url) => Arc::new(HttpEquipmentSource::new(url.clone())),
        None => Arc::new(MemoryEquipmentSource::new()),
    };

    // Initialize the connection hub and session manager
    let hub = Arc::new(ConnectionHub::new(
        config.limits.hub_settings(),
        clock.clone(),
    ));
    let manager = Arc::new(SessionManager::new(
        catalog,
        Arc::clone(&hub),
        repository,
        notifier,
        Arc::new(AllowAllPrerequisites),
        equipment,
        config.limits.monitor_settings(),
        clock,
    ));

    // Initialize the token authenticator
    let authenticator = Arc::new(JwtAuthenticator::new(config.auth.secret.clone()));

    // Create app state and build the HTTP router
    let state = AppState::new(manager, hub, authenticator, Arc::clone(&config));
    let router = build_router(state);

    // Start HTTP server
    let bind_addr = format!("{}:{}", config.server.host, config.server.http_port);
    let listener = TcpListener::bind(&bind_addr).await?;
    tracing::info!("HTTP server listening on {}", bind_addr);

    // Run the HTTP server with graceful shutdown on SIGTERM/SIGINT
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            tracing::info!("Shutdown signal received, initiating graceful shutdown...");
        })
        .await?;

    tracing::info!("Test-Session Gateway shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
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
