//! Switchboard Signaling Service
//!
//! WebRTC signaling hub: clients connect over WebSocket, join named rooms
//! and relay session descriptions and ICE candidates to each other.
//!
//! # Startup Flow
//!
//! 1. Initialize tracing (text or JSON per `SIGNALING_LOG_FORMAT`)
//! 2. Load configuration from environment
//! 3. Initialize Prometheus metrics recorder
//! 4. Create the signaling hub (spawns the room manager)
//! 5. Bind the HTTP listener and mark the service ready
//! 6. Serve until SIGINT/SIGTERM, then drain rooms and connections

#![warn(clippy::pedantic)]

use signaling_service::config::{Config, LogFormat};
use signaling_service::hub::{HubConfig, SignalingHub};
use signaling_service::observability::{init_metrics_recorder, HealthState};
use signaling_service::routes::{self, AppState};

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Log format is read before the rest of the configuration so that
    // configuration errors are logged in the requested format.
    let log_format = std::env::var("SIGNALING_LOG_FORMAT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or_default();
    init_tracing(log_format);

    info!("Starting Signaling Service");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        instance_id = %config.instance_id,
        bind_address = %config.bind_address,
        max_participants = ?config.max_participants,
        max_rooms = config.max_rooms,
        outbound_buffer = config.outbound_buffer,
        idle_timeout_seconds = config.idle_timeout_seconds,
        identity_source = ?config.identity_source,
        identity_scope = ?config.identity_scope,
        room_policy = ?config.room_policy,
        "Configuration loaded successfully"
    );

    // Initialize Prometheus metrics recorder
    // This must happen before any metrics are recorded
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;

    let health_state = Arc::new(HealthState::new());

    let hub = SignalingHub::new(HubConfig::from(&config));

    // Log membership events until shutdown
    let events_token = CancellationToken::new();
    tokio::spawn(log_room_events(hub.clone(), events_token.clone()));

    let state = Arc::new(AppState {
        hub: hub.clone(),
        identity_source: config.identity_source,
        identity_header: config.identity_header.clone(),
    });
    let app = routes::build_routes(state, Arc::clone(&health_state), Some(prometheus_handle));

    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.bind_address, "Invalid bind address");
        e
    })?;

    // Bind before marking ready to fail fast on bind errors
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!(error = %e, addr = %addr, "Failed to bind listener");
        e
    })?;

    health_state.set_ready();
    info!(addr = %addr, "Signaling Service listening");

    // The hub drains before the listener closes; upgrades arriving in the
    // meantime are answered 503.
    let shutdown_hub = hub.clone();
    let shutdown_health = Arc::clone(&health_state);
    let shutdown_deadline = config.shutdown_deadline();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("Shutdown signal received, initiating graceful shutdown...");

            // Mark as not ready immediately so load balancers stop routing
            shutdown_health.set_not_ready();

            if let Err(e) = shutdown_hub.shutdown(shutdown_deadline).await {
                warn!(error = %e, "Signaling hub shutdown error");
            }
        })
        .await?;

    events_token.cancel();
    info!("Signaling Service shutdown complete");

    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "signaling_service=debug,sig=info,tower_http=debug".into());

    match format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

/// Log room lifecycle and membership events.
async fn log_room_events(hub: SignalingHub, cancel_token: CancellationToken) {
    let mut events = hub.subscribe_events();

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => break,
            event = events.recv() => match event {
                Ok(event) => debug!(target: "sig.events", event = ?event, "Room event"),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(target: "sig.events", skipped = skipped, "Room event log lagged");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
