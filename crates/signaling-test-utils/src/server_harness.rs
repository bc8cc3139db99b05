//! Test server harness for E2E testing
//!
//! Provides `TestSignalingServer` for spawning real signaling server
//! instances in tests.

use signaling_service::config::Config;
use signaling_service::hub::{HubConfig, SignalingHub};
use signaling_service::observability::HealthState;
use signaling_service::routes::{self, AppState};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Test harness for spawning the signaling server in E2E tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_room_full() -> anyhow::Result<()> {
///     let server =
///         TestSignalingServer::spawn_with_vars(&[("SIGNALING_MAX_PARTICIPANTS", "1")]).await?;
///     let mut alice = TestClient::connect(&server).await?;
///     alice.join("room_1", "Alice").await?;
///     Ok(())
/// }
/// ```
pub struct TestSignalingServer {
    addr: SocketAddr,
    hub: SignalingHub,
    health: Arc<HealthState>,
    config: Config,
    _handle: JoinHandle<()>,
}

impl TestSignalingServer {
    /// Spawn a server with default configuration.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with_vars(&[]).await
    }

    /// Spawn a server with configuration overrides.
    ///
    /// The server will:
    /// - Bind to a random available port (127.0.0.1:0)
    /// - Start the HTTP server in the background
    ///
    /// # Arguments
    /// * `overrides` - `SIGNALING_*` environment variables to apply
    pub async fn spawn_with_vars(overrides: &[(&str, &str)]) -> Result<Self, anyhow::Error> {
        let mut vars = HashMap::from([
            (
                "SIGNALING_BIND_ADDRESS".to_string(),
                "127.0.0.1:0".to_string(),
            ),
            (
                "SIGNALING_INSTANCE_ID".to_string(),
                "sig-test".to_string(),
            ),
        ]);
        for (key, value) in overrides {
            vars.insert((*key).to_string(), (*value).to_string());
        }

        let config = Config::from_vars(&vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let hub = SignalingHub::new(HubConfig::from(&config));
        let health = Arc::new(HealthState::new());

        let state = Arc::new(AppState {
            hub: hub.clone(),
            identity_source: config.identity_source,
            identity_header: config.identity_header.clone(),
        });

        // Build routes using the service's real route builder
        let app = routes::build_routes(state, Arc::clone(&health), None);

        // Bind to random port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        health.set_ready();

        // Spawn server in background
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            hub,
            health,
            config,
            _handle: handle,
        })
    }

    /// Get the base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get the WebSocket endpoint URL.
    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Get the socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get the hub serving this server's connections.
    pub fn hub(&self) -> &SignalingHub {
        &self.hub
    }

    /// Get reference to the health state.
    pub fn health(&self) -> &HealthState {
        &self.health
    }

    /// Get reference to the server configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl Drop for TestSignalingServer {
    fn drop(&mut self) {
        // Abort the HTTP server task so the port is released when the test ends.
        self._handle.abort();
    }
}
