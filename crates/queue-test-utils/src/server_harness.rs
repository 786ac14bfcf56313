//! Test server harness for end-to-end tests.
//!
//! Provides `TestQueueServer` for spawning a real queue service over the
//! in-memory store.

use common::types::UserId;
use queue_service::config::Config;
use queue_service::hub::HubHandle;
use queue_service::ledger::PositionLedger;
use queue_service::middleware::USER_ID_HEADER;
use queue_service::observability::metrics::init_metrics_recorder;
use queue_service::repositories::{InMemoryQueueStore, QueueStore};
use queue_service::routes::{self, AppState};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Test harness for spawning the queue service in end-to-end tests.
///
/// The scheduler is not started; tests drive the lifecycle jobs directly
/// through [`TestQueueServer::store`] and [`TestQueueServer::hub`].
pub struct TestQueueServer {
    addr: SocketAddr,
    store: Arc<InMemoryQueueStore>,
    ledger: Arc<PositionLedger>,
    hub: HubHandle,
    config: Config,
    client: reqwest::Client,
    cancel_token: CancellationToken,
    _handle: JoinHandle<()>,
}

impl TestQueueServer {
    /// Spawn with default configuration.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with_vars(HashMap::new()).await
    }

    /// Spawn with extra configuration variables (e.g. WebSocket timeouts).
    ///
    /// The server binds to 127.0.0.1:0 and runs in the background until the
    /// harness is dropped.
    pub async fn spawn_with_vars(mut vars: HashMap<String, String>) -> Result<Self, anyhow::Error> {
        vars.remove("DATABASE_URL");
        vars.insert("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string());
        let config = Config::from_vars(&vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let cancel_token = CancellationToken::new();
        let store = Arc::new(InMemoryQueueStore::new());
        let dyn_store: Arc<dyn QueueStore> = Arc::clone(&store) as Arc<dyn QueueStore>;
        let hub = HubHandle::new(cancel_token.child_token());
        let ledger = Arc::new(PositionLedger::new(Arc::clone(&dyn_store), hub.clone()));

        let state = Arc::new(AppState {
            store: dyn_store,
            ledger: Arc::clone(&ledger),
            hub: hub.clone(),
            config: config.clone(),
        });

        // The global recorder can only be installed once per process.
        let metrics_handle = match init_metrics_recorder() {
            Ok(handle) => handle,
            Err(_) => {
                use metrics_exporter_prometheus::PrometheusBuilder;
                PrometheusBuilder::new().build_recorder().handle()
            }
        };

        let app = routes::build_routes(state, metrics_handle);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;
        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let server_token = cancel_token.clone();
        let handle = tokio::spawn(async move {
            let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, make_service)
                .with_graceful_shutdown(async move { server_token.cancelled().await })
                .await
            {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            store,
            ledger,
            hub,
            config,
            client: reqwest::Client::new(),
            cancel_token,
            _handle: handle,
        })
    }

    /// The in-memory store behind the server, for fixtures and assertions.
    pub fn store(&self) -> &InMemoryQueueStore {
        &self.store
    }

    pub fn ledger(&self) -> &PositionLedger {
        &self.ledger
    }

    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Base HTTP URL of the server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// WebSocket URL of a queue room.
    pub fn ws_url(&self, queue_id: impl std::fmt::Display) -> String {
        format!("ws://{}/api/v1/queues/{}/ws", self.addr, queue_id)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Authenticated GET as `user_id`.
    pub async fn get(&self, path: &str, user_id: UserId) -> reqwest::Result<reqwest::Response> {
        self.client
            .get(format!("{}{}", self.url(), path))
            .header(USER_ID_HEADER, user_id.to_string())
            .send()
            .await
    }

    /// Authenticated POST as `user_id`, with an empty body.
    pub async fn post(&self, path: &str, user_id: UserId) -> reqwest::Result<reqwest::Response> {
        self.client
            .post(format!("{}{}", self.url(), path))
            .header(USER_ID_HEADER, user_id.to_string())
            .send()
            .await
    }

    /// Unauthenticated client for negative tests.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Stop the hub and the server.
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }
}

impl Drop for TestQueueServer {
    fn drop(&mut self) {
        self.cancel_token.cancel();
        self._handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_server_spawns_successfully() -> Result<(), anyhow::Error> {
        let server = TestQueueServer::spawn().await?;
        assert!(server.url().starts_with("http://127.0.0.1:"));

        let response = reqwest::get(format!("{}/health", server.url())).await?;
        assert_eq!(response.status(), 200);
        assert_eq!(response.text().await?, "OK");

        Ok(())
    }

    #[tokio::test]
    async fn test_ready_reports_hub_connections() -> Result<(), anyhow::Error> {
        let server = TestQueueServer::spawn().await?;

        let response = reqwest::get(format!("{}/ready", server.url())).await?;
        assert_eq!(response.status(), 200);
        let body: serde_json::Value = response.json().await?;
        assert_eq!(body["status"], "ready");
        assert_eq!(body["connections"], 0);

        Ok(())
    }

    #[tokio::test]
    async fn test_ws_url_matches_addr() -> Result<(), anyhow::Error> {
        let server = TestQueueServer::spawn().await?;
        assert_eq!(
            server.ws_url(7),
            format!("ws://{}/api/v1/queues/7/ws", server.addr())
        );
        Ok(())
    }
}
