/// HTTP server implementation
use crate::api::connections::ConnectionRegistry;
use crate::api::handlers::{
    active_connections, chat_messages, delete_order, get_order, health_check, list_orders,
    post_chat_message, restore_order, search_orders, upload_file, AppState,
};
use crate::api::ws::websocket_endpoint;
use crate::config::AppConfig;
use crate::persistence::Persistence;
use anyhow::Result;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Enable permissive CORS
    pub enable_cors: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 7001,
            enable_cors: true,
        }
    }
}

impl ApiConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            host: config.server.host.clone(),
            port: config.server.port,
            enable_cors: config.server.enable_cors,
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_cors(mut self, enable: bool) -> Self {
        self.enable_cors = enable;
        self
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// API server
pub struct ApiServer {
    config: ApiConfig,
    state: AppState,
}

impl ApiServer {
    pub fn new(config: ApiConfig, persistence: Persistence, app_config: AppConfig) -> Self {
        let state = AppState::new(persistence, ConnectionRegistry::new(), app_config);
        Self { config, state }
    }

    /// Registry of the websocket sessions served by this server
    pub fn connections(&self) -> &ConnectionRegistry {
        &self.state.connections
    }

    /// Build the router with all routes
    pub fn router(&self) -> Router {
        let mut router = Router::new()
            .route("/health", get(health_check))
            // Websocket delivery
            .route("/ws", get(websocket_endpoint))
            .route("/active_connections", get(active_connections))
            // Orders
            .route("/orders", get(list_orders))
            .route("/orders/search", get(search_orders))
            .route("/orders/:id", get(get_order).delete(delete_order))
            .route("/orders/:id/restore", post(restore_order))
            // Chats
            .route("/chats/:id/messages", get(chat_messages).post(post_chat_message))
            // Files
            .route(
                "/files",
                post(upload_file).layer(DefaultBodyLimit::max(self.state.config.storage.max_file_size)),
            )
            .with_state(self.state.clone());

        if self.config.enable_cors {
            let cors = CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any);
            router = router.layer(cors);
        }

        router.layer(TraceLayer::new_for_http())
    }

    /// Run the server until `shutdown_signal` resolves
    pub async fn run_with_shutdown(
        self,
        shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let app = self.router();
        let bind_addr = self.config.bind_address();

        let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
        tracing::info!("Listening on {}", bind_addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

        Ok(())
    }
}
