pub mod errors;
pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use color_eyre::eyre::{Context, Result};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::config::SigningSettings;
use handlers::health::health_check;
use handlers::sign::handle_sign;

#[derive(Debug, Clone)]
pub struct ServerConfig<'a> {
    pub host: &'a str,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct AppState {
    pub signing: Arc<SigningSettings>,
}

pub struct Server {
    router: Router,
    listener: TcpListener,
}

impl Server {
    pub async fn new(signing: SigningSettings, config: ServerConfig<'_>) -> Result<Self> {
        let state = AppState {
            signing: Arc::new(signing),
        };

        let router = Router::new()
            .route("/health", get(health_check))
            .route("/sign", post(handle_sign))
            .layer(TraceLayer::new_for_http())
            .with_state(state);

        let listener = TcpListener::bind(format!("{}:{}", config.host, config.port))
            .await
            .context("Binding TCP listener")?;

        Ok(Self { router, listener })
    }

    /// Port the server is bound to (useful with port 0 in tests).
    pub fn port(&self) -> Result<u16> {
        Ok(self
            .listener
            .local_addr()
            .context("Getting local address")?
            .port())
    }

    pub async fn run(self) -> Result<()> {
        tracing::info!(
            "XAdES signing service listening on {}",
            self.listener.local_addr().context("Getting local address")?
        );
        axum::serve(self.listener, self.router)
            .await
            .context("Running HTTP server")
    }
}
