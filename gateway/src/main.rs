use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use botbridge_adapter::{Adapter, AdapterConfig};

mod routes;
mod state;

#[tokio::main]
async fn main() {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();

    // Structured JSON logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "botbridge_gateway=debug,botbridge_adapter=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    // Config file wins when pointed at one; env vars otherwise.
    let config = match std::env::var("BOTBRIDGE_CONFIG") {
        Ok(path) => AdapterConfig::load(Path::new(&path)),
        Err(_) => AdapterConfig::from_env(),
    };
    let config = match config {
        Ok(config) => config,
        Err(err) => {
            tracing::error!("config error: {err}");
            std::process::exit(1);
        }
    };

    let adapter = Adapter::from_config(&config).expect("failed to build adapter from config");
    let app_state = state::AppState {
        adapter: Arc::new(adapter),
    };

    let app = routes::router()
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    let port: u16 = std::env::var("BOTBRIDGE_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8081);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("botbridge gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
