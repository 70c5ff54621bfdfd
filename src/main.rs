mod config;
mod error;
mod handlers;
mod models;
mod normalize;
mod provider;
mod relay;

use std::sync::Arc;

use axum::{Router, routing::get};
use tokio::net::TcpListener;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{info, warn};

use crate::{
    config::AppConfig,
    error::ApiError,
    handlers::{AppState, download, health, search},
    provider::HttpProvider,
};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "tube_relay=info,tower_http=info".to_string()),
        )
        .init();

    if let Err(error) = run().await {
        eprintln!("Server error: {}", error.message);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), ApiError> {
    let config = AppConfig::from_env()?;
    let http_client = config.build_http_client()?;

    if !config.public_dir.is_dir() {
        warn!(
            "Pasta de arquivos estáticos {:?} não encontrada. Somente a API será servida.",
            config.public_dir
        );
    }

    let state = AppState {
        provider: Arc::new(HttpProvider::new(config.profile.clone(), http_client.clone())),
        http_client,
    };

    let app = build_router(state, &config);

    let listener = TcpListener::bind(&config.bind_addr).await.map_err(|error| {
        ApiError::internal(format!(
            "Não foi possível iniciar a porta {}: {error}",
            config.bind_addr
        ))
    })?;

    info!("Servidor rodando em http://{}", config.bind_addr);

    axum::serve(listener, app)
        .await
        .map_err(|error| ApiError::internal(format!("Erro do servidor HTTP: {error}")))
}

fn build_router(state: AppState, config: &AppConfig) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/search", get(search))
        .route("/api/download", get(download))
        .with_state(state)
        .fallback_service(ServeDir::new(&config.public_dir))
        .layer(config.cors_layer())
        .layer(TraceLayer::new_for_http())
}
