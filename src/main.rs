use anyhow::Result;
use axum::Router;
use spaces_relay::{
    config::AppConfig,
    handlers::auth_handlers::SessionGate,
    models::transfer::TransferPolicy,
    routes,
    services::{relay::UploadRelay, spaces::SpacesClient, transfer::TransferStrategy},
    state::AppState,
};
use std::{io::ErrorKind, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Parse config ---
    let cfg = AppConfig::from_env_and_args()?;

    // --- Logging setup ---
    let default_level = if cfg.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    tracing::info!("Starting spaces-relay with config: {:?}", cfg);
    tracing::info!("Starting server with bucket: {}", cfg.storage.bucket);
    tracing::info!(
        "S3 Transfer Acceleration: {}",
        if cfg.storage.use_acceleration { "Enabled" } else { "Disabled" }
    );

    let spool_dir = cfg.spool_dir();
    match &cfg.temp_dir {
        Some(dir) => tracing::info!("Using custom temp directory: {}", dir.display()),
        None => tracing::info!("Using system temp directory: {}", spool_dir.display()),
    }

    // --- Initialize core services ---
    let client = SpacesClient::connect(&cfg.storage).await;
    tracing::info!("Storage endpoint: {:?}", client.endpoint());
    let strategy = TransferStrategy::new(
        Arc::new(client),
        cfg.storage.bucket.clone(),
        TransferPolicy::server(cfg.storage.use_acceleration),
    );
    let state = AppState {
        relay: UploadRelay::new(strategy, spool_dir),
        sessions: Arc::new(SessionGate::new(cfg.password.clone(), &cfg.session_secret)?),
        static_dir: cfg.static_dir.clone(),
        region: cfg.storage.region.clone(),
    };

    // --- Build router ---
    let app: Router = routes::routes::routes(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
