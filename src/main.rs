//! house_app server
//!
//! Usage:
//!   cargo run --bin load_data    # optional: seed demo users/places
//!   JWT_SECRET=... cargo run --bin house_app
//!   # Then drive it with curl or `cargo run --bin house-cli -- --help`

use std::net::SocketAddr;

use house_app::{config::Config, rest::{create_router, AppState}, storage::Storage, telemetry};
use tokio::{net::TcpListener, signal};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env is fine; real deployments use the process environment.
    let _ = dotenvy::dotenv();

    let config = Config::from_env()?;
    let _log_guard = telemetry::init(&config);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!(
        database = %config.database_path.display(),
        uploads = %config.uploads_dir.display(),
        client_origin = %config.client_origin,
        bcrypt_cost = config.bcrypt_cost,
        token_ttl_secs = ?config.token_ttl.map(|ttl| ttl.as_secs()),
        link_allowed_hosts = ?config.link_policy.allowed_hosts,
        link_public_only = config.link_policy.public_only(),
        link_max_bytes = config.link_policy.max_bytes,
        upload_max_bytes = config.upload_max_bytes,
        "starting house_app"
    );

    let storage = Storage::open(&config.database_path)?;
    let app = create_router(AppState::new(config, storage.clone())?);

    let listener = TcpListener::bind(addr).await?;
    info!("listening on {addr}");

    let served = axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // Flush even if the server stopped with an error.
    if let Err(e) = storage.flush() {
        error!(error = %e, "failed to flush storage on shutdown");
    }
    served?;

    info!("shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
