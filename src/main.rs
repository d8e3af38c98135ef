/**
 * Offline KYC Server
 * Serves the verification pipeline over HTTP
 */

use offline_kyc::config::Config;
use offline_kyc::server::{router, AppState};
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    info!("Starting offline KYC server");

    let config = Config::from_env()?;
    let credentials = config.credential_service()?;
    let biometric = config.biometric_service();
    let app = router(AppState::new(credentials, biometric), config.max_body_bytes);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!("Offline KYC server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}
