mod auth;
mod config;
mod error;
mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use config::AppConfig;
use routes::{app_router, AppState};
use vestry_core::db::{Database, ReplicaConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Only load .env in development; production uses platform-native env injection.
    #[cfg(debug_assertions)]
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("vestry_api=info".parse().expect("valid directive"))
                .add_directive("vestry_core=info".parse().expect("valid directive")),
        )
        .init();

    let config = Arc::new(AppConfig::from_env()?);
    tracing::info!("Starting vestry-api with config: {:?}", config);

    let db = match (&config.replica_url, &config.replica_auth_token) {
        (Some(url), Some(token)) => {
            let replica = ReplicaConfig::new(url.clone(), token.clone());
            Database::open_replica(&config.db_path, replica).await?
        }
        _ => Database::open(&config.db_path).await?,
    };

    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(config, Arc::new(db))?;
    let router = app_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("vestry-api listening on {}", bind_addr);
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
