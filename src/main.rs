use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use utm_tracker::api::create_api_router;
use utm_tracker::config::Config;
use utm_tracker::storage::Storage;
use utm_tracker::Tracker;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("utm_tracker=info,tower_http=info")),
        )
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!("Loaded configuration");

    if !config.enabled {
        info!("Tracking is disabled - visits will be acknowledged but not stored");
    }
    if config.ipstack.access_key.is_none() {
        info!("No ipstack access key configured - geolocation is off");
    }
    if !config.ratelimit.enabled {
        info!("Rate limiting is disabled");
    }

    let tracker = Arc::new(Tracker::from_config(config.clone())?);

    // Create the database up front when tracking is on
    if config.enabled {
        let created = tracker.storage().ensure_schema().await?;
        info!(
            path = %config.file.display(),
            created,
            "Event database ready"
        );
    }

    let router = create_api_router(Arc::clone(&tracker));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("🚀 UTM tracker listening on http://{}", addr);

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
