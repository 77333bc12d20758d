//! Ship binary: local proxy front-end.

use shorewire::config::ShipConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ShipConfig::from_env();
    if let Err(e) = shorewire::ship::run_ship(config).await {
        tracing::error!(error = %e, "ship proxy exited");
        std::process::exit(1);
    }
}
