//! Offshore binary: relay server.

use shorewire::config::OffshoreConfig;
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

    let config = OffshoreConfig::from_env();
    if let Err(e) = shorewire::offshore::run_offshore(config).await {
        tracing::error!(error = %e, "offshore relay exited");
        std::process::exit(1);
    }
}
