//! service-link daemon.
//!
//! Loads the configuration, builds the component graph, runs health
//! probing and the optional admin API until SIGINT/SIGTERM.
//!
//! Usage: `service-link [CONFIG_PATH]` (defaults apply without a path).

use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

use service_link::admin::{setup_admin_router, AdminState};
use service_link::config::{load_config, LinkConfig};
use service_link::lifecycle::{signals::wait_for_signal, ServiceLink, Shutdown};
use service_link::observability::{logging::init_logging, metrics::init_metrics};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = match std::env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => load_config(&path)?,
        None => LinkConfig::default(),
    };

    init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "service-link starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let link = Arc::new(ServiceLink::build(config)?);
    link.start();

    let shutdown = Shutdown::new();
    let admin = if link.config().admin.enabled {
        let listener = TcpListener::bind(&link.config().admin.bind_address).await?;
        tracing::info!(address = %listener.local_addr()?, "Admin API listening");

        let router = setup_admin_router(AdminState::new(link.clone()));
        let mut stop = shutdown.subscribe();
        Some(tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = stop.recv().await;
                })
                .await;
            if let Err(e) = served {
                tracing::error!(error = %e, "Admin API failed");
            }
        }))
    } else {
        None
    };

    wait_for_signal().await;
    tracing::info!("Shutting down");

    shutdown.trigger();
    if let Some(admin) = admin {
        let _ = admin.await;
    }
    link.shutdown().await;

    tracing::info!("Shutdown complete");
    Ok(())
}
