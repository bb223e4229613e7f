//! Kukaracha Chat Server - Entry Point
//!
//! Reads configuration, starts the chat service and runs until Ctrl-C.

use std::env;

use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use kukaracha_server::{ChatService, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=kukaracha_server=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("kukaracha_server=info")),
        )
        .init();

    let mut config = ServerConfig::from_env();

    // Get port from command line or use default
    if let Some(arg) = env::args().nth(1) {
        match arg.parse() {
            Ok(port) => config.port = port,
            Err(_) => warn!("Invalid port '{}', using {}", arg, config.port),
        }
    }

    let mut service = ChatService::start(config).await?;

    // Errors are already logged by the service; drain the notification channel
    if let Some(mut errors) = service.take_errors() {
        tokio::spawn(async move {
            while let Some(message) = errors.recv().await {
                debug!("Service error notification: {}", message);
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    service.stop().await;

    Ok(())
}
