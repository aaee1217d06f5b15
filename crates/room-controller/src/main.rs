//! Room Controller
//!
//! Stateful WebSocket signaling server for multi-party media rooms.
//!
//! # Startup flow
//!
//! 1. Load configuration from environment
//! 2. Create the media engine and the worker pool
//! 3. Spawn the room manager actor
//! 4. Serve the gateway (signaling WebSocket + admin/health HTTP)
//! 5. Wait for a shutdown signal, or exit(1) when a worker dies

#![warn(clippy::pedantic)]

use std::sync::Arc;

use media_engine::loopback::LoopbackEngine;
use media_engine::MediaEngine;
use room_controller::actors::RoomManagerHandle;
use room_controller::config::Config;
use room_controller::gateway::{self, GatewayState};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "room_controller=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting room controller");

    let config = Arc::new(Config::from_env()?);

    info!(
        listen_address = %config.listen_address,
        num_workers = config.num_workers,
        rtc_listen_ip = %config.rtc_listen_ip,
        rtc_port_range = %format!("{}-{}", config.rtc_min_port, config.rtc_max_port),
        consumer_replicas = config.consumer_replicas,
        "Configuration loaded successfully"
    );

    let engine: Arc<dyn MediaEngine> = Arc::new(LoopbackEngine::new());
    info!(engine_version = %engine.version(), "media engine ready");

    let manager = RoomManagerHandle::new(Arc::clone(&config), engine).await?;
    let fatal = manager.fatal_token();

    let app = gateway::router(GatewayState {
        manager: manager.clone(),
    });

    let listener = tokio::net::TcpListener::bind(&config.listen_address).await?;
    info!(address = %config.listen_address, "gateway listening");

    let server = tokio::spawn(async move { axum::serve(listener, app).await });

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("shutdown signal received");
            manager.shutdown().await;
        }
        () = fatal.cancelled() => {
            error!("media worker died, exiting");
            std::process::exit(1);
        }
        result = server => {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "gateway server failed"),
                Err(e) => error!(error = %e, "gateway task failed"),
            }
        }
    }

    info!("room controller stopped");
    Ok(())
}
