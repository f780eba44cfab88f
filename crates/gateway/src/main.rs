//! Gateway service entry point.
//!
//! Loads configuration, wires the hub, tracker, currency transformer,
//! Kafka ingress, and WebSocket frontend, then runs until SIGINT/SIGTERM.

use anyhow::Result;
use external_services::{CfxAdapterClient, CoinDataClient};
use gateway::ws_server::AppState;
use gateway::{
    create_router, teardown_session, CurrencyService, Dispatcher, GatewayConfig, Hub,
    IngressConsumer, SubscriptionTracker, Transformer,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let config = GatewayConfig::from_env()?;
    init_tracing(&config);

    info!(
        env = %config.app.env,
        ws_port = config.websocket_server.port,
        ws_enabled = config.websocket_server.enabled,
        max_connections_per_user = config.websocket_server.max_connections_per_user,
        kafka_group = %config.kafka.consumer_group,
        read_buffer_size = config.websocket_server.read_buffer_size,
        write_buffer_size = config.websocket_server.write_buffer_size,
        "starting gateway service"
    );

    if config.metrics_port != 0 {
        PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], config.metrics_port))
            .install()?;
        info!(port = config.metrics_port, "prometheus exporter started");
    }

    // Core state
    let hub = Arc::new(Hub::new(config.websocket_server.max_connections_per_user));
    let tracker = Arc::new(SubscriptionTracker::new());

    // Currency pipeline
    let coin_data = CoinDataClient::new(
        config.coin_data.host.clone(),
        config.coin_data.cfx_usdt_asset.clone(),
    );
    let currency = Arc::new(CurrencyService::new(
        Arc::new(coin_data),
        config.coin_data.cache_ttl,
    ));
    let transformer = Transformer::new(currency);

    // Kafka ingress
    let dispatcher = Arc::new(Dispatcher::new(hub.clone(), tracker.clone(), transformer));
    let consumer = IngressConsumer::new(&config.kafka, dispatcher)?;
    let (consumer_shutdown_tx, consumer_shutdown_rx) = mpsc::channel(1);
    let consumer_handle = tokio::spawn(async move {
        if let Err(e) = consumer.run(consumer_shutdown_rx).await {
            error!(error = %e, "kafka consumer error");
        }
    });

    // WebSocket frontend
    let resolver = Arc::new(CfxAdapterClient::new(config.coin_cfx_adapter.host.clone()));
    let state = Arc::new(AppState {
        hub: hub.clone(),
        tracker: tracker.clone(),
        resolver,
        settings: config.websocket_server.clone(),
    });

    if config.websocket_server.enabled {
        if !config.websocket_server.tls_cert_path.is_empty() {
            warn!("TLS paths configured but termination is delegated to the edge proxy; serving plaintext");
        }

        let app = create_router(state);
        let addr = SocketAddr::from(([0, 0, 0, 0], config.websocket_server.port));
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "gateway listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
    } else {
        warn!("websocket server disabled, running ingress only");
        shutdown_signal().await;
    }

    info!("shutting down");

    let _ = consumer_shutdown_tx.send(()).await;

    // Close every live session; pumps observe the closed queues and exit.
    for session in hub.sessions() {
        teardown_session(&hub, &tracker, &session);
    }

    if timeout(config.websocket_server.shutdown_timeout, consumer_handle)
        .await
        .is_err()
    {
        warn!("kafka consumer did not stop within the shutdown timeout");
    }

    info!("shutdown complete");
    Ok(())
}

fn init_tracing(config: &GatewayConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.app.log_level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.app.env == "production" {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C"),
        _ = terminate => info!("received terminate signal"),
    }
}
