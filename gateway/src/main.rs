//! Gateway HTTP server.
//!
//! Wires the broadcast bus, the Redis staging store and the frontend sink
//! into one dispatch loop per process, then serves the API.

use courier_core::event_bus::EventBus;
use courier_core::notifier::Notifier;
use courier_core::store::StagingStore;
use courier_redis::RedisStagingStore;
use courier_redpanda::{BusSettings, RedpandaEventBus};
use courier_runtime::{Consolidator, DispatchLoop, MetricsExporter, WaiterRegistry};
use courier_web::ReadinessWatch;
use gateway::{
    config::Config,
    notifier::HttpNotifier,
    server::{AppState, build_router},
    upstream::GraphQlUpstream,
};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing (RUST_LOG wins over LOG_LEVEL)
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.server.log_level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        brokers = %config.broker.brokers,
        topic = %config.broker.topic,
        cache_url = %config.cache.url,
        team_service = %config.upstream.team_service_url,
        rating_service = %config.upstream.rating_service_url,
        "Starting gateway"
    );

    // Metrics
    let mut exporter = MetricsExporter::new();
    exporter.install()?;
    let metrics = Arc::new(exporter);

    // Event bus (one consumer group per process: every replica sees every event)
    let event_bus: Arc<dyn EventBus> = Arc::new(RedpandaEventBus::connect(
        BusSettings::new(&config.broker.brokers)
            .group_prefix(&config.broker.consumer_group_prefix),
    )?);

    // Staging store and frontend sink
    let store: Arc<dyn StagingStore> =
        Arc::new(RedisStagingStore::new(&config.cache.url, config.cache.fragment_ttl).await?);
    let sink = HttpNotifier::new(&config.upstream.frontend_url, config.upstream.timeout)?;
    info!(url = %sink.url(), "Frontend sink configured");
    let notifier: Arc<dyn Notifier> = Arc::new(sink);

    let registry = WaiterRegistry::new();
    let consolidator = Consolidator::new(&config.cache.domain, store, Arc::clone(&notifier));
    let routes = Arc::new(config.routing_table());
    info!(routes = routes.len(), "Routing table built");

    // Dispatch loop
    let (shutdown_tx, _) = broadcast::channel(1);
    let dispatch = DispatchLoop::new(
        vec![config.broker.topic.clone()],
        event_bus,
        registry.clone(),
        consolidator.clone(),
        Arc::clone(&routes),
    )
    .with_reconnect_backoff(config.broker.reconnect_backoff);
    let readiness = ReadinessWatch::new(dispatch.state());
    let dispatch_handle = dispatch.spawn(shutdown_tx.subscribe());

    // HTTP server
    let state = AppState {
        registry,
        consolidator,
        routes,
        upstream: Arc::new(GraphQlUpstream::new(
            &config.upstream.team_service_url,
            &config.upstream.rating_service_url,
            config.upstream.timeout,
        )?),
        notifier,
        readiness,
        metrics,
        await_timeout: config.correlation.await_timeout,
    };
    let app = build_router(state, &config.server.api_prefix);

    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(address = %addr, api_prefix = %config.server.api_prefix, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop consuming once no request can wait any more
    let _ = shutdown_tx.send(());
    if let Err(e) = dispatch_handle.await {
        error!(error = %e, "Dispatch loop task failed");
    }

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        () = terminate => {
            info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}
