use cell_energy::{
    bridge,
    config::Config,
    decision::HysteresisEngine,
    pipeline::run_ingestion,
    policy::{run_submitter, CoordinatorClient, PolicyClient, DECISION_QUEUE},
    telemetry::FallbackSource,
    ws::{router, AppState, Broadcaster, SubscriptionRegistry},
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("Starting cell-energy service");

    // Load configuration
    let config_path =
        std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config/config.yaml".to_string());

    let config = Config::load(&config_path)?;
    info!("Configuration loaded from: {}", config_path);

    let thresholds = config.thresholds.thresholds()?;
    info!(
        low = thresholds.low(),
        high = thresholds.high(),
        initial_state = ?config.thresholds.initial_state,
        "Hysteresis thresholds configured"
    );

    // Register the PM job; the coordinator decides which topic we read
    let coordinator = match config.coordinator.clone() {
        Some(coordinator) => Some(CoordinatorClient::new(coordinator)?),
        None => None,
    };
    let topic = resolve_topic(&config, coordinator.as_ref()).await;

    let source = FallbackSource::open(config.kafka.as_ref(), topic, config.synthetic.clone());
    let source_mode = source.subscribe_mode();

    // Ingestion → bridge → broadcaster → subscribers
    let (bridge_tx, bridge_rx) = bridge::channel(config.broadcast.bridge_capacity);
    let registry = Arc::new(SubscriptionRegistry::new(config.broadcast.subscriber_buffer));
    let (broadcaster, handle) =
        Broadcaster::new(bridge_rx, registry, config.broadcast.sync_interval());
    let broadcaster_task = tokio::spawn(broadcaster.run());

    let policy = match config.policy.clone() {
        Some(policy) => Some(PolicyClient::new(policy)?),
        None => {
            info!("No policy service configured, decisions will only be logged");
            None
        }
    };
    let (decision_tx, decision_rx) = mpsc::channel(DECISION_QUEUE);
    let submitter_task = tokio::spawn(run_submitter(decision_rx, policy));

    let shutdown = CancellationToken::new();
    let engine = HysteresisEngine::new(thresholds, config.thresholds.initial_state);
    let ingestion_task = tokio::spawn(run_ingestion(
        source,
        engine,
        bridge_tx,
        decision_tx,
        shutdown.clone(),
    ));

    let state = Arc::new(AppState::new(
        handle,
        source_mode,
        config.server.max_connections,
    ));
    let app = router(state);

    // Start HTTP server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("Server ready to accept WebSocket connections");

    let signal_token = shutdown.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            signal_token.cancel();
        })
        .await;

    // Make sure ingestion stops even when the server failed on its own
    shutdown.cancel();

    match ingestion_task.await {
        Ok(stats) => info!(
            received = stats.received,
            processed = stats.processed,
            skipped = stats.skipped,
            decisions = stats.decisions,
            decisions_dropped = stats.decisions_dropped,
            "Ingestion finished"
        ),
        Err(e) => error!("Ingestion task failed: {}", e),
    }

    match broadcaster_task.await {
        Ok(snapshot) => info!(cells = snapshot.len(), "Broadcaster finished"),
        Err(e) => error!("Broadcaster task failed: {}", e),
    }

    if let Err(e) = submitter_task.await {
        error!("Policy submitter task failed: {}", e);
    }

    if let Some(coordinator) = coordinator.as_ref() {
        coordinator.deregister().await;
    }

    served?;
    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "cell_energy=info,tower_http=info".into());

    let json = std::env::var("LOG_FORMAT")
        .map(|f| f.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Topic for the live feed: the coordinator's delivery topic when registration
/// succeeds, otherwise the fixed Kafka topic, if any.
async fn resolve_topic(config: &Config, coordinator: Option<&CoordinatorClient>) -> Option<String> {
    let fixed = config.kafka.as_ref().and_then(|k| k.topic.clone());

    let (Some(coordinator), Some(kafka)) = (coordinator, config.kafka.as_ref()) else {
        return fixed;
    };

    match coordinator.register(&kafka.brokers).await {
        Ok(topic) => Some(topic),
        Err(e) => {
            warn!(error = %e, "PM job registration failed");
            fixed
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
    }
}
