use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::HeaderValue;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use cartflow_api::config::{init_tracing, load_config};
use cartflow_api::events::{self, EventSender};
use cartflow_api::gateway::{PaymentGateway, StripeGateway};
use cartflow_api::handlers::AppServices;
use cartflow_api::{app_router, db, AppState};

const REQUEST_TIMEOUT_SECS: u64 = 30;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;

    init_tracing(&config.log_level, config.log_json);
    info!(
        environment = %config.environment,
        "Starting cartflow-api v{}",
        env!("CARGO_PKG_VERSION")
    );

    let db_pool = db::establish_connection_from_app_config(&config).await?;
    db::run_migrations(&db_pool).await?;
    let db_pool = Arc::new(db_pool);

    // Redis is optional; without it webhook dedup falls back to the database
    // unique constraint alone.
    let redis_client = match &config.redis_url {
        Some(url) => match redis::Client::open(url.clone()) {
            Ok(client) => {
                info!("Redis client configured");
                Some(Arc::new(client))
            }
            Err(e) => {
                warn!("Invalid Redis URL, continuing without cache: {}", e);
                None
            }
        },
        None => {
            info!("No Redis URL configured; webhook dedup cache disabled");
            None
        }
    };

    let (event_tx, event_rx) = mpsc::channel(config.event_channel_capacity);
    let event_sender = Arc::new(EventSender::new(event_tx));
    tokio::spawn(events::process_events(event_rx));

    let gateway: Arc<dyn PaymentGateway> = Arc::new(StripeGateway::new(&config.checkout));
    let services = AppServices::new(
        db_pool.clone(),
        event_sender.clone(),
        gateway,
        &config,
    );

    let state = Arc::new(AppState {
        db: db_pool.clone(),
        config: config.clone(),
        event_sender: event_sender.clone(),
        services: services.clone(),
        redis: redis_client,
    });

    events::outbox::start_worker(
        db_pool,
        services.fulfillment.clone(),
        event_sender,
        Duration::from_secs(config.fulfillment_poll_secs),
    );

    let cors_layer = if config.has_cors_allowed_origins() {
        let origins: Vec<HeaderValue> = config
            .cors_allowed_origins
            .as_deref()
            .unwrap_or("")
            .split(',')
            .filter_map(|origin| {
                let trimmed = origin.trim();
                if trimmed.is_empty() {
                    return None;
                }
                match trimmed.parse::<HeaderValue>() {
                    Ok(value) => Some(value),
                    Err(_) => {
                        warn!("Ignoring invalid CORS origin: {}", trimmed);
                        None
                    }
                }
            })
            .collect();

        if origins.is_empty() {
            error!("CORS origins were configured but none parsed as valid header values");
            return Err("invalid APP__CORS_ALLOWED_ORIGINS".into());
        }

        info!(origin_count = origins.len(), "CORS restricted to configured origins");
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    } else if config.should_allow_permissive_cors() {
        info!("CORS permissive mode enabled");
        CorsLayer::permissive()
    } else {
        error!("No CORS origins configured for a non-development environment");
        return Err("missing APP__CORS_ALLOWED_ORIGINS".into());
    };

    let app = app_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(REQUEST_TIMEOUT_SECS)))
        .layer(cors_layer);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("invalid host/port in configuration")?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
