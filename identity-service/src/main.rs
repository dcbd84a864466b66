use identity_service::{
    build_router, config::IdentityConfig, db::MongoAuthEventSink, db::MongoDb, spawn_maintenance,
    AppState, Repositories,
};
use service_core::observability::{init_metrics_recorder, init_tracing};
use service_core::store::{MemoryStore, RedisStore, Store};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;

use identity_service::services::{events::DEFAULT_EVENT_CAPACITY, AuthEventLogger};

#[tokio::main]
async fn main() -> Result<(), service_core::error::AppError> {
    // Load configuration - fail fast if invalid
    let config = IdentityConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    let metrics_handle = init_metrics_recorder()?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting identity service"
    );

    let store: Arc<dyn Store> = match &config.redis.url {
        Some(url) => Arc::new(RedisStore::connect(url, &config.redis.key_prefix).await?),
        None => {
            tracing::warn!("REDIS_URL not set; using in-process store");
            Arc::new(MemoryStore::new())
        }
    };

    let (db, repositories, events) = match &config.mongodb.uri {
        Some(uri) => {
            let db = MongoDb::connect(uri, &config.mongodb.database).await?;
            db.initialize_indexes().await?;
            tracing::info!("Database initialized successfully");

            let events = AuthEventLogger::new(DEFAULT_EVENT_CAPACITY)
                .with_sink(Arc::new(MongoAuthEventSink::new(&db)));
            (Some(db.clone()), Repositories::mongo(&db), events)
        }
        None => {
            tracing::warn!("MONGODB_URI not set; using in-memory repositories");
            (
                None,
                Repositories::in_memory(),
                AuthEventLogger::new(DEFAULT_EVENT_CAPACITY),
            )
        }
    };

    let mut state = AppState::new(config.clone(), store, repositories, Arc::new(events))?
        .with_metrics(metrics_handle);
    if let Some(db) = db {
        state = state.with_db(db);
    }

    let maintenance = spawn_maintenance(state.clone());
    let app = build_router(state).await?;

    let addr: SocketAddr = config.common.bind_address().parse().map_err(|e| {
        service_core::error::AppError::ConfigError(anyhow::anyhow!("Invalid bind address: {}", e))
    })?;

    let service_span = tracing::info_span!(
        "service",
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
    );
    let _guard = service_span.enter();

    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    maintenance.abort();
    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
