use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use pricewatch_client::HttpEngineClient;
use pricewatch_core::{
    DispatchConfig, Dispatcher, EngineExecutor, EngineRegistry, JobStore, MemoryEngineRegistry,
    MemoryJobStore,
};
use pricewatch_db::{Database, DatabaseConfig};
use pricewatch_server::config::ServerConfig;
use pricewatch_server::routes;
use pricewatch_server::state::AppState;

/// Request bodies are small JSON documents.
const MAX_BODY_BYTES: usize = 64 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("pricewatch=info".parse()?))
        .with_target(false)
        .init();

    let config = ServerConfig::from_env()?;
    let dispatch = DispatchConfig::from_env()?;

    let mut executor = HttpEngineClient::with_timeout(config.engine_timeout)?;
    if let Some(public_url) = &config.public_url {
        executor = executor.with_callback_base(public_url)?;
    } else {
        tracing::warn!("PRICEWATCH_PUBLIC_URL not set; engines must know the completion endpoint");
    }

    match DatabaseConfig::from_env_optional()? {
        Some(db_config) => {
            let db = Database::connect(&db_config)
                .await
                .context("Failed to connect to PostgreSQL")?;
            db.migrate().await?;
            let dispatcher = Dispatcher::new(db.engine_repo(), db.job_repo(), executor, dispatch);
            serve(config, dispatcher, Some(db)).await
        }
        None => {
            tracing::warn!("DATABASE_URL not set; engines and jobs are kept in memory only");
            let dispatcher = Dispatcher::new(
                MemoryEngineRegistry::new(),
                MemoryJobStore::new(),
                executor,
                dispatch,
            );
            serve(config, dispatcher, None).await
        }
    }
}

async fn serve<R, J, X>(
    config: ServerConfig,
    dispatcher: Dispatcher<R, J, X>,
    db: Option<Database>,
) -> anyhow::Result<()>
where
    R: EngineRegistry,
    J: JobStore,
    X: EngineExecutor,
{
    let (completions, reports) = mpsc::channel(config.completion_buffer);
    let shutdown = CancellationToken::new();

    let consumer = {
        let dispatcher = dispatcher.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { dispatcher.run_completions(reports, shutdown).await })
    };

    let state = Arc::new(AppState {
        control: Arc::new(dispatcher),
        completions,
        db,
    });

    let app = routes::router(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting server on {addr}");
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    consumer.await.context("Completion consumer panicked")?;
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C handler");
    tracing::info!("Shutdown signal received");
}
