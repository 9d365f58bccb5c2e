use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use presence_aggregator::{
    Aggregator, HttpStatusSource, InMemoryUserRepository, PgUserRepository, UpsertEngine,
    UserRepository, build_router,
    config::{AppConfig, DatabaseBackend},
    spawn_sweeper,
    state::AppState,
    sweep_once,
};
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "presence-aggregator")]
#[command(about = "Resolves online users in batches and prunes users not seen recently")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server and the background sweeper (default).
    Serve,
    /// Apply the schema and exit.
    Migrate,
    /// Run a single obsolete-user sweep and exit.
    Sweep,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = AppConfig::from_env().context("failed to load application configuration")?;
    let repository = connect_repository(&config).await?;

    repository
        .init()
        .await
        .context("failed to initialize user schema")?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, repository).await,
        Command::Migrate => {
            info!("schema applied");
            Ok(())
        }
        Command::Sweep => {
            let removed = sweep_once(repository.as_ref(), config.retention_window)
                .await
                .context("sweep failed")?;
            info!(removed, "sweep finished");
            Ok(())
        }
    }
}

async fn connect_repository(config: &AppConfig) -> Result<Arc<dyn UserRepository>> {
    let repository: Arc<dyn UserRepository> = match config.database_backend {
        DatabaseBackend::Postgres => {
            info!("database backend: postgres");
            let pool = PgPoolOptions::new()
                .max_connections(config.db_max_connections)
                .connect(&config.database_url)
                .await
                .context("failed to connect to PostgreSQL")?;
            Arc::new(PgUserRepository::new(pool))
        }
        DatabaseBackend::Memory => {
            info!("database backend: memory");
            Arc::new(InMemoryUserRepository::new())
        }
    };
    Ok(repository)
}

async fn serve(config: AppConfig, repository: Arc<dyn UserRepository>) -> Result<()> {
    let source = HttpStatusSource::new(&config.status_source_url, config.status_request_timeout)
        .context("failed to build status source client")?;
    let aggregator = Aggregator::new(
        Arc::new(source),
        UpsertEngine::new(repository.clone()),
        config.aggregator_settings(),
    );

    let sweeper = spawn_sweeper(repository.clone(), config.sweep_settings());
    let app = build_router(AppState::new(aggregator, repository));

    let addr = config.address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;

    info!(
        address = %addr,
        status_source = %config.status_source_url,
        deadline_ms = config.batch_deadline.as_millis() as u64,
        queue_capacity = config.event_queue_length,
        overrun = %config.deadline_overrun,
        "presence aggregator started"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    sweeper.stop().await.context("failed to stop sweeper")?;
    info!("presence aggregator stopped");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("presence_aggregator=debug,tower_http=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "unable to install Ctrl+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "unable to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
