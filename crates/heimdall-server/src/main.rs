use anyhow::Result;
use clap::{Parser, Subcommand};
use heimdall_server::config::ServerConfig;
use heimdall_server::{scheduler, AppState};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "heimdall-server", about = "Heimdall control-plane server", version)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// HTTP/WebSocket listen port
    #[arg(long, env = "HEIMDALL_PORT")]
    port: Option<u16>,

    /// Data directory for the SQLite database and server config file
    #[arg(long, env = "HEIMDALL_DATA_DIR")]
    data_dir: Option<std::path::PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "HEIMDALL_LOG")]
    log: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the server (default if no subcommand is given).
    Serve,
    /// Apply pending schema migrations and exit.
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = ServerConfig::new(args.port, args.data_dir, args.log);
    let _log_guard = init_logging(&config)?;

    match args.command {
        Some(Command::Migrate) => {
            AppState::new(config.clone()).await?;
            info!("migrations applied");
        }
        None | Some(Command::Serve) => {
            run_server(config).await?;
        }
    }

    Ok(())
}

/// Stdout plus a daily-rolling log file under `{data_dir}/logs/`,
/// matching the reference daemon's dual-layer `setup_logging`. The
/// returned guard must be held for the process lifetime or the
/// non-blocking file writer drops pending lines on exit.
fn init_logging(config: &ServerConfig) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let log_dir = config.data_dir.join("logs");
    std::fs::create_dir_all(&log_dir)?;
    let file_appender = tracing_appender::rolling::daily(&log_dir, "heimdall-server.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = tracing_subscriber::EnvFilter::new(config.log.clone());
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact())
        .with(tracing_subscriber::fmt::layer().with_writer(file_writer).with_ansi(false))
        .init();

    Ok(guard)
}

async fn run_server(config: ServerConfig) -> Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "heimdall-server starting");
    info!(data_dir = %config.data_dir.display(), port = config.port, "config loaded");

    let port = config.port;
    let state = AppState::new(config).await?;

    let stop = CancellationToken::new();
    let scheduler_handles = scheduler::spawn_all(state.clone(), stop.clone());

    let router = heimdall_server::rest::build_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    stop.cancel();
    for handle in scheduler_handles {
        let _ = handle.await;
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}
