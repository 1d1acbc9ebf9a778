use std::collections::HashMap;
use std::io::{self, Write as _};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use heimdall_agent::config::default_config_dir;
use heimdall_agent::{remote_control, service, AgentConfig, Orchestrator};
use heimdall_types::ids::AppGroupId;
use heimdall_types::rules::{GroupLimit, ResolvedRules};
use tracing::info;

/// Heimdall device agent: samples the foreground application, applies
/// the rules the control plane resolves, and enforces them locally.
#[derive(Parser)]
#[command(name = "heimdall-agent", version, about)]
struct Args {
    /// Interactively store the server URL and device token issued by the parent portal.
    #[arg(long)]
    register: bool,

    /// Run against a fixed in-memory rule set with no server connection.
    #[arg(long)]
    demo: bool,

    /// Expose a loopback HTTP control surface for scripted testing.
    #[arg(long)]
    remote_control: bool,

    #[arg(long, default_value_t = 9876)]
    remote_port: u16,

    /// Register (if needed) and hand off to the host OS service manager, then exit.
    #[arg(long)]
    service: bool,

    #[arg(short = 'v', long)]
    verbose: bool,

    #[arg(long, env = "HEIMDALL_CONFIG_DIR")]
    config_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("heimdall_agent={level},heimdall_types={level}"))
        .compact()
        .init();

    let config_dir = args.config_dir.clone().unwrap_or_else(default_config_dir);

    if args.register {
        return run_register(&config_dir);
    }

    if args.service {
        return service::install_and_start();
    }

    if args.demo {
        return run_demo().await;
    }

    run_agent(config_dir, args.remote_control, args.remote_port).await
}

/// Prompts for the server URL and device token a parent issues through
/// the portal, then persists them (§4.7 "Environment overrides" still
/// apply on top of this at every subsequent load).
fn run_register(config_dir: &std::path::Path) -> Result<()> {
    let mut config = AgentConfig::load(config_dir).unwrap_or_default();

    config.server_url = prompt("Server URL (e.g. https://heimdall.example)")?;
    config.device_token = prompt("Device token")?;
    config.device_name = prompt("Device name")?;

    let device_id = prompt("Device id (uuid)")?;
    config.device_id = Some(device_id.parse().context("device id must be a UUID")?);

    let child_id = prompt("Child id (uuid)")?;
    config.child_id = Some(child_id.parse().context("child id must be a UUID")?);

    config.save(config_dir)?;
    println!("Registered. Configuration saved under {}", config_dir.display());
    Ok(())
}

fn prompt(label: &str) -> Result<String> {
    print!("{label}: ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

/// Runs the agent against its real configuration and server.
async fn run_agent(config_dir: PathBuf, remote_control_enabled: bool, remote_port: u16) -> Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "heimdall-agent starting");

    let orchestrator = Orchestrator::new(config_dir).await?;
    let stop = orchestrator.stop_signal();

    if remote_control_enabled {
        let router = remote_control::build_router(orchestrator.clone());
        let addr = std::net::SocketAddr::from(([127, 0, 0, 1], remote_port));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(%addr, "remote control listening");
        tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, router).await {
                tracing::error!(%err, "remote control server stopped");
            }
        });
    }

    let run_handle = tokio::spawn(orchestrator.run());

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
        result = run_handle => {
            return result.context("orchestrator task panicked")?;
        }
    }

    stop.cancel();
    Ok(())
}

/// `--demo`: samples the foreground application and enforces a fixed
/// in-memory rule set, with no REST/WebSocket traffic at all.
async fn run_demo() -> Result<()> {
    info!("running in demo mode: in-memory rules, no server connection");

    let monitor = heimdall_agent::monitor::ProcessMonitor::new();
    let blocker = heimdall_agent::blocker::AppBlocker::new();

    let demo_group = AppGroupId::new();
    let rules = ResolvedRules {
        day_type: "weekday".to_string(),
        time_windows: Vec::new(),
        group_limits: vec![GroupLimit {
            group_id: demo_group,
            max_minutes: 1,
            used_minutes: 0,
        }],
        daily_limit_minutes: None,
        remaining_minutes: None,
        active_tans: Vec::new(),
        coupled_devices: Vec::new(),
        shared_budget: false,
        totp_config: None,
        app_group_map: HashMap::from([("dummy.exe".to_string(), demo_group)]),
    };
    info!(max_minutes = rules.group_limits[0].max_minutes, "demo rule loaded: blocks dummy.exe after 1 minute of use");

    let monitor_group_map = HashMap::from([("dummy.exe".to_string(), demo_group.as_uuid())]);

    let mut used_seconds: i64 = 0;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = tokio::time::sleep(Duration::from_secs(2)) => {
                if let Some((old, new)) = monitor.sample(&monitor_group_map) {
                    info!(?old, ?new, "demo session transition");
                }

                if monitor.current_session().is_some() {
                    used_seconds += 2;
                }

                let used_minutes = used_seconds / 60;
                if used_minutes >= rules.group_limits[0].max_minutes {
                    blocker.block_group(demo_group);
                }

                if let Some(event) = blocker.enforce(monitor.current_session().as_ref()).await {
                    info!(executable = %event.executable, "demo blocked application");
                }
            }
        }
    }

    Ok(())
}
