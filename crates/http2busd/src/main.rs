//! http2busd - HTTP-to-bus gateway daemon
//!
//! Serves a route table over HTTP and bridges every matched request onto the
//! message bus.
//!
//! Usage:
//!   http2busd [OPTIONS] [config.toml]
//!
//! Options:
//!   -r, --routes <path>  Load a JSON/YAML route list (repeatable)
//!   -p, --port <port>    Override the listen port
//!   --log-json           Emit logs as JSON
//!
//! If no config file and no route files are given, runs a demo echo route on
//! the in-memory bus. Send SIGHUP to reload routes.

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use http2bus_agent::{AgentConfig, HeartbeatHandle, RoutesAgent};
use http2bus_api::{create_router, RouteComposer};
use http2bus_core::{MemoryBus, MessageBus, ResponsePayload, Route};
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{AgentSection, GatewayConfig};

/// Namespace answered by the demo echo responder
const DEMO_NAMESPACE: &str = "http2bus:demo:echo";

/// Parsed command-line arguments
struct Args {
    /// Gateway config file (TOML)
    config_path: Option<PathBuf>,
    /// Route list files (JSON or YAML)
    route_files: Vec<PathBuf>,
    port: Option<u16>,
    log_json: bool,
    /// Reported once logging is up
    unknown: Vec<String>,
}

impl Args {
    fn is_demo(&self) -> bool {
        self.config_path.is_none() && self.route_files.is_empty()
    }
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut result = Args {
        config_path: None,
        route_files: Vec::new(),
        port: None,
        log_json: false,
        unknown: Vec::new(),
    };

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--routes" | "-r" => {
                if i + 1 < args.len() {
                    result.route_files.push(PathBuf::from(&args[i + 1]));
                    i += 2;
                } else {
                    result.unknown.push("--routes (missing path)".to_string());
                    i += 1;
                }
            }
            "--port" | "-p" => {
                match args.get(i + 1).and_then(|p| p.parse().ok()) {
                    Some(port) => result.port = Some(port),
                    None => result.unknown.push("--port (missing or invalid)".to_string()),
                }
                i += 2;
            }
            "--log-json" => {
                result.log_json = true;
                i += 1;
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            arg if !arg.starts_with('-') => {
                // Positional argument = config file
                result.config_path = Some(PathBuf::from(arg));
                i += 1;
            }
            _ => {
                result.unknown.push(args[i].clone());
                i += 1;
            }
        }
    }

    result
}

fn print_help() {
    eprintln!(
        r#"http2busd - HTTP-to-bus gateway daemon

Usage: http2busd [OPTIONS] [config.toml]

Options:
  -r, --routes <path>  Load a JSON/YAML route list
                       Can be specified multiple times
  -p, --port <port>    Override the listen port
      --log-json       Emit logs as JSON
  -h, --help           Print this help message

Examples:
  # Run the demo echo route
  http2busd

  # Run with config file
  http2busd config/http2busd.toml

  # Add route files on top of the config
  http2busd -r routes/users.json -r routes/orders.yaml config.toml
"#
    );
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "http2busd=info,http2bus_api=info,http2bus_agent=info,http2bus_core=info".into()
    });
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = parse_args();
    init_logging(args.log_json);

    for arg in &args.unknown {
        tracing::warn!("Unknown argument: {}", arg);
    }
    tracing::info!("Starting http2busd (HTTP-to-bus gateway)");

    let bus = Arc::new(MemoryBus::new());
    let (config, routes) = load_routes(&args)?;
    if args.is_demo() {
        tracing::info!("No config or route files provided, serving demo echo route");
        spawn_echo_responder(&bus);
    }

    let bus: Arc<dyn MessageBus> = bus;
    let composer = Arc::new(RouteComposer::new(Arc::clone(&bus), config.bridge_options()));
    composer.load(&routes)?;

    let agent = match &config.agent {
        Some(section) => Some(start_agent(section, Arc::clone(&bus)).await?),
        None => None,
    };

    #[cfg(unix)]
    spawn_reload_handler(
        args,
        Arc::clone(&composer),
        agent.as_ref().map(|(agent, _)| Arc::clone(agent)),
    )?;

    let app = create_router(Arc::clone(&composer));

    let port = config.server.port;
    let listener = tokio::net::TcpListener::bind((config.server.host.as_str(), port)).await?;
    tracing::info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    drop(agent);
    composer.reset();
    tracing::info!("Shut down");
    Ok(())
}

/// Build the gateway config and its validated route list from the arguments
fn load_routes(args: &Args) -> anyhow::Result<(GatewayConfig, Vec<Route>)> {
    let mut config = match &args.config_path {
        Some(path) => {
            tracing::info!("Loading config from: {}", path.display());
            GatewayConfig::load(path)?
        }
        None => GatewayConfig::default(),
    };
    if let Some(port) = args.port {
        config.server.port = port;
    }

    if args.is_demo() {
        config.routes = vec![json!({
            "bus": { "namespace": DEMO_NAMESPACE },
            "http": { "path": "/echo", "methods": ["get", "post", "put", "delete"] }
        })];
    }

    let routes = config.resolve_routes(&args.route_files)?;
    tracing::info!("Loaded {} routes", routes.len());
    Ok((config, routes))
}

/// Answer demo requests with a description of what arrived
fn spawn_echo_responder(bus: &MemoryBus) {
    let mut requests = bus.listen(DEMO_NAMESPACE);
    tokio::spawn(async move {
        while let Some(request) = requests.recv().await {
            let payload = &request.message.payload;
            let echo = json!({
                "method": payload.method,
                "url": payload.url,
                "query": payload.query,
                "params": payload.params,
                "body": payload.body,
                "tags": request.message.tags,
            });
            request.respond(ResponsePayload::default().body(echo)).await;
        }
    });
}

async fn start_agent(
    section: &AgentSection,
    bus: Arc<dyn MessageBus>,
) -> anyhow::Result<(Arc<RoutesAgent>, HeartbeatHandle)> {
    let agent = Arc::new(RoutesAgent::create(
        AgentConfig {
            name: section.name.clone(),
            ttl: section.ttl,
            updated_at: None,
        },
        bus,
    ));
    agent.load(section.routes()?).await?;

    let heartbeat = agent.start_heartbeat(Duration::from_millis(section.heartbeat_interval_ms));
    tracing::info!("Announcing routes as {:?}", section.name);
    Ok((agent, heartbeat))
}

#[cfg(unix)]
fn spawn_reload_handler(
    args: Args,
    composer: Arc<RouteComposer>,
    agent: Option<Arc<RoutesAgent>>,
) -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup())?;
    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            tracing::info!("SIGHUP received, reloading routes");
            if let Err(e) = reload(&args, &composer, agent.as_deref()).await {
                tracing::error!("Reload failed, keeping active routes: {:#}", e);
            }
        }
    });
    Ok(())
}

#[cfg(unix)]
async fn reload(
    args: &Args,
    composer: &RouteComposer,
    agent: Option<&RoutesAgent>,
) -> anyhow::Result<()> {
    let (config, routes) = load_routes(args)?;
    composer.load(&routes)?;

    if let (Some(agent), Some(section)) = (agent, &config.agent) {
        agent.load(section.routes()?).await?;
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
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
    tracing::info!("Shutdown signal received");
}
