mod config;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use clap::{Parser, Subcommand};
use console::style;
use tracing_subscriber::{fmt, EnvFilter};

use pgbridge_api::state::AppState;
use pgbridge_api::HealthMonitor;
use pgbridge_core::{
    Bridge, DestinationKind, KinesisStreamClient, PgSource, RouteTable, SinkSet, SnsTopicClient,
    StreamSink, TopicSink, WebhookSink,
};

use crate::config::{AppConfig, Overrides};

fn version_string() -> &'static str {
    const VERSION: &str = env!("CARGO_PKG_VERSION");
    const GIT_HASH: &str = env!("GIT_HASH");
    static FULL: OnceLock<String> = OnceLock::new();

    if GIT_HASH.is_empty() {
        VERSION
    } else {
        FULL.get_or_init(|| format!("{VERSION} ({GIT_HASH})"))
    }
}

/// Forward PostgreSQL LISTEN/NOTIFY channels to SNS topics, webhooks or a
/// Kinesis stream.
#[derive(Parser)]
#[command(name = "pg-bridge", version = version_string(), about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    args: BridgeArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Listen and forward notifications (the default).
    Run,
    /// Parse the routing spec and print the resulting table.
    Routes {
        /// Print the table as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

#[derive(clap::Args)]
struct BridgeArgs {
    /// Path to TOML config file. Flags and environment override it.
    #[arg(short, long, global = true, env = "PGB_CONFIG")]
    config: Option<PathBuf>,

    /// Routing spec: `channel|target;channel|target`.
    #[arg(long, global = true, env = "PGB_ROUTES")]
    routes: Option<String>,

    /// PostgreSQL connection URL.
    #[arg(long, global = true, env = "PGB_POSTGRESQL_URL", hide_env_values = true)]
    postgresql_url: Option<String>,

    /// Batch queue capacity; 0 dispatches every notification directly.
    #[arg(long, global = true, env = "PGB_MAX_QUEUESIZE")]
    max_queuesize: Option<usize>,

    /// Path of the health endpoint.
    #[arg(long, global = true, env = "PGB_HEALTH_PATH")]
    health_path: Option<String>,

    /// Port of the health endpoint.
    #[arg(long, global = true, env = "PGB_HEALTH_PORT")]
    health_port: Option<u16>,

    /// Family for non-HTTP targets: `topic` (SNS) or `stream` (Kinesis).
    #[arg(long, global = true, env = "PGB_SINK")]
    sink: Option<String>,

    /// Kinesis stream name, required with `--sink stream`.
    #[arg(long, global = true, env = "PGB_STREAM_NAME")]
    stream_name: Option<String>,

    /// Records buffered before a stream flush.
    #[arg(long, global = true, env = "PGB_STREAM_BUFFER_SIZE")]
    stream_buffer_size: Option<usize>,

    /// Maximum time a record waits in the stream buffer.
    #[arg(long, global = true, env = "PGB_STREAM_FLUSH_INTERVAL_MS")]
    stream_flush_interval_ms: Option<u64>,

    /// Log output: `pretty` or `json`.
    #[arg(long, global = true, env = "PGB_LOG_FORMAT")]
    log_format: Option<String>,
}

impl BridgeArgs {
    fn overrides(&self) -> Overrides {
        Overrides {
            routes: self.routes.clone(),
            postgresql_url: self.postgresql_url.clone(),
            max_queuesize: self.max_queuesize,
            health_path: self.health_path.clone(),
            health_port: self.health_port,
            sink: self.sink.clone(),
            stream_name: self.stream_name.clone(),
            stream_buffer_size: self.stream_buffer_size,
            stream_flush_interval_ms: self.stream_flush_interval_ms,
            log_format: self.log_format.clone(),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli.args) {
        Ok(c) => {
            init_tracing(&c.server.log_format);
            if let Some(path) = &cli.args.config {
                tracing::info!(path = %path.display(), "Loaded config file");
            }
            c
        }
        Err(e) => {
            init_tracing("pretty");
            tracing::error!("{}", e);
            std::process::exit(1);
        }
    };

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config).await,
        Commands::Routes { json } => print_routes(&config, json),
    }
}

fn load_config(args: &BridgeArgs) -> Result<AppConfig, String> {
    let base = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    let config = base.apply(args.overrides());
    config.validate()?;
    Ok(config)
}

fn parse_routes(config: &AppConfig) -> RouteTable {
    let family = match config.sink_family() {
        Ok(f) => f,
        Err(e) => {
            tracing::error!("{}", e);
            std::process::exit(1);
        }
    };
    match RouteTable::parse(config.routes_spec(), family) {
        Ok(table) => table,
        Err(e) => {
            tracing::error!(error = %e, "Invalid routing configuration");
            std::process::exit(1);
        }
    }
}

fn print_routes(config: &AppConfig, json: bool) {
    let table = parse_routes(config);
    let routes = table.routes();

    if json {
        match serde_json::to_string_pretty(&routes) {
            Ok(out) => println!("{}", out),
            Err(e) => {
                tracing::error!(error = %e, "Unable to encode routes");
                std::process::exit(1);
            }
        }
        return;
    }

    println!(
        "{} {}",
        style("pg-bridge").bold(),
        style(version_string()).dim()
    );
    println!("  {} {}", style("routes:").dim(), routes.len());
    println!();
    for route in routes {
        let kind = format!("{:<8}", route.destination.kind.to_string());
        let kind = match route.destination.kind {
            DestinationKind::Webhook => style(kind).cyan(),
            DestinationKind::Topic => style(kind).green(),
            DestinationKind::Stream => style(kind).yellow(),
        };
        println!(
            "  {:<24} {} {}",
            style(&route.channel).bold(),
            kind,
            route.destination.target
        );
    }
}

async fn run(config: AppConfig) {
    let table = parse_routes(&config);
    let source = match config.postgresql_url() {
        Ok(url) => match PgSource::parse(url) {
            Ok(source) => source,
            Err(e) => {
                tracing::error!(error = %e, "Invalid postgresql_url");
                std::process::exit(1);
            }
        },
        Err(e) => {
            tracing::error!("{}", e);
            std::process::exit(1);
        }
    };
    let bridge_config = config.bridge_config();

    for route in table.routes() {
        tracing::info!(
            channel = %route.channel,
            kind = %route.destination.kind,
            target = %route.destination.target,
            "Route configured"
        );
    }

    let mut sinks = SinkSet::new();
    if table.uses(DestinationKind::Webhook) {
        sinks = sinks.with(Arc::new(WebhookSink::from_config(&bridge_config)));
    }
    if table.uses(DestinationKind::Topic) {
        let client = SnsTopicClient::from_env().await;
        sinks = sinks.with(Arc::new(TopicSink::new(Arc::new(client))));
        tracing::info!("SNS topic sink ready");
    }
    let mut stream = None;
    if table.uses(DestinationKind::Stream) {
        let stream_name = config.sink.stream_name.clone().unwrap_or_default();
        let client = KinesisStreamClient::from_env().await;
        let (sink, handle) = StreamSink::spawn(
            Arc::new(client),
            stream_name.clone(),
            bridge_config.stream_buffer_size,
            bridge_config.stream_flush_interval,
        );
        let sink = Arc::new(sink);
        sinks = sinks.with(sink.clone());
        stream = Some((sink, handle));
        tracing::info!(stream = %stream_name, "Kinesis stream sink ready");
    }

    let source = Arc::new(source);
    let bridge = match Bridge::start(source, Arc::new(table), sinks, &bridge_config).await {
        Ok(b) => b,
        Err(e) => {
            tracing::error!(error = %e, "Unable to start listener");
            std::process::exit(1);
        }
    };

    let health = HealthMonitor::new(bridge.probe(), bridge_config.health_poll_interval);
    let health_task = health.spawn();
    let state = AppState::new(health, bridge.stats()).with_version(version_string());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.health_port));
    let health_path = config.server.health_path.clone();
    let (stop_tx, mut stop_rx) = tokio::sync::watch::channel(false);
    let mut server = tokio::spawn(async move {
        let stopped = async move {
            let _ = stop_rx.changed().await;
        };
        pgbridge_api::serve_with_state(addr, state, &health_path, stopped).await
    });

    let bridge_run = bridge.run(pgbridge_api::shutdown_signal());
    tokio::pin!(bridge_run);

    let outcome: Result<(), String> = tokio::select! {
        result = &mut bridge_run => result.map_err(|e| e.to_string()),
        joined = &mut server => Err(match joined {
            Ok(Ok(())) => "health server stopped unexpectedly".to_string(),
            Ok(Err(e)) => format!("health server failed: {}", e),
            Err(e) => format!("health server task failed: {}", e),
        }),
    };

    let _ = stop_tx.send(true);
    health_task.abort();

    if let Some((sink, handle)) = stream {
        match tokio::time::timeout(Duration::from_secs(5), sink.flush()).await {
            Ok(Ok(())) => tracing::info!("Stream buffer flushed"),
            Ok(Err(e)) => tracing::warn!(error = %e, "Unable to flush stream buffer"),
            Err(_) => tracing::warn!("Stream flush did not finish in time"),
        }
        handle.abort();
    }

    if !server.is_finished() {
        if tokio::time::timeout(Duration::from_secs(5), &mut server).await.is_err() {
            tracing::warn!("Health server did not shut down in time, aborting");
            server.abort();
        }
    }

    match outcome {
        Ok(()) => tracing::info!("Shutdown complete"),
        Err(e) => {
            tracing::error!(error = %e, "Bridge stopped");
            std::process::exit(1);
        }
    }
}

fn init_tracing(log_format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match log_format {
        "json" => {
            fmt().with_env_filter(filter).json().init();
        }
        _ => {
            fmt().with_env_filter(filter).init();
        }
    }
}
