//! AlertWatch CLI
//!
//! Command-line interface for the AlertWatch alerting engine.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio_util::sync::CancellationToken;
use tracing::info;

use alertwatch::alerting::{
    AlertEngine, ConditionEvaluator, EngineHandle, HttpTransport, NotificationRouter,
};
use alertwatch::api::{AppState, HttpServer};
use alertwatch::config::LoggingConfig;
use alertwatch::metric_store::InMemoryMetricStore;
use alertwatch::rules_file::load_rules_file;
use alertwatch::Config;

/// AlertWatch - Metric alerting with escalation and notification routing
#[derive(Parser)]
#[command(name = "alertwatch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "ALERTWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (for commands that support it)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, Default, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the alert engine and HTTP API
    Serve {
        /// HTTP API port (overrides the config file)
        #[arg(long, env = "ALERTWATCH_HTTP_PORT")]
        http_port: Option<u16>,

        /// Address to bind (overrides the config file)
        #[arg(long)]
        host: Option<String>,

        /// JSON file with alert rules to load at startup
        #[arg(long)]
        rules: Option<PathBuf>,

        /// Start with periodic evaluation paused
        #[arg(long)]
        paused: bool,
    },

    /// Validate a rules file and print a summary
    CheckRules {
        /// Rules file to check
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // .env is optional
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    init_logging(&config.logging, cli.verbose);

    let result = match cli.command {
        Commands::Serve {
            http_port,
            host,
            rules,
            paused,
        } => run_serve(config, http_port, host, rules, paused).await,
        Commands::CheckRules { path } => run_check_rules(&path, cli.format),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(logging: &LoggingConfig, verbose: bool) {
    let log_level = if verbose { "debug" } else { logging.level.as_str() };
    let builder = tracing_subscriber::fmt().with_env_filter(
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
    );

    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run_serve(
    config: Config,
    http_port: Option<u16>,
    host: Option<String>,
    rules: Option<PathBuf>,
    paused: bool,
) -> anyhow::Result<()> {
    let prometheus = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install metrics recorder")?;

    let metrics = Arc::new(InMemoryMetricStore::default());
    let transport = Arc::new(HttpTransport::new(&config.notifications)?);
    let engine = AlertEngine::new(
        ConditionEvaluator::new(metrics.clone(), config.engine.query_timeout),
        NotificationRouter::new(transport, config.notifications.send_timeout),
        config.engine.history_capacity,
    );

    let (engine, engine_task) = EngineHandle::spawn(
        engine,
        config.engine.tick_interval,
        config.engine.start_enabled && !paused,
    );

    if let Some(path) = rules {
        let loaded = load_rules_file(&path)
            .with_context(|| format!("failed to load rules from {}", path.display()))?;
        let count = loaded.len();
        for rule in loaded {
            engine.add_rule(rule).await?;
        }
        info!(count, path = %path.display(), "Loaded alert rules");
    }

    let addr = format!(
        "{}:{}",
        host.unwrap_or(config.server.host),
        http_port.unwrap_or(config.server.http_port)
    );
    info!(
        addr = %addr,
        tick_interval = ?config.engine.tick_interval,
        paused,
        "Starting AlertWatch"
    );

    let shutdown = CancellationToken::new();
    let server = HttpServer::new(AppState {
        engine: engine.clone(),
        metrics,
        prometheus: Some(prometheus),
    });
    let server_shutdown = shutdown.clone();
    let mut server_task = tokio::spawn(async move { server.serve(&addr, server_shutdown).await });

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Shutting down...");
        }
        // server exited on its own, e.g. the bind failed
        result = &mut server_task => {
            engine.shutdown();
            result??;
            return Ok(());
        }
    }

    shutdown.cancel();
    engine.shutdown();
    server_task.await??;
    engine_task.await?;

    Ok(())
}

fn run_check_rules(path: &Path, format: OutputFormat) -> anyhow::Result<()> {
    let rules = load_rules_file(path)
        .with_context(|| format!("invalid rules file {}", path.display()))?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&rules)?);
        }
        OutputFormat::Text => {
            println!("{} rule(s) OK in {}", rules.len(), path.display());
            println!();
            println!(
                "{:<24} {:<10} {:<10} {:>7} {:>10}",
                "ID", "KIND", "SEVERITY", "TARGETS", "ESCALATION"
            );
            for rule in &rules {
                let steps = rule.escalation.as_ref().map_or(0, |p| p.steps.len());
                println!(
                    "{:<24} {:<10} {:<10} {:>7} {:>10}",
                    rule.id,
                    rule.condition.kind(),
                    rule.severity.as_str(),
                    rule.notifications.len(),
                    steps
                );
            }
        }
    }
    Ok(())
}
