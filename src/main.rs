//! Hybrid router - command line entry point

use clap::{Parser, Subcommand};
use hybrid_router::config::RouterConfig;
use hybrid_router::embedding::{create_embedding_provider, CacheSettings, EmbeddingCache};
use hybrid_router::observability::{init_default_logging, init_logging, metrics, LogFormat};
use hybrid_router::routing::{
    CommandHandler, HandlerRegistry, HandlerResponse, RouterOrchestrator, RoutingDecision,
};
use serde::Serialize;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{error, info, warn, Level};
use uuid::Uuid;

/// Routes natural-language queries to downstream handlers
#[derive(Parser)]
#[command(name = "hybrid-router")]
#[command(about = "Hybrid multi-signal query router")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "HYBRID_ROUTER_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace with spans)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Route one query and print the decision as JSON
    Route {
        /// Session the query belongs to; a new one is generated when omitted
        #[arg(long)]
        session: Option<String>,
        /// Query text
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
    },
    /// Route queries read line by line from stdin, one turn each
    Chat {
        #[arg(long)]
        session: Option<String>,
    },
    /// Validate configuration
    Config {
        /// Show the effective configuration
        #[arg(long)]
        show: bool,
    },
    /// Manage the persistent embedding cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Embed every exemplar and write the cache file
    Warm,
    /// Remove every entry and the cache file
    Clear,
}

#[derive(Serialize)]
struct RouteOutput<'a> {
    query: &'a str,
    decision: &'a RoutingDecision,
    response: Option<HandlerResponse>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.verbose {
        0 => init_default_logging(),
        1 => init_logging(Level::DEBUG, LogFormat::Pretty, false),
        _ => init_logging(Level::TRACE, LogFormat::Pretty, true),
    }

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Route { session, query } => {
            route_once(&config, &session_or_new(session), &query.join(" ")).await
        }
        Commands::Chat { session } => chat(&config, &session_or_new(session)).await,
        Commands::Config { show } => handle_config_command(&config, show),
        Commands::Cache { action } => handle_cache_command(&config, action).await,
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn load_configuration(config_path: &Option<PathBuf>) -> Result<RouterConfig, Box<dyn std::error::Error>> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(RouterConfig::load_from_file(path)?)
        }
        None => {
            for path_str in ["router.toml", "config/router.toml"] {
                let path = PathBuf::from(path_str);
                if path.exists() {
                    info!("Loading configuration from: {}", path.display());
                    return Ok(RouterConfig::load_from_file(&path)?);
                }
            }
            info!("No configuration file found, using defaults");
            Ok(RouterConfig::default())
        }
    }
}

fn session_or_new(session: Option<String>) -> String {
    session.unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn build_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register(Arc::new(CommandHandler));
    registry
}

async fn route_and_print(
    router: &RouterOrchestrator,
    registry: &HandlerRegistry,
    session: &str,
    query: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let decision = router.route(query, session).await;
    // Only the built-in command handler lives in this binary
    let response = match registry.dispatch(query, &decision).await {
        Ok(response) if response != HandlerResponse::default() => Some(response),
        Ok(_) => None,
        Err(e) => {
            tracing::debug!(error = %e, "No local handler");
            None
        }
    };
    let output = RouteOutput {
        query,
        decision: &decision,
        response,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn route_once(
    config: &RouterConfig,
    session: &str,
    query: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let router = RouterOrchestrator::from_config(config).await?;
    let registry = build_registry();

    let result = route_and_print(&router, &registry, session, query).await;
    flush_cache(router.cache()).await;
    result
}

async fn chat(config: &RouterConfig, session: &str) -> Result<(), Box<dyn std::error::Error>> {
    let router = RouterOrchestrator::from_config(config).await?;
    let registry = build_registry();

    let flusher = config
        .cache
        .flush_interval_secs
        .map(|secs| router.cache().spawn_periodic_flush(Duration::from_secs(secs)));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    info!(session, "Reading queries from stdin, Ctrl-C to stop");

    let result = loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received Ctrl-C, shutting down");
                break Ok(());
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let query = line.trim();
                    if query.is_empty() {
                        continue;
                    }
                    if let Err(e) = route_and_print(&router, &registry, session, query).await {
                        break Err(e);
                    }
                }
                Ok(None) => break Ok(()),
                Err(e) => break Err(e.into()),
            },
        }
    };

    if let Some(flusher) = flusher {
        flusher.abort();
    }
    flush_cache(router.cache()).await;

    let stats = router.sessions().stats().await;
    info!(
        sessions = stats.total_sessions,
        turns = stats.total_turns,
        metrics = %serde_json::to_string(&metrics().snapshot()).unwrap_or_default(),
        "Chat finished"
    );
    result
}

fn handle_config_command(config: &RouterConfig, show: bool) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;
    if show {
        println!("{}", toml::to_string_pretty(config)?);
    }
    info!("Configuration validation complete");
    Ok(())
}

async fn handle_cache_command(
    config: &RouterConfig,
    action: CacheAction,
) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        CacheAction::Warm => {
            let router = RouterOrchestrator::from_config(config).await?;
            let written = router.cache().flush().await?;
            println!("Embedding cache warmed: {written} entries");
        }
        CacheAction::Clear => {
            let provider = create_embedding_provider(config)?;
            let cache = EmbeddingCache::new(provider, CacheSettings::from(config));
            cache.clear().await?;
            println!("Embedding cache cleared");
        }
    }
    Ok(())
}

async fn flush_cache(cache: &EmbeddingCache) {
    match cache.flush_if_dirty().await {
        Ok(0) => {}
        Ok(entries) => info!(entries, "Embedding cache flushed"),
        Err(e) => warn!(error = %e.sanitized(), "Failed to flush embedding cache"),
    }
}
