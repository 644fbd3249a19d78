use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use serine_core::agent::{ChatPipeline, Stores};
use serine_core::config::{self, Config};
use serine_core::provider::{self, LlmProvider};
use serine_core::service::accounts::{AccountStore, InMemoryAccountStore};
use serine_core::util::{mask_secret, SystemClock};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(
    name = "serine",
    about = "serine - knowledge-grounded chatbot backend",
    version = serine_core::VERSION,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API
    Serve {
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
        /// Bind address (overrides config)
        #[arg(long)]
        host: Option<String>,
    },
    /// Write a default configuration file
    Onboard,
    /// Show resolved configuration
    Status,
    /// Apply database migrations
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("serine=info,serine_core=info,tower_http=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port, host } => cmd_serve(port, host).await?,
        Commands::Onboard => cmd_onboard()?,
        Commands::Status => cmd_status(),
        Commands::Migrate => cmd_migrate().await?,
    }

    Ok(())
}

// ====== Commands ======

fn cmd_onboard() -> Result<()> {
    let config_path = config::get_config_path();

    if config_path.exists() {
        println!("Config already exists at {}", config_path.display());
        println!("Delete it first to re-onboard.");
        return Ok(());
    }

    let cfg = Config::default();
    config::save_config(&cfg, None)?;
    println!("Created config at {}", config_path.display());

    println!("\nserine is ready!");
    println!("\nNext steps:");
    println!("  1. Add a Gemini or OpenRouter API key to {}", config_path.display());
    println!("     (or export GEMINI_API_KEY / OPENROUTER_API_KEY)");
    println!("  2. Optionally set DATABASE_URL and run: serine migrate");
    println!("  3. Start the API: serine serve");
    Ok(())
}

fn cmd_status() {
    let config_path = config::get_config_path();
    let cfg = config::load_config_from_env();

    println!("serine {} ({})\n", serine_core::VERSION, serine_core::GIT_HASH);
    println!(
        "Config: {} {}",
        config_path.display(),
        if config_path.exists() { "✓" } else { "✗" }
    );
    println!("Model: {}", cfg.chat.model);
    println!("Scoring: {:?} (threshold {}, top {})", cfg.chat.scoring, cfg.chat.similarity_threshold, cfg.chat.top_k);
    println!("Gemini API: {}", mask_secret(&cfg.providers.gemini.api_key));
    println!("OpenRouter API: {}", mask_secret(&cfg.providers.openrouter.api_key));
    println!(
        "Database: {}",
        if cfg.database.url.is_empty() {
            "in-memory".to_string()
        } else {
            mask_secret(&cfg.database.url)
        }
    );
    println!("Webhook secret: {}", mask_secret(&cfg.billing.webhook_secret));
    println!(
        "Billing: store {}, {} variants",
        cfg.billing.store_id.as_deref().unwrap_or("(not set)"),
        cfg.billing.variants.len()
    );
    println!("Listen: {}:{}", cfg.server.host, cfg.server.port);
}

fn build_provider(cfg: &Config) -> Arc<dyn LlmProvider> {
    let model = &cfg.chat.model;
    let api_key = match cfg.get_api_key(Some(model)) {
        Some(key) => key,
        None => {
            warn!("No API key configured; generated replies will fall back to the apology text");
            ""
        }
    };
    Arc::from(provider::create_provider(api_key, cfg.get_api_base(Some(model)), model))
}

#[cfg(feature = "postgres-backend")]
async fn build_stores(cfg: &Config) -> Result<(Stores, Arc<dyn AccountStore>)> {
    if cfg.database.url.is_empty() {
        info!("DATABASE_URL not set, using in-memory stores");
        return Ok(in_memory_stores(cfg));
    }
    let db = serine_core::db::Database::connect(&cfg.database).await?;
    db.migrate().await?;
    Ok((db.stores(cfg.chat.scoring), Arc::new(db.accounts())))
}

#[cfg(not(feature = "postgres-backend"))]
async fn build_stores(cfg: &Config) -> Result<(Stores, Arc<dyn AccountStore>)> {
    if !cfg.database.url.is_empty() {
        warn!("DATABASE_URL is set but serine was built without postgres-backend; using in-memory stores");
    }
    Ok(in_memory_stores(cfg))
}

fn in_memory_stores(cfg: &Config) -> (Stores, Arc<dyn AccountStore>) {
    (
        Stores::in_memory(cfg.chat.scoring, Arc::new(SystemClock)),
        Arc::new(InMemoryAccountStore::new()),
    )
}

#[cfg(feature = "http-api")]
async fn cmd_serve(port: Option<u16>, host: Option<String>) -> Result<()> {
    use serine_core::service::http::{serve, AppState};

    let mut cfg = config::load_config_from_env();
    if let Some(port) = port {
        cfg.server.port = port;
    }
    if let Some(host) = host {
        cfg.server.host = host;
    }

    let provider = build_provider(&cfg);
    let (stores, accounts) = build_stores(&cfg).await?;
    let pipeline = Arc::new(ChatPipeline::new(stores, provider, &cfg.chat));

    let addr = format!("{}:{}", cfg.server.host, cfg.server.port);
    info!("Starting serine {} on {} (model {})", serine_core::VERSION, addr, cfg.chat.model);
    let state = Arc::new(AppState::new(cfg, pipeline, accounts));
    serve(&addr, state).await
}

#[cfg(not(feature = "http-api"))]
async fn cmd_serve(_port: Option<u16>, _host: Option<String>) -> Result<()> {
    anyhow::bail!("serine was built without the http-api feature")
}

#[cfg(feature = "postgres-backend")]
async fn cmd_migrate() -> Result<()> {
    let cfg = config::load_config_from_env();
    if cfg.database.url.is_empty() {
        anyhow::bail!("DATABASE_URL is not set");
    }
    let db = serine_core::db::Database::connect(&cfg.database).await?;
    db.migrate().await?;
    println!("Migrations applied.");
    Ok(())
}

#[cfg(not(feature = "postgres-backend"))]
async fn cmd_migrate() -> Result<()> {
    anyhow::bail!("serine was built without the postgres-backend feature")
}
