//! Strata CLI - Command line interface for the multi-provider storage engine.
//!
//! Every command builds an engine from the configuration file, runs one
//! operation and flushes pending events before exiting.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use strata_common::{ObjectKey, OwnerId, SecretString};
use strata_engine::{
    HttpTelemetrySink, ProviderConfig, ProviderKind, ProviderLimits, StorageEngine, StrataConfig,
    TelemetrySink, TracingSink, TransferRequest,
};
use strata_storage::{collect_stream, create_default_factories, stream_from_bytes};

#[derive(Parser)]
#[command(name = "strata")]
#[command(about = "Strata - Multi-provider storage engine")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file (default: <config dir>/strata/strata.json).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured providers with live state.
    Providers,

    /// Upload a file to the best provider.
    Upload {
        /// Local file to upload.
        #[arg(short, long)]
        file: PathBuf,

        /// Object key to store it under.
        #[arg(short, long)]
        key: String,

        /// Owner of the object.
        #[arg(short, long, default_value = "cli")]
        owner: String,

        /// Preferred providers, in order.
        #[arg(short, long = "prefer")]
        prefer: Vec<String>,
    },

    /// Download an object from a provider.
    Download {
        #[arg(short, long)]
        provider: String,

        #[arg(short, long)]
        key: String,

        /// Destination file path.
        #[arg(short, long)]
        dest: PathBuf,
    },

    /// Delete an object from a provider.
    Delete {
        #[arg(short, long)]
        provider: String,

        #[arg(short, long)]
        key: String,
    },

    /// Move an object to the best other provider.
    Migrate {
        /// Provider currently holding the object.
        #[arg(short, long)]
        source: String,

        #[arg(short, long)]
        key: String,
    },

    /// Refresh usage and report provider utilization.
    Analyze,

    /// Refresh and print live usage per provider.
    Usage,

    /// Run a provider's health check.
    Probe {
        /// Provider name.
        name: String,
    },

    /// Probe a third-party HTTP storage API and add it to the configuration.
    RegisterHttp {
        /// Provider name.
        #[arg(short, long)]
        name: String,

        /// Base URL of the storage API.
        #[arg(short, long)]
        url: String,

        /// Bearer API key.
        #[arg(long)]
        api_key: Option<String>,

        /// Largest object the API accepts, in bytes.
        #[arg(long)]
        max_file_size: u64,

        /// Concurrent transfers allowed against the API.
        #[arg(long, default_value = "4")]
        max_concurrent: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging; RUST_LOG overrides the verbosity flag.
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = match cli.config {
        Some(path) => path,
        None => default_config_path()?,
    };

    let command = match cli.command {
        Commands::RegisterHttp {
            name,
            url,
            api_key,
            max_file_size,
            max_concurrent,
        } => {
            let limits = ProviderLimits::new(max_file_size, max_concurrent);
            return cmd_register_http(&config_path, &name, &url, api_key, limits).await;
        }
        command => command,
    };

    let config = load_config(&config_path)?;
    let engine = build_engine(&config)?;
    let result = run(&engine, command).await;

    engine.flush_events().await;
    let dropped = engine.dropped_events();
    if dropped > 0 {
        warn!("{} telemetry events were dropped", dropped);
    }
    result
}

/// Run one command against a configured engine.
async fn run(engine: &StorageEngine, command: Commands) -> Result<()> {
    match command {
        Commands::Providers => cmd_providers(engine).await,
        Commands::Upload {
            file,
            key,
            owner,
            prefer,
        } => cmd_upload(engine, &file, &key, &owner, prefer).await,
        Commands::Download {
            provider,
            key,
            dest,
        } => cmd_download(engine, &provider, &key, &dest).await,
        Commands::Delete { provider, key } => cmd_delete(engine, &provider, &key).await,
        Commands::Migrate { source, key } => cmd_migrate(engine, &source, &key).await,
        Commands::Analyze => cmd_analyze(engine).await,
        Commands::Usage => cmd_usage(engine).await,
        Commands::Probe { name } => cmd_probe(engine, &name).await,
        Commands::RegisterHttp { .. } => {
            anyhow::bail!(
                "register-http updates the configuration and does not run against an engine"
            )
        }
    }
}

fn default_config_path() -> Result<PathBuf> {
    let dir = dirs::config_dir().context("Could not determine the configuration directory")?;
    Ok(dir.join("strata").join("strata.json"))
}

fn load_config(path: &Path) -> Result<StrataConfig> {
    StrataConfig::load(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))
}

fn build_engine(config: &StrataConfig) -> Result<StorageEngine> {
    let sink: Arc<dyn TelemetrySink> = match &config.telemetry_endpoint {
        Some(endpoint) => Arc::new(
            HttpTelemetrySink::new(endpoint, Duration::from_secs(5))
                .context("Invalid telemetry endpoint")?,
        ),
        None => Arc::new(TracingSink),
    };

    StorageEngine::from_config(config, &create_default_factories(), sink)
        .context("Failed to initialize engine")
}

/// Print providers with their live state.
async fn cmd_providers(engine: &StorageEngine) -> Result<()> {
    engine.refresh_usage().await;
    let providers = engine.list_providers();

    if providers.is_empty() {
        println!("No providers configured.");
        return Ok(());
    }

    for provider in providers {
        let ops: Vec<String> = provider
            .limits
            .supported_ops
            .iter()
            .map(|op| op.to_string())
            .collect();
        println!(
            "{:<16} {:<18} {:<5} {:>14} / {:<14} x{:<4} {}",
            provider.name,
            format!("{:?}", provider.kind),
            if provider.available { "up" } else { "down" },
            provider.live_usage_bytes,
            provider.limits.max_file_size_bytes,
            provider.limits.max_concurrent_transfers,
            ops.join(",")
        );
    }

    Ok(())
}

/// Upload a local file.
async fn cmd_upload(
    engine: &StorageEngine,
    file: &Path,
    key: &str,
    owner: &str,
    prefer: Vec<String>,
) -> Result<()> {
    let data = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let owner = OwnerId::new(owner).context("Invalid owner")?;
    let key = ObjectKey::new(key).context("Invalid object key")?;

    let preferred = if prefer.is_empty() {
        prefer
    } else {
        engine
            .resolve_preferences(&owner, &prefer)
            .context("None of the preferred providers is configured")?
    };

    info!("Uploading {} ({} bytes)", file.display(), data.len());
    let request = TransferRequest::new(owner, key, data.len() as u64).with_preferred(preferred);
    let size = request.size_bytes();
    let receipt = engine
        .upload(request, stream_from_bytes(data))
        .await
        .context("Upload failed")?;

    if let Some(e) = receipt.outcome.to_error() {
        return Err(e).context("Upload failed");
    }
    println!(
        "Uploaded {} bytes to '{}' in {} ms",
        size, receipt.provider, receipt.outcome.duration_ms
    );
    Ok(())
}

/// Download an object to a local file.
async fn cmd_download(
    engine: &StorageEngine,
    provider: &str,
    key: &str,
    dest: &Path,
) -> Result<()> {
    let key = ObjectKey::new(key).context("Invalid object key")?;
    let stream = engine.download(provider, &key).await.context("Download failed")?;
    let data = collect_stream(stream).await.context("Download failed")?;

    tokio::fs::write(dest, &data)
        .await
        .with_context(|| format!("Failed to write {}", dest.display()))?;
    println!("Downloaded {} bytes to {}", data.len(), dest.display());
    Ok(())
}

async fn cmd_delete(engine: &StorageEngine, provider: &str, key: &str) -> Result<()> {
    let key = ObjectKey::new(key).context("Invalid object key")?;
    let outcome = engine.delete(provider, &key).await.context("Delete failed")?;

    if let Some(e) = outcome.to_error() {
        return Err(e).context("Delete failed");
    }
    println!("Deleted '{}' from '{}'", key, provider);
    Ok(())
}

async fn cmd_migrate(engine: &StorageEngine, source: &str, key: &str) -> Result<()> {
    let key = ObjectKey::new(key).context("Invalid object key")?;
    engine.refresh_usage().await;
    let plan = engine.migrate(&key, source).await.context("Migration failed")?;

    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

async fn cmd_analyze(engine: &StorageEngine) -> Result<()> {
    engine.refresh_usage().await;
    let report = engine.analyze_efficiency();

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn cmd_usage(engine: &StorageEngine) -> Result<()> {
    let updated = engine.refresh_usage().await;
    info!("Refreshed usage for {} providers", updated);

    for provider in engine.list_providers() {
        println!("{:<16} {:>14} bytes", provider.name, provider.live_usage_bytes);
    }
    Ok(())
}

async fn cmd_probe(engine: &StorageEngine, name: &str) -> Result<()> {
    let healthy = engine.probe(name).await.context("Probe failed")?;
    println!("{}: {}", name, if healthy { "healthy" } else { "unreachable" });
    Ok(())
}

/// Probe an HTTP storage API and persist it as a dynamic provider.
async fn cmd_register_http(
    config_path: &Path,
    name: &str,
    url: &str,
    api_key: Option<String>,
    limits: ProviderLimits,
) -> Result<()> {
    let mut config = if config_path.exists() {
        load_config(config_path)?
    } else {
        StrataConfig::default()
    };
    let engine = build_engine(&config)?;

    let api_key = api_key.map(SecretString::new);
    engine
        .register_http_provider(name, url, api_key.clone(), limits.clone())
        .await
        .with_context(|| format!("Could not register '{}'", name))?;
    engine.flush_events().await;

    let mut backend_config = serde_json::json!({ "apiUrl": url });
    if let Some(key) = &api_key {
        backend_config["apiKey"] = serde_json::Value::String(key.expose().to_string());
    }
    config.providers.push(ProviderConfig {
        name: name.to_string(),
        kind: ProviderKind::DynamicHttp,
        limits: Some(limits),
        backend: "http".to_string(),
        backend_config,
        oauth: None,
        keys: None,
    });

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create configuration directory")?;
    }
    std::fs::write(config_path, serde_json::to_string_pretty(&config)?)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;

    println!("Registered '{}' ({})", name, url);
    Ok(())
}
