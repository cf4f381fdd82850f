//! SSO to OIDC bridge - Entry Point

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use sso_oidc_bridge::config::{ClientRegistry, Config, defaults};
use sso_oidc_bridge::engine::MemoryEngine;
use sso_oidc_bridge::keys::{self, SigningKey};
use sso_oidc_bridge::server::{self, AppState};

#[derive(Parser, Debug)]
#[command(name = "sso-oidc-bridge")]
#[command(about = "OpenID Connect provider backed by Discourse-style SSO")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Base URL of the SSO provider (e.g., https://forum.example.com)
    #[arg(long, env = "SSO_SERVER")]
    sso_server: Option<String>,

    /// Secret shared with the SSO provider
    #[arg(long, env = "SSO_SECRET", hide_env_values = true)]
    sso_secret: Option<String>,

    /// Address to listen on
    #[arg(long, default_value = defaults::LISTEN_ADDR, env = "LISTEN_ADDR")]
    listen_addr: String,

    /// Path the OAuth2 endpoints are mounted under
    #[arg(long, default_value = defaults::BASE_PATH, env = "BASE_PATH")]
    base_path: String,

    /// JSON file with the registered clients
    #[arg(long, default_value = "clients.json", env = "CLIENTS_FILE")]
    clients_file: PathBuf,

    /// PKCS#1 PEM key used to sign ID tokens (generated on startup if absent)
    #[arg(long, env = "OIDC_PRIVATE_KEY_FILE")]
    private_key_file: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Print a new PKCS#1 PEM signing key to stdout
    Genkey,
}

fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if json {
        subscriber.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        subscriber.with(tracing_subscriber::fmt::layer().compact()).init();
    }
}

fn load_signing_key(path: Option<&PathBuf>) -> anyhow::Result<SigningKey> {
    match path {
        Some(path) => {
            let pem = std::fs::read_to_string(path)
                .with_context(|| format!("reading private key {}", path.display()))?;
            SigningKey::from_pkcs1_pem(&pem)
        }
        None => {
            tracing::warn!("No private key configured; generating one. Issued tokens will not survive a restart");
            SigningKey::generate()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Some(Command::Genkey) = cli.command {
        print!("{}", keys::generate_pem()?);
        return Ok(());
    }

    init_tracing(&cli.log_level, cli.json_logs);

    let sso_server = cli.sso_server.context("SSO_SERVER is required")?;
    let sso_secret = cli.sso_secret.context("SSO_SECRET is required")?;

    let mut config = Config::new(sso_server, sso_secret).with_base_path(&cli.base_path);
    config.listen_addr = cli.listen_addr;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        sso_server = %config.sso_server,
        base_path = %config.base_path,
        "Starting SSO OIDC bridge"
    );

    let clients = Arc::new(ClientRegistry::load(&cli.clients_file)?);
    tracing::info!(count = clients.len(), "Loaded clients");

    let signing_key = load_signing_key(cli.private_key_file.as_ref())?;
    tracing::info!(kid = %signing_key.key_id(), "Loaded signing key");

    let engine = MemoryEngine::new(Arc::clone(&clients), signing_key);
    engine.start_cleanup_task();

    let reap_interval = config.reap_interval;
    let state = Arc::new(AppState::with_memory_engine(config, clients, engine));
    state.bridge.start_reaper(reap_interval);

    server::serve(state).await
}
