//! berad: the Bera Host daemon.
//!
//! Single binary that assembles the control plane:
//! - State store (redb)
//! - Release ledger
//! - Event bus + live log WebSocket
//! - Deploy pipeline
//! - REST API
//!
//! # Usage
//!
//! ```text
//! berad serve --config /etc/bera/bera.toml --port 3000
//! berad config --config /etc/bera/bera.toml
//! ```

mod seed;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use bera_core::{BeraConfig, DeployPolicy};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "info,berad=debug,bera=debug";
const ADMIN_TOKENS_ENV: &str = "BERA_ADMIN_TOKENS";
/// How long in-flight deploys get to settle after Ctrl-C.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "berad", about = "Bera Host control plane daemon")]
struct Cli {
    /// Path to bera.toml. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the API server, event bus and deploy pipeline in one process.
    Serve {
        /// Port to listen on.
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for persistent state.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Delay between deploy script steps, in milliseconds.
        #[arg(long)]
        step_delay_ms: Option<u64>,

        /// What to do with a deploy request for an app already deploying.
        #[arg(long)]
        deploy_policy: Option<DeployPolicy>,

        /// Create a demo application when the store has none.
        #[arg(long)]
        seed_demo: bool,
    },
    /// Print the effective configuration as TOML.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut config = BeraConfig::load(cli.config.as_deref())?;
    if let Ok(raw) = std::env::var(ADMIN_TOKENS_ENV) {
        config.extend_admin_tokens(&raw);
    }

    match cli.command {
        Command::Serve {
            port,
            data_dir,
            step_delay_ms,
            deploy_policy,
            seed_demo,
        } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(dir) = data_dir {
                config.server.data_dir = dir;
            }
            if let Some(ms) = step_delay_ms {
                config.deploy.step_delay_ms = ms;
            }
            if let Some(policy) = deploy_policy {
                config.deploy.policy = policy;
            }
            run_server(config, seed_demo).await
        }
        Command::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run_server(config: BeraConfig, seed_demo: bool) -> anyhow::Result<()> {
    info!("Bera Host daemon starting");

    // Ensure data directory exists.
    std::fs::create_dir_all(&config.server.data_dir).with_context(|| {
        format!("creating data directory {}", config.server.data_dir.display())
    })?;
    let db_path = config.server.data_dir.join("bera.redb");

    // ── Initialize subsystems ──────────────────────────────────

    let store = bera_state::StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let reset = seed::reset_interrupted_deploys(&store)?;
    if reset > 0 {
        warn!(apps = reset, "deploys interrupted by the previous shutdown were reset to idle");
    }

    let seeded = seed::seed_catalog(&store)?;
    if seeded > 0 {
        info!(items = seeded, "addon catalog seeded");
    }
    if seed_demo {
        seed::seed_demo_app(&store)?;
    }

    if config.admin.tokens.is_empty() {
        warn!("no admin tokens configured; admin API is disabled");
    }

    let state = bera_api::ApiState::new(store, &config);
    let pipeline = state.pipeline.clone();
    info!(
        policy = %config.deploy.policy,
        step_delay_ms = config.deploy.step_delay_ms,
        "deploy pipeline initialized"
    );

    // ── Start API server ───────────────────────────────────────

    let router = bera_api::build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        info!("shutdown signal received");
    });

    server.await?;

    // Cancelled runs still have to write their last line and reset status.
    if tokio::time::timeout(SHUTDOWN_GRACE, pipeline.shutdown())
        .await
        .is_err()
    {
        warn!(
            grace_secs = SHUTDOWN_GRACE.as_secs(),
            "deploys did not settle in time; they are reset on next start"
        );
    }

    info!("Bera Host daemon stopped");
    Ok(())
}
