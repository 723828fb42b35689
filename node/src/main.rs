use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use growbet_execution::Engine;
use growbet_node::{
    gateway::HttpChainGateway,
    relayer::{spawn_metrics_server, Metrics, Relayer},
    sqlite::SqliteState,
    Config, ValidatedConfig,
};
use rand::{rngs::StdRng, SeedableRng};
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
};
use tracing::{info, warn};

type NodeEngine = Engine<SqliteState, HttpChainGateway, HttpChainGateway>;

#[derive(Parser)]
#[command(name = "growbet-node", about = "Settlement relayer for growbet.")]
struct Args {
    /// Path to the YAML config file.
    #[arg(long)]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Relay fee payouts and resume withdrawals until interrupted.
    Run {
        /// Validate the config and exit without starting the relayer.
        #[arg(long)]
        dry_run: bool,
    },
    /// Print queued fee payouts as JSON.
    Payouts,
    /// Print unresolved withdrawals as JSON.
    Withdrawals,
}

fn init_tracing(config: &ValidatedConfig) {
    let builder = tracing_subscriber::fmt().with_max_level(config.log_level);
    if config.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn build_engine(config: &ValidatedConfig) -> Result<NodeEngine> {
    let state = SqliteState::open(&config.database)?;
    let gateway = HttpChainGateway::new(
        config.gateway_url.clone(),
        config.gateway_token.clone(),
        config.gateway_timeout,
    )?;
    Ok(Engine::new(
        state,
        config.store.clone(),
        gateway.clone(),
        gateway,
        config.policy.clone(),
        config.retry.clone(),
        StdRng::from_entropy(),
    ))
}

async fn run(config: ValidatedConfig) -> Result<()> {
    let engine = Arc::new(build_engine(&config)?);
    let metrics = Arc::new(Metrics::new());
    let metrics_server = spawn_metrics_server(
        SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), config.metrics_port),
        metrics.clone(),
    );

    let relayer = Relayer::new(engine, config.relayer_interval, metrics);
    relayer
        .run(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(?err, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await;
    metrics_server.abort();
    Ok(())
}

fn main() {
    if let Err(err) = main_result() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn main_result() -> Result<()> {
    let args = Args::parse();
    let config = Config::load(&args.config)?;

    if let Command::Run { dry_run: true } = args.command {
        println!("{:#?}", config.redacted_debug());
        config.validate().context("Invalid config")?;
        println!("config ok");
        return Ok(());
    }

    let redacted = format!("{:?}", config.redacted_debug());
    let config = config.validate().context("Invalid config")?;
    init_tracing(&config);
    info!(config = %redacted, "loaded config file");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start runtime")?;
    runtime.block_on(async move {
        match args.command {
            Command::Run { .. } => run(config).await,
            Command::Payouts => {
                let engine = build_engine(&config)?;
                let payouts = engine.pending_payouts().await?;
                println!("{}", serde_json::to_string_pretty(&payouts)?);
                Ok(())
            }
            Command::Withdrawals => {
                let engine = build_engine(&config)?;
                let withdrawals = engine.unresolved_withdrawals().await?;
                println!("{}", serde_json::to_string_pretty(&withdrawals)?);
                Ok(())
            }
        }
    })
}
