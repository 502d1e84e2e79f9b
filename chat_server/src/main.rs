//! Replica server executable: loads configuration, opens the store,
//! binds the RPC listener, and runs until interrupted.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use quorumchat::logging::{logger_init, set_identity};
use quorumchat::{pf_error, pf_info, InitError, ReplicaConfig, ReplicaNode};

#[derive(Parser, Debug)]
#[command(name = "chat_server", about = "Replicated chat service replica node")]
struct Cli {
    /// Path to a TOML config file overlaying the built-in defaults.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// This replica's numeric id (overrides the config file).
    #[arg(long)]
    server_id: Option<u8>,

    /// Host to bind and advertise (overrides the config file).
    #[arg(long)]
    server_host: Option<String>,

    /// Port to bind (overrides the config file).
    #[arg(long)]
    server_port: Option<u16>,

    /// Start as the cluster's initial leader.
    #[arg(long)]
    initial_leader: bool,

    /// Join an already-running cluster instead of starting fresh.
    #[arg(long)]
    join: bool,
}

async fn run() -> Result<(), InitError> {
    let cli = Cli::parse();
    let config_str = match &cli.config {
        Some(path) => Some(std::fs::read_to_string(path)?),
        None => None,
    };
    let mut config = ReplicaConfig::parse(config_str.as_deref())?;
    if let Some(id) = cli.server_id {
        config.server_id = id;
    }
    if let Some(host) = cli.server_host {
        config.server_host = host;
    }
    if let Some(port) = cli.server_port {
        config.server_port = port;
    }
    config.initial_leader = config.initial_leader || cli.initial_leader;
    config.join = config.join || cli.join;
    config.check_timing();

    set_identity(format!("replica {}", config.server_id));
    pf_info!(
        "starting at {} (initial_leader={}, join={})",
        config.my_address(),
        config.initial_leader,
        config.join
    );

    let mut node = ReplicaNode::new(&config).await?;
    if config.join {
        node.join(config.replica_addresses.clone()).await?;
    } else {
        node.seed_static_peers(&config.replica_addresses).await;
    }

    let listener =
        quorumchat::transport::bind_with_retry(&config.my_address(), 5, std::time::Duration::from_millis(500))
            .await?;
    let node = Arc::new(node);

    let shutdown_node = Arc::clone(&node);
    ctrlc::set_handler(move || {
        pf_info!("received interrupt, shutting down");
        shutdown_node.shutdown();
        std::process::exit(0);
    })
    .map_err(|e| InitError(format!("failed to install signal handler: {}", e)))?;

    node.serve(listener).await.map_err(InitError::from)
}

#[tokio::main]
async fn main() -> ExitCode {
    logger_init();
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            pf_error!("fatal: {}", e);
            ExitCode::FAILURE
        }
    }
}
