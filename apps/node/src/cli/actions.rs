use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::time::SystemTime;

use tokio::select;
use tokio::signal::unix::{self, SignalKind};
use tracing::info;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use gossip_p2p::common::peer::KnownAddress;
use gossip_p2p::common::time::AdjustedTime;

use crate::chain::{EmptyChain, EmptyMempool};
use crate::cli::arguments;
use crate::config::NodeConfig;

pub async fn run(args: arguments::Run) -> eyre::Result<()> {
    let config = NodeConfig::from_path(args.config)?;
    install_logger(config.logger.level);

    let magic = config.network.magic();
    let client_config = config.p2p.to_client_config(magic)?;

    let peers: HashMap<std::net::SocketAddr, KnownAddress> = HashMap::new();
    let clock = AdjustedTime::new(SystemTime::now().into());
    let rng = fastrand::Rng::new();

    let (_handle, stop, worker) = gossip_p2p::spawn(
        client_config,
        peers,
        clock,
        rng,
        Box::new(EmptyChain),
        Box::new(EmptyMempool),
    );

    let mut sigterm = unix::signal(SignalKind::terminate())?;
    let mut sigint = unix::signal(SignalKind::interrupt())?;

    select! {
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sigint.recv() => info!("received SIGINT"),
    }

    info!("shutting down");
    stop.store(true, Ordering::Relaxed);

    let joined = tokio::task::spawn_blocking(move || worker.join()).await?;
    let ran = joined.map_err(|_| eyre::eyre!("reactor thread panicked"))?;
    ran?;

    Ok(())
}

fn install_logger(level: tracing::Level) {
    let filter = Targets::new().with_target("gossip_p2p", level).with_default(level);
    let env_filter = EnvFilter::builder().with_default_directive(level.into()).from_env_lossy();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(filter))
        .with(env_filter)
        .init();
}
