//! The rbtp full node entrypoint.
//!
//! Flag and file parsing is deliberately thin here: `RBTP_GENESIS` points at
//! a genesis JSON (the built-in dev chain otherwise) and `RBTP_SYNC_MODE`
//! selects full/fast/light.

#![warn(missing_debug_implementations, unreachable_pub)]
#![deny(unused_must_use, rust_2018_idioms)]

use rbtp_chainspec::{ChainSpec, Genesis, DEV};
use std::{error::Error, sync::Arc};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod node;

use config::NodeConfig;
use node::Node;

type BoxedError = Box<dyn Error + Send + Sync>;

fn load_spec() -> Result<Arc<ChainSpec>, BoxedError> {
    match std::env::var_os("RBTP_GENESIS") {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)?;
            let genesis: Genesis = serde_json::from_str(&raw)?;
            Ok(Arc::new(ChainSpec::from_genesis(genesis)))
        }
        None => Ok(Arc::clone(&*DEV)),
    }
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    match run().await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), BoxedError> {
    let spec = load_spec()?;
    let mut config = NodeConfig::default();
    if let Ok(mode) = std::env::var("RBTP_SYNC_MODE") {
        config.sync_mode = mode.parse()?;
    }
    config.network_id = spec.chain_id;

    info!(
        target: "node",
        chain = spec.chain_id,
        genesis = %spec.genesis_hash(),
        mode = %config.sync_mode,
        "Starting rbtp"
    );

    let node = Node::launch(config, spec)?;

    tokio::signal::ctrl_c().await?;
    node.shutdown().await;
    info!(target: "node", "Goodbye");
    Ok(())
}
