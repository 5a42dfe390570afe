//! pt-host: Packet tunnel provider harness
//!
//! Plays the host side of a tunnel session: loads the provider config,
//! starts a session on the simulated engine, then forwards each stdin line
//! as a control message and prints the reply.
//!
//! ```text
//! pt-host [provider.toml | provider.json]
//! ```

use anyhow::{Context, Result};
use pt_provider::{ProviderConfig, SimulatedEngine, TunnelSession};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

// Use mimalloc as the global allocator for reduced memory fragmentation
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<()> {
    let config = match std::env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => ProviderConfig::from_file(&path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ProviderConfig::default(),
    };

    // RUST_LOG wins over the config file
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .context("Invalid log filter")?;
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    info!("pt-host starting...");

    let engine = Arc::new(SimulatedEngine::new(config.engine_reload_delay()));
    let session = TunnelSession::from_config(engine, &config)?;
    session
        .start(&config.startup_options)
        .await
        .context("Failed to start tunnel session")?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        if line == "status" {
            println!("{}", session.status().await);
            continue;
        }

        match session.handle_app_message(line.as_bytes()).await {
            Some(reply) => println!("{}", String::from_utf8_lossy(&reply)),
            None => {
                warn!("No reply to {:?}", line);
                println!("(no reply)");
            }
        }
    }

    session.stop().await;
    info!("pt-host shutting down");
    Ok(())
}
