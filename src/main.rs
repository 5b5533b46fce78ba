//! Queue Sentinel
//!
//! Polls the configured queues with one supervised worker per endpoint slot
//! and keeps a failover-protected notification client ready for publishing.
//!
//! # Architecture Overview
//!
//! ```text
//!   config.toml ──▶ loader + validation
//!                        │
//!         ┌──────────────┼──────────────────────┐
//!         ▼              ▼                      ▼
//!   ClientRegistry  NotificationService    ConsumerManager
//!   (client/key,    (active client,        (worker per consumer
//!    writers)        shared "sns" breaker)   × endpoint × slot)
//!         │              │                      │
//!         └──────────────┴──────── transport ◀──┘
//!                                  (memory)
//!
//!   signals: INT/TERM stop · USR1 pause · USR2 resume · HUP failover
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use clap::Parser;

use queue_sentinel::config::loader::load_config;
use queue_sentinel::consumer::{HandlerRegistry, LoggingHandler};
use queue_sentinel::lifecycle::{Application, SignalListener};
use queue_sentinel::observability::{logging, metrics};
use queue_sentinel::transport::memory::MemoryCloud;

#[derive(Parser)]
#[command(name = "queue-sentinel")]
#[command(about = "Supervised queue consumers with circuit breakers and failover", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    logging::init_logging(&config.observability)?;
    tracing::info!(config = %cli.config.display(), "queue-sentinel v0.1.0 starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    // Queues named by consumers and writers exist up front in the memory transport.
    let cloud = Arc::new(MemoryCloud::new());
    for endpoint in config
        .queues
        .consumers
        .iter()
        .flat_map(|c| c.endpoints.iter())
        .chain(config.queues.queue_writers.values())
    {
        cloud.create_queue(endpoint);
    }

    let handlers = HandlerRegistry::new().with("log", Arc::new(LoggingHandler));
    let mut signals = SignalListener::install()?;
    let app = Application::start(config, cloud.clone(), cloud.as_ref(), handlers).await?;

    app.run(&mut signals).await;

    tracing::info!("Shutdown complete");
    Ok(())
}
