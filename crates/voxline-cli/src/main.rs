//! `voxline` service entry point: flag/env configuration, log bootstrap,
//! gateway server startup.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use voxline_call::SequencerConfig;
use voxline_gateway::{run_gateway_server, GatewayServerConfig};

#[derive(Debug, Parser)]
#[command(
    name = "voxline",
    about = "Voice-call webhook reconciliation service",
    version
)]
struct VoxlineArgs {
    /// Address the gateway listens on.
    #[arg(long, env = "VOXLINE_BIND", default_value = "127.0.0.1:8080")]
    bind: String,

    /// Directory holding durable call records.
    #[arg(long, env = "VOXLINE_STATE_DIR", default_value = ".voxline")]
    state_dir: PathBuf,

    /// Store-write attempts before an inbound event is dropped.
    #[arg(long, env = "VOXLINE_STORE_RETRY_MAX_ATTEMPTS", default_value_t = 3)]
    store_retry_max_attempts: usize,

    /// Base delay for exponential store-write backoff.
    #[arg(long, env = "VOXLINE_STORE_RETRY_BASE_DELAY_MS", default_value_t = 50)]
    store_retry_base_delay_ms: u64,

    /// Log filter, e.g. `info` or `voxline_call=debug`.
    #[arg(long, env = "VOXLINE_LOG", default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = VoxlineArgs::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&args.log).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    run_gateway_server(GatewayServerConfig {
        bind: args.bind,
        state_dir: args.state_dir,
        sequencer: SequencerConfig {
            store_retry_max_attempts: args.store_retry_max_attempts,
            store_retry_base_delay_ms: args.store_retry_base_delay_ms,
        },
    })
    .await
}
